//! Terminal and JSON rendering of run summaries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use catsync_engine::{PhaseStatus, ReconcileReport, RunSummary, WorkflowKind};

const MAX_LISTED: usize = 10;

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "created")]
    created: usize,
    #[tabled(rename = "existing")]
    existing: usize,
    #[tabled(rename = "deleted")]
    deleted: usize,
    #[tabled(rename = "failed")]
    failed: usize,
    #[tabled(rename = "skipped")]
    skipped: usize,
    #[tabled(rename = "calls")]
    attempts: u32,
    #[tabled(rename = "verification")]
    verification: String,
}

pub fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).context("failed to serialize run summary")?
        );
        return Ok(());
    }
    print_table(summary);
    Ok(())
}

pub fn workflow_label(kind: WorkflowKind) -> &'static str {
    match kind {
        WorkflowKind::Ingest => "ingest",
        WorkflowKind::Delete => "delete",
        WorkflowKind::Reconcile => "reconcile",
    }
}

fn print_table(summary: &RunSummary) {
    let prefix = if summary.dry_run { "[dry-run] " } else { "" };
    let label = workflow_label(summary.workflow);

    if !summary.phases.is_empty() {
        let rows: Vec<PhaseRow> = summary
            .phases
            .iter()
            .map(|phase| PhaseRow {
                phase: phase.entity_type.to_string(),
                status: status_label(phase.status),
                created: phase.counts.created,
                existing: phase.counts.existing,
                deleted: phase.counts.deleted,
                failed: phase.counts.failed,
                skipped: phase.counts.skipped,
                attempts: phase.attempts,
                verification: phase
                    .verification
                    .as_ref()
                    .map(|v| v.status.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    for phase in &summary.phases {
        for item in phase.failed.iter().take(MAX_LISTED) {
            println!(
                "  {} {}/{}: {}",
                "✗".red(),
                phase.entity_type,
                item.key,
                item.error.message
            );
        }
        if phase.failed.len() > MAX_LISTED {
            println!("    … and {} more", phase.failed.len() - MAX_LISTED);
        }
        for issue in &phase.issues {
            println!("  {} {}: {issue}", "!".yellow(), phase.entity_type);
        }
    }

    for report in &summary.reconciliation {
        print_reconciliation(report);
    }

    if let Some(failed) = summary.aborted_after {
        println!(
            "{} phases depending on {failed} were aborted",
            "!".yellow().bold()
        );
    }

    if summary.success {
        println!("{prefix}{} {label} succeeded", "✓".green().bold());
    } else if summary.cancelled {
        println!("{prefix}{} {label} cancelled; ledger saved", "■".yellow().bold());
    } else {
        println!("{prefix}{} {label} finished with issues", "✗".red().bold());
    }

    if let Some(reingest) = &summary.reingest {
        println!("{}", "reingest".bold());
        print_table(reingest);
    }
}

fn print_reconciliation(report: &ReconcileReport) {
    let marker = if report.clean {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    };
    println!(
        "  {marker} reconcile {}: {} orphans found, {} deleted, {} rounds",
        report.entity_type,
        report.orphans_found.len(),
        report.deleted.len(),
        report.rounds
    );
    for issue in &report.issues {
        println!("      {issue}");
    }
}

fn status_label(status: PhaseStatus) -> String {
    match status {
        PhaseStatus::Succeeded => "SUCCEEDED".green().to_string(),
        PhaseStatus::Failed => "FAILED".red().bold().to_string(),
        PhaseStatus::Skipped => "SKIPPED".bright_black().to_string(),
        PhaseStatus::Aborted => "ABORTED".magenta().to_string(),
        PhaseStatus::Cancelled => "CANCELLED".yellow().to_string(),
    }
}

/// Coarse age like `42s`, `5m`, `3h` or `2d`.
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{s}s ago"),
        s if s < 60 * 60 => format!("{}m ago", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h ago", s / (60 * 60)),
        s => format!("{}d ago", s / (60 * 60 * 24)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ages_are_coarse() {
        assert_eq!(format_seconds(5), "5s ago");
        assert_eq!(format_seconds(125), "2m ago");
        assert_eq!(format_seconds(3 * 3600 + 10), "3h ago");
        assert_eq!(format_seconds(2 * 86_400), "2d ago");
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        let ahead = Utc::now() + Duration::minutes(5);
        assert_eq!(format_datetime_age(ahead), "0s ago");
    }

    #[test]
    fn workflow_labels_match_subcommands() {
        assert_eq!(workflow_label(WorkflowKind::Ingest), "ingest");
        assert_eq!(workflow_label(WorkflowKind::Delete), "delete");
        assert_eq!(workflow_label(WorkflowKind::Reconcile), "reconcile");
    }
}
