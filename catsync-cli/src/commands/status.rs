//! `catsync status` — ledger visibility per entity type.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use catsync_core::{EntityType, Ledger};
use catsync_engine::pipeline;

use super::load_config;
use crate::output::format_datetime_age;

/// Arguments for `catsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path to the catsync YAML config.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(&self.config)?;
        let path = pipeline::ledger_path(&config).context("could not resolve ledger path")?;
        let exists = path.exists();
        let ledger = Ledger::load(&path)
            .with_context(|| format!("failed to read ledger '{}'", path.display()))?;

        let report = StatusReport {
            tenant: config.tenant,
            ledger_path: path,
            last_updated: exists.then(|| ledger.last_updated().to_rfc3339()),
            last_updated_age: if exists {
                format_datetime_age(ledger.last_updated())
            } else {
                "never".to_string()
            },
            total: ledger.total(),
            types: EntityType::all()
                .iter()
                .map(|&ty| TypeCount {
                    entity_type: ty,
                    keys: ledger.len(ty),
                })
                .collect(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReport {
    tenant: String,
    ledger_path: PathBuf,
    last_updated: Option<String>,
    last_updated_age: String,
    total: usize,
    types: Vec<TypeCount>,
}

#[derive(Serialize)]
struct TypeCount {
    entity_type: EntityType,
    keys: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "")]
    indicator: String,
    #[tabled(rename = "entity type")]
    entity_type: String,
    #[tabled(rename = "ledger keys")]
    keys: usize,
}

fn print_table(report: StatusReport) {
    println!(
        "catsync v{} | tenant {} | {} keys | updated {}",
        env!("CARGO_PKG_VERSION"),
        report.tenant.bold(),
        report.total,
        report.last_updated_age,
    );
    println!("{}", report.ledger_path.display().to_string().bright_black());

    if report.total == 0 {
        println!("Ledger is empty. Run 'catsync ingest' to populate it.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .types
        .into_iter()
        .map(|row| StatusTableRow {
            indicator: if row.keys > 0 {
                "■".green().bold().to_string()
            } else {
                "■".bright_black().to_string()
            },
            entity_type: row.entity_type.to_string(),
            keys: row.keys,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
