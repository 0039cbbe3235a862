//! Dependency sorter — parents before children within one entity type.
//!
//! `level(e) = 0` without a parent, otherwise `1 + level(parent)`. Entities
//! are stably sorted by level. A parent key that does not resolve within
//! the input, or that closes a cycle, puts the entity at level 0 with a
//! warning: it is still submitted, never dropped.

use std::collections::{HashMap, HashSet};

use catsync_core::{Entity, NaturalKey};

/// Order `entities` so every resolvable parent precedes its children.
pub fn sort_by_dependency(entities: Vec<Entity>) -> Vec<Entity> {
    let levels = compute_levels(&entities);
    let mut leveled: Vec<(usize, Entity)> = levels.into_iter().zip(entities).collect();
    leveled.sort_by_key(|(level, _)| *level);
    leveled.into_iter().map(|(_, entity)| entity).collect()
}

/// Level of each entity, by input position.
///
/// Walks parent chains iteratively with memoization, so deep trees cannot
/// overflow the stack and each entity is resolved once.
pub fn compute_levels(entities: &[Entity]) -> Vec<usize> {
    let mut index: HashMap<&NaturalKey, usize> = HashMap::with_capacity(entities.len());
    for (i, entity) in entities.iter().enumerate() {
        index.entry(&entity.key).or_insert(i);
    }

    let mut levels: Vec<Option<usize>> = vec![None; entities.len()];
    for start in 0..entities.len() {
        if levels[start].is_some() {
            continue;
        }

        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        let mut cur = start;
        let base = loop {
            path.push(cur);
            on_path.insert(cur);
            let entity = &entities[cur];
            let Some(parent_key) = &entity.parent_key else {
                break 0;
            };
            match index.get(parent_key) {
                None => {
                    tracing::warn!(
                        entity_type = %entity.entity_type,
                        key = %entity.key,
                        parent = %parent_key,
                        "parent not found in input; treating as root",
                    );
                    break 0;
                }
                Some(&parent) if on_path.contains(&parent) => {
                    tracing::warn!(
                        entity_type = %entity.entity_type,
                        key = %entity.key,
                        parent = %parent_key,
                        "parent cycle detected; treating as root",
                    );
                    break 0;
                }
                Some(&parent) => match levels[parent] {
                    Some(level) => break level + 1,
                    None => cur = parent,
                },
            }
        };

        // The last node on the path sits at `base`; each earlier one is a child.
        for (depth, node) in path.into_iter().rev().enumerate() {
            levels[node] = Some(base + depth);
        }
    }

    levels.into_iter().map(|l| l.unwrap_or(0)).collect()
}
