//! Field-level filtering
//!
//! Reduces the field permission maps of the winning, condition-satisfied
//! candidates to a single per-field access mode. Resolution rules:
//!
//! - `hidden` from any contributing permission is absolute for that field
//! - `write` beats `read` only when the write grant's role priority is at
//!   least the read grant's; equal priority falls back to the more specific
//!   resource match
//! - fields no contributing permission mentions default to hidden

use crate::aggregate::Candidate;
use crate::types::{FieldAccess, FieldMode, MatchSpecificity};
use std::collections::BTreeMap;

/// Strength of one side's best grant for a field
type Grant = (i32, MatchSpecificity);

/// Project the candidates' field maps to per-field access modes
///
/// Only fields mentioned by at least one candidate appear in the result;
/// [`project_entity_fields`] extends the map over an entity's declared
/// field list with the default-hidden rule.
pub fn project_fields(candidates: &[Candidate]) -> BTreeMap<String, FieldAccess> {
    // field -> (hidden, best read grant, best write grant)
    let mut per_field: BTreeMap<&str, (bool, Option<Grant>, Option<Grant>)> = BTreeMap::new();

    for candidate in candidates {
        let grant = (candidate.priority, candidate.specificity);
        for (field, mode) in &candidate.permission.field_modes {
            let entry = per_field.entry(field.as_str()).or_insert((false, None, None));
            match mode {
                FieldMode::Hidden => entry.0 = true,
                FieldMode::Read => upgrade(&mut entry.1, grant),
                FieldMode::Write => upgrade(&mut entry.2, grant),
            }
        }
    }

    per_field
        .into_iter()
        .map(|(field, (hidden, read, write))| {
            let access = if hidden {
                FieldAccess::Hidden
            } else {
                match (read, write) {
                    (_, None) => FieldAccess::ReadOnly,
                    (None, Some(_)) => FieldAccess::ReadWrite,
                    (Some(r), Some(w)) => {
                        if write_wins(w, r) {
                            FieldAccess::ReadWrite
                        } else {
                            FieldAccess::ReadOnly
                        }
                    }
                }
            };
            (field.to_string(), access)
        })
        .collect()
}

/// Project an entity's declared fields, defaulting unmentioned ones to hidden
pub fn project_entity_fields(
    candidates: &[Candidate],
    entity_fields: &[String],
) -> BTreeMap<String, FieldAccess> {
    let resolved = project_fields(candidates);
    entity_fields
        .iter()
        .map(|field| {
            let access = resolved.get(field).copied().unwrap_or(FieldAccess::Hidden);
            (field.clone(), access)
        })
        .collect()
}

fn upgrade(slot: &mut Option<Grant>, grant: Grant) {
    match slot {
        Some(existing) if *existing >= grant => {}
        _ => *slot = Some(grant),
    }
}

/// Write beats read on higher priority, or equal priority with at least as
/// specific a resource match
fn write_wins(write: Grant, read: Grant) -> bool {
    write.0 > read.0 || (write.0 == read.0 && write.1 >= read.1)
}
