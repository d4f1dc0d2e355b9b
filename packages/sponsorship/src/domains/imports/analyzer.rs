//! Import analysis: what applying a roster would change, computed without writing.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::roster::RosterEntry;
use crate::common::ChildId;
use crate::domains::children::models::{Child, ChildKey, ChildProfile, ChildStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildUpdate {
    pub child_id: ChildId,
    pub display_id: String,
    pub changes: Vec<FieldChange>,
}

/// Something an administrator should look at before applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportWarning {
    /// A held or sponsored child is missing from the roster.
    CommittedChildRemoved { display_id: String, status: ChildStatus },
    FieldCleared {
        display_id: String,
        status: ChildStatus,
        field: &'static str,
    },
    AgeDecreased {
        display_id: String,
        status: ChildStatus,
        old: i32,
        new: i32,
    },
    GenderChanged {
        display_id: String,
        status: ChildStatus,
        old: String,
        new: String,
    },
    /// The roster lists the same child more than once; the last entry is used.
    DuplicateEntry { display_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportAnalysis {
    /// Display ids of children not yet in the system.
    pub added: Vec<String>,
    pub updated: Vec<ChildUpdate>,
    /// Children in the system but not in the roster.
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    pub warnings: Vec<ImportWarning>,
}

impl ImportAnalysis {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Roster entries keyed by (family number, letter); later duplicates replace earlier ones.
pub(crate) fn index_roster(
    roster: &[RosterEntry],
) -> (BTreeMap<ChildKey, ChildProfile>, Vec<ImportWarning>) {
    let mut indexed = BTreeMap::new();
    let mut warnings = Vec::new();
    for entry in roster {
        let key = entry.key();
        if indexed.insert(key.clone(), entry.normalized_profile()).is_some() {
            warnings.push(ImportWarning::DuplicateEntry {
                display_id: key.display_id(),
            });
        }
    }
    (indexed, warnings)
}

/// Compare the current children against a roster.
pub fn analyze_import(current: &[Child], roster: &[RosterEntry]) -> ImportAnalysis {
    let (incoming, mut warnings) = index_roster(roster);
    let existing: HashMap<ChildKey, &Child> = current.iter().map(|c| (c.key(), c)).collect();

    let mut analysis = ImportAnalysis::default();

    for (key, profile) in &incoming {
        let Some(child) = existing.get(key) else {
            analysis.added.push(key.display_id());
            continue;
        };

        let changes = diff_profiles(&child.profile, profile);
        if changes.is_empty() {
            analysis.unchanged.push(key.display_id());
            continue;
        }

        warnings.extend(change_warnings(child, &changes));
        analysis.updated.push(ChildUpdate {
            child_id: child.id,
            display_id: key.display_id(),
            changes,
        });
    }

    let mut removed: Vec<&Child> = current
        .iter()
        .filter(|c| !incoming.contains_key(&c.key()))
        .collect();
    removed.sort_by_key(|c| c.key());
    for child in removed {
        if child.status.is_committed() {
            warnings.push(ImportWarning::CommittedChildRemoved {
                display_id: child.display_id(),
                status: child.status,
            });
        }
        analysis.removed.push(child.display_id());
    }

    analysis.warnings = warnings;
    analysis
}

fn diff_profiles(old: &ChildProfile, new: &ChildProfile) -> Vec<FieldChange> {
    old.fields()
        .into_iter()
        .zip(new.fields())
        .filter(|((_, a), (_, b))| a != b)
        .map(|((field, old), (_, new))| FieldChange { field, old, new })
        .collect()
}

fn change_warnings(child: &Child, changes: &[FieldChange]) -> Vec<ImportWarning> {
    let display_id = child.display_id();
    let status = child.status;
    let mut warnings = Vec::new();

    for change in changes {
        match (change.field, &change.old, &change.new) {
            (field, Some(_), None) => warnings.push(ImportWarning::FieldCleared {
                display_id: display_id.clone(),
                status,
                field,
            }),
            ("age", Some(old), Some(new)) => {
                if let (Ok(old), Ok(new)) = (old.parse::<i32>(), new.parse::<i32>()) {
                    if new < old {
                        warnings.push(ImportWarning::AgeDecreased {
                            display_id: display_id.clone(),
                            status,
                            old,
                            new,
                        });
                    }
                }
            }
            ("gender", Some(old), Some(new)) if !old.eq_ignore_ascii_case(new) => {
                warnings.push(ImportWarning::GenderChanged {
                    display_id: display_id.clone(),
                    status,
                    old: old.clone(),
                    new: new.clone(),
                })
            }
            _ => {}
        }
    }

    warnings
}
