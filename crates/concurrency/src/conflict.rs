//! Conflict detection between concurrent transactions
//!
//! A writer that read version `R` and finds the latest version is `L > R`
//! must compare its operation against the transaction of every version in
//! `(R, L]`. The rules are conservative: when in doubt, report a conflict.
//!
//! Key rules:
//! - Whole-table replacements (`Overwrite`, `Restore`) conflict with everything
//! - Operations that rewrite existing fragments conflict when their fragment
//!   sets overlap
//! - Column-level writers (`Update`, `DataReplacement`) may share fragments
//!   when they write disjoint fields
//! - Schema changes conflict with writers that depend on the old schema
//! - Index creation conflicts with writers that invalidate the indexed data
//!
//! The check is asymmetric: `ours` is the operation being committed,
//! `theirs` is the operation that was committed first.

use std::collections::BTreeSet;
use tessel_core::IndexMetadata;
use tessel_durability::Operation;

/// Why two operations cannot both be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// One side replaces the whole table
    TableReplaced {
        /// Name of the replacing operation
        operation: &'static str,
    },

    /// Both sides modify the same fragments
    OverlappingFragments {
        /// Fragment ids touched by both sides
        fragment_ids: BTreeSet<u64>,
    },

    /// One side changes the schema the other side depends on
    SchemaChanged {
        /// Name of the schema-changing operation
        operation: &'static str,
    },

    /// An index is created or invalidated concurrently
    IndexInvalidated {
        /// Name of the affected index
        index: String,
    },

    /// Both sides edit the same config keys
    OverlappingConfigKeys {
        /// Keys touched by both sides
        keys: BTreeSet<String>,
    },
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::TableReplaced { operation } => {
                write!(f, "{} replaces the whole table", operation)
            }
            ConflictReason::OverlappingFragments { fragment_ids } => {
                write!(f, "both transactions modify fragments {:?}", fragment_ids)
            }
            ConflictReason::SchemaChanged { operation } => {
                write!(f, "{} changed the schema", operation)
            }
            ConflictReason::IndexInvalidated { index } => {
                write!(f, "index '{}' is affected by both transactions", index)
            }
            ConflictReason::OverlappingConfigKeys { keys } => {
                write!(f, "both transactions edit config keys {:?}", keys)
            }
        }
    }
}

/// Check whether `ours` can be committed after `theirs`.
///
/// Returns `None` when the operations are compatible and `ours` can be
/// rebased onto the version `theirs` produced.
pub fn check_conflict(ours: &Operation, theirs: &Operation) -> Option<ConflictReason> {
    use Operation::*;

    if ours.replaces_table() {
        return Some(ConflictReason::TableReplaced {
            operation: ours.name(),
        });
    }
    if theirs.replaces_table() {
        return Some(ConflictReason::TableReplaced {
            operation: theirs.name(),
        });
    }

    match (ours, theirs) {
        (ReserveFragments { .. }, _) | (_, ReserveFragments { .. }) => None,

        (
            UpdateConfig {
                upsert_values: a_up,
                delete_keys: a_del,
            },
            UpdateConfig {
                upsert_values: b_up,
                delete_keys: b_del,
            },
        ) => {
            let a: BTreeSet<&String> = a_up.keys().chain(a_del.iter()).collect();
            let keys: BTreeSet<String> = b_up
                .keys()
                .chain(b_del.iter())
                .filter(|k| a.contains(k))
                .cloned()
                .collect();
            if keys.is_empty() {
                None
            } else {
                Some(ConflictReason::OverlappingConfigKeys { keys })
            }
        }
        (UpdateConfig { .. }, _) | (_, UpdateConfig { .. }) => None,

        // Merge rewrites every fragment; only index creation is independent of it
        (Merge { .. }, CreateIndex { .. }) | (CreateIndex { .. }, Merge { .. }) => None,
        (Merge { .. }, _) | (_, Merge { .. }) => Some(ConflictReason::SchemaChanged {
            operation: if matches!(ours, Merge { .. }) {
                ours.name()
            } else {
                theirs.name()
            },
        }),

        (Project { .. }, Project { .. })
        | (Project { .. }, CreateIndex { .. })
        | (CreateIndex { .. }, Project { .. }) => Some(ConflictReason::SchemaChanged {
            operation: "Project",
        }),
        // A projection only rewrites schema metadata; data written before it
        // is still readable under the new schema.
        (Project { .. }, _) => None,
        (_, Project { .. }) => Some(ConflictReason::SchemaChanged {
            operation: theirs.name(),
        }),

        (
            CreateIndex {
                new_indices: a_new,
                removed_indices: a_removed,
            },
            CreateIndex {
                new_indices: b_new,
                removed_indices: b_removed,
            },
        ) => index_pair_conflict(a_new, a_removed, b_new, b_removed),
        (
            CreateIndex {
                new_indices,
                removed_indices,
            },
            other,
        )
        | (
            other,
            CreateIndex {
                new_indices,
                removed_indices,
            },
        ) => new_indices
            .iter()
            .chain(removed_indices.iter())
            .find(|index| invalidates_index(other, index))
            .map(|index| ConflictReason::IndexInvalidated {
                index: index.name.clone(),
            }),

        (Append { .. }, _) | (_, Append { .. }) => None,

        // Remaining pairs rewrite existing fragments:
        // Delete, Update, Rewrite, DataReplacement
        _ => {
            let overlap: BTreeSet<u64> = ours
                .modified_fragment_ids()
                .intersection(&theirs.modified_fragment_ids())
                .copied()
                .collect();
            if overlap.is_empty() || column_disjoint(ours, theirs) {
                None
            } else {
                Some(ConflictReason::OverlappingFragments {
                    fragment_ids: overlap,
                })
            }
        }
    }
}

/// Column-level writers touching disjoint fields can share fragments
fn column_disjoint(ours: &Operation, theirs: &Operation) -> bool {
    let column_writer = |op: &Operation| {
        matches!(
            op,
            Operation::Update { .. } | Operation::DataReplacement { .. }
        )
    };
    if !column_writer(ours) || !column_writer(theirs) {
        return false;
    }
    // Two updates both rewrite deletion state for the rows they move
    if matches!(ours, Operation::Update { .. }) && matches!(theirs, Operation::Update { .. }) {
        return false;
    }
    match (ours.written_fields(), theirs.written_fields()) {
        (Some(a), Some(b)) => a.is_disjoint(&b),
        _ => false,
    }
}

fn index_pair_conflict(
    a_new: &[IndexMetadata],
    a_removed: &[IndexMetadata],
    b_new: &[IndexMetadata],
    b_removed: &[IndexMetadata],
) -> Option<ConflictReason> {
    let b_names: BTreeSet<&str> = b_new
        .iter()
        .chain(b_removed.iter())
        .map(|i| i.name.as_str())
        .collect();
    a_new
        .iter()
        .chain(a_removed.iter())
        .find(|i| b_names.contains(i.name.as_str()))
        .map(|i| ConflictReason::IndexInvalidated {
            index: i.name.clone(),
        })
}

/// Does `op` change data an index over `index.fields` / `index.fragment_ids` depends on?
fn invalidates_index(op: &Operation, index: &IndexMetadata) -> bool {
    match op {
        Operation::Update { .. } | Operation::DataReplacement { .. } => {
            match op.written_fields() {
                None => true,
                Some(fields) => index.covers_any_field(&fields),
            }
        }
        Operation::Rewrite { .. } => op
            .modified_fragment_ids()
            .iter()
            .any(|id| index.fragment_ids.contains(id)),
        _ => false,
    }
}
