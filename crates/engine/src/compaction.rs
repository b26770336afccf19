//! Compaction: merging small fragments and purging soft-deleted rows
//!
//! ## Planning
//!
//! Fragments are scanned in manifest order. A fragment is a candidate if it
//! is smaller than `target_rows_per_fragment` (worth merging with its
//! neighbors) or if its deleted fraction exceeds
//! `materialize_deletions_threshold` (worth rewriting on its own). Adjacent
//! candidates covered by the same set of indices form a bin; bins are then
//! split so each task holds roughly `target_rows_per_fragment` live rows.
//! A bin of one fragment with nothing to materialize is dropped.
//!
//! ## Execution
//!
//! A [`FragmentRewriter`] writes the new data files. The engine carries the
//! surviving row ids of the inputs onto the outputs, records a
//! `RewrittenIndex` for each index whose coverage moves, and commits one
//! `Rewrite` transaction for the whole plan.

use crate::table::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tessel_core::{
    DataFile, DeletionVector, Fragment, IndexMetadata, Result, RowIdSequence, Schema,
};
use tessel_durability::{
    read_deletion_vector, read_row_ids, write_row_ids, RewriteGroup, RewrittenIndex,
};
use tessel_storage::{ObjectStore, TablePaths};
use tracing::debug;
use uuid::Uuid;

fn default_target_rows() -> usize {
    1024 * 1024
}

fn default_materialize() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.1
}

/// Knobs for [`plan_compaction`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionOptions {
    /// Live rows each output fragment should hold
    #[serde(default = "default_target_rows")]
    pub target_rows_per_fragment: usize,
    /// Rewrite fragments to purge soft-deleted rows
    #[serde(default = "default_materialize")]
    pub materialize_deletions: bool,
    /// Deleted fraction above which a fragment is rewritten on its own
    #[serde(default = "default_threshold")]
    pub materialize_deletions_threshold: f32,
    /// Upper bound on live rows rewritten by one task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows_per_group: Option<usize>,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        CompactionOptions {
            target_rows_per_fragment: default_target_rows(),
            materialize_deletions: default_materialize(),
            materialize_deletions_threshold: default_threshold(),
            max_rows_per_group: None,
        }
    }
}

impl CompactionOptions {
    /// Set the target fragment size (builder pattern)
    pub fn with_target_rows_per_fragment(mut self, rows: usize) -> Self {
        self.target_rows_per_fragment = rows;
        self
    }

    /// Set the materialization threshold (builder pattern)
    pub fn with_materialize_deletions_threshold(mut self, threshold: f32) -> Self {
        self.materialize_deletions_threshold = threshold;
        self
    }

    /// Enable or disable deletion materialization (builder pattern)
    pub fn with_materialize_deletions(mut self, enabled: bool) -> Self {
        self.materialize_deletions = enabled;
        self
    }

    /// Cap the rows of one task (builder pattern)
    pub fn with_max_rows_per_group(mut self, rows: usize) -> Self {
        self.max_rows_per_group = Some(rows);
        self
    }

    /// Check ranges
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.target_rows_per_fragment == 0 {
            return Err(ConfigError::InvalidValue {
                field: "target_rows_per_fragment",
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.materialize_deletions_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "materialize_deletions_threshold",
                message: format!(
                    "{} is not within [0, 1]",
                    self.materialize_deletions_threshold
                ),
            });
        }
        if self.max_rows_per_group == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_rows_per_group",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Fragments rewritten together into new fragments
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionTask {
    /// Adjacent input fragments, in manifest order
    pub fragments: Vec<Fragment>,
}

impl CompactionTask {
    /// Live rows of the inputs
    pub fn live_rows(&self) -> u64 {
        self.fragments.iter().map(|f| f.current_rows()).sum()
    }
}

/// Output of [`plan_compaction`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactionPlan {
    /// Independent rewrite tasks
    pub tasks: Vec<CompactionTask>,
}

impl CompactionPlan {
    /// True if there is nothing to compact
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Counts reported by a compaction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionMetrics {
    /// Fragments replaced
    pub fragments_removed: usize,
    /// Fragments written
    pub fragments_added: usize,
    /// Data files no longer referenced
    pub files_removed: usize,
    /// Data files written
    pub files_added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidacy {
    /// Merge only if a neighbor is also a candidate
    WithNeighbors,
    /// Rewrite even alone
    Itself,
}

struct CandidateBin {
    fragments: Vec<Fragment>,
    candidacy: Vec<Candidacy>,
    row_counts: Vec<u64>,
    indices: Vec<usize>,
}

impl CandidateBin {
    fn new(fragment: Fragment, candidacy: Candidacy, indices: Vec<usize>) -> Self {
        let rows = fragment.current_rows();
        CandidateBin {
            fragments: vec![fragment],
            candidacy: vec![candidacy],
            row_counts: vec![rows],
            indices,
        }
    }

    fn push(&mut self, fragment: Fragment, candidacy: Candidacy) {
        self.row_counts.push(fragment.current_rows());
        self.fragments.push(fragment);
        self.candidacy.push(candidacy);
    }

    fn is_noop(&self) -> bool {
        match self.candidacy.as_slice() {
            [] => true,
            [only] => *only == Candidacy::WithNeighbors,
            _ => false,
        }
    }

    /// Split into runs of at least `min_rows` live rows, each at most `max_rows`.
    fn split_for_size(self, min_rows: u64, max_rows: Option<u64>) -> Vec<CompactionTask> {
        let mut tasks = Vec::new();
        let mut fragments = self.fragments.into_iter();
        let counts = self.row_counts;
        let mut start = 0;
        while start < counts.len() {
            let mut len = 0;
            let mut rows = 0u64;
            while start + len < counts.len() {
                let next = counts[start + len];
                let over_cap = max_rows.is_some_and(|cap| len > 0 && rows + next > cap);
                if rows >= min_rows || over_cap {
                    break;
                }
                rows += next;
                len += 1;
            }
            let remaining: u64 = counts[start + len..].iter().sum();
            let remaining_fits = max_rows.map_or(true, |cap| rows + remaining <= cap);
            if remaining < min_rows && remaining_fits {
                // Too little left for its own task, fold it into this one
                len = counts.len() - start;
            }
            tasks.push(CompactionTask {
                fragments: fragments.by_ref().take(len).collect(),
            });
            start += len;
        }
        tasks
    }
}

/// Plan a compaction of `fragments`.
///
/// `indices` keeps fragments with different index coverage out of the same
/// task, so a remapped index never gains rows it did not index.
pub fn plan_compaction(
    fragments: &[Fragment],
    indices: &[IndexMetadata],
    options: &CompactionOptions,
) -> Result<CompactionPlan> {
    options.validate()?;
    let materialize =
        options.materialize_deletions && options.materialize_deletions_threshold < 1.0;
    let target = options.target_rows_per_fragment as u64;
    let threshold = options.materialize_deletions_threshold as f64;

    let mut bins: Vec<CandidateBin> = Vec::new();
    let mut current: Option<CandidateBin> = None;
    for fragment in fragments {
        let candidacy = if materialize && fragment.deleted_fraction() > threshold {
            Some(Candidacy::Itself)
        } else if fragment.physical_rows < target {
            Some(Candidacy::WithNeighbors)
        } else {
            None
        };
        let covering: Vec<usize> = indices
            .iter()
            .enumerate()
            .filter(|(_, idx)| idx.fragment_ids.contains(&fragment.id))
            .map(|(pos, _)| pos)
            .collect();

        match (candidacy, current.as_mut()) {
            (None, None) => {}
            (None, Some(_)) => bins.extend(current.take()),
            (Some(c), Some(bin)) if bin.indices == covering => bin.push(fragment.clone(), c),
            (Some(c), _) => {
                bins.extend(current.take());
                current = Some(CandidateBin::new(fragment.clone(), c, covering));
            }
        }
    }
    bins.extend(current);

    let max_rows = options.max_rows_per_group.map(|r| r as u64);
    let tasks: Vec<CompactionTask> = bins
        .into_iter()
        .filter(|bin| !bin.is_noop())
        .flat_map(|bin| bin.split_for_size(target, max_rows))
        // Splitting can leave a lone fragment that needs no rewrite
        .filter(|task| {
            task.fragments.len() > 1
                || (materialize && task.fragments.iter().any(|f| f.deleted_fraction() > threshold))
        })
        .collect();
    debug!(target: "tessel::compaction", tasks = tasks.len(), "Planned compaction");
    Ok(CompactionPlan { tasks })
}

/// Input handed to a [`FragmentRewriter`]
#[derive(Debug)]
pub struct RewriteInput<'a> {
    /// Table schema
    pub schema: &'a Schema,
    /// Fragments to rewrite, in manifest order
    pub fragments: &'a [Fragment],
    /// Deletion vector of each fragment, same order
    pub deletions: &'a [DeletionVector],
    /// Most rows any output fragment may hold
    pub max_rows_per_fragment: usize,
}

/// A fragment written by a [`FragmentRewriter`]
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenFragment {
    /// New data files
    pub files: Vec<DataFile>,
    /// Rows written
    pub physical_rows: u64,
}

/// Writes the live rows of a group of fragments into new data files.
///
/// Output rows must be the live input rows in input order, so that row ids
/// can be carried over by position.
pub trait FragmentRewriter: Send + Sync + fmt::Debug {
    /// Rewrite one task
    fn rewrite(&self, input: &RewriteInput<'_>) -> Result<Vec<RewrittenFragment>>;
}

/// Rewriter that fabricates data-file descriptors without moving column data.
///
/// Produces one `{uuid}.lance` file per output fragment holding every field
/// the inputs hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataOnlyRewriter;

impl FragmentRewriter for MetadataOnlyRewriter {
    fn rewrite(&self, input: &RewriteInput<'_>) -> Result<Vec<RewrittenFragment>> {
        let fields: BTreeSet<i32> = input.fragments.iter().flat_map(|f| f.field_ids()).collect();
        let fields: Vec<i32> = fields.into_iter().collect();
        let mut live: u64 = input
            .fragments
            .iter()
            .zip(input.deletions)
            .map(|(f, dv)| f.physical_rows.saturating_sub(dv.len() as u64))
            .sum();
        let chunk = input.max_rows_per_fragment.max(1) as u64;
        let mut out = Vec::new();
        while live > 0 {
            let rows = live.min(chunk);
            out.push(RewrittenFragment {
                files: vec![DataFile::new(
                    format!("{}.lance", Uuid::new_v4()),
                    fields.clone(),
                )],
                physical_rows: rows,
            });
            live -= rows;
        }
        Ok(out)
    }
}

/// Everything `compact_files` commits
#[derive(Debug, Clone)]
pub(crate) struct PreparedRewrite {
    pub groups: Vec<RewriteGroup>,
    pub rewritten_indices: Vec<RewrittenIndex>,
    pub metrics: CompactionMetrics,
}

/// Run every task of `plan` through `rewriter` and build the rewrite groups.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare_rewrite(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    schema: &Schema,
    indices: &[IndexMetadata],
    plan: &CompactionPlan,
    options: &CompactionOptions,
    stable_row_ids: bool,
    inline_row_id_limit: usize,
    rewriter: &dyn FragmentRewriter,
) -> Result<PreparedRewrite> {
    let mut groups = Vec::with_capacity(plan.tasks.len());
    let mut metrics = CompactionMetrics::default();
    let mut touched = BTreeSet::new();

    for task in &plan.tasks {
        let deletions = task
            .fragments
            .iter()
            .map(|f| read_deletion_vector(store, paths, f))
            .collect::<Result<Vec<_>>>()?;
        let written = rewriter.rewrite(&RewriteInput {
            schema,
            fragments: &task.fragments,
            deletions: &deletions,
            max_rows_per_fragment: options.target_rows_per_fragment,
        })?;

        let mut new_fragments: Vec<Fragment> = written
            .into_iter()
            .map(|w| Fragment::staged(w.files, w.physical_rows))
            .collect();
        if stable_row_ids {
            let survivors = surviving_row_ids(store, &task.fragments, &deletions)?;
            let mut consumed = 0usize;
            for fragment in &mut new_fragments {
                let rows = fragment.physical_rows as usize;
                let end = (consumed + rows).min(survivors.len());
                let sequence = RowIdSequence::from_ids(&survivors[consumed..end]);
                fragment.row_id_meta =
                    Some(write_row_ids(store, paths, &sequence, inline_row_id_limit)?);
                consumed = end;
            }
        }

        metrics.fragments_removed += task.fragments.len();
        metrics.fragments_added += new_fragments.len();
        metrics.files_removed += task.fragments.iter().map(|f| f.files.len()).sum::<usize>();
        metrics.files_added += new_fragments.iter().map(|f| f.files.len()).sum::<usize>();
        touched.extend(task.fragments.iter().map(|f| f.id));
        groups.push(RewriteGroup {
            old_fragments: task.fragments.clone(),
            new_fragments,
        });
    }

    let mut rewritten_indices = Vec::new();
    if stable_row_ids {
        for index in indices {
            if !index.fragment_ids.iter().any(|id| touched.contains(id)) {
                continue;
            }
            let new_id = Uuid::new_v4();
            copy_index_files(store, paths, &index.uuid, &new_id)?;
            rewritten_indices.push(RewrittenIndex {
                old_id: index.uuid,
                new_id,
            });
        }
    }

    Ok(PreparedRewrite {
        groups,
        rewritten_indices,
        metrics,
    })
}

fn surviving_row_ids(
    store: &dyn ObjectStore,
    fragments: &[Fragment],
    deletions: &[DeletionVector],
) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    for (fragment, dv) in fragments.iter().zip(deletions) {
        let meta = fragment.row_id_meta.as_ref().ok_or_else(|| {
            tessel_core::Error::corrupt_manifest(
                "compaction",
                format!("fragment {} has no row id sequence", fragment.id),
            )
        })?;
        let sequence = read_row_ids(store, meta)?;
        out.extend(
            sequence
                .iter()
                .enumerate()
                .filter(|(offset, _)| !dv.contains(*offset as u32))
                .map(|(_, id)| id),
        );
    }
    Ok(out)
}

/// Index files are immutable, so remapping starts from a copy under the new uuid
fn copy_index_files(
    store: &dyn ObjectStore,
    paths: &TablePaths,
    from: &Uuid,
    to: &Uuid,
) -> Result<()> {
    let src = format!("{}/", paths.index_dir(from));
    let dst = format!("{}/", paths.index_dir(to));
    for path in store.list(&src)? {
        let rel = &path[src.len()..];
        store.copy(&path, &format!("{}{}", dst, rel))?;
    }
    Ok(())
}
