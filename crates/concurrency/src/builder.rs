//! Building the next manifest from a transaction
//!
//! The builder applies an [`Operation`] on top of a base manifest. On retry
//! the coordinator calls it again with the newest manifest as base, which is
//! how a compatible transaction is rebased: fragment ids, row ids and index
//! coverage are always recomputed against the version being replaced.
//!
//! ## Rules
//!
//! - Unassigned fragment ids (0) are allocated from `max_fragment_id + 1`
//! - New physical rows get row ids from `next_row_id` when the table tracks
//!   stable row ids
//! - Referencing a fragment the base does not contain fails with
//!   [`Error::StaleFragmentReference`]
//! - High-water marks (`max_fragment_id`, `next_row_id`) never decrease

use std::collections::BTreeSet;
use tessel_core::{
    apply_feature_flags, can_write, DataFile, Error, Fragment, IndexMetadata, Manifest,
    ManifestNamingScheme, Result, RowIdMeta, RowIdSequence, Schema,
};
use tessel_durability::{DataReplacementGroup, Operation, RewriteGroup, RewrittenIndex, Transaction};
use tracing::warn;
use uuid::Uuid;

/// Applies transactions to a base manifest
#[derive(Debug, Clone)]
pub struct ManifestBuilder<'a> {
    base: Option<&'a Manifest>,
    naming_scheme: ManifestNamingScheme,
    stable_row_ids: bool,
    restore_source: Option<&'a Manifest>,
    blob_dataset_version: Option<u64>,
}

impl<'a> ManifestBuilder<'a> {
    /// Builder over `base`; `None` creates a new table
    pub fn new(base: Option<&'a Manifest>) -> Self {
        ManifestBuilder {
            base,
            naming_scheme: base.map(|m| m.naming_scheme).unwrap_or_default(),
            stable_row_ids: false,
            restore_source: None,
            blob_dataset_version: None,
        }
    }

    /// Naming scheme of a newly created table (builder pattern)
    pub fn with_naming_scheme(mut self, scheme: ManifestNamingScheme) -> Self {
        if self.base.is_none() {
            self.naming_scheme = scheme;
        }
        self
    }

    /// Track stable row ids in a newly created table (builder pattern).
    ///
    /// Existing tables keep whatever their base manifest says.
    pub fn with_stable_row_ids(mut self, enabled: bool) -> Self {
        self.stable_row_ids = enabled;
        self
    }

    /// Manifest to re-publish for a `Restore` (builder pattern)
    pub fn with_restore_source(mut self, source: &'a Manifest) -> Self {
        self.restore_source = Some(source);
        self
    }

    /// Blob sub-table version committed alongside (builder pattern)
    pub fn with_blob_dataset_version(mut self, version: u64) -> Self {
        self.blob_dataset_version = Some(version);
        self
    }

    fn stable(&self) -> bool {
        match self.base {
            Some(base) => base.uses_stable_row_ids(),
            None => self.stable_row_ids,
        }
    }

    /// Produce the manifest for `base.version + 1` (or version 1).
    pub fn build(&self, txn: &Transaction) -> Result<Manifest> {
        let mut manifest = match (self.base, &txn.operation) {
            (Some(base), _) => {
                can_write(base)?;
                base.next_version()
            }
            (None, Operation::Overwrite { schema, .. }) => {
                Manifest::new(schema.clone(), Vec::new(), self.naming_scheme)
            }
            (None, op) => {
                return Err(Error::invalid_input(format!(
                    "{} needs an existing table",
                    op.name()
                )))
            }
        };
        let base_version = self.base.map(|b| b.version).unwrap_or(0);
        let stable = self.stable();
        let mut ctx = BuildContext {
            manifest: &mut manifest,
            base_version,
            stable,
        };

        match &txn.operation {
            Operation::Append { fragments } => ctx.append(fragments)?,
            Operation::Delete {
                updated_fragments,
                deleted_fragment_ids,
                ..
            } => ctx.delete(updated_fragments, deleted_fragment_ids)?,
            Operation::Overwrite {
                schema,
                fragments,
                config_upsert,
            } => {
                ctx.overwrite(schema, fragments)?;
                if let Some(upsert) = config_upsert {
                    ctx.manifest
                        .config
                        .extend(upsert.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Operation::Merge { fragments, schema } => ctx.merge(fragments, schema)?,
            Operation::Project { schema } => ctx.project(schema)?,
            Operation::Update {
                removed_fragment_ids,
                updated_fragments,
                new_fragments,
                ..
            } => ctx.update(
                removed_fragment_ids,
                updated_fragments,
                new_fragments,
                txn.operation.written_fields(),
            )?,
            Operation::Rewrite {
                groups,
                rewritten_indices,
            } => ctx.rewrite(groups, rewritten_indices)?,
            Operation::CreateIndex {
                new_indices,
                removed_indices,
            } => ctx.create_index(new_indices, removed_indices)?,
            Operation::DataReplacement { replacements } => ctx.replace_data(replacements)?,
            Operation::Restore { version } => {
                let source = self
                    .restore_source
                    .filter(|s| s.version == *version)
                    .ok_or_else(|| {
                        Error::internal(format!("manifest for version {} was not loaded", version))
                    })?;
                ctx.restore(source);
            }
            Operation::ReserveFragments { num_fragments } => {
                ctx.manifest.max_fragment_id += u64::from(*num_fragments);
            }
            Operation::UpdateConfig {
                upsert_values,
                delete_keys,
            } => {
                for key in delete_keys {
                    ctx.manifest.config.remove(key);
                }
                ctx.manifest
                    .config
                    .extend(upsert_values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        manifest.tag = txn.tag.clone();
        if let Some(version) = self.blob_dataset_version {
            manifest.blob_dataset_version = Some(version);
        }
        apply_feature_flags(&mut manifest, stable)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

struct BuildContext<'m> {
    manifest: &'m mut Manifest,
    base_version: u64,
    stable: bool,
}

impl BuildContext<'_> {
    fn stale(&self, fragment_id: u64) -> Error {
        Error::StaleFragmentReference {
            fragment_id,
            version: self.base_version,
        }
    }

    fn fragment_mut(&mut self, id: u64) -> Result<&mut Fragment> {
        let version = self.base_version;
        self.manifest
            .fragments
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(Error::StaleFragmentReference {
                fragment_id: id,
                version,
            })
    }

    fn require(&self, id: u64) -> Result<&Fragment> {
        self.manifest.fragment(id).ok_or_else(|| self.stale(id))
    }

    /// Give staged fragments their ids and check their columns
    fn assign(&mut self, staged: &[Fragment]) -> Result<Vec<Fragment>> {
        let mut out: Vec<Fragment> = Vec::with_capacity(staged.len());
        for frag in staged {
            let mut frag = frag.clone();
            if frag.is_unassigned() {
                self.manifest.max_fragment_id += 1;
                frag.id = self.manifest.max_fragment_id;
            } else if frag.id > self.manifest.max_fragment_id {
                return Err(Error::invalid_input(format!(
                    "fragment id {} was never reserved",
                    frag.id
                )));
            } else if self.manifest.fragment(frag.id).is_some()
                || out.iter().any(|f| f.id == frag.id)
            {
                return Err(Error::invalid_input(format!(
                    "fragment id {} is already in use",
                    frag.id
                )));
            }
            check_fields(&self.manifest.schema, &frag)?;
            frag.validate()?;
            out.push(frag);
        }
        Ok(out)
    }

    /// Hand out row ids for freshly written rows
    fn mint_row_ids(&mut self, frag: &mut Fragment) {
        let start = self.manifest.next_row_id;
        self.manifest.next_row_id += frag.physical_rows;
        if self.stable {
            let sequence = RowIdSequence::from_range(start..start + frag.physical_rows);
            frag.row_id_meta = Some(RowIdMeta::Inline(sequence.encode()));
        }
    }

    fn add_new_fragments(&mut self, staged: &[Fragment]) -> Result<()> {
        let mut assigned = self.assign(staged)?;
        for frag in assigned.iter_mut() {
            self.mint_row_ids(frag);
        }
        self.manifest.fragments.extend(assigned);
        Ok(())
    }

    fn remove_fragments(&mut self, ids: &BTreeSet<u64>) -> Result<()> {
        for &id in ids {
            self.require(id)?;
        }
        self.manifest.fragments.retain(|f| !ids.contains(&f.id));
        for index in self.manifest.indices.iter_mut() {
            index.fragment_ids.retain(|id| !ids.contains(id));
        }
        Ok(())
    }

    fn append(&mut self, fragments: &[Fragment]) -> Result<()> {
        self.add_new_fragments(fragments)
    }

    fn delete(&mut self, updated: &[Fragment], deleted_ids: &[u64]) -> Result<()> {
        for frag in updated {
            let slot = self.fragment_mut(frag.id)?;
            slot.deletion_file = frag.deletion_file.clone();
        }
        self.remove_fragments(&deleted_ids.iter().copied().collect())
    }

    fn overwrite(&mut self, schema: &Schema, fragments: &[Fragment]) -> Result<()> {
        schema.validate()?;
        self.manifest.schema = schema.clone();
        self.manifest.fragments.clear();
        self.manifest.indices.clear();
        self.add_new_fragments(fragments)
    }

    fn merge(&mut self, fragments: &[Fragment], schema: &Schema) -> Result<()> {
        schema.validate()?;
        for frag in fragments {
            self.require(frag.id)?;
        }
        let mut merged = Vec::with_capacity(self.manifest.fragments.len());
        for existing in &self.manifest.fragments {
            let incoming = fragments
                .iter()
                .find(|f| f.id == existing.id)
                .ok_or_else(|| self.stale(existing.id))?;
            if incoming.physical_rows != existing.physical_rows {
                return Err(self.stale(existing.id));
            }
            let frag = Fragment {
                files: incoming.files.clone(),
                ..existing.clone()
            };
            check_fields(schema, &frag)?;
            frag.validate()?;
            merged.push(frag);
        }
        self.manifest.fragments = merged;
        self.manifest.schema = schema.clone();
        self.manifest
            .indices
            .retain(|i| i.fields.iter().all(|&f| schema.contains(f)));
        Ok(())
    }

    fn project(&mut self, schema: &Schema) -> Result<()> {
        schema.validate()?;
        let removed = self.manifest.schema.removed_in(schema);
        if !removed.is_empty() {
            for frag in self.manifest.fragments.iter_mut() {
                for file in frag.files.iter_mut() {
                    file.tombstone_fields(&removed);
                }
                frag.files.retain(|f| !f.is_fully_tombstoned());
            }
        }
        self.manifest.schema = schema.clone();
        self.manifest
            .indices
            .retain(|i| i.fields.iter().all(|&f| schema.contains(f)));
        Ok(())
    }

    fn update(
        &mut self,
        removed_ids: &[u64],
        updated: &[Fragment],
        new_fragments: &[Fragment],
        written: Option<BTreeSet<i32>>,
    ) -> Result<()> {
        let schema = self.manifest.schema.clone();
        for frag in updated {
            let slot = self.fragment_mut(frag.id)?;
            let merged = merge_updated(slot, frag, written.as_ref());
            check_fields(&schema, &merged)?;
            *slot = merged;
        }

        let touched: BTreeSet<u64> = updated.iter().map(|f| f.id).collect();
        for index in self.manifest.indices.iter_mut() {
            let stale = match &written {
                None => true,
                Some(fields) => index.covers_any_field(fields),
            };
            if stale {
                index.fragment_ids.retain(|id| !touched.contains(id));
            }
        }

        self.remove_fragments(&removed_ids.iter().copied().collect())?;
        self.add_new_fragments(new_fragments)
    }

    fn rewrite(&mut self, groups: &[RewriteGroup], rewritten: &[RewrittenIndex]) -> Result<()> {
        let mut remaps: Vec<(BTreeSet<u64>, Vec<u64>)> = Vec::with_capacity(groups.len());
        for group in groups {
            if group.old_fragments.is_empty() {
                return Err(Error::invalid_input("rewrite group has no old fragments"));
            }
            let mut live_rows = 0;
            for old in &group.old_fragments {
                live_rows += self.require(old.id)?.current_rows();
            }
            let new_fragments = self.assign(&group.new_fragments)?;
            let new_rows: u64 = new_fragments.iter().map(|f| f.physical_rows).sum();
            if new_rows != live_rows {
                return Err(Error::invalid_input(format!(
                    "rewrite group replaces {} live rows with {}",
                    live_rows, new_rows
                )));
            }
            if self.stable && new_fragments.iter().any(|f| f.row_id_meta.is_none()) {
                return Err(Error::invalid_input(
                    "rewritten fragments must carry the row ids of the rows they hold",
                ));
            }
            let old_ids: BTreeSet<u64> = group.old_fragments.iter().map(|f| f.id).collect();
            let new_ids: Vec<u64> = new_fragments.iter().map(|f| f.id).collect();
            splice_fragments(&mut self.manifest.fragments, &old_ids, new_fragments);
            remaps.push((old_ids, new_ids));
        }

        let remap = |index: &mut IndexMetadata| {
            for (old_ids, new_ids) in &remaps {
                if index.fragment_ids.iter().any(|id| old_ids.contains(id)) {
                    index.fragment_ids.retain(|id| !old_ids.contains(id));
                    index.fragment_ids.extend(new_ids.iter().copied());
                }
            }
        };
        let all_old: BTreeSet<u64> = remaps.iter().flat_map(|(o, _)| o.iter().copied()).collect();
        let stable = self.stable;
        let mut kept = Vec::with_capacity(self.manifest.indices.len());
        for mut index in self.manifest.indices.drain(..) {
            if let Some(r) = rewritten.iter().find(|r| r.old_id == index.uuid) {
                index.uuid = r.new_id;
                remap(&mut index);
                kept.push(index);
            } else if !index.fragment_ids.iter().any(|id| all_old.contains(id)) {
                kept.push(index);
            } else if stable {
                remap(&mut index);
                kept.push(index);
            } else {
                warn!(
                    target: "tessel::commit",
                    index = %index.name,
                    "Dropping index invalidated by rewrite"
                );
            }
        }
        for r in rewritten {
            if !kept.iter().any(|i| i.uuid == r.new_id) {
                warn!(target: "tessel::commit", index = %r.old_id, "Rewritten index no longer exists");
            }
        }
        self.manifest.indices = kept;
        Ok(())
    }

    fn create_index(
        &mut self,
        new_indices: &[IndexMetadata],
        removed_indices: &[IndexMetadata],
    ) -> Result<()> {
        let removed: BTreeSet<Uuid> = removed_indices.iter().map(|i| i.uuid).collect();
        self.manifest.indices.retain(|i| !removed.contains(&i.uuid));
        let live = self.manifest.fragment_ids();
        for index in new_indices {
            if index.fields.is_empty() {
                return Err(Error::invalid_input(format!(
                    "index '{}' covers no fields",
                    index.name
                )));
            }
            if let Some(f) = index.fields.iter().find(|&&f| !self.manifest.schema.contains(f)) {
                return Err(Error::invalid_input(format!(
                    "index '{}' references unknown field {}",
                    index.name, f
                )));
            }
            self.manifest.indices.retain(|i| i.name != index.name);
            let mut index = index.clone();
            index.fragment_ids.retain(|id| live.contains(id));
            self.manifest.indices.push(index);
        }
        Ok(())
    }

    fn replace_data(&mut self, replacements: &[DataReplacementGroup]) -> Result<()> {
        let schema = self.manifest.schema.clone();
        for group in replacements {
            group.new_file.validate()?;
            let new_fields: BTreeSet<i32> = group.new_file.active_fields().collect();
            if new_fields.is_empty() {
                return Err(Error::invalid_input("replacement file holds no fields"));
            }
            if let Some(f) = new_fields.iter().find(|&&f| !schema.contains(f)) {
                return Err(Error::invalid_input(format!(
                    "replacement file references unknown field {}",
                    f
                )));
            }
            let slot = self.fragment_mut(group.fragment_id)?;
            let same = slot
                .files
                .iter()
                .position(|f| f.active_fields().collect::<BTreeSet<_>>() == new_fields);
            match same {
                Some(pos) => slot.files[pos] = group.new_file.clone(),
                None if slot
                    .files
                    .iter()
                    .all(|f| f.active_fields().all(|id| !new_fields.contains(&id))) =>
                {
                    slot.files.push(group.new_file.clone())
                }
                None => {
                    return Err(Error::invalid_input(format!(
                        "replacement for fragment {} partially overlaps an existing file",
                        group.fragment_id
                    )))
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, source: &Manifest) {
        let mut restored = source.next_version();
        restored.version = self.manifest.version;
        restored.max_fragment_id = self.manifest.max_fragment_id.max(source.max_fragment_id);
        restored.next_row_id = self.manifest.next_row_id.max(source.next_row_id);
        restored.naming_scheme = self.manifest.naming_scheme;
        *self.manifest = restored;
    }
}

/// Every live column of `frag` must exist in `schema`
fn check_fields(schema: &Schema, frag: &Fragment) -> Result<()> {
    match frag.field_ids().into_iter().find(|&id| !schema.contains(id)) {
        Some(id) => Err(Error::invalid_input(format!(
            "fragment {} stores field {} which is not in the schema",
            frag.id, id
        ))),
        None => Ok(()),
    }
}

/// Apply an updated fragment onto the current one.
///
/// Files the update did not rewrite are taken from `current`, so a
/// concurrent replacement of other columns survives the rebase. When the
/// update names its `written` fields, only unknown files holding one of
/// them count as rewritten; other unknown files are stale copies from the
/// writer's read version.
fn merge_updated(
    current: &Fragment,
    updated: &Fragment,
    written: Option<&BTreeSet<i32>>,
) -> Fragment {
    let known: BTreeSet<&str> = current.files.iter().map(|f| f.path.as_str()).collect();
    let new_files: Vec<&DataFile> = updated
        .files
        .iter()
        .filter(|f| !known.contains(f.path.as_str()))
        .filter(|f| match written {
            None => true,
            Some(fields) => f.active_fields().any(|id| fields.contains(&id)),
        })
        .collect();
    let rewritten: BTreeSet<i32> = new_files.iter().flat_map(|f| f.active_fields()).collect();

    let mut files: Vec<DataFile> = current
        .files
        .iter()
        .cloned()
        .map(|mut f| {
            f.tombstone_fields(&rewritten);
            f
        })
        .filter(|f| !f.is_fully_tombstoned())
        .collect();
    files.extend(new_files.into_iter().cloned());

    Fragment {
        files,
        deletion_file: updated.deletion_file.clone(),
        ..current.clone()
    }
}

/// Replace `old_ids` with `new` in place when they are contiguous,
/// otherwise drop them and append `new` at the end.
fn splice_fragments(fragments: &mut Vec<Fragment>, old_ids: &BTreeSet<u64>, new: Vec<Fragment>) {
    let positions: Vec<usize> = fragments
        .iter()
        .enumerate()
        .filter(|(_, f)| old_ids.contains(&f.id))
        .map(|(i, _)| i)
        .collect();
    let contiguous = positions.windows(2).all(|w| w[1] == w[0] + 1);
    match (positions.first(), positions.last()) {
        (Some(&first), Some(&last)) if contiguous => {
            fragments.splice(first..=last, new);
        }
        _ => {
            fragments.retain(|f| !old_ids.contains(&f.id));
            fragments.extend(new);
        }
    }
}
