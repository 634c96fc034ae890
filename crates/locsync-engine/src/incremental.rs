//! Incremental update and status check. Consumes the tracker's diff to
//! translate only what changed, clones newly added references, and rewrites
//! link fields by re-projecting the source through the updated clone map.
//! The relationship and the tree snapshot are persisted only after the
//! target write succeeds.

use chrono::Utc;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use locsync_core::hash::field_hashes;
use locsync_core::{
    ChangedReference, CloneMap, Entry, EntryBackup, EntryCloneResult, EntryId, FieldChange,
    FieldChangeType, FieldConflict, FieldHashes, FieldId, FieldKind, FieldValue, LocSyncError,
    LocalizedValue, ReferenceDiff, ReferenceNode, ReferenceTree, Relationship,
    RelationshipMetadata, Result, SyncStatus, UpdateOutcome,
};
use locsync_tracker::{diff_trees, TrackedTree};

use crate::clone::{CloneContext, CloneEngine, RunState};

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub reason: Option<String>,
    pub auto_translate_new_references: Option<bool>,
}

impl CloneEngine {
    /// Incremental update. Never lets an error escape: failures come back
    /// as a structured outcome with `fields_updated` empty and the prior
    /// persisted state untouched.
    pub async fn update(
        &self,
        source_id: &str,
        target_id: &str,
        options: &UpdateOptions,
        cancel: &CancellationToken,
    ) -> UpdateOutcome {
        match self.try_update(source_id, target_id, options, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(source_id, target_id, error = %e, "incremental update failed");
                UpdateOutcome::failure(e.to_string())
            }
        }
    }

    async fn try_update(
        &self,
        source_id: &str,
        target_id: &str,
        options: &UpdateOptions,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let relationship = self.require_relationship(source_id, target_id).await?;
        let source = self.cms.get_entry(source_id).await?;
        let target = self.cms.get_entry(target_id).await?;

        let backup = EntryBackup {
            backup_id: Uuid::new_v4().to_string(),
            entry_id: target.id.clone(),
            reason: options
                .reason
                .clone()
                .unwrap_or_else(|| "incremental-update".to_string()),
            created_at: Utc::now(),
            version: target.version,
            fields: target.fields.clone(),
        };

        let tracked = self.tracker.build_tree(source_id, target_id).await?;
        let stored_tree = self.stored_tree(&relationship, source_id, target_id).await;
        let diff = diff_trees(&self.policy, &stored_tree, &tracked)?;

        let fresh_hashes = field_hashes(&source, &self.policy)?;
        let root_changes = basic_field_changes(&relationship.field_hashes, &fresh_hashes, &source);

        if root_changes.is_empty() && diff.is_empty() {
            self.store.store_deep_map(&tracked.tree).await?;
            return Ok(UpdateOutcome {
                success: true,
                up_to_date: true,
                fields_updated: Vec::new(),
                backup_id: None,
                new_version: None,
                message: "already up to date".to_string(),
                failed_references: Vec::new(),
            });
        }

        info!(
            source_id,
            target_id,
            root_changes = root_changes.len(),
            changed_refs = diff.changed.len(),
            new_refs = diff.new.len(),
            removed_refs = diff.removed.len(),
            "applying incremental update"
        );

        self.store.store_backup(source_id, target_id, &backup).await?;

        let ctx = self.context_for(&relationship, cancel)?;
        let mut clone_map = relationship.clone_mapping.clone();
        let mut fields_updated: Vec<String> = Vec::new();
        let mut failed_references: Vec<EntryCloneResult> = Vec::new();
        let mut mutated_target = target.clone();

        // Root-level field changes.
        for change in &root_changes {
            match change.change_type {
                FieldChangeType::Deleted => {
                    if mutated_target.fields.remove(&change.field_name).is_some() {
                        fields_updated.push(change.field_name.clone());
                    }
                }
                _ if change.needs_translation => {
                    let Some(localized) = source.fields.get(&change.field_name) else {
                        continue;
                    };
                    let translated = self
                        .translate_for_kind(
                            &ctx,
                            self.policy
                                .classify(&source.content_type, &change.field_name, localized),
                            localized,
                        )
                        .await;
                    let translated = self.preserve_prefix(&change.field_name, &target, translated);
                    mutated_target.fields.insert(change.field_name.clone(), translated);
                    fields_updated.push(change.field_name.clone());
                }
                _ => {}
            }
        }

        // Changed references: patch mapped target children field by field.
        for changed in &diff.changed {
            if cancel.is_cancelled() {
                return Err(LocSyncError::Cancelled);
            }
            if let Err(e) = self
                .patch_changed_reference(&ctx, &clone_map, &tracked, changed, &mut fields_updated)
                .await
            {
                warn!(ref_id = %changed.id, error = %e, "failed to patch changed reference");
                failed_references.push(EntryCloneResult {
                    source_id: changed.id.clone(),
                    target_id: clone_map.entry_target(&changed.id).cloned(),
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }

        // New references: clone them under the same translation context.
        let auto_translate = options
            .auto_translate_new_references
            .unwrap_or(self.options.auto_translate_new_refs);
        if auto_translate && !diff.new.is_empty() {
            let mut state = RunState {
                clone_map: clone_map.clone(),
                ..RunState::default()
            };
            for new_ref in &diff.new {
                if cancel.is_cancelled() {
                    return Err(LocSyncError::Cancelled);
                }
                if state.clone_map.entry_target(&new_ref.id).is_some() {
                    continue;
                }
                match self.clone_recursive(&ctx, &mut state, new_ref.id.clone()).await {
                    Ok(target_id) => {
                        info!(ref_id = %new_ref.id, clone_id = %target_id, "cloned new reference");
                    }
                    Err(e) => {
                        warn!(ref_id = %new_ref.id, error = %e, "failed to clone new reference");
                        failed_references.push(EntryCloneResult {
                            source_id: new_ref.id.clone(),
                            target_id: None,
                            success: false,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
            clone_map = state.clone_map;
        }

        // Link rewrites: re-project every affected parent field through the
        // updated clone map, so additions appear, removals disappear and
        // order matches the source. Removed refs stay alive on the target.
        let affected = affected_link_fields(&diff);
        for (parent_id, field_id) in affected {
            if parent_id == source_id {
                if let Some(localized) = source.fields.get(&field_id) {
                    let mut rewritten = LocalizedValue::new();
                    for (locale, value) in localized {
                        rewritten
                            .insert(locale.clone(), Self::rewrite_through_map(value, &clone_map));
                    }
                    mutated_target.fields.insert(field_id.clone(), rewritten);
                    if !fields_updated.contains(&field_id) {
                        fields_updated.push(field_id.clone());
                    }
                }
                continue;
            }
            if let Err(e) = self
                .rewrite_nested_parent(&tracked, &clone_map, &parent_id, &field_id)
                .await
            {
                warn!(parent_id = %parent_id, field = %field_id, error = %e, "failed to rewrite nested link field");
                failed_references.push(EntryCloneResult {
                    source_id: parent_id.clone(),
                    target_id: clone_map.entry_target(&parent_id).cloned(),
                    success: false,
                    error: Some(e.to_string()),
                });
            } else {
                fields_updated.push(format!("{parent_id}.{field_id}"));
            }
        }

        // One write against the target; abort before any persistence if it
        // fails, leaving the backup for recovery.
        let new_version = if mutated_target.fields != target.fields {
            let updated = self.cms.update_entry(&mutated_target).await?;
            Some(updated.version)
        } else {
            None
        };

        let now = Utc::now();
        let updated_relationship = Relationship {
            source_entry_id: relationship.source_entry_id.clone(),
            target_entry_id: relationship.target_entry_id.clone(),
            metadata: RelationshipMetadata {
                last_translated_version: source.version,
                created_at: relationship.metadata.created_at,
                last_updated: now,
            },
            translation_context: relationship.translation_context.clone(),
            field_hashes: fresh_hashes,
            clone_mapping: clone_map,
            deep_reference_map: None,
            backup_data: Some(backup.clone()),
        };
        self.store.store(&updated_relationship).await?;
        self.store.store_deep_map(&tracked.tree).await?;

        Ok(UpdateOutcome {
            success: true,
            up_to_date: false,
            fields_updated,
            backup_id: Some(backup.backup_id),
            new_version,
            message: "incremental update applied".to_string(),
            failed_references,
        })
    }

    /// Status check: the read-only half of an update. Refreshes the tree
    /// snapshot on the clean path so the stored tree never goes stale.
    pub async fn status(&self, source_id: &str, target_id: &str) -> Result<SyncStatus> {
        let Some(relationship) = self.store.get(source_id, target_id).await? else {
            return Ok(SyncStatus::no_relationship());
        };
        let source = self.cms.get_entry(source_id).await?;
        let target = self.cms.get_entry(target_id).await?;

        let tracked = self.tracker.build_tree(source_id, target_id).await?;
        let stored_tree = self.stored_tree(&relationship, source_id, target_id).await;
        let diff = diff_trees(&self.policy, &stored_tree, &tracked)?;

        let fresh_hashes = field_hashes(&source, &self.policy)?;
        let changes = basic_field_changes(&relationship.field_hashes, &fresh_hashes, &source);

        let up_to_date = changes.is_empty() && diff.is_empty();
        if up_to_date {
            self.store.store_deep_map(&tracked.tree).await?;
        }

        Ok(SyncStatus {
            has_relationship: true,
            up_to_date,
            changes,
            reference_changes: Some(diff),
            conflicts: self.detect_conflicts(&source, &target),
            metadata: Some(relationship.metadata),
        })
    }

    /// Forced rebuild of the stored tree snapshot.
    pub async fn rebuild_deep_references(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<ReferenceTree> {
        self.require_relationship(source_id, target_id).await?;
        let tracked = self.tracker.build_tree(source_id, target_id).await?;
        self.store.store_deep_map(&tracked.tree).await?;
        Ok(tracked.tree)
    }

    /// Conflict detection between source-driven changes and manual edits on
    /// the target is not implemented; the status surface carries an empty
    /// list until a real detector exists.
    fn detect_conflicts(&self, _source: &Entry, _target: &Entry) -> Vec<FieldConflict> {
        Vec::new()
    }

    async fn require_relationship(&self, source_id: &str, target_id: &str) -> Result<Relationship> {
        self.store.get(source_id, target_id).await?.ok_or_else(|| {
            LocSyncError::Validation(format!(
                "no relationship for {source_id} -> {target_id}; run a clone first"
            ))
        })
    }

    /// The stored snapshot, or an empty tree when none was ever written so
    /// every current reference classifies as new.
    async fn stored_tree(
        &self,
        relationship: &Relationship,
        source_id: &str,
        target_id: &str,
    ) -> ReferenceTree {
        if let Ok(Some(tree)) = self.store.get_deep_map(source_id, target_id).await {
            return tree;
        }
        if let Some(tree) = &relationship.deep_reference_map {
            return tree.clone();
        }
        ReferenceTree {
            source_entry_id: source_id.to_string(),
            target_entry_id: target_id.to_string(),
            max_depth: self.options.max_depth,
            last_scanned: relationship.metadata.last_updated,
            reference_tree: ReferenceNode {
                id: source_id.to_string(),
                version: relationship.metadata.last_translated_version,
                depth: 0,
                parent_id: None,
                parent_field: None,
                content_hash: String::new(),
                last_updated: relationship.metadata.last_updated,
                field_hashes: None,
                children: Vec::new(),
            },
            flattened_refs: Default::default(),
        }
    }

    fn context_for(
        &self,
        relationship: &Relationship,
        cancel: &CancellationToken,
    ) -> Result<CloneContext> {
        let target_locale = self
            .policy
            .culture_map
            .locale_for(&relationship.translation_context.target_language)
            .ok_or_else(|| {
                LocSyncError::Validation(format!(
                    "no locale mapping for target language {}",
                    relationship.translation_context.target_language
                ))
            })?
            .clone();
        Ok(CloneContext {
            translation: relationship.translation_context.clone(),
            target_locale,
            cancel: cancel.clone(),
        })
    }

    async fn translate_for_kind(
        &self,
        ctx: &CloneContext,
        kind: FieldKind,
        localized: &LocalizedValue,
    ) -> LocalizedValue {
        match kind {
            FieldKind::Markdown => self.translate_markdown_value(ctx, localized).await,
            _ => self.translate_text_value(ctx, localized).await,
        }
    }

    /// A prefixed field on the target keeps its prefix across updates.
    fn preserve_prefix(
        &self,
        field_id: &str,
        target: &Entry,
        mut translated: LocalizedValue,
    ) -> LocalizedValue {
        if !self.policy.prefix_applies(field_id) {
            return translated;
        }
        let target_had_prefix = target
            .any_text(field_id)
            .is_some_and(|text| text.starts_with(&self.policy.clone_prefix));
        if !target_had_prefix {
            return translated;
        }
        for value in translated.values_mut() {
            if let FieldValue::Text(text) = value {
                if !text.starts_with(&self.policy.clone_prefix) {
                    *text = format!("{}{}", self.policy.clone_prefix, text);
                }
            }
        }
        translated
    }

    async fn patch_changed_reference(
        &self,
        ctx: &CloneContext,
        clone_map: &CloneMap,
        tracked: &TrackedTree,
        changed: &ChangedReference,
        fields_updated: &mut Vec<String>,
    ) -> Result<()> {
        if changed.field_changes.is_empty() {
            return Ok(());
        }
        let Some(child_target_id) = clone_map.entry_target(&changed.id) else {
            warn!(ref_id = %changed.id, "changed reference has no mapped clone, skipping");
            return Ok(());
        };
        let Some(child_source) = tracked.entries.get(&changed.id) else {
            return Ok(());
        };

        let mut child_target = self.cms.get_entry(child_target_id).await?;
        let mut touched = false;

        for change in &changed.field_changes {
            match change.change_type {
                FieldChangeType::Deleted => {
                    if child_target.fields.remove(&change.field_name).is_some() {
                        touched = true;
                        fields_updated.push(format!("{}.{}", changed.id, change.field_name));
                    }
                }
                _ if change.needs_translation => {
                    let Some(localized) = child_source.fields.get(&change.field_name) else {
                        continue;
                    };
                    let kind = self.policy.classify(
                        &child_source.content_type,
                        &change.field_name,
                        localized,
                    );
                    let translated = self.translate_for_kind(ctx, kind, localized).await;
                    let translated =
                        self.preserve_prefix(&change.field_name, &child_target, translated);
                    child_target.fields.insert(change.field_name.clone(), translated);
                    touched = true;
                    fields_updated.push(format!("{}.{}", changed.id, change.field_name));
                }
                _ => {}
            }
        }

        if touched {
            self.cms.update_entry(&child_target).await?;
        }
        Ok(())
    }

    /// Rewrites the link field of a non-root parent whose reference list
    /// gained or lost members.
    async fn rewrite_nested_parent(
        &self,
        tracked: &TrackedTree,
        clone_map: &CloneMap,
        parent_id: &str,
        field_id: &str,
    ) -> Result<()> {
        let parent_source = match tracked.entries.get(parent_id) {
            Some(entry) => entry.clone(),
            None => self.cms.get_entry(parent_id).await?,
        };
        let Some(parent_target_id) = clone_map.entry_target(parent_id) else {
            return Err(LocSyncError::Validation(format!(
                "parent {parent_id} has no mapped clone"
            )));
        };
        let Some(localized) = parent_source.fields.get(field_id) else {
            return Ok(());
        };

        let mut parent_target = self.cms.get_entry(parent_target_id).await?;
        let mut rewritten = LocalizedValue::new();
        for (locale, value) in localized {
            rewritten.insert(locale.clone(), Self::rewrite_through_map(value, clone_map));
        }
        parent_target.fields.insert(field_id.to_string(), rewritten);
        self.cms.update_entry(&parent_target).await?;
        Ok(())
    }
}

/// Root-level per-field hash diff: added / modified / deleted, over the
/// translatable fields both hash sets cover.
fn basic_field_changes(
    stored: &FieldHashes,
    fresh: &FieldHashes,
    source: &Entry,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for (field_id, fresh_hash) in fresh {
        let change_type = match stored.get(field_id) {
            None => FieldChangeType::Added,
            Some(stored_hash) if stored_hash != fresh_hash => FieldChangeType::Modified,
            Some(_) => continue,
        };
        changes.push(FieldChange {
            field_name: field_id.clone(),
            change_type,
            new_value: source.fields.get(field_id).cloned(),
            is_translatable: true,
            needs_translation: true,
        });
    }
    for field_id in stored.keys() {
        if !fresh.contains_key(field_id) {
            changes.push(FieldChange {
                field_name: field_id.clone(),
                change_type: FieldChangeType::Deleted,
                new_value: None,
                is_translatable: true,
                needs_translation: false,
            });
        }
    }
    changes
}

/// Every (parent, field) pair whose link list changed: the parents of new
/// and removed references, in discovery order, deduplicated.
fn affected_link_fields(diff: &ReferenceDiff) -> Vec<(EntryId, FieldId)> {
    let mut seen: BTreeSet<(EntryId, FieldId)> = BTreeSet::new();
    let mut affected = Vec::new();
    let pairs = diff
        .new
        .iter()
        .map(|r| (r.parent_id.clone(), r.parent_field.clone()))
        .chain(
            diff.removed
                .iter()
                .map(|r| (r.parent_id.clone(), r.parent_field.clone())),
        );
    for (parent_id, parent_field) in pairs {
        let (Some(parent_id), Some(parent_field)) = (parent_id, parent_field) else {
            continue;
        };
        if seen.insert((parent_id.clone(), parent_field.clone())) {
            affected.push((parent_id, parent_field));
        }
    }
    affected
}
