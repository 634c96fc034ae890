//! Three-way diff of a fresh tree against the stored snapshot: changed,
//! new, removed. Output preserves discovery order; a ref reachable over
//! several paths is reported once.

use std::collections::HashSet;

use locsync_core::hash::field_hashes;
use locsync_core::{
    ChangeKind, ChangedReference, FieldChange, FieldChangeType, FieldPolicy, NewReference,
    ReferenceDiff, ReferenceNode, ReferenceTree, RemovedReference, Result,
};

use crate::tree::TrackedTree;

pub fn diff_trees(
    policy: &FieldPolicy,
    stored: &ReferenceTree,
    current: &TrackedTree,
) -> Result<ReferenceDiff> {
    let mut diff = ReferenceDiff::default();
    let mut seen: HashSet<&str> = HashSet::new();

    let mut stack: Vec<&ReferenceNode> = current
        .tree
        .reference_tree
        .children
        .iter()
        .rev()
        .collect();
    while let Some(node) = stack.pop() {
        for child in node.children.iter().rev() {
            stack.push(child);
        }
        if !seen.insert(node.id.as_str()) {
            continue;
        }

        let Some(stored_node) = stored.flattened_refs.get(&node.id) else {
            diff.new.push(NewReference {
                id: node.id.clone(),
                depth: node.depth,
                parent_id: node.parent_id.clone(),
                parent_field: node.parent_field.clone(),
            });
            continue;
        };

        let mut change_kinds = Vec::new();
        if node.version > stored_node.version {
            change_kinds.push(ChangeKind::Version);
        }
        if node.content_hash != stored_node.content_hash {
            change_kinds.push(ChangeKind::Content);
        }
        if change_kinds.is_empty() {
            continue;
        }

        diff.changed.push(ChangedReference {
            id: node.id.clone(),
            depth: node.depth,
            parent_id: node.parent_id.clone(),
            parent_field: node.parent_field.clone(),
            stored_version: stored_node.version,
            current_version: node.version,
            change_kinds,
            field_changes: field_changes_for(policy, stored_node, current, &node.id)?,
        });
    }

    let mut removed_seen: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&ReferenceNode> = stored
        .reference_tree
        .children
        .iter()
        .rev()
        .collect();
    while let Some(node) = stack.pop() {
        for child in node.children.iter().rev() {
            stack.push(child);
        }
        if !removed_seen.insert(node.id.as_str()) {
            continue;
        }
        if !current.tree.flattened_refs.contains_key(&node.id) {
            diff.removed.push(RemovedReference {
                id: node.id.clone(),
                depth: node.depth,
                parent_id: node.parent_id.clone(),
                parent_field: node.parent_field.clone(),
            });
        }
    }

    Ok(diff)
}

/// Per-field change classification for one changed ref, by re-hashing its
/// current fields against the hashes stored with the snapshot node. Older
/// snapshots without per-field hashes degrade to reporting every
/// translatable field as modified.
fn field_changes_for(
    policy: &FieldPolicy,
    stored_node: &ReferenceNode,
    current: &TrackedTree,
    id: &str,
) -> Result<Vec<FieldChange>> {
    let Some(entry) = current.entries.get(id) else {
        return Ok(Vec::new());
    };
    let current_hashes = field_hashes(entry, policy)?;
    let mut changes = Vec::new();

    match &stored_node.field_hashes {
        Some(stored_hashes) => {
            for (field_id, localized) in &entry.fields {
                let Some(current_hash) = current_hashes.get(field_id) else {
                    continue;
                };
                let change_type = match stored_hashes.get(field_id) {
                    None => FieldChangeType::Added,
                    Some(stored_hash) if stored_hash != current_hash => FieldChangeType::Modified,
                    Some(_) => continue,
                };
                changes.push(FieldChange {
                    field_name: field_id.clone(),
                    change_type,
                    new_value: Some(localized.clone()),
                    is_translatable: true,
                    needs_translation: true,
                });
            }
            for field_id in stored_hashes.keys() {
                if !current_hashes.contains_key(field_id) {
                    changes.push(FieldChange {
                        field_name: field_id.clone(),
                        change_type: FieldChangeType::Deleted,
                        new_value: None,
                        is_translatable: true,
                        needs_translation: false,
                    });
                }
            }
        }
        None => {
            for (field_id, localized) in &entry.fields {
                if !current_hashes.contains_key(field_id) {
                    continue;
                }
                changes.push(FieldChange {
                    field_name: field_id.clone(),
                    change_type: FieldChangeType::Modified,
                    new_value: Some(localized.clone()),
                    is_translatable: true,
                    needs_translation: true,
                });
            }
        }
    }

    Ok(changes)
}
