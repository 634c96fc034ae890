//! Bounded-depth reference tree construction. Depth-first in schema field
//! order, with per-node content hashes over translatable fields, a
//! visited-on-path guard against cycles, and assets skipped entirely.

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use locsync_core::hash::{entry_content_hash, field_hashes};
use locsync_core::{
    CmsClient, ContentTypeSchema, Entry, EntryId, FieldId, FieldPolicy, LinkKind, ReferenceNode,
    ReferenceTree, Result,
};

/// A freshly built tree plus every entry fetched while building it, so the
/// differ can compute field-level changes without refetching.
pub struct TrackedTree {
    pub tree: ReferenceTree,
    pub entries: BTreeMap<EntryId, Entry>,
}

pub struct ReferenceTracker {
    cms: Arc<dyn CmsClient>,
    policy: Arc<FieldPolicy>,
    max_depth: u32,
}

struct BuildContext {
    schemas: HashMap<String, Option<ContentTypeSchema>>,
    entries: BTreeMap<EntryId, Entry>,
    path: HashSet<EntryId>,
}

impl ReferenceTracker {
    pub fn new(cms: Arc<dyn CmsClient>, policy: Arc<FieldPolicy>, max_depth: u32) -> Self {
        ReferenceTracker {
            cms,
            policy,
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub async fn build_tree(&self, source_id: &str, target_id: &str) -> Result<TrackedTree> {
        let root = self.cms.get_entry(source_id).await?;
        let mut ctx = BuildContext {
            schemas: HashMap::new(),
            entries: BTreeMap::new(),
            path: HashSet::new(),
        };
        let root_node = self.build_node(root, 0, None, None, &mut ctx).await?;

        let mut flattened = BTreeMap::new();
        for child in &root_node.children {
            Self::flatten_into(child, &mut flattened);
        }

        Ok(TrackedTree {
            tree: ReferenceTree {
                source_entry_id: source_id.to_string(),
                target_entry_id: target_id.to_string(),
                max_depth: self.max_depth,
                last_scanned: Utc::now(),
                reference_tree: root_node,
                flattened_refs: flattened,
            },
            entries: ctx.entries,
        })
    }

    /// First discovery wins: a ref reachable over several paths keeps the
    /// node recorded where it was seen first.
    fn flatten_into(node: &ReferenceNode, out: &mut BTreeMap<EntryId, ReferenceNode>) {
        out.entry(node.id.clone())
            .or_insert_with(|| node.without_children());
        for child in &node.children {
            Self::flatten_into(child, out);
        }
    }

    async fn schema_for<'a>(
        &self,
        content_type: &str,
        ctx: &'a mut BuildContext,
    ) -> &'a Option<ContentTypeSchema> {
        if !ctx.schemas.contains_key(content_type) {
            let schema = match self.cms.get_content_type(content_type).await {
                Ok(schema) => Some(schema),
                Err(e) => {
                    warn!(content_type, error = %e, "content type fetch failed, using stored field order");
                    None
                }
            };
            ctx.schemas.insert(content_type.to_string(), schema);
        }
        &ctx.schemas[content_type]
    }

    /// Fields in schema order first, then any fields the schema does not
    /// know about, in stored order. Keeps traversal deterministic.
    fn ordered_fields(schema: &Option<ContentTypeSchema>, entry: &Entry) -> Vec<FieldId> {
        let mut ordered = Vec::with_capacity(entry.fields.len());
        if let Some(schema) = schema {
            for def in &schema.fields {
                if entry.fields.contains_key(&def.id) {
                    ordered.push(def.id.clone());
                }
            }
        }
        for field_id in entry.fields.keys() {
            if !ordered.contains(field_id) {
                ordered.push(field_id.clone());
            }
        }
        ordered
    }

    fn build_node<'a>(
        &'a self,
        entry: Entry,
        depth: u32,
        parent_id: Option<EntryId>,
        parent_field: Option<FieldId>,
        ctx: &'a mut BuildContext,
    ) -> BoxFuture<'a, Result<ReferenceNode>> {
        Box::pin(async move {
            let mut node = ReferenceNode {
                id: entry.id.clone(),
                version: entry.version,
                depth,
                parent_id,
                parent_field,
                content_hash: entry_content_hash(&entry, &self.policy)?,
                last_updated: entry.updated_at,
                field_hashes: Some(field_hashes(&entry, &self.policy)?),
                children: Vec::new(),
            };

            ctx.entries.insert(entry.id.clone(), entry.clone());

            if depth >= self.max_depth {
                return Ok(node);
            }

            ctx.path.insert(entry.id.clone());
            let schema = self.schema_for(&entry.content_type, ctx).await.clone();

            for field_id in Self::ordered_fields(&schema, &entry) {
                if !self.policy.is_trackable_link_field(&field_id) {
                    continue;
                }
                let Some(localized) = entry.fields.get(&field_id) else {
                    continue;
                };
                for value in localized.values() {
                    for link in value.links() {
                        if link.link_type != LinkKind::Entry {
                            continue;
                        }
                        if ctx.path.contains(&link.id) {
                            continue;
                        }
                        let child_entry = match self.cms.get_entry(&link.id).await {
                            Ok(child) => child,
                            Err(e) => {
                                warn!(
                                    entry_id = %link.id,
                                    field = %field_id,
                                    error = %e,
                                    "referenced entry fetch failed, skipping subtree"
                                );
                                continue;
                            }
                        };
                        let child = self
                            .build_node(
                                child_entry,
                                depth + 1,
                                Some(entry.id.clone()),
                                Some(field_id.clone()),
                                ctx,
                            )
                            .await?;
                        node.children.push(child);
                    }
                }
            }
            ctx.path.remove(&entry.id);

            Ok(node)
        })
    }
}
