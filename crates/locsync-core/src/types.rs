use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type EntryId = String;
pub type FieldId = String;
pub type LocaleTag = String;

/// A field value keyed by locale tag. The reference deployment stores all
/// content under a single storage locale; per-language content lives in
/// distinct entries.
pub type LocalizedValue = BTreeMap<LocaleTag, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Entry,
    Asset,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Entry => write!(f, "Entry"),
            LinkKind::Asset => write!(f, "Asset"),
        }
    }
}

/// A reference to another entry or asset, carried on the wire as
/// `{"sys": {"type": "Link", "linkType": "Entry", "id": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LinkWire", into = "LinkWire")]
pub struct Link {
    pub link_type: LinkKind,
    pub id: EntryId,
}

impl Link {
    pub fn entry(id: impl Into<EntryId>) -> Self {
        Link {
            link_type: LinkKind::Entry,
            id: id.into(),
        }
    }

    pub fn asset(id: impl Into<EntryId>) -> Self {
        Link {
            link_type: LinkKind::Asset,
            id: id.into(),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.link_type == LinkKind::Entry
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct LinkWire {
    sys: LinkSysWire,
}

#[derive(Clone, Serialize, Deserialize)]
struct LinkSysWire {
    #[serde(rename = "type")]
    kind: LinkTag,
    #[serde(rename = "linkType")]
    link_type: LinkKind,
    id: EntryId,
}

/// Single-variant tag so untagged parsing only accepts `sys.type == "Link"`.
#[derive(Clone, Serialize, Deserialize)]
enum LinkTag {
    Link,
}

impl From<LinkWire> for Link {
    fn from(wire: LinkWire) -> Self {
        Link {
            link_type: wire.sys.link_type,
            id: wire.sys.id,
        }
    }
}

impl From<Link> for LinkWire {
    fn from(link: Link) -> Self {
        LinkWire {
            sys: LinkSysWire {
                kind: LinkTag::Link,
                link_type: link.link_type,
                id: link.id,
            },
        }
    }
}

/// The dynamic shape of a CMS field value. Dates travel as ISO strings,
/// exactly as the CMS serves them, so hashes stay byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Link(Link),
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            FieldValue::Link(l) => Some(l),
            _ => None,
        }
    }

    /// True when the value is a link or a list containing a link, i.e. the
    /// shapes the engine rewrites through the clone map.
    pub fn is_link_bearing(&self) -> bool {
        match self {
            FieldValue::Link(_) => true,
            FieldValue::List(items) => items.iter().any(|v| matches!(v, FieldValue::Link(_))),
            _ => false,
        }
    }

    /// Collects every link reachable in the value, in order.
    pub fn links(&self) -> Vec<&Link> {
        let mut out = Vec::new();
        self.collect_links(&mut out);
        out
    }

    fn collect_links<'a>(&'a self, out: &mut Vec<&'a Link>) {
        match self {
            FieldValue::Link(l) => out.push(l),
            FieldValue::List(items) => {
                for item in items {
                    item.collect_links(out);
                }
            }
            FieldValue::Object(map) => {
                for item in map.values() {
                    item.collect_links(out);
                }
            }
            _ => {}
        }
    }

    /// Rebuilds the value with every link replaced by `f(link)`. Scalars are
    /// returned unchanged.
    pub fn rewrite_links(&self, f: &dyn Fn(&Link) -> Link) -> FieldValue {
        match self {
            FieldValue::Link(l) => FieldValue::Link(f(l)),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|v| v.rewrite_links(f)).collect())
            }
            FieldValue::Object(map) => FieldValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.rewrite_links(f)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// A CMS entry, already unwrapped from its management-API envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub content_type: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub fields: BTreeMap<FieldId, LocalizedValue>,
}

impl Entry {
    pub fn value(&self, field: &str, locale: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(|l| l.get(locale))
    }

    /// The field value under any locale, preferring none in particular.
    /// Useful in a single-storage-locale deployment.
    pub fn any_value(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(|l| l.values().next())
    }

    pub fn any_text(&self, field: &str) -> Option<&str> {
        self.any_value(field).and_then(FieldValue::as_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Symbol,
    Text,
    Integer,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    Link,
    /// Field types this system does not transform (RichText, Location, ...).
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "in", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: FieldId,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<Validation>,
}

impl FieldDef {
    /// First enum symbol from an `in` validation, if any.
    pub fn first_allowed(&self) -> Option<&str> {
        self.validations
            .iter()
            .flat_map(|v| v.allowed.iter())
            .next()
            .map(String::as_str)
    }
}

/// Ordered field list of a content type, as served by the management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTypeSchema {
    pub id: String,
    pub fields: Vec<FieldDef>,
}

impl ContentTypeSchema {
    pub fn field(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Provider language codes for one translation direction, e.g. DE -> IT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationContext {
    pub source_language: String,
    pub target_language: String,
}

/// Source-id to target-id mapping built during a clone. Entry keys are
/// `Entry:<id>`, assets map to themselves under `Asset:<id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloneMap(BTreeMap<String, EntryId>);

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_key(id: &str) -> String {
        format!("Entry:{id}")
    }

    fn asset_key(id: &str) -> String {
        format!("Asset:{id}")
    }

    /// Records a source -> target mapping. Once set, an entry key is never
    /// remapped; returns false when an existing mapping was kept.
    pub fn insert_entry(&mut self, source_id: &str, target_id: &str) -> bool {
        match self.0.entry(Self::entry_key(source_id)) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(target_id.to_string());
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Assets are shared by reference, recorded identity.
    pub fn record_asset(&mut self, id: &str) {
        self.0.entry(Self::asset_key(id)).or_insert_with(|| id.to_string());
    }

    pub fn entry_target(&self, source_id: &str) -> Option<&EntryId> {
        self.0.get(&Self::entry_key(source_id))
    }

    /// Resolves a link to its target id: mapped entries through the map,
    /// assets always to themselves.
    pub fn resolve(&self, link: &Link) -> Option<EntryId> {
        match link.link_type {
            LinkKind::Entry => self.entry_target(&link.id).cloned(),
            LinkKind::Asset => Some(link.id.clone()),
        }
    }

    pub fn merge(&mut self, other: &CloneMap) {
        for (key, value) in &other.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryId)> {
        self.0.iter()
    }
}

/// Per-field sha256 hex digests, computed only over translatable fields.
pub type FieldHashes = BTreeMap<FieldId, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceNode {
    pub id: EntryId,
    pub version: u64,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<FieldId>,
    pub content_hash: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_hashes: Option<FieldHashes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReferenceNode>,
}

impl ReferenceNode {
    /// The node without its subtree, as stored in `flattened_refs`.
    pub fn without_children(&self) -> ReferenceNode {
        ReferenceNode {
            children: Vec::new(),
            ..self.clone()
        }
    }
}

/// A bounded-depth snapshot of the reference graph reachable from a source
/// entry. `flattened_refs` indexes every descendant (the root excluded) by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTree {
    pub source_entry_id: EntryId,
    pub target_entry_id: EntryId,
    pub max_depth: u32,
    pub last_scanned: DateTime<Utc>,
    pub reference_tree: ReferenceNode,
    pub flattened_refs: BTreeMap<EntryId, ReferenceNode>,
}

impl ReferenceTree {
    pub fn node_count(&self) -> usize {
        fn count(node: &ReferenceNode) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        count(&self.reference_tree)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMetadata {
    pub last_translated_version: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Snapshot of a target entry taken before an incremental update touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBackup {
    pub backup_id: String,
    pub entry_id: EntryId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    pub fields: BTreeMap<FieldId, LocalizedValue>,
}

/// Everything persisted per (source, target) pair: enough to drive precise
/// incremental updates without re-cloning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source_entry_id: EntryId,
    pub target_entry_id: EntryId,
    pub metadata: RelationshipMetadata,
    pub translation_context: TranslationContext,
    pub field_hashes: FieldHashes,
    pub clone_mapping: CloneMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_reference_map: Option<ReferenceTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_data: Option<EntryBackup>,
}

impl Relationship {
    pub fn relationship_id(&self) -> String {
        relationship_id(&self.source_entry_id, &self.target_entry_id)
    }
}

pub fn relationship_id(source_id: &str, target_id: &str) -> String {
    format!("{source_id}_{target_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Version,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field_name: FieldId,
    pub change_type: FieldChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<LocalizedValue>,
    pub is_translatable: bool,
    pub needs_translation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedReference {
    pub id: EntryId,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<FieldId>,
    pub stored_version: u64,
    pub current_version: u64,
    pub change_kinds: Vec<ChangeKind>,
    pub field_changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReference {
    pub id: EntryId,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedReference {
    pub id: EntryId,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<FieldId>,
}

/// Three-way classification of a fresh reference tree against the stored
/// snapshot. Lists preserve discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDiff {
    pub changed: Vec<ChangedReference>,
    pub new: Vec<NewReference>,
    pub removed: Vec<RemovedReference>,
}

impl ReferenceDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.new.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of one entry inside a recursive clone run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCloneResult {
    pub source_id: EntryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EntryId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneOutcome {
    pub original_entry_id: EntryId,
    pub cloned_entry_id: EntryId,
    pub target_locale: LocaleTag,
    pub clone_mapping: CloneMap,
    pub results: Vec<EntryCloneResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub success: bool,
    pub up_to_date: bool,
    pub fields_updated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_references: Vec<EntryCloneResult>,
}

impl UpdateOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        UpdateOutcome {
            success: false,
            up_to_date: false,
            fields_updated: Vec::new(),
            backup_id: None,
            new_version: None,
            message: message.into(),
            failed_references: Vec::new(),
        }
    }
}

/// Conflict detection is a stub in this deployment; the type exists so the
/// status surface is stable once a real detector lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field_name: FieldId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub has_relationship: bool,
    pub up_to_date: bool,
    pub changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_changes: Option<ReferenceDiff>,
    pub conflicts: Vec<FieldConflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RelationshipMetadata>,
}

impl SyncStatus {
    pub fn no_relationship() -> Self {
        SyncStatus {
            has_relationship: false,
            up_to_date: false,
            changes: Vec::new(),
            reference_changes: None,
            conflicts: Vec::new(),
            metadata: None,
        }
    }
}
