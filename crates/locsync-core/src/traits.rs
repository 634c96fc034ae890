use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{
    ContentTypeSchema, Entry, EntryBackup, FieldId, LocalizedValue, ReferenceTree, Relationship,
};
use crate::Result;

/// Query against the management API, filtering under the storage locale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    pub content_type: Option<String>,
    pub field_equals: Vec<(FieldId, String)>,
    pub limit: Option<usize>,
}

impl EntryQuery {
    pub fn by_content_type(content_type: impl Into<String>) -> Self {
        EntryQuery {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }

    pub fn field(mut self, field: impl Into<FieldId>, value: impl Into<String>) -> Self {
        self.field_equals.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The slice of the CMS management API this system needs.
#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn get_entry(&self, id: &str) -> Result<Entry>;
    async fn get_content_type(&self, id: &str) -> Result<ContentTypeSchema>;
    async fn find_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>>;
    /// Creates a draft entry and returns it with its assigned id and version.
    async fn create_entry(
        &self,
        content_type: &str,
        fields: BTreeMap<FieldId, LocalizedValue>,
    ) -> Result<Entry>;
    /// Updates an entry, returning it with a bumped version.
    async fn update_entry(&self, entry: &Entry) -> Result<Entry>;
    async fn delete_entry(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslateOptions {
    pub preserve_formatting: bool,
    pub tag_handling: Option<String>,
}

impl TranslateOptions {
    pub fn formatted() -> Self {
        TranslateOptions {
            preserve_formatting: true,
            tag_handling: None,
        }
    }

    pub fn markdown() -> Self {
        TranslateOptions {
            preserve_formatting: true,
            tag_handling: Some("xml".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorUsage {
    pub character_count: u64,
    pub character_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub language: String,
    pub name: String,
}

/// Machine-translation provider. Every call may fail; callers keep the
/// source text on error, so the clone always proceeds.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        options: &TranslateOptions,
    ) -> Result<String>;
    async fn usage(&self) -> Result<TranslatorUsage>;
    async fn source_languages(&self) -> Result<Vec<LanguageInfo>>;
    async fn target_languages(&self) -> Result<Vec<LanguageInfo>>;
}

/// Persistence for (source, target) relationships, their tree snapshots and
/// target backups. Implementations: CMS-backed, file-backed, and a composite
/// that falls back from one to the other.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Upsert. Preserves `created_at` of an existing relationship.
    async fn store(&self, relationship: &Relationship) -> Result<()>;
    async fn get(&self, source_id: &str, target_id: &str) -> Result<Option<Relationship>>;
    /// Merges a tree snapshot into the relationship, leaving other fields.
    async fn store_deep_map(&self, tree: &ReferenceTree) -> Result<()>;
    async fn get_deep_map(&self, source_id: &str, target_id: &str)
        -> Result<Option<ReferenceTree>>;
    async fn store_backup(
        &self,
        source_id: &str,
        target_id: &str,
        backup: &EntryBackup,
    ) -> Result<()>;
    /// Returns true when a relationship existed and was deleted.
    async fn delete(&self, source_id: &str, target_id: &str) -> Result<bool>;
    async fn list_by_source(&self, source_id: &str) -> Result<Vec<Relationship>>;
    async fn list_backups(&self, entry_id: &str) -> Result<Vec<EntryBackup>>;
}

/// Which backend actually answered a composite-store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Primary,
    Fallback,
}

impl std::fmt::Display for StoreBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackendKind::Primary => write!(f, "primary"),
            StoreBackendKind::Fallback => write!(f, "fallback"),
        }
    }
}
