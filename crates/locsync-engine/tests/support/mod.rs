//! In-memory CMS and deterministic translator for engine tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use locsync_core::{
    CmsClient, ContentTypeSchema, Entry, EntryQuery, FieldDef, FieldId, FieldPolicy, FieldType,
    FieldValue, LanguageInfo, Link, LocSyncError, LocalizedValue, RelationshipStore, Result,
    TranslateOptions, Translator, TranslatorUsage,
};
use locsync_engine::{CloneEngine, EngineOptions};
use locsync_store::FileStore;

pub const LOCALE: &str = "en-US-POSIX";

pub struct MockCms {
    entries: Mutex<BTreeMap<String, Entry>>,
    schemas: BTreeMap<String, ContentTypeSchema>,
    next_id: AtomicU64,
}

impl MockCms {
    pub fn new(entries: Vec<Entry>, schemas: Vec<ContentTypeSchema>) -> Self {
        MockCms {
            entries: Mutex::new(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
            schemas: schemas.into_iter().map(|s| (s.id.clone(), s)).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set(&self, entry: Entry) {
        self.entries.lock().unwrap().insert(entry.id.clone(), entry);
    }

    pub fn entry(&self, id: &str) -> Entry {
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("entry {id} not in mock CMS"))
    }

    pub fn has_entry(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl CmsClient for MockCms {
    async fn get_entry(&self, id: &str) -> Result<Entry> {
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| LocSyncError::EntryNotFound(id.to_string()))
    }

    async fn get_content_type(&self, id: &str) -> Result<ContentTypeSchema> {
        self.schemas
            .get(id)
            .cloned()
            .ok_or_else(|| LocSyncError::NotFound(format!("content type {id}")))
    }

    async fn find_entries(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let entries = self.entries.lock().unwrap();
        let mut matches: Vec<Entry> = entries
            .values()
            .filter(|entry| {
                query
                    .content_type
                    .as_ref()
                    .map_or(true, |ct| &entry.content_type == ct)
                    && query
                        .field_equals
                        .iter()
                        .all(|(field, value)| entry.any_text(field) == Some(value.as_str()))
            })
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn create_entry(
        &self,
        content_type: &str,
        fields: BTreeMap<FieldId, LocalizedValue>,
    ) -> Result<Entry> {
        let id = format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = Entry {
            id: id.clone(),
            content_type: content_type.to_string(),
            version: 1,
            updated_at: Utc::now(),
            fields,
        };
        self.entries.lock().unwrap().insert(id, entry.clone());
        Ok(entry)
    }

    async fn update_entry(&self, entry: &Entry) -> Result<Entry> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&entry.id) {
            return Err(LocSyncError::EntryNotFound(entry.id.clone()));
        }
        let mut updated = entry.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        entries.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }
}

/// Deterministic mock: `IT::<text>`. Substrings (placeholders) survive.
pub struct MockTranslator {
    pub calls: AtomicU64,
}

impl MockTranslator {
    pub fn new() -> Self {
        MockTranslator {
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
        _options: &TranslateOptions,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{target_lang}::{text}"))
    }

    async fn usage(&self) -> Result<TranslatorUsage> {
        Ok(TranslatorUsage::default())
    }

    async fn source_languages(&self) -> Result<Vec<LanguageInfo>> {
        Ok(Vec::new())
    }

    async fn target_languages(&self) -> Result<Vec<LanguageInfo>> {
        Ok(Vec::new())
    }
}

/// Every call fails, as during a provider outage.
pub struct BrokenTranslator;

#[async_trait]
impl Translator for BrokenTranslator {
    async fn translate(
        &self,
        _text: &str,
        _source_lang: &str,
        _target_lang: &str,
        _options: &TranslateOptions,
    ) -> Result<String> {
        Err(LocSyncError::Translator("provider outage".into()))
    }

    async fn usage(&self) -> Result<TranslatorUsage> {
        Err(LocSyncError::Translator("provider outage".into()))
    }

    async fn source_languages(&self) -> Result<Vec<LanguageInfo>> {
        Err(LocSyncError::Translator("provider outage".into()))
    }

    async fn target_languages(&self) -> Result<Vec<LanguageInfo>> {
        Err(LocSyncError::Translator("provider outage".into()))
    }
}

pub fn text(value: &str) -> LocalizedValue {
    let mut localized = LocalizedValue::new();
    localized.insert(LOCALE.to_string(), FieldValue::Text(value.to_string()));
    localized
}

pub fn entry_links(ids: &[&str]) -> LocalizedValue {
    let mut localized = LocalizedValue::new();
    localized.insert(
        LOCALE.to_string(),
        FieldValue::List(ids.iter().map(|id| FieldValue::Link(Link::entry(*id))).collect()),
    );
    localized
}

pub fn asset_link(id: &str) -> LocalizedValue {
    let mut localized = LocalizedValue::new();
    localized.insert(LOCALE.to_string(), FieldValue::Link(Link::asset(id)));
    localized
}

pub fn entry(
    id: &str,
    content_type: &str,
    version: u64,
    fields: Vec<(&str, LocalizedValue)>,
) -> Entry {
    Entry {
        id: id.to_string(),
        content_type: content_type.to_string(),
        version,
        updated_at: Utc::now(),
        fields: fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }
}

fn field(id: &str, field_type: FieldType) -> FieldDef {
    FieldDef {
        id: id.to_string(),
        field_type,
        required: false,
        validations: vec![],
    }
}

pub fn schemas() -> Vec<ContentTypeSchema> {
    vec![
        ContentTypeSchema {
            id: "cmsPage".into(),
            fields: vec![
                field("culture", FieldType::Symbol),
                field("title", FieldType::Symbol),
                field("teaserText", FieldType::Text),
                field("slug", FieldType::Symbol),
                field("heroImage", FieldType::Link),
                field("authors", FieldType::Array),
                field("elements", FieldType::Array),
            ],
        },
        ContentTypeSchema {
            id: "scText".into(),
            fields: vec![
                field("content", FieldType::Text),
                field("elements", FieldType::Array),
            ],
        },
        ContentTypeSchema {
            id: "author".into(),
            fields: vec![
                field("name", FieldType::Symbol),
                field("culture", FieldType::Symbol),
            ],
        },
    ]
}

pub fn engine(
    cms: Arc<MockCms>,
    translator: Arc<dyn Translator>,
    store_dir: &TempDir,
) -> CloneEngine {
    let store: Arc<dyn RelationshipStore> = Arc::new(FileStore::new(store_dir.path()));
    CloneEngine::new(
        cms,
        translator,
        store,
        Arc::new(FieldPolicy::default()),
        EngineOptions::default(),
    )
}

pub fn store(store_dir: &TempDir) -> Arc<dyn RelationshipStore> {
    Arc::new(FileStore::new(store_dir.path()))
}
