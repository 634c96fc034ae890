//! Primary store: relationships persisted as entries of a dedicated
//! `translationMetadata` content type, one per (source, target) pair.
//! Complex fields are JSON-stringified so they survive the CMS field model.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use locsync_core::{
    CmsClient, Entry, EntryBackup, EntryQuery, FieldId, FieldValue, LocSyncError, LocalizedValue,
    ReferenceTree, Relationship, RelationshipStore, Result,
};

pub const METADATA_CONTENT_TYPE: &str = "translationMetadata";

pub struct CmsStore {
    cms: Arc<dyn CmsClient>,
    storage_locale: String,
}

impl CmsStore {
    pub fn new(cms: Arc<dyn CmsClient>, storage_locale: impl Into<String>) -> Self {
        CmsStore {
            cms,
            storage_locale: storage_locale.into(),
        }
    }

    fn localized_text(&self, text: String) -> LocalizedValue {
        let mut value = LocalizedValue::new();
        value.insert(self.storage_locale.clone(), FieldValue::Text(text));
        value
    }

    fn set_json_field<T: Serialize>(
        &self,
        fields: &mut BTreeMap<FieldId, LocalizedValue>,
        field: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        fields.insert(field.to_string(), self.localized_text(json));
        Ok(())
    }

    fn json_field<T: DeserializeOwned>(entry: &Entry, field: &str) -> Result<Option<T>> {
        match entry.any_text(field) {
            Some(text) if !text.is_empty() => Ok(Some(serde_json::from_str(text)?)),
            _ => Ok(None),
        }
    }

    fn relationship_fields(
        &self,
        relationship: &Relationship,
    ) -> Result<BTreeMap<FieldId, LocalizedValue>> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "relationshipId".to_string(),
            self.localized_text(relationship.relationship_id()),
        );
        fields.insert(
            "sourceEntryId".to_string(),
            self.localized_text(relationship.source_entry_id.clone()),
        );
        fields.insert(
            "targetEntryId".to_string(),
            self.localized_text(relationship.target_entry_id.clone()),
        );
        self.set_json_field(
            &mut fields,
            "translationContext",
            &relationship.translation_context,
        )?;
        self.set_json_field(&mut fields, "metadata", &relationship.metadata)?;
        self.set_json_field(&mut fields, "fieldHashes", &relationship.field_hashes)?;
        self.set_json_field(&mut fields, "cloneMapping", &relationship.clone_mapping)?;
        if let Some(tree) = &relationship.deep_reference_map {
            self.set_json_field(&mut fields, "deepReferenceMap", tree)?;
        }
        if let Some(backup) = &relationship.backup_data {
            self.set_json_field(&mut fields, "backupData", backup)?;
        }
        Ok(fields)
    }

    fn entry_to_relationship(entry: &Entry) -> Result<Relationship> {
        // The shape guard: without stored field hashes this is not a
        // relationship record.
        let field_hashes = Self::json_field(entry, "fieldHashes")?.ok_or_else(|| {
            LocSyncError::Store(format!(
                "entry {} does not hold a relationship record",
                entry.id
            ))
        })?;
        let source_entry_id = entry
            .any_text("sourceEntryId")
            .ok_or_else(|| LocSyncError::Store("relationship entry lacks sourceEntryId".into()))?
            .to_string();
        let target_entry_id = entry
            .any_text("targetEntryId")
            .ok_or_else(|| LocSyncError::Store("relationship entry lacks targetEntryId".into()))?
            .to_string();
        let translation_context = Self::json_field(entry, "translationContext")?
            .ok_or_else(|| LocSyncError::Store("relationship entry lacks translationContext".into()))?;
        let metadata = Self::json_field(entry, "metadata")?
            .ok_or_else(|| LocSyncError::Store("relationship entry lacks metadata".into()))?;
        let clone_mapping = Self::json_field(entry, "cloneMapping")?.unwrap_or_default();

        Ok(Relationship {
            source_entry_id,
            target_entry_id,
            metadata,
            translation_context,
            field_hashes,
            clone_mapping,
            deep_reference_map: Self::json_field(entry, "deepReferenceMap")?,
            backup_data: Self::json_field(entry, "backupData")?,
        })
    }

    async fn find_record(&self, source_id: &str, target_id: &str) -> Result<Option<Entry>> {
        let relationship_id = locsync_core::relationship_id(source_id, target_id);
        let query = EntryQuery::by_content_type(METADATA_CONTENT_TYPE)
            .field("relationshipId", relationship_id)
            .limit(1);
        Ok(self.cms.find_entries(&query).await?.into_iter().next())
    }

    async fn update_record_field<T: Serialize>(
        &self,
        source_id: &str,
        target_id: &str,
        field: &str,
        value: &T,
    ) -> Result<()> {
        let mut record = self.find_record(source_id, target_id).await?.ok_or_else(|| {
            LocSyncError::Store(format!(
                "no relationship record for {source_id} -> {target_id}"
            ))
        })?;
        let json = serde_json::to_string(value)?;
        record
            .fields
            .insert(field.to_string(), self.localized_text(json));
        self.cms.update_entry(&record).await?;
        Ok(())
    }
}

#[async_trait]
impl RelationshipStore for CmsStore {
    async fn store(&self, relationship: &Relationship) -> Result<()> {
        match self
            .find_record(&relationship.source_entry_id, &relationship.target_entry_id)
            .await?
        {
            Some(mut record) => {
                let existing = Self::entry_to_relationship(&record)?;
                let mut merged = relationship.clone();
                merged.metadata.created_at = existing.metadata.created_at;
                if merged.deep_reference_map.is_none() {
                    merged.deep_reference_map = existing.deep_reference_map;
                }
                if merged.backup_data.is_none() {
                    merged.backup_data = existing.backup_data;
                }
                record.fields = self.relationship_fields(&merged)?;
                self.cms.update_entry(&record).await?;
            }
            None => {
                let fields = self.relationship_fields(relationship)?;
                self.cms.create_entry(METADATA_CONTENT_TYPE, fields).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, source_id: &str, target_id: &str) -> Result<Option<Relationship>> {
        match self.find_record(source_id, target_id).await? {
            Some(record) => Ok(Some(Self::entry_to_relationship(&record)?)),
            None => Ok(None),
        }
    }

    async fn store_deep_map(&self, tree: &ReferenceTree) -> Result<()> {
        self.update_record_field(
            &tree.source_entry_id,
            &tree.target_entry_id,
            "deepReferenceMap",
            tree,
        )
        .await
    }

    async fn get_deep_map(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<Option<ReferenceTree>> {
        match self.find_record(source_id, target_id).await? {
            Some(record) => Self::json_field(&record, "deepReferenceMap"),
            None => Ok(None),
        }
    }

    async fn store_backup(
        &self,
        source_id: &str,
        target_id: &str,
        backup: &EntryBackup,
    ) -> Result<()> {
        self.update_record_field(source_id, target_id, "backupData", backup)
            .await
    }

    async fn delete(&self, source_id: &str, target_id: &str) -> Result<bool> {
        match self.find_record(source_id, target_id).await? {
            Some(record) => {
                self.cms.delete_entry(&record.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_by_source(&self, source_id: &str) -> Result<Vec<Relationship>> {
        let query = EntryQuery::by_content_type(METADATA_CONTENT_TYPE)
            .field("sourceEntryId", source_id.to_string());
        let mut relationships = Vec::new();
        for record in self.cms.find_entries(&query).await? {
            match Self::entry_to_relationship(&record) {
                Ok(relationship) => relationships.push(relationship),
                Err(e) => {
                    warn!(entry_id = %record.id, error = %e, "skipping malformed relationship record")
                }
            }
        }
        Ok(relationships)
    }

    async fn list_backups(&self, entry_id: &str) -> Result<Vec<EntryBackup>> {
        let query = EntryQuery::by_content_type(METADATA_CONTENT_TYPE)
            .field("targetEntryId", entry_id.to_string());
        let mut backups = Vec::new();
        for record in self.cms.find_entries(&query).await? {
            if let Some(backup) = Self::json_field::<EntryBackup>(&record, "backupData")? {
                backups.push(backup);
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }
}
