//! Filesystem fallback store. One JSON file per relationship, a sibling
//! file per tree snapshot, and a backups directory of target snapshots.
//! Writes are atomic via rename-on-close.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use locsync_core::{
    EntryBackup, LocSyncError, ReferenceTree, Relationship, RelationshipStore, Result,
};

const DEEP_REFS_SUFFIX: &str = "_deep_refs";

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    fn relationship_path(&self, source_id: &str, target_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}_{target_id}.json"))
    }

    fn tree_path(&self, source_id: &str, target_id: &str) -> PathBuf {
        self.dir
            .join(format!("{source_id}_{target_id}{DEEP_REFS_SUFFIX}.json"))
    }

    fn backups_dir(&self) -> PathBuf {
        self.dir.join("backups")
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.to_path_buf();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("locsync");
        tmp.set_file_name(format!("{file_name}.tmp"));
        fs::write(&tmp, bytes)?;
        // Remove first so the rename also succeeds on Windows.
        if path.exists() {
            fs::remove_file(path)?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json(path: &Path) -> Result<Option<serde_json::Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// A relationship file carries `fieldHashes`; a tree snapshot carries
    /// `referenceTree`. Never hand one shape back as the other.
    fn parse_relationship(value: serde_json::Value) -> Result<Relationship> {
        let object = value
            .as_object()
            .ok_or_else(|| LocSyncError::Store("relationship file is not an object".into()))?;
        if object.contains_key("referenceTree") || !object.contains_key("fieldHashes") {
            return Err(LocSyncError::Store(
                "file does not hold a relationship".into(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    fn parse_tree(value: serde_json::Value) -> Result<ReferenceTree> {
        let object = value
            .as_object()
            .ok_or_else(|| LocSyncError::Store("tree file is not an object".into()))?;
        if !object.contains_key("referenceTree") {
            return Err(LocSyncError::Store("file does not hold a tree snapshot".into()));
        }
        Ok(serde_json::from_value(value)?)
    }

    fn backup_file_name(backup: &EntryBackup) -> String {
        // Colons are invalid in file names on some platforms.
        let stamp = backup.created_at.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        format!("{}_{stamp}.json", backup.entry_id)
    }
}

#[async_trait]
impl RelationshipStore for FileStore {
    async fn store(&self, relationship: &Relationship) -> Result<()> {
        let path =
            self.relationship_path(&relationship.source_entry_id, &relationship.target_entry_id);

        let mut record = relationship.clone();
        // The tree snapshot lives in its own file.
        record.deep_reference_map = None;

        if let Some(existing) = Self::read_json(&path)?.map(Self::parse_relationship).transpose()? {
            record.metadata.created_at = existing.metadata.created_at;
            if record.backup_data.is_none() {
                record.backup_data = existing.backup_data;
            }
        }

        let json = serde_json::to_string_pretty(&record)?;
        Self::write_atomic(&path, json.as_bytes())
    }

    async fn get(&self, source_id: &str, target_id: &str) -> Result<Option<Relationship>> {
        let path = self.relationship_path(source_id, target_id);
        Self::read_json(&path)?.map(Self::parse_relationship).transpose()
    }

    async fn store_deep_map(&self, tree: &ReferenceTree) -> Result<()> {
        let path = self.tree_path(&tree.source_entry_id, &tree.target_entry_id);
        let json = serde_json::to_string_pretty(tree)?;
        Self::write_atomic(&path, json.as_bytes())
    }

    async fn get_deep_map(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<Option<ReferenceTree>> {
        let path = self.tree_path(source_id, target_id);
        Self::read_json(&path)?.map(Self::parse_tree).transpose()
    }

    async fn store_backup(
        &self,
        source_id: &str,
        target_id: &str,
        backup: &EntryBackup,
    ) -> Result<()> {
        let path = self.backups_dir().join(Self::backup_file_name(backup));
        let json = serde_json::to_string_pretty(backup)?;
        Self::write_atomic(&path, json.as_bytes())?;

        // Keep the latest backup on the relationship record as well.
        if let Some(mut relationship) = self.get(source_id, target_id).await? {
            relationship.backup_data = Some(backup.clone());
            self.store(&relationship).await?;
        }
        Ok(())
    }

    async fn delete(&self, source_id: &str, target_id: &str) -> Result<bool> {
        let path = self.relationship_path(source_id, target_id);
        let existed = path.exists();
        if existed {
            fs::remove_file(&path)?;
        }
        let tree_path = self.tree_path(source_id, target_id);
        if tree_path.exists() {
            fs::remove_file(&tree_path)?;
        }
        Ok(existed)
    }

    async fn list_by_source(&self, source_id: &str) -> Result<Vec<Relationship>> {
        let mut relationships = Vec::new();
        if !self.dir.exists() {
            return Ok(relationships);
        }
        let prefix = format!("{source_id}_");
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
                || !stem.starts_with(&prefix)
                || stem.ends_with(DEEP_REFS_SUFFIX)
            {
                continue;
            }
            match Self::read_json(&path)?.map(Self::parse_relationship).transpose() {
                Ok(Some(relationship)) if relationship.source_entry_id == source_id => {
                    relationships.push(relationship)
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable relationship file"),
            }
        }
        relationships.sort_by(|a, b| a.target_entry_id.cmp(&b.target_entry_id));
        Ok(relationships)
    }

    async fn list_backups(&self, entry_id: &str) -> Result<Vec<EntryBackup>> {
        let mut backups = Vec::new();
        let dir = self.backups_dir();
        if !dir.exists() {
            return Ok(backups);
        }
        let prefix = format!("{entry_id}_");
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let data = fs::read_to_string(&path)?;
            match serde_json::from_str::<EntryBackup>(&data) {
                Ok(backup) if backup.entry_id == entry_id => backups.push(backup),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable backup file"),
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use locsync_core::{
        CloneMap, FieldHashes, ReferenceNode, RelationshipMetadata, TranslationContext,
    };
    use tempfile::TempDir;

    fn relationship(source: &str, target: &str) -> Relationship {
        let mut clone_mapping = CloneMap::new();
        clone_mapping.insert_entry(source, target);
        Relationship {
            source_entry_id: source.into(),
            target_entry_id: target.into(),
            metadata: RelationshipMetadata {
                last_translated_version: 3,
                created_at: Utc::now(),
                last_updated: Utc::now(),
            },
            translation_context: TranslationContext {
                source_language: "DE".into(),
                target_language: "IT".into(),
            },
            field_hashes: FieldHashes::new(),
            clone_mapping,
            deep_reference_map: None,
            backup_data: None,
        }
    }

    fn tree(source: &str, target: &str) -> ReferenceTree {
        ReferenceTree {
            source_entry_id: source.into(),
            target_entry_id: target.into(),
            max_depth: 3,
            last_scanned: Utc::now(),
            reference_tree: ReferenceNode {
                id: source.into(),
                version: 3,
                depth: 0,
                parent_id: None,
                parent_field: None,
                content_hash: "abc".into(),
                last_updated: Utc::now(),
                field_hashes: None,
                children: Vec::new(),
            },
            flattened_refs: Default::default(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_relationship() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let rel = relationship("src1", "tgt1");
        store.store(&rel).await.unwrap();

        let loaded = store.get("src1", "tgt1").await.unwrap().unwrap();
        assert_eq!(loaded.relationship_id(), "src1_tgt1");
        assert_eq!(loaded.translation_context.target_language, "IT");
        assert!(store.get("src1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let first = relationship("src1", "tgt1");
        store.store(&first).await.unwrap();

        let mut second = relationship("src1", "tgt1");
        second.metadata.last_translated_version = 9;
        store.store(&second).await.unwrap();

        let loaded = store.get("src1", "tgt1").await.unwrap().unwrap();
        assert_eq!(loaded.metadata.last_translated_version, 9);
        assert_eq!(loaded.metadata.created_at, first.metadata.created_at);
    }

    #[tokio::test]
    async fn refuses_to_read_a_tree_as_a_relationship() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let snapshot = tree("srcX", "tgtX");
        store.store_deep_map(&snapshot).await.unwrap();

        // Force the mixup: copy the tree file over a relationship path.
        let tree_path = dir.path().join("srcX_tgtX_deep_refs.json");
        let rel_path = dir.path().join("srcX_tgtX.json");
        fs::copy(&tree_path, &rel_path).unwrap();

        assert!(store.get("srcX", "tgtX").await.is_err());
        assert!(store.get_deep_map("srcX", "tgtX").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_by_source_skips_tree_snapshots() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.store(&relationship("src1", "tgt1")).await.unwrap();
        store.store(&relationship("src1", "tgt2")).await.unwrap();
        store.store(&relationship("other", "tgt3")).await.unwrap();
        store.store_deep_map(&tree("src1", "tgt1")).await.unwrap();

        let listed = store.list_by_source("src1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].target_entry_id, "tgt1");
        assert_eq!(listed[1].target_entry_id, "tgt2");
    }

    #[tokio::test]
    async fn backups_are_listed_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.store(&relationship("src1", "tgt1")).await.unwrap();

        let older = EntryBackup {
            backup_id: "b1".into(),
            entry_id: "tgt1".into(),
            reason: "incremental-update".into(),
            created_at: Utc::now() - chrono::Duration::minutes(5),
            version: 1,
            fields: Default::default(),
        };
        let newer = EntryBackup {
            backup_id: "b2".into(),
            created_at: Utc::now(),
            ..older.clone()
        };
        store.store_backup("src1", "tgt1", &older).await.unwrap();
        store.store_backup("src1", "tgt1", &newer).await.unwrap();

        let listed = store.list_backups("tgt1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].backup_id, "b2");

        let rel = store.get("src1", "tgt1").await.unwrap().unwrap();
        assert_eq!(rel.backup_data.unwrap().backup_id, "b2");
    }

    #[tokio::test]
    async fn delete_removes_relationship_and_tree() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.store(&relationship("src1", "tgt1")).await.unwrap();
        store.store_deep_map(&tree("src1", "tgt1")).await.unwrap();

        assert!(store.delete("src1", "tgt1").await.unwrap());
        assert!(store.get("src1", "tgt1").await.unwrap().is_none());
        assert!(store.get_deep_map("src1", "tgt1").await.unwrap().is_none());
        assert!(!store.delete("src1", "tgt1").await.unwrap());
    }
}
