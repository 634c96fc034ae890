//! Primary-then-fallback store. Every call attempts the primary backend
//! first, so a recovered primary becomes authoritative again on its next
//! successful write without any state to reset.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use locsync_core::{
    EntryBackup, ReferenceTree, Relationship, RelationshipStore, Result, StoreBackendKind,
};

pub struct CompositeStore {
    primary: Arc<dyn RelationshipStore>,
    fallback: Arc<dyn RelationshipStore>,
}

impl CompositeStore {
    pub fn new(primary: Arc<dyn RelationshipStore>, fallback: Arc<dyn RelationshipStore>) -> Self {
        CompositeStore { primary, fallback }
    }
}

macro_rules! write_through {
    ($self:ident, $op:literal, $call:ident ( $($arg:expr),* )) => {{
        match $self.primary.$call($($arg),*).await {
            Ok(value) => {
                debug!(op = $op, backend = %StoreBackendKind::Primary, "store write");
                Ok(value)
            }
            Err(e) => {
                warn!(op = $op, error = %e, "primary store failed, using fallback");
                let value = $self.fallback.$call($($arg),*).await?;
                debug!(op = $op, backend = %StoreBackendKind::Fallback, "store write");
                Ok(value)
            }
        }
    }};
}

#[async_trait]
impl RelationshipStore for CompositeStore {
    async fn store(&self, relationship: &Relationship) -> Result<()> {
        write_through!(self, "store", store(relationship))
    }

    async fn get(&self, source_id: &str, target_id: &str) -> Result<Option<Relationship>> {
        match self.primary.get(source_id, target_id).await {
            Ok(Some(relationship)) => {
                debug!(backend = %StoreBackendKind::Primary, "relationship read");
                Ok(Some(relationship))
            }
            Ok(None) => self.fallback.get(source_id, target_id).await,
            Err(e) => {
                warn!(error = %e, "primary store read failed, using fallback");
                self.fallback.get(source_id, target_id).await
            }
        }
    }

    async fn store_deep_map(&self, tree: &ReferenceTree) -> Result<()> {
        write_through!(self, "store_deep_map", store_deep_map(tree))
    }

    async fn get_deep_map(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<Option<ReferenceTree>> {
        match self.primary.get_deep_map(source_id, target_id).await {
            Ok(Some(tree)) => Ok(Some(tree)),
            Ok(None) => self.fallback.get_deep_map(source_id, target_id).await,
            Err(e) => {
                warn!(error = %e, "primary store read failed, using fallback");
                self.fallback.get_deep_map(source_id, target_id).await
            }
        }
    }

    async fn store_backup(
        &self,
        source_id: &str,
        target_id: &str,
        backup: &EntryBackup,
    ) -> Result<()> {
        write_through!(self, "store_backup", store_backup(source_id, target_id, backup))
    }

    async fn delete(&self, source_id: &str, target_id: &str) -> Result<bool> {
        let primary = match self.primary.delete(source_id, target_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "primary store delete failed");
                false
            }
        };
        let fallback = self.fallback.delete(source_id, target_id).await?;
        Ok(primary || fallback)
    }

    async fn list_by_source(&self, source_id: &str) -> Result<Vec<Relationship>> {
        let mut relationships = match self.primary.list_by_source(source_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "primary store list failed, using fallback");
                return self.fallback.list_by_source(source_id).await;
            }
        };

        // The fallback may hold writes taken while the primary was down.
        if let Ok(extra) = self.fallback.list_by_source(source_id).await {
            let known: BTreeSet<String> =
                relationships.iter().map(|r| r.relationship_id()).collect();
            relationships.extend(
                extra
                    .into_iter()
                    .filter(|r| !known.contains(&r.relationship_id())),
            );
        }
        Ok(relationships)
    }

    async fn list_backups(&self, entry_id: &str) -> Result<Vec<EntryBackup>> {
        let mut backups = match self.primary.list_backups(entry_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "primary store list failed, using fallback");
                return self.fallback.list_backups(entry_id).await;
            }
        };
        if let Ok(extra) = self.fallback.list_backups(entry_id).await {
            let known: BTreeSet<String> = backups.iter().map(|b| b.backup_id.clone()).collect();
            backups.extend(extra.into_iter().filter(|b| !known.contains(&b.backup_id)));
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }
}
