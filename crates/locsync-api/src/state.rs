use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use locsync_cms::ManagementClient;
use locsync_core::{
    CmsClient, FieldPolicy, RelationshipStore, Result, Settings, Translator,
};
use locsync_engine::{CloneEngine, EngineOptions};
use locsync_store::{CmsStore, CompositeStore, FileStore};
use locsync_translate::DeepLClient;

/// Serializes updates per relationship id: the only cross-request ordering
/// guarantee this layer provides.
#[derive(Clone, Default)]
pub struct SingleFlight {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SingleFlight {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub cms: Arc<ManagementClient>,
    pub translator: Arc<DeepLClient>,
    pub file_store: Arc<FileStore>,
    pub policy: Arc<FieldPolicy>,
    pub single_flight: SingleFlight,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self> {
        let cms = Arc::new(ManagementClient::new(
            &settings.cms,
            settings.tracking.call_timeout,
            settings.tracking.max_read_retries,
        )?);
        let translator = Arc::new(DeepLClient::new(
            &settings.translator,
            settings.tracking.call_timeout,
        )?);
        let file_store = Arc::new(FileStore::new(settings.tracking.dir.clone()));

        Ok(AppState {
            settings: Arc::new(settings),
            cms,
            translator,
            file_store,
            policy: Arc::new(FieldPolicy::default()),
            single_flight: SingleFlight::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// The request's CMS scope, falling back to the configured space and
    /// environment.
    pub fn scoped_cms(
        &self,
        space_id: Option<&str>,
        environment_id: Option<&str>,
    ) -> Arc<ManagementClient> {
        match (space_id, environment_id) {
            (None, None) => self.cms.clone(),
            (space, environment) => Arc::new(self.cms.with_scope(
                space.unwrap_or(&self.settings.cms.space_id),
                environment.unwrap_or(&self.settings.cms.environment_id),
            )),
        }
    }

    /// CMS-backed primary store with the filesystem fallback.
    pub fn store_for(&self, cms: Arc<ManagementClient>) -> Arc<dyn RelationshipStore> {
        let primary = Arc::new(CmsStore::new(
            cms as Arc<dyn CmsClient>,
            self.settings.cms.storage_locale.clone(),
        ));
        Arc::new(CompositeStore::new(primary, self.file_store.clone()))
    }

    /// A fresh engine per request, so the content-type schema cache never
    /// outlives the request that filled it.
    pub fn engine_for(
        &self,
        space_id: Option<&str>,
        environment_id: Option<&str>,
    ) -> (CloneEngine, Arc<dyn RelationshipStore>) {
        let cms = self.scoped_cms(space_id, environment_id);
        let store = self.store_for(cms.clone());
        let engine = CloneEngine::new(
            cms as Arc<dyn CmsClient>,
            self.translator.clone() as Arc<dyn Translator>,
            store.clone(),
            self.policy.clone(),
            EngineOptions {
                storage_locale: self.settings.cms.storage_locale.clone(),
                max_depth: self.settings.tracking.max_depth,
                auto_translate_new_refs: self.settings.tracking.auto_translate_new_refs,
            },
        );
        (engine, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_flight_serializes_same_key() {
        let flight = SingleFlight::default();
        let guard = flight.acquire("a_b").await;

        let contender = flight.clone();
        let handle = tokio::spawn(async move {
            let _guard = contender.acquire("a_b").await;
        });

        // The second acquire must wait until the first guard drops.
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn single_flight_allows_distinct_keys() {
        let flight = SingleFlight::default();
        let _a = flight.acquire("a_b").await;
        let _c = flight.acquire("c_d").await;
    }
}
