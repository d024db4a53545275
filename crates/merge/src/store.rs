use crate::error::{MergeError, StoreError};
use crate::investment::{Investment, InvestmentView};
use crate::normalizer::Identity;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Investment records with single-writer access per record.
///
/// Each record sits behind its own async mutex; writers wait at most
/// `lock_timeout` before giving up with `MergeError::Contention`. When a
/// directory is configured every committed record is written to
/// `<dir>/investments/<id>.json`.
pub struct InvestmentStore {
    records: DashMap<Uuid, Arc<Mutex<Investment>>>,
    identities: DashMap<Uuid, Identity>,
    resolution_locks: DashMap<String, Arc<Mutex<()>>>,
    dir: Option<PathBuf>,
    lock_timeout: Duration,
}

impl InvestmentStore {
    pub fn in_memory(lock_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            identities: DashMap::new(),
            resolution_locks: DashMap::new(),
            dir: None,
            lock_timeout,
        }
    }

    /// Opens a persistent store, loading every record already on disk.
    pub async fn open(dir: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let root = dir.as_ref().join("investments");
        tokio::fs::create_dir_all(&root).await?;

        let store = Self {
            dir: Some(root.clone()),
            ..Self::in_memory(lock_timeout)
        };

        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let investment: Investment = serde_json::from_slice(&bytes)?;
            store.index(investment);
        }

        info!(path = %root.display(), count = store.records.len(), "investment store loaded");
        Ok(store)
    }

    fn index(&self, investment: Investment) {
        self.identities.insert(investment.id, investment.identity());
        self.records.insert(investment.id, Arc::new(Mutex::new(investment)));
    }

    /// Serialises identity resolution and creation within one tenant.
    pub async fn resolution_lock(&self, tenant: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .resolution_locks
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn identities(&self, tenant: &str) -> Vec<Identity> {
        self.identities
            .iter()
            .filter(|entry| entry.tenant == tenant)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Adds a brand-new record and persists it.
    pub async fn insert(&self, investment: Investment) -> Result<(), StoreError> {
        self.persist(&investment).await?;
        self.index(investment);
        Ok(())
    }

    /// Exclusive access to one record, scoped to `tenant`.
    pub async fn lock(&self, tenant: &str, id: Uuid) -> Result<OwnedMutexGuard<Investment>, MergeError> {
        let record = self
            .records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(MergeError::NotFound(id))?;

        let guard = tokio::time::timeout(self.lock_timeout, record.lock_owned())
            .await
            .map_err(|_| MergeError::Contention {
                investment_id: id,
                waited_ms: self.lock_timeout.as_millis() as u64,
            })?;

        if guard.tenant != tenant {
            return Err(MergeError::NotFound(id));
        }
        Ok(guard)
    }

    /// Bumps the version, persists, and refreshes the identity index.
    pub async fn commit(&self, investment: &mut Investment) -> Result<(), StoreError> {
        investment.touch();
        self.persist(investment).await?;
        self.identities.insert(investment.id, investment.identity());
        debug!(investment_id = %investment.id, version = investment.version, "investment committed");
        Ok(())
    }

    pub async fn get(&self, tenant: &str, id: Uuid) -> Result<Investment, MergeError> {
        let guard = self.lock(tenant, id).await?;
        Ok(guard.clone())
    }

    /// Investments of a tenant in creation order.
    pub async fn list(
        &self,
        tenant: &str,
        search: Option<&str>,
        include_archived: bool,
    ) -> Vec<InvestmentView> {
        let records: Vec<Arc<Mutex<Investment>>> =
            self.records.iter().map(|r| r.value().clone()).collect();

        let mut views = Vec::new();
        for record in records {
            let investment = record.lock().await;
            if investment.tenant != tenant || (investment.archived && !include_archived) {
                continue;
            }
            if search.is_some_and(|q| !investment.matches_search(q)) {
                continue;
            }
            views.push(investment.view());
        }
        views.sort_by_key(|v| v.created_at);
        views
    }

    async fn persist(&self, investment: &Investment) -> Result<(), StoreError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(format!("{}.json", investment.id));
        let tmp = dir.join(format!("{}.json.tmp", investment.id));
        let bytes = serde_json::to_vec_pretty(investment)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
