use crate::error::PipelineError;
use crate::progress::ProgressTracker;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

/// Per-tenant "run in progress" flags. Manual and scheduled triggers share it.
#[derive(Clone, Default)]
pub struct RunRegistry {
    active: Arc<DashMap<String, Arc<ProgressTracker>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the tenant's run slot or reports that a run is already active.
    pub fn try_start(&self, tenant: &str) -> Result<RunGuard, PipelineError> {
        match self.active.entry(tenant.to_string()) {
            Entry::Occupied(_) => Err(PipelineError::AlreadyRunning {
                tenant: tenant.to_string(),
            }),
            Entry::Vacant(slot) => {
                let tracker = Arc::new(ProgressTracker::new(tenant));
                slot.insert(Arc::clone(&tracker));
                debug!(tenant, run_id = %tracker.run_id(), "run slot claimed");
                Ok(RunGuard {
                    active: Arc::clone(&self.active),
                    tracker,
                })
            }
        }
    }

    pub fn active(&self, tenant: &str) -> Option<Arc<ProgressTracker>> {
        self.active.get(tenant).map(|t| Arc::clone(t.value()))
    }

    pub fn is_running(&self, tenant: &str) -> bool {
        self.active.contains_key(tenant)
    }
}

/// Holds a tenant's run slot; released on drop, including on panic.
pub struct RunGuard {
    active: Arc<DashMap<String, Arc<ProgressTracker>>>,
    tracker: Arc<ProgressTracker>,
}

impl RunGuard {
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn tenant(&self) -> &str {
        self.tracker.tenant()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let run_id = self.tracker.run_id();
        self.active
            .remove_if(self.tracker.tenant(), |_, t| t.run_id() == run_id);
    }
}
