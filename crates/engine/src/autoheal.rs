//! Deferred auto-heal.
//!
//! Fault reports for VNFCs are batched per instance. The first report for
//! an instance starts a timer; later reports only add VNFC ids to the
//! batch. When the timer expires the batch is de-duplicated, ids of VNFCs
//! that no longer exist are dropped, and an automatic HEAL is submitted
//! and run through the coordinator.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vnflcm_model::{HealRequest, OperationParams, OperationRecord};
use vnflcm_storage::LcmStorage;

use crate::config::AutoHealConfig;
use crate::coordinator::Coordinator;
use crate::error::LcmError;

struct PendingHeal {
    vnfc_ids: BTreeSet<String>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    pending: HashMap<String, PendingHeal>,
}

/// Owned registry of per-instance auto-heal timers. Clones share it.
pub struct AutoHealScheduler<S: LcmStorage> {
    coordinator: Coordinator<S>,
    window: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl<S: LcmStorage> Clone for AutoHealScheduler<S> {
    fn clone(&self) -> Self {
        AutoHealScheduler {
            coordinator: self.coordinator.clone(),
            window: self.window,
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: LcmStorage> AutoHealScheduler<S> {
    /// A stopped scheduler. Nothing is accepted until [`start`](Self::start).
    pub fn new(coordinator: Coordinator<S>, config: &AutoHealConfig) -> Self {
        AutoHealScheduler {
            coordinator,
            window: Duration::from_secs(config.timer_secs),
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        self.lock().running = true;
        info!(window_secs = self.window.as_secs(), "auto-heal scheduler started");
    }

    /// Add faulty VNFCs (vnfcInfo ids) of an instance to its batch.
    ///
    /// Returns `false` when the scheduler is stopped and the report was
    /// dropped.
    pub fn report_fault(
        &self,
        instance_id: &str,
        vnfc_ids: impl IntoIterator<Item = String>,
    ) -> bool {
        let mut state = self.lock();
        if !state.running {
            debug!(vnf_instance_id = %instance_id, "auto-heal stopped; fault report dropped");
            return false;
        }
        if let Some(pending) = state.pending.get_mut(instance_id) {
            pending.vnfc_ids.extend(vnfc_ids);
            return true;
        }
        let this = self.clone();
        let id = instance_id.to_string();
        let window = self.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.fire(&id).await;
        });
        state.pending.insert(
            instance_id.to_string(),
            PendingHeal {
                vnfc_ids: vnfc_ids.into_iter().collect(),
                timer,
            },
        );
        debug!(vnf_instance_id = %instance_id, "auto-heal timer armed");
        true
    }

    /// VNFC ids batched for an instance, in sorted order.
    pub fn pending(&self, instance_id: &str) -> Vec<String> {
        self.lock()
            .pending
            .get(instance_id)
            .map(|p| p.vnfc_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Cancel every pending timer and stop accepting reports. Returns the
    /// number of batches discarded.
    pub fn stop(&self) -> usize {
        let mut state = self.lock();
        state.running = false;
        let discarded = state.pending.len();
        for (_, pending) in state.pending.drain() {
            pending.timer.abort();
        }
        info!(discarded, "auto-heal scheduler stopped");
        discarded
    }

    async fn fire(&self, instance_id: &str) {
        let batch = {
            let mut state = self.lock();
            match state.pending.remove(instance_id) {
                Some(pending) => pending.vnfc_ids,
                None => return,
            }
        };
        match self.heal(instance_id, batch).await {
            Ok(Some(record)) => info!(
                vnf_instance_id = %instance_id,
                op_occ_id = %record.id,
                state = %record.operation_state,
                "auto-heal finished"
            ),
            Ok(None) => debug!(
                vnf_instance_id = %instance_id,
                "auto-heal batch had no remaining VNFCs"
            ),
            Err(e) => warn!(vnf_instance_id = %instance_id, error = %e, "auto-heal not run"),
        }
    }

    async fn heal(
        &self,
        instance_id: &str,
        batch: BTreeSet<String>,
    ) -> Result<Option<OperationRecord>, LcmError> {
        let inst = self.coordinator.storage().get_instance(instance_id).await?;
        let Some(info) = inst.instantiated_vnf_info.as_ref() else {
            return Ok(None);
        };
        let targets: Vec<String> = batch
            .into_iter()
            .filter(|id| info.vnfc_info.iter().any(|v| &v.id == id))
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }
        let params = OperationParams::Heal(HealRequest {
            vnfc_instance_id: targets,
            cause: Some("auto-heal".to_string()),
            additional_params: None,
        });
        let record = self.coordinator.submit(instance_id, params, true).await?;
        self.coordinator.execute(&record.id).await.map(Some)
    }
}
