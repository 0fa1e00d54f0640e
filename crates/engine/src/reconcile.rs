//! Periodic reconciliation of stored snapshots with live resources.
//!
//! One pass visits every INSTANTIATED instance in id order:
//!
//! 1. an instance with a FAILED_TEMP record is skipped before the driver is
//!    asked anything, so a pending retry or rollback is never overtaken;
//! 2. the driver's `diff_check` decides whether the live view drifted;
//! 3. the instance lock is taken best-effort, and a busy instance is skipped;
//! 4. the live resource lists replace the stored ones and the instance is
//!    persisted.
//!
//! Per-instance failures are logged and collected; they never stop a pass.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vnflcm_model::{InstantiatedVnfInfo, InstantiationState, OperationState, VnfInstance};
use vnflcm_storage::LcmStorage;

use crate::config::ReconcileConfig;
use crate::coordinator::Coordinator;
use crate::error::LcmError;

/// Outcome of one pass, as instance ids per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub synced: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped_in_progress: Vec<String>,
    pub skipped_failed_temp: Vec<String>,
    pub failed: Vec<String>,
}

enum Outcome {
    Synced,
    Unchanged,
    InProgress,
    FailedTemp,
}

pub struct Reconciler<S: LcmStorage> {
    coordinator: Coordinator<S>,
}

impl<S: LcmStorage> Reconciler<S> {
    pub fn new(coordinator: Coordinator<S>) -> Self {
        Reconciler { coordinator }
    }

    /// Run one pass over every instantiated instance.
    ///
    /// Only a failure to list instances fails the pass itself.
    pub async fn run_pass(&self) -> Result<ReconcileReport, LcmError> {
        let instances = self
            .coordinator
            .storage()
            .list_instances(Some(InstantiationState::Instantiated))
            .await?;
        let mut report = ReconcileReport::default();
        for inst in instances {
            let id = inst.id.clone();
            match self.reconcile_instance(inst).await {
                Ok(Outcome::Synced) => report.synced.push(id),
                Ok(Outcome::Unchanged) => report.unchanged.push(id),
                Ok(Outcome::InProgress) => report.skipped_in_progress.push(id),
                Ok(Outcome::FailedTemp) => report.skipped_failed_temp.push(id),
                Err(e) => {
                    warn!(vnf_instance_id = %id, error = %e, "reconciliation failed");
                    report.failed.push(id);
                }
            }
        }
        debug!(
            synced = report.synced.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile_instance(&self, inst: VnfInstance) -> Result<Outcome, LcmError> {
        let storage = self.coordinator.storage();
        if self.has_failed_temp(&inst.id).await? {
            return Ok(Outcome::FailedTemp);
        }

        let (driver, vim) = self.coordinator.drivers().for_instance(&inst)?;
        if !driver.diff_check(&inst, &vim).await? {
            info!(vnf_instance_id = %inst.id, reason = "no difference", "skipping instance");
            return Ok(Outcome::Unchanged);
        }

        let Some(_guard) = self.coordinator.locks().try_acquire(&inst.id) else {
            info!(
                vnf_instance_id = %inst.id,
                reason = "operation in progress",
                "skipping instance"
            );
            return Ok(Outcome::InProgress);
        };
        // An operation may have failed, or moved the snapshot, between the
        // listing and the lock.
        if self.has_failed_temp(&inst.id).await? {
            return Ok(Outcome::FailedTemp);
        }
        let mut current = storage.get_instance(&inst.id).await?;
        if !current.is_instantiated() {
            return Ok(Outcome::Unchanged);
        }
        let live = driver.sync(&current, &vim).await?;
        match current.instantiated_vnf_info.as_mut() {
            Some(stored) => adopt_live(stored, live),
            None => current.instantiated_vnf_info = Some(live),
        }

        let mut snapshot = storage.begin_snapshot().await?;
        if let Err(e) = storage.put_instance(&mut snapshot, current).await {
            storage.abort_snapshot(snapshot).await?;
            return Err(e.into());
        }
        storage.commit_snapshot(snapshot).await?;
        info!(vnf_instance_id = %inst.id, "snapshot synchronised with live resources");
        Ok(Outcome::Synced)
    }

    async fn has_failed_temp(&self, instance_id: &str) -> Result<bool, LcmError> {
        let pending = self
            .coordinator
            .storage()
            .list_operations(Some(instance_id), Some(OperationState::FailedTemp))
            .await?;
        if pending.is_empty() {
            return Ok(false);
        }
        info!(vnf_instance_id = %instance_id, reason = "failed_temp present", "skipping instance");
        Ok(true)
    }

    /// Run passes every `interval_secs` after `initial_delay_secs`, until
    /// the returned handle is shut down.
    pub fn spawn(self, config: &ReconcileConfig) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let initial_delay = Duration::from_secs(config.initial_delay_secs);
        let period = Duration::from_secs(config.interval_secs.max(1));
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = shutdown_rx.changed() => return,
            }
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_pass().await {
                            warn!(error = %e, "reconciliation pass aborted");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("reconciliation loop stopped");
        });
        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Keep the engine's bookkeeping, take every resource list from `live`.
/// Operator-set VNFC properties survive for VNFCs that still exist.
fn adopt_live(stored: &mut InstantiatedVnfInfo, live: InstantiatedVnfInfo) {
    let mut vnfc_info: Vec<_> = std::mem::take(&mut stored.vnfc_info)
        .into_iter()
        .filter(|v| live.vnfc(&v.vnfc_resource_info_id).is_some())
        .collect();
    for v in live.vnfc_info {
        if !vnfc_info.iter().any(|kept| kept.id == v.id) {
            vnfc_info.push(v);
        }
    }
    stored.vnfc_info = vnfc_info;
    stored.vnfc_resource_info = live.vnfc_resource_info;
    stored.vnf_virtual_link_resource_info = live.vnf_virtual_link_resource_info;
    stored.virtual_storage_resource_info = live.virtual_storage_resource_info;
    stored.ext_virtual_link_info = live.ext_virtual_link_info;
    stored.ext_managed_virtual_link_info = live.ext_managed_virtual_link_info;
    stored.ext_cp_info = live.ext_cp_info;
}

/// Handle of a spawned reconciliation loop.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop. A pass already running finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "reconciliation task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnflcm_model::{ResourceHandle, ScaleInfo, VnfcResourceInfo};

    #[test]
    fn adopting_live_view_keeps_scale_status() {
        let mut stored = InstantiatedVnfInfo::new("simple");
        stored.scale_status = vec![ScaleInfo {
            aspect_id: "worker".into(),
            scale_level: 1,
        }];
        let mut live = InstantiatedVnfInfo::new("simple");
        live.vnfc_resource_info.push(VnfcResourceInfo {
            id: "a".into(),
            vdu_id: "VDU1".into(),
            compute_resource: ResourceHandle::new("server-a"),
            storage_resource_ids: Vec::new(),
            vnfc_cp_info: Vec::new(),
            metadata: None,
            current_vnfd_id: None,
        });
        adopt_live(&mut stored, live);
        assert_eq!(stored.vnfc_resource_info.len(), 1);
        assert_eq!(stored.scale_status[0].scale_level, 1);
    }
}
