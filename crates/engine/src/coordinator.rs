//! The operation coordinator.
//!
//! Drives an operation record through its state machine:
//!
//! ```text
//! STARTING     -> PROCESSING | ROLLED_BACK (grant phase failed)
//! PROCESSING   -> COMPLETED | FAILED_TEMP
//! FAILED_TEMP  -> PROCESSING (retry) | ROLLING_BACK | FAILED (operator)
//! ROLLING_BACK -> ROLLED_BACK | FAILED_TEMP
//! ```
//!
//! Every entry point that acts on a record takes the instance lock
//! blocking, re-reads the record under the lock, and rejects a record in the
//! wrong state with [`LcmError::ConsistencyViolation`]. Failures inside a
//! phase are caught, stored on the record and persisted before the
//! notification goes out; the entry point then returns `Ok` with the
//! failed record.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use vnflcm_model::{
    InstantiatedVnfInfo, InstantiationState, OperationKind, OperationParams, OperationRecord,
    OperationState, ScaleType, VimType, VnfInstance,
};
use vnflcm_storage::{GrantRecord, LcmStorage};

use crate::config::EngineConfig;
use crate::descriptor::{DescriptorProvider, Vnfd};
use crate::diff::diff;
use crate::driver::DriverRegistry;
use crate::error::LcmError;
use crate::grant::GrantBroker;
use crate::lock::{LockError, LockManager};
use crate::modify::{apply_default_properties, apply_modify_info, apply_vnfd_identity, merge_kv};
use crate::notify::{LcmNotification, Notifier};
use crate::scripts::{ScriptHook, ScriptRunner};
use crate::slots::{GrantPhase, OperationSlots, PostGrantHook, ProcessSlot, RollbackSlot};

/// What a persisted transition does with the operation's grant pair.
enum GrantWrite {
    Keep,
    Put(GrantRecord),
    Delete,
}

/// Cancellation requests made through this process, by operation id.
///
/// The coordinator's own transitions write its copy of the record, which
/// can clear a stored flag set in between; this set cannot be cleared that
/// way. Entries go when the record reaches a terminal state.
#[derive(Debug, Clone, Default)]
struct CancelRequests(Arc<Mutex<HashSet<String>>>);

impl CancelRequests {
    fn ids(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, op_occ_id: &str) {
        self.ids().insert(op_occ_id.to_string());
    }

    fn take(&self, op_occ_id: &str) -> bool {
        self.ids().remove(op_occ_id)
    }
}

pub struct Coordinator<S: LcmStorage> {
    storage: Arc<S>,
    descriptors: Arc<dyn DescriptorProvider>,
    drivers: DriverRegistry,
    grants: GrantBroker,
    notifier: Arc<dyn Notifier>,
    locks: LockManager,
    scripts: ScriptRunner,
    cancels: CancelRequests,
    config: Arc<EngineConfig>,
}

impl<S: LcmStorage> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Coordinator {
            storage: Arc::clone(&self.storage),
            descriptors: Arc::clone(&self.descriptors),
            drivers: self.drivers.clone(),
            grants: self.grants.clone(),
            notifier: Arc::clone(&self.notifier),
            locks: self.locks.clone(),
            scripts: self.scripts.clone(),
            cancels: self.cancels.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: LcmStorage> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("drivers", &self.drivers)
            .field("grants", &self.grants)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl<S: LcmStorage> Coordinator<S> {
    /// A coordinator whose grant broker, lock manager and script runner are
    /// built from `config`.
    pub fn new(
        storage: Arc<S>,
        descriptors: Arc<dyn DescriptorProvider>,
        drivers: DriverRegistry,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Result<Self, LcmError> {
        Ok(Coordinator {
            storage,
            descriptors,
            drivers,
            grants: GrantBroker::from_config(&config.grant)?,
            notifier,
            locks: LockManager::new(config.lock.clone()),
            scripts: ScriptRunner::new(config.scripts.clone()),
            cancels: CancelRequests::default(),
            config: Arc::new(config),
        })
    }

    /// Replace the grant broker built from configuration.
    pub fn with_grant_broker(mut self, grants: GrantBroker) -> Self {
        self.grants = grants;
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Submission ───────────────────────────────────────────────────────────

    /// Create a NOT_INSTANTIATED instance of a known descriptor.
    pub async fn create_instance(
        &self,
        vnfd_id: &str,
        instance_id: Option<String>,
        name: Option<String>,
    ) -> Result<VnfInstance, LcmError> {
        let vnfd = self.descriptors.get_vnfd(vnfd_id).await?;
        let id = instance_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.storage.get_instance(&id).await.is_ok() {
            return Err(LcmError::Validation(format!(
                "VNF instance {} already exists",
                id
            )));
        }
        let mut inst = VnfInstance::new(&id, vnfd_id);
        inst.vnf_instance_name = name;
        apply_vnfd_identity(&mut inst, &vnfd);
        apply_default_properties(&mut inst, &vnfd);

        let mut snapshot = self.storage.begin_snapshot().await?;
        if let Err(e) = self.storage.put_instance(&mut snapshot, inst.clone()).await {
            self.storage.abort_snapshot(snapshot).await?;
            return Err(e.into());
        }
        self.storage.commit_snapshot(snapshot).await?;
        info!(vnf_instance_id = %id, vnfd_id, "VNF instance created");
        Ok(inst)
    }

    /// Check preconditions and persist a new operation record.
    ///
    /// The record starts in STARTING, or PROCESSING for modify-info which
    /// has no grant phase. Nothing runs until [`Coordinator::execute`].
    ///
    /// The checks and the insert run under the instance lock, taken
    /// best-effort: a busy instance is rejected with
    /// [`LcmError::OperationInProgress`].
    pub async fn submit(
        &self,
        instance_id: &str,
        params: OperationParams,
        automatic: bool,
    ) -> Result<OperationRecord, LcmError> {
        let Some(_guard) = self.locks.try_acquire(instance_id) else {
            return Err(LcmError::OperationInProgress {
                instance_id: instance_id.to_string(),
            });
        };
        let inst = self.storage.get_instance(instance_id).await?;
        let kind = params.kind();
        let required = match kind {
            OperationKind::Instantiate => Some(InstantiationState::NotInstantiated),
            OperationKind::ModifyInfo => None,
            _ => Some(InstantiationState::Instantiated),
        };
        if let Some(required) = required {
            if inst.instantiation_state != required {
                return Err(LcmError::InvalidInstanceState {
                    instance_id: instance_id.to_string(),
                    state: inst.instantiation_state,
                });
            }
        }
        let unfinished = self
            .storage
            .list_operations(Some(instance_id), None)
            .await?
            .into_iter()
            .any(|op| !op.operation_state.is_terminal());
        if unfinished {
            return Err(LcmError::OperationInProgress {
                instance_id: instance_id.to_string(),
            });
        }

        let state = if kind == OperationKind::ModifyInfo {
            OperationState::Processing
        } else {
            OperationState::Starting
        };
        let mut record = OperationRecord::new(
            Uuid::new_v4().to_string(),
            instance_id,
            params,
            state,
            crate::now_rfc3339(),
        );
        record.is_automatic_invocation = automatic;
        self.persist(&record, None, GrantWrite::Keep).await?;
        info!(
            op_occ_id = %record.id,
            vnf_instance_id = %instance_id,
            operation = %kind,
            automatic,
            "operation submitted"
        );
        if state == OperationState::Processing {
            self.notify(&record).await;
        }
        Ok(record)
    }

    /// Run a submitted record: `start`, or `modify_info` for modify-info.
    pub async fn execute(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let record = self.storage.get_operation(op_occ_id).await?;
        match record.operation() {
            OperationKind::ModifyInfo => self.modify_info(op_occ_id).await,
            _ => self.start(op_occ_id).await,
        }
    }

    pub fn spawn_execute(&self, op_occ_id: &str) -> JoinHandle<Result<OperationRecord, LcmError>> {
        let this = self.clone();
        let id = op_occ_id.to_string();
        tokio::spawn(async move { this.execute(&id).await })
    }

    pub fn spawn_retry(&self, op_occ_id: &str) -> JoinHandle<Result<OperationRecord, LcmError>> {
        let this = self.clone();
        let id = op_occ_id.to_string();
        tokio::spawn(async move { this.retry(&id).await })
    }

    pub fn spawn_rollback(
        &self,
        op_occ_id: &str,
    ) -> JoinHandle<Result<OperationRecord, LcmError>> {
        let this = self.clone();
        let id = op_occ_id.to_string();
        tokio::spawn(async move { this.rollback(&id).await })
    }

    // ── Entry points ─────────────────────────────────────────────────────────

    /// STARTING → grant → PROCESSING → driver → COMPLETED | FAILED_TEMP.
    ///
    /// A failed grant phase ends in ROLLED_BACK without touching
    /// infrastructure.
    pub async fn start(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let instance_id = self.storage.get_operation(op_occ_id).await?.vnf_instance_id;
        let _guard = match self.locks.acquire(&instance_id).await {
            Ok(guard) => guard,
            Err(e) => return self.settle_lock_timeout(op_occ_id, e).await,
        };
        let mut record = self.storage.get_operation(op_occ_id).await?;
        if record.operation_state != OperationState::Starting {
            return Err(violation(&record, "start"));
        }
        self.notify(&record).await;

        if self.take_cancel(&mut record).await? {
            return self.roll_back_unstarted(record, LcmError::Cancelled).await;
        }
        let before = self.storage.get_instance(&instance_id).await?;
        let mut inst = before.clone();
        let slots = OperationSlots::for_operation(&record.operation_params);

        let granted = async {
            let vnfd = self.descriptor_for(&record, &inst).await?;
            let grant = match slots.grant {
                GrantPhase::Negotiate => {
                    let (req, grant) = self.grants.request_grant(&record, &inst, &vnfd).await?;
                    Some(GrantRecord::new(req, grant))
                }
                GrantPhase::Skip => None,
            };
            self.post_grant(&record, &mut inst, grant.as_ref(), slots)?;
            Ok::<_, LcmError>((vnfd, grant))
        }
        .await;
        let (vnfd, grant) = match granted {
            Ok(granted) => granted,
            Err(e) => return self.roll_back_unstarted(record, e).await,
        };

        record.grant_id = grant.as_ref().map(|g| g.grant.id.clone());
        let write = match &grant {
            Some(g) => GrantWrite::Put(g.clone()),
            None => GrantWrite::Keep,
        };
        self.transition(&mut record, OperationState::Processing, None, write)
            .await?;
        self.run_processing(record, before, inst, grant, vnfd).await
    }

    /// FAILED_TEMP → PROCESSING, reusing the stored grant.
    pub async fn retry(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let instance_id = self.storage.get_operation(op_occ_id).await?.vnf_instance_id;
        let _guard = self.locks.acquire(&instance_id).await?;
        let mut record = self.storage.get_operation(op_occ_id).await?;
        if record.operation_state != OperationState::FailedTemp {
            return Err(violation(&record, "retry"));
        }
        let slots = OperationSlots::for_operation(&record.operation_params);
        let grant = self.stored_grant(&record, slots).await?;
        let before = self.storage.get_instance(&instance_id).await?;
        let mut inst = before.clone();

        self.transition(&mut record, OperationState::Processing, None, GrantWrite::Keep)
            .await?;
        let prepared = async {
            let vnfd = self.descriptor_for(&record, &inst).await?;
            self.post_grant(&record, &mut inst, grant.as_ref(), slots)?;
            Ok::<_, LcmError>(vnfd)
        }
        .await;
        match prepared {
            Ok(vnfd) => self.run_processing(record, before, inst, grant, vnfd).await,
            Err(e) => self.fail_temp(record, e).await,
        }
    }

    /// FAILED_TEMP → ROLLING_BACK → ROLLED_BACK | FAILED_TEMP.
    ///
    /// Kinds without a rollback are rejected with
    /// [`LcmError::RollbackNotSupported`] and the record is left untouched.
    pub async fn rollback(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let instance_id = self.storage.get_operation(op_occ_id).await?.vnf_instance_id;
        let _guard = self.locks.acquire(&instance_id).await?;
        let mut record = self.storage.get_operation(op_occ_id).await?;
        if record.operation_state != OperationState::FailedTemp {
            return Err(violation(&record, "rollback"));
        }
        let slots = OperationSlots::for_operation(&record.operation_params);
        if slots.rollback == RollbackSlot::Unsupported {
            warn!(
                op_occ_id = %record.id,
                operation = %record.operation(),
                "rollback requested for an operation without rollback"
            );
            return Err(LcmError::RollbackNotSupported {
                operation: record.operation(),
            });
        }
        let grant = self.stored_grant(&record, slots).await?;
        self.transition(&mut record, OperationState::RollingBack, None, GrantWrite::Keep)
            .await?;
        if slots.rollback == RollbackSlot::NoOp {
            self.transition(&mut record, OperationState::RolledBack, None, GrantWrite::Delete)
                .await?;
            return Ok(record);
        }

        let mut inst = self.storage.get_instance(&instance_id).await?;
        let outcome = async {
            let vnfd = self.descriptor_for(&record, &inst).await?;
            self.post_grant(&record, &mut inst, grant.as_ref(), slots)?;
            let grant = grant.as_ref().ok_or_else(|| missing_grant(&record))?;
            let flavour = flavour_for(&record, &inst);
            let (greq, g) = (Some(&grant.grant_request), Some(&grant.grant));
            let params = &record.operation_params;
            let flavour = flavour.as_deref();
            self.scripts
                .run(ScriptHook::RollbackStart, params, flavour, &vnfd, &mut inst, greq, g)
                .await?;
            self.run_driver_rollback(params, &mut inst, grant, &vnfd)
                .await?;
            self.scripts
                .run(ScriptHook::RollbackEnd, params, flavour, &vnfd, &mut inst, greq, g)
                .await?;
            Ok::<_, LcmError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                let persisted = OperationSlots::rollback_persists_instance(&record.operation_params)
                    .then_some(&inst);
                self.transition(
                    &mut record,
                    OperationState::RolledBack,
                    persisted,
                    GrantWrite::Delete,
                )
                .await?;
                Ok(record)
            }
            Err(e) => self.fail_temp(record, e).await,
        }
    }

    /// Run a modify-info record already in PROCESSING.
    pub async fn modify_info(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let instance_id = self.storage.get_operation(op_occ_id).await?.vnf_instance_id;
        let _guard = match self.locks.acquire(&instance_id).await {
            Ok(guard) => guard,
            Err(e) => return self.settle_lock_timeout(op_occ_id, e).await,
        };
        let record = self.storage.get_operation(op_occ_id).await?;
        if record.operation_state != OperationState::Processing
            || record.operation() != OperationKind::ModifyInfo
        {
            return Err(violation(&record, "modify"));
        }
        let before = self.storage.get_instance(&instance_id).await?;
        let inst = before.clone();
        match self.descriptor_for(&record, &inst).await {
            Ok(vnfd) => self.run_processing(record, before, inst, None, vnfd).await,
            Err(e) => self.fail_temp(record, e).await,
        }
    }

    /// Operator decision: FAILED_TEMP → FAILED. The grant pair is dropped.
    pub async fn fail(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        let instance_id = self.storage.get_operation(op_occ_id).await?.vnf_instance_id;
        let _guard = self.locks.acquire(&instance_id).await?;
        let mut record = self.storage.get_operation(op_occ_id).await?;
        if record.operation_state != OperationState::FailedTemp {
            return Err(violation(&record, "fail"));
        }
        self.transition(&mut record, OperationState::Failed, None, GrantWrite::Delete)
            .await?;
        Ok(record)
    }

    /// Flag a STARTING or PROCESSING record for cancellation.
    ///
    /// The running coordinator checks the flag before its next phase. A
    /// driver call already in flight is not interrupted. Only the flag is
    /// written, and only while the stored record is still running, so a
    /// phase that settles concurrently is never undone.
    pub async fn cancel(&self, op_occ_id: &str) -> Result<OperationRecord, LcmError> {
        self.cancels.insert(op_occ_id);
        let record = match self.storage.mark_cancel_pending(op_occ_id).await {
            Ok(record) => record,
            Err(e) => {
                self.cancels.take(op_occ_id);
                return Err(e.into());
            }
        };
        if !matches!(
            record.operation_state,
            OperationState::Starting | OperationState::Processing
        ) {
            self.cancels.take(op_occ_id);
            return Err(violation(&record, "cancel"));
        }
        info!(op_occ_id = %record.id, "cancellation requested");
        Ok(record)
    }

    /// Advance every record left mid-flight by a previous process.
    ///
    /// STARTING → ROLLED_BACK, PROCESSING and ROLLING_BACK → FAILED_TEMP,
    /// each with an "interrupted" error. Runs without locks: it must finish
    /// before any coordinator entry point is used.
    pub async fn recover(&self) -> Result<Vec<OperationRecord>, LcmError> {
        let mut recovered = Vec::new();
        for (from, to) in [
            (OperationState::Starting, OperationState::RolledBack),
            (OperationState::Processing, OperationState::FailedTemp),
            (OperationState::RollingBack, OperationState::FailedTemp),
        ] {
            for mut record in self.storage.list_operations(None, Some(from)).await? {
                warn!(
                    op_occ_id = %record.id,
                    vnf_instance_id = %record.vnf_instance_id,
                    from = %from,
                    to = %to,
                    "recovering interrupted operation"
                );
                record.error = Some(LcmError::Interrupted.to_problem_details());
                self.transition(&mut record, to, None, GrantWrite::Keep).await?;
                recovered.push(record);
            }
        }
        Ok(recovered)
    }

    // ── Phases ───────────────────────────────────────────────────────────────

    async fn run_processing(
        &self,
        mut record: OperationRecord,
        before: VnfInstance,
        mut inst: VnfInstance,
        grant: Option<GrantRecord>,
        vnfd: Vnfd,
    ) -> Result<OperationRecord, LcmError> {
        if self.take_cancel(&mut record).await? {
            return self.fail_temp(record, LcmError::Cancelled).await;
        }
        let outcome = async {
            self.process(&record, &mut inst, grant.as_ref(), &vnfd)
                .await?;
            self.bookkeeping(&record, &before, &mut inst, &vnfd)
        }
        .await;
        if let Err(e) = outcome {
            return self.fail_temp(record, e).await;
        }

        let changes = diff(record.operation(), &before, &inst);
        record.resource_changes = changes.resource_changes;
        record.changed_info = changes.changed_info;
        record.changed_ext_connectivity = changes.changed_ext_connectivity;
        record.error = None;
        self.transition(&mut record, OperationState::Completed, Some(&inst), GrantWrite::Delete)
            .await?;
        Ok(record)
    }

    /// Scripts around the process slot.
    async fn process(
        &self,
        record: &OperationRecord,
        inst: &mut VnfInstance,
        grant: Option<&GrantRecord>,
        vnfd: &Vnfd,
    ) -> Result<(), LcmError> {
        let slots = OperationSlots::for_operation(&record.operation_params);
        let params = &record.operation_params;
        let flavour = flavour_for(record, inst);
        let greq = grant.map(|g| &g.grant_request);
        let g = grant.map(|g| &g.grant);

        self.scripts
            .run(ScriptHook::Start, params, flavour.as_deref(), vnfd, inst, greq, g)
            .await?;
        match slots.process {
            ProcessSlot::Driver => {
                let grant = grant.ok_or_else(|| missing_grant(record))?;
                self.run_driver(params, inst, grant, vnfd).await?;
            }
            ProcessSlot::EngineLocal => self.apply_local(params, inst).await?,
        }
        self.scripts
            .run(ScriptHook::End, params, flavour.as_deref(), vnfd, inst, greq, g)
            .await?;
        Ok(())
    }

    async fn run_driver(
        &self,
        params: &OperationParams,
        inst: &mut VnfInstance,
        grant: &GrantRecord,
        vnfd: &Vnfd,
    ) -> Result<(), LcmError> {
        let (driver, vim) = self.drivers.for_instance(inst)?;
        let (greq, g) = (&grant.grant_request, &grant.grant);
        info!(
            vnf_instance_id = %inst.id,
            operation = %params.kind(),
            vim_type = %vim.vim_type,
            "invoking infrastructure driver"
        );
        match params {
            OperationParams::Instantiate(r) => driver.instantiate(r, inst, greq, g, vnfd).await?,
            OperationParams::Scale(r) => driver.scale(r, inst, greq, g, vnfd).await?,
            OperationParams::Heal(r) => driver.heal(r, inst, greq, g, vnfd).await?,
            OperationParams::Terminate(r) => driver.terminate(r, inst, greq, g, vnfd).await?,
            OperationParams::ChangeExtConn(r) => {
                driver.change_ext_conn(r, inst, greq, g, vnfd).await?
            }
            OperationParams::ChangeVnfpkg(r) => {
                driver.change_vnfpkg(r, inst, greq, g, vnfd).await?
            }
            OperationParams::ModifyInfo(_) => {
                return Err(LcmError::Validation(
                    "modify-info is not a driver operation".to_string(),
                ))
            }
        }
        Ok(())
    }

    async fn run_driver_rollback(
        &self,
        params: &OperationParams,
        inst: &mut VnfInstance,
        grant: &GrantRecord,
        vnfd: &Vnfd,
    ) -> Result<(), LcmError> {
        let (driver, _) = self.drivers.for_instance(inst)?;
        let (greq, g) = (&grant.grant_request, &grant.grant);
        match params {
            OperationParams::Instantiate(r) => {
                driver.instantiate_rollback(r, inst, greq, g, vnfd).await?
            }
            OperationParams::Scale(r) => driver.scale_rollback(r, inst, greq, g, vnfd).await?,
            OperationParams::ChangeExtConn(r) => {
                driver.change_ext_conn_rollback(r, inst, greq, g, vnfd).await?
            }
            OperationParams::ChangeVnfpkg(r) => {
                driver.change_vnfpkg_rollback(r, inst, greq, g, vnfd).await?
            }
            OperationParams::Heal(_)
            | OperationParams::Terminate(_)
            | OperationParams::ModifyInfo(_) => {
                return Err(LcmError::RollbackNotSupported {
                    operation: params.kind(),
                })
            }
        }
        Ok(())
    }

    async fn apply_local(
        &self,
        params: &OperationParams,
        inst: &mut VnfInstance,
    ) -> Result<(), LcmError> {
        let OperationParams::ModifyInfo(req) = params else {
            return Err(LcmError::Validation(format!(
                "{} is not an engine-local operation",
                params.kind()
            )));
        };
        let new_vnfd = match &req.vnfd_id {
            Some(id) if *id != inst.vnfd_id => Some(self.descriptors.get_vnfd(id).await?),
            _ => None,
        };
        apply_modify_info(inst, req, new_vnfd.as_ref())
    }

    /// Snapshot bookkeeping after a successful process phase.
    fn bookkeeping(
        &self,
        record: &OperationRecord,
        before: &VnfInstance,
        inst: &mut VnfInstance,
        vnfd: &Vnfd,
    ) -> Result<(), LcmError> {
        match &record.operation_params {
            OperationParams::Instantiate(req) => {
                let flavour = vnfd.flavour(&req.flavour_id)?;
                let level = flavour.resolve_level(req.instantiation_level_id.as_deref())?;
                inst.instantiation_state = InstantiationState::Instantiated;
                let info = inst
                    .instantiated_vnf_info
                    .get_or_insert_with(|| InstantiatedVnfInfo::new(&req.flavour_id));
                info.flavour_id = req.flavour_id.clone();
                info.scale_status = flavour.scale_status(level.as_deref());
                info.max_scale_levels = flavour.max_scale_levels();
                info.localization_language = req.localization_language.clone();
                merge_optional(
                    &mut inst.vnf_configurable_properties,
                    &req.vnf_configurable_properties,
                );
                merge_optional(&mut inst.extensions, &req.extensions);
            }
            OperationParams::Terminate(_) => {
                inst.instantiation_state = InstantiationState::NotInstantiated;
                inst.instantiated_vnf_info = None;
                inst.vim_connection_info.clear();
            }
            OperationParams::Scale(req) => {
                keep_saved_status(before, inst);
                let info = inst.instantiated_vnf_info.as_mut().ok_or_else(|| {
                    LcmError::Validation(format!("VNF instance {} has no snapshot", before.id))
                })?;
                match info
                    .scale_status
                    .iter_mut()
                    .find(|s| s.aspect_id == req.aspect_id)
                {
                    Some(status) => {
                        status.scale_level = match req.scale_type {
                            ScaleType::ScaleOut => status.scale_level + req.number_of_steps,
                            ScaleType::ScaleIn => {
                                status.scale_level.saturating_sub(req.number_of_steps)
                            }
                        };
                    }
                    None => warn!(
                        vnf_instance_id = %inst.id,
                        aspect_id = %req.aspect_id,
                        "scaled aspect has no scale status entry"
                    ),
                }
            }
            OperationParams::ChangeVnfpkg(req) => {
                keep_saved_status(before, inst);
                apply_vnfd_identity(inst, vnfd);
                merge_optional(
                    &mut inst.vnf_configurable_properties,
                    &req.vnf_configurable_properties,
                );
                merge_optional(&mut inst.extensions, &req.extensions);
                for (id, vim) in &req.vim_connection_info {
                    inst.vim_connection_info.insert(id.clone(), vim.clone());
                }
            }
            OperationParams::ChangeExtConn(req) => {
                keep_saved_status(before, inst);
                for (id, vim) in &req.vim_connection_info {
                    inst.vim_connection_info.insert(id.clone(), vim.clone());
                }
            }
            OperationParams::Heal(_) => keep_saved_status(before, inst),
            OperationParams::ModifyInfo(_) => {}
        }
        Ok(())
    }

    /// Instantiate's VIM selection. Every other kind passes through.
    fn post_grant(
        &self,
        record: &OperationRecord,
        inst: &mut VnfInstance,
        grant: Option<&GrantRecord>,
        slots: OperationSlots,
    ) -> Result<(), LcmError> {
        if slots.post_grant == PostGrantHook::None {
            return Ok(());
        }
        let OperationParams::Instantiate(req) = &record.operation_params else {
            return Ok(());
        };
        let mut vims = req.vim_connection_info.clone();
        if let Some(grant) = grant {
            for (id, vim) in &grant.grant.vim_connection_info {
                vims.insert(id.clone(), vim.clone());
            }
        }
        if vims.is_empty() {
            match &self.config.default_vim {
                Some(default) => {
                    vims.insert("default".to_string(), default.clone());
                }
                None => {
                    return Err(LcmError::Validation(
                        "no VIM connection info in the request, the grant or the configuration"
                            .to_string(),
                    ))
                }
            }
        }
        inst.vim_connection_info.extend(vims);

        if record.operation_state == OperationState::Starting {
            check_vim_params(inst, req.additional_params.as_ref())?;
        }
        Ok(())
    }

    async fn descriptor_for(
        &self,
        record: &OperationRecord,
        inst: &VnfInstance,
    ) -> Result<Vnfd, LcmError> {
        let vnfd_id = match &record.operation_params {
            OperationParams::ChangeVnfpkg(req) => req.vnfd_id.as_str(),
            _ => inst.vnfd_id.as_str(),
        };
        Ok(self.descriptors.get_vnfd(vnfd_id).await?)
    }

    async fn stored_grant(
        &self,
        record: &OperationRecord,
        slots: OperationSlots,
    ) -> Result<Option<GrantRecord>, LcmError> {
        match slots.grant {
            GrantPhase::Negotiate => Ok(Some(self.storage.get_grant(&record.id).await?)),
            GrantPhase::Skip => Ok(None),
        }
    }

    /// Consume a pending cancellation flag.
    async fn take_cancel(&self, record: &mut OperationRecord) -> Result<bool, LcmError> {
        let requested = self.cancels.take(&record.id);
        let stored = self.storage.get_operation(&record.id).await?;
        if requested || stored.is_cancel_pending || record.is_cancel_pending {
            record.is_cancel_pending = false;
            info!(op_occ_id = %record.id, "operation cancelled before its next phase");
            return Ok(true);
        }
        Ok(false)
    }

    /// The blocking lock gave up. A record still waiting to run is settled
    /// so it cannot block the instance: STARTING ends ROLLED_BACK and a
    /// modify-info in PROCESSING ends FAILED_TEMP. Only the record is
    /// written, never the instance.
    async fn settle_lock_timeout(
        &self,
        op_occ_id: &str,
        timeout: LockError,
    ) -> Result<OperationRecord, LcmError> {
        let cause = LcmError::from(timeout);
        let record = self.storage.get_operation(op_occ_id).await?;
        match record.operation_state {
            OperationState::Starting => {
                self.notify(&record).await;
                self.roll_back_unstarted(record, cause).await
            }
            OperationState::Processing if record.operation() == OperationKind::ModifyInfo => {
                self.fail_temp(record, cause).await
            }
            _ => Err(cause),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    async fn roll_back_unstarted(
        &self,
        mut record: OperationRecord,
        cause: LcmError,
    ) -> Result<OperationRecord, LcmError> {
        warn!(
            op_occ_id = %record.id,
            operation = %record.operation(),
            error = %cause,
            "operation ended before processing"
        );
        record.error = Some(cause.to_problem_details());
        self.transition(&mut record, OperationState::RolledBack, None, GrantWrite::Delete)
            .await?;
        Ok(record)
    }

    async fn fail_temp(
        &self,
        mut record: OperationRecord,
        cause: LcmError,
    ) -> Result<OperationRecord, LcmError> {
        warn!(
            op_occ_id = %record.id,
            operation = %record.operation(),
            error = %cause,
            "operation failed"
        );
        record.error = Some(cause.to_problem_details());
        self.transition(&mut record, OperationState::FailedTemp, None, GrantWrite::Keep)
            .await?;
        Ok(record)
    }

    /// Move `record` to `state`, persist it (with the instance and grant
    /// writes) in one snapshot, then notify.
    async fn transition(
        &self,
        record: &mut OperationRecord,
        state: OperationState,
        instance: Option<&VnfInstance>,
        grant: GrantWrite,
    ) -> Result<(), LcmError> {
        record.transition(state, crate::now_rfc3339());
        self.persist(record, instance, grant).await?;
        if state.is_terminal() {
            self.cancels.take(&record.id);
        }
        info!(
            op_occ_id = %record.id,
            vnf_instance_id = %record.vnf_instance_id,
            operation = %record.operation(),
            state = %state,
            "operation state changed"
        );
        self.notify(record).await;
        Ok(())
    }

    async fn persist(
        &self,
        record: &OperationRecord,
        instance: Option<&VnfInstance>,
        grant: GrantWrite,
    ) -> Result<(), LcmError> {
        let mut snapshot = self.storage.begin_snapshot().await?;
        let staged = async {
            if let Some(inst) = instance {
                self.storage.put_instance(&mut snapshot, inst.clone()).await?;
            }
            match grant {
                GrantWrite::Keep => {}
                GrantWrite::Put(g) => self.storage.put_grant(&mut snapshot, g).await?,
                GrantWrite::Delete => self.storage.delete_grant(&mut snapshot, &record.id).await?,
            }
            self.storage.put_operation(&mut snapshot, record.clone()).await
        }
        .await;
        match staged {
            Ok(()) => Ok(self.storage.commit_snapshot(snapshot).await?),
            Err(e) => {
                self.storage.abort_snapshot(snapshot).await?;
                Err(e.into())
            }
        }
    }

    async fn notify(&self, record: &OperationRecord) {
        let notification = LcmNotification::for_record(
            record,
            self.config.notification.verbosity,
            &self.config.endpoint,
        );
        self.notifier.notify(&notification).await;
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn violation(record: &OperationRecord, action: &'static str) -> LcmError {
    error!(
        op_occ_id = %record.id,
        vnf_instance_id = %record.vnf_instance_id,
        state = %record.operation_state,
        action,
        "consistency violation: operation record is in an unexpected state"
    );
    LcmError::ConsistencyViolation {
        op_occ_id: record.id.clone(),
        state: record.operation_state,
        action,
    }
}

fn missing_grant(record: &OperationRecord) -> LcmError {
    LcmError::Validation(format!("operation {} has no grant", record.id))
}

fn flavour_for(record: &OperationRecord, inst: &VnfInstance) -> Option<String> {
    match &record.operation_params {
        OperationParams::Instantiate(req) => Some(req.flavour_id.clone()),
        _ => inst.flavour_id().map(str::to_string),
    }
}

fn merge_optional(
    target: &mut Option<vnflcm_model::KeyValuePairs>,
    patch: &Option<vnflcm_model::KeyValuePairs>,
) {
    if let Some(patch) = patch {
        *target = merge_kv(target.as_ref(), patch);
    }
}

/// Scale status, max scale levels and localization language survive every
/// kind except instantiate (which derives them) and terminate.
fn keep_saved_status(before: &VnfInstance, inst: &mut VnfInstance) {
    let (Some(saved), Some(info)) = (&before.instantiated_vnf_info, &mut inst.instantiated_vnf_info)
    else {
        return;
    };
    info.scale_status = saved.scale_status.clone();
    info.max_scale_levels = saved.max_scale_levels.clone();
    info.localization_language = saved.localization_language.clone();
}

fn check_vim_params(
    inst: &VnfInstance,
    additional_params: Option<&vnflcm_model::KeyValuePairs>,
) -> Result<(), LcmError> {
    let Some(vim) = inst.select_vim() else {
        return Ok(());
    };
    let param = |key: &str| additional_params.is_some_and(|p| p.contains_key(key));
    let missing: Vec<&str> = match vim.vim_type {
        VimType::Kubernetes => [
            ("interfaceInfo.endpoint", vim.interface_info.contains_key("endpoint")),
            ("lcm-kubernetes-def-files", param("lcm-kubernetes-def-files")),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name)
        .collect(),
        VimType::Helm => [
            ("interfaceInfo.endpoint", vim.interface_info.contains_key("endpoint")),
            ("interfaceInfo.ssl_ca_cert", vim.interface_info.contains_key("ssl_ca_cert")),
            ("accessInfo.bearer_token", vim.access_info.contains_key("bearer_token")),
            ("helm_chart_path", param("helm_chart_path")),
            ("helm_value_names", param("helm_value_names")),
        ]
        .into_iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| name)
        .collect(),
        VimType::OpenStack | VimType::Terraform => Vec::new(),
    };
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LcmError::Validation(format!(
            "{} VIM requires {}",
            vim.vim_type,
            missing.join(", ")
        )))
    }
}
