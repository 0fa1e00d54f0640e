//! Shared harness for the engine scenario tests.
//!
//! Every scenario runs the real coordinator against the in-memory storage,
//! the simulated VIM, the local grant authority and a recording notifier.
//! [`GatedStorage`] wraps the in-memory storage to force interleavings.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use vnflcm_engine::config::LockConfig;
use vnflcm_engine::{
    Coordinator, DriverRegistry, EngineConfig, GrantAuthority, GrantBroker, GrantError,
    RecordingNotifier, SimulatedDriver, StaticDescriptorProvider, Vnfd,
};
use vnflcm_model::{
    Grant, GrantRequest, InstantiateRequest, InstantiationState, OperationParams, OperationRecord,
    OperationState, ScaleRequest, ScaleType, VimConnectionInfo, VimType, VnfInstance,
};
use vnflcm_storage::{GrantRecord, LcmStorage, MemorySnapshot, MemoryStorage, StorageError};

pub const INSTANCE: &str = "inst-1";

/// Two VNFCs of VDU1 at the default level, each with one port on the
/// internal link, one external CP and one volume.
pub fn vnfd() -> Vnfd {
    serde_json::from_value(json!({
        "vnfd_id": "vnfd-1",
        "provider": "Company",
        "product_name": "Sample VNF",
        "software_version": "1.0",
        "descriptor_version": "1.0",
        "default_properties": {"metadata": {"owner": "vendor"}},
        "flavours": {
            "simple": {
                "vdus": {
                    "VDU1": {
                        "initial_count": 2,
                        "cps": [{"id": "CP1"}, {"id": "CP2", "virtual_link": "internalVL1"}],
                        "storages": ["Storage1"],
                        "software_image": "image-1"
                    }
                },
                "virtual_links": ["internalVL1"],
                "scaling_aspects": {
                    "VDU1_scale": {"max_scale_level": 3, "vdu_deltas": {"VDU1": 1}}
                }
            }
        }
    }))
    .unwrap()
}

/// The next package version of [`vnfd`].
pub fn vnfd_v2() -> Vnfd {
    let mut vnfd = vnfd();
    vnfd.vnfd_id = "vnfd-2".into();
    vnfd.software_version = "2.0".into();
    vnfd.descriptor_version = "2.0".into();
    vnfd
}

/// Denies every grant request.
pub struct DenyingAuthority;

#[async_trait]
impl GrantAuthority for DenyingAuthority {
    async fn request_grant(&self, _request: &GrantRequest) -> Result<Grant, GrantError> {
        Err(GrantError::Denied("quota exhausted".into()))
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.lock = LockConfig {
        poll_interval_ms: 5,
        max_backoff_ms: 20,
        timeout_secs: 2,
    };
    config.default_vim = Some(VimConnectionInfo::new(VimType::OpenStack));
    config.grant.default_zone = Some("az-1".into());
    config
}

pub struct Harness<S: LcmStorage = MemoryStorage> {
    pub coordinator: Coordinator<S>,
    pub storage: Arc<S>,
    pub driver: SimulatedDriver,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub async fn new() -> Harness {
        Harness::with_config(config()).await
    }

    pub async fn with_config(config: EngineConfig) -> Harness {
        Harness::with_storage(Arc::new(MemoryStorage::new()), config).await
    }
}

impl Harness<GatedStorage> {
    pub async fn gated() -> Harness<GatedStorage> {
        Harness::with_storage(Arc::new(GatedStorage::default()), config()).await
    }
}

impl<S: LcmStorage> Harness<S> {
    pub async fn with_storage(storage: Arc<S>, config: EngineConfig) -> Harness<S> {
        let driver = SimulatedDriver::new();
        let notifier = RecordingNotifier::new();
        let descriptors = StaticDescriptorProvider::new([vnfd(), vnfd_v2()]);
        let coordinator = Coordinator::new(
            Arc::clone(&storage),
            Arc::new(descriptors),
            DriverRegistry::uniform(Arc::new(driver.clone())),
            Arc::new(notifier.clone()),
            config,
        )
        .unwrap();
        coordinator
            .create_instance("vnfd-1", Some(INSTANCE.into()), Some("sample".into()))
            .await
            .unwrap();
        Harness {
            coordinator,
            storage,
            driver,
            notifier,
        }
    }

    /// Same wiring, but every grant is denied.
    pub fn deny_grants(mut self) -> Harness<S> {
        self.coordinator = self
            .coordinator
            .with_grant_broker(GrantBroker::new(Arc::new(DenyingAuthority), false));
        self
    }

    /// Submit and run one operation on [`INSTANCE`].
    pub async fn run(&self, params: OperationParams) -> OperationRecord {
        let record = self.coordinator.submit(INSTANCE, params, false).await.unwrap();
        self.coordinator.execute(&record.id).await.unwrap()
    }

    pub async fn instantiate(&self) -> OperationRecord {
        let record = self.run(instantiate_params()).await;
        assert_eq!(record.operation_state, OperationState::Completed);
        record
    }

    pub async fn instance(&self) -> VnfInstance {
        self.storage.get_instance(INSTANCE).await.unwrap()
    }

    pub async fn operation(&self, op_occ_id: &str) -> OperationRecord {
        self.storage.get_operation(op_occ_id).await.unwrap()
    }

    /// Overwrite a record as a crashed process would have left it.
    pub async fn force_state(&self, op_occ_id: &str, state: OperationState) {
        let mut record = self.operation(op_occ_id).await;
        record.transition(state, "2026-01-01T00:00:00Z");
        let mut snapshot = self.storage.begin_snapshot().await.unwrap();
        self.storage.put_operation(&mut snapshot, record).await.unwrap();
        self.storage.commit_snapshot(snapshot).await.unwrap();
    }
}

/// In-memory storage with switches that stretch chosen calls, the way a
/// networked store would. Clones share the data and the switches.
#[derive(Debug, Clone, Default)]
pub struct GatedStorage {
    inner: MemoryStorage,
    gates: Arc<Gates>,
}

#[derive(Debug, Default)]
struct Gates {
    yield_after_list: AtomicBool,
    processing_read_delay_ms: AtomicU64,
    write_after_next_list: Mutex<Option<OperationRecord>>,
}

impl GatedStorage {
    /// The wrapped store, read without any gate.
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Yield to the scheduler after every `list_operations`.
    pub fn yield_after_list(&self) {
        self.gates.yield_after_list.store(true, Ordering::SeqCst);
    }

    /// Sleep after `get_operation` returns a PROCESSING record. The
    /// returned value is the one read before the sleep.
    pub fn delay_processing_reads(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.gates.processing_read_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Commit `record` right after the next `list_operations` has read,
    /// as if another task wrote it in between.
    pub fn write_after_next_list(&self, record: OperationRecord) {
        *self.gates.write_after_next_list.lock().unwrap() = Some(record);
    }
}

#[async_trait]
impl LcmStorage for GatedStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        self.inner.begin_snapshot().await
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.commit_snapshot(snapshot).await
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.abort_snapshot(snapshot).await
    }

    async fn put_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        instance: VnfInstance,
    ) -> Result<(), StorageError> {
        self.inner.put_instance(snapshot, instance).await
    }

    async fn put_operation(
        &self,
        snapshot: &mut MemorySnapshot,
        record: OperationRecord,
    ) -> Result<(), StorageError> {
        self.inner.put_operation(snapshot, record).await
    }

    async fn put_grant(
        &self,
        snapshot: &mut MemorySnapshot,
        record: GrantRecord,
    ) -> Result<(), StorageError> {
        self.inner.put_grant(snapshot, record).await
    }

    async fn delete_grant(
        &self,
        snapshot: &mut MemorySnapshot,
        op_occ_id: &str,
    ) -> Result<(), StorageError> {
        self.inner.delete_grant(snapshot, op_occ_id).await
    }

    async fn mark_cancel_pending(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError> {
        self.inner.mark_cancel_pending(op_occ_id).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<VnfInstance, StorageError> {
        self.inner.get_instance(instance_id).await
    }

    async fn list_instances(
        &self,
        state_filter: Option<InstantiationState>,
    ) -> Result<Vec<VnfInstance>, StorageError> {
        self.inner.list_instances(state_filter).await
    }

    async fn get_operation(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError> {
        let record = self.inner.get_operation(op_occ_id).await?;
        let delay_ms = self.gates.processing_read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 && record.operation_state == OperationState::Processing {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Ok(record)
    }

    async fn list_operations(
        &self,
        instance_filter: Option<&str>,
        state_filter: Option<OperationState>,
    ) -> Result<Vec<OperationRecord>, StorageError> {
        let records = self
            .inner
            .list_operations(instance_filter, state_filter)
            .await?;
        let pending = self.gates.write_after_next_list.lock().unwrap().take();
        if let Some(record) = pending {
            let mut snapshot = self.inner.begin_snapshot().await?;
            self.inner.put_operation(&mut snapshot, record).await?;
            self.inner.commit_snapshot(snapshot).await?;
        }
        if self.gates.yield_after_list.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(records)
    }

    async fn get_grant(&self, op_occ_id: &str) -> Result<GrantRecord, StorageError> {
        self.inner.get_grant(op_occ_id).await
    }
}

pub fn instantiate_params() -> OperationParams {
    let mut req = InstantiateRequest::new("simple");
    req.localization_language = Some("ja".into());
    req.vnf_configurable_properties = json!({"isAutoscaleEnabled": false})
        .as_object()
        .cloned();
    OperationParams::Instantiate(req)
}

pub fn scale(scale_type: ScaleType, steps: u32) -> OperationParams {
    OperationParams::Scale(ScaleRequest {
        scale_type,
        aspect_id: "VDU1_scale".into(),
        number_of_steps: steps,
        additional_params: None,
    })
}

/// Compute resource ids of the stored snapshot, sorted.
pub fn compute_ids(inst: &VnfInstance) -> Vec<String> {
    let mut ids: Vec<String> = inst
        .instantiated_vnf_info
        .iter()
        .flat_map(|info| &info.vnfc_resource_info)
        .map(|v| v.compute_resource.resource_id.clone())
        .collect();
    ids.sort();
    ids
}
