//! In-memory `LcmStorage` backend.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use vnflcm_model::{InstantiationState, OperationRecord, OperationState, VnfInstance};

use crate::error::StorageError;
use crate::record::{GrantRecord, StorageDump};
use crate::traits::LcmStorage;

/// Committed state shared behind a mutex. Cloning the storage shares it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<StorageDump>>,
}

/// Writes staged by one snapshot, applied in order on commit.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    writes: Vec<Write>,
}

#[derive(Debug)]
enum Write {
    Instance(Box<VnfInstance>),
    Operation(Box<OperationRecord>),
    PutGrant(Box<GrantRecord>),
    DeleteGrant(String),
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with `dump`.
    pub fn restore(dump: StorageDump) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dump)),
        }
    }

    /// Copy of everything committed so far.
    pub fn dump(&self) -> Result<StorageDump, StorageError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StorageDump>, StorageError> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl LcmStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        for write in snapshot.writes {
            match write {
                Write::Instance(inst) => {
                    inner.instances.insert(inst.id.clone(), *inst);
                }
                Write::Operation(rec) => {
                    inner.operations.insert(rec.id.clone(), *rec);
                }
                Write::PutGrant(grant) => {
                    inner.grants.insert(grant.op_occ_id().to_string(), *grant);
                }
                Write::DeleteGrant(op_occ_id) => {
                    inner.grants.remove(&op_occ_id);
                }
            }
        }
        Ok(())
    }

    async fn abort_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        Ok(())
    }

    async fn put_instance(
        &self,
        snapshot: &mut MemorySnapshot,
        instance: VnfInstance,
    ) -> Result<(), StorageError> {
        snapshot.writes.push(Write::Instance(Box::new(instance)));
        Ok(())
    }

    async fn put_operation(
        &self,
        snapshot: &mut MemorySnapshot,
        record: OperationRecord,
    ) -> Result<(), StorageError> {
        snapshot.writes.push(Write::Operation(Box::new(record)));
        Ok(())
    }

    async fn put_grant(
        &self,
        snapshot: &mut MemorySnapshot,
        record: GrantRecord,
    ) -> Result<(), StorageError> {
        snapshot.writes.push(Write::PutGrant(Box::new(record)));
        Ok(())
    }

    async fn delete_grant(
        &self,
        snapshot: &mut MemorySnapshot,
        op_occ_id: &str,
    ) -> Result<(), StorageError> {
        snapshot.writes.push(Write::DeleteGrant(op_occ_id.to_string()));
        Ok(())
    }

    async fn mark_cancel_pending(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError> {
        let mut inner = self.lock()?;
        let record =
            inner
                .operations
                .get_mut(op_occ_id)
                .ok_or_else(|| StorageError::OperationNotFound {
                    op_occ_id: op_occ_id.to_string(),
                })?;
        if matches!(
            record.operation_state,
            OperationState::Starting | OperationState::Processing
        ) {
            record.is_cancel_pending = true;
        }
        Ok(record.clone())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<VnfInstance, StorageError> {
        self.lock()?
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    async fn list_instances(
        &self,
        state_filter: Option<InstantiationState>,
    ) -> Result<Vec<VnfInstance>, StorageError> {
        Ok(self
            .lock()?
            .instances
            .values()
            .filter(|i| state_filter.map_or(true, |s| i.instantiation_state == s))
            .cloned()
            .collect())
    }

    async fn get_operation(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError> {
        self.lock()?
            .operations
            .get(op_occ_id)
            .cloned()
            .ok_or_else(|| StorageError::OperationNotFound {
                op_occ_id: op_occ_id.to_string(),
            })
    }

    async fn list_operations(
        &self,
        instance_filter: Option<&str>,
        state_filter: Option<OperationState>,
    ) -> Result<Vec<OperationRecord>, StorageError> {
        let mut records: Vec<OperationRecord> = self
            .lock()?
            .operations
            .values()
            .filter(|r| instance_filter.map_or(true, |id| r.vnf_instance_id == id))
            .filter(|r| state_filter.map_or(true, |s| r.operation_state == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn get_grant(&self, op_occ_id: &str) -> Result<GrantRecord, StorageError> {
        self.lock()?
            .grants
            .get(op_occ_id)
            .cloned()
            .ok_or_else(|| StorageError::GrantNotFound {
                op_occ_id: op_occ_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dump_and_restore_preserve_committed_state() {
        let store = MemoryStorage::new();
        let mut snap = store.begin_snapshot().await.unwrap();
        store
            .put_instance(&mut snap, VnfInstance::new("inst-1", "vnfd-1"))
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();

        let dump = store.dump().unwrap();
        let json = serde_json::to_string(&dump).unwrap();
        let restored = MemoryStorage::restore(serde_json::from_str(&json).unwrap());
        assert_eq!(
            restored.get_instance("inst-1").await.unwrap(),
            VnfInstance::new("inst-1", "vnfd-1")
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStorage::new();
        let other = store.clone();
        let mut snap = store.begin_snapshot().await.unwrap();
        store
            .put_instance(&mut snap, VnfInstance::new("inst-1", "vnfd-1"))
            .await
            .unwrap();
        store.commit_snapshot(snap).await.unwrap();
        assert!(other.get_instance("inst-1").await.is_ok());
    }
}
