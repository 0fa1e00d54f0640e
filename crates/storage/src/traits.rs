use async_trait::async_trait;
use vnflcm_model::{InstantiationState, OperationRecord, OperationState, VnfInstance};

use crate::error::StorageError;
use crate::record::GrantRecord;

/// The storage trait for the VNF lifecycle engine.
///
/// An `LcmStorage` implementation provides transactional storage for VNF
/// instances, operation records, and the GrantRequest/Grant pair of each
/// operation that has not reached a terminal state.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// Staged writes are invisible to every read until commit. If a `Snapshot`
/// is dropped without committing, its writes MUST be discarded.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared between the
/// coordinator tasks, the reconciliation loop and the auto-heal scheduler.
#[async_trait]
pub trait LcmStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all staged writes visible at once.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort a snapshot, discarding all staged writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Writes (within snapshot) ─────────────────────────────────────────────

    /// Insert or replace a VNF instance.
    async fn put_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        instance: VnfInstance,
    ) -> Result<(), StorageError>;

    /// Insert or replace an operation record.
    async fn put_operation(
        &self,
        snapshot: &mut Self::Snapshot,
        record: OperationRecord,
    ) -> Result<(), StorageError>;

    /// Insert or replace the grant pair of an operation.
    async fn put_grant(
        &self,
        snapshot: &mut Self::Snapshot,
        record: GrantRecord,
    ) -> Result<(), StorageError>;

    /// Delete the grant pair of an operation. Deleting an absent pair is
    /// not an error.
    async fn delete_grant(
        &self,
        snapshot: &mut Self::Snapshot,
        op_occ_id: &str,
    ) -> Result<(), StorageError>;

    // ── Conditional update (outside any snapshot) ────────────────────────────

    /// Set `is_cancel_pending` on a record, but only while its committed
    /// state is STARTING or PROCESSING. The check and the write are atomic
    /// with respect to snapshot commits; no other field is touched.
    ///
    /// Returns the committed record after the call, flagged or not.
    async fn mark_cancel_pending(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError>;

    // ── Queries (committed data only) ────────────────────────────────────────

    /// Returns `Err(StorageError::InstanceNotFound)` if the instance does not exist.
    async fn get_instance(&self, instance_id: &str) -> Result<VnfInstance, StorageError>;

    /// List instances ordered by id, optionally filtered by instantiation state.
    async fn list_instances(
        &self,
        state_filter: Option<InstantiationState>,
    ) -> Result<Vec<VnfInstance>, StorageError>;

    /// Returns `Err(StorageError::OperationNotFound)` if the record does not exist.
    async fn get_operation(&self, op_occ_id: &str) -> Result<OperationRecord, StorageError>;

    /// List operation records ordered by start time, then id.
    ///
    /// - `instance_filter`: only records of this instance
    /// - `state_filter`: only records in this state
    async fn list_operations(
        &self,
        instance_filter: Option<&str>,
        state_filter: Option<OperationState>,
    ) -> Result<Vec<OperationRecord>, StorageError>;

    /// Returns `Err(StorageError::GrantNotFound)` if no pair is stored.
    async fn get_grant(&self, op_occ_id: &str) -> Result<GrantRecord, StorageError>;
}
