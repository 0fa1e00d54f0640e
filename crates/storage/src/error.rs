/// All errors that can be returned by an LcmStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No VNF instance with the given id.
    #[error("vnf instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    /// No operation record with the given id.
    #[error("operation occurrence not found: {op_occ_id}")]
    OperationNotFound { op_occ_id: String },

    /// No grant pair stored for the given operation.
    #[error("grant not found for operation occurrence: {op_occ_id}")]
    GrantNotFound { op_occ_id: String },

    /// A backend-specific storage error (I/O, serialization, poisoned lock, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
