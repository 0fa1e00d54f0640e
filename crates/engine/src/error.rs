use thiserror::Error;
use vnflcm_model::{InstantiationState, OperationKind, OperationState, ProblemDetails};
use vnflcm_storage::StorageError;

use crate::descriptor::DescriptorError;
use crate::driver::DriverError;
use crate::grant::GrantError;
use crate::lock::LockError;
use crate::scripts::ScriptError;

/// Errors produced by the operation engine.
///
/// Failures raised inside a guarded phase (grant, process, rollback) are
/// converted with [`LcmError::to_problem_details`] and stored on the
/// operation record; they never escape the coordinator. The remaining
/// variants are returned to the caller of a coordinator entry point.
#[derive(Debug, Error)]
pub enum LcmError {
    #[error("grant denied: {0}")]
    GrantDenied(String),

    #[error("grant authority unavailable: {0}")]
    GrantUnavailable(String),

    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("rollback of {operation} is not supported")]
    RollbackNotSupported { operation: OperationKind },

    #[error("an operation is in progress on VNF instance {instance_id}")]
    OperationInProgress { instance_id: String },

    #[error("cannot {action} operation {op_occ_id} in state {state}")]
    ConsistencyViolation {
        op_occ_id: String,
        state: OperationState,
        action: &'static str,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("VNF instance {instance_id} is {state}")]
    InvalidInstanceState {
        instance_id: String,
        state: InstantiationState,
    },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Validation(String),

    #[error("operation was interrupted before its outcome was recorded")]
    Interrupted,

    #[error("operation was cancelled")]
    Cancelled,
}

impl From<GrantError> for LcmError {
    fn from(e: GrantError) -> Self {
        match e {
            GrantError::Denied(detail) => LcmError::GrantDenied(detail),
            GrantError::Unavailable(detail) => LcmError::GrantUnavailable(detail),
        }
    }
}

impl From<LockError> for LcmError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { instance_id, .. } => LcmError::OperationInProgress { instance_id },
        }
    }
}

impl LcmError {
    /// The payload stored in an operation record's `error` field.
    pub fn to_problem_details(&self) -> ProblemDetails {
        let (status, title) = match self {
            LcmError::GrantDenied(_) => (403, "Grant Denied"),
            LcmError::GrantUnavailable(_) => (500, "Grant Authority Unavailable"),
            LcmError::Driver(_) => (500, "Infrastructure Driver Error"),
            LcmError::RollbackNotSupported { .. } => (409, "Rollback Not Supported"),
            LcmError::OperationInProgress { .. } => (409, "Operation In Progress"),
            LcmError::ConsistencyViolation { .. } => (409, "Conflict"),
            LcmError::NotFound(_) => (404, "Not Found"),
            LcmError::Storage(
                StorageError::InstanceNotFound { .. }
                | StorageError::OperationNotFound { .. }
                | StorageError::GrantNotFound { .. },
            ) => (404, "Not Found"),
            LcmError::InvalidInstanceState { .. } => (409, "Conflict"),
            LcmError::Validation(_) => (400, "Bad Request"),
            LcmError::Interrupted => (500, "Operation Interrupted"),
            LcmError::Cancelled => (500, "Operation Cancelled"),
            LcmError::Descriptor(_) | LcmError::Script(_) | LcmError::Storage(_) => {
                (500, "Internal Server Error")
            }
        };
        ProblemDetails::new(status, title, self.to_string())
    }
}
