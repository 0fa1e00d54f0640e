//! The operation table.
//!
//! Each operation kind is described by four slots: how its grant phase
//! runs, which hook follows a granted request, who performs the process
//! phase, and what rollback means. The coordinator reads these slots
//! instead of looking methods up by name.

use vnflcm_model::{OperationParams, ScaleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPhase {
    /// Build a grant request and exchange it with the authority.
    Negotiate,
    /// No grant artifacts are created.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostGrantHook {
    /// Merge VIM connection info from the request, the grant and the
    /// configured default, then check the VIM-type parameters.
    SelectVim,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSlot {
    /// The infrastructure driver of the instance's VIM does the work.
    Driver,
    /// The engine applies the change itself without touching infrastructure.
    EngineLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackSlot {
    /// The driver's rollback method undoes the change.
    Driver,
    /// Nothing to undo; rollback succeeds immediately.
    NoOp,
    /// The kind has no rollback. The record stays FAILED_TEMP.
    Unsupported,
}

/// Slot description of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSlots {
    pub grant: GrantPhase,
    pub post_grant: PostGrantHook,
    pub process: ProcessSlot,
    pub rollback: RollbackSlot,
}

impl OperationSlots {
    pub fn for_operation(params: &OperationParams) -> OperationSlots {
        let driver = |rollback| OperationSlots {
            grant: GrantPhase::Negotiate,
            post_grant: PostGrantHook::None,
            process: ProcessSlot::Driver,
            rollback,
        };
        match params {
            OperationParams::Instantiate(_) => OperationSlots {
                post_grant: PostGrantHook::SelectVim,
                ..driver(RollbackSlot::Driver)
            },
            OperationParams::Scale(req) if req.scale_type == ScaleType::ScaleIn => {
                driver(RollbackSlot::Unsupported)
            }
            OperationParams::Scale(_) => driver(RollbackSlot::Driver),
            OperationParams::Heal(_) | OperationParams::Terminate(_) => {
                driver(RollbackSlot::Unsupported)
            }
            OperationParams::ChangeExtConn(_) | OperationParams::ChangeVnfpkg(_) => {
                driver(RollbackSlot::Driver)
            }
            OperationParams::ModifyInfo(_) => OperationSlots {
                grant: GrantPhase::Skip,
                post_grant: PostGrantHook::None,
                process: ProcessSlot::EngineLocal,
                rollback: RollbackSlot::NoOp,
            },
        }
    }

    /// Whether a successful rollback may have changed infrastructure, so the
    /// instance snapshot must be persisted with the record.
    pub fn rollback_persists_instance(params: &OperationParams) -> bool {
        matches!(
            params,
            OperationParams::ChangeExtConn(_) | OperationParams::ChangeVnfpkg(_)
        )
    }
}
