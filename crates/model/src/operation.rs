//! Operation occurrence records and their state machine vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::change::{ChangedInfo, ResourceChanges};
use crate::instance::ExtVirtualLinkInfo;
use crate::request::OperationParams;

/// Kind of lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Instantiate,
    Scale,
    Heal,
    Terminate,
    ChangeExtConn,
    ModifyInfo,
    ChangeVnfpkg,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Instantiate,
        OperationKind::Scale,
        OperationKind::Heal,
        OperationKind::Terminate,
        OperationKind::ChangeExtConn,
        OperationKind::ModifyInfo,
        OperationKind::ChangeVnfpkg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Instantiate => "INSTANTIATE",
            OperationKind::Scale => "SCALE",
            OperationKind::Heal => "HEAL",
            OperationKind::Terminate => "TERMINATE",
            OperationKind::ChangeExtConn => "CHANGE_EXT_CONN",
            OperationKind::ModifyInfo => "MODIFY_INFO",
            OperationKind::ChangeVnfpkg => "CHANGE_VNFPKG",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operation kind '{}'", s))
    }
}

/// State of an operation occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Starting,
    Processing,
    Completed,
    FailedTemp,
    Failed,
    RollingBack,
    RolledBack,
}

impl OperationState {
    /// COMPLETED, ROLLED_BACK and the operator-forced FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::RolledBack | OperationState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Starting => "STARTING",
            OperationState::Processing => "PROCESSING",
            OperationState::Completed => "COMPLETED",
            OperationState::FailedTemp => "FAILED_TEMP",
            OperationState::Failed => "FAILED",
            OperationState::RollingBack => "ROLLING_BACK",
            OperationState::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload stored on a failed operation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    pub status: u16,
    pub title: String,
    pub detail: String,
}

impl ProblemDetails {
    pub fn new(status: u16, title: impl Into<String>, detail: impl Into<String>) -> Self {
        ProblemDetails {
            status,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.status, self.detail)
    }
}

/// One attempt to change a VNF instance.
///
/// The same record advances through retry and rollback; it is never
/// recreated. Its kind is derived from `operation_params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: String,
    pub vnf_instance_id: String,
    pub operation_state: OperationState,
    /// RFC 3339.
    pub start_time: String,
    /// RFC 3339.
    pub state_entered_time: String,
    #[serde(default)]
    pub is_automatic_invocation: bool,
    #[serde(default)]
    pub is_cancel_pending: bool,
    pub operation_params: OperationParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_changes: Option<ResourceChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_info: Option<ChangedInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_ext_connectivity: Option<Vec<ExtVirtualLinkInfo>>,
}

impl OperationRecord {
    /// A new record in `state`, stamped with `now` for both timestamps.
    pub fn new(
        id: impl Into<String>,
        vnf_instance_id: impl Into<String>,
        params: OperationParams,
        state: OperationState,
        now: impl Into<String>,
    ) -> Self {
        let now = now.into();
        OperationRecord {
            id: id.into(),
            vnf_instance_id: vnf_instance_id.into(),
            operation_state: state,
            start_time: now.clone(),
            state_entered_time: now,
            is_automatic_invocation: false,
            is_cancel_pending: false,
            operation_params: params,
            grant_id: None,
            error: None,
            resource_changes: None,
            changed_info: None,
            changed_ext_connectivity: None,
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.operation_params.kind()
    }

    /// Move to `state` and stamp the transition time.
    pub fn transition(&mut self, state: OperationState, now: impl Into<String>) {
        self.operation_state = state;
        self.state_entered_time = now.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{TerminateRequest, TerminationType};

    #[test]
    fn terminal_states() {
        assert!(OperationState::Completed.is_terminal());
        assert!(OperationState::RolledBack.is_terminal());
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::FailedTemp.is_terminal());
        assert!(!OperationState::RollingBack.is_terminal());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!(
            "change_ext_conn".parse::<OperationKind>().unwrap(),
            OperationKind::ChangeExtConn
        );
        assert!("RESIZE".parse::<OperationKind>().is_err());
    }

    #[test]
    fn kind_follows_params() {
        let rec = OperationRecord::new(
            "op-1",
            "inst-1",
            OperationParams::Terminate(TerminateRequest {
                termination_type: TerminationType::Forceful,
                graceful_termination_timeout: None,
                additional_params: None,
            }),
            OperationState::Starting,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(rec.operation(), OperationKind::Terminate);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["operationState"], "STARTING");
        assert_eq!(json["operationParams"]["operation"], "TERMINATE");
        assert!(json.get("error").is_none());
    }
}
