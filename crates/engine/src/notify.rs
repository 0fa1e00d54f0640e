//! Operation occurrence notifications.
//!
//! The coordinator emits one [`LcmNotification`] per state transition, in
//! transition order. Transports never fail an operation: delivery problems
//! are logged and dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use vnflcm_model::{
    AffectedExtLinkPort, AffectedVirtualLink, AffectedVirtualStorage, AffectedVnfc, ChangedInfo,
    ExtVirtualLinkInfo, OperationKind, OperationRecord, OperationState, ProblemDetails,
};

/// How much of the change record a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verbosity {
    Full,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Start,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLink {
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLinks {
    pub vnf_instance: NotificationLink,
    pub vnf_lcm_op_occ: NotificationLink,
}

/// A `VnfLcmOperationOccurrenceNotification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcmNotification {
    pub id: String,
    pub notification_type: String,
    pub time_stamp: String,
    pub notification_status: NotificationStatus,
    pub operation_state: OperationState,
    pub vnf_instance_id: String,
    pub operation: OperationKind,
    pub is_automatic_invocation: bool,
    pub verbosity: Verbosity,
    pub vnf_lcm_op_occ_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_vnfcs: Vec<AffectedVnfc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_virtual_links: Vec<AffectedVirtualLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_ext_link_ports: Vec<AffectedExtLinkPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_virtual_storages: Vec<AffectedVirtualStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_info: Option<ChangedInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_ext_connectivity: Option<Vec<ExtVirtualLinkInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
    #[serde(rename = "_links")]
    pub links: NotificationLinks,
}

impl LcmNotification {
    /// Notification for the record's current state. Change details are
    /// included only at [`Verbosity::Full`].
    pub fn for_record(record: &OperationRecord, verbosity: Verbosity, endpoint: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let status = if record.operation_state == OperationState::Starting {
            NotificationStatus::Start
        } else {
            NotificationStatus::Result
        };
        let mut notif = LcmNotification {
            id: Uuid::new_v4().to_string(),
            notification_type: "VnfLcmOperationOccurrenceNotification".to_string(),
            time_stamp: crate::now_rfc3339(),
            notification_status: status,
            operation_state: record.operation_state,
            vnf_instance_id: record.vnf_instance_id.clone(),
            operation: record.operation(),
            is_automatic_invocation: record.is_automatic_invocation,
            verbosity,
            vnf_lcm_op_occ_id: record.id.clone(),
            affected_vnfcs: Vec::new(),
            affected_virtual_links: Vec::new(),
            affected_ext_link_ports: Vec::new(),
            affected_virtual_storages: Vec::new(),
            changed_info: None,
            changed_ext_connectivity: None,
            error: record.error.clone(),
            links: NotificationLinks {
                vnf_instance: NotificationLink {
                    href: format!(
                        "{}/vnflcm/v2/vnf_instances/{}",
                        endpoint, record.vnf_instance_id
                    ),
                },
                vnf_lcm_op_occ: NotificationLink {
                    href: format!("{}/vnflcm/v2/vnf_lcm_op_occs/{}", endpoint, record.id),
                },
            },
        };
        if verbosity == Verbosity::Full {
            if let Some(changes) = &record.resource_changes {
                notif.affected_vnfcs = changes.affected_vnfcs.clone();
                notif.affected_virtual_links = changes.affected_virtual_links.clone();
                notif.affected_ext_link_ports = changes.affected_ext_link_ports.clone();
                notif.affected_virtual_storages = changes.affected_virtual_storages.clone();
            }
            notif.changed_info = record.changed_info.clone();
            notif.changed_ext_connectivity = record.changed_ext_connectivity.clone();
        }
        notif
    }
}

/// Delivers notifications to subscribers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &LcmNotification);
}

// ── Transports ───────────────────────────────────────────────────────────────

/// Writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &LcmNotification) {
        info!(
            vnf_lcm_op_occ_id = %n.vnf_lcm_op_occ_id,
            vnf_instance_id = %n.vnf_instance_id,
            operation = %n.operation,
            state = %n.operation_state,
            automatic = n.is_automatic_invocation,
            "operation notification"
        );
    }
}

/// POSTs each notification as JSON to every callback URI.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    callback_uris: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(callback_uris: Vec<String>) -> Self {
        WebhookNotifier { callback_uris }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &LcmNotification) {
        let uris = self.callback_uris.clone();
        let body = notification.clone();
        let result = tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            for uri in &uris {
                match agent.post(uri).send_json(&body) {
                    Ok(resp) if resp.status().as_u16() == 204 => {}
                    Ok(resp) => warn!(
                        callback_uri = %uri,
                        status = resp.status().as_u16(),
                        "notification delivered with unexpected status"
                    ),
                    Err(e) => {
                        warn!(callback_uri = %uri, error = %e, "notification delivery failed")
                    }
                }
            }
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "notification task failed");
        }
    }
}

/// Keeps every notification in memory, in emission order.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<LcmNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn notifications(&self) -> Vec<LcmNotification> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// States notified for one operation, in emission order.
    pub fn states_for(&self, op_occ_id: &str) -> Vec<OperationState> {
        self.notifications()
            .into_iter()
            .filter(|n| n.vnf_lcm_op_occ_id == op_occ_id)
            .map(|n| n.operation_state)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &LcmNotification) {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
    }
}

/// Fans a notification out to several transports.
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        NotifierSet { notifiers }
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    async fn notify(&self, notification: &LcmNotification) {
        for notifier in &self.notifiers {
            notifier.notify(notification).await;
        }
    }
}
