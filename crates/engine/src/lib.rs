//! vnflcm-engine: the VNF lifecycle operation engine.
//!
//! [`Coordinator`] drives operation records through their state machine.
//! Around it sit the [`GrantBroker`] that negotiates resources before any
//! infrastructure is touched, the [`InfraDriver`] registry that performs
//! the changes, the [`diff`] function that records what changed, the
//! per-instance [`LockManager`], and the background [`Reconciler`] and
//! [`AutoHealScheduler`].
//!
//! Persistence comes from `vnflcm-storage`; every record type from
//! `vnflcm-model`.

pub mod autoheal;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod diff;
pub mod driver;
pub mod error;
pub mod grant;
pub mod lock;
pub mod modify;
pub mod notify;
pub mod reconcile;
pub mod scripts;
pub mod slots;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub use autoheal::AutoHealScheduler;
pub use config::{read_engine_config, ConfigError, EngineConfig};
pub use coordinator::Coordinator;
pub use descriptor::{DescriptorError, DescriptorProvider, StaticDescriptorProvider, Vnfd};
pub use diff::diff;
pub use driver::{DriverCall, DriverError, DriverRegistry, InfraDriver, SimulatedDriver};
pub use error::LcmError;
pub use grant::{GrantAuthority, GrantBroker, GrantError, HttpGrantAuthority, LocalGrantAuthority};
pub use lock::{LockError, LockManager, LockMode};
pub use notify::{
    LcmNotification, LogNotifier, Notifier, NotifierSet, RecordingNotifier, Verbosity,
    WebhookNotifier,
};
pub use reconcile::{ReconcileReport, Reconciler, ReconcilerHandle};
pub use scripts::{ScriptError, ScriptRunner};
pub use slots::OperationSlots;

/// The current UTC time in RFC 3339, as stored in record timestamps.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
