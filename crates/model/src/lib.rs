//! vnflcm-model: shared data model for the VNF lifecycle engine.
//!
//! Typed structs for the records the engine reads and writes:
//! [`VnfInstance`] and its resource snapshot, [`OperationRecord`] with its
//! request payload, the [`GrantRequest`]/[`Grant`] pair exchanged with a
//! grant authority, and the change records produced once an operation
//! finishes. Field names serialize in the camelCase form used on the wire
//! by SOL002/SOL003 peers.
//!
//! The crate performs no I/O. Storage, drivers and the state machine live
//! in `vnflcm-storage` and `vnflcm-engine`.

pub mod change;
pub mod grant;
pub mod instance;
pub mod merge;
pub mod operation;
pub mod request;

pub use change::{
    AffectedExtLinkPort, AffectedVirtualLink, AffectedVirtualStorage, AffectedVnfc, ChangeRecord,
    ChangeType, ChangedInfo, ResourceChanges, VnfcInfoModification,
};
pub use grant::{
    AffinityType, ConstraintResourceRef, Grant, GrantInfo, GrantRequest, PlacementConstraint,
    ResourceCategory, ResourceDefinition, ResourceIdType, SoftwareImage, VimAssets, ZoneInfo,
};
pub use instance::{
    ExtLinkPortInfo, ExtManagedVirtualLinkInfo, ExtVirtualLinkInfo, InstantiatedVnfInfo,
    InstantiationState, ResourceHandle, ScaleInfo, VimConnectionInfo, VimType,
    VirtualStorageResourceInfo, VnfExtCpConfig, VnfExtCpData, VnfExtCpInfo, VnfInstance,
    VnfLinkPortInfo, VnfOperationalState, VnfVirtualLinkResourceInfo, VnfcCpInfo, VnfcInfo,
    VnfcResourceInfo,
};
pub use merge::json_merge_patch;
pub use operation::{OperationKind, OperationRecord, OperationState, ProblemDetails};
pub use request::{
    ChangeExtConnRequest, ChangeVnfPkgRequest, ExtLinkPortData, ExtManagedVirtualLinkData,
    ExtVirtualLinkData, HealRequest, InstantiateRequest, ModifyInfoRequest, OperationParams,
    ScaleRequest, ScaleType, TerminateRequest, TerminationType, VduParam,
};

/// Free-form JSON object used for metadata, extensions and configurable
/// properties.
pub type KeyValuePairs = serde_json::Map<String, serde_json::Value>;
