//! Change records produced when an operation finishes processing.
//!
//! Categories with no entries are `None` (or empty and skipped), so a
//! record describing no change serializes to an empty object.

use serde::{Deserialize, Serialize};

use crate::instance::{ExtVirtualLinkInfo, ResourceHandle};
use crate::KeyValuePairs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
    Temporary,
    LinkPortAdded,
    LinkPortRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedVnfc {
    pub id: String,
    pub vdu_id: String,
    pub change_type: ChangeType,
    pub compute_resource: ResourceHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_vnfc_cp_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_storage_resource_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_storage_resource_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedVirtualLink {
    pub id: String,
    pub vnf_virtual_link_desc_id: String,
    pub change_type: ChangeType,
    pub network_resource: ResourceHandle,
    /// For LINK_PORT_ADDED/LINK_PORT_REMOVED, only the ports that changed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnf_link_port_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedVirtualStorage {
    pub id: String,
    pub virtual_storage_desc_id: String,
    pub change_type: ChangeType,
    pub storage_resource: ResourceHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedExtLinkPort {
    pub id: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_cp_instance_id: Option<String>,
    pub resource_handle: ResourceHandle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChanges {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_vnfcs: Vec<AffectedVnfc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_virtual_links: Vec<AffectedVirtualLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_ext_link_ports: Vec<AffectedExtLinkPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_virtual_storages: Vec<AffectedVirtualStorage>,
}

impl ResourceChanges {
    pub fn is_empty(&self) -> bool {
        self.affected_vnfcs.is_empty()
            && self.affected_virtual_links.is_empty()
            && self.affected_ext_link_ports.is_empty()
            && self.affected_virtual_storages.is_empty()
    }
}

/// New configurable properties for one VNFC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfcInfoModification {
    pub id: String,
    pub vnfc_configurable_properties: KeyValuePairs,
}

/// Attributes changed by a modify-info operation. Unchanged fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_info: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnfd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_software_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnfd_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_info_modifications: Vec<VnfcInfoModification>,
}

impl ChangedInfo {
    pub fn is_empty(&self) -> bool {
        *self == ChangedInfo::default()
    }
}

/// Everything the differ reports for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_changes: Option<ResourceChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_info: Option<ChangedInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_ext_connectivity: Option<Vec<ExtVirtualLinkInfo>>,
}

impl ChangeRecord {
    pub fn is_empty(&self) -> bool {
        self.resource_changes.is_none()
            && self.changed_info.is_none()
            && self.changed_ext_connectivity.is_none()
    }
}
