//! VNF instance and its resource snapshot.
//!
//! A [`VnfInstance`] is created NOT_INSTANTIATED and only gains an
//! [`InstantiatedVnfInfo`] once an instantiate operation completes.
//! Terminate returns it to NOT_INSTANTIATED with the snapshot removed;
//! instances are never deleted by the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::KeyValuePairs;

// ── Instance ────────────────────────────────────────────────────────

/// Instantiation state of a VNF instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstantiationState {
    NotInstantiated,
    Instantiated,
}

impl fmt::Display for InstantiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstantiationState::NotInstantiated => write!(f, "NOT_INSTANTIATED"),
            InstantiationState::Instantiated => write!(f, "INSTANTIATED"),
        }
    }
}

/// One deployed (or not yet deployed) VNF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfInstance {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_description: Option<String>,
    pub vnfd_id: String,
    #[serde(default)]
    pub vnf_provider: String,
    #[serde(default)]
    pub vnf_product_name: String,
    #[serde(default)]
    pub vnf_software_version: String,
    #[serde(default)]
    pub vnfd_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
    /// VIM connection infos keyed by connection id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vim_connection_info: BTreeMap<String, VimConnectionInfo>,
    pub instantiation_state: InstantiationState,
    /// Present only while INSTANTIATED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instantiated_vnf_info: Option<InstantiatedVnfInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
}

impl VnfInstance {
    /// A fresh NOT_INSTANTIATED instance referencing `vnfd_id`.
    pub fn new(id: impl Into<String>, vnfd_id: impl Into<String>) -> Self {
        VnfInstance {
            id: id.into(),
            vnf_instance_name: None,
            vnf_instance_description: None,
            vnfd_id: vnfd_id.into(),
            vnf_provider: String::new(),
            vnf_product_name: String::new(),
            vnf_software_version: String::new(),
            vnfd_version: String::new(),
            vnf_configurable_properties: None,
            vim_connection_info: BTreeMap::new(),
            instantiation_state: InstantiationState::NotInstantiated,
            instantiated_vnf_info: None,
            metadata: None,
            extensions: None,
        }
    }

    pub fn is_instantiated(&self) -> bool {
        self.instantiation_state == InstantiationState::Instantiated
    }

    /// The VIM connection the instance's drivers operate against.
    ///
    /// A connection keyed `"default"` wins; otherwise the first entry in
    /// key order is used.
    pub fn select_vim(&self) -> Option<&VimConnectionInfo> {
        self.vim_connection_info
            .get("default")
            .or_else(|| self.vim_connection_info.values().next())
    }

    /// Flavour of the current snapshot, if instantiated.
    pub fn flavour_id(&self) -> Option<&str> {
        self.instantiated_vnf_info
            .as_ref()
            .map(|info| info.flavour_id.as_str())
    }
}

// ── VIM connection ──────────────────────────────────────────────────

/// Closed set of infrastructure backends an instance can be deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VimType {
    #[serde(rename = "ETSINFV.OPENSTACK_KEYSTONE.V_3")]
    OpenStack,
    #[serde(rename = "ETSINFV.KUBERNETES.V_1")]
    Kubernetes,
    #[serde(rename = "ETSINFV.HELM.V_3")]
    Helm,
    #[serde(rename = "TERRAFORM.V1")]
    Terraform,
}

impl fmt::Display for VimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VimType::OpenStack => "ETSINFV.OPENSTACK_KEYSTONE.V_3",
            VimType::Kubernetes => "ETSINFV.KUBERNETES.V_1",
            VimType::Helm => "ETSINFV.HELM.V_3",
            VimType::Terraform => "TERRAFORM.V1",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimConnectionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_id: Option<String>,
    pub vim_type: VimType,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub interface_info: KeyValuePairs,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub access_info: KeyValuePairs,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: KeyValuePairs,
}

impl VimConnectionInfo {
    pub fn new(vim_type: VimType) -> Self {
        VimConnectionInfo {
            vim_id: None,
            vim_type,
            interface_info: KeyValuePairs::new(),
            access_info: KeyValuePairs::new(),
            extra: KeyValuePairs::new(),
        }
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VnfOperationalState {
    Started,
    Stopped,
}

/// Reference to a concrete resource managed by a VIM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHandle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_provider_id: Option<String>,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_level_resource_type: Option<String>,
}

impl ResourceHandle {
    pub fn new(resource_id: impl Into<String>) -> Self {
        ResourceHandle {
            vim_connection_id: None,
            resource_provider_id: None,
            resource_id: resource_id.into(),
            vim_level_resource_type: None,
        }
    }
}

/// Current level of one scaling aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleInfo {
    pub aspect_id: String,
    pub scale_level: u32,
}

/// The resource snapshot of an instantiated VNF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantiatedVnfInfo {
    pub flavour_id: String,
    pub vnf_state: VnfOperationalState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scale_status: Vec<ScaleInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub max_scale_levels: Vec<ScaleInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_cp_info: Vec<VnfExtCpInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_virtual_link_info: Vec<ExtVirtualLinkInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_managed_virtual_link_info: Vec<ExtManagedVirtualLinkInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_resource_info: Vec<VnfcResourceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnf_virtual_link_resource_info: Vec<VnfVirtualLinkResourceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_storage_resource_info: Vec<VirtualStorageResourceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_info: Vec<VnfcInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localization_language: Option<String>,
}

impl InstantiatedVnfInfo {
    /// An empty snapshot for `flavour_id` in the STARTED state.
    pub fn new(flavour_id: impl Into<String>) -> Self {
        InstantiatedVnfInfo {
            flavour_id: flavour_id.into(),
            vnf_state: VnfOperationalState::Started,
            scale_status: Vec::new(),
            max_scale_levels: Vec::new(),
            ext_cp_info: Vec::new(),
            ext_virtual_link_info: Vec::new(),
            ext_managed_virtual_link_info: Vec::new(),
            vnfc_resource_info: Vec::new(),
            vnf_virtual_link_resource_info: Vec::new(),
            virtual_storage_resource_info: Vec::new(),
            vnfc_info: Vec::new(),
            localization_language: None,
        }
    }

    pub fn vnfc(&self, id: &str) -> Option<&VnfcResourceInfo> {
        self.vnfc_resource_info.iter().find(|v| v.id == id)
    }

    pub fn storage(&self, id: &str) -> Option<&VirtualStorageResourceInfo> {
        self.virtual_storage_resource_info.iter().find(|s| s.id == id)
    }

    pub fn scale_level(&self, aspect_id: &str) -> Option<u32> {
        self.scale_status
            .iter()
            .find(|s| s.aspect_id == aspect_id)
            .map(|s| s.scale_level)
    }
}

/// One compute unit (VNFC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfcResourceInfo {
    pub id: String,
    pub vdu_id: String,
    pub compute_resource: ResourceHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_resource_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_cp_info: Vec<VnfcCpInfo>,
    /// Descriptor the VNFC was last built from. Differs between snapshots
    /// when a package change replaced the VNFC in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vnfd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<KeyValuePairs>,
}

/// A connection point attached to a VNFC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfcCpInfo {
    pub id: String,
    pub cpd_id: String,
    /// Set when the CP is exposed as an external CP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_ext_cp_id: Option<String>,
    /// Set when the CP is attached to an internal or ext-managed link port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_link_port_id: Option<String>,
}

/// An internal virtual link and its ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfVirtualLinkResourceInfo {
    pub id: String,
    pub vnf_virtual_link_desc_id: String,
    pub network_resource: ResourceHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnf_link_ports: Vec<VnfLinkPortInfo>,
}

/// A virtual link whose network is managed outside the VNF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtManagedVirtualLinkInfo {
    pub id: String,
    pub vnf_virtual_link_desc_id: String,
    pub network_resource: ResourceHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnf_link_ports: Vec<VnfLinkPortInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfLinkPortInfo {
    pub id: String,
    pub resource_handle: ResourceHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp_instance_type: Option<String>,
}

/// An external virtual link the VNF is connected to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtVirtualLinkInfo {
    pub id: String,
    pub resource_handle: ResourceHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_link_ports: Vec<ExtLinkPortInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_vnf_ext_cp_data: Vec<VnfExtCpData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtLinkPortInfo {
    pub id: String,
    pub resource_handle: ResourceHandle,
    /// Id of the external CP instance using this port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp_instance_id: Option<String>,
}

/// Configuration of the external CPs created from one CPD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfExtCpData {
    pub cpd_id: String,
    /// Keyed by cpConfigId.
    #[serde(default)]
    pub cp_config: BTreeMap<String, VnfExtCpConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfExtCpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cp_config_id: Option<String>,
    /// Pre-created ext link port to use instead of letting the driver create one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cp_protocol_data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfExtCpInfo {
    pub id: String,
    pub cpd_id: String,
    pub cp_config_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_link_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_vnfc_cp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualStorageResourceInfo {
    pub id: String,
    pub virtual_storage_desc_id: String,
    pub storage_resource: ResourceHandle,
}

/// Operator-facing information about one VNFC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnfcInfo {
    pub id: String,
    pub vdu_id: String,
    pub vnfc_resource_info_id: String,
    #[serde(default = "default_vnfc_state")]
    pub vnfc_state: VnfOperationalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnfc_configurable_properties: Option<KeyValuePairs>,
}

fn default_vnfc_state() -> VnfOperationalState {
    VnfOperationalState::Started
}
