//! Operation request payloads.
//!
//! [`OperationParams`] is the immutable request stored on an operation
//! record. It is internally tagged by `operation`, so the record's kind
//! always matches its payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::VnfcInfoModification;
use crate::instance::{ResourceHandle, VimConnectionInfo, VnfExtCpData};
use crate::operation::OperationKind;
use crate::KeyValuePairs;

/// Request payload of an operation, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationParams {
    Instantiate(InstantiateRequest),
    Scale(ScaleRequest),
    Heal(HealRequest),
    Terminate(TerminateRequest),
    ChangeExtConn(ChangeExtConnRequest),
    ModifyInfo(ModifyInfoRequest),
    ChangeVnfpkg(ChangeVnfPkgRequest),
}

impl OperationParams {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationParams::Instantiate(_) => OperationKind::Instantiate,
            OperationParams::Scale(_) => OperationKind::Scale,
            OperationParams::Heal(_) => OperationKind::Heal,
            OperationParams::Terminate(_) => OperationKind::Terminate,
            OperationParams::ChangeExtConn(_) => OperationKind::ChangeExtConn,
            OperationParams::ModifyInfo(_) => OperationKind::ModifyInfo,
            OperationParams::ChangeVnfpkg(_) => OperationKind::ChangeVnfpkg,
        }
    }

    pub fn additional_params(&self) -> Option<&KeyValuePairs> {
        match self {
            OperationParams::Instantiate(r) => r.additional_params.as_ref(),
            OperationParams::Scale(r) => r.additional_params.as_ref(),
            OperationParams::Heal(r) => r.additional_params.as_ref(),
            OperationParams::Terminate(r) => r.additional_params.as_ref(),
            OperationParams::ChangeExtConn(r) => r.additional_params.as_ref(),
            OperationParams::ModifyInfo(_) => None,
            OperationParams::ChangeVnfpkg(r) => r.additional_params.as_ref(),
        }
    }
}

// ── External connectivity inputs ────────────────────────────────────

/// An external virtual link supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtVirtualLinkData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_provider_id: Option<String>,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_cps: Vec<VnfExtCpData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_link_ports: Vec<ExtLinkPortData>,
}

impl ExtVirtualLinkData {
    /// Every CPD id configured on this link.
    pub fn cpd_ids(&self) -> impl Iterator<Item = &str> {
        self.ext_cps.iter().map(|cp| cp.cpd_id.as_str())
    }

    /// CPD ids whose configuration references a pre-created link port.
    pub fn cpd_ids_with_link_port(&self) -> impl Iterator<Item = &str> {
        self.ext_cps
            .iter()
            .filter(|cp| cp.cp_config.values().any(|c| c.link_port_id.is_some()))
            .map(|cp| cp.cpd_id.as_str())
    }
}

/// A pre-created port on an external virtual link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtLinkPortData {
    pub id: String,
    pub resource_handle: ResourceHandle,
}

/// An externally managed internal virtual link supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtManagedVirtualLinkData {
    pub id: String,
    pub vnf_virtual_link_desc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_provider_id: Option<String>,
    pub resource_id: String,
}

// ── Per-kind requests ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantiateRequest {
    pub flavour_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instantiation_level_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_virtual_links: Vec<ExtVirtualLinkData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_managed_virtual_links: Vec<ExtManagedVirtualLinkData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vim_connection_info: BTreeMap<String, VimConnectionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localization_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
}

impl InstantiateRequest {
    pub fn new(flavour_id: impl Into<String>) -> Self {
        InstantiateRequest {
            flavour_id: flavour_id.into(),
            instantiation_level_id: None,
            ext_virtual_links: Vec::new(),
            ext_managed_virtual_links: Vec::new(),
            vim_connection_info: BTreeMap::new(),
            localization_language: None,
            additional_params: None,
            extensions: None,
            vnf_configurable_properties: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleType {
    ScaleOut,
    ScaleIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRequest {
    #[serde(rename = "type")]
    pub scale_type: ScaleType,
    pub aspect_id: String,
    #[serde(default = "default_steps")]
    pub number_of_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

fn default_steps() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealRequest {
    /// Targeted VNFCs. Empty means the whole VNF.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_instance_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

impl HealRequest {
    /// `additionalParams.all`: also re-create storages (and, for a whole-VNF
    /// heal, every virtual link).
    pub fn all(&self) -> bool {
        self.additional_params
            .as_ref()
            .and_then(|p| p.get("all"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationType {
    Forceful,
    Graceful,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateRequest {
    pub termination_type: TerminationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful_termination_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeExtConnRequest {
    pub ext_virtual_links: Vec<ExtVirtualLinkData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vim_connection_info: BTreeMap<String, VimConnectionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

/// Metadata-only modification. Every field is a partial update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyInfoRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_instance_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnfd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
    /// Must be a JSON object; checked by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
    /// Merge-patch per connection id; `null` removes the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_info: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vnfc_info_modifications: Vec<VnfcInfoModification>,
}

/// Per-VDU parameters of a rolling package update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VduParam {
    pub vdu_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_vnfc_param: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_vnfc_param: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeVnfPkgRequest {
    pub vnfd_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_virtual_links: Vec<ExtVirtualLinkData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ext_managed_virtual_links: Vec<ExtManagedVirtualLinkData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vim_connection_info: BTreeMap<String, VimConnectionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
}

impl ChangeVnfPkgRequest {
    /// `additionalParams.upgrade_type`, e.g. `RollingUpdate`.
    pub fn upgrade_type(&self) -> Option<&str> {
        self.additional_params
            .as_ref()
            .and_then(|p| p.get("upgrade_type"))
            .and_then(|v| v.as_str())
    }

    /// `additionalParams.vdu_params`. Malformed entries are an error.
    pub fn vdu_params(&self) -> Result<Vec<VduParam>, serde_json::Error> {
        match self
            .additional_params
            .as_ref()
            .and_then(|p| p.get("vdu_params"))
        {
            Some(v) => serde_json::from_value(v.clone()),
            None => Ok(Vec::new()),
        }
    }
}
