//! Grant exchange with a grant authority.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::instance::{ResourceHandle, VimConnectionInfo};
use crate::operation::OperationKind;
use crate::KeyValuePairs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceCategory {
    Compute,
    Vl,
    Storage,
    Linkport,
}

/// A resource to add, remove or update.
///
/// Definitions for new resources carry no handle; definitions for existing
/// resources carry the handle of what is being removed or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub category: ResourceCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdu_id: Option<String>,
    /// Descriptor element this resource instantiates (VDU, VL, storage or CP).
    pub resource_template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AffinityType {
    Affinity,
    AntiAffinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceIdType {
    /// Id of a [`ResourceDefinition`] in the same request.
    Grant,
    /// Id of an existing resource managed by a VIM.
    ResMgmt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintResourceRef {
    pub id_type: ResourceIdType,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConstraint {
    pub affinity_or_anti_affinity: AffinityType,
    /// Upper-cased scope such as `ZONE` or `NFVI_NODE`.
    pub scope: String,
    pub resource: Vec<ConstraintResourceRef>,
    #[serde(default)]
    pub fallback_best_effort: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub vnf_instance_id: String,
    pub vnf_lcm_op_occ_id: String,
    pub vnfd_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavour_id: Option<String>,
    pub operation: OperationKind,
    #[serde(default)]
    pub is_automatic_invocation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instantiation_level_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_resources: Vec<ResourceDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_resources: Vec<ResourceDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_resources: Vec<ResourceDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

impl GrantRequest {
    pub fn new(
        vnf_instance_id: impl Into<String>,
        vnf_lcm_op_occ_id: impl Into<String>,
        vnfd_id: impl Into<String>,
        operation: OperationKind,
    ) -> Self {
        GrantRequest {
            vnf_instance_id: vnf_instance_id.into(),
            vnf_lcm_op_occ_id: vnf_lcm_op_occ_id.into(),
            vnfd_id: vnfd_id.into(),
            flavour_id: None,
            operation,
            is_automatic_invocation: false,
            instantiation_level_id: None,
            add_resources: Vec::new(),
            remove_resources: Vec::new(),
            update_resources: Vec::new(),
            placement_constraints: Vec::new(),
            additional_params: None,
        }
    }

    /// True when the request asks for nothing at all.
    pub fn is_empty(&self) -> bool {
        self.add_resources.is_empty()
            && self.remove_resources.is_empty()
            && self.update_resources.is_empty()
    }
}

/// Binding of one requested resource to concrete infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantInfo {
    pub resource_definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    pub id: String,
    pub zone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareImage {
    pub vnfd_software_image_id: String,
    pub vim_software_image_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VimAssets {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub software_images: Vec<SoftwareImage>,
}

/// The authority's answer to a [`GrantRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub id: String,
    pub vnf_instance_id: String,
    pub vnf_lcm_op_occ_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vim_connection_info: BTreeMap<String, VimConnectionInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ZoneInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_resources: Vec<GrantInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_resources: Vec<GrantInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_resources: Vec<GrantInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vim_assets: Option<VimAssets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<KeyValuePairs>,
}

impl Grant {
    /// Zone id bound to an added or updated resource definition.
    pub fn zone_for(&self, resource_definition_id: &str) -> Option<&str> {
        let zone_ref = self
            .add_resources
            .iter()
            .chain(self.update_resources.iter())
            .find(|g| g.resource_definition_id == resource_definition_id)?
            .zone_id
            .as_deref()?;
        self.zones
            .iter()
            .find(|z| z.id == zone_ref)
            .map(|z| z.zone_id.as_str())
    }

    /// VIM image granted for a descriptor software image.
    pub fn image_for(&self, vnfd_software_image_id: &str) -> Option<&str> {
        self.vim_assets
            .as_ref()?
            .software_images
            .iter()
            .find(|img| img.vnfd_software_image_id == vnfd_software_image_id)
            .map(|img| img.vim_software_image_id.as_str())
    }
}
