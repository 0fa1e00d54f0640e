//! VNF descriptors and the provider that serves them.
//!
//! The engine only needs the facts of a descriptor that drive lifecycle
//! decisions: VDU counts per instantiation level, connection point and
//! storage topology, scaling-aspect deltas, placement policies and
//! lifecycle script references. Template parsing is left to whoever
//! feeds the provider.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vnflcm_model::{KeyValuePairs, ScaleInfo};

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("VNF descriptor {vnfd_id} not found")]
    NotFound { vnfd_id: String },
    #[error("flavour {flavour_id} not found in VNF descriptor {vnfd_id}")]
    FlavourNotFound { vnfd_id: String, flavour_id: String },
    #[error("instantiation level {level_id} not found")]
    InstantiationLevelNotFound { level_id: String },
    #[error("scaling aspect {aspect_id} not found")]
    AspectNotFound { aspect_id: String },
}

// ──────────────────────────────────────────────
// Descriptor model
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vnfd {
    pub vnfd_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub descriptor_version: String,
    /// Defaults merged into an instance whenever it moves onto this descriptor.
    #[serde(default)]
    pub default_properties: DefaultProperties,
    pub flavours: BTreeMap<String, Flavour>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnf_configurable_properties: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<KeyValuePairs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<KeyValuePairs>,
}

/// One deployment flavour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flavour {
    #[serde(default)]
    pub vdus: BTreeMap<String, Vdu>,
    /// Internal virtual link descriptor ids.
    #[serde(default)]
    pub virtual_links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_instantiation_level: Option<String>,
    #[serde(default)]
    pub instantiation_levels: BTreeMap<String, InstantiationLevel>,
    #[serde(default)]
    pub scaling_aspects: BTreeMap<String, ScalingAspect>,
    #[serde(default)]
    pub affinity: Vec<PlacementGroup>,
    #[serde(default)]
    pub anti_affinity: Vec<PlacementGroup>,
    /// Lifecycle scripts keyed by method name, e.g. `instantiate_start`.
    #[serde(default)]
    pub interfaces: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vdu {
    #[serde(default = "default_count")]
    pub initial_count: u32,
    #[serde(default)]
    pub cps: Vec<CpDef>,
    /// Virtual storage descriptor ids attached to every VNFC of this VDU.
    #[serde(default)]
    pub storages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_image: Option<String>,
}

fn default_count() -> u32 {
    1
}

/// A VDU connection point. `virtual_link` names the internal (or
/// externally managed) link it attaches to; `None` marks an external CP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantiationLevel {
    #[serde(default)]
    pub vdu_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub scale_levels: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingAspect {
    pub max_scale_level: u32,
    /// VNFCs added per VDU for one scaling step.
    #[serde(default)]
    pub vdu_deltas: BTreeMap<String, u32>,
}

/// Targets of an affinity or anti-affinity rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub targets: Vec<String>,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    "zone".to_string()
}

impl Vnfd {
    pub fn flavour(&self, flavour_id: &str) -> Result<&Flavour, DescriptorError> {
        self.flavours
            .get(flavour_id)
            .ok_or_else(|| DescriptorError::FlavourNotFound {
                vnfd_id: self.vnfd_id.clone(),
                flavour_id: flavour_id.to_string(),
            })
    }
}

impl Flavour {
    /// The requested level, or the flavour's default when none is requested.
    pub fn resolve_level(
        &self,
        requested: Option<&str>,
    ) -> Result<Option<String>, DescriptorError> {
        match requested {
            Some(level_id) if self.instantiation_levels.contains_key(level_id) => {
                Ok(Some(level_id.to_string()))
            }
            Some(level_id) => Err(DescriptorError::InstantiationLevelNotFound {
                level_id: level_id.to_string(),
            }),
            None => Ok(self.default_instantiation_level.clone()),
        }
    }

    /// Number of VNFCs of `vdu_id` at instantiation `level`.
    pub fn vdu_count(&self, vdu_id: &str, level: Option<&str>) -> u32 {
        let from_level = level
            .and_then(|l| self.instantiation_levels.get(l))
            .and_then(|l| l.vdu_counts.get(vdu_id).copied());
        from_level
            .or_else(|| self.vdus.get(vdu_id).map(|v| v.initial_count))
            .unwrap_or(0)
    }

    /// Initial scale level of every aspect at instantiation `level`.
    pub fn scale_status(&self, level: Option<&str>) -> Vec<ScaleInfo> {
        let levels = level.and_then(|l| self.instantiation_levels.get(l));
        self.scaling_aspects
            .keys()
            .map(|aspect_id| ScaleInfo {
                aspect_id: aspect_id.clone(),
                scale_level: levels
                    .and_then(|l| l.scale_levels.get(aspect_id).copied())
                    .unwrap_or(0),
            })
            .collect()
    }

    pub fn max_scale_levels(&self) -> Vec<ScaleInfo> {
        self.scaling_aspects
            .iter()
            .map(|(aspect_id, aspect)| ScaleInfo {
                aspect_id: aspect_id.clone(),
                scale_level: aspect.max_scale_level,
            })
            .collect()
    }

    pub fn aspect(&self, aspect_id: &str) -> Result<&ScalingAspect, DescriptorError> {
        self.scaling_aspects
            .get(aspect_id)
            .ok_or_else(|| DescriptorError::AspectNotFound {
                aspect_id: aspect_id.to_string(),
            })
    }

    /// The link a VDU connection point attaches to.
    pub fn cp_link(&self, vdu_id: &str, cpd_id: &str) -> Option<&str> {
        self.vdus
            .get(vdu_id)?
            .cps
            .iter()
            .find(|cp| cp.id == cpd_id)?
            .virtual_link
            .as_deref()
    }

    pub fn script(&self, method: &str) -> Option<&str> {
        self.interfaces.get(method).map(String::as_str)
    }
}

// ──────────────────────────────────────────────
// Provider
// ──────────────────────────────────────────────

/// Read-only source of descriptors, versioned by descriptor id.
#[async_trait]
pub trait DescriptorProvider: Send + Sync {
    async fn get_vnfd(&self, vnfd_id: &str) -> Result<Vnfd, DescriptorError>;
}

/// A provider backed by a fixed set of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticDescriptorProvider {
    vnfds: BTreeMap<String, Vnfd>,
}

impl StaticDescriptorProvider {
    pub fn new(vnfds: impl IntoIterator<Item = Vnfd>) -> Self {
        Self {
            vnfds: vnfds.into_iter().map(|v| (v.vnfd_id.clone(), v)).collect(),
        }
    }

    pub fn insert(&mut self, vnfd: Vnfd) {
        self.vnfds.insert(vnfd.vnfd_id.clone(), vnfd);
    }

    pub fn vnfds(&self) -> impl Iterator<Item = &Vnfd> {
        self.vnfds.values()
    }
}

#[async_trait]
impl DescriptorProvider for StaticDescriptorProvider {
    async fn get_vnfd(&self, vnfd_id: &str) -> Result<Vnfd, DescriptorError> {
        self.vnfds
            .get(vnfd_id)
            .cloned()
            .ok_or_else(|| DescriptorError::NotFound {
                vnfd_id: vnfd_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vnfd() -> Vnfd {
        serde_json::from_value(json!({
            "vnfd_id": "vnfd-1",
            "provider": "Company",
            "flavours": {
                "simple": {
                    "vdus": {
                        "VDU1": {"cps": [{"id": "CP1"}, {"id": "CP2", "virtual_link": "internalVL1"}]},
                        "VDU2": {"initial_count": 2, "storages": ["Storage1"]}
                    },
                    "virtual_links": ["internalVL1"],
                    "default_instantiation_level": "level_small",
                    "instantiation_levels": {
                        "level_small": {"vdu_counts": {"VDU1": 1}},
                        "level_large": {"vdu_counts": {"VDU1": 3}, "scale_levels": {"worker": 2}}
                    },
                    "scaling_aspects": {
                        "worker": {"max_scale_level": 4, "vdu_deltas": {"VDU1": 1}}
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn level_counts_fall_back_to_initial_count() {
        let d = vnfd();
        let f = d.flavour("simple").unwrap();
        assert_eq!(f.vdu_count("VDU1", Some("level_large")), 3);
        assert_eq!(f.vdu_count("VDU2", Some("level_large")), 2);
        assert_eq!(f.vdu_count("VDU1", None), 1);
        assert_eq!(f.vdu_count("VDU9", None), 0);
    }

    #[test]
    fn resolve_level_prefers_request_then_default() {
        let d = vnfd();
        let f = d.flavour("simple").unwrap();
        assert_eq!(f.resolve_level(None).unwrap().as_deref(), Some("level_small"));
        assert_eq!(
            f.resolve_level(Some("level_large")).unwrap().as_deref(),
            Some("level_large")
        );
        assert!(matches!(
            f.resolve_level(Some("level_huge")),
            Err(DescriptorError::InstantiationLevelNotFound { .. })
        ));
    }

    #[test]
    fn scale_status_covers_every_aspect() {
        let d = vnfd();
        let f = d.flavour("simple").unwrap();
        assert_eq!(f.scale_status(Some("level_large"))[0].scale_level, 2);
        assert_eq!(f.scale_status(Some("level_small"))[0].scale_level, 0);
        assert_eq!(f.max_scale_levels()[0].scale_level, 4);
    }

    #[test]
    fn cp_links_and_missing_flavour() {
        let d = vnfd();
        let f = d.flavour("simple").unwrap();
        assert_eq!(f.cp_link("VDU1", "CP2"), Some("internalVL1"));
        assert_eq!(f.cp_link("VDU1", "CP1"), None);
        assert!(matches!(
            d.flavour("complex"),
            Err(DescriptorError::FlavourNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn static_provider_serves_known_descriptors() {
        let provider = StaticDescriptorProvider::new([vnfd()]);
        assert_eq!(provider.get_vnfd("vnfd-1").await.unwrap().provider, "Company");
        assert!(matches!(
            provider.get_vnfd("vnfd-2").await,
            Err(DescriptorError::NotFound { .. })
        ));
    }
}
