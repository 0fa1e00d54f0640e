use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vnflcm_model::{Grant, GrantRequest, OperationRecord, VnfInstance};

/// A GrantRequest and the Grant it produced, stored as one unit keyed by
/// operation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRecord {
    pub grant_request: GrantRequest,
    pub grant: Grant,
}

impl GrantRecord {
    pub fn new(grant_request: GrantRequest, grant: Grant) -> Self {
        GrantRecord {
            grant_request,
            grant,
        }
    }

    /// The operation occurrence this pair belongs to.
    pub fn op_occ_id(&self) -> &str {
        &self.grant_request.vnf_lcm_op_occ_id
    }
}

/// The full committed contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDump {
    #[serde(default)]
    pub instances: BTreeMap<String, VnfInstance>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationRecord>,
    /// Keyed by operation occurrence id.
    #[serde(default)]
    pub grants: BTreeMap<String, GrantRecord>,
}
