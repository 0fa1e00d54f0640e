//! Grant authorities: the in-process approver and the HTTP client for an
//! external NFVO.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use vnflcm_model::{Grant, GrantInfo, GrantRequest, ResourceDefinition, ZoneInfo};

#[derive(Debug, Error)]
pub enum GrantError {
    /// The authority refused the request.
    #[error("grant denied: {0}")]
    Denied(String),
    /// The authority could not be reached or answered unexpectedly.
    #[error("grant authority unavailable: {0}")]
    Unavailable(String),
}

/// Approves or denies resource requests before any infrastructure is touched.
#[async_trait]
pub trait GrantAuthority: Send + Sync {
    async fn request_grant(&self, request: &GrantRequest) -> Result<Grant, GrantError>;
}

// ── Local authority ──────────────────────────────────────────────────────────

/// Approves every request in-process. When a default zone is configured,
/// every added and updated resource is bound to it.
#[derive(Debug, Clone, Default)]
pub struct LocalGrantAuthority {
    default_zone: Option<String>,
}

impl LocalGrantAuthority {
    pub fn new(default_zone: Option<String>) -> Self {
        LocalGrantAuthority { default_zone }
    }
}

fn grant_info(def: &ResourceDefinition, zone_ref: Option<&str>) -> GrantInfo {
    GrantInfo {
        resource_definition_id: def.id.clone(),
        vim_connection_id: None,
        zone_id: zone_ref.map(str::to_string),
        resource_provider_id: None,
    }
}

#[async_trait]
impl GrantAuthority for LocalGrantAuthority {
    async fn request_grant(&self, request: &GrantRequest) -> Result<Grant, GrantError> {
        let zones: Vec<ZoneInfo> = self
            .default_zone
            .iter()
            .map(|zone| ZoneInfo {
                id: "zone-0".to_string(),
                zone_id: zone.clone(),
                vim_connection_id: None,
            })
            .collect();
        let zone_ref = zones.first().map(|z| z.id.as_str());

        let grant = Grant {
            id: Uuid::new_v4().to_string(),
            vnf_instance_id: request.vnf_instance_id.clone(),
            vnf_lcm_op_occ_id: request.vnf_lcm_op_occ_id.clone(),
            vim_connection_info: Default::default(),
            add_resources: request
                .add_resources
                .iter()
                .map(|d| grant_info(d, zone_ref))
                .collect(),
            remove_resources: request
                .remove_resources
                .iter()
                .map(|d| grant_info(d, None))
                .collect(),
            update_resources: request
                .update_resources
                .iter()
                .map(|d| grant_info(d, zone_ref))
                .collect(),
            zones,
            vim_assets: None,
            additional_params: None,
        };
        debug!(grant_id = %grant.id, vnf_lcm_op_occ_id = %grant.vnf_lcm_op_occ_id, "local grant issued");
        Ok(grant)
    }
}

// ── HTTP authority ───────────────────────────────────────────────────────────

/// POSTs grant requests to an external authority and expects
/// `201 Created` with the grant as body.
#[derive(Debug, Clone)]
pub struct HttpGrantAuthority {
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpGrantAuthority {
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Self {
        HttpGrantAuthority {
            endpoint: endpoint.into(),
            auth_token,
        }
    }

    fn post_blocking(&self, request: &GrantRequest) -> Result<Grant, GrantError> {
        let agent = ureq::Agent::new_with_defaults();
        let mut call = agent.post(&self.endpoint).header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            call = call.header("Authorization", &format!("Bearer {}", token));
        }
        match call.send_json(request) {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status != 201 {
                    return Err(GrantError::Unavailable(format!(
                        "unexpected status {} from {}",
                        status, self.endpoint
                    )));
                }
                resp.into_body()
                    .read_json::<Grant>()
                    .map_err(|e| GrantError::Unavailable(format!("malformed grant: {}", e)))
            }
            Err(ureq::Error::StatusCode(403)) => Err(GrantError::Denied(format!(
                "{} refused grant for operation {}",
                self.endpoint, request.vnf_lcm_op_occ_id
            ))),
            Err(ureq::Error::StatusCode(code)) => Err(GrantError::Unavailable(format!(
                "{} returned status {}",
                self.endpoint, code
            ))),
            Err(e) => Err(GrantError::Unavailable(format!(
                "request to {} failed: {}",
                self.endpoint, e
            ))),
        }
    }
}

#[async_trait]
impl GrantAuthority for HttpGrantAuthority {
    async fn request_grant(&self, request: &GrantRequest) -> Result<Grant, GrantError> {
        let this = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || this.post_blocking(&request))
            .await
            .map_err(|e| {
                warn!(error = %e, "grant request task failed");
                GrantError::Unavailable(format!("grant request task failed: {}", e))
            })?
    }
}
