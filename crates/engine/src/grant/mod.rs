//! Grant negotiation.
//!
//! Every resource-affecting operation asks an authority for permission
//! before any infrastructure call. [`GrantBroker`] builds the request for
//! the operation kind and hands it to the configured [`GrantAuthority`].

mod authority;
mod builder;

use std::sync::Arc;

use tracing::info;
use vnflcm_model::{Grant, GrantRequest, OperationRecord, VnfInstance};

use crate::config::{GrantAuthorityKind, GrantConfig};
use crate::descriptor::Vnfd;
use crate::error::LcmError;

pub use authority::{GrantAuthority, GrantError, HttpGrantAuthority, LocalGrantAuthority};
pub use builder::build_grant_request;

#[derive(Clone)]
pub struct GrantBroker {
    authority: Arc<dyn GrantAuthority>,
    fallback_best_effort: bool,
}

impl GrantBroker {
    pub fn new(authority: Arc<dyn GrantAuthority>, fallback_best_effort: bool) -> Self {
        GrantBroker {
            authority,
            fallback_best_effort,
        }
    }

    /// Broker backed by the authority named in `[grant]`.
    pub fn from_config(config: &GrantConfig) -> Result<Self, LcmError> {
        let authority: Arc<dyn GrantAuthority> = match config.authority {
            GrantAuthorityKind::Local => {
                Arc::new(LocalGrantAuthority::new(config.default_zone.clone()))
            }
            GrantAuthorityKind::Http => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    LcmError::Validation("http grant authority requires an endpoint".to_string())
                })?;
                Arc::new(HttpGrantAuthority::new(endpoint, config.auth_token.clone()))
            }
        };
        Ok(GrantBroker::new(authority, config.placement_fallback_best_effort))
    }

    pub fn build_request(
        &self,
        record: &OperationRecord,
        instance: &VnfInstance,
        vnfd: &Vnfd,
    ) -> Result<GrantRequest, LcmError> {
        build_grant_request(record, instance, vnfd, self.fallback_best_effort)
    }

    /// Build the request and obtain a grant for it.
    pub async fn request_grant(
        &self,
        record: &OperationRecord,
        instance: &VnfInstance,
        vnfd: &Vnfd,
    ) -> Result<(GrantRequest, Grant), LcmError> {
        let request = self.build_request(record, instance, vnfd)?;
        info!(
            vnf_lcm_op_occ_id = %record.id,
            operation = %record.operation(),
            add = request.add_resources.len(),
            remove = request.remove_resources.len(),
            update = request.update_resources.len(),
            "requesting grant"
        );
        let grant = self.authority.request_grant(&request).await?;
        info!(vnf_lcm_op_occ_id = %record.id, grant_id = %grant.id, "grant received");
        Ok((request, grant))
    }
}

impl std::fmt::Debug for GrantBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantBroker")
            .field("fallback_best_effort", &self.fallback_best_effort)
            .finish_non_exhaustive()
    }
}
