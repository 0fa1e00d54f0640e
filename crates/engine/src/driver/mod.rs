//! Infrastructure driver contract.
//!
//! A driver mutates real resources for one family of VIMs and writes what it
//! built into the instance's snapshot. [`DriverRegistry`] holds one driver
//! per [`VimType`] and picks it from the instance's selected VIM connection.

mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use vnflcm_model::{
    ChangeExtConnRequest, ChangeVnfPkgRequest, Grant, GrantRequest, HealRequest,
    InstantiateRequest, InstantiatedVnfInfo, ScaleRequest, TerminateRequest, VimConnectionInfo,
    VimType, VnfInstance,
};

use crate::descriptor::Vnfd;

pub use simulated::{DriverCall, SimulatedDriver};

#[derive(Debug, Error)]
pub enum DriverError {
    /// The infrastructure call failed.
    #[error("{0}")]
    Failed(String),
    #[error("driver does not support {operation}")]
    Unsupported { operation: String },
    #[error("no driver registered for VIM type {0}")]
    NotRegistered(VimType),
    #[error("instance has no VIM connection")]
    NoVimConnection,
}

fn unsupported(operation: &str) -> DriverError {
    DriverError::Unsupported {
        operation: operation.to_string(),
    }
}

/// Infrastructure backend for one VIM family.
///
/// Every mutating method receives the request payload, the working instance
/// (whose snapshot it updates in place), the grant pair, and the descriptor
/// the operation runs against. Drivers enforce their own timeouts and report
/// them as failures.
#[async_trait]
pub trait InfraDriver: Send + Sync {
    async fn instantiate(
        &self,
        req: &InstantiateRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    async fn instantiate_rollback(
        &self,
        _req: &InstantiateRequest,
        _inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        Err(unsupported("instantiate_rollback"))
    }

    async fn scale(
        &self,
        req: &ScaleRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    /// Undo a scale-out. Scale-in has no rollback.
    async fn scale_rollback(
        &self,
        _req: &ScaleRequest,
        _inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        Err(unsupported("scale_rollback"))
    }

    async fn heal(
        &self,
        req: &HealRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    async fn terminate(
        &self,
        req: &TerminateRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    async fn change_ext_conn(
        &self,
        req: &ChangeExtConnRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    async fn change_ext_conn_rollback(
        &self,
        _req: &ChangeExtConnRequest,
        _inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        Err(unsupported("change_ext_conn_rollback"))
    }

    /// `vnfd` is the descriptor of the target package.
    async fn change_vnfpkg(
        &self,
        req: &ChangeVnfPkgRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError>;

    async fn change_vnfpkg_rollback(
        &self,
        _req: &ChangeVnfPkgRequest,
        _inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        Err(unsupported("change_vnfpkg_rollback"))
    }

    /// Whether live resources differ from the stored snapshot.
    async fn diff_check(
        &self,
        _inst: &VnfInstance,
        _vim: &VimConnectionInfo,
    ) -> Result<bool, DriverError> {
        Ok(false)
    }

    /// The live resource view, used to rewrite a drifted snapshot.
    async fn sync(
        &self,
        _inst: &VnfInstance,
        _vim: &VimConnectionInfo,
    ) -> Result<InstantiatedVnfInfo, DriverError> {
        Err(unsupported("sync"))
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// One driver slot per VIM type.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    openstack: Option<Arc<dyn InfraDriver>>,
    kubernetes: Option<Arc<dyn InfraDriver>>,
    helm: Option<Arc<dyn InfraDriver>>,
    terraform: Option<Arc<dyn InfraDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry::default()
    }

    /// Registry serving every VIM type with the same driver.
    pub fn uniform(driver: Arc<dyn InfraDriver>) -> Self {
        let mut registry = DriverRegistry::new();
        for vim_type in [
            VimType::OpenStack,
            VimType::Kubernetes,
            VimType::Helm,
            VimType::Terraform,
        ] {
            registry.register(vim_type, Arc::clone(&driver));
        }
        registry
    }

    pub fn register(&mut self, vim_type: VimType, driver: Arc<dyn InfraDriver>) {
        let slot = match vim_type {
            VimType::OpenStack => &mut self.openstack,
            VimType::Kubernetes => &mut self.kubernetes,
            VimType::Helm => &mut self.helm,
            VimType::Terraform => &mut self.terraform,
        };
        *slot = Some(driver);
    }

    pub fn get(&self, vim_type: VimType) -> Result<Arc<dyn InfraDriver>, DriverError> {
        let slot = match vim_type {
            VimType::OpenStack => &self.openstack,
            VimType::Kubernetes => &self.kubernetes,
            VimType::Helm => &self.helm,
            VimType::Terraform => &self.terraform,
        };
        slot.clone().ok_or(DriverError::NotRegistered(vim_type))
    }

    /// Driver and VIM connection for `inst`.
    pub fn for_instance(
        &self,
        inst: &VnfInstance,
    ) -> Result<(Arc<dyn InfraDriver>, VimConnectionInfo), DriverError> {
        let vim = inst.select_vim().ok_or(DriverError::NoVimConnection)?;
        Ok((self.get(vim.vim_type)?, vim.clone()))
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("openstack", &self.openstack.is_some())
            .field("kubernetes", &self.kubernetes.is_some())
            .field("helm", &self.helm.is_some())
            .field("terraform", &self.terraform.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatches_by_vim_type() {
        let mut registry = DriverRegistry::new();
        registry.register(VimType::Kubernetes, Arc::new(SimulatedDriver::new()));
        assert!(registry.get(VimType::Kubernetes).is_ok());
        assert!(matches!(
            registry.get(VimType::OpenStack),
            Err(DriverError::NotRegistered(VimType::OpenStack))
        ));
    }

    #[test]
    fn instance_without_vim_has_no_driver() {
        let registry = DriverRegistry::uniform(Arc::new(SimulatedDriver::new()));
        let mut inst = VnfInstance::new("inst-1", "vnfd-1");
        assert!(matches!(
            registry.for_instance(&inst),
            Err(DriverError::NoVimConnection)
        ));
        inst.vim_connection_info
            .insert("vim1".into(), VimConnectionInfo::new(VimType::Helm));
        let (_, vim) = registry.for_instance(&inst).unwrap();
        assert_eq!(vim.vim_type, VimType::Helm);
    }
}
