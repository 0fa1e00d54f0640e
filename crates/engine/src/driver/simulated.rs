//! An in-memory VIM.
//!
//! `SimulatedDriver` materialises granted resources into the snapshot with
//! synthetic handles, keeps the "live" resource view of every instance it
//! manages, and records each call. Tests and the CLI use it in place of a
//! real backend; failures and drift can be injected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use vnflcm_model::{
    ChangeExtConnRequest, ChangeVnfPkgRequest, ExtLinkPortInfo, ExtManagedVirtualLinkInfo,
    ExtVirtualLinkInfo, Grant, GrantRequest, HealRequest, InstantiateRequest,
    InstantiatedVnfInfo, ResourceCategory, ResourceDefinition, ResourceHandle, ScaleRequest,
    ScaleType, TerminateRequest, VimConnectionInfo, VirtualStorageResourceInfo, VnfExtCpInfo,
    VnfInstance, VnfLinkPortInfo, VnfOperationalState, VnfVirtualLinkResourceInfo, VnfcCpInfo,
    VnfcInfo, VnfcResourceInfo,
};

use super::{DriverError, InfraDriver};
use crate::descriptor::{CpDef, Flavour, Vnfd};

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub method: &'static str,
    pub vnf_instance_id: String,
}

#[derive(Debug, Default)]
struct SimState {
    live: BTreeMap<String, InstantiatedVnfInfo>,
    /// Snapshots saved before a change that has a restoring rollback.
    backups: BTreeMap<String, InstantiatedVnfInfo>,
    calls: Vec<DriverCall>,
    inspections: BTreeMap<String, usize>,
    failures: BTreeSet<&'static str>,
    seq: u64,
}

/// In-memory infrastructure driver. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        SimulatedDriver::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and consume an injected failure for `method`.
    fn enter(
        &self,
        method: &'static str,
        instance_id: &str,
    ) -> Result<MutexGuard<'_, SimState>, DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall {
            method,
            vnf_instance_id: instance_id.to_string(),
        });
        debug!(vnf_instance_id = %instance_id, method, "simulated driver call");
        if state.failures.remove(method) {
            return Err(DriverError::Failed(format!(
                "injected failure in {} for {}",
                method, instance_id
            )));
        }
        Ok(state)
    }

    /// Make the next call of `method` fail.
    pub fn fail_next(&self, method: &'static str) {
        self.lock().failures.insert(method);
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// How many times drift detection inspected `instance_id`.
    pub fn inspections(&self, instance_id: &str) -> usize {
        self.lock().inspections.get(instance_id).copied().unwrap_or(0)
    }

    /// The live resource view of an instance.
    pub fn live(&self, instance_id: &str) -> Option<InstantiatedVnfInfo> {
        self.lock().live.get(instance_id).cloned()
    }

    /// Mutate the live view behind the engine's back.
    pub fn inject_drift(&self, instance_id: &str, f: impl FnOnce(&mut InstantiatedVnfInfo)) {
        if let Some(info) = self.lock().live.get_mut(instance_id) {
            f(info);
        }
    }

    /// Live views of every managed instance.
    pub fn export(&self) -> BTreeMap<String, InstantiatedVnfInfo> {
        self.lock().live.clone()
    }

    /// Replace the live views, e.g. when loading a saved state file.
    pub fn import(&self, live: BTreeMap<String, InstantiatedVnfInfo>) {
        self.lock().live = live;
    }
}

// ── Resource construction ────────────────────────────────────────────────────

fn vim_key(inst: &VnfInstance) -> Option<String> {
    if inst.vim_connection_info.contains_key("default") {
        return Some("default".to_string());
    }
    inst.vim_connection_info.keys().next().cloned()
}

impl SimState {
    fn handle(&mut self, vim: &Option<String>, kind: &str) -> ResourceHandle {
        self.seq += 1;
        let mut handle = ResourceHandle::new(format!("sim-{}-{:04}", kind, self.seq));
        handle.vim_connection_id = vim.clone();
        handle.vim_level_resource_type = Some(kind.to_string());
        handle
    }

    /// Build one VNFC for a granted COMPUTE definition and attach its CPs
    /// and storages. The VNFC takes the definition id.
    fn add_vnfc(
        &mut self,
        info: &mut InstantiatedVnfInfo,
        def: &ResourceDefinition,
        grant_req: &GrantRequest,
        grant: &Grant,
        flavour: &Flavour,
        vim: &Option<String>,
        vnfd_id: &str,
    ) {
        let vnfc_id = def.id.clone();
        let vdu_id = def.resource_template_id.clone();
        let vdu = flavour.vdus.get(&vdu_id);

        let mut storage_ids = Vec::new();
        for storage_def in grant_req.add_resources.iter().filter(|d| {
            d.category == ResourceCategory::Storage && d.id.ends_with(&format!("-{}", vnfc_id))
        }) {
            let storage_resource = self.handle(vim, "volume");
            info.virtual_storage_resource_info.push(VirtualStorageResourceInfo {
                id: storage_def.id.clone(),
                virtual_storage_desc_id: storage_def.resource_template_id.clone(),
                storage_resource,
            });
            storage_ids.push(storage_def.id.clone());
        }

        let cps: Vec<CpDef> = vdu.map(|v| v.cps.clone()).unwrap_or_default();
        let vnfc_cp_info = cps
            .iter()
            .map(|cp| self.attach_cp(info, &vnfc_id, cp, vim))
            .collect();

        let mut metadata = vnflcm_model::KeyValuePairs::new();
        if let Some(zone) = grant.zone_for(&def.id) {
            metadata.insert("zone".into(), zone.into());
        }
        if let Some(image) = vdu
            .and_then(|v| v.software_image.as_deref())
            .and_then(|img| grant.image_for(img))
        {
            metadata.insert("image".into(), image.into());
        }

        let compute_resource = self.handle(vim, "server");
        info.vnfc_resource_info.insert(
            0,
            VnfcResourceInfo {
                id: vnfc_id.clone(),
                vdu_id: vdu_id.clone(),
                compute_resource,
                storage_resource_ids: storage_ids,
                vnfc_cp_info,
                current_vnfd_id: Some(vnfd_id.to_string()),
                metadata: (!metadata.is_empty()).then_some(metadata),
            },
        );
        info.vnfc_info.insert(
            0,
            VnfcInfo {
                id: format!("{}-{}", vdu_id, vnfc_id),
                vdu_id,
                vnfc_resource_info_id: vnfc_id,
                vnfc_state: VnfOperationalState::Started,
                vnfc_configurable_properties: None,
            },
        );
    }

    /// Attach one VDU connection point: to an external link when an ext CP
    /// configuration names its CPD, otherwise to its internal or externally
    /// managed link.
    fn attach_cp(
        &mut self,
        info: &mut InstantiatedVnfInfo,
        vnfc_id: &str,
        cp: &CpDef,
        vim: &Option<String>,
    ) -> VnfcCpInfo {
        let cp_info_id = format!("{}-{}", cp.id, vnfc_id);
        let port_id = format!("{}-{}", cp.id, vnfc_id);
        let mut out = VnfcCpInfo {
            id: cp_info_id.clone(),
            cpd_id: cp.id.clone(),
            vnf_ext_cp_id: None,
            vnf_link_port_id: None,
        };

        let ext = info.ext_virtual_link_info.iter().position(|vl| {
            vl.current_vnf_ext_cp_data
                .iter()
                .any(|data| data.cpd_id == cp.id)
        });
        if let Some(idx) = ext {
            let config = info.ext_virtual_link_info[idx]
                .current_vnf_ext_cp_data
                .iter()
                .find(|data| data.cpd_id == cp.id)
                .and_then(|data| data.cp_config.iter().next())
                .map(|(id, config)| (id.clone(), config.link_port_id.clone()));
            let (cp_config_id, pre_created) =
                config.unwrap_or_else(|| ("default".to_string(), None));
            let ext_cp_id = format!("ext-{}", cp_info_id);
            let link_port_id = match pre_created {
                Some(existing) => {
                    if let Some(port) = info.ext_virtual_link_info[idx]
                        .ext_link_ports
                        .iter_mut()
                        .find(|p| p.id == existing)
                    {
                        port.cp_instance_id = Some(ext_cp_id.clone());
                    }
                    existing
                }
                None => {
                    let resource_handle = self.handle(vim, "port");
                    info.ext_virtual_link_info[idx].ext_link_ports.push(ExtLinkPortInfo {
                        id: port_id.clone(),
                        resource_handle,
                        cp_instance_id: Some(ext_cp_id.clone()),
                    });
                    port_id
                }
            };
            info.ext_cp_info.push(VnfExtCpInfo {
                id: ext_cp_id.clone(),
                cpd_id: cp.id.clone(),
                cp_config_id,
                ext_link_port_id: Some(link_port_id),
                associated_vnfc_cp_id: Some(cp_info_id),
            });
            out.vnf_ext_cp_id = Some(ext_cp_id);
            return out;
        }

        let Some(link) = &cp.virtual_link else {
            return out;
        };
        let port = VnfLinkPortInfo {
            id: port_id.clone(),
            resource_handle: self.handle(vim, "port"),
            cp_instance_id: Some(cp_info_id),
            cp_instance_type: Some("VNFC_CP".to_string()),
        };
        if let Some(vl) = info
            .vnf_virtual_link_resource_info
            .iter_mut()
            .find(|vl| &vl.vnf_virtual_link_desc_id == link)
        {
            vl.vnf_link_ports.push(port);
            out.vnf_link_port_id = Some(port_id);
        } else if let Some(vl) = info
            .ext_managed_virtual_link_info
            .iter_mut()
            .find(|vl| &vl.vnf_virtual_link_desc_id == link)
        {
            vl.vnf_link_ports.push(port);
            out.vnf_link_port_id = Some(port_id);
        }
        out
    }
}

/// Drop an external CP and the ext link port bound to it. Ports the caller
/// pre-created stay on their link, unbound.
fn detach_ext_cp(info: &mut InstantiatedVnfInfo, ext_cp_id: &str) {
    info.ext_cp_info.retain(|cp| cp.id != ext_cp_id);
    for vl in &mut info.ext_virtual_link_info {
        let pre_created: BTreeSet<String> = vl
            .current_vnf_ext_cp_data
            .iter()
            .flat_map(|data| data.cp_config.values())
            .filter_map(|c| c.link_port_id.clone())
            .collect();
        vl.ext_link_ports.retain_mut(|port| {
            if port.cp_instance_id.as_deref() != Some(ext_cp_id) {
                return true;
            }
            if pre_created.contains(&port.id) {
                port.cp_instance_id = None;
                return true;
            }
            false
        });
    }
}

fn remove_vnfc(info: &mut InstantiatedVnfInfo, vnfc_id: &str) {
    let Some(pos) = info.vnfc_resource_info.iter().position(|v| v.id == vnfc_id) else {
        return;
    };
    let vnfc = info.vnfc_resource_info.remove(pos);
    info.virtual_storage_resource_info
        .retain(|s| !vnfc.storage_resource_ids.contains(&s.id));
    for cp in &vnfc.vnfc_cp_info {
        if let Some(port_id) = &cp.vnf_link_port_id {
            for vl in &mut info.vnf_virtual_link_resource_info {
                vl.vnf_link_ports.retain(|p| &p.id != port_id);
            }
            for vl in &mut info.ext_managed_virtual_link_info {
                vl.vnf_link_ports.retain(|p| &p.id != port_id);
            }
        }
        if let Some(ext_cp_id) = &cp.vnf_ext_cp_id {
            detach_ext_cp(info, ext_cp_id);
        }
    }
    info.vnfc_info.retain(|v| v.vnfc_resource_info_id != vnfc.id);
}

fn removed_computes(grant_req: &GrantRequest) -> impl Iterator<Item = &str> {
    grant_req
        .remove_resources
        .iter()
        .filter(|d| d.category == ResourceCategory::Compute)
        .filter_map(|d| d.resource.as_ref().map(|r| r.resource_id.as_str()))
}

fn vnfc_by_resource<'a>(
    info: &'a mut InstantiatedVnfInfo,
    resource_id: &str,
) -> Option<&'a mut VnfcResourceInfo> {
    info.vnfc_resource_info
        .iter_mut()
        .find(|v| v.compute_resource.resource_id == resource_id)
}

fn snapshot_mut(inst: &mut VnfInstance) -> Result<&mut InstantiatedVnfInfo, DriverError> {
    let id = inst.id.clone();
    inst.instantiated_vnf_info
        .as_mut()
        .ok_or_else(|| DriverError::Failed(format!("VNF instance {} has no resources", id)))
}

fn flavour_of<'a>(vnfd: &'a Vnfd, flavour_id: &str) -> Result<&'a Flavour, DriverError> {
    vnfd.flavour(flavour_id)
        .map_err(|e| DriverError::Failed(e.to_string()))
}

/// Re-create the compute (and, when granted, storages) behind the VNFCs
/// named by the remove definitions. Ids are kept.
fn replace_resources(
    state: &mut SimState,
    info: &mut InstantiatedVnfInfo,
    grant_req: &GrantRequest,
    vim: &Option<String>,
    vnfd_id: Option<&str>,
) {
    let targets: Vec<String> = removed_computes(grant_req).map(str::to_string).collect();
    for resource_id in targets {
        let compute = state.handle(vim, "server");
        let Some(vnfc) = vnfc_by_resource(info, &resource_id) else {
            continue;
        };
        vnfc.compute_resource = compute;
        if let Some(id) = vnfd_id {
            vnfc.current_vnfd_id = Some(id.to_string());
        }
    }
    let storages: Vec<String> = grant_req
        .remove_resources
        .iter()
        .filter(|d| d.category == ResourceCategory::Storage)
        .filter_map(|d| d.resource.as_ref().map(|r| r.resource_id.clone()))
        .collect();
    for resource_id in storages {
        let volume = state.handle(vim, "volume");
        if let Some(storage) = info
            .virtual_storage_resource_info
            .iter_mut()
            .find(|s| s.storage_resource.resource_id == resource_id)
        {
            storage.storage_resource = volume;
        }
    }
}

/// Bookkeeping fields (scale status, localization) belong to the engine, so
/// only resource lists take part in drift detection.
fn same_resources(a: &InstantiatedVnfInfo, b: &InstantiatedVnfInfo) -> bool {
    a.vnfc_resource_info == b.vnfc_resource_info
        && a.vnf_virtual_link_resource_info == b.vnf_virtual_link_resource_info
        && a.virtual_storage_resource_info == b.virtual_storage_resource_info
        && a.ext_virtual_link_info == b.ext_virtual_link_info
        && a.ext_managed_virtual_link_info == b.ext_managed_virtual_link_info
        && a.ext_cp_info == b.ext_cp_info
}

// ── InfraDriver ──────────────────────────────────────────────────────────────

#[async_trait]
impl InfraDriver for SimulatedDriver {
    async fn instantiate(
        &self,
        req: &InstantiateRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("instantiate", &inst.id)?;
        let flavour = flavour_of(vnfd, &req.flavour_id)?;
        let vim = vim_key(inst);
        let mut info = InstantiatedVnfInfo::new(&req.flavour_id);

        for link in &req.ext_virtual_links {
            let mut resource_handle = ResourceHandle::new(&link.resource_id);
            resource_handle.vim_connection_id =
                link.vim_connection_id.clone().or_else(|| vim.clone());
            info.ext_virtual_link_info.push(ExtVirtualLinkInfo {
                id: link.id.clone(),
                resource_handle,
                ext_link_ports: link
                    .ext_link_ports
                    .iter()
                    .map(|p| ExtLinkPortInfo {
                        id: p.id.clone(),
                        resource_handle: p.resource_handle.clone(),
                        cp_instance_id: None,
                    })
                    .collect(),
                current_vnf_ext_cp_data: link.ext_cps.clone(),
            });
        }
        for link in &req.ext_managed_virtual_links {
            let mut network_resource = ResourceHandle::new(&link.resource_id);
            network_resource.vim_connection_id =
                link.vim_connection_id.clone().or_else(|| vim.clone());
            info.ext_managed_virtual_link_info.push(ExtManagedVirtualLinkInfo {
                id: link.id.clone(),
                vnf_virtual_link_desc_id: link.vnf_virtual_link_desc_id.clone(),
                network_resource,
                vnf_link_ports: Vec::new(),
            });
        }
        for def in grant_req
            .add_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Vl)
        {
            let network_resource = state.handle(&vim, "network");
            info.vnf_virtual_link_resource_info.push(VnfVirtualLinkResourceInfo {
                id: def.id.clone(),
                vnf_virtual_link_desc_id: def.resource_template_id.clone(),
                network_resource,
                vnf_link_ports: Vec::new(),
            });
        }
        for def in grant_req
            .add_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Compute)
        {
            state.add_vnfc(&mut info, def, grant_req, grant, flavour, &vim, &inst.vnfd_id);
        }

        state.live.insert(inst.id.clone(), info.clone());
        inst.instantiated_vnf_info = Some(info);
        Ok(())
    }

    async fn instantiate_rollback(
        &self,
        _req: &InstantiateRequest,
        inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("instantiate_rollback", &inst.id)?;
        state.live.remove(&inst.id);
        inst.instantiated_vnf_info = None;
        Ok(())
    }

    async fn scale(
        &self,
        req: &ScaleRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        grant: &Grant,
        vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("scale", &inst.id)?;
        let vim = vim_key(inst);
        let vnfd_id = inst.vnfd_id.clone();
        let instance_id = inst.id.clone();
        let info = snapshot_mut(inst)?;
        match req.scale_type {
            ScaleType::ScaleOut => {
                let flavour = flavour_of(vnfd, &info.flavour_id)?;
                for def in grant_req
                    .add_resources
                    .iter()
                    .filter(|d| d.category == ResourceCategory::Compute)
                {
                    state.add_vnfc(info, def, grant_req, grant, flavour, &vim, &vnfd_id);
                }
            }
            ScaleType::ScaleIn => {
                let targets: Vec<String> = removed_computes(grant_req)
                    .filter_map(|rid| {
                        info.vnfc_resource_info
                            .iter()
                            .find(|v| v.compute_resource.resource_id == rid)
                            .map(|v| v.id.clone())
                    })
                    .collect();
                for vnfc_id in targets {
                    remove_vnfc(info, &vnfc_id);
                }
            }
        }
        state.live.insert(instance_id, info.clone());
        Ok(())
    }

    async fn scale_rollback(
        &self,
        req: &ScaleRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        if req.scale_type == ScaleType::ScaleIn {
            return Err(DriverError::Unsupported {
                operation: "scale_rollback for SCALE_IN".to_string(),
            });
        }
        let mut state = self.enter("scale_rollback", &inst.id)?;
        let instance_id = inst.id.clone();
        let info = snapshot_mut(inst)?;
        for def in grant_req
            .add_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Compute)
        {
            remove_vnfc(info, &def.id);
        }
        state.live.insert(instance_id, info.clone());
        Ok(())
    }

    async fn heal(
        &self,
        _req: &HealRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("heal", &inst.id)?;
        let vim = vim_key(inst);
        let instance_id = inst.id.clone();
        let info = snapshot_mut(inst)?;
        replace_resources(&mut state, info, grant_req, &vim, None);

        let links: Vec<String> = grant_req
            .remove_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Vl)
            .filter_map(|d| d.resource.as_ref().map(|r| r.resource_id.clone()))
            .collect();
        for resource_id in links {
            let network = state.handle(&vim, "network");
            if let Some(vl) = info
                .vnf_virtual_link_resource_info
                .iter_mut()
                .find(|vl| vl.network_resource.resource_id == resource_id)
            {
                vl.network_resource = network;
            }
        }
        state.live.insert(instance_id, info.clone());
        Ok(())
    }

    async fn terminate(
        &self,
        _req: &TerminateRequest,
        inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("terminate", &inst.id)?;
        state.live.remove(&inst.id);
        if let Some(info) = inst.instantiated_vnf_info.as_mut() {
            info.vnfc_resource_info.clear();
            info.vnfc_info.clear();
            info.virtual_storage_resource_info.clear();
            info.vnf_virtual_link_resource_info.clear();
            info.ext_managed_virtual_link_info.clear();
            info.ext_virtual_link_info.clear();
            info.ext_cp_info.clear();
        }
        Ok(())
    }

    async fn change_ext_conn(
        &self,
        req: &ChangeExtConnRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("change_ext_conn", &inst.id)?;
        let vim = vim_key(inst);
        let instance_id = inst.id.clone();
        let info = snapshot_mut(inst)?;
        state.backups.insert(instance_id.clone(), info.clone());

        // Install the requested link definitions.
        for link in &req.ext_virtual_links {
            let mut resource_handle = ResourceHandle::new(&link.resource_id);
            resource_handle.vim_connection_id =
                link.vim_connection_id.clone().or_else(|| vim.clone());
            let pre_created: Vec<ExtLinkPortInfo> = link
                .ext_link_ports
                .iter()
                .map(|p| ExtLinkPortInfo {
                    id: p.id.clone(),
                    resource_handle: p.resource_handle.clone(),
                    cp_instance_id: None,
                })
                .collect();
            match info.ext_virtual_link_info.iter_mut().find(|vl| vl.id == link.id) {
                Some(vl) => {
                    vl.resource_handle = resource_handle;
                    vl.current_vnf_ext_cp_data = link.ext_cps.clone();
                    for port in pre_created {
                        if !vl.ext_link_ports.iter().any(|p| p.id == port.id) {
                            vl.ext_link_ports.push(port);
                        }
                    }
                }
                None => info.ext_virtual_link_info.push(ExtVirtualLinkInfo {
                    id: link.id.clone(),
                    resource_handle,
                    ext_link_ports: pre_created,
                    current_vnf_ext_cp_data: link.ext_cps.clone(),
                }),
            }
        }
        // Other links stop carrying the moved CPDs.
        let moved: BTreeSet<&str> = req
            .ext_virtual_links
            .iter()
            .flat_map(|vl| vl.cpd_ids())
            .collect();
        let requested: BTreeSet<&str> = req
            .ext_virtual_links
            .iter()
            .map(|vl| vl.id.as_str())
            .collect();
        for vl in &mut info.ext_virtual_link_info {
            if !requested.contains(vl.id.as_str()) {
                vl.current_vnf_ext_cp_data
                    .retain(|data| !moved.contains(data.cpd_id.as_str()));
            }
        }

        // Rebind the moved CPs of every updated VNFC. New ports are named
        // after the update definition, as in the grant request.
        let updated: Vec<(String, String)> = grant_req
            .update_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Compute)
            .filter_map(|d| {
                d.resource
                    .as_ref()
                    .map(|r| (d.id.clone(), r.resource_id.clone()))
            })
            .collect();
        for (update_id, resource_id) in updated {
            let Some(vnfc) = info
                .vnfc_resource_info
                .iter()
                .find(|v| v.compute_resource.resource_id == resource_id)
                .cloned()
            else {
                continue;
            };
            let mut cps = Vec::with_capacity(vnfc.vnfc_cp_info.len());
            for cp in &vnfc.vnfc_cp_info {
                if !moved.contains(cp.cpd_id.as_str()) {
                    cps.push(cp.clone());
                    continue;
                }
                if let Some(ext_cp_id) = &cp.vnf_ext_cp_id {
                    detach_ext_cp(info, ext_cp_id);
                }
                let def = CpDef {
                    id: cp.cpd_id.clone(),
                    virtual_link: None,
                };
                let rebound = state.attach_cp(info, &update_id, &def, &vim);
                if let Some(ext_cp) = info
                    .ext_cp_info
                    .iter_mut()
                    .find(|e| Some(&e.id) == rebound.vnf_ext_cp_id.as_ref())
                {
                    ext_cp.associated_vnfc_cp_id = Some(cp.id.clone());
                }
                cps.push(VnfcCpInfo {
                    id: cp.id.clone(),
                    ..rebound
                });
            }
            if let Some(target) = info.vnfc_resource_info.iter_mut().find(|v| v.id == vnfc.id) {
                target.vnfc_cp_info = cps;
            }
        }
        // Links left without ports or CP configuration are released.
        info.ext_virtual_link_info.retain(|vl| {
            requested.contains(vl.id.as_str())
                || !vl.ext_link_ports.is_empty()
                || !vl.current_vnf_ext_cp_data.is_empty()
        });

        state.live.insert(instance_id, info.clone());
        Ok(())
    }

    async fn change_ext_conn_rollback(
        &self,
        _req: &ChangeExtConnRequest,
        inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("change_ext_conn_rollback", &inst.id)?;
        if let Some(backup) = state.backups.remove(&inst.id) {
            state.live.insert(inst.id.clone(), backup.clone());
            inst.instantiated_vnf_info = Some(backup);
        }
        Ok(())
    }

    async fn change_vnfpkg(
        &self,
        req: &ChangeVnfPkgRequest,
        inst: &mut VnfInstance,
        grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("change_vnfpkg", &inst.id)?;
        let vim = vim_key(inst);
        let instance_id = inst.id.clone();
        let info = snapshot_mut(inst)?;
        state.backups.insert(instance_id.clone(), info.clone());
        replace_resources(&mut state, info, grant_req, &vim, Some(&req.vnfd_id));
        state.live.insert(instance_id, info.clone());
        Ok(())
    }

    async fn change_vnfpkg_rollback(
        &self,
        _req: &ChangeVnfPkgRequest,
        inst: &mut VnfInstance,
        _grant_req: &GrantRequest,
        _grant: &Grant,
        _vnfd: &Vnfd,
    ) -> Result<(), DriverError> {
        let mut state = self.enter("change_vnfpkg_rollback", &inst.id)?;
        if let Some(backup) = state.backups.remove(&inst.id) {
            state.live.insert(inst.id.clone(), backup.clone());
            inst.instantiated_vnf_info = Some(backup);
        }
        Ok(())
    }

    async fn diff_check(
        &self,
        inst: &VnfInstance,
        _vim: &VimConnectionInfo,
    ) -> Result<bool, DriverError> {
        let mut state = self.enter("diff_check", &inst.id)?;
        *state.inspections.entry(inst.id.clone()).or_default() += 1;
        Ok(match (state.live.get(&inst.id), inst.instantiated_vnf_info.as_ref()) {
            (Some(live), Some(stored)) => !same_resources(live, stored),
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    async fn sync(
        &self,
        inst: &VnfInstance,
        _vim: &VimConnectionInfo,
    ) -> Result<InstantiatedVnfInfo, DriverError> {
        let state = self.enter("sync", &inst.id)?;
        state
            .live
            .get(&inst.id)
            .cloned()
            .ok_or_else(|| DriverError::Failed(format!("no live resources for {}", inst.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{build_grant_request, GrantAuthority, LocalGrantAuthority};
    use serde_json::json;
    use vnflcm_model::{
        ExtVirtualLinkData, OperationParams, OperationRecord, OperationState, VimType,
    };

    fn vnfd() -> Vnfd {
        serde_json::from_value(json!({
            "vnfd_id": "vnfd-1",
            "flavours": {
                "simple": {
                    "vdus": {
                        "VDU1": {
                            "cps": [{"id": "CP1"}, {"id": "CP2", "virtual_link": "internalVL1"}],
                            "storages": ["Storage1"]
                        }
                    },
                    "virtual_links": ["internalVL1"],
                    "scaling_aspects": {
                        "VDU1_scale": {"max_scale_level": 3, "vdu_deltas": {"VDU1": 1}}
                    }
                }
            }
        }))
        .unwrap()
    }

    fn instance() -> VnfInstance {
        let mut inst = VnfInstance::new("inst-1", "vnfd-1");
        inst.vim_connection_info
            .insert("vim1".into(), VimConnectionInfo::new(VimType::OpenStack));
        inst
    }

    async fn run(
        driver: &SimulatedDriver,
        inst: &mut VnfInstance,
        params: OperationParams,
    ) -> (GrantRequest, Result<(), DriverError>) {
        let vnfd = vnfd();
        let record =
            OperationRecord::new("op", &inst.id, params.clone(), OperationState::Processing, "t");
        let greq = build_grant_request(&record, inst, &vnfd, false).unwrap();
        let authority = LocalGrantAuthority::new(Some("az-1".into()));
        let grant = authority.request_grant(&greq).await.unwrap();
        let out = match &params {
            OperationParams::Instantiate(r) => {
                driver.instantiate(r, inst, &greq, &grant, &vnfd).await
            }
            OperationParams::Scale(r) => driver.scale(r, inst, &greq, &grant, &vnfd).await,
            OperationParams::Heal(r) => driver.heal(r, inst, &greq, &grant, &vnfd).await,
            _ => unreachable!(),
        };
        (greq, out)
    }

    fn instantiate_params() -> OperationParams {
        let mut req = InstantiateRequest::new("simple");
        req.ext_virtual_links = vec![serde_json::from_value::<ExtVirtualLinkData>(json!({
            "id": "ext-1",
            "resourceId": "net-ext",
            "extCps": [{"cpdId": "CP1", "cpConfig": {"c1": {}}}]
        }))
        .unwrap()];
        OperationParams::Instantiate(req)
    }

    fn scale(scale_type: ScaleType) -> OperationParams {
        OperationParams::Scale(ScaleRequest {
            scale_type,
            aspect_id: "VDU1_scale".into(),
            number_of_steps: 1,
            additional_params: None,
        })
    }

    #[tokio::test]
    async fn instantiate_materialises_granted_resources() {
        let driver = SimulatedDriver::new();
        let mut inst = instance();
        let (greq, out) = run(&driver, &mut inst, instantiate_params()).await;
        out.unwrap();

        let info = inst.instantiated_vnf_info.as_ref().unwrap();
        assert_eq!(info.vnfc_resource_info.len(), 1);
        let vnfc = &info.vnfc_resource_info[0];
        let compute_def = greq
            .add_resources
            .iter()
            .find(|d| d.category == ResourceCategory::Compute)
            .unwrap();
        assert_eq!(vnfc.id, compute_def.id);
        assert_eq!(vnfc.compute_resource.vim_connection_id.as_deref(), Some("vim1"));
        assert_eq!(vnfc.metadata.as_ref().unwrap()["zone"], "az-1");
        assert_eq!(vnfc.storage_resource_ids.len(), 1);
        assert_eq!(info.vnf_virtual_link_resource_info[0].vnf_link_ports.len(), 1);
        assert_eq!(info.ext_virtual_link_info[0].ext_link_ports.len(), 1);
        assert_eq!(info.ext_cp_info.len(), 1);
        assert_eq!(info.vnfc_info[0].id, format!("VDU1-{}", vnfc.id));
        assert_eq!(driver.live("inst-1").as_ref(), Some(info));
    }

    #[tokio::test]
    async fn scale_in_removes_what_scale_out_added() {
        let driver = SimulatedDriver::new();
        let mut inst = instance();
        run(&driver, &mut inst, instantiate_params()).await.1.unwrap();
        let before = inst.instantiated_vnf_info.clone().unwrap();

        run(&driver, &mut inst, scale(ScaleType::ScaleOut)).await.1.unwrap();
        assert_eq!(inst.instantiated_vnf_info.as_ref().unwrap().vnfc_resource_info.len(), 2);

        let mut scaled = inst.instantiated_vnf_info.clone().unwrap();
        scaled.scale_status = vec![vnflcm_model::ScaleInfo {
            aspect_id: "VDU1_scale".into(),
            scale_level: 1,
        }];
        inst.instantiated_vnf_info = Some(scaled);
        run(&driver, &mut inst, scale(ScaleType::ScaleIn)).await.1.unwrap();

        let mut after = inst.instantiated_vnf_info.clone().unwrap();
        after.scale_status.clear();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let driver = SimulatedDriver::new();
        driver.fail_next("instantiate");
        let mut inst = instance();
        let (_, out) = run(&driver, &mut inst, instantiate_params()).await;
        assert!(matches!(out, Err(DriverError::Failed(_))));
        assert!(inst.instantiated_vnf_info.is_none());
        run(&driver, &mut inst, instantiate_params()).await.1.unwrap();
        assert_eq!(driver.calls().len(), 2);
    }

    #[tokio::test]
    async fn heal_replaces_handles_but_keeps_ids() {
        let driver = SimulatedDriver::new();
        let mut inst = instance();
        run(&driver, &mut inst, instantiate_params()).await.1.unwrap();
        let before = inst.instantiated_vnf_info.clone().unwrap();
        run(
            &driver,
            &mut inst,
            OperationParams::Heal(HealRequest {
                vnfc_instance_id: Vec::new(),
                cause: None,
                additional_params: None,
            }),
        )
        .await
        .1
        .unwrap();
        let after = inst.instantiated_vnf_info.unwrap();
        assert_eq!(after.vnfc_resource_info[0].id, before.vnfc_resource_info[0].id);
        assert_ne!(
            after.vnfc_resource_info[0].compute_resource,
            before.vnfc_resource_info[0].compute_resource
        );
    }

    #[tokio::test]
    async fn drift_is_detected_and_synced() {
        let driver = SimulatedDriver::new();
        let mut inst = instance();
        run(&driver, &mut inst, instantiate_params()).await.1.unwrap();
        let vim = VimConnectionInfo::new(VimType::OpenStack);
        assert!(!driver.diff_check(&inst, &vim).await.unwrap());

        driver.inject_drift("inst-1", |info| info.vnfc_resource_info.clear());
        assert!(driver.diff_check(&inst, &vim).await.unwrap());
        let live = driver.sync(&inst, &vim).await.unwrap();
        assert!(live.vnfc_resource_info.is_empty());
        assert_eq!(driver.inspections("inst-1"), 2);
    }
}
