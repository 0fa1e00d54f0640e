//! Grant request construction, one builder per operation kind.

use std::collections::BTreeSet;

use uuid::Uuid;
use vnflcm_model::{
    AffinityType, ChangeExtConnRequest, ChangeVnfPkgRequest, ConstraintResourceRef, GrantRequest,
    HealRequest, InstantiateRequest, InstantiatedVnfInfo, OperationParams, OperationRecord,
    PlacementConstraint, ResourceCategory, ResourceDefinition, ResourceHandle, ResourceIdType,
    ScaleRequest, ScaleType, VnfInstance, VnfcCpInfo, VnfcResourceInfo,
};

use crate::descriptor::{Flavour, Vnfd};
use crate::error::LcmError;

/// Build the grant request for `record` against the current `instance`.
///
/// MODIFY_INFO never negotiates a grant and is rejected here.
pub fn build_grant_request(
    record: &OperationRecord,
    instance: &VnfInstance,
    vnfd: &Vnfd,
    fallback_best_effort: bool,
) -> Result<GrantRequest, LcmError> {
    let mut greq = GrantRequest::new(
        &instance.id,
        &record.id,
        &instance.vnfd_id,
        record.operation(),
    );
    greq.is_automatic_invocation = record.is_automatic_invocation;
    greq.additional_params = record.operation_params.additional_params().cloned();

    match &record.operation_params {
        OperationParams::Instantiate(req) => {
            instantiate(&mut greq, req, instance, vnfd, fallback_best_effort)?
        }
        OperationParams::Scale(req) => scale(&mut greq, req, instance, vnfd, fallback_best_effort)?,
        OperationParams::Heal(req) => heal(&mut greq, req, instance)?,
        OperationParams::Terminate(_) => terminate(&mut greq, instance),
        OperationParams::ChangeExtConn(req) => change_ext_conn(&mut greq, req, instance),
        OperationParams::ChangeVnfpkg(req) => change_vnfpkg(&mut greq, req, instance)?,
        OperationParams::ModifyInfo(_) => {
            return Err(LcmError::Validation(
                "MODIFY_INFO does not negotiate a grant".to_string(),
            ))
        }
    }
    Ok(greq)
}

// ── Resource definition helpers ──────────────────────────────────────────────

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn res_def(
    id: String,
    category: ResourceCategory,
    vdu_id: Option<&str>,
    template: &str,
    resource: Option<ResourceHandle>,
) -> ResourceDefinition {
    ResourceDefinition {
        id,
        category,
        vdu_id: vdu_id.map(str::to_string),
        resource_template_id: template.to_string(),
        resource,
    }
}

/// Definitions for one new VNFC of `vdu_id`: its compute, a link port per
/// CP and a storage per storage descriptor, tied together by the compute id.
fn new_vdu<'a>(
    vdu_id: &str,
    cps: impl IntoIterator<Item = &'a str>,
    storages: impl IntoIterator<Item = &'a str>,
) -> Vec<ResourceDefinition> {
    let compute_id = new_id();
    let mut defs = vec![res_def(
        compute_id.clone(),
        ResourceCategory::Compute,
        Some(vdu_id),
        vdu_id,
        None,
    )];
    for cp in cps {
        defs.push(res_def(
            format!("{}-{}", cp, compute_id),
            ResourceCategory::Linkport,
            Some(vdu_id),
            cp,
            None,
        ));
    }
    for storage in storages {
        defs.push(res_def(
            format!("{}-{}", storage, compute_id),
            ResourceCategory::Storage,
            Some(vdu_id),
            storage,
            None,
        ));
    }
    defs
}

/// Handle of the port a VNFC CP is attached to.
fn port_handle(info: &InstantiatedVnfInfo, cp: &VnfcCpInfo) -> Option<ResourceHandle> {
    if let Some(port_id) = &cp.vnf_link_port_id {
        let internal = info
            .vnf_virtual_link_resource_info
            .iter()
            .flat_map(|vl| vl.vnf_link_ports.iter());
        let managed = info
            .ext_managed_virtual_link_info
            .iter()
            .flat_map(|vl| vl.vnf_link_ports.iter());
        if let Some(port) = internal.chain(managed).find(|p| &p.id == port_id) {
            return Some(port.resource_handle.clone());
        }
    }
    let ext_cp_id = cp.vnf_ext_cp_id.as_ref()?;
    info.ext_virtual_link_info
        .iter()
        .flat_map(|vl| vl.ext_link_ports.iter())
        .find(|p| p.cp_instance_id.as_ref() == Some(ext_cp_id))
        .map(|p| p.resource_handle.clone())
}

/// Remove definitions for existing VNFCs with their ports and storages.
/// With `re_create`, a matching add is emitted for the compute and each
/// storage.
fn remove_vnfcs<'a>(
    greq: &mut GrantRequest,
    info: &InstantiatedVnfInfo,
    vnfcs: impl IntoIterator<Item = &'a VnfcResourceInfo>,
    re_create: bool,
) {
    for vnfc in vnfcs {
        let vdu = Some(vnfc.vdu_id.as_str());
        greq.remove_resources.push(res_def(
            new_id(),
            ResourceCategory::Compute,
            vdu,
            &vnfc.vdu_id,
            Some(vnfc.compute_resource.clone()),
        ));
        if re_create {
            greq.add_resources.push(res_def(
                new_id(),
                ResourceCategory::Compute,
                vdu,
                &vnfc.vdu_id,
                None,
            ));
        }
        for cp in &vnfc.vnfc_cp_info {
            if cp.vnf_ext_cp_id.is_none() && cp.vnf_link_port_id.is_none() {
                continue;
            }
            greq.remove_resources.push(res_def(
                format!("{}-{}", cp.cpd_id, vnfc.id),
                ResourceCategory::Linkport,
                vdu,
                &cp.cpd_id,
                port_handle(info, cp),
            ));
        }
        for storage_id in &vnfc.storage_resource_ids {
            let Some(storage) = info.storage(storage_id) else {
                continue;
            };
            greq.remove_resources.push(res_def(
                new_id(),
                ResourceCategory::Storage,
                vdu,
                &storage.virtual_storage_desc_id,
                Some(storage.storage_resource.clone()),
            ));
            if re_create {
                greq.add_resources.push(res_def(
                    new_id(),
                    ResourceCategory::Storage,
                    vdu,
                    &storage.virtual_storage_desc_id,
                    None,
                ));
            }
        }
    }
}

fn snapshot<'a>(instance: &'a VnfInstance) -> Result<&'a InstantiatedVnfInfo, LcmError> {
    instance
        .instantiated_vnf_info
        .as_ref()
        .ok_or_else(|| LcmError::InvalidInstanceState {
            instance_id: instance.id.clone(),
            state: instance.instantiation_state,
        })
}

// ── Placement constraints ────────────────────────────────────────────────────

/// Affinity rules over the VNFCs being added, extended with the existing
/// VNFCs of the same VDUs. A rule touching fewer than two VNFCs is dropped.
fn placement_constraints(
    greq: &mut GrantRequest,
    flavour: &Flavour,
    instance: &VnfInstance,
    fallback_best_effort: bool,
) {
    let rules = flavour
        .affinity
        .iter()
        .map(|g| (AffinityType::Affinity, g))
        .chain(flavour.anti_affinity.iter().map(|g| (AffinityType::AntiAffinity, g)));

    for (kind, group) in rules {
        let mut refs: Vec<ConstraintResourceRef> = greq
            .add_resources
            .iter()
            .filter(|d| {
                d.category == ResourceCategory::Compute
                    && group.targets.contains(&d.resource_template_id)
            })
            .map(|d| ConstraintResourceRef {
                id_type: ResourceIdType::Grant,
                resource_id: d.id.clone(),
                vim_connection_id: None,
            })
            .collect();
        if refs.is_empty() {
            continue;
        }
        if let Some(info) = &instance.instantiated_vnf_info {
            refs.extend(
                info.vnfc_resource_info
                    .iter()
                    .filter(|v| group.targets.contains(&v.vdu_id))
                    .map(|v| ConstraintResourceRef {
                        id_type: ResourceIdType::ResMgmt,
                        resource_id: v.compute_resource.resource_id.clone(),
                        vim_connection_id: v.compute_resource.vim_connection_id.clone(),
                    }),
            );
        }
        if refs.len() < 2 {
            continue;
        }
        greq.placement_constraints.push(PlacementConstraint {
            affinity_or_anti_affinity: kind,
            scope: group.scope.to_uppercase(),
            resource: refs,
            fallback_best_effort,
        });
    }
}

// ── Per-kind builders ────────────────────────────────────────────────────────

fn instantiate(
    greq: &mut GrantRequest,
    req: &InstantiateRequest,
    instance: &VnfInstance,
    vnfd: &Vnfd,
    fallback_best_effort: bool,
) -> Result<(), LcmError> {
    let flavour = vnfd.flavour(&req.flavour_id)?;
    let level = flavour.resolve_level(req.instantiation_level_id.as_deref())?;
    greq.flavour_id = Some(req.flavour_id.clone());
    greq.instantiation_level_id = level.clone();

    // Ports pre-created by the caller are not granted.
    let link_port_cps: BTreeSet<&str> = req
        .ext_virtual_links
        .iter()
        .flat_map(|vl| vl.cpd_ids_with_link_port())
        .collect();
    let managed_vls: BTreeSet<&str> = req
        .ext_managed_virtual_links
        .iter()
        .map(|vl| vl.vnf_virtual_link_desc_id.as_str())
        .collect();

    for (vdu_id, vdu) in &flavour.vdus {
        for _ in 0..flavour.vdu_count(vdu_id, level.as_deref()) {
            let cps = vdu
                .cps
                .iter()
                .map(|cp| cp.id.as_str())
                .filter(|cp| !link_port_cps.contains(cp));
            let storages = vdu.storages.iter().map(String::as_str);
            greq.add_resources.extend(new_vdu(vdu_id, cps, storages));
        }
    }
    for vl in &flavour.virtual_links {
        if managed_vls.contains(vl.as_str()) {
            continue;
        }
        greq.add_resources
            .push(res_def(new_id(), ResourceCategory::Vl, None, vl, None));
    }
    placement_constraints(greq, flavour, instance, fallback_best_effort);
    Ok(())
}

fn scale(
    greq: &mut GrantRequest,
    req: &ScaleRequest,
    instance: &VnfInstance,
    vnfd: &Vnfd,
    fallback_best_effort: bool,
) -> Result<(), LcmError> {
    let info = snapshot(instance)?;
    let flavour = vnfd.flavour(&info.flavour_id)?;
    let aspect = flavour.aspect(&req.aspect_id)?;
    let current = info.scale_level(&req.aspect_id).unwrap_or(0);

    match req.scale_type {
        ScaleType::ScaleOut => {
            let target = current + req.number_of_steps;
            if target > aspect.max_scale_level {
                return Err(LcmError::Validation(format!(
                    "scale level of aspect {} would exceed its maximum {} (requested {})",
                    req.aspect_id, aspect.max_scale_level, target
                )));
            }
            for (vdu_id, delta) in &aspect.vdu_deltas {
                let count = delta * req.number_of_steps;
                // Reuse the topology of an existing VNFC when there is one.
                let sample = info.vnfc_resource_info.iter().find(|v| &v.vdu_id == vdu_id);
                let (cps, storages): (Vec<String>, Vec<String>) = match sample {
                    Some(v) => (
                        v.vnfc_cp_info.iter().map(|cp| cp.cpd_id.clone()).collect(),
                        v.storage_resource_ids
                            .iter()
                            .filter_map(|id| info.storage(id))
                            .map(|s| s.virtual_storage_desc_id.clone())
                            .collect(),
                    ),
                    None => match flavour.vdus.get(vdu_id) {
                        Some(vdu) => (
                            vdu.cps.iter().map(|cp| cp.id.clone()).collect(),
                            vdu.storages.clone(),
                        ),
                        None => (Vec::new(), Vec::new()),
                    },
                };
                for _ in 0..count {
                    greq.add_resources.extend(new_vdu(
                        vdu_id,
                        cps.iter().map(String::as_str),
                        storages.iter().map(String::as_str),
                    ));
                }
            }
            placement_constraints(greq, flavour, instance, fallback_best_effort);
        }
        ScaleType::ScaleIn => {
            if req.number_of_steps > current {
                return Err(LcmError::Validation(format!(
                    "scale level of aspect {} is {}, cannot scale in by {}",
                    req.aspect_id, current, req.number_of_steps
                )));
            }
            let mut victims = Vec::new();
            for (vdu_id, delta) in &aspect.vdu_deltas {
                let count = (delta * req.number_of_steps) as usize;
                // Snapshots list VNFCs newest first.
                victims.extend(
                    info.vnfc_resource_info
                        .iter()
                        .filter(|v| &v.vdu_id == vdu_id)
                        .take(count),
                );
            }
            remove_vnfcs(greq, info, victims, false);
        }
    }
    Ok(())
}

fn heal(greq: &mut GrantRequest, req: &HealRequest, instance: &VnfInstance) -> Result<(), LcmError> {
    let info = snapshot(instance)?;
    greq.flavour_id = Some(info.flavour_id.clone());

    if !req.vnfc_instance_id.is_empty() {
        // Targeted heal: recreate the listed VNFCs, and their storages with `all`.
        for vnfc_info_id in &req.vnfc_instance_id {
            let vnfc = info
                .vnfc_info
                .iter()
                .find(|v| &v.id == vnfc_info_id)
                .and_then(|v| info.vnfc(&v.vnfc_resource_info_id))
                .ok_or_else(|| {
                    LcmError::Validation(format!("VNFC instance {} not found", vnfc_info_id))
                })?;
            let vdu = Some(vnfc.vdu_id.as_str());
            greq.remove_resources.push(res_def(
                new_id(),
                ResourceCategory::Compute,
                vdu,
                &vnfc.vdu_id,
                Some(vnfc.compute_resource.clone()),
            ));
            greq.add_resources.push(res_def(
                new_id(),
                ResourceCategory::Compute,
                vdu,
                &vnfc.vdu_id,
                None,
            ));
            if req.all() {
                for storage in vnfc.storage_resource_ids.iter().filter_map(|id| info.storage(id)) {
                    greq.remove_resources.push(res_def(
                        new_id(),
                        ResourceCategory::Storage,
                        vdu,
                        &storage.virtual_storage_desc_id,
                        Some(storage.storage_resource.clone()),
                    ));
                    greq.add_resources.push(res_def(
                        new_id(),
                        ResourceCategory::Storage,
                        vdu,
                        &storage.virtual_storage_desc_id,
                        None,
                    ));
                }
            }
        }
        return Ok(());
    }

    // Whole-VNF heal.
    if req.all() {
        remove_vnfcs(greq, info, &info.vnfc_resource_info, true);
        for vl in &info.vnf_virtual_link_resource_info {
            greq.remove_resources.push(res_def(
                new_id(),
                ResourceCategory::Vl,
                None,
                &vl.vnf_virtual_link_desc_id,
                Some(vl.network_resource.clone()),
            ));
            greq.add_resources.push(res_def(
                new_id(),
                ResourceCategory::Vl,
                None,
                &vl.vnf_virtual_link_desc_id,
                None,
            ));
        }
    } else {
        for vnfc in &info.vnfc_resource_info {
            let vdu = Some(vnfc.vdu_id.as_str());
            greq.remove_resources.push(res_def(
                new_id(),
                ResourceCategory::Compute,
                vdu,
                &vnfc.vdu_id,
                Some(vnfc.compute_resource.clone()),
            ));
            greq.add_resources.push(res_def(
                new_id(),
                ResourceCategory::Compute,
                vdu,
                &vnfc.vdu_id,
                None,
            ));
        }
    }
    Ok(())
}

fn terminate(greq: &mut GrantRequest, instance: &VnfInstance) {
    let Some(info) = &instance.instantiated_vnf_info else {
        return;
    };
    remove_vnfcs(greq, info, &info.vnfc_resource_info, false);
    for vl in &info.vnf_virtual_link_resource_info {
        greq.remove_resources.push(res_def(
            new_id(),
            ResourceCategory::Vl,
            None,
            &vl.vnf_virtual_link_desc_id,
            Some(vl.network_resource.clone()),
        ));
    }
}

fn change_ext_conn(greq: &mut GrantRequest, req: &ChangeExtConnRequest, instance: &VnfInstance) {
    let Some(info) = &instance.instantiated_vnf_info else {
        return;
    };
    let cp_names: BTreeSet<&str> = req.ext_virtual_links.iter().flat_map(|vl| vl.cpd_ids()).collect();
    let link_port_cps: BTreeSet<&str> = req
        .ext_virtual_links
        .iter()
        .flat_map(|vl| vl.cpd_ids_with_link_port())
        .collect();

    for vnfc in &info.vnfc_resource_info {
        let affected: Vec<&VnfcCpInfo> = vnfc
            .vnfc_cp_info
            .iter()
            .filter(|cp| cp_names.contains(cp.cpd_id.as_str()))
            .collect();
        if affected.is_empty() {
            continue;
        }
        let vdu = Some(vnfc.vdu_id.as_str());
        let update_id = new_id();
        greq.update_resources.push(res_def(
            update_id.clone(),
            ResourceCategory::Compute,
            vdu,
            &vnfc.vdu_id,
            Some(vnfc.compute_resource.clone()),
        ));
        for cp in affected {
            if cp.vnf_ext_cp_id.is_some() {
                greq.remove_resources.push(res_def(
                    format!("{}-{}", cp.cpd_id, vnfc.id),
                    ResourceCategory::Linkport,
                    vdu,
                    &cp.cpd_id,
                    port_handle(info, cp),
                ));
            }
            if !link_port_cps.contains(cp.cpd_id.as_str()) {
                greq.add_resources.push(res_def(
                    format!("{}-{}", cp.cpd_id, update_id),
                    ResourceCategory::Linkport,
                    vdu,
                    &cp.cpd_id,
                    None,
                ));
            }
        }
    }
}

fn change_vnfpkg(
    greq: &mut GrantRequest,
    req: &ChangeVnfPkgRequest,
    instance: &VnfInstance,
) -> Result<(), LcmError> {
    let info = snapshot(instance)?;
    greq.vnfd_id = req.vnfd_id.clone();
    greq.flavour_id = Some(info.flavour_id.clone());

    match req.upgrade_type() {
        Some("RollingUpdate") => {}
        other => {
            return Err(LcmError::Validation(format!(
                "upgrade_type {} is not supported",
                other.unwrap_or("(none)")
            )))
        }
    }
    let vdus: BTreeSet<String> = req
        .vdu_params()
        .map_err(|e| LcmError::Validation(format!("invalid vdu_params: {}", e)))?
        .into_iter()
        .map(|p| p.vdu_id)
        .collect();

    for vnfc in info.vnfc_resource_info.iter().filter(|v| vdus.contains(&v.vdu_id)) {
        let vdu = Some(vnfc.vdu_id.as_str());
        greq.remove_resources.push(res_def(
            new_id(),
            ResourceCategory::Compute,
            vdu,
            &vnfc.vdu_id,
            Some(vnfc.compute_resource.clone()),
        ));
        greq.add_resources.push(res_def(
            new_id(),
            ResourceCategory::Compute,
            vdu,
            &vnfc.vdu_id,
            None,
        ));
        for storage in vnfc.storage_resource_ids.iter().filter_map(|id| info.storage(id)) {
            greq.remove_resources.push(res_def(
                new_id(),
                ResourceCategory::Storage,
                vdu,
                &storage.virtual_storage_desc_id,
                Some(storage.storage_resource.clone()),
            ));
            greq.add_resources.push(res_def(
                new_id(),
                ResourceCategory::Storage,
                vdu,
                &storage.virtual_storage_desc_id,
                None,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vnflcm_model::{
        ExtVirtualLinkData, InstantiationState, OperationState, TerminateRequest, TerminationType,
        VnfcInfo,
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
                        },
                        "VDU2": {"cps": [{"id": "CP3", "virtual_link": "internalVL2"}]}
                    },
                    "virtual_links": ["internalVL1", "internalVL2"],
                    "instantiation_levels": {
                        "big": {"vdu_counts": {"VDU1": 2, "VDU2": 1}}
                    },
                    "scaling_aspects": {
                        "VDU1_scale": {"max_scale_level": 2, "vdu_deltas": {"VDU1": 1}}
                    },
                    "anti_affinity": [{"targets": ["VDU1"], "scope": "nfvi_node"}]
                }
            }
        }))
        .unwrap()
    }

    fn record(params: OperationParams) -> OperationRecord {
        OperationRecord::new("op-1", "inst-1", params, OperationState::Starting, "2026-01-01T00:00:00Z")
    }

    fn instantiated() -> VnfInstance {
        let mut inst = VnfInstance::new("inst-1", "vnfd-1");
        inst.instantiation_state = InstantiationState::Instantiated;
        let mut info = InstantiatedVnfInfo::new("simple");
        info.scale_status = vec![vnflcm_model::ScaleInfo {
            aspect_id: "VDU1_scale".into(),
            scale_level: 1,
        }];
        for id in ["vnfc-new", "vnfc-old"] {
            info.vnfc_resource_info.push(VnfcResourceInfo {
                id: id.into(),
                vdu_id: "VDU1".into(),
                compute_resource: ResourceHandle::new(format!("server-{}", id)),
                storage_resource_ids: vec![format!("st-{}", id)],
                vnfc_cp_info: vec![
                    VnfcCpInfo {
                        id: format!("CP1-{}", id),
                        cpd_id: "CP1".into(),
                        vnf_ext_cp_id: Some(format!("ext-{}", id)),
                        vnf_link_port_id: None,
                    },
                    VnfcCpInfo {
                        id: format!("CP2-{}", id),
                        cpd_id: "CP2".into(),
                        vnf_ext_cp_id: None,
                        vnf_link_port_id: None,
                    },
                ],
                current_vnfd_id: Some("vnfd-1".into()),
                metadata: None,
            });
            info.virtual_storage_resource_info.push(vnflcm_model::VirtualStorageResourceInfo {
                id: format!("st-{}", id),
                virtual_storage_desc_id: "Storage1".into(),
                storage_resource: ResourceHandle::new(format!("vol-{}", id)),
            });
            info.vnfc_info.push(VnfcInfo {
                id: format!("VDU1-{}", id),
                vdu_id: "VDU1".into(),
                vnfc_resource_info_id: id.into(),
                vnfc_state: vnflcm_model::VnfOperationalState::Started,
                vnfc_configurable_properties: None,
            });
        }
        inst.instantiated_vnf_info = Some(info);
        inst
    }

    fn count(defs: &[ResourceDefinition], category: ResourceCategory) -> usize {
        defs.iter().filter(|d| d.category == category).count()
    }

    #[test]
    fn instantiate_enumerates_level_resources() {
        let mut req = InstantiateRequest::new("simple");
        req.instantiation_level_id = Some("big".into());
        req.ext_virtual_links = vec![serde_json::from_value::<ExtVirtualLinkData>(json!({
            "id": "ext-1",
            "resourceId": "net-ext",
            "extCps": [{"cpdId": "CP1", "cpConfig": {"c": {"linkPortId": "lp-1"}}}]
        }))
        .unwrap()];
        let greq = build_grant_request(
            &record(OperationParams::Instantiate(req)),
            &VnfInstance::new("inst-1", "vnfd-1"),
            &vnfd(),
            true,
        )
        .unwrap();

        assert_eq!(greq.flavour_id.as_deref(), Some("simple"));
        assert_eq!(greq.instantiation_level_id.as_deref(), Some("big"));
        assert_eq!(count(&greq.add_resources, ResourceCategory::Compute), 3);
        // CP1 uses a pre-created port on both VDU1 VNFCs.
        assert_eq!(count(&greq.add_resources, ResourceCategory::Linkport), 3);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Storage), 2);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Vl), 2);

        let compute = greq
            .add_resources
            .iter()
            .find(|d| d.resource_template_id == "VDU2")
            .unwrap();
        assert!(greq
            .add_resources
            .iter()
            .any(|d| d.id == format!("CP3-{}", compute.id)));

        assert_eq!(greq.placement_constraints.len(), 1);
        let pc = &greq.placement_constraints[0];
        assert_eq!(pc.affinity_or_anti_affinity, AffinityType::AntiAffinity);
        assert_eq!(pc.scope, "NFVI_NODE");
        assert_eq!(pc.resource.len(), 2);
        assert!(pc.fallback_best_effort);
    }

    #[test]
    fn instantiate_with_unknown_flavour_fails() {
        let err = build_grant_request(
            &record(OperationParams::Instantiate(InstantiateRequest::new("complex"))),
            &VnfInstance::new("inst-1", "vnfd-1"),
            &vnfd(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LcmError::Descriptor(_)));
    }

    #[test]
    fn scale_out_reuses_sample_topology_and_constrains_placement() {
        let greq = build_grant_request(
            &record(OperationParams::Scale(ScaleRequest {
                scale_type: ScaleType::ScaleOut,
                aspect_id: "VDU1_scale".into(),
                number_of_steps: 1,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        assert_eq!(count(&greq.add_resources, ResourceCategory::Compute), 1);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Linkport), 2);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Storage), 1);
        let refs = &greq.placement_constraints[0].resource;
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs.iter().filter(|r| r.id_type == ResourceIdType::ResMgmt).count(),
            2
        );
    }

    #[test]
    fn scale_out_beyond_max_level_is_rejected() {
        let err = build_grant_request(
            &record(OperationParams::Scale(ScaleRequest {
                scale_type: ScaleType::ScaleOut,
                aspect_id: "VDU1_scale".into(),
                number_of_steps: 2,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LcmError::Validation(_)));
    }

    #[test]
    fn scale_in_removes_newest_vnfcs_first() {
        let greq = build_grant_request(
            &record(OperationParams::Scale(ScaleRequest {
                scale_type: ScaleType::ScaleIn,
                aspect_id: "VDU1_scale".into(),
                number_of_steps: 1,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        let compute: Vec<_> = greq
            .remove_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Compute)
            .collect();
        assert_eq!(compute.len(), 1);
        assert_eq!(
            compute[0].resource.as_ref().unwrap().resource_id,
            "server-vnfc-new"
        );
        // Only the external CP has a port to release.
        let ports: Vec<_> = greq
            .remove_resources
            .iter()
            .filter(|d| d.category == ResourceCategory::Linkport)
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ports, vec!["CP1-vnfc-new"]);
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Storage), 1);
        assert!(greq.add_resources.is_empty());
    }

    #[test]
    fn invalid_aspect_is_rejected() {
        let err = build_grant_request(
            &record(OperationParams::Scale(ScaleRequest {
                scale_type: ScaleType::ScaleOut,
                aspect_id: "nope".into(),
                number_of_steps: 1,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LcmError::Descriptor(_)));
    }

    #[test]
    fn targeted_heal_recreates_listed_vnfcs() {
        let mut params = vnflcm_model::KeyValuePairs::new();
        params.insert("all".into(), json!(true));
        let greq = build_grant_request(
            &record(OperationParams::Heal(HealRequest {
                vnfc_instance_id: vec!["VDU1-vnfc-old".into()],
                cause: None,
                additional_params: Some(params),
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Compute), 1);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Compute), 1);
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Storage), 1);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Storage), 1);
        assert_eq!(greq.additional_params.unwrap()["all"], json!(true));
    }

    #[test]
    fn heal_of_unknown_vnfc_is_rejected() {
        let err = build_grant_request(
            &record(OperationParams::Heal(HealRequest {
                vnfc_instance_id: vec!["VDU9-x".into()],
                cause: None,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, LcmError::Validation(_)));
    }

    #[test]
    fn terminate_removes_every_vnfc() {
        let greq = build_grant_request(
            &record(OperationParams::Terminate(TerminateRequest {
                termination_type: TerminationType::Graceful,
                graceful_termination_timeout: None,
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Compute), 2);
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Storage), 2);
        assert!(greq.add_resources.is_empty());
    }

    #[test]
    fn change_ext_conn_updates_affected_vnfcs() {
        let link: ExtVirtualLinkData = serde_json::from_value(json!({
            "id": "ext-2",
            "resourceId": "net-2",
            "extCps": [{"cpdId": "CP1", "cpConfig": {"c": {}}}]
        }))
        .unwrap();
        let greq = build_grant_request(
            &record(OperationParams::ChangeExtConn(ChangeExtConnRequest {
                ext_virtual_links: vec![link],
                vim_connection_info: Default::default(),
                additional_params: None,
            })),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        assert_eq!(count(&greq.update_resources, ResourceCategory::Compute), 2);
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Linkport), 2);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Linkport), 2);
        let update = &greq.update_resources[0];
        assert!(greq
            .add_resources
            .iter()
            .any(|d| d.id == format!("CP1-{}", update.id)));
    }

    #[test]
    fn change_vnfpkg_requires_rolling_update() {
        let req: ChangeVnfPkgRequest = serde_json::from_value(json!({
            "vnfdId": "vnfd-2",
            "additionalParams": {"upgrade_type": "BlueGreen"}
        }))
        .unwrap();
        let err = build_grant_request(
            &record(OperationParams::ChangeVnfpkg(req)),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("BlueGreen"));

        let req: ChangeVnfPkgRequest = serde_json::from_value(json!({
            "vnfdId": "vnfd-2",
            "additionalParams": {"upgrade_type": "RollingUpdate", "vdu_params": [{"vdu_id": "VDU1"}]}
        }))
        .unwrap();
        let greq = build_grant_request(
            &record(OperationParams::ChangeVnfpkg(req)),
            &instantiated(),
            &vnfd(),
            false,
        )
        .unwrap();
        assert_eq!(greq.vnfd_id, "vnfd-2");
        assert_eq!(count(&greq.remove_resources, ResourceCategory::Compute), 2);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Compute), 2);
        assert_eq!(count(&greq.add_resources, ResourceCategory::Storage), 2);
    }

    #[test]
    fn modify_info_never_builds_a_grant() {
        assert!(build_grant_request(
            &record(OperationParams::ModifyInfo(Default::default())),
            &instantiated(),
            &vnfd(),
            false,
        )
        .is_err());
    }
}
