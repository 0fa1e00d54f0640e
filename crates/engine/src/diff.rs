//! Resource change differ.
//!
//! Turns the before/after view of an instance into the change record stored
//! on its operation. Resources are matched by id, never by value: a driver
//! that recreates a VNFC under the same id reports no change for it.
//!
//! Every category is computed as three id sets (removed = before - after,
//! added = after - before, common = before ∩ after). A category without
//! entries is omitted from the record.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use vnflcm_model::{
    AffectedExtLinkPort, AffectedVirtualLink, AffectedVirtualStorage, AffectedVnfc, ChangeRecord,
    ChangeType, ChangedInfo, ExtLinkPortInfo, ExtVirtualLinkInfo, InstantiatedVnfInfo,
    KeyValuePairs, OperationKind, ResourceChanges, ResourceHandle, VirtualStorageResourceInfo,
    VnfInstance, VnfLinkPortInfo, VnfcInfoModification, VnfcResourceInfo,
};

/// Compute the change record of an operation of `kind` that moved an
/// instance from `before` to `after`.
///
/// MODIFY_INFO yields only `changed_info`. CHANGE_EXT_CONN additionally
/// yields `changed_ext_connectivity`. Every other kind yields only
/// `resource_changes`.
pub fn diff(kind: OperationKind, before: &VnfInstance, after: &VnfInstance) -> ChangeRecord {
    if kind == OperationKind::ModifyInfo {
        let info = changed_info(before, after);
        return ChangeRecord {
            changed_info: (!info.is_empty()).then_some(info),
            ..ChangeRecord::default()
        };
    }

    let b = before.instantiated_vnf_info.as_ref();
    let a = after.instantiated_vnf_info.as_ref();
    let changes = resource_changes(kind, b, a);
    let changed_ext_connectivity = if kind == OperationKind::ChangeExtConn {
        let links = changed_ext_connectivity(ext_links(b), ext_links(a));
        (!links.is_empty()).then_some(links)
    } else {
        None
    };
    ChangeRecord {
        resource_changes: (!changes.is_empty()).then_some(changes),
        changed_info: None,
        changed_ext_connectivity,
    }
}

// ── Id sets ──────────────────────────────────────────────────────────────────

struct IdDiff<'a, T> {
    removed: Vec<&'a T>,
    added: Vec<&'a T>,
    common: Vec<(&'a T, &'a T)>,
}

fn id_diff<'a, T>(before: &'a [T], after: &'a [T], id: impl Fn(&T) -> &str) -> IdDiff<'a, T> {
    let before_ids: HashSet<&str> = before.iter().map(&id).collect();
    let after_ids: HashSet<&str> = after.iter().map(&id).collect();
    IdDiff {
        removed: before
            .iter()
            .filter(|b| !after_ids.contains(id(*b)))
            .collect(),
        added: after
            .iter()
            .filter(|a| !before_ids.contains(id(*a)))
            .collect(),
        common: before
            .iter()
            .filter_map(|b| after.iter().find(|a| id(*a) == id(b)).map(|a| (b, a)))
            .collect(),
    }
}

fn minus(left: &[String], right: &[String]) -> Vec<String> {
    left.iter().filter(|x| !right.contains(x)).cloned().collect()
}

// ── Resource changes ─────────────────────────────────────────────────────────

fn resource_changes(
    kind: OperationKind,
    before: Option<&InstantiatedVnfInfo>,
    after: Option<&InstantiatedVnfInfo>,
) -> ResourceChanges {
    ResourceChanges {
        affected_vnfcs: affected_vnfcs(kind, vnfcs(before), vnfcs(after)),
        affected_virtual_links: affected_virtual_links(&links(before), &links(after)),
        affected_ext_link_ports: affected_ext_link_ports(
            &ext_link_ports(before),
            &ext_link_ports(after),
        ),
        affected_virtual_storages: affected_storages(storages(before), storages(after)),
    }
}

fn vnfcs(info: Option<&InstantiatedVnfInfo>) -> &[VnfcResourceInfo] {
    info.map(|i| i.vnfc_resource_info.as_slice()).unwrap_or_default()
}

fn storages(info: Option<&InstantiatedVnfInfo>) -> &[VirtualStorageResourceInfo] {
    info.map(|i| i.virtual_storage_resource_info.as_slice()).unwrap_or_default()
}

fn ext_links(info: Option<&InstantiatedVnfInfo>) -> &[ExtVirtualLinkInfo] {
    info.map(|i| i.ext_virtual_link_info.as_slice()).unwrap_or_default()
}

fn affected_vnfcs(
    kind: OperationKind,
    before: &[VnfcResourceInfo],
    after: &[VnfcResourceInfo],
) -> Vec<AffectedVnfc> {
    let sets = id_diff(before, after, |v| v.id.as_str());
    let entry = |v: &VnfcResourceInfo, change_type, added, removed| AffectedVnfc {
        id: v.id.clone(),
        vdu_id: v.vdu_id.clone(),
        change_type,
        compute_resource: v.compute_resource.clone(),
        affected_vnfc_cp_ids: v.vnfc_cp_info.iter().map(|cp| cp.id.clone()).collect(),
        added_storage_resource_ids: added,
        removed_storage_resource_ids: removed,
    };

    let mut out: Vec<AffectedVnfc> = sets
        .removed
        .into_iter()
        .map(|v| entry(v, ChangeType::Removed, Vec::new(), v.storage_resource_ids.clone()))
        .collect();
    out.extend(
        sets.added
            .into_iter()
            .map(|v| entry(v, ChangeType::Added, v.storage_resource_ids.clone(), Vec::new())),
    );
    if kind == OperationKind::ChangeVnfpkg {
        out.extend(
            sets.common
                .into_iter()
                .filter(|(b, a)| b.current_vnfd_id != a.current_vnfd_id)
                .map(|(b, a)| {
                    entry(
                        a,
                        ChangeType::Modified,
                        minus(&a.storage_resource_ids, &b.storage_resource_ids),
                        minus(&b.storage_resource_ids, &a.storage_resource_ids),
                    )
                }),
        );
    }
    out
}

fn affected_storages(
    before: &[VirtualStorageResourceInfo],
    after: &[VirtualStorageResourceInfo],
) -> Vec<AffectedVirtualStorage> {
    let sets = id_diff(before, after, |s| s.id.as_str());
    let entry = |s: &VirtualStorageResourceInfo, change_type| AffectedVirtualStorage {
        id: s.id.clone(),
        virtual_storage_desc_id: s.virtual_storage_desc_id.clone(),
        change_type,
        storage_resource: s.storage_resource.clone(),
    };
    sets.removed
        .into_iter()
        .map(|s| entry(s, ChangeType::Removed))
        .chain(sets.added.into_iter().map(|s| entry(s, ChangeType::Added)))
        .collect()
}

/// Internal and externally managed links share one id space and one
/// `affectedVirtualLinks` list.
struct LinkView<'a> {
    id: &'a str,
    desc_id: &'a str,
    network_resource: &'a ResourceHandle,
    ports: &'a [VnfLinkPortInfo],
}

fn links(info: Option<&InstantiatedVnfInfo>) -> Vec<LinkView<'_>> {
    let Some(info) = info else {
        return Vec::new();
    };
    let internal = info.vnf_virtual_link_resource_info.iter().map(|vl| LinkView {
        id: &vl.id,
        desc_id: &vl.vnf_virtual_link_desc_id,
        network_resource: &vl.network_resource,
        ports: &vl.vnf_link_ports,
    });
    let managed = info.ext_managed_virtual_link_info.iter().map(|vl| LinkView {
        id: &vl.id,
        desc_id: &vl.vnf_virtual_link_desc_id,
        network_resource: &vl.network_resource,
        ports: &vl.vnf_link_ports,
    });
    internal.chain(managed).collect()
}

fn affected_virtual_links<'a>(
    before: &[LinkView<'a>],
    after: &[LinkView<'a>],
) -> Vec<AffectedVirtualLink> {
    let sets = id_diff(before, after, |l| l.id);
    let entry = |l: &LinkView<'_>, change_type, ports: Vec<String>| AffectedVirtualLink {
        id: l.id.to_string(),
        vnf_virtual_link_desc_id: l.desc_id.to_string(),
        change_type,
        network_resource: l.network_resource.clone(),
        vnf_link_port_ids: ports,
    };
    let port_ids = |l: &LinkView<'_>| l.ports.iter().map(|p| p.id.clone()).collect::<Vec<_>>();

    let mut out: Vec<AffectedVirtualLink> = sets
        .removed
        .into_iter()
        .map(|l| entry(l, ChangeType::Removed, port_ids(l)))
        .collect();
    out.extend(
        sets.added
            .into_iter()
            .map(|l| entry(l, ChangeType::Added, port_ids(l))),
    );
    for (b, a) in sets.common {
        let before_ports = port_ids(b);
        let after_ports = port_ids(a);
        let added = minus(&after_ports, &before_ports);
        let removed = minus(&before_ports, &after_ports);
        if !added.is_empty() {
            out.push(entry(a, ChangeType::LinkPortAdded, added));
        }
        if !removed.is_empty() {
            out.push(entry(a, ChangeType::LinkPortRemoved, removed));
        }
    }
    out
}

fn ext_link_ports(info: Option<&InstantiatedVnfInfo>) -> Vec<ExtLinkPortInfo> {
    ext_links(info)
        .iter()
        .flat_map(|link| link.ext_link_ports.iter().cloned())
        .collect()
}

fn affected_ext_link_ports(
    before: &[ExtLinkPortInfo],
    after: &[ExtLinkPortInfo],
) -> Vec<AffectedExtLinkPort> {
    let sets = id_diff(before, after, |p| p.id.as_str());
    let entry = |p: &ExtLinkPortInfo, change_type| AffectedExtLinkPort {
        id: p.id.clone(),
        change_type,
        ext_cp_instance_id: p.cp_instance_id.clone(),
        resource_handle: p.resource_handle.clone(),
    };
    sets.removed
        .into_iter()
        .map(|p| entry(p, ChangeType::Removed))
        .chain(sets.added.into_iter().map(|p| entry(p, ChangeType::Added)))
        .collect()
}

// ── External connectivity ────────────────────────────────────────────────────

/// External links that are new, whose CP configuration changed, or whose
/// ports changed. Ports compare as (port id, backing resource id) pairs
/// since a port can keep its id while the resource behind it is replaced.
fn changed_ext_connectivity(
    before: &[ExtVirtualLinkInfo],
    after: &[ExtVirtualLinkInfo],
) -> Vec<ExtVirtualLinkInfo> {
    after
        .iter()
        .filter(|a| match before.iter().find(|b| b.id == a.id) {
            None => true,
            Some(b) => cp_config_key(b) != cp_config_key(a) || port_pairs(b) != port_pairs(a),
        })
        .cloned()
        .collect()
}

fn cp_config_key(link: &ExtVirtualLinkInfo) -> Value {
    canonicalize(&serde_json::to_value(&link.current_vnf_ext_cp_data).unwrap_or(Value::Null))
}

fn port_pairs(link: &ExtVirtualLinkInfo) -> BTreeSet<(&str, &str)> {
    link.ext_link_ports
        .iter()
        .map(|p| (p.id.as_str(), p.resource_handle.resource_id.as_str()))
        .collect()
}

/// Sort every array so that configuration order does not count as a change.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(arr) => {
            let mut items: Vec<Value> = arr.iter().map(canonicalize).collect();
            items.sort_by_cached_key(|v| v.to_string());
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ── Changed info (MODIFY_INFO) ───────────────────────────────────────────────

fn changed<T: PartialEq + Clone>(before: &T, after: &T) -> Option<T> {
    (before != after).then(|| after.clone())
}

fn changed_kv(
    before: &Option<KeyValuePairs>,
    after: &Option<KeyValuePairs>,
) -> Option<KeyValuePairs> {
    (before != after).then(|| after.clone().unwrap_or_default())
}

fn changed_info(before: &VnfInstance, after: &VnfInstance) -> ChangedInfo {
    let vim_before = serde_json::to_value(&before.vim_connection_info).unwrap_or(Value::Null);
    let vim_after = serde_json::to_value(&after.vim_connection_info).unwrap_or(Value::Null);
    let vim_connection_info = (vim_before != vim_after)
        .then(|| vim_after.as_object().cloned().unwrap_or_default());

    ChangedInfo {
        vnf_instance_name: changed(&before.vnf_instance_name, &after.vnf_instance_name)
            .map(Option::unwrap_or_default),
        vnf_instance_description: changed(
            &before.vnf_instance_description,
            &after.vnf_instance_description,
        )
        .map(Option::unwrap_or_default),
        vnf_configurable_properties: changed_kv(
            &before.vnf_configurable_properties,
            &after.vnf_configurable_properties,
        ),
        metadata: changed_kv(&before.metadata, &after.metadata),
        extensions: changed_kv(&before.extensions, &after.extensions),
        vim_connection_info,
        vnfd_id: changed(&before.vnfd_id, &after.vnfd_id),
        vnf_provider: changed(&before.vnf_provider, &after.vnf_provider),
        vnf_product_name: changed(&before.vnf_product_name, &after.vnf_product_name),
        vnf_software_version: changed(&before.vnf_software_version, &after.vnf_software_version),
        vnfd_version: changed(&before.vnfd_version, &after.vnfd_version),
        vnfc_info_modifications: vnfc_info_modifications(before, after),
    }
}

fn vnfc_info_modifications(
    before: &VnfInstance,
    after: &VnfInstance,
) -> Vec<VnfcInfoModification> {
    let (Some(b), Some(a)) = (&before.instantiated_vnf_info, &after.instantiated_vnf_info) else {
        return Vec::new();
    };
    a.vnfc_info
        .iter()
        .filter_map(|after_vnfc| {
            let before_vnfc = b.vnfc_info.iter().find(|v| v.id == after_vnfc.id)?;
            let props = changed_kv(
                &before_vnfc.vnfc_configurable_properties,
                &after_vnfc.vnfc_configurable_properties,
            )?;
            Some(VnfcInfoModification {
                id: after_vnfc.id.clone(),
                vnfc_configurable_properties: props,
            })
        })
        .collect()
}
