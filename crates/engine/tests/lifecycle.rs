//! Happy-path lifecycle scenarios through the coordinator.

mod common;

use std::collections::BTreeSet;

use common::{compute_ids, instantiate_params, scale, Harness, INSTANCE};
use serde_json::json;
use vnflcm_storage::LcmStorage;
use vnflcm_model::{
    ChangeType, ChangeVnfPkgRequest, HealRequest, InstantiationState, OperationParams,
    OperationState, ScaleType, TerminateRequest, TerminationType,
};

fn ids<'a>(items: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    items.map(str::to_string).collect()
}

#[tokio::test]
async fn instantiate_completes_and_records_bookkeeping() {
    let h = Harness::new().await;
    let record = h.instantiate().await;

    assert_eq!(
        h.notifier.states_for(&record.id),
        vec![
            OperationState::Starting,
            OperationState::Processing,
            OperationState::Completed
        ]
    );
    assert!(record.error.is_none());
    assert!(record.grant_id.is_some());
    // Grant artifacts are gone once the record is terminal.
    assert!(h.storage.get_grant(&record.id).await.is_err());

    let inst = h.instance().await;
    assert_eq!(inst.instantiation_state, InstantiationState::Instantiated);
    assert!(inst.vim_connection_info.contains_key("default"));
    assert_eq!(inst.metadata.as_ref().unwrap()["owner"], "vendor");
    assert_eq!(
        inst.vnf_configurable_properties.as_ref().unwrap()["isAutoscaleEnabled"],
        false
    );
    let info = inst.instantiated_vnf_info.as_ref().unwrap();
    assert_eq!(info.flavour_id, "simple");
    assert_eq!(info.localization_language.as_deref(), Some("ja"));
    assert_eq!(info.vnfc_resource_info.len(), 2);
    assert_eq!(info.virtual_storage_resource_info.len(), 2);
    assert_eq!(info.scale_level("VDU1_scale"), Some(0));
    assert_eq!(info.max_scale_levels[0].scale_level, 3);

    let changes = record.resource_changes.as_ref().unwrap();
    assert_eq!(changes.affected_vnfcs.len(), 2);
    assert!(changes
        .affected_vnfcs
        .iter()
        .all(|v| v.change_type == ChangeType::Added));
    assert!(record.changed_info.is_none());
}

#[tokio::test]
async fn scale_out_then_in_restores_compute_ids() {
    let h = Harness::new().await;
    h.instantiate().await;
    let original = compute_ids(&h.instance().await);

    let out = h.run(scale(ScaleType::ScaleOut, 2)).await;
    assert_eq!(out.operation_state, OperationState::Completed);
    let inst = h.instance().await;
    assert_eq!(compute_ids(&inst).len(), 4);
    assert_eq!(
        inst.instantiated_vnf_info.as_ref().unwrap().scale_level("VDU1_scale"),
        Some(2)
    );

    let back = h.run(scale(ScaleType::ScaleIn, 2)).await;
    assert_eq!(back.operation_state, OperationState::Completed);
    let inst = h.instance().await;
    assert_eq!(compute_ids(&inst), original);
    assert_eq!(
        inst.instantiated_vnf_info.as_ref().unwrap().scale_level("VDU1_scale"),
        Some(0)
    );

    let out_changes = out.resource_changes.unwrap();
    let in_changes = back.resource_changes.unwrap();
    let added = ids(out_changes
        .affected_vnfcs
        .iter()
        .filter(|v| v.change_type == ChangeType::Added)
        .map(|v| v.id.as_str()));
    let removed = ids(in_changes
        .affected_vnfcs
        .iter()
        .filter(|v| v.change_type == ChangeType::Removed)
        .map(|v| v.id.as_str()));
    assert_eq!(added.len(), 2);
    assert_eq!(added, removed);

    let storages_added = ids(out_changes
        .affected_virtual_storages
        .iter()
        .map(|s| s.id.as_str()));
    let storages_removed = ids(in_changes
        .affected_virtual_storages
        .iter()
        .map(|s| s.id.as_str()));
    assert_eq!(storages_added, storages_removed);
}

#[tokio::test]
async fn terminate_reports_every_resource_removed() {
    let h = Harness::new().await;
    h.instantiate().await;
    let before = h.instance().await;
    let info = before.instantiated_vnf_info.as_ref().unwrap();
    let vnfcs = info.vnfc_resource_info.len();
    let storages = info.virtual_storage_resource_info.len();
    let links = ids(info.vnf_virtual_link_resource_info.iter().map(|l| l.id.as_str()));

    let record = h
        .run(OperationParams::Terminate(TerminateRequest {
            termination_type: TerminationType::Forceful,
            graceful_termination_timeout: None,
            additional_params: None,
        }))
        .await;
    assert_eq!(record.operation_state, OperationState::Completed);

    let changes = record.resource_changes.unwrap();
    assert_eq!(changes.affected_vnfcs.len(), vnfcs);
    assert!(changes
        .affected_vnfcs
        .iter()
        .all(|v| v.change_type == ChangeType::Removed));
    assert_eq!(changes.affected_virtual_storages.len(), storages);
    assert!(changes
        .affected_virtual_storages
        .iter()
        .all(|s| s.change_type == ChangeType::Removed));
    let removed_links = ids(changes
        .affected_virtual_links
        .iter()
        .filter(|l| l.change_type == ChangeType::Removed)
        .map(|l| l.id.as_str()));
    assert_eq!(removed_links, links);

    let inst = h.instance().await;
    assert_eq!(inst.instantiation_state, InstantiationState::NotInstantiated);
    assert!(inst.instantiated_vnf_info.is_none());
    assert!(inst.vim_connection_info.is_empty());
}

#[tokio::test]
async fn heal_replaces_compute_but_keeps_vnfc_ids() {
    let h = Harness::new().await;
    h.instantiate().await;
    let before = h.instance().await;
    let info = before.instantiated_vnf_info.as_ref().unwrap();
    let target = info.vnfc_info[0].clone();
    let old_compute = info
        .vnfc(&target.vnfc_resource_info_id)
        .unwrap()
        .compute_resource
        .resource_id
        .clone();

    let record = h
        .run(OperationParams::Heal(HealRequest {
            vnfc_instance_id: vec![target.id.clone()],
            cause: Some("unresponsive".into()),
            additional_params: None,
        }))
        .await;
    assert_eq!(record.operation_state, OperationState::Completed);

    let after = h.instance().await;
    let healed = after
        .instantiated_vnf_info
        .as_ref()
        .unwrap()
        .vnfc(&target.vnfc_resource_info_id)
        .unwrap();
    assert_ne!(healed.compute_resource.resource_id, old_compute);
    // Ids are stable across a heal, so nothing is added or removed.
    assert!(record.resource_changes.is_none());
}

#[tokio::test]
async fn change_vnfpkg_moves_instance_to_new_descriptor() {
    let h = Harness::new().await;
    h.instantiate().await;

    let req: ChangeVnfPkgRequest = serde_json::from_value(json!({
        "vnfdId": "vnfd-2",
        "additionalParams": {
            "upgrade_type": "RollingUpdate",
            "vdu_params": [{"vdu_id": "VDU1"}]
        }
    }))
    .unwrap();
    let record = h.run(OperationParams::ChangeVnfpkg(req)).await;
    assert_eq!(record.operation_state, OperationState::Completed);

    let inst = h.instance().await;
    assert_eq!(inst.vnfd_id, "vnfd-2");
    assert_eq!(inst.vnf_software_version, "2.0");
    let info = inst.instantiated_vnf_info.as_ref().unwrap();
    assert!(info
        .vnfc_resource_info
        .iter()
        .all(|v| v.current_vnfd_id.as_deref() == Some("vnfd-2")));
    let changes = record.resource_changes.unwrap();
    assert_eq!(changes.affected_vnfcs.len(), 2);
    assert!(changes
        .affected_vnfcs
        .iter()
        .all(|v| v.change_type == ChangeType::Modified));
}

#[tokio::test]
async fn submit_enforces_instantiation_state() {
    let h = Harness::new().await;
    let err = h
        .coordinator
        .submit(INSTANCE, scale(ScaleType::ScaleOut, 1), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("NOT_INSTANTIATED"));

    h.instantiate().await;
    assert!(h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .is_err());
}

#[tokio::test]
async fn only_one_unfinished_operation_per_instance() {
    let h = Harness::new().await;
    let first = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();
    let err = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        vnflcm_engine::LcmError::OperationInProgress { .. }
    ));

    let done = h.coordinator.execute(&first.id).await.unwrap();
    assert_eq!(done.operation_state, OperationState::Completed);
}

#[tokio::test]
async fn spawned_operations_run_on_their_own_tasks() {
    let h = Harness::new().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();
    let done = h.coordinator.spawn_execute(&record.id).await.unwrap().unwrap();
    assert_eq!(done.operation_state, OperationState::Completed);
    assert!(!h.coordinator.locks().is_held(INSTANCE));
}
