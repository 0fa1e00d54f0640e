//! Reconciliation passes and the auto-heal scheduler.

mod common;

use std::time::Duration;

use common::{compute_ids, scale, Harness, INSTANCE};
use vnflcm_engine::config::{AutoHealConfig, ReconcileConfig};
use vnflcm_engine::{AutoHealScheduler, Reconciler};
use vnflcm_model::{OperationKind, OperationParams, OperationState, ScaleType};
use vnflcm_storage::LcmStorage;

#[tokio::test]
async fn pass_without_drift_leaves_instance_alone() {
    let h = Harness::new().await;
    h.instantiate().await;
    let before = h.instance().await;

    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.unchanged, vec![INSTANCE.to_string()]);
    assert!(report.synced.is_empty());
    assert_eq!(h.driver.inspections(INSTANCE), 1);
    assert_eq!(h.instance().await, before);
}

#[tokio::test]
async fn drift_is_adopted_from_live_view() {
    let h = Harness::new().await;
    h.instantiate().await;
    h.driver.inject_drift(INSTANCE, |live| {
        live.vnfc_resource_info[0].compute_resource.resource_id = "replaced-by-hand".into();
    });

    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.synced, vec![INSTANCE.to_string()]);

    let inst = h.instance().await;
    assert!(compute_ids(&inst).contains(&"replaced-by-hand".to_string()));
    let info = inst.instantiated_vnf_info.as_ref().unwrap();
    assert_eq!(info.scale_level("VDU1_scale"), Some(0));
    assert_eq!(info.vnfc_info.len(), 2);

    // Now in step with the live view.
    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.unchanged, vec![INSTANCE.to_string()]);
}

#[tokio::test]
async fn instance_with_failed_temp_record_is_never_inspected() {
    let h = Harness::new().await;
    h.instantiate().await;
    h.driver.fail_next("scale");
    let failed = h.run(scale(ScaleType::ScaleOut, 1)).await;
    assert_eq!(failed.operation_state, OperationState::FailedTemp);
    h.driver.inject_drift(INSTANCE, |live| live.vnfc_resource_info.clear());
    let inspections = h.driver.inspections(INSTANCE);

    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.skipped_failed_temp, vec![INSTANCE.to_string()]);
    assert_eq!(h.driver.inspections(INSTANCE), inspections);
    assert!(h
        .driver
        .calls()
        .iter()
        .all(|c| c.method != "diff_check" && c.method != "sync"));
    assert_eq!(compute_ids(&h.instance().await).len(), 2);
}

#[tokio::test]
async fn locked_instance_is_skipped() {
    let h = Harness::new().await;
    h.instantiate().await;
    h.driver.inject_drift(INSTANCE, |live| live.vnfc_resource_info.clear());

    let guard = h.coordinator.locks().try_acquire(INSTANCE).unwrap();
    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.skipped_in_progress, vec![INSTANCE.to_string()]);
    drop(guard);

    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report.synced, vec![INSTANCE.to_string()]);
}

#[tokio::test]
async fn not_instantiated_instances_are_not_visited() {
    let h = Harness::new().await;
    let report = Reconciler::new(h.coordinator.clone()).run_pass().await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(h.driver.inspections(INSTANCE), 0);
}

#[tokio::test]
async fn spawned_loop_runs_until_shutdown() {
    let h = Harness::new().await;
    h.instantiate().await;
    let handle = Reconciler::new(h.coordinator.clone()).spawn(&ReconcileConfig {
        enabled: true,
        interval_secs: 60,
        initial_delay_secs: 0,
    });
    // The first tick fires immediately.
    for _ in 0..100 {
        if h.driver.inspections(INSTANCE) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;
    assert_eq!(h.driver.inspections(INSTANCE), 1);
}

fn scheduler(h: &Harness, timer_secs: u64) -> AutoHealScheduler<vnflcm_storage::MemoryStorage> {
    AutoHealScheduler::new(
        h.coordinator.clone(),
        &AutoHealConfig {
            enabled: true,
            timer_secs,
        },
    )
}

#[tokio::test]
async fn batched_faults_become_one_automatic_heal() {
    let h = Harness::new().await;
    h.instantiate().await;
    let vnfc_ids: Vec<String> = h
        .instance()
        .await
        .instantiated_vnf_info
        .unwrap()
        .vnfc_info
        .iter()
        .map(|v| v.id.clone())
        .collect();

    let heal = scheduler(&h, 1);
    heal.start();
    assert!(heal.report_fault(INSTANCE, [vnfc_ids[0].clone()]));
    assert!(heal.report_fault(
        INSTANCE,
        [vnfc_ids[0].clone(), "VDU1-gone".to_string()]
    ));
    assert_eq!(heal.pending(INSTANCE).len(), 2);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(heal.pending(INSTANCE).is_empty());

    let heals: Vec<_> = h
        .storage
        .list_operations(Some(INSTANCE), None)
        .await
        .unwrap()
        .into_iter()
        .filter(|op| op.operation() == OperationKind::Heal)
        .collect();
    assert_eq!(heals.len(), 1);
    let record = &heals[0];
    assert!(record.is_automatic_invocation);
    assert_eq!(record.operation_state, OperationState::Completed);
    let OperationParams::Heal(req) = &record.operation_params else {
        panic!("expected a heal request");
    };
    assert_eq!(req.vnfc_instance_id, vec![vnfc_ids[0].clone()]);
    assert_eq!(req.cause.as_deref(), Some("auto-heal"));
}

#[tokio::test]
async fn stopped_scheduler_drops_reports_and_pending_batches() {
    let h = Harness::new().await;
    h.instantiate().await;
    let heal = scheduler(&h, 60);

    assert!(!heal.report_fault(INSTANCE, ["VDU1-x".to_string()]));
    heal.start();
    assert!(heal.report_fault(INSTANCE, ["VDU1-x".to_string()]));
    assert_eq!(heal.stop(), 1);
    assert!(heal.pending(INSTANCE).is_empty());
    assert!(!heal.report_fault(INSTANCE, ["VDU1-y".to_string()]));
}
