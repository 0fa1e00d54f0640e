//! Grant denial, driver failures, retry, rollback, fail, cancel, lock
//! timeouts and crash recovery.

mod common;

use common::{config, instantiate_params, scale, Harness, INSTANCE};
use vnflcm_engine::LcmError;
use vnflcm_storage::LcmStorage;
use vnflcm_model::{
    HealRequest, InstantiationState, ModifyInfoRequest, OperationParams, OperationState,
    ScaleType,
};

#[tokio::test]
async fn denied_grant_rolls_back_without_touching_infrastructure() {
    let h = Harness::new().await.deny_grants();
    let record = h.run(instantiate_params()).await;

    assert_eq!(record.operation_state, OperationState::RolledBack);
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.status, 403);
    assert!(h.driver.calls().is_empty());
    assert_eq!(
        h.notifier.states_for(&record.id),
        vec![OperationState::Starting, OperationState::RolledBack]
    );
    assert_eq!(
        h.instance().await.instantiation_state,
        InstantiationState::NotInstantiated
    );
}

#[tokio::test]
async fn driver_failure_then_retry_completes() {
    let h = Harness::new().await;
    h.driver.fail_next("instantiate");
    let failed = h.run(instantiate_params()).await;

    assert_eq!(failed.operation_state, OperationState::FailedTemp);
    assert_eq!(failed.error.as_ref().unwrap().status, 500);
    // The grant survives for a later retry or rollback.
    assert!(h.storage.get_grant(&failed.id).await.is_ok());
    assert_eq!(
        h.instance().await.instantiation_state,
        InstantiationState::NotInstantiated
    );

    let done = h.coordinator.retry(&failed.id).await.unwrap();
    assert_eq!(done.operation_state, OperationState::Completed);
    assert!(done.error.is_none());
    assert_eq!(done.grant_id, failed.grant_id);
    assert_eq!(
        h.instance().await.instantiation_state,
        InstantiationState::Instantiated
    );
    assert_eq!(
        h.notifier.states_for(&failed.id),
        vec![
            OperationState::Starting,
            OperationState::Processing,
            OperationState::FailedTemp,
            OperationState::Processing,
            OperationState::Completed,
        ]
    );
}

#[tokio::test]
async fn failed_instantiate_rolls_back() {
    let h = Harness::new().await;
    h.driver.fail_next("instantiate");
    let failed = h.run(instantiate_params()).await;
    assert_eq!(failed.operation_state, OperationState::FailedTemp);

    let rolled = h.coordinator.rollback(&failed.id).await.unwrap();
    assert_eq!(rolled.operation_state, OperationState::RolledBack);
    assert!(h.storage.get_grant(&failed.id).await.is_err());
    let methods: Vec<&str> = h.driver.calls().iter().map(|c| c.method).collect();
    assert_eq!(methods, vec!["instantiate", "instantiate_rollback"]);

    let inst = h.instance().await;
    assert_eq!(inst.instantiation_state, InstantiationState::NotInstantiated);
    assert!(inst.vim_connection_info.is_empty());

    // A fresh instantiate is accepted once the record is terminal.
    h.instantiate().await;
}

#[tokio::test]
async fn failed_rollback_returns_to_failed_temp() {
    let h = Harness::new().await;
    h.instantiate().await;
    h.driver.fail_next("scale");
    let failed = h.run(scale(ScaleType::ScaleOut, 1)).await;
    assert_eq!(failed.operation_state, OperationState::FailedTemp);

    h.driver.fail_next("scale_rollback");
    let again = h.coordinator.rollback(&failed.id).await.unwrap();
    assert_eq!(again.operation_state, OperationState::FailedTemp);

    let rolled = h.coordinator.rollback(&failed.id).await.unwrap();
    assert_eq!(rolled.operation_state, OperationState::RolledBack);
}

#[tokio::test]
async fn rollback_of_scale_in_is_rejected_and_record_stays_failed_temp() {
    let h = Harness::new().await;
    h.instantiate().await;
    h.driver.fail_next("scale");
    let failed = h.run(scale(ScaleType::ScaleIn, 1)).await;
    assert_eq!(failed.operation_state, OperationState::FailedTemp);

    let err = h.coordinator.rollback(&failed.id).await.unwrap_err();
    assert!(matches!(err, LcmError::RollbackNotSupported { .. }));
    let stored = h.operation(&failed.id).await;
    assert_eq!(stored.operation_state, OperationState::FailedTemp);
    assert!(!h
        .notifier
        .states_for(&failed.id)
        .contains(&OperationState::RollingBack));
}

#[tokio::test]
async fn rollback_of_heal_is_rejected() {
    let h = Harness::new().await;
    h.instantiate().await;
    let target = h.instance().await.instantiated_vnf_info.unwrap().vnfc_info[0]
        .id
        .clone();
    h.driver.fail_next("heal");
    let failed = h
        .run(OperationParams::Heal(HealRequest {
            vnfc_instance_id: vec![target],
            cause: None,
            additional_params: None,
        }))
        .await;
    assert_eq!(failed.operation_state, OperationState::FailedTemp);
    assert!(h.coordinator.rollback(&failed.id).await.is_err());
    assert_eq!(
        h.operation(&failed.id).await.operation_state,
        OperationState::FailedTemp
    );
}

#[tokio::test]
async fn retry_after_successful_start_is_rejected() {
    let h = Harness::new().await;
    let record = h.instantiate().await;
    let snapshot = h.operation(&record.id).await;

    let err = h.coordinator.retry(&record.id).await.unwrap_err();
    assert!(matches!(err, LcmError::ConsistencyViolation { .. }));
    assert_eq!(h.operation(&record.id).await, snapshot);
}

#[tokio::test]
async fn out_of_state_calls_leave_the_record_unchanged() {
    let h = Harness::new().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();
    let snapshot = h.operation(&record.id).await;

    for result in [
        h.coordinator.retry(&record.id).await,
        h.coordinator.rollback(&record.id).await,
        h.coordinator.fail(&record.id).await,
        h.coordinator.modify_info(&record.id).await,
    ] {
        assert!(matches!(
            result,
            Err(LcmError::ConsistencyViolation { .. })
        ));
    }
    assert_eq!(h.operation(&record.id).await, snapshot);
    assert!(h.notifier.states_for(&record.id).is_empty());

    let done = h.coordinator.execute(&record.id).await.unwrap();
    assert_eq!(done.operation_state, OperationState::Completed);
    assert!(h.coordinator.start(&record.id).await.is_err());
    assert!(h.coordinator.cancel(&record.id).await.is_err());
}

#[tokio::test]
async fn operator_fail_is_terminal_and_drops_the_grant() {
    let h = Harness::new().await;
    h.driver.fail_next("instantiate");
    let failed = h.run(instantiate_params()).await;

    let record = h.coordinator.fail(&failed.id).await.unwrap();
    assert_eq!(record.operation_state, OperationState::Failed);
    assert!(h.storage.get_grant(&failed.id).await.is_err());
    assert_eq!(
        h.notifier.states_for(&failed.id).last(),
        Some(&OperationState::Failed)
    );
    assert!(h.coordinator.retry(&failed.id).await.is_err());
}

#[tokio::test]
async fn cancel_before_start_rolls_back() {
    let h = Harness::new().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();
    let flagged = h.coordinator.cancel(&record.id).await.unwrap();
    assert!(flagged.is_cancel_pending);

    let done = h.coordinator.execute(&record.id).await.unwrap();
    assert_eq!(done.operation_state, OperationState::RolledBack);
    assert!(!done.is_cancel_pending);
    assert_eq!(done.error.as_ref().unwrap().title, "Operation Cancelled");
    assert!(h.driver.calls().is_empty());
}

/// A harness whose blocking lock gives up at once.
async fn impatient() -> Harness {
    let mut config = config();
    config.lock.timeout_secs = 0;
    Harness::with_config(config).await
}

#[tokio::test]
async fn lock_timeout_rolls_back_a_record_that_never_started() {
    let h = impatient().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();

    let guard = h.coordinator.locks().try_acquire(INSTANCE).unwrap();
    let settled = h.coordinator.execute(&record.id).await.unwrap();
    assert_eq!(settled.operation_state, OperationState::RolledBack);
    let error = settled.error.as_ref().unwrap();
    assert_eq!(error.status, 409);
    assert_eq!(error.title, "Operation In Progress");
    assert_eq!(
        h.notifier.states_for(&record.id),
        vec![OperationState::Starting, OperationState::RolledBack]
    );
    assert!(h.driver.calls().is_empty());
    drop(guard);

    // The instance is not left blocked.
    h.instantiate().await;
}

#[tokio::test]
async fn lock_timeout_fails_a_waiting_modify_info() {
    let h = impatient().await;
    let record = h
        .coordinator
        .submit(
            INSTANCE,
            OperationParams::ModifyInfo(ModifyInfoRequest {
                vnf_instance_name: Some("edge-fw".into()),
                ..Default::default()
            }),
            false,
        )
        .await
        .unwrap();

    let guard = h.coordinator.locks().try_acquire(INSTANCE).unwrap();
    let settled = h.coordinator.execute(&record.id).await.unwrap();
    assert_eq!(settled.operation_state, OperationState::FailedTemp);
    assert_eq!(settled.error.as_ref().unwrap().status, 409);
    assert_eq!(
        h.notifier.states_for(&record.id),
        vec![OperationState::Processing, OperationState::FailedTemp]
    );
    assert_eq!(h.instance().await.vnf_instance_name.as_deref(), Some("sample"));

    // An operator retry waits on the lock as usual and leaves FAILED_TEMP
    // untouched when it gives up.
    let err = h.coordinator.retry(&record.id).await.unwrap_err();
    assert!(matches!(err, LcmError::OperationInProgress { .. }));
    assert_eq!(
        h.operation(&record.id).await.operation_state,
        OperationState::FailedTemp
    );
    drop(guard);

    let done = h.coordinator.retry(&record.id).await.unwrap();
    assert_eq!(done.operation_state, OperationState::Completed);
    assert_eq!(h.instance().await.vnf_instance_name.as_deref(), Some("edge-fw"));
}

#[tokio::test]
async fn recovery_moves_processing_to_failed_temp_with_one_notification() {
    let h = Harness::new().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();
    h.force_state(&record.id, OperationState::Processing).await;

    let recovered = h.coordinator.recover().await.unwrap();
    assert_eq!(recovered.len(), 1);
    let stored = h.operation(&record.id).await;
    assert_eq!(stored.operation_state, OperationState::FailedTemp);
    assert_eq!(stored.error.as_ref().unwrap().title, "Operation Interrupted");
    assert_eq!(
        h.notifier.states_for(&record.id),
        vec![OperationState::FailedTemp]
    );
}

#[tokio::test]
async fn recovery_rolls_back_records_that_never_left_starting() {
    let h = Harness::new().await;
    let record = h
        .coordinator
        .submit(INSTANCE, instantiate_params(), false)
        .await
        .unwrap();

    h.coordinator.recover().await.unwrap();
    let stored = h.operation(&record.id).await;
    assert_eq!(stored.operation_state, OperationState::RolledBack);
    assert!(stored.error.is_some());
    // A second pass finds nothing left to recover.
    assert!(h.coordinator.recover().await.unwrap().is_empty());
}
