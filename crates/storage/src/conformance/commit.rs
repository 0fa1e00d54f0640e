//! Atomic commit conformance tests.
//!
//! The engine writes an instance together with its operation record, and a
//! grant pair together with its record. These tests check that such
//! multi-record snapshots land all at once or not at all.

use std::future::Future;

use vnflcm_model::{InstantiationState, OperationState};

use super::{make_grant, make_instance, make_operation, TestResult};
use crate::{LcmStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "commit",
            "instance_and_operation_visible_together",
            instance_and_operation_visible_together(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "grant_and_operation_visible_together",
            grant_and_operation_visible_together(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "abort_discards_every_record",
            abort_discards_every_record(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "last_write_in_snapshot_wins",
            last_write_in_snapshot_wins(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "completion_write_removes_grant",
            completion_write_removes_grant(factory).await,
        ),
    ]
}

async fn instance_and_operation_visible_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::Instantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_operation(
        &mut snap,
        make_operation("op-1", "inst-1", OperationState::Completed),
    )
    .await
    .map_err(|e| e.to_string())?;

    if s.get_instance("inst-1").await.is_ok() || s.get_operation("op-1").await.is_ok() {
        return Err("records visible before commit".to_string());
    }

    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    s.get_instance("inst-1").await.map_err(|e| e.to_string())?;
    s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn grant_and_operation_visible_together<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut rec = make_operation("op-1", "inst-1", OperationState::Processing);
    rec.grant_id = Some("grant-op-1".to_string());
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_grant(&mut snap, make_grant("op-1", "inst-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec)
        .await
        .map_err(|e| e.to_string())?;

    if s.get_grant("op-1").await.is_ok() {
        return Err("grant visible before commit".to_string());
    }

    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let pair = s.get_grant("op-1").await.map_err(|e| e.to_string())?;
    let rec = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if rec.grant_id.as_deref() != Some(pair.grant.id.as_str()) {
        return Err(format!(
            "record grant id {:?} does not match stored grant {}",
            rec.grant_id, pair.grant.id
        ));
    }
    Ok(())
}

async fn abort_discards_every_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::Instantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_operation(
        &mut snap,
        make_operation("op-1", "inst-1", OperationState::Processing),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_grant(&mut snap, make_grant("op-1", "inst-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(
        s.get_instance("inst-1").await,
        Err(StorageError::InstanceNotFound { .. })
    ) {
        return Err("instance survived abort".to_string());
    }
    if !matches!(
        s.get_operation("op-1").await,
        Err(StorageError::OperationNotFound { .. })
    ) {
        return Err("operation survived abort".to_string());
    }
    if !matches!(
        s.get_grant("op-1").await,
        Err(StorageError::GrantNotFound { .. })
    ) {
        return Err("grant survived abort".to_string());
    }
    Ok(())
}

async fn last_write_in_snapshot_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut rec = make_operation("op-1", "inst-1", OperationState::Starting);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec.clone())
        .await
        .map_err(|e| e.to_string())?;
    rec.transition(OperationState::Processing, "2025-01-01T00:00:01Z");
    s.put_operation(&mut snap, rec)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if got.operation_state != OperationState::Processing {
        return Err(format!("expected PROCESSING, got {}", got.operation_state));
    }
    Ok(())
}

/// The COMPLETED write stores the instance and the record and drops the
/// grant pair in one snapshot.
async fn completion_write_removes_grant<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_grant(&mut snap, make_grant("op-1", "inst-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.put_operation(
        &mut snap,
        make_operation("op-1", "inst-1", OperationState::Processing),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::Instantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_operation(
        &mut snap,
        make_operation("op-1", "inst-1", OperationState::Completed),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.delete_grant(&mut snap, "op-1")
        .await
        .map_err(|e| e.to_string())?;

    if s.get_grant("op-1").await.is_err() {
        return Err("grant removed before commit".to_string());
    }

    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if !matches!(
        s.get_grant("op-1").await,
        Err(StorageError::GrantNotFound { .. })
    ) {
        return Err("grant still present after completion commit".to_string());
    }
    let rec = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if rec.operation_state != OperationState::Completed {
        return Err(format!("expected COMPLETED, got {}", rec.operation_state));
    }
    Ok(())
}
