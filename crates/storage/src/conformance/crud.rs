//! Basic put/get conformance tests, plus the conditional cancel flag.

use std::future::Future;

use vnflcm_model::{InstantiationState, OperationState};

use super::{make_grant, make_instance, make_operation, TestResult};
use crate::LcmStorage;

pub(super) async fn run_crud_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "crud",
            "put_instance_then_get",
            put_instance_then_get(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_instance_replaces_existing",
            put_instance_replaces_existing(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_operation_then_get",
            put_operation_then_get(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_operation_replaces_existing",
            put_operation_replaces_existing(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "put_grant_then_get",
            put_grant_then_get(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "mark_cancel_pending_flags_running_record",
            mark_cancel_pending_flags_running_record(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "mark_cancel_pending_leaves_settled_record",
            mark_cancel_pending_leaves_settled_record(factory).await,
        ),
    ]
}

// ── 1. put_instance_then_get ────────────────────────────────────────────────

async fn put_instance_then_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let inst = make_instance("inst-1", InstantiationState::Instantiated);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(&mut snap, inst.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_instance("inst-1").await.map_err(|e| e.to_string())?;
    if got != inst {
        return Err(format!("stored instance differs: {:?}", got));
    }
    Ok(())
}

// ── 2. put_instance_replaces_existing ───────────────────────────────────────

async fn put_instance_replaces_existing<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::NotInstantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_instance("inst-1").await.map_err(|e| e.to_string())?;
    if got.instantiation_state != InstantiationState::NotInstantiated {
        return Err(format!(
            "expected NOT_INSTANTIATED after replace, got {}",
            got.instantiation_state
        ));
    }
    if got.instantiated_vnf_info.is_some() {
        return Err("expected snapshot to be cleared after replace".to_string());
    }
    Ok(())
}

// ── 3. put_operation_then_get ───────────────────────────────────────────────

async fn put_operation_then_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = make_operation("op-1", "inst-1", OperationState::Starting);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if got != rec {
        return Err(format!("stored operation differs: {:?}", got));
    }
    Ok(())
}

// ── 4. put_operation_replaces_existing ──────────────────────────────────────

async fn put_operation_replaces_existing<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    rec.transition(OperationState::Processing, "2025-01-01T00:00:05Z");
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if got.operation_state != OperationState::Processing {
        return Err(format!("expected PROCESSING, got {}", got.operation_state));
    }
    if got.state_entered_time != "2025-01-01T00:00:05Z" {
        return Err(format!(
            "expected updated stateEnteredTime, got {}",
            got.state_entered_time
        ));
    }
    Ok(())
}

// ── 5. put_grant_then_get ───────────────────────────────────────────────────

async fn put_grant_then_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let pair = make_grant("op-1", "inst-1");
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_grant(&mut snap, pair.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_grant("op-1").await.map_err(|e| e.to_string())?;
    if got != pair {
        return Err(format!("stored grant pair differs: {:?}", got));
    }
    Ok(())
}

// ── 6. mark_cancel_pending_flags_running_record ─────────────────────────────

async fn mark_cancel_pending_flags_running_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = make_operation("op-1", "inst-1", OperationState::Processing);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let returned = s
        .mark_cancel_pending("op-1")
        .await
        .map_err(|e| e.to_string())?;
    if !returned.is_cancel_pending {
        return Err("returned record is not flagged".to_string());
    }
    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if !got.is_cancel_pending {
        return Err("stored record is not flagged".to_string());
    }
    if got.operation_state != OperationState::Processing || got.start_time != rec.start_time {
        return Err(format!("flagging changed other fields: {:?}", got));
    }
    Ok(())
}

// ── 7. mark_cancel_pending_leaves_settled_record ────────────────────────────

async fn mark_cancel_pending_leaves_settled_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = make_operation("op-1", "inst-1", OperationState::Completed);
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap, rec.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let returned = s
        .mark_cancel_pending("op-1")
        .await
        .map_err(|e| e.to_string())?;
    if returned.operation_state != OperationState::Completed {
        return Err(format!("expected COMPLETED, got {}", returned.operation_state));
    }
    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if got != rec {
        return Err(format!("settled record was modified: {:?}", got));
    }
    match s.mark_cancel_pending("missing").await {
        Err(crate::StorageError::OperationNotFound { .. }) => Ok(()),
        other => Err(format!("expected OperationNotFound, got {:?}", other)),
    }
}
