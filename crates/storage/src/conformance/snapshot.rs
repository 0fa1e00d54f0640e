//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted writes are discarded.

use std::future::Future;

use vnflcm_model::{InstantiationState, OperationState};

use super::{make_instance, make_operation, TestResult};
use crate::{LcmStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "begin_and_commit_empty_snapshot",
        begin_and_commit_empty_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_instance_invisible_to_get",
        uncommitted_instance_invisible_to_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_instance_invisible_to_list",
        uncommitted_instance_invisible_to_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_operation_update_invisible",
        uncommitted_operation_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_instance",
        abort_discards_instance(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_discards_writes",
        dropped_snapshot_discards_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "sequential_snapshots_see_prior_commits",
        sequential_snapshots_see_prior_commits(factory).await,
    ));

    results
}

// ── 1. begin_and_commit_empty_snapshot ──────────────────────────────────────

async fn begin_and_commit_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

// ── 2. uncommitted_instance_invisible_to_get ────────────────────────────────

async fn uncommitted_instance_invisible_to_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::NotInstantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    // Snapshot still open.

    let result = s.get_instance("inst-1").await;
    if !matches!(result, Err(StorageError::InstanceNotFound { .. })) {
        return Err(format!(
            "expected InstanceNotFound for uncommitted instance, got {:?}",
            result
        ));
    }

    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

// ── 3. uncommitted_instance_invisible_to_list ───────────────────────────────

async fn uncommitted_instance_invisible_to_list<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let list = s.list_instances(None).await.map_err(|e| e.to_string())?;
    if !list.is_empty() {
        return Err(format!(
            "expected empty list for uncommitted instance, got {} items",
            list.len()
        ));
    }

    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

// ── 4. uncommitted_operation_update_invisible ───────────────────────────────

async fn uncommitted_operation_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut rec = make_operation("op-1", "inst-1", OperationState::Starting);
    let mut snap1 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap1, rec.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap1).await.map_err(|e| e.to_string())?;

    rec.transition(OperationState::Processing, "2025-01-01T00:00:01Z");
    let mut snap2 = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_operation(&mut snap2, rec)
        .await
        .map_err(|e| e.to_string())?;

    let got = s.get_operation("op-1").await.map_err(|e| e.to_string())?;
    if got.operation_state != OperationState::Starting {
        return Err(format!(
            "expected STARTING while update uncommitted, got {}",
            got.operation_state
        ));
    }

    s.abort_snapshot(snap2).await.map_err(|e| e.to_string())?;
    Ok(())
}

// ── 5. abort_discards_instance ──────────────────────────────────────────────

async fn abort_discards_instance<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-1", InstantiationState::NotInstantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.get_instance("inst-1").await {
        Err(StorageError::InstanceNotFound { .. }) => Ok(()),
        other => Err(format!("expected InstanceNotFound after abort, got {:?}", other)),
    }
}

// ── 6. dropped_snapshot_discards_writes ─────────────────────────────────────

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.put_operation(
            &mut snap,
            make_operation("op-1", "inst-1", OperationState::Starting),
        )
        .await
        .map_err(|e| e.to_string())?;
    }

    match s.get_operation("op-1").await {
        Err(StorageError::OperationNotFound { .. }) => Ok(()),
        other => Err(format!(
            "expected OperationNotFound after dropped snapshot, got {:?}",
            other
        )),
    }
}

// ── 7. sequential_snapshots_see_prior_commits ───────────────────────────────

async fn sequential_snapshots_see_prior_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for i in 0..3 {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.put_instance(
            &mut snap,
            make_instance(&format!("inst-{}", i), InstantiationState::Instantiated),
        )
        .await
        .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

        let list = s.list_instances(None).await.map_err(|e| e.to_string())?;
        if list.len() != i + 1 {
            return Err(format!(
                "after {} commits expected {} instances, got {}",
                i + 1,
                i + 1,
                list.len()
            ));
        }
    }
    Ok(())
}
