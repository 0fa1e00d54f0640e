use std::future::Future;

use super::TestResult;
use crate::{LcmStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "get_instance_nonexistent",
            get_instance_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_operation_nonexistent",
            get_operation_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_grant_nonexistent",
            get_grant_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "delete_grant_nonexistent_is_ok",
            delete_grant_nonexistent_is_ok(factory).await,
        ),
        TestResult::from_result(
            "error",
            "lists_empty_on_fresh_store",
            lists_empty_on_fresh_store(factory).await,
        ),
    ]
}

// ── 1. get_instance on empty store returns InstanceNotFound ─────────────────

async fn get_instance_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_instance("inst-999").await {
        Err(StorageError::InstanceNotFound { instance_id }) if instance_id == "inst-999" => Ok(()),
        other => Err(format!("expected InstanceNotFound(inst-999), got {:?}", other)),
    }
}

// ── 2. get_operation on empty store returns OperationNotFound ───────────────

async fn get_operation_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_operation("op-999").await {
        Err(StorageError::OperationNotFound { op_occ_id }) if op_occ_id == "op-999" => Ok(()),
        other => Err(format!("expected OperationNotFound(op-999), got {:?}", other)),
    }
}

// ── 3. get_grant on empty store returns GrantNotFound ───────────────────────

async fn get_grant_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_grant("op-999").await {
        Err(StorageError::GrantNotFound { op_occ_id }) if op_occ_id == "op-999" => Ok(()),
        other => Err(format!("expected GrantNotFound(op-999), got {:?}", other)),
    }
}

// ── 4. delete_grant of an absent pair commits cleanly ───────────────────────

async fn delete_grant_nonexistent_is_ok<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_grant(&mut snap, "op-999")
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    Ok(())
}

// ── 5. list queries on an empty store ───────────────────────────────────────

async fn lists_empty_on_fresh_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let instances = s.list_instances(None).await.map_err(|e| e.to_string())?;
    if !instances.is_empty() {
        return Err(format!("expected no instances, got {}", instances.len()));
    }
    let ops = s
        .list_operations(None, None)
        .await
        .map_err(|e| e.to_string())?;
    if !ops.is_empty() {
        return Err(format!("expected no operations, got {}", ops.len()));
    }
    Ok(())
}
