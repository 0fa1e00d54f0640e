//! List filtering conformance tests.

use std::future::Future;

use vnflcm_model::{InstantiationState, OperationState};

use super::{make_instance, make_operation, make_operation_at, TestResult};
use crate::LcmStorage;

pub(super) async fn run_filter_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "filter",
            "list_instances_by_state",
            list_instances_by_state(factory).await,
        ),
        TestResult::from_result(
            "filter",
            "list_operations_by_instance",
            list_operations_by_instance(factory).await,
        ),
        TestResult::from_result(
            "filter",
            "list_operations_by_state",
            list_operations_by_state(factory).await,
        ),
        TestResult::from_result(
            "filter",
            "list_operations_by_instance_and_state",
            list_operations_by_instance_and_state(factory).await,
        ),
        TestResult::from_result(
            "filter",
            "list_operations_ordered_by_start_time",
            list_operations_ordered_by_start_time(factory).await,
        ),
    ]
}

async fn seed<S: LcmStorage>(s: &S) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-a", InstantiationState::Instantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-b", InstantiationState::NotInstantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.put_instance(
        &mut snap,
        make_instance("inst-c", InstantiationState::Instantiated),
    )
    .await
    .map_err(|e| e.to_string())?;
    for (id, inst, state) in [
        ("op-1", "inst-a", OperationState::Completed),
        ("op-2", "inst-a", OperationState::FailedTemp),
        ("op-3", "inst-b", OperationState::FailedTemp),
        ("op-4", "inst-c", OperationState::Processing),
    ] {
        s.put_operation(&mut snap, make_operation(id, inst, state))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())
}

fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
    items.iter().map(|i| id(i).to_string()).collect()
}

async fn list_instances_by_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s).await?;

    let all = s.list_instances(None).await.map_err(|e| e.to_string())?;
    if ids(&all, |i| &i.id) != ["inst-a", "inst-b", "inst-c"] {
        return Err(format!("unexpected unfiltered list {:?}", ids(&all, |i| &i.id)));
    }
    let inst = s
        .list_instances(Some(InstantiationState::Instantiated))
        .await
        .map_err(|e| e.to_string())?;
    if ids(&inst, |i| &i.id) != ["inst-a", "inst-c"] {
        return Err(format!("unexpected INSTANTIATED list {:?}", ids(&inst, |i| &i.id)));
    }
    Ok(())
}

async fn list_operations_by_instance<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s).await?;

    let ops = s
        .list_operations(Some("inst-a"), None)
        .await
        .map_err(|e| e.to_string())?;
    if ids(&ops, |o| &o.id) != ["op-1", "op-2"] {
        return Err(format!("unexpected inst-a operations {:?}", ids(&ops, |o| &o.id)));
    }
    Ok(())
}

async fn list_operations_by_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s).await?;

    let ops = s
        .list_operations(None, Some(OperationState::FailedTemp))
        .await
        .map_err(|e| e.to_string())?;
    if ids(&ops, |o| &o.id) != ["op-2", "op-3"] {
        return Err(format!("unexpected FAILED_TEMP operations {:?}", ids(&ops, |o| &o.id)));
    }
    Ok(())
}

async fn list_operations_by_instance_and_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed(&s).await?;

    let ops = s
        .list_operations(Some("inst-c"), Some(OperationState::FailedTemp))
        .await
        .map_err(|e| e.to_string())?;
    if !ops.is_empty() {
        return Err(format!("expected no FAILED_TEMP on inst-c, got {:?}", ids(&ops, |o| &o.id)));
    }
    Ok(())
}

async fn list_operations_ordered_by_start_time<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (id, at) in [
        ("op-z", "2025-01-01T00:00:01Z"),
        ("op-y", "2025-01-01T00:00:03Z"),
        ("op-x", "2025-01-01T00:00:02Z"),
    ] {
        s.put_operation(
            &mut snap,
            make_operation_at(id, "inst-1", OperationState::Completed, at),
        )
        .await
        .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let ops = s
        .list_operations(Some("inst-1"), None)
        .await
        .map_err(|e| e.to_string())?;
    if ids(&ops, |o| &o.id) != ["op-z", "op-x", "op-y"] {
        return Err(format!("unexpected order {:?}", ids(&ops, |o| &o.id)));
    }
    Ok(())
}
