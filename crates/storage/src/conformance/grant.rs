//! Grant pairing conformance tests.

use std::future::Future;

use super::{make_grant, TestResult};
use crate::{LcmStorage, StorageError};

pub(super) async fn run_grant_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "grant",
            "grant_pair_keyed_by_operation",
            grant_pair_keyed_by_operation(factory).await,
        ),
        TestResult::from_result(
            "grant",
            "delete_removes_request_and_grant",
            delete_removes_request_and_grant(factory).await,
        ),
        TestResult::from_result(
            "grant",
            "delete_leaves_other_pairs",
            delete_leaves_other_pairs(factory).await,
        ),
        TestResult::from_result(
            "grant",
            "put_grant_replaces_pair",
            put_grant_replaces_pair(factory).await,
        ),
    ]
}

async fn grant_pair_keyed_by_operation<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.put_grant(&mut snap, make_grant("op-2", "inst-2"))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let p1 = s.get_grant("op-1").await.map_err(|e| e.to_string())?;
    let p2 = s.get_grant("op-2").await.map_err(|e| e.to_string())?;
    if p1.grant_request.vnf_instance_id != "inst-1" || p1.grant.vnf_lcm_op_occ_id != "op-1" {
        return Err(format!("op-1 pair mismatched: {:?}", p1));
    }
    if p2.grant_request.vnf_instance_id != "inst-2" || p2.grant.vnf_lcm_op_occ_id != "op-2" {
        return Err(format!("op-2 pair mismatched: {:?}", p2));
    }
    Ok(())
}

async fn delete_removes_request_and_grant<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.delete_grant(&mut snap, "op-1")
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.get_grant("op-1").await {
        Err(StorageError::GrantNotFound { .. }) => Ok(()),
        other => Err(format!("expected GrantNotFound after delete, got {:?}", other)),
    }
}

async fn delete_leaves_other_pairs<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.put_grant(&mut snap, make_grant("op-2", "inst-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.delete_grant(&mut snap, "op-1")
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_grant("op-1").await.is_ok() {
        return Err("op-1 pair survived delete".to_string());
    }
    s.get_grant("op-2").await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn put_grant_replaces_pair<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut replacement = make_grant("op-1", "inst-1");
    replacement.grant.id = "grant-renegotiated".to_string();
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.put_grant(&mut snap, replacement)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_grant("op-1").await.map_err(|e| e.to_string())?;
    if got.grant.id != "grant-renegotiated" {
        return Err(format!("expected replaced grant, got {}", got.grant.id));
    }
    Ok(())
}
