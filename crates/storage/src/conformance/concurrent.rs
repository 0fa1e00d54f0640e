use std::future::Future;
use std::sync::Arc;

use vnflcm_model::{InstantiationState, OperationState};

use super::{make_instance, make_operation, TestResult};
use crate::LcmStorage;

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "parallel_snapshots_on_different_instances_all_commit",
            parallel_snapshots_on_different_instances_all_commit(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "parallel_readers_see_committed_state",
            parallel_readers_see_committed_state(factory).await,
        ),
    ]
}

/// N tasks each write one instance and its operation record in their own
/// snapshot. Every pair must be visible afterwards.
async fn parallel_snapshots_on_different_instances_all_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::with_capacity(N);
    for i in 0..N {
        let s = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            let inst_id = format!("inst-{}", i);
            let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
            s.put_instance(
                &mut snap,
                make_instance(&inst_id, InstantiationState::Instantiated),
            )
            .await
            .map_err(|e| e.to_string())?;
            s.put_operation(
                &mut snap,
                make_operation(&format!("op-{}", i), &inst_id, OperationState::Completed),
            )
            .await
            .map_err(|e| e.to_string())?;
            s.commit_snapshot(snap).await.map_err(|e| e.to_string())
        }));
    }
    for h in handles {
        h.await.map_err(|e| format!("task panicked: {}", e))??;
    }

    let instances = storage
        .list_instances(None)
        .await
        .map_err(|e| e.to_string())?;
    let ops = storage
        .list_operations(None, None)
        .await
        .map_err(|e| e.to_string())?;
    if instances.len() != N || ops.len() != N {
        return Err(format!(
            "expected {} instances and operations, got {} and {}",
            N,
            instances.len(),
            ops.len()
        ));
    }
    Ok(())
}

async fn parallel_readers_see_committed_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut snap = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    storage
        .put_instance(
            &mut snap,
            make_instance("inst-1", InstantiationState::Instantiated),
        )
        .await
        .map_err(|e| e.to_string())?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| e.to_string())?;

    let mut handles = Vec::with_capacity(N);
    for _ in 0..N {
        let s = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            s.get_instance("inst-1")
                .await
                .map(|i| i.instantiation_state)
                .map_err(|e| e.to_string())
        }));
    }
    for h in handles {
        let state = h.await.map_err(|e| format!("task panicked: {}", e))??;
        if state != InstantiationState::Instantiated {
            return Err(format!("reader saw {}", state));
        }
    }
    Ok(())
}
