//! Behavioural checks every `LcmStorage` backend must pass.
//!
//! The checks are plain async functions grouped by concern:
//!
//! - `crud`: instances, operation records and grant pairs round-trip by id
//! - `snapshot`: staged writes stay invisible to readers until commit
//! - `commit`: a snapshot touching several records lands whole or not at all
//! - `grant`: a grant request and its grant are read and deleted as one pair
//! - `filter`: list queries honour state and instance filters
//! - `error`: missing records surface the matching `StorageError` variant
//! - `concurrent`: snapshots on distinct instances commit side by side
//!
//! A backend's test crate hands [`run_conformance_suite`] a factory; each
//! check gets its own empty store from it.
//!
//! ```ignore
//! #[tokio::test]
//! async fn memory_backend_conforms() {
//!     let report = vnflcm_storage::conformance::run_conformance_suite(|| async {
//!         vnflcm_storage::MemoryStorage::new()
//!     })
//!     .await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod crud;
mod error;
mod filter;
mod grant;
mod snapshot;

use std::fmt;
use std::future::Future;

use vnflcm_model::{
    Grant, GrantRequest, InstantiatedVnfInfo, InstantiationState, OperationKind, OperationParams,
    OperationRecord, OperationState, ScaleRequest, ScaleType, VnfInstance,
};

use crate::record::GrantRecord;
use crate::LcmStorage;

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "crud", "snapshot", "grant").
    pub category: String,
    /// Test name (e.g. "put_instance_then_get").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Pass/fail tally over a whole run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run every check against stores built by `factory`, one store per check.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: LcmStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(crud::run_crud_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(grant::run_grant_tests(&factory).await);
    results.extend(filter::run_filter_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_instance(id: &str, state: InstantiationState) -> VnfInstance {
    let mut inst = VnfInstance::new(id, "vnfd-test");
    inst.instantiation_state = state;
    if state == InstantiationState::Instantiated {
        inst.instantiated_vnf_info = Some(InstantiatedVnfInfo::new("simple"));
    }
    inst
}

fn make_operation(id: &str, instance_id: &str, state: OperationState) -> OperationRecord {
    make_operation_at(id, instance_id, state, "2025-01-01T00:00:00Z")
}

fn make_operation_at(
    id: &str,
    instance_id: &str,
    state: OperationState,
    start_time: &str,
) -> OperationRecord {
    OperationRecord::new(
        id,
        instance_id,
        OperationParams::Scale(ScaleRequest {
            scale_type: ScaleType::ScaleOut,
            aspect_id: "worker".to_string(),
            number_of_steps: 1,
            additional_params: None,
        }),
        state,
        start_time,
    )
}

fn make_grant(op_occ_id: &str, instance_id: &str) -> GrantRecord {
    let request = GrantRequest::new(instance_id, op_occ_id, "vnfd-test", OperationKind::Scale);
    let grant = Grant {
        id: format!("grant-{}", op_occ_id),
        vnf_instance_id: instance_id.to_string(),
        vnf_lcm_op_occ_id: op_occ_id.to_string(),
        vim_connection_info: Default::default(),
        zones: Vec::new(),
        add_resources: Vec::new(),
        remove_resources: Vec::new(),
        update_resources: Vec::new(),
        vim_assets: None,
        additional_params: None,
    };
    GrantRecord::new(request, grant)
}
