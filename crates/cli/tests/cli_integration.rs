//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `vnflcm` binary against a state file in a
//! temporary directory and checks exit codes, stdout and stderr.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const VNFD: &str = r#"{
  "vnfd_id": "vnfd-1",
  "provider": "Company",
  "product_name": "Sample VNF",
  "software_version": "1.0",
  "descriptor_version": "1.0",
  "flavours": {
    "simple": {
      "vdus": {
        "VDU1": {
          "initial_count": 1,
          "cps": [{"id": "CP1", "virtual_link": "internalVL1"}],
          "storages": ["Storage1"]
        }
      },
      "virtual_links": ["internalVL1"],
      "scaling_aspects": {
        "VDU1_scale": {"max_scale_level": 2, "vdu_deltas": {"VDU1": 1}}
      }
    }
  }
}"#;

const CONFIG: &str = r#"
[default_vim]
vimType = "ETSINFV.OPENSTACK_KEYSTONE.V_3"

[lock]
poll_interval_ms = 5
max_backoff_ms = 20
timeout_secs = 2
"#;

/// A scratch directory holding the config, the state file and requests.
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Env {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
        fs::write(dir.path().join("vnfd.json"), VNFD).unwrap();
        Env { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("vnflcm");
        cmd.current_dir(self.dir.path()).args([
            "--config",
            "config.toml",
            "--state",
            "state.json",
        ]);
        cmd
    }

    /// Register the descriptor and create `inst-1`.
    fn with_instance(self) -> Env {
        self.cmd()
            .args(["add-descriptor", "vnfd.json"])
            .assert()
            .success();
        self.cmd()
            .args(["create-instance", "--vnfd", "vnfd-1", "--id", "inst-1"])
            .assert()
            .success();
        self
    }

    /// Submit a request document and return the printed record.
    fn submit(&self, name: &str, request: &str) -> serde_json::Value {
        self.write(name, request);
        let out = self
            .cmd()
            .args(["submit", name, "--instance", "inst-1"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).unwrap()
    }
}

fn read_state(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

const INSTANTIATE: &str = r#"{"operation": "INSTANTIATE", "flavourId": "simple"}"#;

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    cargo_bin_cmd!("vnflcm")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("VNF lifecycle management engine"));
}

#[test]
fn version_exits_0() {
    cargo_bin_cmd!("vnflcm")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vnflcm"));
}

// ──────────────────────────────────────────────
// 2. Descriptors and instances
// ──────────────────────────────────────────────

#[test]
fn create_instance_persists_to_state_file() {
    let env = Env::new().with_instance();
    let state = read_state(&env.path("state.json"));
    assert_eq!(
        state["storage"]["instances"]["inst-1"]["instantiationState"],
        "NOT_INSTANTIATED"
    );
    assert_eq!(state["descriptors"][0]["vnfd_id"], "vnfd-1");

    env.cmd()
        .args(["show-instance", "inst-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"vnfProvider\": \"Company\""));
}

#[test]
fn create_instance_of_unknown_descriptor_exits_1() {
    let env = Env::new();
    env.cmd()
        .args(["create-instance", "--vnfd", "nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn malformed_descriptor_exits_1() {
    let env = Env::new();
    env.write("bad.json", r#"{"flavours": 3}"#);
    env.cmd()
        .args(["add-descriptor", "bad.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error parsing JSON"));
}

// ──────────────────────────────────────────────
// 3. Operations
// ──────────────────────────────────────────────

#[test]
fn instantiate_then_scale_out() {
    let env = Env::new().with_instance();
    let record = env.submit("instantiate.json", INSTANTIATE);
    assert_eq!(record["operationState"], "COMPLETED");
    assert_eq!(record["operationParams"]["operation"], "INSTANTIATE");

    let record = env.submit(
        "scale.json",
        r#"{"operation": "SCALE", "type": "SCALE_OUT", "aspectId": "VDU1_scale"}"#,
    );
    assert_eq!(record["operationState"], "COMPLETED");
    let added = record["resourceChanges"]["affectedVnfcs"].as_array().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0]["changeType"], "ADDED");

    let state = read_state(&env.path("state.json"));
    let info = &state["storage"]["instances"]["inst-1"]["instantiatedVnfInfo"];
    assert_eq!(info["vnfcResourceInfo"].as_array().unwrap().len(), 2);
    assert_eq!(state["live"]["inst-1"]["vnfcResourceInfo"].as_array().unwrap().len(), 2);
}

#[test]
fn scale_before_instantiate_is_rejected() {
    let env = Env::new().with_instance();
    env.write(
        "scale.json",
        r#"{"operation": "SCALE", "type": "SCALE_OUT", "aspectId": "VDU1_scale"}"#,
    );
    env.cmd()
        .args(["submit", "scale.json", "--instance", "inst-1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("NOT_INSTANTIATED"));
}

#[test]
fn retry_of_completed_operation_exits_1() {
    let env = Env::new().with_instance();
    let record = env.submit("instantiate.json", INSTANTIATE);
    let op_id = record["id"].as_str().unwrap();
    env.cmd()
        .args(["retry", op_id])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("COMPLETED"));
}

#[test]
fn json_errors_on_request() {
    let env = Env::new().with_instance();
    env.cmd()
        .args(["--output", "json", "show-op", "missing-op"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("\"error\""));
}

#[test]
fn modify_info_updates_name() {
    let env = Env::new().with_instance();
    let record = env.submit(
        "modify.json",
        r#"{"operation": "MODIFY_INFO", "vnfInstanceName": "edge-fw"}"#,
    );
    assert_eq!(record["operationState"], "COMPLETED");
    assert_eq!(record["changedInfo"]["vnfInstanceName"], "edge-fw");
}

#[test]
fn terminate_returns_instance_to_not_instantiated() {
    let env = Env::new().with_instance();
    env.submit("instantiate.json", INSTANTIATE);
    let record = env.submit(
        "terminate.json",
        r#"{"operation": "TERMINATE", "terminationType": "FORCEFUL"}"#,
    );
    assert_eq!(record["operationState"], "COMPLETED");
    env.cmd()
        .args(["show-instance", "inst-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("NOT_INSTANTIATED"));
}

// ──────────────────────────────────────────────
// 4. Recovery and reconciliation
// ──────────────────────────────────────────────

#[test]
fn recover_with_nothing_in_flight_prints_empty_list() {
    let env = Env::new().with_instance();
    env.cmd()
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn recover_moves_interrupted_record_to_failed_temp() {
    let env = Env::new().with_instance();
    let record = env.submit("instantiate.json", INSTANTIATE);
    let op_id = record["id"].as_str().unwrap().to_string();

    // Rewrite the stored record as a crashed process would have left it.
    let state_path = env.path("state.json");
    let mut state = read_state(&state_path);
    state["storage"]["operations"][&op_id]["operationState"] = "PROCESSING".into();
    fs::write(&state_path, serde_json::to_string(&state).unwrap()).unwrap();

    env.cmd()
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("FAILED_TEMP"));
    env.cmd()
        .args(["show-op", &op_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Operation Interrupted"));
}

#[test]
fn reconcile_reports_unchanged_instance() {
    let env = Env::new().with_instance();
    env.submit("instantiate.json", INSTANTIATE);
    let out = env
        .cmd()
        .arg("reconcile")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["unchanged"][0], "inst-1");
}

// ──────────────────────────────────────────────
// 5. Diff
// ──────────────────────────────────────────────

#[test]
fn diff_of_identical_documents_is_empty() {
    let env = Env::new();
    env.write(
        "inst.json",
        r#"{"id": "i", "vnfdId": "vnfd-1", "instantiationState": "NOT_INSTANTIATED"}"#,
    );
    env.cmd()
        .args(["diff", "inst.json", "inst.json", "--operation", "SCALE"])
        .assert()
        .success()
        .stdout(predicate::str::diff("{}\n"));
}

#[test]
fn diff_of_modify_info_reports_changed_name() {
    let env = Env::new();
    env.write(
        "before.json",
        r#"{"id": "i", "vnfdId": "vnfd-1", "instantiationState": "NOT_INSTANTIATED",
            "vnfInstanceName": "old"}"#,
    );
    env.write(
        "after.json",
        r#"{"id": "i", "vnfdId": "vnfd-1", "instantiationState": "NOT_INSTANTIATED",
            "vnfInstanceName": "new"}"#,
    );
    env.cmd()
        .args(["diff", "before.json", "after.json", "--operation", "modify_info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"vnfInstanceName\": \"new\""));
}

#[test]
fn diff_with_unknown_operation_exits_2() {
    let env = Env::new();
    env.cmd()
        .args(["diff", "a.json", "b.json", "--operation", "REBOOT"])
        .assert()
        .failure()
        .code(2);
}
