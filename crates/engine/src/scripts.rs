//! Lifecycle management scripts.
//!
//! A descriptor flavour may name a script per interface method
//! (`instantiate_start`, `scale_end`, `heal_rollback_start`, ...). When
//! scripts are enabled the runner feeds the script a JSON payload on stdin.
//! A JSON object on stdout with a `vnf_instance` member replaces the working
//! instance; any other output is ignored.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use vnflcm_model::{Grant, GrantRequest, OperationKind, OperationParams, VnfInstance};

use crate::config::ScriptsConfig;
use crate::descriptor::Vnfd;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("could not run {script}: {source}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{method} failed: {stderr}")]
    Failed { method: String, stderr: String },
    #[error("could not encode script input: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Interface method base name for an operation kind.
pub fn script_method_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::ModifyInfo => "modify_information",
        OperationKind::ChangeExtConn => "change_external_connectivity",
        OperationKind::ChangeVnfpkg => "change_current_package",
        OperationKind::Instantiate => "instantiate",
        OperationKind::Scale => "scale",
        OperationKind::Heal => "heal",
        OperationKind::Terminate => "terminate",
    }
}

/// Where a script runs relative to the main phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptHook {
    Start,
    End,
    RollbackStart,
    RollbackEnd,
}

impl ScriptHook {
    pub fn method(self, kind: OperationKind) -> String {
        let base = script_method_name(kind);
        match self {
            ScriptHook::Start => format!("{}_start", base),
            ScriptHook::End => format!("{}_end", base),
            ScriptHook::RollbackStart => format!("{}_rollback_start", base),
            ScriptHook::RollbackEnd => format!("{}_rollback_end", base),
        }
    }
}

#[derive(Serialize)]
struct ScriptInput<'a> {
    operation: &'a str,
    request: &'a OperationParams,
    vnf_instance: &'a VnfInstance,
    grant_request: Option<&'a GrantRequest>,
    grant_response: Option<&'a Grant>,
    package_dir: PathBuf,
}

/// Runs interface scripts from unpacked VNF packages.
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    config: ScriptsConfig,
}

impl ScriptRunner {
    pub fn new(config: ScriptsConfig) -> Self {
        ScriptRunner { config }
    }

    fn package_dir(&self, vnfd_id: &str) -> PathBuf {
        self.config.package_root.join(vnfd_id)
    }

    /// Run the script for `hook`, if scripts are enabled and the flavour
    /// defines one. `flavour_id` is `None` for a never-instantiated instance.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        hook: ScriptHook,
        params: &OperationParams,
        flavour_id: Option<&str>,
        vnfd: &Vnfd,
        inst: &mut VnfInstance,
        grant_req: Option<&GrantRequest>,
        grant: Option<&Grant>,
    ) -> Result<(), ScriptError> {
        if !self.config.enabled {
            return Ok(());
        }
        let method = hook.method(params.kind());
        let Some(script) = flavour_id
            .and_then(|f| vnfd.flavours.get(f))
            .and_then(|f| f.script(&method))
        else {
            return Ok(());
        };

        let package_dir = self.package_dir(&vnfd.vnfd_id);
        let script_path = package_dir.join("Definitions").join(script);
        let input = serde_json::to_vec(&ScriptInput {
            operation: &method,
            request: params,
            vnf_instance: inst,
            grant_request: grant_req,
            grant_response: grant,
            package_dir: package_dir.clone(),
        })?;

        info!(
            vnf_instance_id = %inst.id,
            method = %method,
            script = %script_path.display(),
            "running lifecycle script"
        );
        let spawn_err = |source| ScriptError::Spawn {
            script: script_path.clone(),
            source,
        };
        let mut child = Command::new(&self.config.interpreter)
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        if let Some(mut stdin) = child.stdin.take() {
            // A script that exits without reading its input closes the pipe.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "script did not consume its input");
            }
        }
        let out = child.wait_with_output().await.map_err(spawn_err)?;

        if !out.status.success() {
            return Err(ScriptError::Failed {
                method,
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        let replacement = serde_json::from_slice::<serde_json::Value>(&out.stdout)
            .ok()
            .and_then(|v| v.get("vnf_instance").cloned())
            .and_then(|v| serde_json::from_value::<VnfInstance>(v).ok());
        if let Some(updated) = replacement {
            debug!(
                vnf_instance_id = %inst.id,
                method = %method,
                "script replaced the working instance"
            );
            *inst = updated;
        }
        Ok(())
    }
}
