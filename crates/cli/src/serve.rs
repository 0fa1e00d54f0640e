//! `vnflcm serve`: the long-running engine process.
//!
//! Startup runs crash recovery before anything else touches the records.
//! Then the reconciliation loop and, when enabled, the auto-heal scheduler
//! run until Ctrl-C. Fault reports for auto-heal are read from stdin, one
//! JSON object per line:
//!
//! ```text
//! {"vnfInstanceId": "inst-1", "vnfcInfoIds": ["VDU1-a1b2"]}
//! ```

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use vnflcm_engine::{AutoHealScheduler, Reconciler};
use vnflcm_storage::MemoryStorage;

use crate::state::Workspace;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaultReport {
    vnf_instance_id: String,
    vnfc_info_ids: Vec<String>,
}

pub(crate) async fn run(ws: &Workspace) -> Result<(), String> {
    let recovered = ws.coordinator.recover().await.map_err(|e| e.to_string())?;
    info!(recovered = recovered.len(), "crash recovery finished");
    ws.save()?;

    let config = ws.coordinator.config().clone();
    let reconciler = config
        .reconcile
        .enabled
        .then(|| Reconciler::new(ws.coordinator.clone()).spawn(&config.reconcile));

    let auto_heal = config.auto_heal.enabled.then(|| {
        let scheduler = AutoHealScheduler::new(ws.coordinator.clone(), &config.auto_heal);
        scheduler.start();
        scheduler
    });
    let reader = auto_heal
        .clone()
        .map(|scheduler| tokio::spawn(read_fault_reports(scheduler)));

    info!("engine running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C; shutting down");
    }

    if let Some(reader) = reader {
        reader.abort();
    }
    if let Some(scheduler) = auto_heal {
        scheduler.stop();
    }
    if let Some(handle) = reconciler {
        handle.shutdown().await;
    }
    ws.save()?;
    info!("engine stopped");
    Ok(())
}

async fn read_fault_reports(scheduler: AutoHealScheduler<MemoryStorage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<FaultReport>(&line) {
                Ok(report) => {
                    scheduler.report_fault(&report.vnf_instance_id, report.vnfc_info_ids);
                }
                Err(e) => warn!(error = %e, "ignoring malformed fault report"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "fault report input failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_report_uses_camel_case() {
        let report: FaultReport =
            serde_json::from_str(r#"{"vnfInstanceId": "inst-1", "vnfcInfoIds": ["VDU1-a"]}"#)
                .unwrap();
        assert_eq!(report.vnf_instance_id, "inst-1");
        assert_eq!(report.vnfc_info_ids, vec!["VDU1-a".to_string()]);
    }
}
