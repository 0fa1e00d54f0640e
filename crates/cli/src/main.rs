mod serve;
mod state;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use vnflcm_engine::{diff, Reconciler, Vnfd};
use vnflcm_model::{OperationKind, OperationParams, VnfInstance};
use vnflcm_storage::LcmStorage;

use state::{load_config, StateFile, Workspace};

/// Output format for errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// VNF lifecycle management engine.
#[derive(Parser)]
#[command(name = "vnflcm", version, about = "VNF lifecycle management engine")]
struct Cli {
    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file (JSON); created on first write
    #[arg(long, global = true, default_value = "vnflcm-state.json")]
    state: PathBuf,

    /// Log filter, e.g. `info` or `vnflcm_engine=debug`
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output format for errors (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a VNF descriptor (JSON) in the state file
    AddDescriptor {
        /// Path to the descriptor document
        file: PathBuf,
    },

    /// Create a NOT_INSTANTIATED instance of a registered descriptor
    CreateInstance {
        #[arg(long)]
        vnfd: String,
        /// Instance id; a UUID is generated when omitted
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },

    /// Compute the change record between two instance documents
    Diff {
        before: PathBuf,
        after: PathBuf,
        /// Operation kind, e.g. SCALE or MODIFY_INFO
        #[arg(long)]
        operation: OperationKind,
    },

    /// Submit an operation and run it to its next resting state
    Submit {
        /// Path to the request document (tagged by `operation`)
        request: PathBuf,
        #[arg(long)]
        instance: String,
        /// Mark the operation as automatically invoked
        #[arg(long)]
        automatic: bool,
    },

    /// Retry a FAILED_TEMP operation
    Retry { op_id: String },

    /// Roll back a FAILED_TEMP operation
    Rollback { op_id: String },

    /// Mark a FAILED_TEMP operation as FAILED
    Fail { op_id: String },

    /// Request cancellation of a STARTING or PROCESSING operation
    Cancel { op_id: String },

    /// Advance operations interrupted by a previous process
    Recover,

    /// Run one reconciliation pass
    Reconcile,

    /// Print an operation record
    ShowOp { op_id: String },

    /// Print a VNF instance
    ShowInstance { id: String },

    /// Run recovery, then reconciliation (and auto-heal) until Ctrl-C
    Serve,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), cli.output);
            process::exit(1);
        }
    };
    if let Err(msg) = rt.block_on(run(&cli)) {
        report_error(&msg, cli.output);
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Commands::AddDescriptor { file } => cmd_add_descriptor(&cli.state, file),
        Commands::Diff {
            before,
            after,
            operation,
        } => cmd_diff(before, after, *operation),
        command => {
            let config = load_config(cli.config.as_deref())?;
            let ws = Workspace::open(&cli.state, config)?;
            run_engine_command(&ws, command).await
        }
    }
}

async fn run_engine_command(ws: &Workspace, command: &Commands) -> Result<(), String> {
    let coordinator = &ws.coordinator;
    match command {
        Commands::CreateInstance { vnfd, id, name } => {
            let inst = coordinator
                .create_instance(vnfd, id.clone(), name.clone())
                .await
                .map_err(|e| e.to_string())?;
            ws.save()?;
            print_json(&inst)
        }
        Commands::Submit {
            request,
            instance,
            automatic,
        } => {
            let params: OperationParams = read_json(request)?;
            let record = coordinator
                .submit(instance, params, *automatic)
                .await
                .map_err(|e| e.to_string())?;
            // Persist the submission before running it.
            ws.save()?;
            let outcome = coordinator.execute(&record.id).await;
            ws.save()?;
            print_json(&outcome.map_err(|e| e.to_string())?)
        }
        Commands::Retry { op_id } => {
            let outcome = coordinator.retry(op_id).await;
            finish(ws, outcome)
        }
        Commands::Rollback { op_id } => {
            let outcome = coordinator.rollback(op_id).await;
            finish(ws, outcome)
        }
        Commands::Fail { op_id } => {
            let outcome = coordinator.fail(op_id).await;
            finish(ws, outcome)
        }
        Commands::Cancel { op_id } => {
            let outcome = coordinator.cancel(op_id).await;
            finish(ws, outcome)
        }
        Commands::Recover => {
            let recovered = coordinator.recover().await.map_err(|e| e.to_string())?;
            ws.save()?;
            print_json(&recovered)
        }
        Commands::Reconcile => {
            let report = Reconciler::new(coordinator.clone())
                .run_pass()
                .await
                .map_err(|e| e.to_string())?;
            ws.save()?;
            print_json(&report)
        }
        Commands::ShowOp { op_id } => {
            let record = coordinator
                .storage()
                .get_operation(op_id)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&record)
        }
        Commands::ShowInstance { id } => {
            let inst = coordinator
                .storage()
                .get_instance(id)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&inst)
        }
        Commands::Serve => serve::run(ws).await,
        Commands::AddDescriptor { .. } | Commands::Diff { .. } => Ok(()),
    }
}

/// Save the state whatever the outcome, then print the record.
fn finish<T: Serialize, E: std::fmt::Display>(
    ws: &Workspace,
    outcome: Result<T, E>,
) -> Result<(), String> {
    ws.save()?;
    print_json(&outcome.map_err(|e| e.to_string())?)
}

fn cmd_add_descriptor(state_path: &Path, file: &Path) -> Result<(), String> {
    let vnfd: Vnfd = read_json(file)?;
    let mut state = StateFile::load(state_path)?;
    let id = vnfd.vnfd_id.clone();
    state.register_descriptor(vnfd);
    state.save(state_path)?;
    println!("registered {}", id);
    Ok(())
}

fn cmd_diff(before: &Path, after: &Path, operation: OperationKind) -> Result<(), String> {
    let before: VnfInstance = read_json(before)?;
    let after: VnfInstance = read_json(after)?;
    print_json(&diff(operation, &before, &after))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let pretty =
        serde_json::to_string_pretty(value).map_err(|e| format!("serialization error: {}", e))?;
    println!("{}", pretty);
    Ok(())
}

pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
