//! Direct sync CLI.
//!
//! Runs the push/pull state machines in-process against the configured
//! object store and exits with the outcome's code so hooks and the agent
//! can rely on the subprocess convention: 0 success or no-op, 1 generic
//! failure (transport, integrity, lock), 2 primary-refused destructive
//! pull, 3 secondary-refused push.

use chrono::Utc;
use clap::{Parser, Subcommand};
use membridge_core::config::SyncConfig;
use membridge_core::remote::S3ObjectStore;
use membridge_core::sync::SyncEngine;
use membridge_core::worker::ProcessWorker;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Membridge sync engine", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project name; defaults to CLAUDE_PROJECT_ID.
    #[arg(short, long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push the local snapshot to the object store
    Push,
    /// Pull the remote snapshot and replace the local database
    Pull {
        /// Leave the worker stopped after the replace
        #[arg(long, default_value_t = false)]
        no_restart_worker: bool,
    },
    /// Run diagnostics across the whole sync path
    Doctor,
    /// Show this node's role and the current lease
    Leadership,
    /// Print the project identity
    Project,
}

fn build_config(project: Option<&str>) -> anyhow::Result<SyncConfig> {
    let cfg = match project {
        Some(name) => SyncConfig::for_project(name)?,
        None => SyncConfig::from_env()?,
    };
    Ok(cfg)
}

fn build_engine(cfg: SyncConfig) -> SyncEngine<S3ObjectStore, ProcessWorker> {
    let store = S3ObjectStore::new(&cfg.store);
    let worker = ProcessWorker::new(cfg.worker.clone());
    SyncEngine::new(store, worker, cfg)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut cfg = build_config(cli.project.as_deref())?;

    match cli.command {
        Commands::Push => {
            let engine = build_engine(cfg);
            let outcome = engine.push().await;
            println!("push: {}", outcome.detail());
            Ok(exit_code(outcome.exit_code()))
        }
        Commands::Pull { no_restart_worker } => {
            cfg.no_restart_worker = cfg.no_restart_worker || no_restart_worker;
            let engine = build_engine(cfg);
            let outcome = engine.pull().await;
            println!("pull: {}", outcome.detail());
            Ok(exit_code(outcome.exit_code()))
        }
        Commands::Doctor => {
            let engine = build_engine(cfg);
            let report = engine.doctor().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let code = match report.status {
                membridge_core::sync::DoctorStatus::Ok
                | membridge_core::sync::DoctorStatus::Degraded => 0,
                membridge_core::sync::DoctorStatus::Error => 1,
            };
            Ok(exit_code(code))
        }
        Commands::Leadership => {
            let engine = build_engine(cfg);
            let (role, lease, was_created) = engine.leadership().await?;
            let ttl = lease.expires_at - Utc::now().timestamp();
            println!("role:          {role}");
            println!("node_id:       {}", engine.config().leadership.node_id);
            println!("primary:       {}", lease.primary_node_id);
            println!("epoch:         {}", lease.epoch);
            println!("policy:        {}", lease.policy);
            println!("issued_by:     {}", lease.issued_by);
            println!("ttl_remaining: {ttl}s");
            if was_created {
                println!();
                println!("NOTE: lease was absent/expired and was recreated.");
            }
            if lease.needs_ui_selection.unwrap_or(false) {
                println!();
                println!("WARNING: needs_ui_selection=true");
                println!(
                    "Confirm the primary via POST /projects/{}/leadership/select \
                     or set PRIMARY_NODE_ID.",
                    engine.config().canonical_id
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Project => {
            println!("project_name: {}", cfg.project);
            println!("canonical_project_id: {}", cfg.canonical_id);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,membridge=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
