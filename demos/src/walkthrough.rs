//! # Ouroboros Walkthrough
//!
//! Runs a short session against the sync controller.
//!
//! ```bash
//! # Offline: in-memory object store and a scripted backend
//! cargo run --bin ouroboros_walkthrough
//!
//! # Live: remote object store and hosted backend
//! OUROBOROS_ACCESS_TOKEN=... GEMINI_API_KEY=... \
//!     cargo run --bin ouroboros_walkthrough -- --live "What am I working on?"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ouroboros_core::prelude::*;
use ouroboros_core::{InMemoryObjectStore, ScriptedBackend};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ouroboros_walkthrough", about = "Walk through an Ouroboros session")]
struct Args {
    /// Use the remote object store and hosted backend
    #[arg(long)]
    live: bool,

    /// Directory for the local recovery slots
    #[arg(long, env = "OUROBOROS_SLOTS_DIR")]
    slots_dir: Option<PathBuf>,

    /// Instructions to submit in live mode
    instructions: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = OuroborosConfig::from_env().context("failed to load configuration")?;
    let slots_dir = args
        .slots_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("ouroboros-walkthrough"));
    let cache = VolatileCache::new(
        Arc::new(FileSlotStore::new(&slots_dir)?),
        config.slots.clone(),
    );

    if args.live {
        run_live(&config, cache, &args.instructions).await
    } else {
        run_offline(&config, cache).await
    }
}

fn init_logging() {
    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(feature = "live")]
async fn run_live(config: &OuroborosConfig, cache: VolatileCache, instructions: &[String]) -> Result<()> {
    let store = Arc::new(DriveObjectStore::new(&config.endpoints)?);
    let backend = Arc::new(ouroboros_llm::Client::from_env()?);
    let authorizer = Arc::new(StaticTokenAuthorizer::from_env());

    let mut controller =
        SyncController::new(store, backend, authorizer, config).with_volatile_cache(cache);
    offer_recovery(&mut controller)?;

    println!("{}", controller.connect().await.message());
    for instruction in instructions {
        println!("> {}", instruction);
        println!("{}", controller.submit_turn(instruction).await.message());
    }
    Ok(())
}

#[cfg(not(feature = "live"))]
async fn run_live(_: &OuroborosConfig, _: VolatileCache, _: &[String]) -> Result<()> {
    anyhow::bail!("built without the `live` feature")
}

async fn run_offline(config: &OuroborosConfig, cache: VolatileCache) -> Result<()> {
    let store = Arc::new(InMemoryObjectStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let authorizer = Arc::new(StaticTokenAuthorizer::new("offline"));

    let mut controller = SyncController::new(store.clone(), backend.clone(), authorizer, config)
        .with_volatile_cache(cache.clone());
    offer_recovery(&mut controller)?;

    info!("=== Connect ===");
    println!("{}", controller.connect().await.message());

    info!("=== Growing turn with a tool request ===");
    let mut reply = proposal(controller.state(), "Opened a security audit.", "Run the audit")?;
    push_project(&mut reply, json!({
        "id": "security_audit",
        "name": "Security Audit",
        "status": "active",
        "description": "Review access paths"
    }));
    reply["response"] = json!(
        "Opened a security audit. :::TOOL_REQUEST {\"tool\":\"createFile\",\"args\":{\"name\":\"security_audit_plan.md\",\"content\":\"# Audit plan\"}} :::"
    );
    backend.push_proposal(reply);
    println!("{}", controller.submit_turn("Start a security audit").await.message());

    info!("=== Shrinking turn is rejected ===");
    let mut shrunk = proposal(controller.state(), "Cleaned up.", "Tidy")?;
    shrunk["memory"]["projects"] = json!([]);
    backend.push_proposal(shrunk);
    println!("{}", controller.submit_turn("Clean everything up").await.message());
    println!("Draft kept for resubmission: {:?}", controller.draft());

    info!("=== Manual snapshot and restore points ===");
    println!("{}", controller.backup_now().await.message());
    for point in controller.list_restore_points().await? {
        println!(
            "  {} {} ({})",
            if point.manual { "manual" } else { "auto  " },
            point.name,
            point.id
        );
    }

    info!("=== Smart relink ===");
    let plan = controller.scan_relink().await?;
    for candidate in &plan.candidates {
        let proposed = candidate
            .proposed
            .as_ref()
            .map_or("no match".to_string(), |m| m.file_name.clone());
        println!("  {} -> {}", candidate.project_name, proposed);
    }
    let assignments = plan.proposed_assignments();
    if !assignments.is_empty() {
        let mut reply = proposal(controller.state(), "Links updated.", "Run the audit")?;
        for assignment in &assignments {
            link_project(&mut reply, &assignment.project_id, &assignment.file_id);
        }
        backend.push_proposal(reply);
        println!("{}", controller.apply_relink(&assignments).await.message());
    }

    info!("=== Export ===");
    let exported = controller.export_snapshot()?;
    println!(
        "{} ({} bytes), store holds {} objects",
        exported.file_name,
        exported.contents.len(),
        store.len()
    );

    controller.reset()?;
    Ok(())
}

fn offer_recovery(controller: &mut SyncController) -> Result<()> {
    if let Some(snapshot) = controller.pending_recovery() {
        println!(
            "Recovering unsent draft {:?} (objective: {})",
            snapshot.draft_input, snapshot.focus.objective
        );
        controller.recover_volatile()?;
    }
    Ok(())
}

/// A proposal that echoes the current memory in full
fn proposal(state: &AgentState, response: &str, objective: &str) -> Result<Value> {
    Ok(json!({
        "response": response,
        "memory": serde_json::to_value(&state.memory)?,
        "focus": {
            "updatedAt": "2026-10-18T00:00:00Z",
            "objective": objective,
            "reasoningTrace": state.focus.reasoning_trace,
            "pendingTasks": state.focus.pending_tasks
        }
    }))
}

fn push_project(proposal: &mut Value, project: Value) {
    if let Some(projects) = proposal["memory"]["projects"].as_array_mut() {
        projects.push(project);
    }
}

fn link_project(proposal: &mut Value, project_id: &str, file_id: &str) {
    if let Some(projects) = proposal["memory"]["projects"].as_array_mut() {
        for project in projects.iter_mut().filter(|p| p["id"] == project_id) {
            project["externalDocumentRef"] = json!(file_id);
        }
    }
}
