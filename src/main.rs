mod handlers;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use loom_config::WorkflowDef;
use loom_engine::{Engine, EngineConfig, RunState, RunStatus, WatchEventData};
use loom_store::{SnapshotStore, SqliteStore};
use loom_workflow::WorkflowDefinition;

/// Loom - a workflow run engine with suspendable steps and live snapshots
#[derive(Parser)]
#[command(name = "loom")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Log filter used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  /// Persist run snapshots to this SQLite database (e.g. sqlite://loom.db)
  #[arg(long, global = true)]
  store: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a workflow file and print its description
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Run a workflow, reading the trigger payload from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Run id to create or continue (default: a new uuid)
    #[arg(long)]
    run_id: Option<String>,

    /// Resume context for a step that suspends, as STEP=JSON (repeatable)
    #[arg(long = "resume", value_parser = parse_resume)]
    resumes: Vec<(String, Value)>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
    )
    .with_writer(io::stderr)
    .init();

  match cli.command {
    Some(Commands::Validate { workflow_file }) => validate(&workflow_file)?,
    Some(Commands::Run {
      workflow_file,
      run_id,
      resumes,
    }) => {
      let payload = read_payload_from_stdin()?;
      let rt = tokio::runtime::Runtime::new()?;
      let state = rt.block_on(run_workflow(
        workflow_file,
        cli.store,
        run_id,
        payload,
        resumes,
      ))?;
      if state.status == RunStatus::Failed {
        bail!(
          "run {} failed: {}",
          state.run_id,
          state.error.unwrap_or_default()
        );
      }
    }
    None => {
      println!("loom - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_workflow(workflow_file: &Path) -> Result<WorkflowDefinition> {
  let content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let def = WorkflowDef::from_json(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  handlers::builtin_resolver()
    .resolve(def)
    .context("failed to resolve workflow")
}

fn validate(workflow_file: &Path) -> Result<()> {
  let workflow = load_workflow(workflow_file)?;
  eprintln!(
    "Workflow '{}' is valid ({} steps)",
    workflow.name(),
    workflow.graph().order().len()
  );
  println!("{}", serde_json::to_string_pretty(&workflow.describe())?);
  Ok(())
}

async fn run_workflow(
  workflow_file: PathBuf,
  store_url: Option<String>,
  run_id: Option<String>,
  payload: Value,
  mut resumes: Vec<(String, Value)>,
) -> Result<RunState> {
  let workflow = load_workflow(&workflow_file)?;
  let workflow_id = workflow.name().to_string();

  let store: Option<Arc<dyn SnapshotStore>> = match &store_url {
    Some(url) => Some(Arc::new(
      SqliteStore::connect(url)
        .await
        .with_context(|| format!("failed to open store: {}", url))?,
    )),
    None => None,
  };

  let mut engine = Engine::new(EngineConfig::default());
  if let Some(store) = &store {
    engine = engine.with_store(Arc::clone(store));
  }
  engine.register_workflow(workflow)?;

  let run = engine.create_run(&workflow_id, run_id).await?;
  eprintln!("Run: {} ({})", run.run_id(), run.status());

  // Snapshots go to stdout as JSON lines in the watch wire format.
  let mut snapshots = run.stream();
  let printer = tokio::spawn(async move {
    while let Some(state) = snapshots.next().await {
      match serde_json::to_string(&WatchEventData::from(&state)) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("failed to encode snapshot: {}", e),
      }
    }
  });

  // A continued run keeps its original trigger data.
  let mut state = match run.status() {
    RunStatus::Created => run.start_and_wait(payload).await?,
    _ => run.get_state(),
  };

  while state.status == RunStatus::Suspended {
    let next = resumes
      .iter()
      .position(|(step_id, _)| state.suspended_steps.contains_key(step_id));
    let Some(index) = next else {
      break;
    };
    let (step_id, context) = resumes.remove(index);
    eprintln!("Resuming step '{}'", step_id);
    state = run.resume_and_wait(&step_id, context).await?;
  }

  // Flush the printer; the run may still be suspended.
  run.hub().close();
  printer.await.context("snapshot printer stopped")?;

  if let Some(store) = &store {
    store
      .save(&workflow_id, &state)
      .await
      .context("failed to save final snapshot")?;
  }

  match state.status {
    RunStatus::Suspended => {
      let pending: Vec<&str> = state.suspended_steps.keys().map(String::as_str).collect();
      eprintln!("Run suspended, waiting on: {}", pending.join(", "));
    }
    status => eprintln!("Run {}", status),
  }

  Ok(state)
}

fn parse_resume(arg: &str) -> Result<(String, Value), String> {
  let (step_id, raw) = arg
    .split_once('=')
    .ok_or_else(|| format!("expected STEP=JSON, got '{}'", arg))?;
  if step_id.is_empty() {
    return Err("step id must not be empty".to_string());
  }
  let context = serde_json::from_str(raw).map_err(|e| format!("invalid JSON for '{}': {}", step_id, e))?;
  Ok((step_id.to_string(), context))
}

fn read_payload_from_stdin() -> Result<Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;
    parse_payload(&input)
  }
}

fn parse_payload(input: &str) -> Result<Value> {
  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(input).context("failed to parse payload JSON from stdin")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_resume() {
    assert_eq!(
      parse_resume(r#"review={"approved":true}"#).unwrap(),
      ("review".to_string(), json!({ "approved": true }))
    );
    assert!(parse_resume("review").is_err());
    assert!(parse_resume("=1").is_err());
    assert!(parse_resume("review={").is_err());
  }

  #[test]
  fn test_parse_payload() {
    assert_eq!(parse_payload("").unwrap(), json!({}));
    assert_eq!(parse_payload("  \n").unwrap(), json!({}));
    assert_eq!(parse_payload(r#"{"title":"x"}"#).unwrap(), json!({ "title": "x" }));
    assert!(parse_payload("{").is_err());
  }

  #[test]
  fn test_cli_parses_repeated_resumes() {
    let cli = Cli::try_parse_from([
      "loom",
      "--store",
      "sqlite::memory:",
      "run",
      "wf.json",
      "--resume",
      "a=1",
      "--resume",
      "b=\"x\"",
    ])
    .unwrap();

    assert_eq!(cli.store.as_deref(), Some("sqlite::memory:"));
    match cli.command {
      Some(Commands::Run { resumes, .. }) => assert_eq!(resumes.len(), 2),
      _ => panic!("expected run command"),
    }
  }
}
