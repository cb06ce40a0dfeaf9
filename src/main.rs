//! CLI entry point for the value loop driver.
//!
//! ```bash
//! value-loop run --sprint-dir ./sprint-1 --sprint-name checkout-flow
//! ```
//!
//! On startup this resumes an existing sprint directory if `state.json` is
//! present, otherwise starts a fresh one (git branch creation, pre-loop gate
//! sequence), then runs the epic loop or the single-sprint value loop
//! depending on how the pre-loop classified the vision, and exits with the
//! loop's own exit code (0 success, 1 failure, 2 partial).

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use value_loop::agent_runtime::{self, ScriptedAgentRuntime};
use value_loop::config::LoopConfig;
use value_loop::epic_loop::EpicLoopDriver;
use value_loop::git_safety;
use value_loop::pre_loop::{self, PreLoopDriver};
use value_loop::state::{self, LoopPhase, LoopState, StateStore};
use value_loop::value_loop::ValueLoopDriver;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory the sprint's state, verifications, and reports live under.
    #[arg(long)]
    sprint_dir: PathBuf,

    /// Human-readable sprint name used to derive the git branch on a fresh start.
    #[arg(long, default_value = "sprint")]
    sprint_name: String,

    /// Path to VISION.md, required on a fresh start.
    #[arg(long)]
    vision: Option<PathBuf>,

    /// Path to PRD.md, required on a fresh start.
    #[arg(long)]
    prd: Option<PathBuf>,

    /// Optional TOML config file overriding the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cap on total loop iterations (overrides config/env).
    #[arg(long)]
    max_iterations: Option<u32>,
}

fn load_config(args: &Args) -> Result<LoopConfig> {
    let mut config = match &args.config {
        Some(path) => LoopConfig::from_file(path).context("loading config file")?,
        None => LoopConfig::default(),
    };
    config.sprint_dir = args.sprint_dir.clone();
    config = config.apply_env_overrides();
    if let Some(max) = args.max_iterations {
        config.max_loop_iterations = max;
    }
    config.resolve_paths();
    Ok(config)
}

/// Acquire the sprint's exclusive lock file, refusing to start if one
/// already exists (no concurrent drivers against the same sprint directory).
struct LoopLock(PathBuf);

impl LoopLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        options
            .open(&path)
            .with_context(|| format!("another value-loop instance holds {}", path.display()))?;
        Ok(Self(path))
    }
}

impl Drop for LoopLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

async fn fresh_start(args: &Args, config: &LoopConfig) -> Result<LoopState> {
    let vision = args.vision.as_ref().context("--vision is required on a fresh start")?;
    let prd = args.prd.as_ref().context("--prd is required on a fresh start")?;

    let git = git_safety::GitSafety::new(&config.sprint_dir, args.sprint_name.clone());
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    let protected = state::default_protected_branches();
    let git_state = git
        .start_sprint(&args.sprint_name, &timestamp, &protected)
        .context("starting sprint branch")?;

    let mut state = LoopState::new(args.sprint_name.clone(), git_state.branch.clone(), git_state.original_branch.clone());
    state.git = git_state;

    let mut pre_loop = PreLoopDriver::new(&mut state, config);
    pre_loop.validate_inputs(vision, prd)?;

    Ok(state)
}

async fn run_pre_loop_remainder(state: &mut LoopState, config: &LoopConfig) -> Result<()> {
    // The plan-generation, refinement, and quality-gate steps all drive
    // through an AgentRuntime session elsewhere in the pipeline; this
    // entry point only enforces the deterministic checks once those
    // sessions have reported their results into `state`.
    let mut pre_loop = PreLoopDriver::new(state, config);
    pre_loop.check_plan_generation().context("plan generation gate")?;
    if let pre_loop::PreLoopOutcome::Aborted { reason } = pre_loop.check_blockers() {
        anyhow::bail!("pre-loop blocked: {reason}");
    }
    if pre_loop.all_gates_passed() {
        pre_loop.complete();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("value_loop=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    std::fs::create_dir_all(&config.sprint_dir).context("creating sprint directory")?;
    let _lock = LoopLock::acquire(config.lock_path())?;

    let store = StateStore::new(config.state_dir());
    let mut state = if store.exists() {
        info!(sprint_dir = %config.sprint_dir.display(), "resuming existing sprint");
        store.load().context("loading existing sprint state")?
    } else {
        info!(sprint_dir = %config.sprint_dir.display(), "starting fresh sprint");
        fresh_start(&args, &config).await?
    };

    if state.phase == LoopPhase::PreLoop {
        run_pre_loop_remainder(&mut state, &config).await?;
        store.save(&state)?;
    }

    let runtime: Arc<dyn agent_runtime::AgentRuntime> = Arc::new(ScriptedAgentRuntime::new());

    let exit_status = if state.epics.len() >= 2 {
        let driver = EpicLoopDriver::new(config.clone(), runtime, config.sprint_dir.clone());
        let (final_state, status) = driver.run(state).await?;
        state = final_state;
        status
    } else {
        let mut driver = ValueLoopDriver::new(state, config.clone(), runtime, config.sprint_dir.clone());
        driver.recover_from_crash().context("startup crash recovery")?;
        let status = driver.run().await?;
        state = driver.state;
        status
    };

    store.save(&state)?;
    std::process::exit(exit_status.exit_code());
}
