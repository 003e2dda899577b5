//! workpool CLI: run the orchestrator, inspect and clean its state, and give
//! workers a way to take registry locks.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use workpool::config::Config;
use workpool::engine::{Orchestrator, OrchestratorConfig};
use workpool::journal;
use workpool::locks::LockRegistry;
use workpool::model::AgentIdentity;
use workpool::telemetry::{TelemetryConfig, init_telemetry};
use workpool::tracker::BdTracker;
use workpool::worker::{ProcessWorker, WorkerProfile};

const COMMIT_MESSAGE: &str = "beads: close completed issues";
/// 128 + SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(
    name = "workpool",
    about = "Parallel work-item processing with external worker agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every ready item in a repository
    Run {
        /// Repository with tracker items
        #[arg(default_value = ".")]
        repo: PathBuf,
        /// Maximum concurrent agents
        #[arg(short = 'n', long)]
        max_agents: Option<usize>,
        /// Timeout per agent in minutes
        #[arg(short = 't', long)]
        timeout: Option<u64>,
        /// Worker profile (TOML)
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Do not commit tracker state after a successful run
        #[arg(long)]
        no_commit: bool,
    },
    /// Show active locks and recent session logs
    Status,
    /// Remove all locks, and session logs with --logs
    Clean {
        #[arg(long)]
        logs: bool,
    },
    /// Registry locks, for use by workers
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Take a lock; exits 1 if someone else holds it
    Acquire {
        key: String,
        #[arg(long, env = "WORKPOOL_AGENT_ID")]
        agent: String,
        /// Lock directory (defaults to WORKPOOL_LOCK_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Release a lock held by this agent
    Release {
        key: String,
        #[arg(long, env = "WORKPOOL_AGENT_ID")]
        agent: String,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            repo,
            max_agents,
            timeout,
            profile,
            no_commit,
        } => cmd_run(repo, max_agents, timeout, profile, no_commit).await,
        Command::Status => cmd_status(),
        Command::Clean { logs } => cmd_clean(logs),
        Command::Lock { action } => cmd_lock(action),
    }
}

async fn cmd_run(
    repo: PathBuf,
    max_agents: Option<usize>,
    timeout: Option<u64>,
    profile: Option<PathBuf>,
    no_commit: bool,
) -> anyhow::Result<ExitCode> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("repository not found: {}", repo.display()))?;
    dotenvy::from_path(repo.join(".env")).ok();

    let mut config = Config::from_env()?;
    if let Some(n) = max_agents {
        anyhow::ensure!(n > 0, "--max-agents must be at least 1");
        config.max_agents = n;
    }
    if let Some(minutes) = timeout {
        anyhow::ensure!(minutes > 0, "--timeout must be at least 1 minute");
        config.timeout = std::time::Duration::from_secs(minutes * 60);
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workpool".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let profile = match profile {
        Some(path) => WorkerProfile::load(&path)?,
        None => WorkerProfile::default(),
    };

    let tracker = Arc::new(BdTracker::new(config.tracker_command.clone(), repo.clone()));
    let worker = Arc::new(ProcessWorker::new(profile, config.worker_api_key.clone()));
    let locks = LockRegistry::new(&config.lock_dir);

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&tracker),
        worker,
        locks,
        OrchestratorConfig {
            max_agents: config.max_agents,
            deadline: config.timeout,
            repo_path: repo,
            log_dir: config.log_dir.clone(),
        },
    );

    // First Ctrl-C drains, the second abandons the run.
    let interrupt = || async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let Some(report) = orchestrator.run_interruptible(interrupt).await? else {
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    };

    if report.success_count() > 0 && !no_commit {
        match tracker.commit_state(COMMIT_MESSAGE) {
            Ok(true) => tracing::info!("committed tracker state"),
            Ok(false) => tracing::debug!("no tracker state to commit"),
            Err(e) => tracing::warn!(error = %e, "cannot commit tracker state"),
        }
    }

    Ok(if report.success_count() > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_status() -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    let locks = LockRegistry::new(&config.lock_dir).entries()?;

    if locks.is_empty() {
        println!("No active locks.");
    } else {
        println!("{} active lock(s):", locks.len());
        for lock in locks.iter().take(5) {
            println!(
                "  {:<40}  {}",
                lock.key,
                lock.holder.as_deref().unwrap_or("unknown")
            );
        }
        if locks.len() > 5 {
            println!("  ... and {} more", locks.len() - 5);
        }
    }

    let sessions = journal::recent_sessions(&config.log_dir)?;
    if !sessions.is_empty() {
        println!(
            "\n{} session log(s) in {}:",
            sessions.len(),
            config.log_dir.join(journal::SESSIONS_DIR).display()
        );
        for (path, modified) in sessions.iter().take(3) {
            let modified: chrono::DateTime<chrono::Local> = (*modified).into();
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            println!("  {}  {name}", modified.format("%H:%M:%S"));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_clean(logs: bool) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;

    let released = LockRegistry::new(&config.lock_dir).release_all();
    if released > 0 {
        println!("Removed {released} lock file(s).");
    }

    if logs {
        let sessions = journal::recent_sessions(&config.log_dir)?;
        for (path, _) in &sessions {
            std::fs::remove_file(path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
        }
        if !sessions.is_empty() {
            println!("Removed {} session log(s).", sessions.len());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_lock(action: LockAction) -> anyhow::Result<ExitCode> {
    let registry = |dir: Option<PathBuf>| -> anyhow::Result<LockRegistry> {
        Ok(match dir {
            Some(dir) => LockRegistry::new(dir),
            None => LockRegistry::new(Config::from_env()?.lock_dir),
        })
    };

    match action {
        LockAction::Acquire { key, agent, dir } => {
            let registry = registry(dir)?;
            let agent = AgentIdentity(agent);
            if registry.try_acquire(&key, &agent)? {
                Ok(ExitCode::SUCCESS)
            } else {
                let holder = registry.holder(&key);
                eprintln!(
                    "{key} is locked by {}",
                    holder.as_deref().unwrap_or("unknown")
                );
                Ok(ExitCode::FAILURE)
            }
        }
        LockAction::Release { key, agent, dir } => {
            let registry = registry(dir)?;
            if registry.release(&key, &AgentIdentity(agent))? {
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("{key} is not held by this agent");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
