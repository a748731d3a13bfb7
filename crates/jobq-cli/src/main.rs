use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use jobq_core::{
    read_worker_pid, Error, JobState, JobStore, NewJob, QueueConfig, Result, ShellRunner,
    WorkerPool, WorkerPoolConfig,
};
use jobq_core::jobs::{DEFAULT_PRIORITY, DEFAULT_TIMEOUT_MS};

mod output;

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "Local persistent background job queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (defaults to ./data, or $DATA_PATH)
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    /// Log level: debug, info, warn, error
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job
    Enqueue(EnqueueArgs),

    /// Shorthand: enqueue a command with defaults
    Add {
        /// Shell command to run
        command: String,

        /// Retry limit
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,

        /// Priority 1..5 (1 = highest)
        #[arg(short = 'p', long)]
        priority: Option<u8>,
    },

    /// Worker process control
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Per-state job counts and worker process state
    Status,

    /// Aggregate queue metrics
    Metrics,

    /// List jobs, newest first
    List {
        /// Only show jobs in this state
        #[arg(long)]
        state: Option<String>,
    },

    /// Cancel a pending, failed, or dead job
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Dead letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Configuration store
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
struct EnqueueArgs {
    /// Shell command to run
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Job id (generated when omitted)
    #[arg(short = 'i', long)]
    id: Option<String>,

    /// Retry limit
    #[arg(short = 'r', long)]
    max_retries: Option<u32>,

    /// Priority 1..5 (1 = highest)
    #[arg(short = 'p', long)]
    priority: Option<u8>,

    /// Per-attempt timeout in milliseconds
    #[arg(short = 't', long)]
    timeout_ms: Option<u64>,

    /// Prompt for the job interactively
    #[arg(long)]
    interactive: bool,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Run worker loops until SIGINT/SIGTERM
    Start {
        /// Number of workers
        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Signal the recorded worker process to stop
    Stop,
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead jobs
    List,

    /// Revive a dead job back to pending
    Retry {
        /// Job id
        job_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a config key
    Set { key: String, value: String },

    /// Show a config key
    Get { key: String },

    /// Show all config keys
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let data_dir = cli
        .data_path
        .clone()
        .unwrap_or_else(jobq_core::resolve_data_dir);
    debug!(version = jobq_core::VERSION, data_dir = %data_dir.display(), "jobq starting");

    if let Err(e) = run(cli.command, &data_dir).await {
        eprintln!("{}", format!("❌ {}", e).red());
        std::process::exit(1);
    }
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info").to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_new(&level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn open_store(data_dir: &Path, config: &QueueConfig) -> Result<JobStore> {
    Ok(JobStore::open(data_dir)
        .await?
        .with_default_max_retries(config.max_retries))
}

async fn run(command: Commands, data_dir: &Path) -> Result<()> {
    match command {
        Commands::Enqueue(args) => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            let new_job = if args.interactive {
                prompt_for_job(&config)?
            } else {
                let command = args.command.ok_or_else(|| {
                    Error::validation("Command is required (use -c, or --interactive)")
                })?;
                NewJob {
                    command,
                    id: args.id,
                    priority: args.priority,
                    max_retries: args.max_retries,
                    timeout_ms: args.timeout_ms,
                }
            };

            let job = store.enqueue(new_job).await?;
            println!("{}", format!("✅ Enqueued job {}", job.id).green());
            println!(
                "   priority={} max_retries={} timeout_ms={}",
                job.priority, job.max_retries, job.timeout_ms
            );
        }

        Commands::Add {
            command,
            max_retries,
            priority,
        } => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            let new_job = NewJob {
                command,
                id: None,
                priority,
                max_retries,
                timeout_ms: None,
            };
            let job = store.enqueue(new_job).await?;
            println!("{}", format!("✅ Enqueued job {}", job.id).green());
        }

        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                if count == 0 {
                    return Err(Error::validation("Worker count must be positive"));
                }
                let config = QueueConfig::load(data_dir).await?;
                let store = Arc::new(open_store(data_dir, &config).await?);
                let pool = WorkerPool::new(
                    store,
                    Arc::new(ShellRunner::new()),
                    WorkerPoolConfig {
                        worker_count: count,
                        backoff_base: config.backoff_base,
                        ..Default::default()
                    },
                );

                println!(
                    "Starting {} worker(s) on {} (Ctrl-C to stop)",
                    count,
                    data_dir.display()
                );
                let report = pool.run_until_signal().await?;

                println!("Final worker stats:");
                output::print_worker_snapshot(&pool.snapshot());
                if report.is_clean() {
                    println!("{}", "✅ Workers stopped cleanly".green());
                } else {
                    println!(
                        "{}",
                        format!(
                            "⚠️  Workers still busy at shutdown: {} (their jobs will be reclaimed)",
                            report.orphaned.join(", ")
                        )
                        .yellow()
                    );
                }
            }

            WorkerCommands::Stop => {
                let pid = read_worker_pid(data_dir).await.ok_or_else(|| {
                    Error::not_found("No running worker process (worker.pid missing)")
                })?;
                stop_worker_process(pid)?;
                println!(
                    "{}",
                    format!("✅ Sent stop signal to worker process {}", pid).green()
                );
            }
        },

        Commands::Status => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            let counts = store.status().await?;
            output::print_status(&counts);

            match read_worker_pid(data_dir).await {
                Some(pid) if process_alive(pid) => {
                    println!("{}", format!("Worker process: running (pid {})", pid).green());
                }
                Some(pid) => {
                    println!(
                        "{}",
                        format!("Worker process: pid file present but process {} is gone", pid)
                            .yellow()
                    );
                }
                None => println!("{}", "Worker process: not running".dimmed()),
            }
        }

        Commands::Metrics => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            let metrics = store.metrics().await?;
            output::print_metrics(&metrics);
        }

        Commands::List { state } => {
            let state = match state {
                Some(s) => Some(s.parse::<JobState>()?),
                None => None,
            };
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            let jobs = store.list(state).await?;
            output::print_jobs_table(&jobs);
        }

        Commands::Cancel { job_id } => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            store.cancel(&job_id).await?;
            println!("{}", format!("✅ Cancelled job {}", job_id).green());
        }

        Commands::Dlq { command } => {
            let config = QueueConfig::load(data_dir).await?;
            let store = open_store(data_dir, &config).await?;
            match command {
                DlqCommands::List => {
                    let dead = store.list_dlq().await?;
                    output::print_dlq_table(&dead);
                }
                DlqCommands::Retry { job_id } => {
                    store.retry_from_dlq(&job_id).await?;
                    println!(
                        "{}",
                        format!("✅ Job {} moved back to pending", job_id).green()
                    );
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => {
                let mut config = QueueConfig::load(data_dir).await?;
                config.set(&key, &value)?;
                config.save(data_dir).await?;
                println!("{}", format!("✅ {} = {}", key, config.get(&key)?).green());
            }
            ConfigCommands::Get { key } => {
                let config = QueueConfig::load(data_dir).await?;
                println!("{}", config.get(&key)?);
            }
            ConfigCommands::List => {
                let config = QueueConfig::load(data_dir).await?;
                for (key, value) in config.entries() {
                    println!("{} = {}", key, value);
                }
            }
        },
    }

    Ok(())
}

/// Collect job parameters from interactive prompts
fn prompt_for_job(config: &QueueConfig) -> Result<NewJob> {
    use dialoguer::Input;

    let command: String = Input::new()
        .with_prompt("Command")
        .interact_text()
        .map_err(prompt_error)?;
    let id: String = Input::new()
        .with_prompt("Job id (blank to generate)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_error)?;
    let priority: u8 = Input::new()
        .with_prompt("Priority (1 = highest, 5 = lowest)")
        .default(DEFAULT_PRIORITY)
        .interact_text()
        .map_err(prompt_error)?;
    let max_retries: u32 = Input::new()
        .with_prompt("Max retries")
        .default(config.max_retries)
        .interact_text()
        .map_err(prompt_error)?;
    let timeout_ms: u64 = Input::new()
        .with_prompt("Timeout (ms)")
        .default(DEFAULT_TIMEOUT_MS)
        .interact_text()
        .map_err(prompt_error)?;

    Ok(NewJob {
        command,
        id: if id.trim().is_empty() { None } else { Some(id) },
        priority: Some(priority),
        max_retries: Some(max_retries),
        timeout_ms: Some(timeout_ms),
    })
}

fn prompt_error(e: dialoguer::Error) -> Error {
    Error::validation(format!("Prompt failed: {}", e))
}

/// Check whether a pid belongs to a live process
fn process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, System};
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    system.refresh_process(pid) && system.process(pid).is_some()
}

#[cfg(unix)]
fn stop_worker_process(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        return Err(Error::Store(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn stop_worker_process(_pid: u32) -> Result<()> {
    Err(Error::validation(
        "worker stop is only supported on Unix platforms",
    ))
}
