//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::Config;
use crate::manager::SyncManager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, default_value = "oxsync.toml", help = "Path to the TOML configuration")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "lock", about = "Inspect or release distributed locks")]
    Lock(LockArgs),

    #[command(name = "task", about = "Inspect or reset periodic tasks")]
    Task(TaskArgs),

    #[command(name = "metrics", about = "Print process metrics")]
    Metrics(MetricsArgs),
}

#[derive(Parser, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum LockSubcommand {
    #[command(about = "Show whether a lock is held and for how long")]
    Status {
        #[arg(short, long, help = "Lock key")]
        key: String,
    },
    #[command(about = "Delete a lock regardless of its owner")]
    Release {
        #[arg(short, long, help = "Lock key")]
        key: String,
        #[arg(long, help = "Ask for confirmation before releasing")]
        confirm: bool,
    },
}

#[derive(Parser, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskSubcommand {
    #[command(about = "Show the last run of a periodic task")]
    Status {
        #[arg(short, long, help = "Task name")]
        task: String,
    },
    #[command(about = "Clear the last-run marker so the task runs on the next poll")]
    Reset {
        #[arg(short, long, help = "Task name")]
        task: String,
        #[arg(long, help = "Ask for confirmation before resetting")]
        confirm: bool,
    },
}

#[derive(Parser, Debug)]
pub struct MetricsArgs {
    #[arg(short, long, help = "Only print lines containing this text")]
    pub filter: Option<String>,
}

mod lock;
mod metrics;
mod task;

pub(crate) async fn connect(path: &Path) -> Result<SyncManager> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    SyncManager::init(config)
        .await
        .context("Failed to initialize SyncManager")
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;

    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Lock(args) => lock::execute(&cli.config, args).await,
        Commands::Task(args) => task::execute(&cli.config, args).await,
        Commands::Metrics(args) => metrics::execute(args).await,
    }
}
