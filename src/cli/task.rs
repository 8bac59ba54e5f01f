//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了周期任务管理命令的实现。

use crate::cli::{confirm, connect, TaskArgs, TaskSubcommand};
use crate::context::SyncContext;
use crate::coordinator::Coordinator;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

pub async fn execute(config: &Path, args: &TaskArgs) -> Result<()> {
    let manager = connect(config).await?;
    let coordinator = manager
        .redis_coordinator()
        .context("Task commands require the redis locker backend")?;
    let ctx = SyncContext::background();

    match &args.command {
        TaskSubcommand::Status { task } => {
            let task_config = manager.config().task(task);
            println!("=== Periodic Task '{}' ===\n", task);
            println!("Interval:  {:?}", task_config.task_interval);
            println!("Timeout:   {:?}", task_config.task_timeout);
            println!("Frequency: {:?}", task_config.runner_frequency);

            match coordinator.last_run_timestamp(&ctx, task).await? {
                Some(last_run) => {
                    let elapsed = (Utc::now() - last_run).to_std().unwrap_or_default();
                    println!("Last run:  {} ({}s ago)", last_run.to_rfc3339(), elapsed.as_secs());
                    if elapsed >= task_config.task_interval {
                        println!("Status:    due on the next poll");
                    } else {
                        let remaining = task_config.task_interval - elapsed;
                        println!("Status:    next run in {}s", remaining.as_secs());
                    }
                }
                None => println!("Last run:  never"),
            }
            match coordinator.locker().lease_remaining(task).await? {
                Some(_) => println!("Lock:      held (task may be running)"),
                None => println!("Lock:      free"),
            }
        }
        TaskSubcommand::Reset { task, confirm: ask } => {
            if *ask && !confirm(&format!("Reset the last run of '{}'?", task))? {
                println!("Operation cancelled.");
                return Ok(());
            }
            if coordinator.clear_last_run_timestamp(&ctx, task).await? {
                println!("Task '{}' will run on the next poll.", task);
            } else {
                println!("Task '{}' had no recorded run.", task);
            }
        }
    }
    Ok(())
}
