//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了锁管理命令的实现。

use crate::cli::{confirm, connect, LockArgs, LockSubcommand};
use anyhow::{Context, Result};
use std::path::Path;

pub async fn execute(config: &Path, args: &LockArgs) -> Result<()> {
    let manager = connect(config).await?;
    let coordinator = manager
        .redis_coordinator()
        .context("Lock commands require the redis locker backend")?;
    let locker = coordinator.locker();

    match &args.command {
        LockSubcommand::Status { key } => {
            match locker.lease_remaining(key).await? {
                Some(remaining) => println!(
                    "Lock '{}' is held, lease expires in {:.1}s",
                    key,
                    remaining.as_secs_f64()
                ),
                None => println!("Lock '{}' is free", key),
            }
        }
        LockSubcommand::Release { key, confirm: ask } => {
            if *ask
                && !confirm(&format!(
                    "Releasing '{}' lets another replica enter while the owner may still run. Continue?",
                    key
                ))?
            {
                println!("Operation cancelled.");
                return Ok(());
            }
            if locker.force_release(key).await? {
                println!("Lock '{}' released.", key);
            } else {
                println!("Lock '{}' was not held.", key);
            }
        }
    }
    Ok(())
}
