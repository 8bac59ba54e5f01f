//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块是运维命令行工具的入口点。

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    oxsync::telemetry::init_tracing("oxsync");
    oxsync::cli::run().await
}
