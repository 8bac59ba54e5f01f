//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了指标查询命令的实现。

use crate::cli::MetricsArgs;
use crate::metrics::get_metrics_string;
use anyhow::Result;

pub async fn execute(args: &MetricsArgs) -> Result<()> {
    let output = get_metrics_string();
    match &args.filter {
        Some(filter) => {
            for line in output.lines().filter(|line| line.contains(filter.as_str())) {
                println!("{}", line);
            }
        }
        None => print!("{}", output),
    }
    Ok(())
}
