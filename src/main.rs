//! Cadence - Agent 任务编排内核
//!
//! 入口：初始化日志、加载配置、构建编排器，运行一个脚本任务或目标驱动任务，
//! 停机后把「上一次运行」快照以 JSON 打印到 stdout。Ctrl-C 触发 stop。
//!
//! 用法：cadence [--config <path>] [--script <file.toml>] [goal ...]

use std::path::PathBuf;

use anyhow::{bail, Context};
use cadence::config::{load_config, AppConfig};
use cadence::core::{load_script, OrchestratorBuilder};
use clap::Parser;

/// Agent 任务编排内核
#[derive(Parser, Debug)]
#[command(name = "cadence", version, about)]
struct Args {
    /// 配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML 脚本文件；不给时把 goal 交给 Planner
    #[arg(long)]
    script: Option<PathBuf>,

    /// 任务目标
    #[arg(trailing_var_arg = true)]
    goal: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cadence::observability::init();

    let args = Args::parse();
    let goal = args.goal.join(" ");
    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;

    match &args.script {
        Some(path) => {
            let script = load_script(path)?;
            let goal = if goal.is_empty() { script.goal } else { goal };
            orchestrator.start_scripted(goal, script.steps)?;
        }
        None => {
            if goal.trim().is_empty() {
                bail!("no goal given (pass a goal or --script <file.toml>)");
            }
            orchestrator.start_planned(goal)?;
        }
    }

    tokio::select! {
        _ = orchestrator.wait_for_halt() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, stopping");
            orchestrator.stop();
        }
    }

    let snapshot = orchestrator
        .last_run()
        .context("orchestrator halted without a snapshot")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize last run")?
    );
    Ok(())
}
