//! Cadence - Agent 任务编排内核
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 预算守卫、周期调度器（Orchestrator）、单步调试器、诊断移交、状态与历史
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: 日志初始化
//! - **operations**: 操作数据模型、注册表、本地/远程执行与调度器
//! - **planner**: Planner 接口、固定批次 Planner、LLM Planner

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod operations;
pub mod planner;

pub use crate::core::{Orchestrator, OrchestratorBuilder};
