//! 编排内核错误类型
//!
//! 单次操作失败不在这里：它们被收进 OutcomeRecord。这里只有启动、调试器与 tick 内部错误。

use thiserror::Error;

use crate::core::{BudgetExceeded, ExecutionState};
use crate::planner::PlannerError;

/// 提交任务或管理操作的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("no planner configured for goal-driven tasks")]
    NoPlanner,

    #[error("script is empty")]
    EmptyScript,

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 调试器动作在当前状态下不合法
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DebuggerError {
    #[error("no task loaded")]
    NoTask,

    #[error("{action} is only available for scripted tasks")]
    NotScripted { action: &'static str },

    #[error("{action} is not valid while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: ExecutionState,
    },

    #[error("already at the first step")]
    AtFirstStep,

    #[error("step {index} is out of range (script has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("step {pending} before {index} has not run yet")]
    UnfinishedPriorStep { index: usize, pending: usize },

    #[error("a tick is already in progress")]
    TickInProgress,
}

/// tick 内部错误：在 tick 顶层捕获，预算错误直接停机，其余走诊断移交
#[derive(Error, Debug)]
pub(crate) enum TickError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error("planner failed: {0}")]
    Planner(#[from] PlannerError),

    #[error("internal error: {0}")]
    Internal(String),
}
