//! 状态定义：执行状态机、脚本步状态、任务描述、运行令牌与快照
//!
//! RunState 由 Orchestrator 独占修改；外部只看到 OrchestratorStatus 投影与 RunSnapshot。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::operations::{OperationCall, OutcomeRecord};

/// 执行状态：Idle -> Running -> {Paused, Error, Finished}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecutionState {
    Idle,
    Running,
    Paused,
    Error,
    Finished,
}

/// 脚本中每一步的状态（与 script 平行）
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed(Value),
    Error(String),
}

impl StepStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, StepStatus::Pending)
    }
}

/// 任务描述：新任务开始时创建，由 Orchestrator 独占
#[derive(Clone, Debug, Serialize)]
pub struct TaskDescriptor {
    pub id: Uuid,
    pub goal: String,
    pub script: Option<Vec<OperationCall>>,
}

impl TaskDescriptor {
    pub fn scripted(goal: impl Into<String>, script: Vec<OperationCall>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            script: Some(script),
        }
    }

    pub fn planned(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            script: None,
        }
    }

    pub fn is_scripted(&self) -> bool {
        self.script.is_some()
    }
}

/// 停机原因
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum HaltReason {
    /// 终止信号或脚本执行完毕
    Completed,
    /// 操作失败或 tick 内部错误
    Failed(String),
    BudgetExceeded,
    /// Planner 没有给出任何操作
    PlannerEmpty,
    MaxIterationsReached,
    /// 外部显式停止
    Stopped,
}

/// 停机时保留的只读「上一次运行」记录
#[derive(Clone, Debug, Serialize)]
pub struct RunSnapshot {
    pub task_id: Uuid,
    pub goal: String,
    pub state: ExecutionState,
    pub reason: HaltReason,
    pub history: Vec<OutcomeRecord>,
    pub halted_at: DateTime<Utc>,
}

/// 运行令牌：每个 tick 显式持有，停止即取消；取代全局 is_running 标志
#[derive(Clone, Debug)]
pub struct RunToken(CancellationToken);

impl RunToken {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// 已经取消的令牌（尚无任务时）
    pub fn halted() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self(token)
    }

    pub fn is_live(&self) -> bool {
        !self.0.is_cancelled()
    }

    pub fn halt(&self) {
        self.0.cancel();
    }

    pub async fn halted_signal(&self) {
        self.0.cancelled().await;
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrator 内部完整状态
#[derive(Debug)]
pub(crate) struct RunState {
    pub task: Option<Arc<TaskDescriptor>>,
    pub state: ExecutionState,
    pub step_statuses: Vec<StepStatus>,
    pub current_step: usize,
    pub iteration: usize,
    pub history: Vec<OutcomeRecord>,
    /// 正在执行的操作（子进度指示）
    pub active_operation: Option<String>,
    pub halt_reason: Option<HaltReason>,
    pub last_run: Option<RunSnapshot>,
    pub token: RunToken,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            task: None,
            state: ExecutionState::Idle,
            step_statuses: Vec::new(),
            current_step: 0,
            iteration: 0,
            history: Vec::new(),
            active_operation: None,
            halt_reason: None,
            last_run: None,
            token: RunToken::halted(),
        }
    }
}

impl RunState {
    /// 开始新任务：历史清空、步状态全部 Pending、新令牌
    pub fn begin(&mut self, task: TaskDescriptor, state: ExecutionState) -> Arc<TaskDescriptor> {
        self.token.halt();
        let steps = task.script.as_ref().map(|s| s.len()).unwrap_or(0);
        let task = Arc::new(task);
        self.task = Some(task.clone());
        self.state = state;
        self.step_statuses = vec![StepStatus::Pending; steps];
        self.current_step = 0;
        self.iteration = 0;
        self.history.clear();
        self.active_operation = None;
        self.halt_reason = None;
        self.token = RunToken::new();
        task
    }

    /// tick 结果是否仍属于当前任务（任务被替换后丢弃旧 tick 的结果）
    pub fn owns(&self, task_id: Uuid) -> bool {
        self.task.as_ref().map(|t| t.id) == Some(task_id)
    }

    /// 令牌已取消时换一枚新的（恢复运行）
    pub fn revive_token(&mut self) {
        if !self.token.is_live() {
            self.token = RunToken::new();
        }
    }

    pub fn project(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            task_id: self.task.as_ref().map(|t| t.id),
            goal: self.task.as_ref().map(|t| t.goal.clone()),
            scripted: self.task.as_ref().map(|t| t.is_scripted()).unwrap_or(false),
            state: self.state,
            current_step: self.current_step,
            iteration: self.iteration,
            step_statuses: self.step_statuses.clone(),
            history_len: self.history.len(),
            active_operation: self.active_operation.clone(),
            halt_reason: self.halt_reason.clone(),
            is_running: self.token.is_live(),
        }
    }
}

/// 外部可见的「投影」状态，轻量且可序列化
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub task_id: Option<Uuid>,
    pub goal: Option<String>,
    pub scripted: bool,
    pub state: ExecutionState,
    pub current_step: usize,
    pub iteration: usize,
    pub step_statuses: Vec<StepStatus>,
    pub history_len: usize,
    pub active_operation: Option<String>,
    pub halt_reason: Option<HaltReason>,
    pub is_running: bool,
}
