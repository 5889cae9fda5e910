//! 编排过程事件：向观察者（CLI、日志、前端）推送状态变化、操作调用与停机

use serde::Serialize;
use uuid::Uuid;

use crate::core::{ExecutionState, HaltReason};

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// 新任务开始
    TaskStarted {
        task_id: Uuid,
        goal: String,
        scripted: bool,
    },
    /// 执行状态变化
    StateChanged {
        from: ExecutionState,
        to: ExecutionState,
    },
    /// 开始执行操作；脚本任务带步号
    OperationStarted { name: String, step: Option<usize> },
    /// 操作结束
    OperationFinished {
        name: String,
        ok: bool,
        duration_ms: u64,
    },
    /// Planner 给出本轮操作
    PlannerProposed { iteration: usize, count: usize },
    /// 已移交诊断
    DiagnosticInvoked { operation: String, ok: bool },
    /// 停机
    Halted {
        task_id: Uuid,
        reason: HaltReason,
        history_len: usize,
    },
}
