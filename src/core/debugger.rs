//! 单步调试器：暂停、恢复、单步前进、回退一步、从指定步重跑
//!
//! 除 resume 外只适用于脚本任务。非法的状态转换返回 DebuggerError，不会 panic。

use std::sync::Arc;

use crate::core::orchestrator::{TickOutcome, TickTrigger};
use crate::core::state::RunState;
use crate::core::{DebuggerError, ExecutionState, Orchestrator, OrchestratorStatus, StepStatus};

fn require_scripted(st: &RunState, action: &'static str) -> Result<(), DebuggerError> {
    let task = st.task.as_ref().ok_or(DebuggerError::NoTask)?;
    if !task.is_scripted() {
        return Err(DebuggerError::NotScripted { action });
    }
    Ok(())
}

fn require_state(
    st: &RunState,
    action: &'static str,
    allowed: &[ExecutionState],
) -> Result<(), DebuggerError> {
    if allowed.contains(&st.state) {
        Ok(())
    } else {
        Err(DebuggerError::InvalidTransition {
            action,
            state: st.state,
        })
    }
}

impl Orchestrator {
    /// Running -> Paused；正在执行的 tick 照常完成，之后不再调度
    pub fn pause(&self) -> Result<(), DebuggerError> {
        let mut st = self.lock_state();
        require_scripted(&st, "pause")?;
        require_state(&st, "pause", &[ExecutionState::Running])?;
        self.set_state(&mut st, ExecutionState::Paused);
        tracing::info!(step = st.current_step, "paused");
        Ok(())
    }

    /// Paused/Error -> Running，并立即触发执行
    pub fn resume(self: &Arc<Self>) -> Result<(), DebuggerError> {
        {
            let mut st = self.lock_state();
            if st.task.is_none() {
                return Err(DebuggerError::NoTask);
            }
            require_state(
                &st,
                "resume",
                &[ExecutionState::Paused, ExecutionState::Error],
            )?;
            st.revive_token();
            st.halt_reason = None;
            self.set_state(&mut st, ExecutionState::Running);
            tracing::info!(step = st.current_step, iteration = st.iteration, "resumed");
        }
        self.spawn_driver();
        Ok(())
    }

    /// 仅在 Paused 时执行一个 tick；之后回到 Paused（tick 进入 Error/Finished 时保持）
    pub async fn step_forward(self: &Arc<Self>) -> Result<OrchestratorStatus, DebuggerError> {
        {
            let st = self.lock_state();
            require_scripted(&st, "step_forward")?;
            require_state(&st, "step_forward", &[ExecutionState::Paused])?;
        }
        if self.run_tick(TickTrigger::Manual).await == TickOutcome::Skipped {
            return Err(DebuggerError::TickInProgress);
        }
        let mut st = self.lock_state();
        if st.state == ExecutionState::Running {
            self.set_state(&mut st, ExecutionState::Paused);
        }
        tracing::debug!(step = st.current_step, state = ?st.state, "stepped forward");
        Ok(st.project())
    }

    /// Paused/Error 且当前步 > 0 时回退一步：新旧两步都重置为 Pending，状态 Paused
    pub fn step_backward(&self) -> Result<(), DebuggerError> {
        let mut st = self.lock_state();
        require_scripted(&st, "step_backward")?;
        require_state(
            &st,
            "step_backward",
            &[ExecutionState::Paused, ExecutionState::Error],
        )?;
        if st.current_step == 0 {
            return Err(DebuggerError::AtFirstStep);
        }
        let old = st.current_step;
        let new = old - 1;
        if let Some(status) = st.step_statuses.get_mut(old) {
            *status = StepStatus::Pending;
        }
        st.step_statuses[new] = StepStatus::Pending;
        st.current_step = new;
        st.history.truncate(new);
        st.active_operation = None;
        st.halt_reason = None;
        st.revive_token();
        self.set_state(&mut st, ExecutionState::Paused);
        tracing::info!(from = old, to = new, "stepped backward");
        Ok(())
    }

    /// 从第 index 步重跑：index 及之后的步重置为 Pending，状态 Running 并触发执行
    pub fn run_from_step(self: &Arc<Self>, index: usize) -> Result<(), DebuggerError> {
        {
            let mut st = self.lock_state();
            require_scripted(&st, "run_from_step")?;
            require_state(
                &st,
                "run_from_step",
                &[
                    ExecutionState::Paused,
                    ExecutionState::Error,
                    ExecutionState::Finished,
                ],
            )?;
            let len = st.step_statuses.len();
            if index > len {
                return Err(DebuggerError::StepOutOfRange { index, len });
            }
            if let Some(pending) = st.step_statuses[..index].iter().position(StepStatus::is_pending) {
                return Err(DebuggerError::UnfinishedPriorStep { index, pending });
            }
            for status in st.step_statuses[index..].iter_mut() {
                *status = StepStatus::Pending;
            }
            st.current_step = index;
            st.history.truncate(index);
            st.active_operation = None;
            st.halt_reason = None;
            st.revive_token();
            self.set_state(&mut st, ExecutionState::Running);
            tracing::info!(step = index, "running from step");
        }
        self.spawn_driver();
        Ok(())
    }
}
