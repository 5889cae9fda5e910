//! 编排器：周期调度器（状态机 + tick 驱动）
//!
//! 每个任务有一个驱动任务在后台逐个执行 tick，tick 之间 `yield_now` 让出执行权；
//! `ticking` 标志保证任何时刻最多一个 tick 在执行（调度器与调试器单步共用）。
//! 停机统一走 `halt`：快照历史到 last_run、取消运行令牌、广播 Halted 事件。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::OrchestratorSection;
use crate::core::error::TickError;
use crate::core::history::serialize_history;
use crate::core::state::RunState;
use crate::core::{
    BudgetGuardian, DiagnosticContext, DiagnosticHandoff, ExecutionState, HaltReason,
    OrchestratorError, OrchestratorEvent, OrchestratorStatus, RunSnapshot, StepStatus,
    TaskDescriptor,
};
use crate::operations::dispatcher::panic_message;
use crate::operations::{Dispatcher, OperationCall, OutcomeRecord};
use crate::planner::Planner;

/// 编排器参数（来自 [orchestrator] 配置段）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_iterations: usize,
    pub terminal_operation: String,
    pub diagnose_operation: String,
    pub history_field_chars: usize,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &OrchestratorSection) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            terminal_operation: cfg.terminal_operation.clone(),
            diagnose_operation: cfg.diagnose_operation.clone(),
            history_field_chars: cfg.history_field_chars,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorSection::default())
    }
}

/// tick 由谁触发
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum TickTrigger {
    Scheduler,
    /// 调试器单步
    Manual,
}

/// 一次 tick 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum TickOutcome {
    /// 可以继续调度下一个 tick
    Continue,
    Halted,
    /// 已有 tick 在执行或没有任务，本次不执行
    Skipped,
}

/// 编排器：持有调度器、Planner、预算守卫与诊断移交；RunState 只在这里被修改
pub struct Orchestrator {
    pub(super) dispatcher: Arc<Dispatcher>,
    pub(super) planner: Option<Arc<dyn Planner>>,
    pub(super) guardian: Arc<BudgetGuardian>,
    pub(super) handoff: DiagnosticHandoff,
    terminal_operation: String,
    history_field_chars: usize,
    max_iterations: AtomicUsize,
    pub(super) state: Mutex<RunState>,
    ticking: AtomicBool,
    /// 本次 tick 已做过诊断移交
    handed_off: AtomicBool,
    driving: AtomicBool,
    watching_guardian: AtomicBool,
    pub(super) events: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        guardian: Arc<BudgetGuardian>,
        planner: Option<Arc<dyn Planner>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            dispatcher,
            planner,
            guardian,
            handoff: DiagnosticHandoff::new(settings.diagnose_operation),
            terminal_operation: settings.terminal_operation,
            history_field_chars: settings.history_field_chars,
            max_iterations: AtomicUsize::new(settings.max_iterations),
            state: Mutex::new(RunState::default()),
            ticking: AtomicBool::new(false),
            handed_off: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            watching_guardian: AtomicBool::new(false),
            events,
        }
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn emit(&self, event: OrchestratorEvent) {
        // 没有订阅者时忽略
        let _ = self.events.send(event);
    }

    pub(super) fn set_state(&self, st: &mut RunState, to: ExecutionState) {
        let from = st.state;
        st.state = to;
        if from != to {
            tracing::debug!("state {:?} -> {:?}", from, to);
            self.emit(OrchestratorEvent::StateChanged { from, to });
        }
    }

    // ---------- 提交任务 ----------

    /// 提交脚本任务：历史清空、步状态全部 Pending，立即开始执行
    pub fn start_scripted(
        self: &Arc<Self>,
        goal: impl Into<String>,
        script: Vec<OperationCall>,
    ) -> Result<Uuid, OrchestratorError> {
        if script.is_empty() {
            return Err(OrchestratorError::EmptyScript);
        }
        let task_id = self.begin(TaskDescriptor::scripted(goal, script), ExecutionState::Running);
        self.spawn_driver();
        Ok(task_id)
    }

    /// 载入脚本但停在第 0 步（Paused），由调试器驱动
    pub fn start_scripted_paused(
        self: &Arc<Self>,
        goal: impl Into<String>,
        script: Vec<OperationCall>,
    ) -> Result<Uuid, OrchestratorError> {
        if script.is_empty() {
            return Err(OrchestratorError::EmptyScript);
        }
        Ok(self.begin(TaskDescriptor::scripted(goal, script), ExecutionState::Paused))
    }

    /// 提交目标驱动任务：每轮向 Planner 索要下一批操作
    pub fn start_planned(self: &Arc<Self>, goal: impl Into<String>) -> Result<Uuid, OrchestratorError> {
        if self.planner.is_none() {
            return Err(OrchestratorError::NoPlanner);
        }
        let task_id = self.begin(TaskDescriptor::planned(goal), ExecutionState::Running);
        self.spawn_driver();
        Ok(task_id)
    }

    fn begin(self: &Arc<Self>, task: TaskDescriptor, state: ExecutionState) -> Uuid {
        self.spawn_guardian_watch();
        let task = {
            let mut st = self.lock_state();
            let from = st.state;
            let task = st.begin(task, state);
            if from != state {
                self.emit(OrchestratorEvent::StateChanged { from, to: state });
            }
            task
        };
        tracing::info!(task_id = %task.id, scripted = task.is_scripted(), "task started: {}", task.goal);
        self.emit(OrchestratorEvent::TaskStarted {
            task_id: task.id,
            goal: task.goal.clone(),
            scripted: task.is_scripted(),
        });
        task.id
    }

    /// 外部停止：Running/Paused -> Finished(Stopped)；Error/Finished 保持不变。重复调用结果相同
    pub fn stop(&self) {
        let st = self.lock_state();
        let Some(task_id) = st.task.as_ref().map(|t| t.id) else {
            return;
        };
        if matches!(st.state, ExecutionState::Running | ExecutionState::Paused) {
            drop(st);
            tracing::info!(task_id = %task_id, "stop requested");
            self.halt(task_id, ExecutionState::Finished, HaltReason::Stopped);
        } else {
            st.token.halt();
        }
    }

    /// 等待当前运行停机（运行令牌被取消）
    pub async fn wait_for_halt(&self) {
        let token = self.lock_state().token.clone();
        token.halted_signal().await;
    }

    // ---------- 观察 ----------

    pub fn status(&self) -> OrchestratorStatus {
        self.lock_state().project()
    }

    pub fn history(&self) -> Vec<OutcomeRecord> {
        self.lock_state().history.clone()
    }

    /// 最近一次停机时的只读快照
    pub fn last_run(&self) -> Option<RunSnapshot> {
        self.lock_state().last_run.clone()
    }

    /// 全局「运行中」标志：当前运行令牌未被取消
    pub fn is_running(&self) -> bool {
        self.lock_state().token.is_live()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    // ---------- 管理 ----------

    pub fn set_max_iterations(&self, max_iterations: usize) {
        self.max_iterations.store(max_iterations, Ordering::Relaxed);
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations.load(Ordering::Relaxed)
    }

    /// 预算守卫（reset / configure）
    pub fn guardian(&self) -> &Arc<BudgetGuardian> {
        &self.guardian
    }

    // ---------- 驱动 ----------

    /// 启动驱动任务（已有驱动时不重复启动）
    pub(super) fn spawn_driver(self: &Arc<Self>) {
        if self.driving.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                while this.should_drive() {
                    if this.run_tick(TickTrigger::Scheduler).await == TickOutcome::Halted {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                this.driving.store(false, Ordering::Release);
                // 清标志后再看一次，避免错过在此期间的 resume
                if !this.should_drive() || this.driving.swap(true, Ordering::AcqRel) {
                    break;
                }
            }
            tracing::debug!("driver exited");
        });
    }

    fn should_drive(&self) -> bool {
        let st = self.lock_state();
        st.state == ExecutionState::Running && st.token.is_live()
    }

    /// 订阅守卫的停机请求：熔断时停掉当前运行
    fn spawn_guardian_watch(self: &Arc<Self>) {
        if self.watching_guardian.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let mut rx = self.guardian.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(request) => {
                        let Some(this) = weak.upgrade() else { break };
                        // 请求到达前已被 reset
                        if !this.guardian.is_tripped() {
                            continue;
                        }
                        let task_id = {
                            let st = this.lock_state();
                            st.task.as_ref().filter(|_| st.token.is_live()).map(|t| t.id)
                        };
                        if let Some(task_id) = task_id {
                            tracing::warn!("halting on guardian request: {}", request);
                            this.halt(task_id, ExecutionState::Error, HaltReason::BudgetExceeded);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// 执行一个 tick；顶层捕获 tick 内部的错误与 panic，按失败处理
    pub(super) async fn run_tick(&self, trigger: TickTrigger) -> TickOutcome {
        if self.ticking.swap(true, Ordering::AcqRel) {
            tracing::debug!(?trigger, "tick already in progress, skipping");
            return TickOutcome::Skipped;
        }
        let Some(task) = self.lock_state().task.clone() else {
            self.ticking.store(false, Ordering::Release);
            return TickOutcome::Skipped;
        };
        tracing::debug!(task_id = %task.id, ?trigger, "tick");
        self.handed_off.store(false, Ordering::Release);

        let result = AssertUnwindSafe(self.tick(&task)).catch_unwind().await;
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.fail_tick(&task, err).await,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(task_id = %task.id, "tick panicked: {}", message);
                self.fail_tick(&task, TickError::Internal(message)).await
            }
        };
        self.ticking.store(false, Ordering::Release);
        outcome
    }

    async fn tick(&self, task: &Arc<TaskDescriptor>) -> Result<TickOutcome, TickError> {
        match &task.script {
            Some(script) => self.scripted_tick(task, script).await,
            None => self.planned_tick(task).await,
        }
    }

    async fn scripted_tick(
        &self,
        task: &Arc<TaskDescriptor>,
        script: &[OperationCall],
    ) -> Result<TickOutcome, TickError> {
        let index = {
            let mut st = self.lock_state();
            if !st.owns(task.id) {
                return Ok(TickOutcome::Skipped);
            }
            let index = st.current_step;
            if index >= script.len() {
                drop(st);
                self.halt(task.id, ExecutionState::Finished, HaltReason::Completed);
                return Ok(TickOutcome::Halted);
            }
            st.active_operation = Some(script[index].name.clone());
            index
        };

        let call = script[index].clone();
        self.emit(OrchestratorEvent::OperationStarted {
            name: call.name.clone(),
            step: Some(index),
        });
        let record = self.dispatcher.dispatch(call).await?;
        self.emit(OrchestratorEvent::OperationFinished {
            name: record.call.name.clone(),
            ok: record.is_success(),
            duration_ms: record.duration_ms,
        });

        let failure = {
            let mut st = self.lock_state();
            if !st.owns(task.id) {
                return Ok(TickOutcome::Skipped);
            }
            // 重跑某一步时覆盖该步原有记录
            st.history.truncate(index);
            st.history.push(record.clone());
            st.active_operation = None;
            // 执行期间已被停机：记录照常写入，但不再改变状态
            let live = st.token.is_live();
            match record.error_message() {
                Some(message) => {
                    st.step_statuses[index] = StepStatus::Error(message.clone());
                    if !live {
                        return Ok(TickOutcome::Halted);
                    }
                    self.set_state(&mut st, ExecutionState::Error);
                    Some((message, serialize_history(&st.history, self.history_field_chars)))
                }
                None => {
                    st.step_statuses[index] =
                        StepStatus::Completed(record.result.clone().unwrap_or_default());
                    st.current_step = index + 1;
                    if !live {
                        return Ok(TickOutcome::Halted);
                    }
                    None
                }
            }
        };

        if let Some((message, serialized)) = failure {
            tracing::warn!(step = index, operation = %record.call.name, "step failed: {}", message);
            let context = DiagnosticContext::from_record(&task.goal, serialized, &record);
            self.diagnose(context).await;
            self.halt(task.id, ExecutionState::Error, HaltReason::Failed(message));
            return Ok(TickOutcome::Halted);
        }

        if record.call.name == self.terminal_operation {
            self.halt(task.id, ExecutionState::Finished, HaltReason::Completed);
            return Ok(TickOutcome::Halted);
        }
        Ok(TickOutcome::Continue)
    }

    async fn planned_tick(&self, task: &Arc<TaskDescriptor>) -> Result<TickOutcome, TickError> {
        let planner = self
            .planner
            .as_ref()
            .ok_or_else(|| TickError::Internal("no planner configured".to_string()))?;

        let (iteration, serialized) = {
            let st = self.lock_state();
            if !st.owns(task.id) {
                return Ok(TickOutcome::Skipped);
            }
            (
                st.iteration,
                serialize_history(&st.history, self.history_field_chars),
            )
        };

        let max_iterations = self.max_iterations();
        if iteration >= max_iterations {
            tracing::warn!(task_id = %task.id, max_iterations, "max iterations reached");
            self.halt(task.id, ExecutionState::Error, HaltReason::MaxIterationsReached);
            return Ok(TickOutcome::Halted);
        }

        self.guardian.check_and_record()?;
        let catalog = self.dispatcher.registry().list_all();
        let proposal = planner.propose(&task.goal, &serialized, &catalog).await?;
        self.emit(OrchestratorEvent::PlannerProposed {
            iteration,
            count: proposal.operations.len(),
        });

        if proposal.operations.is_empty() {
            tracing::warn!(task_id = %task.id, iteration, "planner proposed no operations");
            let context = DiagnosticContext {
                goal: task.goal.clone(),
                serialized_history: serialized,
                failed_operation: "planner".to_string(),
                error_message: format!(
                    "planner proposed no operations; raw output: {}",
                    proposal.raw_text
                ),
                failed_operation_source: None,
            };
            self.diagnose(context).await;
            self.halt(task.id, ExecutionState::Error, HaltReason::PlannerEmpty);
            return Ok(TickOutcome::Halted);
        }

        {
            let mut st = self.lock_state();
            st.active_operation = Some(
                proposal
                    .operations
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        // 全部启动后再一起等待；记录按完成顺序追加
        let mut pending: FuturesUnordered<_> = proposal
            .operations
            .into_iter()
            .map(|call| {
                self.emit(OrchestratorEvent::OperationStarted {
                    name: call.name.clone(),
                    step: None,
                });
                self.dispatcher.dispatch(call)
            })
            .collect();

        let mut records = Vec::new();
        let mut budget = None;
        while let Some(result) = pending.next().await {
            match result {
                Ok(record) => {
                    self.emit(OrchestratorEvent::OperationFinished {
                        name: record.call.name.clone(),
                        ok: record.is_success(),
                        duration_ms: record.duration_ms,
                    });
                    let mut st = self.lock_state();
                    if st.owns(task.id) {
                        st.history.push(record.clone());
                    }
                    records.push(record);
                }
                Err(exceeded) => budget = Some(exceeded),
            }
        }

        let serialized = {
            let mut st = self.lock_state();
            if !st.owns(task.id) {
                return Ok(TickOutcome::Skipped);
            }
            st.active_operation = None;
            if !st.token.is_live() {
                return Ok(TickOutcome::Halted);
            }
            serialize_history(&st.history, self.history_field_chars)
        };

        if let Some(exceeded) = budget {
            return Err(exceeded.into());
        }

        let completed = records
            .iter()
            .any(|r| r.call.name == self.terminal_operation && r.is_success());
        if completed {
            self.halt(task.id, ExecutionState::Finished, HaltReason::Completed);
            return Ok(TickOutcome::Halted);
        }

        if let Some(failed) = records.iter().find(|r| !r.is_success()) {
            let message = failed.error_message().unwrap_or_default();
            let failures = records.iter().filter(|r| !r.is_success()).count();
            tracing::warn!(task_id = %task.id, iteration, failures, "planned cycle failed: {}", message);
            {
                let mut st = self.lock_state();
                self.set_state(&mut st, ExecutionState::Error);
            }
            let context = DiagnosticContext::from_record(&task.goal, serialized, failed);
            self.diagnose(context).await;
            self.halt(task.id, ExecutionState::Error, HaltReason::Failed(message));
            return Ok(TickOutcome::Halted);
        }

        let mut st = self.lock_state();
        if st.owns(task.id) {
            st.iteration += 1;
        }
        tracing::debug!(task_id = %task.id, iteration = st.iteration, "planned cycle succeeded");
        Ok(TickOutcome::Continue)
    }

    /// tick 顶层错误处理：预算错误立即停机；其余走诊断移交后停机
    async fn fail_tick(&self, task: &Arc<TaskDescriptor>, err: TickError) -> TickOutcome {
        let message = err.to_string();
        let (failed_operation, serialized) = {
            let mut st = self.lock_state();
            if !st.owns(task.id) {
                return TickOutcome::Skipped;
            }
            let failed_operation = st
                .active_operation
                .take()
                .unwrap_or_else(|| "orchestrator".to_string());
            if task.is_scripted() {
                let index = st.current_step;
                if let Some(status) = st.step_statuses.get_mut(index) {
                    *status = StepStatus::Error(message.clone());
                }
            }
            if !st.token.is_live() {
                return TickOutcome::Halted;
            }
            self.set_state(&mut st, ExecutionState::Error);
            (
                failed_operation,
                serialize_history(&st.history, self.history_field_chars),
            )
        };

        if let TickError::Budget(_) = err {
            tracing::warn!(task_id = %task.id, "{}", message);
            self.halt(task.id, ExecutionState::Error, HaltReason::BudgetExceeded);
            return TickOutcome::Halted;
        }

        tracing::error!(task_id = %task.id, "tick failed: {}", message);
        if self.handed_off.load(Ordering::Acquire) {
            tracing::debug!(task_id = %task.id, "diagnostic already invoked in this tick");
        } else {
            let context = DiagnosticContext {
                goal: task.goal.clone(),
                serialized_history: serialized,
                failed_operation,
                error_message: message.clone(),
                failed_operation_source: None,
            };
            self.diagnose(context).await;
        }
        self.halt(task.id, ExecutionState::Error, HaltReason::Failed(message));
        TickOutcome::Halted
    }

    async fn diagnose(&self, context: DiagnosticContext) {
        self.handed_off.store(true, Ordering::Release);
        let record = self.handoff.hand_off(&self.dispatcher, context).await;
        self.emit(OrchestratorEvent::DiagnosticInvoked {
            operation: self.handoff.operation().to_string(),
            ok: record.map(|r| r.is_success()).unwrap_or(false),
        });
    }

    /// 停机：写入终态与原因、快照历史、取消运行令牌；同一次运行只生效一次
    pub(super) fn halt(&self, task_id: Uuid, state: ExecutionState, reason: HaltReason) -> bool {
        let (goal, history_len) = {
            let mut st = self.lock_state();
            if !st.owns(task_id) || !st.token.is_live() {
                return false;
            }
            self.set_state(&mut st, state);
            st.halt_reason = Some(reason.clone());
            st.active_operation = None;
            let goal = st.task.as_ref().map(|t| t.goal.clone()).unwrap_or_default();
            st.last_run = Some(RunSnapshot {
                task_id,
                goal: goal.clone(),
                state,
                reason: reason.clone(),
                history: st.history.clone(),
                halted_at: Utc::now(),
            });
            st.token.halt();
            (goal, st.history.len())
        };
        tracing::info!(task_id = %task_id, ?state, ?reason, history_len, "task halted: {}", goal);
        self.emit(OrchestratorEvent::Halted {
            task_id,
            reason,
            history_len,
        });
        true
    }
}
