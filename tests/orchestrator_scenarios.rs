//! 编排内核端到端场景：脚本失败、单步回退、目标驱动完成、批次失败、迭代上限、预算熔断、停止、暂停、panic

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use cadence::config::AppConfig;
use cadence::core::{
    BudgetGuardian, DebuggerError, ExecutionState, HaltReason, Orchestrator, OrchestratorBuilder,
    StepStatus,
};
use cadence::operations::{
    EchoOperation, FnOperation, InMemoryRegistry, OperationCall, OperationRegistry,
    TaskCompleteOperation, DIAGNOSE,
};
use cadence::planner::{FixedPlanner, Planner};
use serde_json::{json, Value};

/// 注册 echo、task_complete、opA/opC（成功）、opB/fail（失败），以及计数的 diagnose
fn registry(diagnoses: Arc<AtomicUsize>) -> InMemoryRegistry {
    let mut registry = InMemoryRegistry::new();
    registry.register(EchoOperation);
    registry.register(TaskCompleteOperation);
    for name in ["opA", "opC"] {
        registry.register(FnOperation::new(name, "succeeds", |_| async {
            Ok(json!("ok"))
        }));
    }
    for name in ["opB", "fail"] {
        registry.register(FnOperation::new(name, "raises", |_| async {
            Err("boom".to_string())
        }));
    }
    registry.register(FnOperation::new(DIAGNOSE, "counts diagnoses", move |_| {
        let diagnoses = diagnoses.clone();
        async move {
            diagnoses.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "category": "test" }))
        }
    }));
    registry
}

fn build(
    registry: InMemoryRegistry,
    planner: Option<Arc<dyn Planner>>,
    guardian: Arc<BudgetGuardian>,
) -> Arc<Orchestrator> {
    let builder = OrchestratorBuilder::new(AppConfig::default())
        .with_registry(Arc::new(registry) as Arc<dyn OperationRegistry>)
        .with_guardian(guardian);
    let builder = match planner {
        Some(planner) => builder.with_planner(planner),
        None => builder.without_planner(),
    };
    builder.build().unwrap()
}

async fn wait(orch: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(5), orch.wait_for_halt())
        .await
        .expect("orchestrator did not halt");
}

fn echo(text: &str) -> OperationCall {
    OperationCall::new("echo", json!({ "text": text }))
}

#[tokio::test]
async fn test_scripted_failure_marks_step_and_diagnoses_once() {
    let diagnoses = Arc::new(AtomicUsize::new(0));
    let orch = build(registry(diagnoses.clone()), None, Arc::new(BudgetGuardian::new(100, 60)));
    let script = vec![
        OperationCall::bare("opA"),
        OperationCall::bare("opB"),
        OperationCall::bare("opC"),
    ];
    orch.start_scripted("three steps", script).unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Error);
    assert_eq!(status.step_statuses[0], StepStatus::Completed(json!("ok")));
    assert!(matches!(status.step_statuses[1], StepStatus::Error(ref m) if m.contains("boom")));
    assert_eq!(status.step_statuses[2], StepStatus::Pending);
    assert_eq!(status.current_step, 1);
    assert_eq!(orch.history().len(), 2);
    assert_eq!(diagnoses.load(Ordering::SeqCst), 1);
    assert!(!orch.is_running());
}

#[tokio::test]
async fn test_history_matches_script_order() {
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        None,
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    let script: Vec<OperationCall> = (0..5).map(|i| echo(&format!("line {}", i))).collect();
    orch.start_scripted("ordered", script.clone()).unwrap();
    wait(&orch).await;

    let history = orch.last_run().unwrap().history;
    assert_eq!(history.len(), script.len());
    for (record, call) in history.iter().zip(&script) {
        assert_eq!(&record.call, call);
    }
}

#[tokio::test]
async fn test_step_backward_resets_two_steps() {
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        None,
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    orch.start_scripted_paused("walk", vec![echo("a"), echo("b"), echo("c")])
        .unwrap();
    orch.step_forward().await.unwrap();
    orch.step_forward().await.unwrap();
    assert_eq!(orch.status().current_step, 2);

    orch.step_backward().unwrap();
    let status = orch.status();
    assert_eq!(status.current_step, 1);
    assert_eq!(status.step_statuses[1], StepStatus::Pending);
    assert_eq!(status.step_statuses[2], StepStatus::Pending);
    assert_eq!(status.state, ExecutionState::Paused);
}

#[tokio::test]
async fn test_planner_completes_on_third_iteration() {
    let planner = Arc::new(FixedPlanner::new(vec![
        vec![echo("one")],
        vec![echo("two")],
        vec![OperationCall::new("task_complete", json!({ "summary": "done" }))],
    ]));
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        Some(planner.clone() as Arc<dyn Planner>),
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    orch.start_planned("count to three").unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Finished);
    assert_eq!(status.halt_reason, Some(HaltReason::Completed));
    assert_eq!(orch.last_run().unwrap().history.len(), 3);
    assert!(!orch.is_running());
    assert_eq!(planner.calls(), 3);
}

#[tokio::test]
async fn test_failing_batch_appends_all_and_diagnoses_once() {
    let diagnoses = Arc::new(AtomicUsize::new(0));
    let planner: Arc<dyn Planner> = Arc::new(FixedPlanner::new(vec![vec![
        echo("fine"),
        OperationCall::bare("fail"),
    ]]));
    let orch = build(
        registry(diagnoses.clone()),
        Some(planner),
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    orch.start_planned("batch").unwrap();
    wait(&orch).await;

    let history = orch.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.is_success()).count(), 1);
    assert_eq!(orch.status().state, ExecutionState::Error);
    assert_eq!(diagnoses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_iteration_cap() {
    let planner = Arc::new(FixedPlanner::repeating(vec![echo("again")]));
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        Some(planner.clone() as Arc<dyn Planner>),
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    orch.set_max_iterations(3);
    orch.start_planned("never ends").unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.halt_reason, Some(HaltReason::MaxIterationsReached));
    assert_eq!(status.iteration, 3);
    assert_eq!(planner.calls(), 3);
    assert_eq!(orch.history().len(), 3);
}

#[tokio::test]
async fn test_budget_halts_planned_task() {
    // 每轮一次 Planner 调用；第 3 轮越过上限
    let guardian = Arc::new(BudgetGuardian::new(2, 60));
    let planner: Arc<dyn Planner> = Arc::new(FixedPlanner::repeating(vec![echo("again")]));
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        Some(planner),
        guardian.clone(),
    );
    orch.start_planned("spend").unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Error);
    assert_eq!(status.halt_reason, Some(HaltReason::BudgetExceeded));
    assert_eq!(orch.history().len(), 2);
    assert!(guardian.is_tripped());

    // 熔断粘滞：不 reset 时新任务立即停机
    orch.start_planned("spend again").unwrap();
    wait(&orch).await;
    assert_eq!(orch.status().halt_reason, Some(HaltReason::BudgetExceeded));

    guardian.reset();
    assert!(!guardian.is_tripped());
}

#[tokio::test]
async fn test_budget_marks_metered_script_step() {
    let guardian = Arc::new(BudgetGuardian::new(1, 60));
    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    registry.register(
        FnOperation::new("fetch", "metered fetch", |_| async { Ok(Value::Null) }).metered(true),
    );
    let orch = build(registry, None, guardian);
    orch.start_scripted(
        "fetch twice",
        vec![OperationCall::bare("fetch"), OperationCall::bare("fetch")],
    )
    .unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.halt_reason, Some(HaltReason::BudgetExceeded));
    assert!(matches!(status.step_statuses[0], StepStatus::Completed(_)));
    assert!(matches!(status.step_statuses[1], StepStatus::Error(ref m) if m.contains("budget exceeded")));
    assert_eq!(orch.history().len(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let planner: Arc<dyn Planner> = Arc::new(FixedPlanner::repeating(vec![echo("again")]));
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        Some(planner),
        Arc::new(BudgetGuardian::new(1000, 60)),
    );
    orch.set_max_iterations(1_000_000);
    orch.start_planned("forever").unwrap();

    orch.stop();
    let first = orch.status();
    let first_snapshot = orch.last_run().unwrap();
    orch.stop();
    let second = orch.status();

    assert_eq!(first.state, ExecutionState::Finished);
    assert_eq!(first.halt_reason, Some(HaltReason::Stopped));
    assert_eq!(second.state, first.state);
    assert_eq!(second.halt_reason, first.halt_reason);
    assert_eq!(orch.last_run().unwrap().halted_at, first_snapshot.halted_at);
    assert!(!orch.is_running());
}

#[tokio::test]
async fn test_run_from_step_overwrites_record() {
    let orch = build(
        registry(Arc::new(AtomicUsize::new(0))),
        None,
        Arc::new(BudgetGuardian::new(100, 60)),
    );
    let script = vec![echo("a"), OperationCall::bare("opB"), echo("c")];
    orch.start_scripted("retry middle", script).unwrap();
    wait(&orch).await;
    assert_eq!(orch.history().len(), 2);

    // 先决步骤未完成时拒绝
    assert_eq!(
        orch.run_from_step(3),
        Err(DebuggerError::UnfinishedPriorStep {
            index: 3,
            pending: 2
        })
    );

    orch.run_from_step(1).unwrap();
    wait(&orch).await;
    let history = orch.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].call.name, "opB");
    assert_eq!(orch.status().state, ExecutionState::Error);
}

#[tokio::test]
async fn test_resume_from_error_retries_step() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    let counter = attempts.clone();
    registry.register(FnOperation::new("flaky", "fails once", move |_| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("first attempt fails".to_string())
            } else {
                Ok(json!("recovered"))
            }
        }
    }));
    let orch = build(registry, None, Arc::new(BudgetGuardian::new(100, 60)));
    orch.start_scripted("flaky", vec![OperationCall::bare("flaky"), echo("after")])
        .unwrap();
    wait(&orch).await;
    assert_eq!(orch.status().state, ExecutionState::Error);

    orch.resume().unwrap();
    wait(&orch).await;
    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Finished);
    assert_eq!(status.step_statuses[0], StepStatus::Completed(json!("recovered")));
    assert_eq!(orch.history().len(), 2);
}

#[tokio::test]
async fn test_pause_stops_scheduling_until_resume() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    let (on_enter, on_release) = (entered.clone(), release.clone());
    registry.register(FnOperation::new("gate", "waits to be released", move |_| {
        let (on_enter, on_release) = (on_enter.clone(), on_release.clone());
        async move {
            on_enter.notify_one();
            on_release.notified().await;
            Ok(json!("released"))
        }
    }));
    let orch = build(registry, None, Arc::new(BudgetGuardian::new(100, 60)));
    orch.start_scripted(
        "four steps",
        vec![OperationCall::bare("gate"), echo("b"), echo("c"), echo("d")],
    )
    .unwrap();

    entered.notified().await;
    orch.pause().unwrap();
    release.notify_one();
    // 在途的一步照常完成，之后不再调度
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Paused);
    assert_eq!(status.current_step, 1);
    assert_eq!(status.step_statuses[0], StepStatus::Completed(json!("released")));
    assert_eq!(status.step_statuses[1], StepStatus::Pending);
    assert_eq!(orch.history().len(), 1);
    assert!(orch.is_running());

    orch.resume().unwrap();
    wait(&orch).await;
    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Finished);
    assert_eq!(status.current_step, 4);
    let history = orch.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].call.name, "gate");
}

#[tokio::test]
async fn test_panicking_call_keeps_batch_siblings() {
    let diagnoses = Arc::new(AtomicUsize::new(0));
    let mut registry = registry(diagnoses.clone());
    registry.register(FnOperation::new("slow", "sleeps then succeeds", |_| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!("slept"))
    }));
    registry.register(FnOperation::new("explode", "panics", |_| async {
        let blow_up = true;
        if blow_up {
            panic!("exploded mid-batch");
        }
        Ok(Value::Null)
    }));
    let planner: Arc<dyn Planner> = Arc::new(FixedPlanner::new(vec![vec![
        OperationCall::bare("slow"),
        OperationCall::bare("explode"),
    ]]));
    let orch = build(registry, Some(planner), Arc::new(BudgetGuardian::new(100, 60)));
    orch.start_planned("batch with a panic").unwrap();
    wait(&orch).await;

    let history = orch.history();
    assert_eq!(history.len(), 2);
    let slow = history.iter().find(|r| r.call.name == "slow").unwrap();
    assert_eq!(slow.result, Some(json!("slept")));
    let exploded = history.iter().find(|r| r.call.name == "explode").unwrap();
    assert!(exploded.error_message().unwrap().contains("exploded mid-batch"));
    assert_eq!(orch.status().state, ExecutionState::Error);
    assert_eq!(diagnoses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_diagnose_still_halts() {
    let diagnoses = Arc::new(AtomicUsize::new(0));
    let mut registry = InMemoryRegistry::new();
    registry.register(FnOperation::new("fail", "raises", |_| async {
        Err("boom".to_string())
    }));
    let counter = diagnoses.clone();
    registry.register(FnOperation::new(DIAGNOSE, "panics", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let blow_up = true;
            if blow_up {
                panic!("diagnoser crashed");
            }
            Ok(Value::Null)
        }
    }));
    let orch = build(registry, None, Arc::new(BudgetGuardian::new(100, 60)));
    orch.start_scripted("fails", vec![OperationCall::bare("fail")])
        .unwrap();
    wait(&orch).await;

    let status = orch.status();
    assert_eq!(status.state, ExecutionState::Error);
    assert!(matches!(status.halt_reason, Some(HaltReason::Failed(ref m)) if m.contains("boom")));
    assert_eq!(diagnoses.load(Ordering::SeqCst), 1);
    assert!(!orch.is_running());
    assert!(orch.last_run().is_some());
    assert_eq!(orch.history().len(), 1);

    // 驱动没有卡住：调试器仍能重跑这一步
    orch.run_from_step(0).unwrap();
    wait(&orch).await;
    assert_eq!(diagnoses.load(Ordering::SeqCst), 2);
}
