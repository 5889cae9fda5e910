//! 调度器：执行单次操作调用并产出归一化的 OutcomeRecord
//!
//! 查找 -> 预算守卫（仅计量操作）-> 远程转发或本地 compile + invoke；
//! 所有单次失败（包括操作体 panic）都收进 OutcomeRecord，只有 BudgetExceeded 会从这里向上抛出。
//! 每次调用输出一行结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::{BudgetExceeded, BudgetGuardian};
use crate::operations::{
    ClassifiedError, ExecutionLocation, OperationCall, OperationRegistry, OutcomeRecord,
    RegisteredOperation, RemoteTransport, RuntimeCause,
};

/// 调度器：持有 Registry、预算守卫与可选的远程传输
pub struct Dispatcher {
    registry: Arc<dyn OperationRegistry>,
    guardian: Arc<BudgetGuardian>,
    transport: Option<Arc<dyn RemoteTransport>>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn OperationRegistry>, guardian: Arc<BudgetGuardian>) -> Self {
        Self {
            registry,
            guardian,
            transport: None,
            timeout: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 调用方自定的单次超时；内核默认不设
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<dyn OperationRegistry> {
        &self.registry
    }

    /// 执行一次调用
    pub async fn dispatch(&self, call: OperationCall) -> Result<OutcomeRecord, BudgetExceeded> {
        let start = Instant::now();
        let Some(entry) = self.registry.lookup(&call.name) else {
            let record = OutcomeRecord::failure(
                call.clone(),
                None,
                ClassifiedError::not_found(&call.name),
                0,
            );
            audit(&record);
            return Ok(record);
        };

        if entry.definition.is_metered() {
            self.guardian.check_and_record()?;
        }

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute_caught(&entry, &call)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClassifiedError::runtime(
                    &call.name,
                    RuntimeCause::TimedOut,
                    format!("timed out after {:?}", limit),
                )),
            },
            None => self.execute_caught(&entry, &call).await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let definition = Some(entry.definition);
        let record = match outcome {
            Ok(result) => OutcomeRecord::success(call, definition, result, duration_ms),
            Err(err) => OutcomeRecord::failure(call, definition, err, duration_ms),
        };
        audit(&record);
        Ok(record)
    }

    /// 操作体 panic 归为运行时错误，不越过调度器
    async fn execute_caught(
        &self,
        entry: &RegisteredOperation,
        call: &OperationCall,
    ) -> Result<Value, ClassifiedError> {
        match AssertUnwindSafe(self.execute(entry, call)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(operation = %call.name, "operation body panicked: {}", message);
                Err(ClassifiedError::runtime(
                    &call.name,
                    RuntimeCause::Raised,
                    format!("panicked: {}", message),
                ))
            }
        }
    }

    async fn execute(
        &self,
        entry: &RegisteredOperation,
        call: &OperationCall,
    ) -> Result<Value, ClassifiedError> {
        match entry.definition.location {
            ExecutionLocation::Remote => {
                let transport = self.transport.as_ref().ok_or_else(|| {
                    ClassifiedError::runtime(
                        &call.name,
                        RuntimeCause::Transport,
                        "no remote transport configured",
                    )
                })?;
                transport
                    .execute(call)
                    .await
                    .map_err(|e| ClassifiedError::runtime(&call.name, e.cause(), e.to_string()))
            }
            ExecutionLocation::Local => {
                let body = entry.body.as_ref().ok_or_else(|| ClassifiedError::Compilation {
                    operation: call.name.clone(),
                    message: "no local body registered".to_string(),
                    source_text: None,
                })?;
                if let Err(failure) = body.compile(&call.arguments) {
                    // 源码只进日志，不进 Planner 可见的记录文本
                    if let Some(source) = &failure.source_text {
                        tracing::warn!(
                            operation = %call.name,
                            source = %source,
                            "operation body failed to compile: {}",
                            failure.message
                        );
                    }
                    return Err(ClassifiedError::Compilation {
                        operation: call.name.clone(),
                        message: failure.message,
                        source_text: failure.source_text,
                    });
                }
                body.invoke(call.arguments.clone())
                    .await
                    .map_err(|e| ClassifiedError::runtime(&call.name, RuntimeCause::Raised, e))
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn audit(record: &OutcomeRecord) {
    let outcome = match &record.error {
        None => "ok",
        Some(ClassifiedError::Compilation { .. }) => "compilation_error",
        Some(ClassifiedError::Runtime { cause: RuntimeCause::NotFound, .. }) => "not_found",
        Some(ClassifiedError::Runtime { .. }) => "runtime_error",
    };
    let audit = serde_json::json!({
        "event": "operation_audit",
        "operation": record.call.name,
        "ok": record.is_success(),
        "outcome": outcome,
        "duration_ms": record.duration_ms,
        "args_preview": args_preview(&Value::Object(record.call.arguments.clone())),
    });
    tracing::info!(audit = %audit.to_string(), "operation");
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
