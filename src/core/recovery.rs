//! 诊断移交
//!
//! 不可恢复的失败发生后，把目标、历史与失败上下文打包，作为普通操作调用交给注册的诊断操作；
//! 诊断结果只记日志，不改变流程：无论诊断成败，Orchestrator 随后都会停机。

use serde::Serialize;

use crate::operations::{Dispatcher, OperationCall, OutcomeRecord};

/// 交给诊断操作的上下文
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticContext {
    pub goal: String,
    pub serialized_history: String,
    pub failed_operation: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_operation_source: Option<String>,
}

impl DiagnosticContext {
    /// 由失败的 OutcomeRecord 构建（编译错误附带源码）
    pub fn from_record(goal: &str, serialized_history: String, record: &OutcomeRecord) -> Self {
        Self {
            goal: goal.to_string(),
            serialized_history,
            failed_operation: record.call.name.clone(),
            error_message: record.error_message().unwrap_or_default(),
            failed_operation_source: record
                .error
                .as_ref()
                .and_then(|e| e.source_text())
                .map(str::to_string),
        }
    }

    pub fn to_call(&self, operation: &str) -> OperationCall {
        let arguments = serde_json::to_value(self).unwrap_or_default();
        OperationCall::new(operation, arguments)
    }
}

/// 诊断移交：持有诊断操作名
#[derive(Debug, Clone)]
pub struct DiagnosticHandoff {
    operation: String,
}

impl DiagnosticHandoff {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// 调用诊断操作；任何失败都只记日志，返回 None
    pub async fn hand_off(
        &self,
        dispatcher: &Dispatcher,
        context: DiagnosticContext,
    ) -> Option<OutcomeRecord> {
        tracing::warn!(
            failed_operation = %context.failed_operation,
            error = %context.error_message,
            "handing failure to diagnostic operation '{}'",
            self.operation
        );
        match dispatcher.dispatch(context.to_call(&self.operation)).await {
            Ok(record) if record.is_success() => {
                let diagnosis = record
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                tracing::info!(diagnosis = %diagnosis, "diagnostic completed");
                Some(record)
            }
            Ok(record) => {
                tracing::warn!(
                    "diagnostic operation failed: {}",
                    record.error_message().unwrap_or_default()
                );
                Some(record)
            }
            Err(e) => {
                tracing::warn!("diagnostic operation not run: {}", e);
                None
            }
        }
    }
}
