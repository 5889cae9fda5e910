//! 内置操作：echo（测试用）、task_complete（终止信号）、diagnose（规则型诊断）

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::operations::{Operation, ParamSpec};

/// 约定的终止信号操作名
pub const TASK_COMPLETE: &str = "task_complete";
/// 约定的诊断操作名
pub const DIAGNOSE: &str = "diagnose";

/// Echo 操作：回显文本
pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Args: {\"text\": \"message\"}"
    }

    fn inputs(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::optional("text", "text to echo back")]
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        Ok(Value::String(text.to_string()))
    }
}

/// 终止信号：Planner 或脚本调用它表示任务完成，结果即为总结
pub struct TaskCompleteOperation;

#[async_trait]
impl Operation for TaskCompleteOperation {
    fn name(&self) -> &str {
        TASK_COMPLETE
    }

    fn description(&self) -> &str {
        "Signal that the goal is achieved. Args: {\"summary\": \"what was done\"}"
    }

    fn inputs(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::optional("summary", "short summary of the result")]
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        let summary = arguments
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("task complete");
        Ok(json!({ "summary": summary }))
    }
}

/// 规则型诊断：根据失败上下文给出分类与建议，不调用 LLM
pub struct DiagnoseOperation;

impl DiagnoseOperation {
    fn classify(message: &str) -> (&'static str, &'static str) {
        let lower = message.to_lowercase();
        if lower.contains("not found") {
            ("unknown_operation", "register the operation or correct the planner catalog")
        } else if lower.contains("compilation") || lower.contains("placeholder") {
            ("malformed_body", "fix the operation body; it failed before execution")
        } else if lower.contains("could not parse response") || lower.contains("status") {
            ("remote_failure", "check the remote execution service")
        } else if lower.contains("no operations") {
            ("planner_empty", "rephrase the goal or inspect the planner output")
        } else {
            ("runtime_failure", "inspect the operation arguments and retry from the failing step")
        }
    }
}

#[async_trait]
impl Operation for DiagnoseOperation {
    fn name(&self) -> &str {
        DIAGNOSE
    }

    fn description(&self) -> &str {
        "Analyse a failed run. Receives goal, serialized_history, failed_operation, error_message."
    }

    fn inputs(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("failed_operation", "name of the failing operation"),
            ParamSpec::required("error_message", "error reported by the failure"),
            ParamSpec::optional("goal", "goal of the task"),
            ParamSpec::optional("serialized_history", "history of the run"),
        ]
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        let failed = arguments
            .get("failed_operation")
            .and_then(|v| v.as_str())
            .ok_or("failed_operation is required")?;
        let message = arguments
            .get("error_message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let prior_steps = arguments
            .get("serialized_history")
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str::<Vec<Value>>(s).ok())
            .map(|v| v.len())
            .unwrap_or(0);
        let (category, suggestion) = Self::classify(message);
        Ok(json!({
            "failed_operation": failed,
            "category": category,
            "suggestion": suggestion,
            "prior_steps": prior_steps,
            "has_source": arguments.contains_key("failed_operation_source"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_echo() {
        let out = EchoOperation.invoke(args(json!({"text": "hi"}))).await.unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn test_task_complete_summary() {
        let out = TaskCompleteOperation
            .invoke(args(json!({"summary": "done"})))
            .await
            .unwrap();
        assert_eq!(out["summary"], "done");
    }

    #[tokio::test]
    async fn test_diagnose_classifies_not_found() {
        let out = DiagnoseOperation
            .invoke(args(json!({
                "failed_operation": "render",
                "error_message": "runtime error in 'render': not found",
                "serialized_history": "[{\"name\":\"echo\"}]",
            })))
            .await
            .unwrap();
        assert_eq!(out["category"], "unknown_operation");
        assert_eq!(out["prior_steps"], 1);
    }

    #[tokio::test]
    async fn test_diagnose_requires_failed_operation() {
        assert!(DiagnoseOperation.invoke(Map::new()).await.is_err());
    }
}
