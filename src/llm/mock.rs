//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 取最后一条 User 消息中的目标，直接回一个 task_complete 调用，便于本地跑通规划循环。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：对任何目标都宣告完成
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.lines().next().unwrap_or_default())
            .unwrap_or("(no input)");

        let call = serde_json::json!({
            "name": crate::operations::TASK_COMPLETE,
            "arguments": { "summary": format!("Mock completed: {}", last_user) },
        });
        Ok(call.to_string())
    }
}
