//! LLM Planner：拼 prompt（目标 + 操作目录 + 历史）调用 LLM，再把回复解析为操作调用
//!
//! parse_planner_output 从文本中提取 JSON：支持 {"operations": [...]}、[...] 或单个调用对象，
//! 也兼容 {"tool": ..., "args": ...} 写法；无法解析时给出空列表，由 Orchestrator 按 PlannerEmpty 处理。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::llm::{LlmClient, Message};
use crate::operations::{catalog_json, OperationCall, OperationDefinition};
use crate::planner::{operation_call_schema_json, Planner, PlannerError, Proposal};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the planner of a task orchestrator. \
Reply ONLY with JSON. Propose the next operation(s) needed to reach the goal, using only operations from the catalog. \
Independent operations may be returned together and will run concurrently. \
When the goal is achieved, call task_complete with a short summary.";

#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "args")]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProposal {
    Wrapped { operations: Vec<RawCall> },
    Batch(Vec<RawCall>),
    Single(RawCall),
}

/// 从文本中截出 JSON 片段（```json 块、数组或对象）
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出为操作调用；名字为空或参数不是对象的调用被丢弃
pub fn parse_planner_output(output: &str) -> Vec<OperationCall> {
    let Some(json_str) = extract_json(output) else {
        return Vec::new();
    };
    let raw: RawProposal = match serde_json::from_str(json_str) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("planner output is not a valid proposal: {}", e);
            return Vec::new();
        }
    };
    let calls = match raw {
        RawProposal::Wrapped { operations } => operations,
        RawProposal::Batch(calls) => calls,
        RawProposal::Single(call) => vec![call],
    };
    calls
        .into_iter()
        .filter_map(|c| {
            let name = c.name.trim().to_string();
            if name.is_empty() {
                return None;
            }
            match c.arguments {
                None | Some(Value::Null) => Some(OperationCall {
                    name,
                    arguments: Map::new(),
                }),
                Some(Value::Object(arguments)) => Some(OperationCall { name, arguments }),
                Some(_) => None,
            }
        })
        .collect()
}

/// LLM Planner：持有 LLM 与 system prompt
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    fn build_messages(
        &self,
        goal: &str,
        serialized_history: &str,
        catalog: &[OperationDefinition],
    ) -> Vec<Message> {
        let system = format!(
            "{}\n\nOperation catalog:\n{}\n\nOutput format (JSON Schema):\n{}",
            self.system_prompt,
            catalog_json(catalog),
            operation_call_schema_json()
        );
        let user = format!(
            "Goal: {}\n\nHistory of executed operations:\n{}",
            goal, serialized_history
        );
        vec![Message::system(system), Message::user(user)]
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn propose(
        &self,
        goal: &str,
        serialized_history: &str,
        catalog: &[OperationDefinition],
    ) -> Result<Proposal, PlannerError> {
        let messages = self.build_messages(goal, serialized_history, catalog);
        let output = self.llm.complete(&messages).await?;
        let operations = parse_planner_output(&output);
        tracing::debug!(count = operations.len(), "planner proposal parsed");
        Ok(Proposal::new(operations, output))
    }
}
