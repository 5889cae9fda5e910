//! 规划层：Planner 能力接口、固定批次 Planner、基于 LLM 的 Planner
//!
//! Orchestrator 只看到校验过的 OperationCall 列表或显式的「空」信号；
//! 解析模型原始输出是 Planner 自己的职责。

pub mod fixed;
pub mod llm;
pub mod schema;

use async_trait::async_trait;
use thiserror::Error;

use crate::operations::{OperationCall, OperationDefinition};

pub use fixed::FixedPlanner;
pub use llm::{parse_planner_output, LlmPlanner};
pub use schema::operation_call_schema_json;

/// 一轮规划结果：操作列表 + 原始文本（空列表时交给诊断）
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    pub operations: Vec<OperationCall>,
    pub raw_text: String,
}

impl Proposal {
    pub fn new(operations: Vec<OperationCall>, raw_text: impl Into<String>) -> Self {
        Self {
            operations,
            raw_text: raw_text.into(),
        }
    }

    pub fn empty(raw_text: impl Into<String>) -> Self {
        Self::new(Vec::new(), raw_text)
    }
}

/// Planner 调用本身失败（LLM 不可用等）
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("{0}")]
    Other(String),
}

/// Planner 接口：根据目标、序列化历史与操作目录提出下一批操作
#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose(
        &self,
        goal: &str,
        serialized_history: &str,
        catalog: &[OperationDefinition],
    ) -> Result<Proposal, PlannerError>;
}
