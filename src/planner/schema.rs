//! 操作调用 JSON Schema 生成（schemars）
//!
//! 将「合法 operation call」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 操作调用格式：与 parse_planner_output 解析的 `{"name": "...", "arguments": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct OperationCallFormat {
    /// 操作名，必须出现在操作目录中；完成目标时调用 task_complete
    pub name: String,
    /// 操作参数，依操作的 inputs 声明而定
    pub arguments: HashMap<String, serde_json::Value>,
}

/// 一轮可返回多个调用，它们会被并发执行
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ProposalFormat {
    pub operations: Vec<OperationCallFormat>,
}

/// 返回 Planner 输出格式的 JSON Schema 字符串，可拼入 system prompt
pub fn operation_call_schema_json() -> String {
    let schema = schema_for!(ProposalFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let schema = operation_call_schema_json();
        assert!(schema.contains("operations"));
        assert!(schema.contains("arguments"));
    }
}
