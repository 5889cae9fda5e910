//! 操作数据模型：调用、定义、结果记录与分类错误
//!
//! OperationCall 由 Planner 产出或从脚本读取；Dispatcher 为每次调用产出且只产出一条 OutcomeRecord。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 一次操作调用：{"name": "...", "arguments": {...}}，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl OperationCall {
    /// 非对象的 arguments 视为空参数
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// 无参数调用
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }
}

/// 执行位置：本地构造并调用，或转发给远程执行服务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionLocation {
    Local,
    Remote,
}

/// 参数声明（供 Planner 理解如何构造 arguments）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// 操作定义：由 Registry 持有，Orchestrator 只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub location: ExecutionLocation,
    #[serde(default)]
    pub inputs: Vec<ParamSpec>,
    /// 是否消耗外部资源（需经过预算守卫）；远程操作总是计量
    #[serde(default)]
    pub metered: bool,
}

impl OperationDefinition {
    pub fn remote(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            location: ExecutionLocation::Remote,
            inputs: Vec::new(),
            metered: true,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<ParamSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn is_metered(&self) -> bool {
        self.metered || self.location == ExecutionLocation::Remote
    }
}

/// RuntimeError 的细分原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeCause {
    /// Registry 中不存在该操作
    NotFound,
    /// 操作体执行时报错
    Raised,
    /// 传输失败或远程返回非成功状态
    Transport,
    /// 远程响应体无法解析
    MalformedResponse,
    /// 调用方设置的单次调用超时
    TimedOut,
}

/// 分类错误：编译期（操作体畸形，执行前发现）或运行期（执行中抛错、传输/解析失败）
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedError {
    #[error("compilation error in '{operation}': {message}")]
    Compilation {
        operation: String,
        message: String,
        /// 出错的操作体源码，只用于日志与诊断，不进入 Planner 上下文
        #[serde(skip)]
        source_text: Option<String>,
    },
    #[error("runtime error in '{operation}': {message}")]
    Runtime {
        operation: String,
        message: String,
        cause: RuntimeCause,
    },
}

impl ClassifiedError {
    pub fn not_found(operation: &str) -> Self {
        Self::Runtime {
            operation: operation.to_string(),
            message: "not found".to_string(),
            cause: RuntimeCause::NotFound,
        }
    }

    pub fn runtime(operation: &str, cause: RuntimeCause, message: impl Into<String>) -> Self {
        Self::Runtime {
            operation: operation.to_string(),
            message: message.into(),
            cause,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Compilation { message, .. } | Self::Runtime { message, .. } => message,
        }
    }

    pub fn source_text(&self) -> Option<&str> {
        match self {
            Self::Compilation { source_text, .. } => source_text.as_deref(),
            Self::Runtime { .. } => None,
        }
    }

    pub fn is_compilation(&self) -> bool {
        matches!(self, Self::Compilation { .. })
    }
}

/// 单次调用的结果记录：成功 payload 或分类错误，二者恰有其一
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub call: OperationCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<OperationDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    pub duration_ms: u64,
}

impl OutcomeRecord {
    pub fn success(
        call: OperationCall,
        definition: Option<OperationDefinition>,
        result: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            call,
            definition,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(
        call: OperationCall,
        definition: Option<OperationDefinition>,
        error: ClassifiedError,
        duration_ms: u64,
    ) -> Self {
        Self {
            call,
            definition,
            result: None,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_new_ignores_non_object_arguments() {
        let call = OperationCall::new("echo", json!("text"));
        assert!(call.arguments.is_empty());
        let call = OperationCall::new("echo", json!({"text": "hi"}));
        assert_eq!(call.arguments.get("text"), Some(&json!("hi")));
    }

    #[test]
    fn test_compilation_source_never_serialized() {
        let err = ClassifiedError::Compilation {
            operation: "render".into(),
            message: "unbalanced braces".into(),
            source_text: Some("fn render( {".into()),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("compilation"));
        assert!(!json.contains("fn render"));
        assert_eq!(err.source_text(), Some("fn render( {"));
    }

    #[test]
    fn test_remote_definitions_are_metered() {
        let def = OperationDefinition::remote("fetch", "fetch a page");
        assert!(def.is_metered());
    }
}
