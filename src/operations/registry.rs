//! 操作注册表
//!
//! 本地操作实现 Operation trait（name / description / compile / invoke），远程操作只登记定义；
//! OperationRegistry 是编排内核看到的唯一接口：按名查找与列出全部定义。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::operations::{ExecutionLocation, OperationDefinition, ParamSpec};

/// 构造可调用单元失败（操作体畸形）
#[derive(Debug, Clone)]
pub struct CompileFailure {
    pub message: String,
    /// 出错的源码文本（仅供带外检查）
    pub source_text: Option<String>,
}

impl CompileFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_text: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_text = Some(source.into());
        self
    }
}

/// 本地操作体：先 compile（参数绑定 / 源码解析），再 invoke
#[async_trait]
pub trait Operation: Send + Sync {
    /// 操作名（OperationCall.name）
    fn name(&self) -> &str;

    /// 操作描述（供 Planner 理解功能）
    fn description(&self) -> &str;

    /// 参数声明
    fn inputs(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// 是否消耗外部资源（需要预算守卫放行）
    fn metered(&self) -> bool {
        false
    }

    /// 用调用参数构造可调用单元；失败归为 CompilationError
    fn compile(&self, _arguments: &Map<String, Value>) -> Result<(), CompileFailure> {
        Ok(())
    }

    /// 执行；Err 归为 RuntimeError
    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String>;
}

/// 注册表条目：定义 + 可选的本地操作体（远程操作无本地体）
#[derive(Clone)]
pub struct RegisteredOperation {
    pub definition: OperationDefinition,
    pub body: Option<Arc<dyn Operation>>,
}

/// Registry 接口（外部协作者）
pub trait OperationRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<RegisteredOperation>;

    fn list_all(&self) -> Vec<OperationDefinition>;
}

/// 内存注册表：按名称存储，register / register_remote / lookup / list_all
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: HashMap<String, RegisteredOperation>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册本地操作；同名覆盖
    pub fn register(&mut self, operation: impl Operation + 'static) {
        self.register_arc(Arc::new(operation));
    }

    pub fn register_arc(&mut self, operation: Arc<dyn Operation>) {
        let definition = OperationDefinition {
            name: operation.name().to_string(),
            description: operation.description().to_string(),
            location: ExecutionLocation::Local,
            inputs: operation.inputs(),
            metered: operation.metered(),
        };
        self.entries.insert(
            definition.name.clone(),
            RegisteredOperation {
                definition,
                body: Some(operation),
            },
        );
    }

    /// 登记远程操作（由 RemoteTransport 执行）
    pub fn register_remote(&mut self, definition: OperationDefinition) {
        let definition = OperationDefinition {
            location: ExecutionLocation::Remote,
            ..definition
        };
        self.entries.insert(
            definition.name.clone(),
            RegisteredOperation {
                definition,
                body: None,
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OperationRegistry for InMemoryRegistry {
    fn lookup(&self, name: &str) -> Option<RegisteredOperation> {
        self.entries.get(name).cloned()
    }

    /// 按名称排序，保证 Planner 每轮看到的目录稳定
    fn list_all(&self) -> Vec<OperationDefinition> {
        let mut defs: Vec<OperationDefinition> =
            self.entries.values().map(|e| e.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// 生成目录 JSON（拼入 Planner prompt）
pub fn catalog_json(definitions: &[OperationDefinition]) -> String {
    let items: Vec<Value> = definitions
        .iter()
        .map(|d| {
            serde_json::json!({
                "name": d.name,
                "description": d.description,
                "inputs": d.inputs,
            })
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::EchoOperation;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = InMemoryRegistry::new();
        registry.register(EchoOperation);
        let entry = registry.lookup("echo").expect("echo registered");
        assert_eq!(entry.definition.location, ExecutionLocation::Local);
        assert!(entry.body.is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_remote_entry_has_no_body() {
        let mut registry = InMemoryRegistry::new();
        registry.register_remote(OperationDefinition::remote("render", "render a scene"));
        let entry = registry.lookup("render").unwrap();
        assert_eq!(entry.definition.location, ExecutionLocation::Remote);
        assert!(entry.body.is_none());
    }

    #[test]
    fn test_list_all_sorted() {
        let mut registry = InMemoryRegistry::new();
        registry.register_remote(OperationDefinition::remote("zeta", ""));
        registry.register(EchoOperation);
        registry.register_remote(OperationDefinition::remote("alpha", ""));
        let names: Vec<String> = registry.list_all().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "echo", "zeta"]);
    }
}
