//! 闭包操作：以宿主语言函数作为操作体（注册时解析的函数表）

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::operations::{CompileFailure, Operation, ParamSpec};

type BoxedBody = Arc<
    dyn Fn(Map<String, Value>) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>
        + Send
        + Sync,
>;

/// 闭包操作：宿主代码在注册时即已编译，compile 只校验必填参数
pub struct FnOperation {
    name: String,
    description: String,
    inputs: Vec<ParamSpec>,
    metered: bool,
    body: BoxedBody,
}

impl FnOperation {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, body: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            metered: false,
            body: Arc::new(move |args| Box::pin(body(args))),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<ParamSpec>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn metered(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn inputs(&self) -> Vec<ParamSpec> {
        self.inputs.clone()
    }

    fn metered(&self) -> bool {
        self.metered
    }

    fn compile(&self, arguments: &Map<String, Value>) -> Result<(), CompileFailure> {
        let missing: Vec<&str> = self
            .inputs
            .iter()
            .filter(|p| p.required && !arguments.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CompileFailure::new(format!(
                "missing required arguments: {}",
                missing.join(", ")
            )))
        }
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        (self.body)(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_operation_invokes_closure() {
        let op = FnOperation::new("double", "double a number", |args| async move {
            let n = args.get("n").and_then(|v| v.as_i64()).ok_or("n must be an integer")?;
            Ok(json!(n * 2))
        });
        let mut args = Map::new();
        args.insert("n".into(), json!(21));
        assert_eq!(op.invoke(args).await.unwrap(), json!(42));
    }

    #[test]
    fn test_fn_operation_missing_required_argument() {
        let op = FnOperation::new("greet", "greet", |_| async { Ok(json!("hi")) })
            .with_inputs(vec![ParamSpec::required("who", "name")]);
        let failure = op.compile(&Map::new()).unwrap_err();
        assert!(failure.message.contains("who"));
        assert!(failure.source_text.is_none());
        let mut args = Map::new();
        args.insert("who".into(), json!("ada"));
        assert!(op.compile(&args).is_ok());
    }
}
