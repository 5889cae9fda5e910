//! 远程执行传输：把 {name, arguments} 发给执行服务，取回 {result} 或 {error}
//!
//! 传输失败与非成功状态归为 Transport，响应体不可解析归为 MalformedResponse。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::operations::{OperationCall, RuntimeCause};

/// 远程调用失败
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse response: {0}")]
    MalformedResponse(String),

    #[error("remote operation failed: {0}")]
    Remote(String),
}

impl TransportError {
    /// 映射到 RuntimeError 的细分原因
    pub fn cause(&self) -> RuntimeCause {
        match self {
            Self::Transport(_) | Self::Status { .. } => RuntimeCause::Transport,
            Self::MalformedResponse(_) => RuntimeCause::MalformedResponse,
            Self::Remote(_) => RuntimeCause::Raised,
        }
    }
}

/// 远程执行传输接口
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn execute(&self, call: &OperationCall) -> Result<Value, TransportError>;
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// 解析执行服务的响应：非 2xx 为 Status，体不是 {result}/{error} 对象为 MalformedResponse
pub fn parse_remote_response(status: u16, body: &str) -> Result<Value, TransportError> {
    if !(200..300).contains(&status) {
        return Err(TransportError::Status {
            status,
            body: body.chars().take(500).collect(),
        });
    }
    let parsed: RemoteResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
    match parsed.error {
        Some(Value::Null) | None => Ok(parsed.result.unwrap_or(Value::Null)),
        Some(Value::String(msg)) => Err(TransportError::Remote(msg)),
        Some(other) => Err(TransportError::Remote(other.to_string())),
    }
}

/// HTTP 传输：POST JSON 到执行服务端点
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TransportError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn execute(&self, call: &OperationCall) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(call)
            .send()
            .await
            .map_err(|e| TransportError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Transport(e.to_string()))?;
        parse_remote_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_result() {
        let v = parse_remote_response(200, r#"{"result": {"ok": true}}"#).unwrap();
        assert_eq!(v, json!({"ok": true}));
    }

    #[test]
    fn test_parse_remote_error() {
        let err = parse_remote_response(200, r#"{"error": "boom"}"#).unwrap_err();
        assert!(matches!(err, TransportError::Remote(ref m) if m == "boom"));
        assert_eq!(err.cause(), RuntimeCause::Raised);
    }

    #[test]
    fn test_non_success_status_is_transport() {
        let err = parse_remote_response(503, "unavailable").unwrap_err();
        assert_eq!(err.cause(), RuntimeCause::Transport);
    }

    #[test]
    fn test_unparsable_body_is_malformed() {
        let err = parse_remote_response(200, "<html>").unwrap_err();
        assert_eq!(err.cause(), RuntimeCause::MalformedResponse);
        assert!(err.to_string().starts_with("could not parse response"));
    }
}
