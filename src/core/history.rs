//! 历史序列化：把 OutcomeRecord 列表压成 Planner / 诊断可读的 JSON
//!
//! 大字段（长代码体、长结果文本）截断，编译源码从不出现，控制 prompt 体积。

use serde_json::{json, Map, Value};

use crate::operations::OutcomeRecord;

const ELIDED_SUFFIX: &str = "...[truncated]";

/// 递归截断 JSON 中超长的字符串
pub fn elide_value(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            let head: String = s.chars().take(max_chars).collect();
            Value::String(format!("{}{}", head, ELIDED_SUFFIX))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| elide_value(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), elide_value(v, max_chars)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

/// 序列化历史：[{name, arguments, ok, result | error}]
pub fn serialize_history(records: &[OutcomeRecord], max_field_chars: usize) -> String {
    let items: Vec<Value> = records
        .iter()
        .map(|r| {
            let mut item = json!({
                "name": r.call.name,
                "arguments": elide_value(&Value::Object(r.call.arguments.clone()), max_field_chars),
                "ok": r.is_success(),
            });
            if let Some(result) = &r.result {
                item["result"] = elide_value(result, max_field_chars);
            }
            if let Some(err) = &r.error {
                item["error"] = elide_value(&Value::String(err.to_string()), max_field_chars);
            }
            item
        })
        .collect();
    serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{ClassifiedError, OperationCall};

    #[test]
    fn test_elide_long_strings_only() {
        let v = json!({"code": "x".repeat(50), "n": 3, "short": "ok"});
        let out = elide_value(&v, 10);
        assert_eq!(out["code"], format!("{}{}", "x".repeat(10), ELIDED_SUFFIX));
        assert_eq!(out["n"], 3);
        assert_eq!(out["short"], "ok");
    }

    #[test]
    fn test_serialize_history_hides_compile_source() {
        let records = vec![
            OutcomeRecord::success(
                OperationCall::new("write", json!({"body": "y".repeat(100)})),
                None,
                json!("done"),
                1,
            ),
            OutcomeRecord::failure(
                OperationCall::bare("render"),
                None,
                ClassifiedError::Compilation {
                    operation: "render".into(),
                    message: "bad body".into(),
                    source_text: Some("SECRET_SOURCE".into()),
                },
                0,
            ),
        ];
        let text = serialize_history(&records, 20);
        assert!(!text.contains("SECRET_SOURCE"));
        assert!(text.contains(ELIDED_SUFFIX));
        let parsed: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["ok"], true);
        assert_eq!(parsed[1]["ok"], false);
    }
}
