//! 脚本文件：TOML 格式的目标 + 固定步骤列表
//!
//! ```toml
//! goal = "greet twice"
//!
//! [[steps]]
//! name = "echo"
//! arguments = { text = "hello" }
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::operations::OperationCall;

/// 解析后的脚本文件
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFile {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<OperationCall>,
}

impl ScriptFile {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let script: ScriptFile = toml::from_str(text).context("invalid script file")?;
        if let Some(step) = script.steps.iter().position(|s| s.name.trim().is_empty()) {
            bail!("step {} has an empty operation name", step);
        }
        Ok(script)
    }
}

/// 读取并解析脚本文件
pub fn load_script(path: &Path) -> anyhow::Result<ScriptFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    ScriptFile::parse(&text).with_context(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
goal = "greet twice"

[[steps]]
name = "echo"
arguments = {{ text = "hello" }}

[[steps]]
name = "task_complete"
"#
        )
        .unwrap();

        let script = load_script(file.path()).unwrap();
        assert_eq!(script.goal, "greet twice");
        assert_eq!(script.steps.len(), 2);
        assert_eq!(script.steps[0].arguments["text"], "hello");
        assert!(script.steps[1].arguments.is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = ScriptFile::parse("goal = \"x\"\n[[steps]]\nname = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("empty operation name"));
    }

    #[test]
    fn test_missing_file() {
        assert!(load_script(Path::new("/definitely/not/here.toml")).is_err());
    }
}
