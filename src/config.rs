//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CADENCE__*` 覆盖（双下划线表示嵌套，如 `CADENCE__BUDGET__VELOCITY_LIMIT=10`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSection,
    pub budget: BudgetSection,
    pub llm: LlmSection,
    pub remote: RemoteSection,
    pub operations: OperationsSection,
}

/// [orchestrator] 段：迭代上限、约定的终止/诊断操作名、历史截断长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 目标驱动任务的最大迭代次数（防止失控的成本与时间）
    pub max_iterations: usize,
    pub terminal_operation: String,
    pub diagnose_operation: String,
    /// 序列化历史时单个字符串字段的最大字符数
    pub history_field_chars: usize,
    /// 单次操作超时（秒）；未设置时内核不施加超时
    pub operation_timeout_secs: Option<u64>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            terminal_operation: crate::operations::TASK_COMPLETE.to_string(),
            diagnose_operation: crate::operations::DIAGNOSE.to_string(),
            history_field_chars: 400,
            operation_timeout_secs: None,
        }
    }
}

/// [budget] 段：滑动窗口内允许的调用数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub velocity_limit: usize,
    pub window_secs: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            velocity_limit: 30,
            window_secs: 60,
        }
    }
}

/// [llm] 段：Planner 后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 覆盖 Planner 的 system prompt
    pub system_prompt: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            system_prompt: None,
        }
    }
}

/// [remote] 段：远程执行服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    /// 由远程服务执行的操作名
    pub operations: Vec<RemoteOperationEntry>,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            operations: Vec::new(),
        }
    }
}

/// [[remote.operations]]：远程操作的定义
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOperationEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// [operations] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OperationsSection {
    pub scripts: Vec<ScriptEntry>,
}

/// [[operations.scripts]]：程序 + 参数模板构成的脚本操作
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 必填参数名
    #[serde(default)]
    pub inputs: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub metered: bool,
}

/// 从 config 目录加载配置，环境变量 CADENCE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CADENCE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CADENCE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_iterations, 25);
        assert_eq!(cfg.orchestrator.terminal_operation, "task_complete");
        assert_eq!(cfg.budget.velocity_limit, 30);
        assert!(cfg.orchestrator.operation_timeout_secs.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
max_iterations = 7

[budget]
velocity_limit = 5
window_secs = 10

[[operations.scripts]]
name = "list"
program = "ls"
args = ["{{{{dir}}}}"]
inputs = ["dir"]
"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.orchestrator.max_iterations, 7);
        assert_eq!(cfg.orchestrator.diagnose_operation, "diagnose");
        assert_eq!(cfg.budget.window_secs, 10);
        let list = cfg
            .operations
            .scripts
            .iter()
            .find(|s| s.name == "list")
            .unwrap();
        assert_eq!(list.args, vec!["{{dir}}"]);
    }
}
