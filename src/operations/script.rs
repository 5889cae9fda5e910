//! 脚本操作：由配置 [[operations.scripts]] 注册，运行「程序 + 参数模板」作为可动态编写的操作体
//!
//! 参数模板中 {{workspace}} 替换为工作目录，{{key}} 从调用 arguments 中取值；
//! 模板里仍有未解析的占位符即为 CompilationError（附带模板源码），执行失败为 RuntimeError。
//! 执行时无 shell，直接 exec program + 替换后的参数。

use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::config::ScriptEntry;
use crate::operations::{CompileFailure, Operation, ParamSpec};

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap())
}

/// 从配置项构建的脚本操作
pub struct ScriptOperation {
    name: String,
    description: String,
    program: String,
    args_template: Vec<String>,
    inputs: Vec<ParamSpec>,
    working_dir: Option<PathBuf>,
    metered: bool,
}

impl ScriptOperation {
    pub fn new(entry: &ScriptEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            program: entry.program.clone(),
            args_template: entry.args.clone(),
            inputs: entry
                .inputs
                .iter()
                .map(|n| ParamSpec::required(n.clone(), ""))
                .collect(),
            working_dir: entry.working_dir.clone(),
            metered: entry.metered,
        }
    }

    /// 操作体源码（program + 参数模板），编译失败时附带
    pub fn source(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args_template.iter().cloned());
        parts.join(" ")
    }

    /// 替换模板中的 {{workspace}} 和 {{key}}；返回替换后的参数或首个未解析占位符
    fn substitute(&self, arguments: &Map<String, Value>) -> Result<Vec<String>, String> {
        let workspace = self
            .working_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());
        let re = placeholder_re();
        let mut out = Vec::with_capacity(self.args_template.len());
        for tpl in &self.args_template {
            let mut unresolved: Option<String> = None;
            let replaced = re.replace_all(tpl, |caps: &regex::Captures| {
                let key = &caps[1];
                if key == "workspace" {
                    if let Some(ws) = &workspace {
                        return ws.clone();
                    }
                }
                match arguments.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => {
                        unresolved.get_or_insert_with(|| key.to_string());
                        caps[0].to_string()
                    }
                }
            });
            if let Some(key) = unresolved {
                return Err(key);
            }
            out.push(replaced.into_owned());
        }
        Ok(out)
    }
}

#[async_trait]
impl Operation for ScriptOperation {
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
        if self.program.trim().is_empty() {
            return Err(CompileFailure::new("script has no program").with_source(self.source()));
        }
        self.substitute(arguments).map(|_| ()).map_err(|key| {
            CompileFailure::new(format!("unresolved placeholder '{{{{{key}}}}}'"))
                .with_source(self.source())
        })
    }

    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value, String> {
        let args = self
            .substitute(&arguments)
            .map_err(|key| format!("unresolved placeholder '{key}'"))?;
        tracing::info!(operation = %self.name, program = %self.program, "script operation invoke");
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let output = command
            .spawn()
            .map_err(|e| format!("script spawn failed: {}", e))?
            .wait_with_output()
            .await
            .map_err(|e| format!("script wait failed: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        let stdout = stdout.trim();
        // 输出是 JSON 就按结构化结果返回
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}
