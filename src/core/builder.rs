//! 编排器构建器：由 AppConfig 统一装配 Registry、LLM/Planner、远程传输、预算守卫与调度器
//!
//! CLI 与测试共用同一套装配逻辑；各组件都可以用 with_* 替换。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{BudgetGuardian, Orchestrator, OrchestratorError, OrchestratorSettings};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::operations::{
    DiagnoseOperation, Dispatcher, EchoOperation, HttpTransport, InMemoryRegistry,
    OperationDefinition, OperationRegistry, ParamSpec, RemoteTransport, ScriptOperation,
    TaskCompleteOperation,
};
use crate::planner::{LlmPlanner, Planner};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "openai" && api_key.is_some() {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            api_key.as_deref(),
        ))
    } else {
        if provider != "mock" {
            tracing::warn!("No API key set or provider '{}' unknown, using Mock LLM", provider);
        }
        Arc::new(MockLlmClient)
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    registry: Option<Arc<dyn OperationRegistry>>,
    planner: Option<Arc<dyn Planner>>,
    transport: Option<Arc<dyn RemoteTransport>>,
    guardian: Option<Arc<BudgetGuardian>>,
    with_planner: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: None,
            planner: None,
            transport: None,
            guardian: None,
            with_planner: true,
        }
    }

    /// 替换默认 Registry
    pub fn with_registry(mut self, registry: Arc<dyn OperationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 替换默认（LLM）Planner
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// 只跑脚本任务时不装配 Planner
    pub fn without_planner(mut self) -> Self {
        self.with_planner = false;
        self.planner = None;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 与其他编排器共享预算守卫
    pub fn with_guardian(mut self, guardian: Arc<BudgetGuardian>) -> Self {
        self.guardian = Some(guardian);
        self
    }

    /// 构建默认 Registry：内置操作 + 配置中的脚本操作 + 远程操作定义
    pub fn build_registry(&self) -> InMemoryRegistry {
        let mut registry = InMemoryRegistry::new();
        registry.register(EchoOperation);
        registry.register(TaskCompleteOperation);
        registry.register(DiagnoseOperation);

        for entry in &self.config.operations.scripts {
            registry.register(ScriptOperation::new(entry));
        }

        for entry in &self.config.remote.operations {
            let inputs = entry
                .inputs
                .iter()
                .map(|name| ParamSpec::required(name.clone(), ""))
                .collect();
            registry.register_remote(
                OperationDefinition::remote(&entry.name, &entry.description).with_inputs(inputs),
            );
        }

        tracing::info!(operations = registry.len(), "registry built: {}", registry.names().join(", "));
        registry
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        create_llm_from_config(&self.config)
    }

    pub fn build_planner(&self) -> Arc<dyn Planner> {
        let mut planner = LlmPlanner::new(self.build_llm());
        if let Some(prompt) = &self.config.llm.system_prompt {
            planner = planner.with_system_prompt(prompt.clone());
        }
        Arc::new(planner)
    }

    /// 配置了 endpoint 时构建 HTTP 传输
    pub fn build_transport(&self) -> Result<Option<Arc<dyn RemoteTransport>>, OrchestratorError> {
        let Some(endpoint) = &self.config.remote.endpoint else {
            return Ok(None);
        };
        let transport = HttpTransport::new(endpoint.clone(), self.config.remote.timeout_secs)
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
        tracing::info!("remote transport: {}", endpoint);
        Ok(Some(Arc::new(transport)))
    }

    pub fn build(self) -> Result<Arc<Orchestrator>, OrchestratorError> {
        let guardian = match &self.guardian {
            Some(guardian) => guardian.clone(),
            None => Arc::new(BudgetGuardian::from_config(&self.config.budget)),
        };
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => Arc::new(self.build_registry()) as Arc<dyn OperationRegistry>,
        };
        let transport = match &self.transport {
            Some(transport) => Some(transport.clone()),
            None => self.build_transport()?,
        };
        let planner = match (&self.planner, self.with_planner) {
            (Some(planner), _) => Some(planner.clone()),
            (None, true) => Some(self.build_planner()),
            (None, false) => None,
        };

        let timeout = self
            .config
            .orchestrator
            .operation_timeout_secs
            .map(Duration::from_secs);
        let mut dispatcher = Dispatcher::new(registry, guardian.clone()).with_timeout(timeout);
        if let Some(transport) = transport {
            dispatcher = dispatcher.with_transport(transport);
        }

        let settings = OrchestratorSettings::from_config(&self.config.orchestrator);
        tracing::info!(
            max_iterations = settings.max_iterations,
            velocity_limit = self.config.budget.velocity_limit,
            window_secs = self.config.budget.window_secs,
            "orchestrator built"
        );
        Ok(Arc::new(Orchestrator::new(
            Arc::new(dispatcher),
            guardian,
            planner,
            settings,
        )))
    }
}
