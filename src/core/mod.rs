//! 核心编排层：预算守卫、状态与历史、周期调度器、单步调试器、诊断移交、事件与构建器

pub mod builder;
pub mod debugger;
pub mod error;
pub mod events;
pub mod guardian;
pub mod history;
pub mod orchestrator;
pub mod recovery;
pub mod script;
pub mod state;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{DebuggerError, OrchestratorError};
pub use events::OrchestratorEvent;
pub use guardian::{BudgetExceeded, BudgetGuardian};
pub use history::{elide_value, serialize_history};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use recovery::{DiagnosticContext, DiagnosticHandoff};
pub use script::{load_script, ScriptFile};
pub use state::{
    ExecutionState, HaltReason, OrchestratorStatus, RunSnapshot, RunToken, StepStatus,
    TaskDescriptor,
};
