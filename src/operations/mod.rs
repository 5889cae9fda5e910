//! 操作层：数据模型、注册表、本地操作体（闭包 / 脚本 / 内置）、远程传输与调度器

pub mod builtin;
pub mod dispatcher;
pub mod function;
pub mod registry;
pub mod remote;
pub mod script;
pub mod types;

pub use builtin::{
    DiagnoseOperation, EchoOperation, TaskCompleteOperation, DIAGNOSE, TASK_COMPLETE,
};
pub use dispatcher::Dispatcher;
pub use function::FnOperation;
pub use registry::{
    catalog_json, CompileFailure, InMemoryRegistry, Operation, OperationRegistry,
    RegisteredOperation,
};
pub use remote::{parse_remote_response, HttpTransport, RemoteTransport, TransportError};
pub use script::ScriptOperation;
pub use types::{
    ClassifiedError, ExecutionLocation, OperationCall, OperationDefinition, OutcomeRecord,
    ParamSpec, RuntimeCause,
};
