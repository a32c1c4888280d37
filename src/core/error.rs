//! 编排错误类型
//!
//! 库内统一使用 OrchestrateError（thiserror）；演示程序边界用 anyhow 包装。

use thiserror::Error;

/// 编排过程中可能出现的错误（Oracle 调用、输出解析、配置等）
#[derive(Error, Debug)]
pub enum OrchestrateError {
    #[error("Planner failed: {0}")]
    PlannerFailed(String),

    #[error("Reflector failed: {0}")]
    ReflectorFailed(String),

    /// Planner 返回了空任务列表，无法推进
    #[error("Planner produced an empty plan")]
    EmptyPlan,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 调度方违反了协议（如同一会话并发调用 step）
    #[error("Scheduler contract violation: {0}")]
    ContractViolation(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
