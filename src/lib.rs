//! Crew - Rust 多智能体编排核心
//!
//! 对一个用户目标协调一组可独立调用的「角色」：每一步决定下一个执行者，
//! 区分瞬时失败与语义失败，用有界重试与有界重规划保证流程必然终止，
//! 并把结果或人工升级交回外部调度方。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 计划/任务模型、编排状态、失败分类、事件、会话运行时
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **react**: Planner、Reflector、Controller 主循环
//! - **routing**: 请求优先门与确定性角色链
//! - **runner**: 角色执行契约（dispatch -> TaskOutcome）

pub mod config;
pub mod core;
pub mod llm;
pub mod react;
pub mod routing;
pub mod runner;

pub use crate::core::{OrchestrateError, OrchestrationState, SessionOutcome, SessionRuntime};
pub use crate::react::{Controller, Decision};
pub use crate::runner::{AgentRunner, TaskOutcome};
