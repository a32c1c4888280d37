//! Agent 执行契约
//!
//! Controller 只依赖 dispatch(role, instruction) -> TaskOutcome 这一契约，
//! 不关心角色背后是 LLM、子图还是外部服务。实际调度由外部调度方（SessionRuntime
//! 或嵌入方自己的循环）完成，结果在下一次 step 时回灌给 Controller。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 一次调度的结果，由调度方回灌给 Controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// 正常完成
    Completed { summary: String },
    /// 失败；transient 标记该失败是否来自执行基座（超时、网络等）
    Failed { error: String, transient: bool },
    /// 外部注入的取消（调度方在下一次 step 时上报，不打断当前步）
    Cancelled,
    /// 角色需要向人类澄清
    NeedsHuman { questions: Vec<String> },
    /// 角色要求移交给另一个角色
    Delegate {
        target_role: String,
        payload: serde_json::Value,
    },
}

/// 角色执行器：把一段指令派发给某个角色并等待其结果
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn dispatch(&self, role: &str, instruction: &str) -> TaskOutcome;
}
