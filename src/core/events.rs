//! 编排过程事件
//!
//! 每个状态迁移对外发出一条离散、有序的事件，供日志或前端流式展示。
//! Controller 只负责发出；投递到哪种传输由嵌入方决定。

use serde::Serialize;

use crate::core::classifier::FailureKind;
use crate::core::plan::PlanStatus;
use crate::react::reflector::NextAction;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// 计划生成完毕
    PlanCreated { task_count: usize },
    /// 任务派发给角色
    TaskDispatched { task_id: String, role: String },
    TaskCompleted { task_id: String },
    TaskFailed {
        task_id: String,
        kind: FailureKind,
        error: String,
    },
    /// 系统失败快速重试（attempt 从 1 计）
    TaskRetried {
        task_id: String,
        attempt: u32,
        max: u32,
    },
    /// 进入反思
    ReflectionStarted,
    ReflectionDone { next_action: NextAction },
    /// 触发重规划（count 为累计次数）
    ReplanTriggered { count: u32, max: u32 },
    /// 人机请求被提升为决策
    HumanRequested { request_id: String },
    /// 委派请求被路由
    DelegateRouted { role: String },
    /// 确定性链给出的计划外路由
    RoleRouted { role: String },
    /// 流程终结
    Finalized {
        status: PlanStatus,
        error: Option<String>,
    },
}

/// 发送事件；无人订阅时静默丢弃
pub(crate) fn send_event(
    tx: &Option<tokio::sync::mpsc::UnboundedSender<OrchestrationEvent>>,
    ev: OrchestrationEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
