//! 编排状态
//!
//! 一个会话的全部编排状态。每一步结束后都可整体序列化，交给外部
//! checkpoint 存储持久化并原样恢复——这里不允许出现只活在内存里的字段。
//!
//! 所有权约定：routing 与 counters 只由 Controller 写；pending_requests 的
//! 内容由 Agent（经调度方）写入，Controller 只出队；reports 由调度方在收到
//! 角色汇报时写入。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::classifier::FailureKind;
use crate::core::plan::{Plan, TaskStatus};

/// 路由侧状态：当前激活角色与最近一次结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingState {
    pub active_role: Option<String>,
    pub last_outcome: Option<TaskStatus>,
    pub last_error: Option<String>,
    pub last_failure_kind: Option<FailureKind>,
}

impl RoutingState {
    pub fn clear_active(&mut self) {
        self.active_role = None;
    }
}

/// 有界计数器：终止性保证的载体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    /// 系统失败快速重试计数（任务完成时归零）
    pub error_retry_count: u32,
    /// 重规划计数（跨 step 累计，超限强制终结）
    pub replan_count: u32,
}

/// 协作请求类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// 人机交互：中断性质，优先于一切计划推进
    Human,
    /// 角色间委派
    Delegate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Consumed,
    /// 目标角色未知等原因被拒绝（保留在队列里便于排查，但不再参与决策）
    Rejected,
}

/// 协作请求：由 Agent 在执行中发起，经调度方写入 pending_requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub kind: RequestKind,
    pub target_role: Option<String>,
    pub payload: serde_json::Value,
    pub status: RequestStatus,
    pub created_by: Option<String>,
}

impl Request {
    pub fn human(payload: serde_json::Value, created_by: impl Into<String>) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            kind: RequestKind::Human,
            target_role: None,
            payload,
            status: RequestStatus::Pending,
            created_by: Some(created_by.into()),
        }
    }

    pub fn delegate(
        target_role: impl Into<String>,
        payload: serde_json::Value,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().simple()),
            kind: RequestKind::Delegate,
            target_role: Some(target_role.into()),
            payload,
            status: RequestStatus::Pending,
            created_by: Some(created_by.into()),
        }
    }
}

/// 角色汇报状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    InProgress,
    Blocked,
    Failed,
    NeedsClarification,
    NeedsDelegation,
    Waiting,
}

/// 角色最近一次的自我汇报；确定性策略除命名门禁外只看这个
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub status: ReportStatus,
    /// 一句话总结（如：需求分析完成，识别出 3 个业务步骤）
    pub summary: String,
    pub blocked_reason: Option<String>,
    /// 建议下一步（如：可以交给架构师了）
    pub next_suggestion: Option<String>,
}

impl AgentReport {
    pub fn completed(summary: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Completed,
            summary: summary.into(),
            blocked_reason: None,
            next_suggestion: None,
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            summary: summary.into(),
            blocked_reason: None,
            next_suggestion: None,
        }
    }
}

/// 一个会话的编排状态（Controller 与外部调度方共同持有）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub session_id: String,
    /// 用户目标
    pub goal: String,
    pub plan: Option<Plan>,
    pub routing: RoutingState,
    pub counters: Counters,
    pub pending_requests: Vec<Request>,
    /// 角色 -> 最近汇报
    pub reports: BTreeMap<String, AgentReport>,
    /// 命名布尔门禁（如 design_review_passed），由门禁所属角色置位
    pub gates: BTreeMap<String, bool>,
}

impl OrchestrationState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            session_id: format!("s_{}", uuid::Uuid::new_v4().simple()),
            goal: goal.into(),
            plan: None,
            routing: RoutingState::default(),
            counters: Counters::default(),
            pending_requests: Vec::new(),
            reports: BTreeMap::new(),
            gates: BTreeMap::new(),
        }
    }

    pub fn gate_passed(&self, name: &str) -> bool {
        self.gates.get(name).copied().unwrap_or(false)
    }

    /// 最近一次执行结果摘要（反思上下文）
    pub fn last_result_summary(&self) -> String {
        if let Some(err) = &self.routing.last_error {
            return format!("last error: {}", err);
        }
        if let Some(summary) = self.plan.as_ref().and_then(|p| p.last_completed_summary()) {
            return summary.to_string();
        }
        "no result yet".to_string()
    }
}
