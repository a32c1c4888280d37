//! 计划与任务模型
//!
//! Plan 由 Planner 生成（或重规划时整体替换），Task 只由 Controller 变更状态。
//! 不变量：同一时刻至多一个 Task 处于 Running。

use serde::{Deserialize, Serialize};

use crate::core::classifier::FailureKind;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待调度
    Pending,
    /// 正在执行
    Running,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 用户中止
    Aborted,
}

/// 计划状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

/// 计划中的一个任务：分配给某个角色的一段工作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 任务 ID（t1, t2, ...）
    pub id: String,
    /// 任务描述（要做什么）
    pub description: String,
    /// 分配给哪个角色
    pub assigned_role: String,
    pub status: TaskStatus,
    /// 执行结果摘要
    pub result_summary: Option<String>,
    /// 错误信息（如果失败）
    pub error: Option<String>,
    /// 失败分类（如果失败）
    pub failure_kind: Option<FailureKind>,
}

impl Task {
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
    }

    pub fn mark_completed(&mut self, summary: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.result_summary = Some(summary.into());
        self.error = None;
        self.failure_kind = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, kind: FailureKind) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.failure_kind = Some(kind);
    }

    pub fn mark_aborted(&mut self) {
        self.status = TaskStatus::Aborted;
        self.failure_kind = Some(FailureKind::UserAbort);
    }

    /// 重置为待调度（系统失败快速重试 / 反思要求重试时使用；角色与描述不变）
    pub fn reset_pending(&mut self) {
        self.status = TaskStatus::Pending;
        self.error = None;
        self.failure_kind = None;
    }
}

/// 一次目标求解的有序任务列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub status: PlanStatus,
    /// 当前执行中的任务 ID
    pub current_task_id: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Plan {
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            tasks: Vec::new(),
            status: PlanStatus::Running,
            current_task_id: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// 追加任务，ID 自动编号为 t1, t2, ...
    pub fn add_task(&mut self, description: impl Into<String>, assigned_role: impl Into<String>) -> &Task {
        let id = format!("t{}", self.tasks.len() + 1);
        self.tasks.push(Task {
            id,
            description: description.into(),
            assigned_role: assigned_role.into(),
            status: TaskStatus::Pending,
            result_summary: None,
            error: None,
            failure_kind: None,
        });
        self.touch();
        self.tasks.last().unwrap()
    }

    pub fn touch(&mut self) {
        self.updated_at_ms = chrono::Utc::now().timestamp_millis();
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// 当前执行中的任务
    pub fn current_task_mut(&mut self) -> Option<&mut Task> {
        let id = self.current_task_id.clone()?;
        self.task_mut(&id)
    }

    /// 按顺序取下一个待调度任务
    pub fn next_pending(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    pub fn running_task(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Running)
    }

    pub fn is_all_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    pub fn has_failed_task(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    pub fn first_failed_mut(&mut self) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.status == TaskStatus::Failed)
    }

    /// 最近一个已完成任务的结果摘要（反思上下文用）
    pub fn last_completed_summary(&self) -> Option<&str> {
        self.tasks
            .iter()
            .rev()
            .find(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.result_summary.as_deref())
    }

    /// 生成给 Reflector 的文本视图
    pub fn to_prompt(&self) -> String {
        let mut lines = vec!["## Tasks".to_string()];
        for t in &self.tasks {
            let mut line = format!(
                "- [{}] [{}] {} -> {}",
                status_label(t.status),
                t.id,
                t.description,
                t.assigned_role
            );
            if let Some(r) = &t.result_summary {
                line.push_str(&format!("\n  result: {}", r));
            }
            if let Some(e) = &t.error {
                line.push_str(&format!("\n  error: {}", e));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Aborted => "aborted",
    }
}
