//! Planner：把用户目标拆成分配给已知角色的有序任务列表
//!
//! Controller 只依赖 Planner trait；LlmPlanner 调用 LLM 并从文本中提取 JSON
//! 解析为计划。Oracle 输出不被信任：空任务列表在这里报错，未知角色名
//! 由 Controller 在派发时按业务失败处理。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::OrchestrateError;
use crate::core::plan::Plan;
use crate::core::roster::RoleRoster;
use crate::llm::{LlmClient, Message};

/// 规划器：首次求解时产出 Plan，反思要求重规划时整体替换
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, goal: &str, roster: &RoleRoster) -> Result<Plan, OrchestrateError>;

    /// 带上一版计划与反思摘要的重规划；默认退化为重新规划
    async fn replan(
        &self,
        goal: &str,
        _prev_plan: &Plan,
        _reflection_summary: &str,
        roster: &RoleRoster,
    ) -> Result<Plan, OrchestrateError> {
        self.create_plan(goal, roster).await
    }
}

/// Planner LLM 输出的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTaskOutput {
    pub description: String,
    pub assigned_role: String,
}

/// Planner LLM 输出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOutput {
    pub understanding: String,
    pub tasks: Vec<PlanTaskOutput>,
}

/// 从 LLM 文本中提取 JSON 块（```json ... ``` 或首尾大括号之间）
pub(crate) fn extract_json_block(output: &str) -> Result<&str, OrchestrateError> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Ok(rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or_else(|| rest.trim()));
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&trimmed[start..=end]),
        _ => Err(OrchestrateError::JsonParseError(format!(
            "no JSON object in output: {}",
            trimmed
        ))),
    }
}

/// 解析 Planner 输出并构建 Plan
pub fn parse_planner_output(output: &str) -> Result<Plan, OrchestrateError> {
    let json = extract_json_block(output)?;
    let parsed: PlannerOutput = serde_json::from_str(json)
        .map_err(|e| OrchestrateError::JsonParseError(format!("{}: {}", e, json)))?;

    if parsed.tasks.is_empty() {
        return Err(OrchestrateError::EmptyPlan);
    }

    let mut plan = Plan::new();
    for task in parsed.tasks {
        plan.add_task(task.description, task.assigned_role);
    }
    Ok(plan)
}

const PLANNER_SYSTEM_PROMPT: &str = r#"## Role
You are a planning agent. Break the user goal into an ordered list of tasks,
each assigned to one of the available roles.

## Rules
- Only use roles from the available list; never invent a role.
- Order tasks by dependency: earlier tasks produce what later tasks need.
- Keep the list minimal; do not pad with ceremony tasks.

## Output (JSON)
```json
{
  "understanding": "...",
  "tasks": [
    {"description": "...", "assigned_role": "..."}
  ]
}
```
Respond with that single JSON object and nothing else."#;

/// LLM 规划器
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    async fn plan_with_context(
        &self,
        goal: &str,
        roster: &RoleRoster,
        extra_context: Option<String>,
    ) -> Result<Plan, OrchestrateError> {
        let mut user = format!("## Goal\n{}\n\n## Available Roles\n{}", goal, roster.to_prompt());
        if let Some(extra) = extra_context {
            user.push_str("\n\n");
            user.push_str(&extra);
        }

        let messages = vec![Message::system(PLANNER_SYSTEM_PROMPT), Message::user(user)];
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(OrchestrateError::LlmError)?;

        let plan = parse_planner_output(&output)?;
        tracing::info!(task_count = plan.tasks.len(), "planner produced a plan");
        Ok(plan)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn create_plan(&self, goal: &str, roster: &RoleRoster) -> Result<Plan, OrchestrateError> {
        self.plan_with_context(goal, roster, None).await
    }

    async fn replan(
        &self,
        goal: &str,
        prev_plan: &Plan,
        reflection_summary: &str,
        roster: &RoleRoster,
    ) -> Result<Plan, OrchestrateError> {
        let context = format!(
            "## Previous Plan (discarded)\n{}\n\n## Why it failed\n{}",
            prev_plan.to_prompt(),
            reflection_summary
        );
        self.plan_with_context(goal, roster, Some(context)).await
    }
}
