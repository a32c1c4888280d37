//! Reflector：评估最近的执行结果，决定结束、重规划还是继续
//!
//! LLM 线上格式保留五种动作（continue/retry/replan/complete/fail），
//! 在解析时收敛为 Controller 需要的三种 NextAction。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::OrchestrateError;
use crate::core::plan::Plan;
use crate::llm::{LlmClient, Message};

/// 反思后的下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// 终结：计划按 is_complete() 定格为 completed 或 failed
    End,
    /// 丢弃当前计划，重新规划
    Replan,
    /// 重试失败任务或继续下一个任务
    RetryOrContinue,
}

/// 反思结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub summary: String,
    pub next_action: NextAction,
    /// 目标是否达成（End 时决定计划定格为成功还是失败）
    pub goal_achieved: bool,
    /// RetryOrContinue 时是否重试当前失败任务
    pub retry_current: bool,
}

impl Reflection {
    pub fn is_complete(&self) -> bool {
        self.goal_achieved
    }
}

/// 反思器：在计划推进不下去时被 Controller 咨询
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(
        &self,
        goal: &str,
        plan: &Plan,
        last_result_summary: &str,
    ) -> Result<Reflection, OrchestrateError>;
}

/// Reflector LLM 输出（线上五动作格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectorOutput {
    pub goal_achieved: bool,
    pub summary: String,
    pub next_action: ReflectorAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectorAction {
    Continue,
    Retry,
    Replan,
    Complete,
    Fail,
}

impl ReflectorOutput {
    /// 五动作收敛为三动作
    pub fn into_reflection(self) -> Reflection {
        let (next_action, retry_current) = match self.next_action {
            ReflectorAction::Complete | ReflectorAction::Fail => (NextAction::End, false),
            ReflectorAction::Replan => (NextAction::Replan, false),
            ReflectorAction::Retry => (NextAction::RetryOrContinue, true),
            ReflectorAction::Continue => (NextAction::RetryOrContinue, false),
        };
        // fail 时无论模型怎么说都不算达成
        let goal_achieved = self.goal_achieved && self.next_action != ReflectorAction::Fail;
        Reflection {
            summary: self.summary,
            next_action,
            goal_achieved,
            retry_current,
        }
    }
}

/// 解析 Reflector 输出
pub fn parse_reflector_output(output: &str) -> Result<Reflection, OrchestrateError> {
    let json = super::planner::extract_json_block(output)?;
    let parsed: ReflectorOutput = serde_json::from_str(json)
        .map_err(|e| OrchestrateError::JsonParseError(format!("{}: {}", e, json)))?;
    Ok(parsed.into_reflection())
}

const REFLECTOR_SYSTEM_PROMPT: &str = r#"## Role
You are a reflection agent that evaluates execution results and decides the next action.

## Rules
- Base decisions on observed results, not speculation.
- Focus on achieving the user goal, not completing every task.
- Retry for transient errors; replan for strategy issues.
- Fail fast if recovery is unlikely.

## Next Action Options
- continue: current task succeeded and there are remaining tasks.
- retry: current task failed but may be transient.
- replan: the plan needs adjustment.
- complete: the goal is achieved.
- fail: the goal cannot be achieved.

## Output (JSON)
```json
{
  "goal_achieved": false,
  "summary": "...",
  "next_action": "continue",
  "reason": "..."
}
```
Respond with that single JSON object and nothing else."#;

/// LLM 反思器
pub struct LlmReflector {
    llm: Arc<dyn LlmClient>,
}

impl LlmReflector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(
        &self,
        goal: &str,
        plan: &Plan,
        last_result_summary: &str,
    ) -> Result<Reflection, OrchestrateError> {
        let user = format!(
            "## User Goal\n{}\n\n{}\n\n## Latest Result\n{}",
            goal,
            plan.to_prompt(),
            last_result_summary
        );
        let messages = vec![Message::system(REFLECTOR_SYSTEM_PROMPT), Message::user(user)];
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(OrchestrateError::LlmError)?;

        let reflection = parse_reflector_output(&output)?;
        tracing::info!(
            next_action = ?reflection.next_action,
            goal_achieved = reflection.goal_achieved,
            "reflection done"
        );
        Ok(reflection)
    }
}
