//! Mock LLM 客户端（用于测试与无 Key 演示）
//!
//! 根据 system prompt 中的输出 schema 判断调用方是 Planner 还是 Reflector，
//! 返回对应形状的固定 JSON，便于本地跑通完整编排流程。

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：返回固定形状的规划 / 反思 JSON
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = messages
            .iter()
            .find(|m| matches!(m.role, Role::System))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        if system.contains("next_action") {
            // Reflector 形状：目标达成，结束
            return Ok(r#"{
  "goal_achieved": true,
  "summary": "Mock reflection: goal achieved",
  "next_action": "complete",
  "reason": "mock"
}"#
            .to_string());
        }

        // Planner 形状：单任务计划，分配给 analyst
        Ok(r#"{
  "understanding": "Mock understanding of the goal",
  "tasks": [
    {"description": "Mock analysis of the goal", "assigned_role": "analyst"}
  ]
}"#
        .to_string())
    }
}
