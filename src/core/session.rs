//! 会话运行时：命令式外壳
//!
//! Controller 是纯决策函数；真正的派发、黑板写入（汇报、协作请求）
//! 都发生在这里。run 交替执行「step -> dispatch -> 回灌结果」，直到
//! 流程终结或需要人工介入，把控制权交还给嵌入方。
//!
//! 同一会话的 state 只能由一个 SessionRuntime 顺序驱动；并发跑多个会话
//! 时各自持有自己的 state，互不共享。

use std::sync::Arc;

use serde_json::Value;

use crate::core::error::OrchestrateError;
use crate::core::plan::PlanStatus;
use crate::core::state::{AgentReport, OrchestrationState, ReportStatus, Request};
use crate::react::{Controller, Decision};
use crate::runner::{AgentRunner, TaskOutcome};

/// 一段连续推进的结束方式
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Finished {
        status: PlanStatus,
        error: Option<String>,
    },
    /// 需要人工介入；嵌入方处理完后可再次调用 run 继续
    NeedsHuman { request_id: String, payload: Value },
}

/// 单次连续推进的步数上限，防止链路由与汇报互相扯皮时空转
const MAX_SESSION_STEPS: usize = 64;

/// 会话运行时
pub struct SessionRuntime {
    controller: Controller,
    runner: Arc<dyn AgentRunner>,
    max_steps: usize,
}

impl SessionRuntime {
    pub fn new(controller: Controller, runner: Arc<dyn AgentRunner>) -> Self {
        Self {
            controller,
            runner,
            max_steps: MAX_SESSION_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// 连续推进直到终结或需要人工
    pub async fn run(
        &self,
        state: &mut OrchestrationState,
    ) -> Result<SessionOutcome, OrchestrateError> {
        let mut outcome: Option<TaskOutcome> = None;

        for _ in 0..self.max_steps {
            let decision = self.controller.step(state, outcome.take()).await?;
            match decision {
                Decision::Dispatch {
                    role, instruction, ..
                } => {
                    let result = self.runner.dispatch(&role, &instruction).await;
                    self.record(state, &role, &result);
                    outcome = Some(result);
                }
                Decision::AskHuman {
                    request_id,
                    payload,
                } => {
                    return Ok(SessionOutcome::NeedsHuman {
                        request_id,
                        payload,
                    });
                }
                Decision::Finalize { status, error } => {
                    return Ok(SessionOutcome::Finished { status, error });
                }
            }
        }

        tracing::error!(max_steps = self.max_steps, "session step limit reached");
        Ok(SessionOutcome::Finished {
            status: PlanStatus::Failed,
            error: Some(format!("session step limit reached ({})", self.max_steps)),
        })
    }

    /// 黑板写入：汇报与协作请求（Controller 从不自己创建请求）
    fn record(&self, state: &mut OrchestrationState, role: &str, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed { summary } => {
                state
                    .reports
                    .insert(role.to_string(), AgentReport::completed(summary.clone()));
            }
            TaskOutcome::Failed { error, .. } => {
                state
                    .reports
                    .insert(role.to_string(), AgentReport::failed(error.clone()));
            }
            TaskOutcome::NeedsHuman { questions } => {
                state.reports.insert(
                    role.to_string(),
                    AgentReport {
                        status: ReportStatus::NeedsClarification,
                        summary: "waiting for clarification".to_string(),
                        blocked_reason: None,
                        next_suggestion: None,
                    },
                );
                state.pending_requests.push(Request::human(
                    serde_json::json!({ "questions": questions }),
                    role,
                ));
            }
            TaskOutcome::Delegate {
                target_role,
                payload,
            } => {
                state.reports.insert(
                    role.to_string(),
                    AgentReport {
                        status: ReportStatus::NeedsDelegation,
                        summary: format!("delegating to {}", target_role),
                        blocked_reason: None,
                        next_suggestion: Some(target_role.clone()),
                    },
                );
                state
                    .pending_requests
                    .push(Request::delegate(target_role.clone(), payload.clone(), role));
            }
            TaskOutcome::Cancelled => {}
        }
    }
}
