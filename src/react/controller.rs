//! Controller：单会话决策主循环
//!
//! 每次 step 处理一个 (OrchestrationState, outcome) 对并返回一个决策：
//! 派发某个角色、请求人工、或终结。顺序固定：
//! 请求优先门 -> 结算上一次结果 -> 确定性角色链 -> Oracle（规划/反思）。
//!
//! 不变量：每个分支要么返回决策，要么严格递增一个有界计数器
//! （error_retry_count / replan_count），因此任意 outcome 序列下
//! step 调用次数有界，结构上不可能死循环。
//!
//! Controller 自身不挂起：Oracle 调用在 step 边界内 await，真正的
//! 长耗时派发由外部调度方完成；同一会话的连续 step 由调度方串行化。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::classifier::{classify, FailureKind};
use crate::core::error::OrchestrateError;
use crate::core::events::{send_event, OrchestrationEvent};
use crate::core::plan::{PlanStatus, TaskStatus};
use crate::core::roster::RoleRoster;
use crate::core::state::OrchestrationState;
use crate::react::planner::Planner;
use crate::react::reflector::{NextAction, Reflector};
use crate::routing::{take_priority_request, ChainDecision, PriorityDecision, RoleChain};
use crate::runner::TaskOutcome;

/// 单步决策，交回外部调度方执行
#[derive(Debug, Clone)]
pub enum Decision {
    /// 派发角色执行；task_id 为 None 表示计划外派发（委派或链路由）
    Dispatch {
        role: String,
        task_id: Option<String>,
        instruction: String,
    },
    /// 升级给人类
    AskHuman { request_id: String, payload: Value },
    /// 流程终结
    Finalize {
        status: PlanStatus,
        error: Option<String>,
    },
}

/// 非最终任务业务失败后的推进策略（见 DESIGN.md）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessFailurePolicy {
    /// 保守默认：停止派发剩余任务，进入反思
    HaltAndReflect,
    /// 跳过失败任务继续派发，无任务可派时才反思
    SkipAndContinue,
}

/// Controller 行为参数
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// 系统失败快速重试上限
    pub max_error_retries: u32,
    /// 重规划次数上限
    pub max_replan_depth: u32,
    pub business_failure: BusinessFailurePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_error_retries: 3,
            max_replan_depth: 5,
            business_failure: BusinessFailurePolicy::HaltAndReflect,
        }
    }
}

/// 计划内派发尝试的结果
enum DispatchAttempt {
    Dispatched(Decision),
    /// Oracle 给出的角色不在名册里，任务已按业务失败记账
    UnknownRole,
    NoPending,
}

/// 决策主循环
pub struct Controller {
    planner: Arc<dyn Planner>,
    reflector: Arc<dyn Reflector>,
    roster: RoleRoster,
    chain: Option<RoleChain>,
    config: ControllerConfig,
    event_tx: Option<UnboundedSender<OrchestrationEvent>>,
}

impl Controller {
    pub fn new(
        planner: Arc<dyn Planner>,
        reflector: Arc<dyn Reflector>,
        roster: RoleRoster,
    ) -> Self {
        Self {
            planner,
            reflector,
            roster,
            chain: None,
            config: ControllerConfig::default(),
            event_tx: None,
        }
    }

    /// 设置确定性角色链（未设置时全部决策走 Oracle）
    pub fn with_chain(mut self, chain: RoleChain) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<OrchestrationEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 处理一步：outcome 为上一次派发的结果（首次调用或中断恢复时为 None）
    pub async fn step(
        &self,
        state: &mut OrchestrationState,
        outcome: Option<TaskOutcome>,
    ) -> Result<Decision, OrchestrateError> {
        // 1. 请求优先门：有决策则本步不再做任何其它事
        if let Some(decision) = take_priority_request(&mut state.pending_requests, &self.roster) {
            return Ok(self.apply_priority(state, decision));
        }

        // 2. 结算上一次派发的结果
        if let Some(outcome) = outcome {
            if let Some(decision) = self.settle_outcome(state, outcome) {
                return Ok(decision);
            }
        } else if let Some(task) = state.plan.as_ref().and_then(|p| p.running_task()) {
            // 无结果但有进行中任务：上一次派发被中断（如人工请求抢占），重新下发同一任务
            let (role, task_id, instruction) = (
                task.assigned_role.clone(),
                task.id.clone(),
                task.description.clone(),
            );
            state.routing.active_role = Some(role.clone());
            return Ok(Decision::Dispatch {
                role,
                task_id: Some(task_id),
                instruction,
            });
        }

        // 3. 确定性角色链
        if let Some(decision) = self.consult_chain(state) {
            return Ok(decision);
        }

        // 4/5. Oracle 路径：规划、派发、反思
        self.advance_plan(state).await
    }

    fn apply_priority(
        &self,
        state: &mut OrchestrationState,
        decision: PriorityDecision,
    ) -> Decision {
        match decision {
            PriorityDecision::AskHuman {
                request_id,
                payload,
            } => {
                tracing::info!(request_id = %request_id, "human request pre-empts the plan");
                state.routing.clear_active();
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::HumanRequested {
                        request_id: request_id.clone(),
                    },
                );
                Decision::AskHuman {
                    request_id,
                    payload,
                }
            }
            PriorityDecision::Route { role, payload } => {
                tracing::info!(role = %role, "delegate request routed");
                state.routing.active_role = Some(role.clone());
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::DelegateRouted { role: role.clone() },
                );
                let instruction = payload
                    .get("instruction")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| state.goal.clone());
                Decision::Dispatch {
                    role,
                    task_id: None,
                    instruction,
                }
            }
        }
    }

    /// 按失败分类结算结果；返回 Some 表示本步决策已定
    fn settle_outcome(
        &self,
        state: &mut OrchestrationState,
        outcome: TaskOutcome,
    ) -> Option<Decision> {
        // 结果归属：抢占（委派/链路由）后的计划外派发不能记到计划任务头上，
        // 用派发时写入的 active_role 与当前任务的角色比对来区分
        let settled_role = state.routing.active_role.clone();
        let plan_task_settled = state
            .plan
            .as_ref()
            .and_then(|p| p.running_task())
            .map(|t| settled_role.as_deref() == Some(t.assigned_role.as_str()))
            .unwrap_or(false);

        match classify(&outcome) {
            None => {
                match outcome {
                    TaskOutcome::Completed { summary } => {
                        if let Some(plan) = state.plan.as_mut() {
                            if let Some(task) = plan.current_task_mut() {
                                if task.status == TaskStatus::Running {
                                    if plan_task_settled {
                                        task.mark_completed(summary.clone());
                                        let task_id = task.id.clone();
                                        plan.current_task_id = None;
                                        plan.touch();
                                        send_event(
                                            &self.event_tx,
                                            OrchestrationEvent::TaskCompleted { task_id },
                                        );
                                    } else {
                                        // 任务的原派发被抢占过，回到待调度重新派发
                                        task.reset_pending();
                                        plan.current_task_id = None;
                                        plan.touch();
                                    }
                                }
                            }
                        }
                        state.counters.error_retry_count = 0;
                        state.routing.last_outcome = Some(TaskStatus::Completed);
                        state.routing.last_error = None;
                        state.routing.last_failure_kind = None;
                        state.routing.clear_active();
                    }
                    TaskOutcome::NeedsHuman { .. } | TaskOutcome::Delegate { .. } => {
                        // 协作请求本身已由调度方写入 pending_requests；
                        // 任务没有完成，回到待调度，等请求处理完再重派
                        if let Some(plan) = state.plan.as_mut() {
                            if let Some(task) = plan.current_task_mut() {
                                if task.status == TaskStatus::Running {
                                    task.reset_pending();
                                }
                            }
                            plan.current_task_id = None;
                        }
                        state.routing.clear_active();
                    }
                    _ => {}
                }
                None
            }
            Some(FailureKind::UserAbort) => {
                if let Some(plan) = state.plan.as_mut() {
                    if let Some(task) = plan.current_task_mut() {
                        task.mark_aborted();
                    }
                    plan.status = PlanStatus::Aborted;
                    plan.touch();
                }
                state.routing.last_outcome = Some(TaskStatus::Aborted);
                state.routing.last_failure_kind = Some(FailureKind::UserAbort);
                state.routing.clear_active();
                tracing::info!("session aborted by user");
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::Finalized {
                        status: PlanStatus::Aborted,
                        error: None,
                    },
                );
                Some(Decision::Finalize {
                    status: PlanStatus::Aborted,
                    error: None,
                })
            }
            Some(FailureKind::System) => {
                let error = outcome_error(&outcome);
                state.routing.last_outcome = Some(TaskStatus::Failed);
                state.routing.last_error = Some(error.clone());
                state.routing.last_failure_kind = Some(FailureKind::System);

                if state.counters.error_retry_count < self.config.max_error_retries {
                    state.counters.error_retry_count += 1;
                    let attempt = state.counters.error_retry_count;
                    tracing::warn!(
                        attempt,
                        max = self.config.max_error_retries,
                        error = %error,
                        "system failure, fast retry"
                    );
                    // 同角色同描述原样重派
                    if let Some(plan) = state.plan.as_mut() {
                        if let Some(task) = plan.current_task_mut() {
                            if task.status == TaskStatus::Running && plan_task_settled {
                                send_event(
                                    &self.event_tx,
                                    OrchestrationEvent::TaskRetried {
                                        task_id: task.id.clone(),
                                        attempt,
                                        max: self.config.max_error_retries,
                                    },
                                );
                                return Some(Decision::Dispatch {
                                    role: task.assigned_role.clone(),
                                    task_id: Some(task.id.clone()),
                                    instruction: task.description.clone(),
                                });
                            }
                        }
                    }
                    // 计划外派发（委派/链路由）的瞬时失败：按上次激活角色重派
                    if let Some(role) = state.routing.active_role.clone() {
                        return Some(Decision::Dispatch {
                            role,
                            task_id: None,
                            instruction: state.goal.clone(),
                        });
                    }
                    None
                } else {
                    let message = format!(
                        "system failure after {} retries: {}",
                        self.config.max_error_retries, error
                    );
                    tracing::error!(error = %error, "retry budget exhausted");
                    if let Some(plan) = state.plan.as_mut() {
                        if let Some(task) = plan.current_task_mut() {
                            if plan_task_settled {
                                task.mark_failed(message.clone(), FailureKind::System);
                                send_event(
                                    &self.event_tx,
                                    OrchestrationEvent::TaskFailed {
                                        task_id: task.id.clone(),
                                        kind: FailureKind::System,
                                        error: message.clone(),
                                    },
                                );
                            }
                        }
                        plan.status = PlanStatus::Failed;
                        plan.touch();
                    }
                    state.counters.error_retry_count = 0;
                    state.routing.clear_active();
                    send_event(
                        &self.event_tx,
                        OrchestrationEvent::Finalized {
                            status: PlanStatus::Failed,
                            error: Some(message.clone()),
                        },
                    );
                    Some(Decision::Finalize {
                        status: PlanStatus::Failed,
                        error: Some(message),
                    })
                }
            }
            Some(FailureKind::Business) => {
                let error = outcome_error(&outcome);
                tracing::warn!(error = %error, "business failure, escalating to reflection");
                state.counters.error_retry_count = 0;
                state.routing.last_outcome = Some(TaskStatus::Failed);
                state.routing.last_error = Some(error.clone());
                state.routing.last_failure_kind = Some(FailureKind::Business);
                state.routing.clear_active();
                if let Some(plan) = state.plan.as_mut() {
                    if let Some(task) = plan.current_task_mut() {
                        if task.status == TaskStatus::Running {
                            if plan_task_settled {
                                task.mark_failed(error.clone(), FailureKind::Business);
                                send_event(
                                    &self.event_tx,
                                    OrchestrationEvent::TaskFailed {
                                        task_id: task.id.clone(),
                                        kind: FailureKind::Business,
                                        error,
                                    },
                                );
                            } else {
                                // 计划外派发失败不连累计划任务，任务回到待调度
                                task.reset_pending();
                                plan.current_task_id = None;
                            }
                        }
                    }
                    plan.touch();
                }
                // 不自动重试：落到反思
                None
            }
        }
    }

    /// 确定性链裁决；Route 时优先绑定计划内匹配的待调度任务
    fn consult_chain(&self, state: &mut OrchestrationState) -> Option<Decision> {
        let chain = self.chain.as_ref()?;
        match chain.decide(&state.reports, &state.gates) {
            ChainDecision::Route(role) => {
                if !self.roster.contains(&role) {
                    tracing::warn!(role = %role, "chain routes to a role missing from roster, deferring");
                    return None;
                }
                let matches_next_pending = state
                    .plan
                    .as_ref()
                    .and_then(|p| p.next_pending())
                    .map(|t| t.assigned_role == role)
                    .unwrap_or(false);
                if matches_next_pending {
                    match self.try_dispatch_next(state) {
                        DispatchAttempt::Dispatched(decision) => return Some(decision),
                        _ => return None,
                    }
                }
                tracing::info!(role = %role, "deterministic chain routes the next role");
                state.routing.active_role = Some(role.clone());
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::RoleRouted { role: role.clone() },
                );
                Some(Decision::Dispatch {
                    role,
                    task_id: None,
                    instruction: state.goal.clone(),
                })
            }
            ChainDecision::Finalize => {
                // 链走完并不等于计划走完；计划还有活时交给 Oracle 收尾
                let plan_settled = state
                    .plan
                    .as_ref()
                    .map(|p| p.is_all_completed())
                    .unwrap_or(true);
                if !plan_settled {
                    return None;
                }
                if let Some(plan) = state.plan.as_mut() {
                    plan.status = PlanStatus::Completed;
                    plan.touch();
                }
                state.routing.clear_active();
                tracing::info!("deterministic chain complete, finalizing");
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::Finalized {
                        status: PlanStatus::Completed,
                        error: None,
                    },
                );
                Some(Decision::Finalize {
                    status: PlanStatus::Completed,
                    error: None,
                })
            }
            ChainDecision::NoOpinion => None,
        }
    }

    /// Oracle 路径：确保有计划，派发下一个任务，推进不了就反思。
    /// 循环只在重规划（有界）与失败记账后重入，结构上有界。
    async fn advance_plan(
        &self,
        state: &mut OrchestrationState,
    ) -> Result<Decision, OrchestrateError> {
        loop {
            if state.plan.is_none() {
                let plan = self
                    .planner
                    .create_plan(&state.goal, &self.roster)
                    .await?;
                // 空计划会被 is_all_completed 误判为成功，必须拒收
                if plan.tasks.is_empty() {
                    return Err(OrchestrateError::EmptyPlan);
                }
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::PlanCreated {
                        task_count: plan.tasks.len(),
                    },
                );
                state.plan = Some(plan);
            }

            if state.plan.as_ref().unwrap().is_all_completed() {
                let plan = state.plan.as_mut().unwrap();
                plan.status = PlanStatus::Completed;
                plan.touch();
                state.routing.clear_active();
                send_event(
                    &self.event_tx,
                    OrchestrationEvent::Finalized {
                        status: PlanStatus::Completed,
                        error: None,
                    },
                );
                return Ok(Decision::Finalize {
                    status: PlanStatus::Completed,
                    error: None,
                });
            }

            let halted = state.plan.as_ref().unwrap().has_failed_task()
                && self.config.business_failure == BusinessFailurePolicy::HaltAndReflect;
            if !halted {
                match self.try_dispatch_next(state) {
                    DispatchAttempt::Dispatched(decision) => return Ok(decision),
                    // 未知角色已按业务失败记账，进入反思
                    DispatchAttempt::UnknownRole => {}
                    DispatchAttempt::NoPending => {}
                }
            }

            // 反思
            send_event(&self.event_tx, OrchestrationEvent::ReflectionStarted);
            let last = state.last_result_summary();
            let reflection = self
                .reflector
                .reflect(&state.goal, state.plan.as_ref().unwrap(), &last)
                .await?;
            send_event(
                &self.event_tx,
                OrchestrationEvent::ReflectionDone {
                    next_action: reflection.next_action,
                },
            );

            match reflection.next_action {
                NextAction::End => {
                    let status = if reflection.is_complete() {
                        PlanStatus::Completed
                    } else {
                        PlanStatus::Failed
                    };
                    let error = if status == PlanStatus::Failed {
                        state.routing.last_error.clone()
                    } else {
                        None
                    };
                    let plan = state.plan.as_mut().unwrap();
                    plan.status = status;
                    plan.touch();
                    state.routing.clear_active();
                    tracing::info!(?status, "reflection ended the session");
                    send_event(
                        &self.event_tx,
                        OrchestrationEvent::Finalized {
                            status,
                            error: error.clone(),
                        },
                    );
                    return Ok(Decision::Finalize { status, error });
                }
                NextAction::Replan => {
                    state.counters.replan_count += 1;
                    if state.counters.replan_count > self.config.max_replan_depth {
                        let message = format!(
                            "replan depth exceeded ({} > {})",
                            state.counters.replan_count, self.config.max_replan_depth
                        );
                        tracing::error!("{message}, forcing failure");
                        let plan = state.plan.as_mut().unwrap();
                        plan.status = PlanStatus::Failed;
                        plan.touch();
                        state.routing.clear_active();
                        send_event(
                            &self.event_tx,
                            OrchestrationEvent::Finalized {
                                status: PlanStatus::Failed,
                                error: Some(message.clone()),
                            },
                        );
                        return Ok(Decision::Finalize {
                            status: PlanStatus::Failed,
                            error: Some(message),
                        });
                    }
                    send_event(
                        &self.event_tx,
                        OrchestrationEvent::ReplanTriggered {
                            count: state.counters.replan_count,
                            max: self.config.max_replan_depth,
                        },
                    );
                    tracing::info!(
                        count = state.counters.replan_count,
                        max = self.config.max_replan_depth,
                        "replanning"
                    );
                    let new_plan = self
                        .planner
                        .replan(
                            &state.goal,
                            state.plan.as_ref().unwrap(),
                            &reflection.summary,
                            &self.roster,
                        )
                        .await?;
                    if new_plan.tasks.is_empty() {
                        return Err(OrchestrateError::EmptyPlan);
                    }
                    send_event(
                        &self.event_tx,
                        OrchestrationEvent::PlanCreated {
                            task_count: new_plan.tasks.len(),
                        },
                    );
                    // 新纪元：旧计划整体替换，重试计数与残留错误一并清掉
                    state.plan = Some(new_plan);
                    state.counters.error_retry_count = 0;
                    state.routing.last_error = None;
                    state.routing.last_failure_kind = None;
                    continue;
                }
                NextAction::RetryOrContinue => {
                    let plan = state.plan.as_mut().unwrap();
                    if reflection.retry_current {
                        if let Some(task) = plan.first_failed_mut() {
                            // 未知角色的任务重试只会原样失败，留给 continue 分支处理
                            if self.roster.contains(&task.assigned_role) {
                                tracing::info!(task_id = %task.id, "reflection retries the failed task");
                                task.reset_pending();
                                continue;
                            }
                        }
                    }
                    // 带伤推进：失败任务保持失败，继续派发剩下的
                    match self.try_dispatch_next(state) {
                        DispatchAttempt::Dispatched(decision) => return Ok(decision),
                        DispatchAttempt::UnknownRole => continue,
                        DispatchAttempt::NoPending => {
                            let plan = state.plan.as_mut().unwrap();
                            let status = if plan.is_all_completed() {
                                PlanStatus::Completed
                            } else {
                                PlanStatus::Failed
                            };
                            plan.status = status;
                            plan.touch();
                            let error = state.routing.last_error.clone();
                            state.routing.clear_active();
                            send_event(
                                &self.event_tx,
                                OrchestrationEvent::Finalized {
                                    status,
                                    error: error.clone(),
                                },
                            );
                            return Ok(Decision::Finalize { status, error });
                        }
                    }
                }
            }
        }
    }

    /// 派发计划内下一个待调度任务；未知角色按业务失败记账
    fn try_dispatch_next(&self, state: &mut OrchestrationState) -> DispatchAttempt {
        let plan = match state.plan.as_mut() {
            Some(p) => p,
            None => return DispatchAttempt::NoPending,
        };
        let (task_id, role, description) = match plan.next_pending() {
            Some(t) => (t.id.clone(), t.assigned_role.clone(), t.description.clone()),
            None => return DispatchAttempt::NoPending,
        };

        if !self.roster.contains(&role) {
            let message = format!("unknown role: {}", role);
            tracing::error!(task_id = %task_id, role = %role, "oracle assigned an unknown role");
            let task = plan.task_mut(&task_id).unwrap();
            task.mark_failed(message.clone(), FailureKind::Business);
            plan.touch();
            state.routing.last_error = Some(message.clone());
            state.routing.last_failure_kind = Some(FailureKind::Business);
            send_event(
                &self.event_tx,
                OrchestrationEvent::TaskFailed {
                    task_id,
                    kind: FailureKind::Business,
                    error: message,
                },
            );
            return DispatchAttempt::UnknownRole;
        }

        let task = plan.task_mut(&task_id).unwrap();
        task.mark_running();
        plan.current_task_id = Some(task_id.clone());
        plan.touch();
        state.routing.active_role = Some(role.clone());
        tracing::info!(task_id = %task_id, role = %role, "dispatching task");
        send_event(
            &self.event_tx,
            OrchestrationEvent::TaskDispatched {
                task_id: task_id.clone(),
                role: role.clone(),
            },
        );
        DispatchAttempt::Dispatched(Decision::Dispatch {
            role,
            task_id: Some(task_id),
            instruction: description,
        })
    }
}

fn outcome_error(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Failed { error, .. } => error.clone(),
        other => format!("{:?}", other),
    }
}
