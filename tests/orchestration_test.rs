//! 编排集成测试：用脚本化的 Planner/Reflector/Runner 驱动完整会话

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crew::core::{
    OrchestrateError, OrchestrationState, Plan, PlanStatus, RoleRoster, RoleSpec, SessionOutcome,
    SessionRuntime, TaskStatus,
};
use crew::react::{
    BusinessFailurePolicy, Controller, ControllerConfig, NextAction, Planner, Reflection, Reflector,
};
use crew::runner::{AgentRunner, TaskOutcome};

/// 固定任务列表的 Planner，记录调用次数
struct StaticPlanner {
    tasks: Vec<(&'static str, &'static str)>,
    calls: AtomicUsize,
}

impl StaticPlanner {
    fn new(tasks: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            tasks,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn create_plan(
        &self,
        _goal: &str,
        _roster: &RoleRoster,
    ) -> Result<Plan, OrchestrateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut plan = Plan::new();
        for (desc, role) in &self.tasks {
            plan.add_task(*desc, *role);
        }
        Ok(plan)
    }
}

/// 逐条吐出脚本的 Reflector，脚本耗尽后固定给 end/failed
struct ScriptedReflector {
    script: Mutex<VecDeque<Reflection>>,
}

impl ScriptedReflector {
    fn new(script: Vec<Reflection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn reflect(
        &self,
        _goal: &str,
        _plan: &Plan,
        _last: &str,
    ) -> Result<Reflection, OrchestrateError> {
        Ok(self.script.lock().unwrap().pop_front().unwrap_or(Reflection {
            summary: "script exhausted".into(),
            next_action: NextAction::End,
            goal_achieved: false,
            retry_current: false,
        }))
    }
}

fn replan() -> Reflection {
    Reflection {
        summary: "needs a new plan".into(),
        next_action: NextAction::Replan,
        goal_achieved: false,
        retry_current: false,
    }
}

fn end(goal_achieved: bool) -> Reflection {
    Reflection {
        summary: "end".into(),
        next_action: NextAction::End,
        goal_achieved,
        retry_current: false,
    }
}

/// 按角色排队吐结果的 Runner；队列空后一律返回完成，并记录派发顺序
struct ScriptedRunner {
    script: Mutex<HashMap<String, VecDeque<TaskOutcome>>>,
    dispatches: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(script: Vec<(&'static str, Vec<TaskOutcome>)>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(role, outcomes)| (role.to_string(), outcomes.into()))
                    .collect(),
            ),
            dispatches: Mutex::new(Vec::new()),
        }
    }

    fn dispatch_log(&self) -> Vec<String> {
        self.dispatches.lock().unwrap().clone()
    }

    fn count_for(&self, role: &str) -> usize {
        self.dispatches
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == role)
            .count()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn dispatch(&self, role: &str, _instruction: &str) -> TaskOutcome {
        self.dispatches.lock().unwrap().push(role.to_string());
        self.script
            .lock()
            .unwrap()
            .get_mut(role)
            .and_then(|q| q.pop_front())
            .unwrap_or(TaskOutcome::Completed {
                summary: format!("{} done", role),
            })
    }
}

fn roster() -> RoleRoster {
    RoleRoster::new(vec![
        RoleSpec::new("analyst", "analysis"),
        RoleSpec::new("architect", "design"),
        RoleSpec::new("developer", "implementation"),
        RoleSpec::new("reviewer", "review"),
    ])
}

fn transient(error: &str) -> TaskOutcome {
    TaskOutcome::Failed {
        error: error.into(),
        transient: true,
    }
}

fn business(error: &str) -> TaskOutcome {
    TaskOutcome::Failed {
        error: error.into(),
        transient: false,
    }
}

#[tokio::test]
async fn test_happy_path_completes_in_order() {
    let planner = Arc::new(StaticPlanner::new(vec![
        ("analyze requirements", "analyst"),
        ("design workflow", "architect"),
        ("implement workflow", "developer"),
    ]));
    let runner = Arc::new(ScriptedRunner::new(vec![]));
    let controller = Controller::new(planner.clone(), Arc::new(ScriptedReflector::new(vec![])), roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("build a daily report");
    let outcome = runtime.run(&mut state).await.unwrap();

    match outcome {
        SessionOutcome::Finished { status, error } => {
            assert_eq!(status, PlanStatus::Completed);
            assert!(error.is_none());
        }
        other => panic!("expected Finished, got {:?}", other),
    }
    assert_eq!(runner.dispatch_log(), vec!["analyst", "architect", "developer"]);
    assert!(state.plan.as_ref().unwrap().is_all_completed());
    assert_eq!(state.counters.error_retry_count, 0);
    assert_eq!(planner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_system_failures_retried_then_success() {
    // 系统失败三次后第四次成功：计划完成，重试计数归零，该任务恰好派发 4 次
    let planner = Arc::new(StaticPlanner::new(vec![("analyze", "analyst")]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![
            transient("timeout"),
            transient("timeout"),
            transient("timeout"),
            TaskOutcome::Completed {
                summary: "finally".into(),
            },
        ],
    )]));
    let controller = Controller::new(planner, Arc::new(ScriptedReflector::new(vec![])), roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Finished {
            status: PlanStatus::Completed,
            ..
        }
    ));
    assert_eq!(runner.count_for("analyst"), 4);
    assert_eq!(state.counters.error_retry_count, 0);
    assert!(state.plan.as_ref().unwrap().is_all_completed());
}

#[tokio::test]
async fn test_system_failures_exhaust_retry_budget() {
    let planner = Arc::new(StaticPlanner::new(vec![("analyze", "analyst")]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![
            transient("timeout"),
            transient("timeout"),
            transient("timeout"),
            transient("timeout"),
        ],
    )]));
    let controller = Controller::new(planner, Arc::new(ScriptedReflector::new(vec![])), roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();

    match outcome {
        SessionOutcome::Finished { status, error } => {
            assert_eq!(status, PlanStatus::Failed);
            assert!(error.unwrap().contains("system failure after 3 retries"));
        }
        other => panic!("expected Finished, got {:?}", other),
    }
    // 首次派发 + 3 次重试
    assert_eq!(runner.count_for("analyst"), 4);
    assert_eq!(state.plan.as_ref().unwrap().status, PlanStatus::Failed);
}

#[tokio::test]
async fn test_replan_bound_forces_failure() {
    // 反思每次都要求重规划：超过上限后第 (MAX+1) 次被折算成 finalize(failed)
    let planner = Arc::new(StaticPlanner::new(vec![("analyze", "analyst")]));
    let reflector = Arc::new(ScriptedReflector::new(vec![
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
    ]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![
            business("wrong"),
            business("wrong"),
            business("wrong"),
            business("wrong"),
            business("wrong"),
            business("wrong"),
            business("wrong"),
        ],
    )]));
    let controller = Controller::new(planner.clone(), reflector, roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();

    match outcome {
        SessionOutcome::Finished { status, error } => {
            assert_eq!(status, PlanStatus::Failed);
            assert!(error.unwrap().contains("replan depth exceeded"));
        }
        other => panic!("expected Finished, got {:?}", other),
    }
    // 首次规划 + 5 次重规划，第 6 次重规划被拒绝
    assert_eq!(planner.calls.load(Ordering::SeqCst), 6);
    assert_eq!(state.counters.replan_count, 6);
}

#[tokio::test]
async fn test_needs_human_interrupts_then_resumes() {
    let planner = Arc::new(StaticPlanner::new(vec![("analyze", "analyst")]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![TaskOutcome::NeedsHuman {
            questions: vec!["which database?".into()],
        }],
    )]));
    let controller = Controller::new(planner, Arc::new(ScriptedReflector::new(vec![])), roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();
    match outcome {
        SessionOutcome::NeedsHuman { payload, .. } => {
            assert!(payload.to_string().contains("which database?"));
        }
        other => panic!("expected NeedsHuman, got {:?}", other),
    }

    // 人工处理完毕后继续：同一任务重新派发并完成
    let outcome = runtime.run(&mut state).await.unwrap();
    assert!(matches!(
        outcome,
        SessionOutcome::Finished {
            status: PlanStatus::Completed,
            ..
        }
    ));
    assert_eq!(runner.count_for("analyst"), 2);
}

#[tokio::test]
async fn test_delegate_preempts_then_plan_resumes() {
    let planner = Arc::new(StaticPlanner::new(vec![("analyze", "analyst")]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![
            TaskOutcome::Delegate {
                target_role: "reviewer".into(),
                payload: serde_json::json!({"instruction": "sanity-check the input"}),
            },
        ],
    )]));
    let controller = Controller::new(planner, Arc::new(ScriptedReflector::new(vec![])), roster());
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Finished {
            status: PlanStatus::Completed,
            ..
        }
    ));
    // 委派抢占计划：analyst -> reviewer（计划外）-> analyst 重派
    assert_eq!(runner.dispatch_log(), vec!["analyst", "reviewer", "analyst"]);
    assert!(state.reports.contains_key("reviewer"));
}

#[tokio::test]
async fn test_skip_policy_keeps_dispatching_after_business_failure() {
    let planner = Arc::new(StaticPlanner::new(vec![
        ("analyze", "analyst"),
        ("design", "architect"),
    ]));
    let reflector = Arc::new(ScriptedReflector::new(vec![end(false)]));
    let runner = Arc::new(ScriptedRunner::new(vec![(
        "analyst",
        vec![business("cannot parse requirement")],
    )]));
    let config = ControllerConfig {
        business_failure: BusinessFailurePolicy::SkipAndContinue,
        ..ControllerConfig::default()
    };
    let controller =
        Controller::new(planner, reflector, roster()).with_config(config);
    let runtime = SessionRuntime::new(controller, runner.clone());

    let mut state = OrchestrationState::new("goal");
    let outcome = runtime.run(&mut state).await.unwrap();

    // 失败任务被跳过，architect 照常执行；收尾由反思决定
    assert_eq!(runner.dispatch_log(), vec!["analyst", "architect"]);
    match outcome {
        SessionOutcome::Finished { status, .. } => assert_eq!(status, PlanStatus::Failed),
        other => panic!("expected Finished, got {:?}", other),
    }
    let plan = state.plan.as_ref().unwrap();
    assert_eq!(plan.tasks[0].status, TaskStatus::Failed);
    assert_eq!(plan.tasks[1].status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_single_running_task_invariant() {
    let planner = Arc::new(StaticPlanner::new(vec![
        ("analyze", "analyst"),
        ("design", "architect"),
        ("implement", "developer"),
    ]));
    let controller = Controller::new(planner, Arc::new(ScriptedReflector::new(vec![])), roster());
    let mut state = OrchestrationState::new("goal");

    let mut outcome = None;
    for _ in 0..16 {
        let decision = controller.step(&mut state, outcome.take()).await.unwrap();
        let running = state
            .plan
            .as_ref()
            .map(|p| {
                p.tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Running)
                    .count()
            })
            .unwrap_or(0);
        assert!(running <= 1, "more than one running task");
        match decision {
            crew::react::Decision::Dispatch { .. } => {
                outcome = Some(TaskOutcome::Completed {
                    summary: "ok".into(),
                });
            }
            crew::react::Decision::Finalize { status, .. } => {
                assert_eq!(status, PlanStatus::Completed);
                return;
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }
    panic!("session did not terminate");
}

#[tokio::test]
async fn test_state_survives_checkpoint_round_trip() {
    let planner = Arc::new(StaticPlanner::new(vec![
        ("analyze", "analyst"),
        ("design", "architect"),
    ]));
    let reflector = Arc::new(ScriptedReflector::new(vec![]));
    let controller = Controller::new(planner, reflector, roster());

    let mut state = OrchestrationState::new("goal");
    let decision = controller.step(&mut state, None).await.unwrap();
    assert!(matches!(decision, crew::react::Decision::Dispatch { .. }));

    // 模拟外部 checkpoint：序列化后原样恢复再继续
    let snapshot = serde_json::to_string(&state).unwrap();
    let mut restored: OrchestrationState = serde_json::from_str(&snapshot).unwrap();

    let decision = controller
        .step(
            &mut restored,
            Some(TaskOutcome::Completed {
                summary: "analysis done".into(),
            }),
        )
        .await
        .unwrap();
    match decision {
        crew::react::Decision::Dispatch { role, .. } => assert_eq!(role, "architect"),
        other => panic!("expected Dispatch, got {:?}", other),
    }
    assert_eq!(
        restored.plan.as_ref().unwrap().tasks[0].status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_termination_under_adversarial_outcomes() {
    // 无论结果序列如何，有界计数器保证会话在有限步内终结
    let planner = Arc::new(StaticPlanner::new(vec![
        ("analyze", "analyst"),
        ("design", "architect"),
    ]));
    let reflector = Arc::new(ScriptedReflector::new(vec![
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
        replan(),
    ]));
    let controller = Controller::new(planner, reflector, roster());
    let mut state = OrchestrationState::new("goal");

    let mut outcome = None;
    let mut finished = false;
    // 2 任务 × (3 重试 + 5 重规划) 的量级之内必须终结
    for step in 0..64 {
        let decision = controller.step(&mut state, outcome.take()).await.unwrap();
        match decision {
            crew::react::Decision::Dispatch { .. } => {
                // 交替瞬时失败与业务失败，逼出最深的重试/反思路径
                outcome = Some(if step % 2 == 0 {
                    transient("flaky")
                } else {
                    business("wrong")
                });
            }
            crew::react::Decision::Finalize { .. } => {
                finished = true;
                break;
            }
            crew::react::Decision::AskHuman { .. } => panic!("no human requests in this run"),
        }
    }
    assert!(finished, "controller failed to terminate");
}
