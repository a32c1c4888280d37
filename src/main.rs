//! Crew - 演示入口
//!
//! 初始化日志，加载配置，组装 Controller 与一个 Mock 角色执行器，
//! 驱动一次完整会话并把编排事件打到终端。有 API Key 时 Planner/Reflector
//! 走真实 LLM，否则走 Mock，保证无 Key 也能跑通。

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crew::config::{load_config, AppConfig};
use crew::core::{OrchestrationState, RoleRoster, RoleSpec, SessionOutcome, SessionRuntime};
use crew::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crew::react::{Controller, LlmPlanner, LlmReflector};
use crew::runner::{AgentRunner, TaskOutcome};

/// 演示用角色执行器：每个角色直接返回完成
struct DemoRunner;

#[async_trait]
impl AgentRunner for DemoRunner {
    async fn dispatch(&self, role: &str, instruction: &str) -> TaskOutcome {
        tracing::info!(role, instruction, "demo runner executing");
        TaskOutcome::Completed {
            summary: format!("{} finished: {}", role, instruction),
        }
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            base,
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let llm = create_llm_from_config(&cfg);
    let roster = RoleRoster::new(vec![
        RoleSpec::new("analyst", "Understands the requirement and breaks it into business steps"),
        RoleSpec::new("architect", "Designs the workflow from the analysis"),
        RoleSpec::new("developer", "Implements the designed workflow"),
        RoleSpec::new("reviewer", "Reviews designs and implementations"),
    ]);

    let controller = Controller::new(
        Arc::new(LlmPlanner::new(llm.clone())),
        Arc::new(LlmReflector::new(llm.clone())),
        roster,
    )
    .with_config(cfg.orchestrator.controller_config());

    // 事件打印
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let controller = controller.with_event_tx(event_tx);
    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            println!("event: {}", serde_json::to_string(&ev).unwrap_or_default());
        }
    });

    let runtime = SessionRuntime::new(controller, Arc::new(DemoRunner))
        .with_max_steps(cfg.orchestrator.max_session_steps);

    let mut state = OrchestrationState::new("Summarize yesterday's sales into a daily report");
    let outcome = runtime
        .run(&mut state)
        .await
        .context("session run failed")?;

    match outcome {
        SessionOutcome::Finished { status, error } => {
            println!("session finished: {:?} (error: {:?})", status, error);
        }
        SessionOutcome::NeedsHuman { payload, .. } => {
            println!("session needs human input: {}", payload);
        }
    }

    // 终态可整体序列化，交给外部存储
    println!(
        "final state: {}",
        serde_json::to_string_pretty(&state).context("state serialization failed")?
    );

    let (prompt, completion, total) = llm.token_usage();
    println!("token usage: prompt={} completion={} total={}", prompt, completion, total);

    drop(runtime);
    let _ = printer.await;
    Ok(())
}
