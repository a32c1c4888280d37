//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CREW__*` 覆盖（双下划线表示嵌套，如 `CREW__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::react::{BusinessFailurePolicy, ControllerConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub llm: LlmSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [orchestrator] 段：重试/重规划上限与业务失败推进策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 系统失败快速重试上限
    #[serde(default = "default_max_error_retries")]
    pub max_error_retries: u32,
    /// 重规划次数上限
    #[serde(default = "default_max_replan_depth")]
    pub max_replan_depth: u32,
    /// 业务失败后是否停止派发剩余任务进入反思（false 则跳过失败任务继续）
    #[serde(default = "default_halt_on_business_failure")]
    pub halt_on_business_failure: bool,
    /// 单次连续推进的步数上限
    #[serde(default = "default_max_session_steps")]
    pub max_session_steps: usize,
}

fn default_max_error_retries() -> u32 {
    3
}

fn default_max_replan_depth() -> u32 {
    5
}

fn default_halt_on_business_failure() -> bool {
    true
}

fn default_max_session_steps() -> usize {
    64
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_error_retries: default_max_error_retries(),
            max_replan_depth: default_max_replan_depth(),
            halt_on_business_failure: default_halt_on_business_failure(),
            max_session_steps: default_max_session_steps(),
        }
    }
}

impl OrchestratorSection {
    /// 转成 Controller 行为参数
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_error_retries: self.max_error_retries,
            max_replan_depth: self.max_replan_depth,
            business_failure: if self.halt_on_business_failure {
                BusinessFailurePolicy::HaltAndReflect
            } else {
                BusinessFailurePolicy::SkipAndContinue
            },
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            orchestrator: OrchestratorSection::default(),
            llm: LlmSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CREW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CREW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CREW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
