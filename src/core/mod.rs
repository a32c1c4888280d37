//! 核心层：计划/任务模型、编排状态、失败分类、事件、会话运行时

pub mod classifier;
pub mod error;
pub mod events;
pub mod plan;
pub mod roster;
pub mod session;
pub mod state;

pub use classifier::{classify, FailureKind};
pub use error::OrchestrateError;
pub use events::OrchestrationEvent;
pub use plan::{Plan, PlanStatus, Task, TaskStatus};
pub use roster::{RoleRoster, RoleSpec};
pub use session::{SessionOutcome, SessionRuntime};
pub use state::{
    AgentReport, Counters, OrchestrationState, ReportStatus, Request, RequestKind, RequestStatus,
    RoutingState,
};
