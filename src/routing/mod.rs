//! 路由层：请求优先门与确定性角色链

pub mod chain;
pub mod requests;

pub use chain::{default_team_chain, ChainDecision, ChainStep, GateRule, RoleChain};
pub use requests::{take_priority_request, PriorityDecision};
