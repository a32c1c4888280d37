//! 确定性角色链
//!
//! 把固定的角色依赖关系表达成数据（有序的 {role, predecessor, gate} 记录），
//! 而不是嵌套条件：链可以独立构造、独立测试，不需要任何外部调用。
//! 当状态能由链推导时绝不消耗 Oracle；推导不出（无汇报、状态异常）
//! 就返回 NoOpinion，由 Controller 落到 Oracle 策略。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::state::{AgentReport, ReportStatus};

/// 命名门禁：两个角色之间的布尔前置条件，未通过时路由到门禁所属角色
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRule {
    /// 门禁名（gates 表中的键，如 design_review_passed）
    pub name: String,
    /// 门禁所属角色（通常是某个 reviewer）
    pub owner_role: String,
}

impl GateRule {
    pub fn new(name: impl Into<String>, owner_role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_role: owner_role.into(),
        }
    }
}

/// 链上的一环：role 在 predecessor 完成（且入口门禁通过）后才可推进
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    pub role: String,
    pub predecessor: Option<String>,
    /// predecessor 与本角色之间的门禁
    pub gate: Option<GateRule>,
}

/// 链的裁决
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainDecision {
    Route(String),
    Finalize,
    NoOpinion,
}

/// 确定性角色链：decide 是 (reports, gates) 上的纯全函数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleChain {
    steps: Vec<ChainStep>,
    /// 链尾门禁：全部角色完成后还须通过它才允许 finalize
    exit_gate: Option<GateRule>,
}

impl RoleChain {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            exit_gate: None,
        }
    }

    /// 追加一环，predecessor 自动取上一环的角色
    pub fn step(mut self, role: impl Into<String>) -> Self {
        let predecessor = self.steps.last().map(|s| s.role.clone());
        self.steps.push(ChainStep {
            role: role.into(),
            predecessor,
            gate: None,
        });
        self
    }

    /// 追加一环并在它与前驱之间设门禁
    pub fn gated_step(
        mut self,
        role: impl Into<String>,
        gate: impl Into<String>,
        gate_owner: impl Into<String>,
    ) -> Self {
        let predecessor = self.steps.last().map(|s| s.role.clone());
        self.steps.push(ChainStep {
            role: role.into(),
            predecessor,
            gate: Some(GateRule::new(gate, gate_owner)),
        });
        self
    }

    /// 设置链尾门禁
    pub fn exit_gate(mut self, gate: impl Into<String>, gate_owner: impl Into<String>) -> Self {
        self.exit_gate = Some(GateRule::new(gate, gate_owner));
        self
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    /// 从链头推进：返回第一个「前驱已完成而自身未完成」的角色；
    /// 途中遇到未通过的门禁则改投门禁所属角色；全部走完则 finalize。
    pub fn decide(
        &self,
        reports: &BTreeMap<String, AgentReport>,
        gates: &BTreeMap<String, bool>,
    ) -> ChainDecision {
        if self.steps.is_empty() || reports.is_empty() {
            return ChainDecision::NoOpinion;
        }

        // 链上任一角色处于异常状态时，链推导不出下一步
        for step in &self.steps {
            if let Some(report) = reports.get(&step.role) {
                if matches!(
                    report.status,
                    ReportStatus::Failed
                        | ReportStatus::Blocked
                        | ReportStatus::NeedsClarification
                        | ReportStatus::NeedsDelegation
                ) {
                    return ChainDecision::NoOpinion;
                }
            }
        }

        let completed = |role: &str| {
            reports
                .get(role)
                .map(|r| r.status == ReportStatus::Completed)
                .unwrap_or(false)
        };
        let gate_passed = |name: &str| gates.get(name).copied().unwrap_or(false);

        for step in &self.steps {
            let predecessor_done = step
                .predecessor
                .as_deref()
                .map(&completed)
                .unwrap_or(true);
            if !predecessor_done {
                // 前驱未完成说明链在更早处断开；继续扫描不会得到更好的答案
                return ChainDecision::NoOpinion;
            }
            if let Some(gate) = &step.gate {
                if !gate_passed(&gate.name) {
                    return ChainDecision::Route(gate.owner_role.clone());
                }
            }
            if !completed(&step.role) {
                return ChainDecision::Route(step.role.clone());
            }
        }

        if let Some(gate) = &self.exit_gate {
            if !gate_passed(&gate.name) {
                return ChainDecision::Route(gate.owner_role.clone());
            }
        }

        ChainDecision::Finalize
    }
}

impl Default for RoleChain {
    fn default() -> Self {
        Self::new()
    }
}

/// 数据团队的默认链：analyst -> architect -> [design_review] -> developer -> [development_review] -> finalize
pub fn default_team_chain() -> RoleChain {
    RoleChain::new()
        .step("analyst")
        .step("architect")
        .gated_step("developer", "design_review_passed", "reviewer")
        .exit_gate("development_review_passed", "reviewer")
}
