//! 角色名册
//!
//! 记录团队内已知的角色；Oracle 给出的任何角色名都要先过名册校验，
//! 未知角色按业务失败处理，绝不盲目派发。

use serde::{Deserialize, Serialize};

/// 单个角色的能力描述（给 Planner 的 prompt 用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub description: String,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// 已知角色集合
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRoster {
    roles: Vec<RoleSpec>,
}

impl RoleRoster {
    pub fn new(roles: Vec<RoleSpec>) -> Self {
        Self { roles }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    pub fn roles(&self) -> &[RoleSpec] {
        &self.roles
    }

    pub fn names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }

    /// 生成给 Planner 的角色列表文本
    pub fn to_prompt(&self) -> String {
        self.roles
            .iter()
            .map(|r| format!("- {}: {}", r.name, r.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
