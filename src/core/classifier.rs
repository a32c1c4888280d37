//! 失败分类器
//!
//! 将一次调度的原始结果映射到失败类别，是「快速重试还是进入反思」的唯一分叉点。
//! 映射必须全覆盖：completed 无类别；外部注入的取消为 user_abort；
//! 执行基座自身的瞬时错误（超时、网络、依赖返回畸形响应）为 system；
//! 其余一律 business——宁可交给反思/人工，也不做静默无限重试。

use serde::{Deserialize, Serialize};

use crate::runner::TaskOutcome;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 瞬时基础设施失败，可快速重试
    System,
    /// 语义/业务失败，只能反思或重规划，不自动重试
    Business,
    /// 用户中止，立即终结
    UserAbort,
}

/// 对调度结果分类；completed 与协作请求类结果返回 None
pub fn classify(outcome: &TaskOutcome) -> Option<FailureKind> {
    match outcome {
        TaskOutcome::Completed { .. } => None,
        TaskOutcome::Cancelled => Some(FailureKind::UserAbort),
        TaskOutcome::Failed { transient: true, .. } => Some(FailureKind::System),
        TaskOutcome::Failed { transient: false, .. } => Some(FailureKind::Business),
        // 澄清/委派不是失败：它们会变成 pending_requests 里的请求
        TaskOutcome::NeedsHuman { .. } | TaskOutcome::Delegate { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_has_no_kind() {
        let outcome = TaskOutcome::Completed {
            summary: "ok".into(),
        };
        assert_eq!(classify(&outcome), None);
    }

    #[test]
    fn test_cancelled_is_user_abort() {
        assert_eq!(classify(&TaskOutcome::Cancelled), Some(FailureKind::UserAbort));
    }

    #[test]
    fn test_transient_failure_is_system() {
        let outcome = TaskOutcome::Failed {
            error: "connect timeout".into(),
            transient: true,
        };
        assert_eq!(classify(&outcome), Some(FailureKind::System));
    }

    #[test]
    fn test_non_transient_failure_is_business() {
        let outcome = TaskOutcome::Failed {
            error: "cannot satisfy the request".into(),
            transient: false,
        };
        assert_eq!(classify(&outcome), Some(FailureKind::Business));
    }

    #[test]
    fn test_collaboration_outcomes_are_not_failures() {
        let needs_human = TaskOutcome::NeedsHuman {
            questions: vec!["which table?".into()],
        };
        let delegate = TaskOutcome::Delegate {
            target_role: "reviewer".into(),
            payload: serde_json::json!({}),
        };
        assert_eq!(classify(&needs_human), None);
        assert_eq!(classify(&delegate), None);
    }
}
