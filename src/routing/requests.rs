//! 请求优先门
//!
//! 在每一步的最前面检查 pending_requests，最多给出一个抢占式决策。
//! 规则（严格顺序）：
//! 1. 队列里任何位置存在 human 请求 -> ask_human，压过一切（包括进行中的任务）；
//! 2. 否则队首是 delegate 且目标角色已知 -> 路由到目标角色；
//! 3. 否则不表态，交回 Controller。
//!
//! human 的判定必须扫全队列而不是只看队首，否则排在 delegate 之后的
//! human 请求会被计划推进饿死。被处理过的请求立刻标记，畸形的 delegate
//! （目标角色未知）标记为 rejected 后跳过，避免卡死队列。

use serde_json::Value;

use crate::core::roster::RoleRoster;
use crate::core::state::{Request, RequestKind, RequestStatus};

/// 优先门的抢占式决策
#[derive(Debug, Clone)]
pub enum PriorityDecision {
    AskHuman { request_id: String, payload: Value },
    Route { role: String, payload: Value },
}

/// 消费 pending_requests，返回至多一个抢占式决策
pub fn take_priority_request(
    requests: &mut [Request],
    roster: &RoleRoster,
) -> Option<PriorityDecision> {
    // human 请求扫全队列
    if let Some(req) = requests
        .iter_mut()
        .find(|r| r.status == RequestStatus::Pending && r.kind == RequestKind::Human)
    {
        req.status = RequestStatus::Consumed;
        return Some(PriorityDecision::AskHuman {
            request_id: req.id.clone(),
            payload: req.payload.clone(),
        });
    }

    // delegate 只看队首（第一个仍 pending 的请求）
    let head = requests
        .iter_mut()
        .find(|r| r.status == RequestStatus::Pending)?;
    if head.kind != RequestKind::Delegate {
        return None;
    }
    match head.target_role.as_deref() {
        Some(role) if roster.contains(role) => {
            head.status = RequestStatus::Consumed;
            let role = role.to_string();
            Some(PriorityDecision::Route {
                role,
                payload: head.payload.clone(),
            })
        }
        other => {
            tracing::warn!(
                target_role = ?other,
                request_id = %head.id,
                "delegate request targets unknown role, rejecting"
            );
            head.status = RequestStatus::Rejected;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::roster::RoleSpec;

    fn roster() -> RoleRoster {
        RoleRoster::new(vec![
            RoleSpec::new("analyst", "analysis"),
            RoleSpec::new("reviewer", "review"),
        ])
    }

    #[test]
    fn test_human_wins_over_earlier_delegate() {
        let mut requests = vec![
            Request::delegate("analyst", serde_json::json!({}), "architect"),
            Request::human(serde_json::json!({"q": "?"}), "developer"),
        ];
        let decision = take_priority_request(&mut requests, &roster()).unwrap();
        assert!(matches!(decision, PriorityDecision::AskHuman { .. }));
        // delegate 留在队列里，下一步处理
        assert_eq!(requests[0].status, RequestStatus::Pending);
        assert_eq!(requests[1].status, RequestStatus::Consumed);
    }

    #[test]
    fn test_head_delegate_routes_to_known_role() {
        let mut requests = vec![Request::delegate(
            "reviewer",
            serde_json::json!({"reason": "double check"}),
            "developer",
        )];
        let decision = take_priority_request(&mut requests, &roster()).unwrap();
        match decision {
            PriorityDecision::Route { role, .. } => assert_eq!(role, "reviewer"),
            other => panic!("expected Route, got {:?}", other),
        }
        assert_eq!(requests[0].status, RequestStatus::Consumed);
    }

    #[test]
    fn test_unknown_delegate_target_is_rejected() {
        let mut requests = vec![Request::delegate("ghost", serde_json::json!({}), "developer")];
        assert!(take_priority_request(&mut requests, &roster()).is_none());
        assert_eq!(requests[0].status, RequestStatus::Rejected);
        // 第二次调用不再被同一请求卡住
        assert!(take_priority_request(&mut requests, &roster()).is_none());
    }

    #[test]
    fn test_empty_queue_has_no_opinion() {
        let mut requests: Vec<Request> = vec![];
        assert!(take_priority_request(&mut requests, &roster()).is_none());
    }
}
