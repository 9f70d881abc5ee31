mod common;

use agentfleet::model::{
    AgentStatus, AuditCategory, AuditEvent, AuditResult, AuditSeverity, ConnectionState, Health,
    Priority, Role,
};
use common::{make_policy, operator_token, registered_agent, test_state};
use http_body_util::BodyExt;
use std::collections::BTreeMap;
use tower::ServiceExt;

// ══════════════════════════════════════════════════════════════════
// Compliance reporting + audit log integration tests (no running
// server)
//
// Exercises `/reports/*` and `/audit` against a fleet with a little
// real history behind it.
// ══════════════════════════════════════════════════════════════════

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn healthy_status() -> AgentStatus {
    AgentStatus {
        connection_state: ConnectionState::Active,
        health: Health::Healthy,
        timestamp: chrono::Utc::now(),
        active_policy_count: 3,
        total_disk_bytes: 1_000_000_000,
        available_disk_bytes: 400_000_000,
        cumulative_freed_bytes: 2_048,
        cleanup_count: 4,
    }
}

#[tokio::test]
async fn fleet_report_reflects_registered_agents() {
    let state = test_state();
    let app = agentfleet::api::build_router(state.clone());
    let token = operator_token(&state, "viewer", Role::Viewer).await;
    registered_agent(&state, "agent-1", "mac-1.local", &[]).await;
    state.registry.update_status("agent-1", healthy_status()).await.unwrap();

    let req = axum::http::Request::builder()
        .method("GET")
        .uri("/reports/fleet")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["totalAgents"].as_u64().unwrap_or(0), 1);
}

#[tokio::test]
async fn policy_execution_report_tracks_an_in_progress_rollout() {
    let state = test_state();
    let app = agentfleet::api::build_router(state.clone());
    let token = operator_token(&state, "viewer", Role::Viewer).await;
    registered_agent(&state, "agent-2", "mac-2.local", &[]).await;

    let policy = make_policy("temp-file-sweep", Priority::Normal, &["r1"]);
    state.policies.save(policy, false).await.unwrap();
    let distribution_id = state
        .distributor
        .distribute("temp-file-sweep", agentfleet::model::DistributionTarget::All)
        .await
        .unwrap();

    let req = axum::http::Request::builder()
        .method("GET")
        .uri(format!("/reports/policy-execution/{distribution_id}"))
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["policyName"], "temp-file-sweep");
    assert_eq!(body["totalTargetedAgents"].as_u64().unwrap(), 1);
}

#[tokio::test]
async fn audit_log_filters_by_category() {
    let state = test_state();
    let app = agentfleet::api::build_router(state.clone());
    let token = operator_token(&state, "viewer", Role::Viewer).await;

    state
        .audit
        .insert(AuditEvent {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            category: AuditCategory::Cleanup,
            severity: AuditSeverity::Info,
            actor: "agent-3".to_string(),
            target: "~/Library/Caches".to_string(),
            action: "cleanup.run".to_string(),
            result: AuditResult::Success,
            hostname: Some("mac-3.local".to_string()),
            username: None,
            session_id: None,
            metadata: BTreeMap::new(),
        })
        .await
        .unwrap();
    state
        .audit
        .insert(AuditEvent {
            id: String::new(),
            timestamp: chrono::Utc::now(),
            category: AuditCategory::Security,
            severity: AuditSeverity::Warning,
            actor: "root".to_string(),
            target: "agent-3".to_string(),
            action: "token.revoke".to_string(),
            result: AuditResult::Success,
            hostname: None,
            username: Some("root".to_string()),
            session_id: None,
            metadata: BTreeMap::new(),
        })
        .await
        .unwrap();

    let req = axum::http::Request::builder()
        .method("GET")
        .uri("/audit?category=cleanup")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    let body = json_body(resp).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["action"], "cleanup.run");
}
