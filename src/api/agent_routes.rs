//! Agent-facing wire contracts (spec §6): registration, heartbeat, and
//! distribution acknowledgement.

use crate::api::{AppState, HEARTBEATS, REGISTRATIONS};
use crate::distributor::AckState;
use crate::model::{AgentIdentity, AgentStatus};
use crate::registration::RegistrationRequest;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/heartbeat/:agent_id", post(heartbeat))
        .route("/api/v1/ack/:distribution_id/:agent_id", post(ack))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequestBody {
    pub identity: AgentIdentity,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponseBody {
    pub success: bool,
    pub agent_id: Option<String>,
    pub auth_token: Option<String>,
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub message: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequestBody>,
) -> (StatusCode, Json<RegisterResponseBody>) {
    let request = RegistrationRequest {
        identity: body.identity,
        capabilities: body.capabilities.into_iter().collect::<BTreeSet<_>>(),
    };

    match state.registration.process_registration(request).await {
        Ok(outcome) if outcome.admitted => {
            let agent = outcome.agent.expect("admitted outcome carries an agent");
            REGISTRATIONS.with_label_values(&["admitted"]).inc();
            (
                StatusCode::OK,
                Json(RegisterResponseBody {
                    success: true,
                    agent_id: Some(agent.identity.id.clone()),
                    auth_token: Some(agent.auth_token.clone()),
                    token_expires_at: Some(agent.token_expires_at),
                    message: None,
                }),
            )
        }
        Ok(_outcome) => {
            REGISTRATIONS.with_label_values(&["denied"]).inc();
            (
                StatusCode::FORBIDDEN,
                Json(RegisterResponseBody {
                    success: false,
                    agent_id: None,
                    auth_token: None,
                    token_expires_at: None,
                    message: Some("registration not admitted".to_string()),
                }),
            )
        }
        Err(err) => {
            REGISTRATIONS.with_label_values(&["error"]).inc();
            (
                StatusCode::BAD_REQUEST,
                Json(RegisterResponseBody {
                    success: false,
                    agent_id: None,
                    auth_token: None,
                    token_expires_at: None,
                    message: Some(err.to_string()),
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequestBody {
    pub status: AgentStatus,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponseBody {
    pub acknowledged: bool,
    pub pending_policies: Vec<String>,
    pub pending_commands: Vec<String>,
    pub next_heartbeat: i64,
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<HeartbeatRequestBody>,
) -> (StatusCode, Json<HeartbeatResponseBody>) {
    let pending_policies = state.distributor.pending_for_agent(&agent_id).await;
    match state
        .heartbeat
        .process_heartbeat(&agent_id, body.status, pending_policies, vec![])
        .await
    {
        Ok(response) => {
            HEARTBEATS.with_label_values(&["ok"]).inc();
            (
                StatusCode::OK,
                Json(HeartbeatResponseBody {
                    acknowledged: response.acknowledged,
                    pending_policies: response.pending_policies,
                    pending_commands: response.pending_commands,
                    next_heartbeat: response.next_heartbeat_seconds,
                }),
            )
        }
        Err(_) => {
            HEARTBEATS.with_label_values(&["agent_not_found"]).inc();
            (
                StatusCode::NOT_FOUND,
                Json(HeartbeatResponseBody {
                    acknowledged: false,
                    pending_policies: vec![],
                    pending_commands: vec![],
                    next_heartbeat: 0,
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AckRequestBody {
    pub version: u64,
    pub state: String,
    pub error: Option<String>,
}

/// Stale or duplicate `(distributionId, version)` acks are discarded
/// silently (spec §6 policy-push wire shape). An unrecognized `state` value
/// is rejected the same way: `BAD_REQUEST`, not a silent no-op.
async fn ack(
    State(state): State<AppState>,
    Path((distribution_id, agent_id)): Path<(String, String)>,
    Json(body): Json<AckRequestBody>,
) -> StatusCode {
    let ack = match body.state.as_str() {
        "acknowledged" => AckState::Acknowledged,
        "completed" => AckState::Completed,
        "failed" => AckState::Failed,
        _ => return StatusCode::BAD_REQUEST,
    };
    let accepted = state
        .distributor
        .record_ack(&distribution_id, &agent_id, body.version, ack, body.error)
        .await;
    if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}
