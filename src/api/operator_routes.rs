//! Operator-facing RBAC-gated endpoints (spec §6 resource table).

use crate::api::agent_routes::{RegisterRequestBody, RegisterResponseBody};
use crate::api::middleware::authorize;
use crate::api::AppState;
use crate::audit::AuditEventQuery;
use crate::auth::access::Method;
use crate::model::{DistributionTarget, Policy, Role, User};
use crate::registration::RegistrationRequest;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(register_agent).delete(delete_agents))
        .route("/agents/:id", get(get_agent).delete(delete_agent))
        .route("/policies", get(list_policies).post(create_policy).delete(delete_policies))
        .route("/policies/:name", get(get_policy))
        .route("/policies/:name/deploy", post(deploy_policy))
        .route("/reports/fleet", get(report_fleet))
        .route("/reports/agent/:id", get(report_agent))
        .route("/reports/policy-execution/:distribution_id", get(report_policy_execution))
        .route("/audit", get(list_audit))
        .route("/users", post(issue_token))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

async fn list_agents(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/agents", Method::Get).await?;
    let agents = state.registry.all_agents().await;
    Ok(Json(serde_json::to_value(agents).unwrap_or_default()))
}

async fn get_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/agents/{id}", Method::Get).await?;
    let agent = state.registry.agent_by_id(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_default()))
}

async fn delete_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    authorize(&state, &headers, "/agents/{id}", Method::Delete).await?;
    state.registry.unregister(&id).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Operator-initiated registration, same admission path as the agent-facing
/// `/api/v1/register` — an operator pre-provisioning a machine goes through
/// the identical `RegistrationService` gate, not a bypass of it.
async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequestBody>,
) -> Result<(StatusCode, Json<RegisterResponseBody>), StatusCode> {
    authorize(&state, &headers, "/agents", Method::Post).await?;

    let request = RegistrationRequest {
        identity: body.identity,
        capabilities: body.capabilities.into_iter().collect::<BTreeSet<_>>(),
    };
    match state.registration.process_registration(request).await {
        Ok(outcome) if outcome.admitted => {
            let agent = outcome.agent.expect("admitted outcome carries an agent");
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponseBody {
                    success: true,
                    agent_id: Some(agent.identity.id.clone()),
                    auth_token: Some(agent.auth_token.clone()),
                    token_expires_at: Some(agent.token_expires_at),
                    message: None,
                }),
            ))
        }
        Ok(_outcome) => Ok((
            StatusCode::FORBIDDEN,
            Json(RegisterResponseBody {
                success: false,
                agent_id: None,
                auth_token: None,
                token_expires_at: None,
                message: Some("registration not admitted".to_string()),
            }),
        )),
        Err(err) => Ok((
            StatusCode::BAD_REQUEST,
            Json(RegisterResponseBody {
                success: false,
                agent_id: None,
                auth_token: None,
                token_expires_at: None,
                message: Some(err.to_string()),
            }),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct BulkAgentIdsBody {
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BulkDeleteResponseBody {
    deleted: Vec<String>,
    not_found: Vec<String>,
}

async fn delete_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkAgentIdsBody>,
) -> Result<Json<BulkDeleteResponseBody>, StatusCode> {
    authorize(&state, &headers, "/agents", Method::Delete).await?;

    let mut deleted = Vec::new();
    let mut not_found = Vec::new();
    for id in body.ids {
        match state.registry.unregister(&id).await {
            Ok(()) => deleted.push(id),
            Err(_) => not_found.push(id),
        }
    }
    Ok(Json(BulkDeleteResponseBody { deleted, not_found }))
}

async fn list_policies(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/policies", Method::Get).await?;
    let policies = state.policies.list().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::to_value(policies).unwrap_or_default()))
}

async fn get_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/policies", Method::Get).await?;
    let policy = state.policies.get(&name).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(policy).unwrap_or_default()))
}

async fn create_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(policy): Json<Policy>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<ErrorBody>)> {
    authorize(&state, &headers, "/policies", Method::Post)
        .await
        .map_err(|code| (code, Json(ErrorBody { message: "access denied".to_string() })))?;
    let saved = state
        .policies
        .save(policy, false)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorBody { message: e.to_string() })))?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(saved).unwrap_or_default())))
}

#[derive(Debug, Deserialize)]
struct BulkPolicyNamesBody {
    names: Vec<String>,
}

async fn delete_policies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkPolicyNamesBody>,
) -> Result<Json<BulkDeleteResponseBody>, StatusCode> {
    authorize(&state, &headers, "/policies", Method::Delete).await?;

    let mut deleted = Vec::new();
    let mut not_found = Vec::new();
    for name in body.names {
        match state.policies.delete(&name).await {
            Ok(()) => deleted.push(name),
            Err(_) => not_found.push(name),
        }
    }
    Ok(Json(BulkDeleteResponseBody { deleted, not_found }))
}

#[derive(Debug, Deserialize)]
struct DeployRequestBody {
    #[serde(default)]
    target: Option<DistributionTargetBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DistributionTargetBody {
    All,
    Agents(Vec<String>),
    Tags(Vec<String>),
}

#[derive(Debug, Serialize)]
struct DeployResponseBody {
    distribution_id: String,
}

async fn deploy_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Option<Json<DeployRequestBody>>,
) -> Result<Json<DeployResponseBody>, (StatusCode, Json<ErrorBody>)> {
    authorize(&state, &headers, "/policies/{name}/deploy", Method::Post)
        .await
        .map_err(|code| (code, Json(ErrorBody { message: "access denied".to_string() })))?;

    let target = match body.and_then(|Json(b)| b.target) {
        Some(DistributionTargetBody::All) | None => DistributionTarget::All,
        Some(DistributionTargetBody::Agents(ids)) => DistributionTarget::Agents(ids.into_iter().collect()),
        Some(DistributionTargetBody::Tags(tags)) => DistributionTarget::Tags(tags.into_iter().collect()),
    };

    let distribution_id = state
        .distributor
        .distribute(&name, target)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ErrorBody { message: e.to_string() })))?;

    Ok(Json(DeployResponseBody { distribution_id }))
}

async fn report_fleet(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/reports/fleet", Method::Get).await?;
    let report = state.compliance.generate_fleet_overview(None).await;
    Ok(Json(crate::compliance::ComplianceReporter::export_fleet_overview_json(&report)))
}

async fn report_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/reports/agent/{id}", Method::Get).await?;
    let score = state.compliance.calculate_score(&id).await.map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(score).unwrap_or_default()))
}

async fn report_policy_execution(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(distribution_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/reports/policy-execution/{distribution_id}", Method::Get).await?;
    let report = state
        .compliance
        .generate_policy_execution_report(&distribution_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::json!({
        "policyName": report.policy_name,
        "version": report.version,
        "totalTargetedAgents": report.total_targeted_agents,
        "perAgentStatus": report.per_agent_status,
        "successRate": report.success_rate,
    })))
}

#[derive(Debug, Deserialize)]
struct AuditQueryParams {
    category: Option<String>,
    limit: Option<usize>,
}

async fn list_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers, "/audit", Method::Get).await?;
    let category = params
        .category
        .as_deref()
        .and_then(|c| serde_json::from_value(serde_json::Value::String(c.to_string())).ok());
    let query = AuditEventQuery {
        category,
        limit: params.limit,
        ..Default::default()
    };
    let events = state.audit.query(&query).await;
    Ok(Json(serde_json::to_value(events).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct IssueTokenRequestBody {
    username: String,
    role: Role,
}

async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IssueTokenRequestBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    authorize(&state, &headers, "/users", Method::Post)
        .await
        .map_err(|code| (code, Json(ErrorBody { message: "access denied".to_string() })))?;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: body.username,
        role: body.role,
        active: true,
    };
    state.users.upsert(user.clone()).await;
    let pair = state
        .tokens
        .generate_token_pair(&user)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { message: e.to_string() })))?;
    Ok(Json(serde_json::to_value(pair).unwrap_or_default()))
}
