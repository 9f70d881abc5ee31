//! HTTP API layer (spec §6 external interfaces). Router assembly, metrics,
//! and graceful shutdown follow the teacher's `commands/webhook.rs` pattern:
//! a static Prometheus registry, a `/metrics` + `/healthz` pair, and a
//! `broadcast`-channel shutdown signal awaited alongside `ctrl_c()`.

pub mod agent_routes;
pub mod middleware;
pub mod operator_routes;

use crate::audit::AuditStore;
use crate::auth::access::AccessController;
use crate::auth::token::TokenProvider;
use crate::auth::users::UserDirectory;
use crate::compliance::ComplianceReporter;
use crate::distributor::PolicyDistributor;
use crate::heartbeat::HeartbeatMonitor;
use crate::policy::store::PolicyStore;
use crate::registration::RegistrationService;
use crate::registry::AgentRegistry;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::broadcast;

pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fleet_http_requests_total", "Total HTTP requests handled"),
        &["route", "status"],
    )
    .expect("metric registration");
    METRICS_REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static REGISTRATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fleet_registrations_total", "Total agent registration attempts"),
        &["outcome"],
    )
    .expect("metric registration");
    METRICS_REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static HEARTBEATS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fleet_heartbeats_total", "Total heartbeats processed"),
        &["result"],
    )
    .expect("metric registration");
    METRICS_REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static ACCESS_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fleet_access_denials_total", "Denied operator requests"),
        &["reason"],
    )
    .expect("metric registration");
    METRICS_REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

pub static DISTRIBUTION_ACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fleet_distribution_acks_total", "Agent distribution acknowledgements received"),
        &["state"],
    )
    .expect("metric registration");
    METRICS_REGISTRY.register(Box::new(counter.clone())).ok();
    counter
});

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub registration: Arc<RegistrationService>,
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub distributor: Arc<PolicyDistributor>,
    pub compliance: Arc<ComplianceReporter>,
    pub policies: Arc<PolicyStore>,
    pub audit: Arc<AuditStore>,
    pub tokens: Arc<TokenProvider>,
    pub access: Arc<AccessController>,
    pub users: Arc<UserDirectory>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest("/", agent_routes::router())
        .nest("/", operator_routes::router())
        .layer(middleware::from_fn(track_http_requests))
        .with_state(state)
}

/// Records `fleet_http_requests_total{route,status}` for every request.
/// The teacher increments its webhook counter inline inside the one handler
/// it has; this control plane fans out over many routes, so a single
/// `axum::middleware::from_fn` layer stands in for doing that by hand in
/// each handler.
async fn track_http_requests(request: Request, next: Next) -> Response {
    let route = request.uri().path().to_string();
    let response = next.run(request).await;
    HTTP_REQUESTS
        .with_label_values(&[&route, response.status().as_str()])
        .inc();
    response
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics() -> String {
    let encoder = TextEncoder::new();
    let families = METRICS_REGISTRY.gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}

/// Starts the combined agent-facing and operator-facing API, spawns the
/// heartbeat sweep and audit-retention background tasks, and blocks until
/// `ctrl_c()` or an explicit shutdown signal fires.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    state.heartbeat.start_monitoring();

    let audit = state.audit.clone();
    let mut sweep_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {
                    audit.sweep_retention().await;
                }
                _ = sweep_rx.recv() => break,
            }
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "http_server_started");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = shutdown_rx.recv() => {}
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_registry_accepts_increments() {
        HTTP_REQUESTS.with_label_values(&["/health", "200"]).inc();
        let families = METRICS_REGISTRY.gather();
        assert!(!families.is_empty());
    }
}
