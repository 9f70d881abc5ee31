//! CLI command implementations. Each module's `run`/`*` functions mirror the
//! teacher's `commands/check.rs`/`commands/list.rs` shape: build or borrow
//! the components they need, print operator-facing output, return
//! `anyhow::Result<()>`.

pub mod distribute;
pub mod policy;
pub mod registry;
pub mod report;
pub mod token;
pub mod version;

use agentfleet::api::AppState;
use agentfleet::audit::AuditStore;
use agentfleet::auth::access::{default_policies, AccessController};
use agentfleet::auth::token::TokenProvider;
use agentfleet::auth::users::UserDirectory;
use agentfleet::compliance::ComplianceReporter;
use agentfleet::config::FleetConfig;
use agentfleet::distributor::PolicyDistributor;
use agentfleet::heartbeat::HeartbeatMonitor;
use agentfleet::policy::store::PolicyStore;
use agentfleet::registration::RegistrationService;
use agentfleet::registry::AgentRegistry;
use std::sync::Arc;

/// Everything a CLI command needs, wired once from a [`FleetConfig`]. Stands
/// in for the per-command `kube::Client::try_default()` the teacher builds
/// inline — here the equivalent "connection" is the in-process component
/// graph plus the on-disk policy directory.
pub struct Context {
    pub state: AppState,
}

impl Context {
    pub async fn build(config: &FleetConfig) -> anyhow::Result<Self> {
        let registry = AgentRegistry::new(config.registry.clone());
        let registration = RegistrationService::new(config.registration.clone(), registry.clone());
        let heartbeat = HeartbeatMonitor::new(config.heartbeat.clone(), registry.clone());
        let distributor = PolicyDistributor::new(config.distributor.clone(), registry.clone());
        let audit = AuditStore::new(config.audit_retention.clone());
        let compliance = ComplianceReporter::new(
            config.compliance.clone(),
            registry.clone(),
            distributor.clone(),
            audit.clone(),
        );
        let policies = PolicyStore::new(config.policy_dir.clone());
        let tokens = TokenProvider::new(config.token.clone());
        let users = UserDirectory::new();
        let access = AccessController::new(
            config.access_controller.clone(),
            default_policies(),
            tokens.clone(),
            users.clone(),
        );

        Ok(Context {
            state: AppState {
                registry,
                registration,
                heartbeat,
                distributor,
                compliance,
                policies,
                audit,
                tokens,
                access,
                users,
            },
        })
    }
}
