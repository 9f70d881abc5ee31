use agentfleet::api::AppState;
use agentfleet::auth::access::{default_policies, AccessController};
use agentfleet::auth::token::TokenProvider;
use agentfleet::auth::users::UserDirectory;
use agentfleet::compliance::ComplianceReporter;
use agentfleet::config::FleetConfig;
use agentfleet::distributor::PolicyDistributor;
use agentfleet::heartbeat::HeartbeatMonitor;
use agentfleet::model::{
    AgentIdentity, Policy, PolicyRule, Priority, Role, RuleAction, RuleTarget, Schedule, User,
};
use agentfleet::policy::store::PolicyStore;
use agentfleet::registration::RegistrationService;
use agentfleet::registry::AgentRegistry;
use chrono::Utc;
use std::collections::BTreeSet;

/// Builds a fully wired `AppState` against an isolated policy directory,
/// the same component graph `commands::Context::build` assembles for the
/// CLI, minus the on-disk config file.
pub fn test_state() -> AppState {
    let config = FleetConfig::default();
    let policy_dir = std::env::temp_dir().join(format!("agentfleet-it-{}", uuid::Uuid::new_v4()));

    let registry = AgentRegistry::new(config.registry.clone());
    let registration = RegistrationService::new(config.registration.clone(), registry.clone());
    let heartbeat = HeartbeatMonitor::new(config.heartbeat.clone(), registry.clone());
    let distributor = PolicyDistributor::new(config.distributor.clone(), registry.clone());
    let audit = agentfleet::audit::AuditStore::new(config.audit_retention.clone());
    let compliance = ComplianceReporter::new(
        config.compliance.clone(),
        registry.clone(),
        distributor.clone(),
        audit.clone(),
    );
    let policies = PolicyStore::new(policy_dir);
    let tokens = TokenProvider::new(config.token.clone());
    let users = UserDirectory::new();
    let access = AccessController::new(
        config.access_controller.clone(),
        default_policies(),
        tokens.clone(),
        users.clone(),
    );

    AppState {
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
    }
}

pub fn make_identity(id: &str, hostname: &str, tags: &[&str]) -> AgentIdentity {
    AgentIdentity {
        id: id.to_string(),
        hostname: hostname.to_string(),
        os_version: "14.5".to_string(),
        app_version: "2.0.0".to_string(),
        hardware_model: "Mac15,6".to_string(),
        serial_hash: format!("hash-{id}"),
        username: "operator".to_string(),
        registered_at: Utc::now(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn make_policy(name: &str, priority: Priority, rule_ids: &[&str]) -> Policy {
    let now = Utc::now();
    Policy {
        schema_version: "1.0".to_string(),
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        rules: rule_ids
            .iter()
            .map(|id| PolicyRule {
                id: id.to_string(),
                target: RuleTarget::SystemCaches,
                action: RuleAction::Clean,
                schedule: Schedule::Manual,
                enabled: true,
                conditions: None,
                description: None,
            })
            .collect(),
        exclusions: Vec::new(),
        notifications: false,
        priority,
        enabled: true,
        tags: BTreeSet::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Registers an agent directly through the registry, bypassing the HTTP
/// admission path, and returns its auth token for use in request headers.
pub async fn registered_agent(state: &AppState, id: &str, hostname: &str, tags: &[&str]) -> String {
    let identity = make_identity(id, hostname, tags);
    let agent = state
        .registry
        .register(identity, BTreeSet::new())
        .await
        .expect("registry accepts a fresh identity");
    agent.auth_token
}

/// Issues a bearer token for an operator-facing request at the given role.
pub async fn operator_token(state: &AppState, username: &str, role: Role) -> String {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        role,
        active: true,
    };
    state.users.upsert(user.clone()).await;
    state
        .tokens
        .generate_token_pair(&user)
        .await
        .expect("token generation")
        .access_token
}
