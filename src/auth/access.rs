//! Access Controller: authorises each request by matching `(resource,
//! method)` to a policy and checking role/permission sets (spec §4.10).

use crate::auth::token::TokenProvider;
use crate::auth::users::UserDirectory;
use crate::model::Role;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewAgents,
    RegisterAgents,
    DeleteAgents,
    ViewPolicies,
    CreatePolicies,
    DeployPolicies,
    DeletePolicies,
    ViewReports,
    ViewAudit,
    ViewUsers,
    CreateUsers,
    DeleteUsers,
}

impl Role {
    pub fn permissions(self) -> HashSet<Permission> {
        use Permission::*;
        match self {
            Role::Admin => HashSet::from([
                ViewAgents, RegisterAgents, DeleteAgents, ViewPolicies, CreatePolicies,
                DeployPolicies, DeletePolicies, ViewReports, ViewAudit, ViewUsers, CreateUsers,
                DeleteUsers,
            ]),
            Role::Operator => HashSet::from([
                ViewAgents, RegisterAgents, ViewPolicies, CreatePolicies, DeployPolicies,
                ViewReports, ViewAudit,
            ]),
            Role::Viewer => HashSet::from([ViewAgents, ViewPolicies, ViewReports, ViewAudit]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub pattern: Vec<String>,
    pub methods: Vec<Method>,
    pub required_permissions: Vec<Permission>,
}

/// Segment-wise match: literal segments must match verbatim, `{name}`
/// matches exactly one segment, a trailing `*` matches the remaining tail.
pub fn path_matches(pattern: &[String], resource: &[String]) -> bool {
    let mut pi = 0;
    let mut ri = 0;
    while pi < pattern.len() {
        let seg = &pattern[pi];
        if seg == "*" {
            return true;
        }
        if ri >= resource.len() {
            return false;
        }
        let is_placeholder = seg.starts_with('{') && seg.ends_with('}');
        if !is_placeholder && seg != &resource[ri] {
            return false;
        }
        pi += 1;
        ri += 1;
    }
    pi == pattern.len() && ri == resource.len()
}

fn split_path(resource: &str) -> Vec<String> {
    resource.trim_start_matches('/').split('/').map(str::to_string).collect()
}

impl AccessPolicy {
    pub fn new(pattern: &str, methods: &[Method], required_permissions: &[Permission]) -> Self {
        AccessPolicy {
            pattern: split_path(pattern),
            methods: methods.to_vec(),
            required_permissions: required_permissions.to_vec(),
        }
    }

    fn matches(&self, resource: &str, method: Method) -> bool {
        self.methods.contains(&method) && path_matches(&self.pattern, &split_path(resource))
    }
}

/// Default RBAC table from spec §6.
pub fn default_policies() -> Vec<AccessPolicy> {
    use Method::*;
    use Permission::*;
    vec![
        AccessPolicy::new("/health", &[Get], &[]),
        AccessPolicy::new("/agents", &[Get], &[ViewAgents]),
        AccessPolicy::new("/agents", &[Post], &[RegisterAgents]),
        AccessPolicy::new("/agents", &[Delete], &[DeleteAgents]),
        AccessPolicy::new("/agents/{id}", &[Get], &[ViewAgents]),
        AccessPolicy::new("/agents/{id}", &[Delete], &[DeleteAgents]),
        AccessPolicy::new("/policies", &[Get], &[ViewPolicies]),
        AccessPolicy::new("/policies", &[Post], &[CreatePolicies]),
        AccessPolicy::new("/policies", &[Delete], &[DeletePolicies]),
        AccessPolicy::new("/policies/{name}/deploy", &[Post], &[DeployPolicies]),
        AccessPolicy::new("/reports/*", &[Get], &[ViewReports]),
        AccessPolicy::new("/audit", &[Get], &[ViewAudit]),
        AccessPolicy::new("/users", &[Get], &[ViewUsers]),
        AccessPolicy::new("/users", &[Post], &[CreateUsers]),
        AccessPolicy::new("/users", &[Delete], &[DeleteUsers]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    Forbidden,
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub token: Option<String>,
    pub resource: String,
    pub method: Method,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AccessResult {
    pub granted: bool,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    username: String,
    role: Role,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub resource: String,
    pub granted: bool,
    pub user_id: Option<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Copy)]
pub struct AccessControllerConfig {
    pub log_all_access: bool,
    pub log_denied_access: bool,
    pub max_audit_entries: usize,
}

impl Default for AccessControllerConfig {
    fn default() -> Self {
        AccessControllerConfig {
            log_all_access: true,
            log_denied_access: true,
            max_audit_entries: 1000,
        }
    }
}

struct Inner {
    sessions: HashMap<String, Session>,
    audit: VecDeque<AuditEntry>,
}

pub struct AccessController {
    config: AccessControllerConfig,
    policies: Vec<AccessPolicy>,
    tokens: Arc<TokenProvider>,
    users: Arc<UserDirectory>,
    inner: Mutex<Inner>,
}

impl AccessController {
    pub fn new(
        config: AccessControllerConfig,
        policies: Vec<AccessPolicy>,
        tokens: Arc<TokenProvider>,
        users: Arc<UserDirectory>,
    ) -> Arc<Self> {
        Arc::new(AccessController {
            config,
            policies,
            tokens,
            users,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                audit: VecDeque::new(),
            }),
        })
    }

    async fn record(&self, resource: &str, granted: bool, user_id: Option<String>, reason: Option<DenialReason>) {
        if !(self.config.log_all_access || (self.config.log_denied_access && !granted)) {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.audit.push_back(AuditEntry {
            at: Utc::now(),
            resource: resource.to_string(),
            granted,
            user_id,
            denial_reason: reason,
        });
        while inner.audit.len() > self.config.max_audit_entries {
            inner.audit.pop_front();
        }
    }

    pub async fn validate(&self, request: AccessRequest) -> AccessResult {
        let matching: Vec<&AccessPolicy> = self
            .policies
            .iter()
            .filter(|p| p.matches(&request.resource, request.method))
            .collect();

        if matching.is_empty() {
            self.record(&request.resource, false, None, Some(DenialReason::Forbidden)).await;
            return AccessResult {
                granted: false,
                user_id: None,
                username: None,
                role: None,
                denial_reason: Some(DenialReason::Forbidden),
            };
        }

        if matching.iter().all(|p| p.required_permissions.is_empty()) {
            self.record(&request.resource, true, None, None).await;
            return AccessResult {
                granted: true,
                user_id: None,
                username: None,
                role: None,
                denial_reason: None,
            };
        }

        let Some(token) = &request.token else {
            self.record(&request.resource, false, None, Some(DenialReason::Unauthorized)).await;
            return AccessResult {
                granted: false,
                user_id: None,
                username: None,
                role: None,
                denial_reason: Some(DenialReason::Unauthorized),
            };
        };

        let claims = match self.tokens.validate(token).await {
            Ok(c) => c,
            Err(_) => {
                self.record(&request.resource, false, None, Some(DenialReason::Unauthorized)).await;
                return AccessResult {
                    granted: false,
                    user_id: None,
                    username: None,
                    role: None,
                    denial_reason: Some(DenialReason::Unauthorized),
                };
            }
        };

        if !self.users.is_active(&claims.sub).await {
            self.record(&request.resource, false, Some(claims.sub.clone()), Some(DenialReason::Unauthorized))
                .await;
            return AccessResult {
                granted: false,
                user_id: Some(claims.sub),
                username: Some(claims.username),
                role: Some(claims.role),
                denial_reason: Some(DenialReason::Unauthorized),
            };
        }

        let user_permissions = claims.role.permissions();
        for policy in &matching {
            for required in &policy.required_permissions {
                if !user_permissions.contains(required) {
                    self.record(&request.resource, false, Some(claims.sub.clone()), Some(DenialReason::Forbidden))
                        .await;
                    return AccessResult {
                        granted: false,
                        user_id: Some(claims.sub),
                        username: Some(claims.username),
                        role: Some(claims.role),
                        denial_reason: Some(DenialReason::Forbidden),
                    };
                }
            }
        }

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            claims.sub.clone(),
            Session {
                user_id: claims.sub.clone(),
                username: claims.username.clone(),
                role: claims.role,
            },
        );
        drop(inner);

        self.record(&request.resource, true, Some(claims.sub.clone()), None).await;

        AccessResult {
            granted: true,
            user_id: Some(claims.sub),
            username: Some(claims.username),
            role: Some(claims.role),
            denial_reason: None,
        }
    }

    pub async fn check_permission(&self, token: &str, permission: Permission) -> bool {
        match self.tokens.validate(token).await {
            Ok(claims) => claims.role.permissions().contains(&permission),
            Err(_) => false,
        }
    }

    pub async fn check_role(&self, token: &str, minimum: Role) -> bool {
        match self.tokens.validate(token).await {
            Ok(claims) => claims.role.level() >= minimum.level(),
            Err(_) => false,
        }
    }

    pub async fn invalidate_session(&self, user_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(user_id);
    }

    pub async fn recent_audit_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner.audit.iter().rev().take(limit).cloned().collect()
    }

    pub async fn denied_access_attempts(&self, limit: usize) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner.audit.iter().rev().filter(|e| !e.granted).take(limit).cloned().collect()
    }
}
