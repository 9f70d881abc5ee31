//! Registration Service: wraps the Registry with an admission step (spec §4.5).

use crate::model::{AgentIdentity, RegisteredAgent};
use crate::registry::{AgentRegistry, RegistryError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionPolicy {
    Auto,
    Manual,
    Whitelist,
    HostnamePattern,
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub policy: AdmissionPolicy,
    pub whitelisted_serial_hashes: BTreeSet<String>,
    pub hostname_patterns: Vec<regex::Regex>,
    pub minimum_app_version: Option<String>,
    pub required_capabilities: BTreeSet<String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            policy: AdmissionPolicy::Auto,
            whitelisted_serial_hashes: BTreeSet::new(),
            hostname_patterns: Vec::new(),
            minimum_app_version: None,
            required_capabilities: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub identity: AgentIdentity,
    pub capabilities: BTreeSet<String>,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("app version {0} is older than the configured minimum")]
    VersionTooOld(String),
    #[error("missing required capabilities: {0:?}")]
    MissingCapabilities(BTreeSet<String>),
    #[error("registration is pending manual approval")]
    PendingApproval,
    #[error("registration denied by admission policy")]
    Denied,
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub admitted: bool,
    pub agent: Option<RegisteredAgent>,
}

/// Parses `major.minor.patch` and compares in semver order. Non-numeric
/// segments sort as lower than any numeric one.
fn version_less_than(a: &str, b: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
    }
    parts(a) < parts(b)
}

pub struct RegistrationService {
    config: RegistrationConfig,
    registry: Arc<AgentRegistry>,
    pending: Mutex<HashMap<String, RegistrationRequest>>,
}

impl RegistrationService {
    pub fn new(config: RegistrationConfig, registry: Arc<AgentRegistry>) -> Arc<Self> {
        Arc::new(RegistrationService {
            config,
            registry,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub async fn process_registration(
        &self,
        request: RegistrationRequest,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        if let Some(min_version) = &self.config.minimum_app_version {
            if version_less_than(&request.identity.app_version, min_version) {
                return Err(RegistrationError::VersionTooOld(request.identity.app_version.clone()));
            }
        }

        if !self.config.required_capabilities.is_subset(&request.capabilities) {
            let missing: BTreeSet<String> = self
                .config
                .required_capabilities
                .difference(&request.capabilities)
                .cloned()
                .collect();
            return Err(RegistrationError::MissingCapabilities(missing));
        }

        let admit = match self.config.policy {
            AdmissionPolicy::Auto => true,
            AdmissionPolicy::Manual => {
                let mut pending = self.pending.lock().await;
                pending.insert(request.identity.id.clone(), request.clone());
                return Ok(RegistrationOutcome {
                    admitted: false,
                    agent: None,
                });
            }
            AdmissionPolicy::Whitelist => self
                .config
                .whitelisted_serial_hashes
                .contains(&request.identity.serial_hash),
            AdmissionPolicy::HostnamePattern => self
                .config
                .hostname_patterns
                .iter()
                .any(|re| re.is_match(&request.identity.hostname)),
        };

        if !admit {
            return Ok(RegistrationOutcome {
                admitted: false,
                agent: None,
            });
        }

        let agent = self
            .registry
            .register(request.identity, request.capabilities)
            .await?;
        Ok(RegistrationOutcome {
            admitted: true,
            agent: Some(agent),
        })
    }

    pub async fn approve_manual_registration(
        &self,
        id: &str,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let request = {
            let mut pending = self.pending.lock().await;
            pending.remove(id)
        };
        let Some(request) = request else {
            return Err(RegistrationError::Denied);
        };
        let agent = self
            .registry
            .register(request.identity, request.capabilities)
            .await?;
        Ok(RegistrationOutcome {
            admitted: true,
            agent: Some(agent),
        })
    }

    pub async fn is_registration_pending(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use chrono::Utc;

    fn make_identity(id: &str, serial_hash: &str, hostname: &str, app_version: &str) -> AgentIdentity {
        AgentIdentity {
            id: id.to_string(),
            hostname: hostname.to_string(),
            os_version: "14.5".to_string(),
            app_version: app_version.to_string(),
            hardware_model: "Mac14,2".to_string(),
            serial_hash: serial_hash.to_string(),
            username: "alice".to_string(),
            registered_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    // S1: registration with capability floor
    #[tokio::test]
    async fn s1_missing_capabilities_rejected_with_set() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let config = RegistrationConfig {
            required_capabilities: BTreeSet::from(["cleanup".to_string(), "audit-logging".to_string()]),
            ..RegistrationConfig::default()
        };
        let service = RegistrationService::new(config, registry.clone());
        let request = RegistrationRequest {
            identity: make_identity("a1", "h", "host", "1.0.0"),
            capabilities: BTreeSet::from(["cleanup".to_string()]),
        };
        let err = service.process_registration(request).await.unwrap_err();
        match err {
            RegistrationError::MissingCapabilities(missing) => {
                assert_eq!(missing, BTreeSet::from(["audit-logging".to_string()]));
            }
            _ => panic!("wrong error: {err:?}"),
        }
        assert_eq!(registry.all_agents().await.len(), 0);
    }

    // S2: whitelist admission
    #[tokio::test]
    async fn s2_whitelist_admits_matching_hash_only() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let config = RegistrationConfig {
            policy: AdmissionPolicy::Whitelist,
            whitelisted_serial_hashes: BTreeSet::from(["allowed-hash".to_string()]),
            ..RegistrationConfig::default()
        };
        let service = RegistrationService::new(config, registry.clone());

        let allowed = RegistrationRequest {
            identity: make_identity("a1", "allowed-hash", "host1", "1.0.0"),
            capabilities: BTreeSet::new(),
        };
        let outcome = service.process_registration(allowed).await.unwrap();
        assert!(outcome.admitted);
        assert!(!outcome.agent.unwrap().auth_token.is_empty());

        let denied = RegistrationRequest {
            identity: make_identity("a2", "denied-hash", "host2", "1.0.0"),
            capabilities: BTreeSet::new(),
        };
        let outcome = service.process_registration(denied).await.unwrap();
        assert!(!outcome.admitted);
        assert!(outcome.agent.is_none());

        assert_eq!(registry.all_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn manual_policy_queues_pending_request() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let config = RegistrationConfig {
            policy: AdmissionPolicy::Manual,
            ..RegistrationConfig::default()
        };
        let service = RegistrationService::new(config, registry.clone());
        let request = RegistrationRequest {
            identity: make_identity("a1", "h", "host", "1.0.0"),
            capabilities: BTreeSet::new(),
        };
        let outcome = service.process_registration(request).await.unwrap();
        assert!(!outcome.admitted);
        assert!(service.is_registration_pending("a1").await);

        let approved = service.approve_manual_registration("a1").await.unwrap();
        assert!(approved.admitted);
        assert!(!service.is_registration_pending("a1").await);
    }

    #[tokio::test]
    async fn hostname_pattern_policy_matches_regex() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let config = RegistrationConfig {
            policy: AdmissionPolicy::HostnamePattern,
            hostname_patterns: vec![regex::Regex::new(r"^corp-.*\.local$").unwrap()],
            ..RegistrationConfig::default()
        };
        let service = RegistrationService::new(config, registry.clone());
        let ok = RegistrationRequest {
            identity: make_identity("a1", "h", "corp-laptop.local", "1.0.0"),
            capabilities: BTreeSet::new(),
        };
        assert!(service.process_registration(ok).await.unwrap().admitted);

        let bad = RegistrationRequest {
            identity: make_identity("a2", "h", "home-laptop.local", "1.0.0"),
            capabilities: BTreeSet::new(),
        };
        assert!(!service.process_registration(bad).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn version_floor_rejects_older_versions() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let config = RegistrationConfig {
            minimum_app_version: Some("2.0.0".to_string()),
            ..RegistrationConfig::default()
        };
        let service = RegistrationService::new(config, registry);
        let request = RegistrationRequest {
            identity: make_identity("a1", "h", "host", "1.9.9"),
            capabilities: BTreeSet::new(),
        };
        let err = service.process_registration(request).await.unwrap_err();
        assert!(matches!(err, RegistrationError::VersionTooOld(_)));
    }
}
