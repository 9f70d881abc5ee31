//! Agent Registry: the authoritative fleet table (spec §4.4).

use crate::model::{AgentIdentity, AgentStatus, ConnectionState, Health, RegisteredAgent};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("maximum agent count reached")]
    MaxAgentsReached,
    #[error("agent already registered")]
    AgentAlreadyRegistered,
    #[error("agent not found")]
    AgentNotFound,
    #[error("invalid token")]
    InvalidToken,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub token_validity: Duration,
    pub max_agents: usize,
    pub allow_reregistration: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            token_validity: Duration::hours(24),
            max_agents: 100_000,
            allow_reregistration: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStatistics {
    pub total_agents: usize,
    pub active_agents: usize,
    pub offline_agents: usize,
    pub pending_agents: usize,
    pub healthy_agents: usize,
    pub warning_agents: usize,
    pub critical_agents: usize,
}

struct Inner {
    by_id: HashMap<String, RegisteredAgent>,
    token_to_id: HashMap<String, String>,
}

/// Single-mutex-serialised fleet table; id map and token map are always
/// updated together so they never disagree (spec §8 property 1).
pub struct AgentRegistry {
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

impl AgentRegistry {
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new(AgentRegistry {
            config,
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                token_to_id: HashMap::new(),
            }),
        })
    }

    pub async fn register(
        &self,
        identity: AgentIdentity,
        capabilities: BTreeSet<String>,
    ) -> Result<RegisteredAgent, RegistryError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        if let Some(existing) = inner.by_id.get(&identity.id).cloned() {
            if !self.config.allow_reregistration {
                return Err(RegistryError::AgentAlreadyRegistered);
            }
            inner.token_to_id.remove(&existing.auth_token);
            let token = new_token();
            let agent = RegisteredAgent {
                identity,
                auth_token: token.clone(),
                token_expires_at: now + self.config.token_validity,
                capabilities,
                state: ConnectionState::Active,
                last_heartbeat: existing.last_heartbeat,
                registered_at: existing.registered_at,
                latest_status: existing.latest_status,
            };
            inner.by_id.insert(agent.identity.id.clone(), agent.clone());
            inner.token_to_id.insert(token, agent.identity.id.clone());
            return Ok(agent);
        }

        if inner.by_id.len() >= self.config.max_agents {
            return Err(RegistryError::MaxAgentsReached);
        }

        let token = new_token();
        let agent = RegisteredAgent {
            identity,
            auth_token: token.clone(),
            token_expires_at: now + self.config.token_validity,
            capabilities,
            state: ConnectionState::Pending,
            last_heartbeat: None,
            registered_at: now,
            latest_status: None,
        };
        inner.by_id.insert(agent.identity.id.clone(), agent.clone());
        inner.token_to_id.insert(token, agent.identity.id.clone());
        Ok(agent)
    }

    pub async fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let agent = inner.by_id.remove(id).ok_or(RegistryError::AgentNotFound)?;
        inner.token_to_id.remove(&agent.auth_token);
        Ok(())
    }

    pub async fn agent_by_id(&self, id: &str) -> Option<RegisteredAgent> {
        let inner = self.inner.lock().await;
        inner.by_id.get(id).cloned()
    }

    pub async fn agent_by_token(&self, token: &str) -> Option<RegisteredAgent> {
        let inner = self.inner.lock().await;
        let id = inner.token_to_id.get(token)?;
        inner.by_id.get(id).cloned()
    }

    pub async fn all_agents(&self) -> Vec<RegisteredAgent> {
        let inner = self.inner.lock().await;
        inner.by_id.values().cloned().collect()
    }

    pub async fn agents_with_state(&self, state: ConnectionState) -> Vec<RegisteredAgent> {
        let inner = self.inner.lock().await;
        inner.by_id.values().filter(|a| a.state == state).cloned().collect()
    }

    pub async fn agents_with_tag(&self, tag: &str) -> Vec<RegisteredAgent> {
        let inner = self.inner.lock().await;
        inner
            .by_id
            .values()
            .filter(|a| a.identity.tags.contains(tag))
            .cloned()
            .collect()
    }

    pub async fn agents_with_capability(&self, capability: &str) -> Vec<RegisteredAgent> {
        let inner = self.inner.lock().await;
        inner
            .by_id
            .values()
            .filter(|a| a.capabilities.contains(capability))
            .cloned()
            .collect()
    }

    pub async fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let agent = inner.by_id.get_mut(id).ok_or(RegistryError::AgentNotFound)?;
        agent.latest_status = Some(status);
        agent.last_heartbeat = Some(Utc::now());
        Ok(())
    }

    pub async fn mark_offline(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let agent = inner.by_id.get_mut(id).ok_or(RegistryError::AgentNotFound)?;
        agent.state = ConnectionState::Offline;
        Ok(())
    }

    pub async fn mark_active(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        let agent = inner.by_id.get_mut(id).ok_or(RegistryError::AgentNotFound)?;
        agent.state = ConnectionState::Active;
        Ok(())
    }

    pub async fn validate_token(&self, token: &str) -> Result<String, RegistryError> {
        let inner = self.inner.lock().await;
        let id = inner.token_to_id.get(token).ok_or(RegistryError::InvalidToken)?;
        let agent = inner.by_id.get(id).ok_or(RegistryError::InvalidToken)?;
        let now = Utc::now();
        if agent.is_token_expired(now) {
            return Err(RegistryError::InvalidToken);
        }
        if !matches!(agent.state, ConnectionState::Active | ConnectionState::Pending) {
            return Err(RegistryError::InvalidToken);
        }
        Ok(id.clone())
    }

    pub async fn refresh_token(&self, id: &str) -> Result<String, RegistryError> {
        let mut inner = self.inner.lock().await;
        let agent = inner.by_id.get(id).cloned().ok_or(RegistryError::AgentNotFound)?;
        let new_tok = new_token();
        inner.token_to_id.remove(&agent.auth_token);
        inner.token_to_id.insert(new_tok.clone(), id.to_string());
        let entry = inner.by_id.get_mut(id).unwrap();
        entry.auth_token = new_tok.clone();
        entry.token_expires_at = Utc::now() + self.config.token_validity;
        Ok(new_tok)
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let inner = self.inner.lock().await;
        let mut stats = RegistryStatistics::default();
        stats.total_agents = inner.by_id.len();
        for agent in inner.by_id.values() {
            match agent.state {
                ConnectionState::Active => stats.active_agents += 1,
                ConnectionState::Offline | ConnectionState::Disconnected => stats.offline_agents += 1,
                ConnectionState::Pending => stats.pending_agents += 1,
                ConnectionState::Rejected => {}
            }
            if let Some(status) = &agent.latest_status {
                match status.health {
                    Health::Healthy => stats.healthy_agents += 1,
                    Health::Warning => stats.warning_agents += 1,
                    Health::Critical => stats.critical_agents += 1,
                    Health::Unknown => {}
                }
            }
        }
        stats
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

pub fn last_heartbeat_age(agent: &RegisteredAgent, now: DateTime<Utc>) -> Option<Duration> {
    agent.last_heartbeat.map(|t| now - t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn make_identity(id: &str) -> AgentIdentity {
        AgentIdentity {
            id: id.to_string(),
            hostname: format!("{id}.local"),
            os_version: "14.5".to_string(),
            app_version: "1.0.0".to_string(),
            hardware_model: "Mac14,2".to_string(),
            serial_hash: "hash".to_string(),
            username: "alice".to_string(),
            registered_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn register_creates_pending_agent_with_token() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let agent = registry
            .register(make_identity("a1"), BTreeSet::from(["cleanup".to_string()]))
            .await
            .unwrap();
        assert_eq!(agent.state, ConnectionState::Pending);
        assert!(!agent.auth_token.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_past_max_agents() {
        let registry = AgentRegistry::new(RegistryConfig {
            max_agents: 1,
            ..RegistryConfig::default()
        });
        registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        let err = registry.register(make_identity("a2"), BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::MaxAgentsReached));
    }

    #[tokio::test]
    async fn reregistration_issues_fresh_token_when_allowed() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let first = registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        let second = registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        assert_ne!(first.auth_token, second.auth_token);
        assert_eq!(second.registered_at, first.registered_at);
        assert_eq!(registry.all_agents().await.len(), 1);
    }

    #[tokio::test]
    async fn reregistration_rejected_when_disallowed() {
        let registry = AgentRegistry::new(RegistryConfig {
            allow_reregistration: false,
            ..RegistryConfig::default()
        });
        registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        let err = registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::AgentAlreadyRegistered));
    }

    #[tokio::test]
    async fn token_and_id_maps_agree_bijection() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let agent = registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        let by_token = registry.agent_by_token(&agent.auth_token).await.unwrap();
        assert_eq!(by_token.identity.id, agent.identity.id);
        registry.refresh_token(&agent.identity.id).await.unwrap();
        assert!(registry.agent_by_token(&agent.auth_token).await.is_none());
    }

    #[tokio::test]
    async fn validate_token_rejects_unknown_token() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let err = registry.validate_token("bogus").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidToken));
    }

    #[tokio::test]
    async fn unregister_removes_agent_and_token() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        let agent = registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        registry.unregister("a1").await.unwrap();
        assert!(registry.agent_by_id("a1").await.is_none());
        assert!(registry.agent_by_token(&agent.auth_token).await.is_none());
    }

    #[tokio::test]
    async fn statistics_counts_by_state() {
        let registry = AgentRegistry::new(RegistryConfig::default());
        registry.register(make_identity("a1"), BTreeSet::new()).await.unwrap();
        registry.register(make_identity("a2"), BTreeSet::new()).await.unwrap();
        registry.mark_active("a1").await.unwrap();
        registry.mark_offline("a2").await.unwrap();
        let stats = registry.statistics().await;
        assert_eq!(stats.total_agents, 2);
        assert_eq!(stats.active_agents, 1);
        assert_eq!(stats.offline_agents, 1);
    }
}
