//! Policy Distributor: the heart of the control plane (spec §4.7).
//!
//! Resolves targets, stages a versioned rollout, tracks per-agent
//! acknowledgement with retry/timeout, and finalises or rolls back against a
//! minimum-success-rate. Per-distribution state is single-owner: methods on
//! one `DistributionStatus` never run concurrently with themselves, matching
//! the non-interior-reference rule of spec §5.

use crate::model::{
    AgentDistributionState, AgentDistributionStatus, DistributionFilter, DistributionOutcome,
    DistributionStatus, DistributionTarget, RegisteredAgent,
};
use crate::registry::AgentRegistry;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

/// The three states an agent's ack/apply-result message can carry (spec
/// §4.6/§6 wire shape: `state ∈ {acknowledged, completed, failed}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Acknowledged,
    Completed,
    Failed,
}

impl AckState {
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            AckState::Acknowledged => "acknowledged",
            AckState::Completed => "completed",
            AckState::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("no agents matched the distribution target")]
    NoTargetAgents,
    #[error("distribution '{0}' not found")]
    DistributionNotFound(String),
}

#[derive(Debug, Clone)]
pub struct DistributorConfig {
    pub max_concurrent_distributions: usize,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub acknowledgement_timeout: Duration,
    pub continue_on_failure: bool,
    pub minimum_success_rate: f64,
    pub auto_rollback_on_failure: bool,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        DistributorConfig {
            max_concurrent_distributions: 20,
            max_retry_attempts: 3,
            retry_delay: Duration::seconds(5),
            acknowledgement_timeout: Duration::seconds(30),
            continue_on_failure: true,
            minimum_success_rate: 90.0,
            auto_rollback_on_failure: false,
        }
    }
}

/// Pure resolution of a `DistributionTarget` against the current registry
/// snapshot (spec §4.7 "Target resolution").
pub fn resolve_target(target: &DistributionTarget, agents: &[RegisteredAgent]) -> Vec<RegisteredAgent> {
    match target {
        DistributionTarget::All => agents.to_vec(),
        DistributionTarget::Agents(ids) => agents
            .iter()
            .filter(|a| ids.contains(&a.identity.id))
            .cloned()
            .collect(),
        DistributionTarget::Tags(tags) => agents
            .iter()
            .filter(|a| tags.is_subset(&a.identity.tags))
            .cloned()
            .collect(),
        DistributionTarget::Capabilities(caps) => agents
            .iter()
            .filter(|a| caps.is_subset(&a.capabilities))
            .cloned()
            .collect(),
        DistributionTarget::Combined(targets) => {
            let mut seen = BTreeSet::new();
            let mut result = Vec::new();
            for t in targets {
                for agent in resolve_target(t, agents) {
                    if seen.insert(agent.identity.id.clone()) {
                        result.push(agent);
                    }
                }
            }
            result
        }
        DistributionTarget::Filter(filter) => resolve_filter(filter, agents),
    }
}

fn resolve_filter(filter: &DistributionFilter, agents: &[RegisteredAgent]) -> Vec<RegisteredAgent> {
    let mut result: Vec<RegisteredAgent> = agents
        .iter()
        .filter(|a| filter.required_tags.is_subset(&a.identity.tags))
        .filter(|a| !filter.excluded_agents.contains(&a.identity.id))
        .filter(|a| match filter.required_connection_state {
            Some(state) => a.state == state,
            None => true,
        })
        .cloned()
        .collect();
    if let Some(max) = filter.max_agents {
        result.truncate(max);
    }
    result
}

/// Per-policy monotonic rollout-version counter (spec §4.7, §8 property 4).
struct VersionCounters {
    by_policy: HashMap<String, u64>,
}

impl VersionCounters {
    fn next(&mut self, policy_name: &str) -> u64 {
        let counter = self.by_policy.entry(policy_name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

struct Inner {
    active: HashMap<String, DistributionStatus>,
    history: HashMap<String, VecDeque<DistributionStatus>>,
    versions: VersionCounters,
    cancelled: BTreeSet<String>,
}

pub const MAX_HISTORY_PER_POLICY: usize = 100;

pub struct PolicyDistributor {
    config: DistributorConfig,
    registry: Arc<AgentRegistry>,
    inner: Mutex<Inner>,
    semaphore: Arc<Semaphore>,
}

impl PolicyDistributor {
    pub fn new(config: DistributorConfig, registry: Arc<AgentRegistry>) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_distributions));
        Arc::new(PolicyDistributor {
            config,
            registry,
            inner: Mutex::new(Inner {
                active: HashMap::new(),
                history: HashMap::new(),
                versions: VersionCounters {
                    by_policy: HashMap::new(),
                },
                cancelled: BTreeSet::new(),
            }),
            semaphore,
        })
    }

    /// Stages a new rollout and returns its id immediately; per-agent
    /// dispatch happens via `dispatch_all` (kept separate so tests can drive
    /// the state machine without a real transport).
    pub async fn distribute(
        &self,
        policy_name: &str,
        target: DistributionTarget,
    ) -> Result<String, DistributorError> {
        let agents = self.registry.all_agents().await;
        let resolved = resolve_target(&target, &agents);
        if resolved.is_empty() {
            return Err(DistributorError::NoTargetAgents);
        }

        let mut inner = self.inner.lock().await;
        let version = inner.versions.next(policy_name);

        let id = Uuid::new_v4().to_string();
        let mut agent_statuses = BTreeMap::new();
        for agent in &resolved {
            agent_statuses.insert(agent.identity.id.clone(), AgentDistributionStatus::new());
        }

        let status = DistributionStatus {
            id: id.clone(),
            policy_name: policy_name.to_string(),
            version,
            target,
            initiated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            agents: agent_statuses,
            outcome: DistributionOutcome::InProgress,
        };
        inner.active.insert(id.clone(), status);
        tracing::info!(distribution_id = %id, policy = %policy_name, version, "distribution_staged");
        Ok(id)
    }

    /// Dispatch to every pending agent in the distribution, respecting the
    /// concurrency cap via the fair semaphore. `send` simulates (or performs)
    /// the network call and its eventual ack; errors are transient unless
    /// `transient` is false.
    pub async fn dispatch_all<F, Fut>(&self, distribution_id: &str, send: F) -> Result<(), DistributorError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<bool, (String, bool)>> + Send,
    {
        let pending_ids: Vec<String> = {
            let mut inner = self.inner.lock().await;
            let dist = inner
                .active
                .get_mut(distribution_id)
                .ok_or_else(|| DistributorError::DistributionNotFound(distribution_id.to_string()))?;
            if dist.started_at.is_none() {
                dist.started_at = Some(Utc::now());
            }
            dist.agents
                .iter()
                .filter(|(_, s)| s.state == AgentDistributionState::Pending)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for agent_id in pending_ids {
            if self.is_cancelled(distribution_id).await {
                break;
            }
            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore closed");
            self.set_state(distribution_id, &agent_id, AgentDistributionState::Dispatched)
                .await;

            let result = send(agent_id.clone()).await;
            drop(permit);

            self.apply_dispatch_result(distribution_id, &agent_id, result).await;
        }

        self.finalize_if_terminal(distribution_id).await;
        Ok(())
    }

    async fn apply_dispatch_result(
        &self,
        distribution_id: &str,
        agent_id: &str,
        result: Result<bool, (String, bool)>,
    ) {
        match result {
            Ok(_acked) => {
                self.set_state(distribution_id, agent_id, AgentDistributionState::Acknowledged)
                    .await;
                self.set_state(distribution_id, agent_id, AgentDistributionState::Completed)
                    .await;
            }
            Err((reason, transient)) => {
                let retry_count = {
                    let mut inner = self.inner.lock().await;
                    let dist = inner.active.get_mut(distribution_id).unwrap();
                    let agent_status = dist.agents.get_mut(agent_id).unwrap();
                    agent_status.error = Some(reason.clone());
                    agent_status.retry_count
                };

                if transient && retry_count < self.config.max_retry_attempts {
                    let delay = self.config.retry_delay * 2i32.pow(retry_count);
                    tokio::time::sleep(delay.to_std().unwrap_or_default()).await;
                    let mut inner = self.inner.lock().await;
                    let dist = inner.active.get_mut(distribution_id).unwrap();
                    let agent_status = dist.agents.get_mut(agent_id).unwrap();
                    agent_status.retry_count += 1;
                    agent_status.state = AgentDistributionState::Pending;
                } else {
                    self.set_state(distribution_id, agent_id, AgentDistributionState::Failed)
                        .await;
                }
            }
        }
    }

    async fn set_state(&self, distribution_id: &str, agent_id: &str, state: AgentDistributionState) {
        let mut inner = self.inner.lock().await;
        if let Some(dist) = inner.active.get_mut(distribution_id) {
            if let Some(agent_status) = dist.agents.get_mut(agent_id) {
                agent_status.state = state;
                let now = Utc::now();
                match state {
                    AgentDistributionState::Acknowledged => agent_status.ack_at = Some(now),
                    AgentDistributionState::Completed => agent_status.complete_at = Some(now),
                    _ => {}
                }
            }
        }
    }

    async fn is_cancelled(&self, distribution_id: &str) -> bool {
        self.inner.lock().await.cancelled.contains(distribution_id)
    }

    /// Marks dispatched-but-unacknowledged agents as timed out, and agents
    /// still `pending` (never pulled the policy, e.g. an offline agent)
    /// as `rolledBackPending` once the distribution has run past its
    /// acknowledgement window — there is nothing on-device to roll back
    /// for an agent that never received the rollout, so it is retired
    /// straight to the rolled-back-equivalent terminal state instead of
    /// being left open indefinitely. Callers invoke this from a periodic
    /// sweep per distribution.
    pub async fn check_timeouts(&self, distribution_id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(dist) = inner.active.get_mut(distribution_id) else {
            return;
        };
        let now = Utc::now();
        let initiated_at = dist.initiated_at;
        for status in dist.agents.values_mut() {
            match status.state {
                AgentDistributionState::Dispatched => {
                    let since = status.ack_at.unwrap_or(dist.started_at.unwrap_or(now));
                    if now - since > self.config.acknowledgement_timeout {
                        status.state = AgentDistributionState::TimedOut;
                    }
                }
                AgentDistributionState::Pending => {
                    if now - initiated_at > self.config.acknowledgement_timeout {
                        status.state = AgentDistributionState::RolledBackPending;
                    }
                }
                _ => {}
            }
        }
        drop(inner);
        self.finalize_if_terminal(distribution_id).await;
    }

    async fn finalize_if_terminal(&self, distribution_id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(dist) = inner.active.get(distribution_id) else {
            return;
        };
        if !dist.all_terminal() {
            return;
        }

        let success_rate = dist.success_rate();
        let outcome = if success_rate < self.config.minimum_success_rate {
            if self.config.auto_rollback_on_failure {
                DistributionOutcome::RolledBack
            } else {
                DistributionOutcome::FailedRollout
            }
        } else {
            DistributionOutcome::Succeeded
        };

        let mut dist = inner.active.remove(distribution_id).unwrap();
        if outcome == DistributionOutcome::RolledBack {
            for status in dist.agents.values_mut() {
                if status.state == AgentDistributionState::Completed {
                    status.state = AgentDistributionState::RolledBack;
                }
            }
        }
        dist.completed_at = Some(Utc::now());
        dist.outcome = outcome;

        tracing::info!(
            distribution_id = %distribution_id,
            outcome = ?outcome,
            success_rate,
            "distribution_finalized"
        );

        let history = inner.history.entry(dist.policy_name.clone()).or_default();
        history.push_front(dist);
        while history.len() > MAX_HISTORY_PER_POLICY {
            history.pop_back();
        }
    }

    pub async fn cancel(&self, distribution_id: &str) -> Result<(), DistributorError> {
        let mut inner = self.inner.lock().await;
        if !inner.active.contains_key(distribution_id) {
            return Err(DistributorError::DistributionNotFound(distribution_id.to_string()));
        }
        inner.cancelled.insert(distribution_id.to_string());
        let dist = inner.active.get_mut(distribution_id).unwrap();
        for status in dist.agents.values_mut() {
            if !matches!(
                status.state,
                AgentDistributionState::Completed
                    | AgentDistributionState::Failed
                    | AgentDistributionState::TimedOut
                    | AgentDistributionState::RolledBack
                    | AgentDistributionState::RolledBackPending
            ) {
                status.state = AgentDistributionState::Failed;
                status.error = Some("cancelled".to_string());
            }
        }
        drop(inner);
        self.finalize_if_terminal(distribution_id).await;
        Ok(())
    }

    pub async fn status(&self, distribution_id: &str) -> Option<DistributionStatus> {
        let inner = self.inner.lock().await;
        if let Some(dist) = inner.active.get(distribution_id) {
            return Some(dist.clone());
        }
        for history in inner.history.values() {
            if let Some(dist) = history.iter().find(|d| d.id == distribution_id) {
                return Some(dist.clone());
            }
        }
        None
    }

    /// Delivers every active distribution still `pending` for this agent,
    /// transitioning each to `dispatched` as it's handed back — the
    /// heartbeat response IS the dispatch for a pull-based agent, so
    /// receiving it here stands in for `dispatch_all`'s `send` callback.
    pub async fn pending_for_agent(&self, agent_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let mut delivered = Vec::new();
        for dist in inner.active.values_mut() {
            let Some(agent_status) = dist.agents.get_mut(agent_id) else {
                continue;
            };
            if agent_status.state != AgentDistributionState::Pending {
                continue;
            }
            if dist.started_at.is_none() {
                dist.started_at = Some(Utc::now());
            }
            agent_status.state = AgentDistributionState::Dispatched;
            delivered.push(dist.policy_name.clone());
        }
        delivered
    }

    /// Records one agent-originated ack/apply-result message for a
    /// distribution (spec §4.6/§6): `acknowledged` moves a `dispatched` agent
    /// to `Acknowledged`; a later, separate `completed` message promotes an
    /// already-`Acknowledged` agent to `Completed`; `failed` may arrive at
    /// either point and always wins. Returns `false` — discarded silently,
    /// per the wire contract — for a stale version, unknown
    /// distribution/agent, or a state transition the agent isn't entitled to
    /// make from its current recorded state.
    pub async fn record_ack(
        &self,
        distribution_id: &str,
        agent_id: &str,
        version: u64,
        ack: AckState,
        error: Option<String>,
    ) -> bool {
        {
            let mut inner = self.inner.lock().await;
            let Some(dist) = inner.active.get_mut(distribution_id) else {
                return false;
            };
            if dist.version != version {
                return false;
            }
            let Some(status) = dist.agents.get_mut(agent_id) else {
                return false;
            };
            let now = Utc::now();
            match ack {
                AckState::Acknowledged => {
                    if status.state != AgentDistributionState::Dispatched {
                        return false;
                    }
                    status.state = AgentDistributionState::Acknowledged;
                    status.ack_at = Some(now);
                }
                AckState::Completed => {
                    if status.state != AgentDistributionState::Acknowledged {
                        return false;
                    }
                    status.state = AgentDistributionState::Completed;
                    status.complete_at = Some(now);
                }
                AckState::Failed => {
                    if !matches!(
                        status.state,
                        AgentDistributionState::Dispatched | AgentDistributionState::Acknowledged
                    ) {
                        return false;
                    }
                    status.error = error;
                    status.state = AgentDistributionState::Failed;
                }
            }
        };
        crate::api::DISTRIBUTION_ACKS.with_label_values(&[ack.as_metric_label()]).inc();
        self.finalize_if_terminal(distribution_id).await;
        true
    }

    /// Number of agents this distribution's most recent rollout has
    /// recorded a `Failed`/`TimedOut`/`RolledBack`/`RolledBackPending`
    /// outcome for. Used by the Compliance Reporter to derive an agent's
    /// `withIssues` count from real dispatch history instead of a fixed
    /// value (spec §4.8).
    pub async fn issue_count_for_agent(&self, agent_id: &str) -> u32 {
        let inner = self.inner.lock().await;
        let mut count = 0u32;
        for dist in inner.active.values().chain(inner.history.values().flatten()) {
            if let Some(status) = dist.agents.get(agent_id) {
                if matches!(
                    status.state,
                    AgentDistributionState::Failed
                        | AgentDistributionState::TimedOut
                        | AgentDistributionState::RolledBack
                        | AgentDistributionState::RolledBackPending
                ) {
                    count += 1;
                }
            }
        }
        count
    }

    pub async fn history_for(&self, policy_name: &str) -> Vec<DistributionStatus> {
        let inner = self.inner.lock().await;
        inner
            .history
            .get(policy_name)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every terminated distribution across all policies, newest first
    /// within each policy. Used by the Compliance Reporter's fleet overview.
    pub async fn all_history(&self) -> Vec<DistributionStatus> {
        let inner = self.inner.lock().await;
        inner.history.values().flat_map(|h| h.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentIdentity, ConnectionState};
    use crate::registry::RegistryConfig;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

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

    async fn registry_with_agents(n: usize) -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new(RegistryConfig::default());
        for i in 0..n {
            registry
                .register(make_identity(&format!("a{i}")), BTreeSet::new())
                .await
                .unwrap();
        }
        registry
    }

    #[test]
    fn resolve_all_returns_every_agent() {
        let agents = vec![];
        assert_eq!(resolve_target(&DistributionTarget::All, &agents).len(), 0);
    }

    #[tokio::test]
    async fn distribute_fails_fast_on_empty_target() {
        let registry = registry_with_agents(0).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let err = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap_err();
        assert!(matches!(err, DistributorError::NoTargetAgents));
    }

    #[tokio::test]
    async fn version_counter_increments_per_policy() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id1 = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();
        let status1 = distributor.status(&id1).await.unwrap();
        distributor
            .dispatch_all(&id1, |_| async { Ok(true) })
            .await
            .unwrap();

        let id2 = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();
        let status2_before = distributor
            .history_for("baseline")
            .await
            .into_iter()
            .find(|d| d.id == id1)
            .unwrap();
        assert_eq!(status2_before.version, status1.version);

        distributor
            .dispatch_all(&id2, |_| async { Ok(true) })
            .await
            .unwrap();
        let history = distributor.history_for("baseline").await;
        let v2 = history.iter().find(|d| d.id == id2).unwrap().version;
        assert!(v2 > status1.version);
    }

    // S4: success-rate law
    #[tokio::test]
    async fn s4_success_rate_computed_and_terminates_succeeded() {
        let registry = registry_with_agents(10).await;
        let distributor = PolicyDistributor::new(
            DistributorConfig {
                minimum_success_rate: 80.0,
                auto_rollback_on_failure: false,
                max_retry_attempts: 0,
                ..DistributorConfig::default()
            },
            registry,
        );
        let id = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        distributor
            .dispatch_all(&id, {
                let counter = counter.clone();
                move |_agent_id| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 8 { Ok(true) } else { Err(("boom".to_string(), false)) }
                    }
                }
            })
            .await
            .unwrap();

        let history = distributor.history_for("baseline").await;
        let dist = &history[0];
        assert_eq!(dist.success_rate(), 80.0);
        assert_eq!(dist.outcome, DistributionOutcome::Succeeded);
    }

    #[tokio::test]
    async fn s4_below_threshold_terminates_failed_rollout() {
        let registry = registry_with_agents(10).await;
        let distributor = PolicyDistributor::new(
            DistributorConfig {
                minimum_success_rate: 90.0,
                auto_rollback_on_failure: false,
                max_retry_attempts: 0,
                ..DistributorConfig::default()
            },
            registry,
        );
        let id = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        distributor
            .dispatch_all(&id, {
                let counter = counter.clone();
                move |_agent_id| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 8 { Ok(true) } else { Err(("boom".to_string(), false)) }
                    }
                }
            })
            .await
            .unwrap();
        let history = distributor.history_for("baseline").await;
        assert_eq!(history[0].outcome, DistributionOutcome::FailedRollout);
    }

    #[tokio::test]
    async fn rollback_marks_completed_agents_rolled_back() {
        let registry = registry_with_agents(2).await;
        let distributor = PolicyDistributor::new(
            DistributorConfig {
                minimum_success_rate: 100.0,
                auto_rollback_on_failure: true,
                max_retry_attempts: 0,
                ..DistributorConfig::default()
            },
            registry,
        );
        let id = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        distributor
            .dispatch_all(&id, {
                let counter = counter.clone();
                move |_agent_id| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n == 0 { Ok(true) } else { Err(("boom".to_string(), false)) }
                    }
                }
            })
            .await
            .unwrap();
        let history = distributor.history_for("baseline").await;
        assert_eq!(history[0].outcome, DistributionOutcome::RolledBack);
        assert!(history[0]
            .agents
            .values()
            .any(|a| a.state == AgentDistributionState::RolledBack));
    }

    #[tokio::test]
    async fn cancel_unknown_distribution_fails() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let err = distributor.cancel("ghost").await.unwrap_err();
        assert!(matches!(err, DistributorError::DistributionNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_fails_remaining_agents() {
        let registry = registry_with_agents(3).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor
            .distribute("baseline", DistributionTarget::All)
            .await
            .unwrap();
        distributor.cancel(&id).await.unwrap();
        let history = distributor.history_for("baseline").await;
        assert!(history[0]
            .agents
            .values()
            .all(|a| a.state == AgentDistributionState::Failed));
    }

    #[test]
    fn filter_target_truncates_to_max_agents_preserving_order() {
        let agents: Vec<RegisteredAgent> = (0..5)
            .map(|i| RegisteredAgent {
                identity: make_identity(&format!("a{i}")),
                auth_token: format!("t{i}"),
                token_expires_at: Utc::now() + Duration::hours(1),
                capabilities: BTreeSet::new(),
                state: ConnectionState::Active,
                last_heartbeat: None,
                registered_at: Utc::now(),
                latest_status: None,
            })
            .collect();
        let filter = DistributionFilter {
            max_agents: Some(2),
            ..Default::default()
        };
        let resolved = resolve_filter(&filter, &agents);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].identity.id, "a0");
        assert_eq!(resolved[1].identity.id, "a1");
    }

    #[tokio::test]
    async fn pending_for_agent_delivers_once_and_marks_dispatched() {
        let registry = registry_with_agents(2).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        distributor.distribute("baseline", DistributionTarget::All).await.unwrap();

        let first = distributor.pending_for_agent("a0").await;
        assert_eq!(first, vec!["baseline".to_string()]);

        let second = distributor.pending_for_agent("a0").await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn record_ack_acknowledged_then_completed_reaches_completed() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();
        distributor.pending_for_agent("a0").await;

        let acked = distributor.record_ack(&id, "a0", 1, AckState::Acknowledged, None).await;
        assert!(acked);
        let status = distributor.status(&id).await.unwrap();
        assert_eq!(status.agents["a0"].state, AgentDistributionState::Acknowledged);

        let completed = distributor.record_ack(&id, "a0", 1, AckState::Completed, None).await;
        assert!(completed);
        let status = distributor.status(&id).await.unwrap();
        assert_eq!(status.agents["a0"].state, AgentDistributionState::Completed);
    }

    #[tokio::test]
    async fn record_ack_completed_without_a_prior_acknowledged_is_rejected() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();
        distributor.pending_for_agent("a0").await;

        let accepted = distributor.record_ack(&id, "a0", 1, AckState::Completed, None).await;
        assert!(!accepted);
        let status = distributor.status(&id).await.unwrap();
        assert_eq!(status.agents["a0"].state, AgentDistributionState::Dispatched);
    }

    #[tokio::test]
    async fn record_ack_failed_records_the_reason() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();
        distributor.pending_for_agent("a0").await;

        let accepted = distributor
            .record_ack(&id, "a0", 1, AckState::Failed, Some("disk full".to_string()))
            .await;
        assert!(accepted);
        let status = distributor.status(&id).await.unwrap();
        assert_eq!(status.agents["a0"].state, AgentDistributionState::Failed);
        assert_eq!(status.agents["a0"].error, Some("disk full".to_string()));
    }

    #[tokio::test]
    async fn record_ack_rejects_stale_version() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();
        distributor.pending_for_agent("a0").await;

        let accepted = distributor.record_ack(&id, "a0", 999, AckState::Acknowledged, None).await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn record_ack_without_dispatch_is_discarded() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(DistributorConfig::default(), registry);
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();

        let accepted = distributor.record_ack(&id, "a0", 1, AckState::Acknowledged, None).await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn check_timeouts_retires_an_agent_that_never_pulled_the_policy() {
        let registry = registry_with_agents(1).await;
        let distributor = PolicyDistributor::new(
            DistributorConfig {
                acknowledgement_timeout: Duration::seconds(0),
                ..DistributorConfig::default()
            },
            registry,
        );
        let id = distributor.distribute("baseline", DistributionTarget::All).await.unwrap();

        distributor.check_timeouts(&id).await;

        let status = distributor.status(&id).await.unwrap();
        assert_eq!(
            status.agents["a0"].state,
            AgentDistributionState::RolledBackPending
        );
        assert!(status.all_terminal());
    }
}
