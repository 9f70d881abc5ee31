//! Heartbeat Monitor: liveness transitions and per-agent statistics (spec §4.6).

use crate::model::AgentStatus;
use crate::registry::{AgentRegistry, RegistryError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub heartbeat_timeout: Duration,
    pub heartbeat_cadence: Duration,
    pub sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            heartbeat_timeout: Duration::minutes(5),
            heartbeat_cadence: Duration::seconds(60),
            sweep_interval: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentHeartbeatStats {
    pub total_heartbeats: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub mean_interval_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub pending_policies: Vec<String>,
    pub pending_commands: Vec<String>,
    pub next_heartbeat_seconds: i64,
}

struct Inner {
    stats: HashMap<String, AgentHeartbeatStats>,
}

pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    registry: Arc<AgentRegistry>,
    inner: Mutex<Inner>,
    running: AtomicBool,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig, registry: Arc<AgentRegistry>) -> Arc<Self> {
        Arc::new(HeartbeatMonitor {
            config,
            registry,
            inner: Mutex::new(Inner {
                stats: HashMap::new(),
            }),
            running: AtomicBool::new(false),
        })
    }

    pub async fn process_heartbeat(
        &self,
        id: &str,
        status: AgentStatus,
        pending_policies: Vec<String>,
        pending_commands: Vec<String>,
    ) -> Result<HeartbeatResponse, HeartbeatError> {
        self.registry.update_status(id, status).await?;

        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let entry = inner.stats.entry(id.to_string()).or_insert_with(|| AgentHeartbeatStats {
            total_heartbeats: 0,
            first_seen: now,
            last_seen: now,
            mean_interval_seconds: 0.0,
        });

        let elapsed = (now - entry.last_seen).num_milliseconds() as f64 / 1000.0;
        let n = entry.total_heartbeats as f64;
        if entry.total_heartbeats > 0 {
            entry.mean_interval_seconds = (entry.mean_interval_seconds * n + elapsed) / (n + 1.0);
        }
        entry.total_heartbeats += 1;
        entry.last_seen = now;

        tracing::info!(agent_id = %id, total = entry.total_heartbeats, "heartbeat_processed");

        Ok(HeartbeatResponse {
            acknowledged: true,
            pending_policies,
            pending_commands,
            next_heartbeat_seconds: self.config.heartbeat_cadence.num_seconds(),
        })
    }

    pub async fn stats_for(&self, id: &str) -> Option<AgentHeartbeatStats> {
        let inner = self.inner.lock().await;
        inner.stats.get(id).cloned()
    }

    pub fn start_monitoring(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                monitor.sweep_once().await;
                tokio::time::sleep(monitor.config.sweep_interval.to_std().unwrap_or_default()).await;
            }
        })
    }

    pub fn stop_monitoring(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One sweep tick: marks agents offline when they've exceeded the
    /// configured heartbeat timeout. Never blocks on network I/O.
    pub async fn sweep_once(&self) {
        let now = Utc::now();
        let agents = self.registry.all_agents().await;
        for agent in agents {
            if !agent.is_online() {
                continue;
            }
            let Some(last) = agent.last_heartbeat else {
                continue;
            };
            if now - last > self.config.heartbeat_timeout {
                if let Err(err) = self.registry.mark_offline(&agent.identity.id).await {
                    tracing::warn!(agent_id = %agent.identity.id, error = %err, "mark_offline_failed");
                } else {
                    tracing::warn!(agent_id = %agent.identity.id, "agent_marked_offline");
                }
            }
        }
    }

    pub async fn summary(&self) -> crate::registry::RegistryStatistics {
        self.registry.statistics().await
    }
}
