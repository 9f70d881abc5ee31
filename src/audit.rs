//! Audit Event Store: append-only log with filtered reads (spec §4.3).

use crate::model::{AuditCategory, AuditEvent, AuditResult, AuditSeverity};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct AuditEventQuery {
    pub category: Option<AuditCategory>,
    pub result: Option<AuditResult>,
    pub severity: Option<AuditSeverity>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub actor_contains: Option<String>,
    pub limit: Option<usize>,
    pub ascending: bool,
}

impl AuditEventQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(c) = self.category {
            if event.category != c {
                return false;
            }
        }
        if let Some(r) = self.result {
            if event.result != r {
                return false;
            }
        }
        if let Some(s) = self.severity {
            if event.severity != s {
                return false;
            }
        }
        if let Some(sid) = &self.session_id {
            if event.session_id.as_deref() != Some(sid.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        if let Some(needle) = &self.actor_contains {
            if !event.actor.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct AuditStatistics {
    pub total_events: usize,
    pub by_category: std::collections::BTreeMap<String, usize>,
    pub by_result: std::collections::BTreeMap<String, usize>,
    pub total_freed_bytes: u64,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub max_events: usize,
    pub retention_days: i64,
    pub auto_vacuum: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            max_events: 100_000,
            retention_days: 90,
            auto_vacuum: true,
        }
    }
}

struct Inner {
    events: Vec<AuditEvent>,
}

/// Single-mutex-serialised append-only store (spec §5 concurrency model).
pub struct AuditStore {
    retention: RetentionConfig,
    inner: Mutex<Inner>,
}

impl AuditStore {
    pub fn new(retention: RetentionConfig) -> Arc<Self> {
        Arc::new(AuditStore {
            retention,
            inner: Mutex::new(Inner { events: Vec::new() }),
        })
    }

    fn vacuum_locked(inner: &mut Inner, retention: &RetentionConfig) {
        if inner.events.len() >= retention.max_events {
            let overflow = inner.events.len() + 1 - retention.max_events;
            inner.events.drain(0..overflow.min(inner.events.len()));
        }
        if retention.retention_days > 0 {
            let cutoff = Utc::now() - chrono::Duration::days(retention.retention_days);
            inner.events.retain(|e| e.timestamp >= cutoff);
        }
    }

    pub async fn insert(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        let mut inner = self.inner.lock().await;
        if self.retention.auto_vacuum {
            Self::vacuum_locked(&mut inner, &self.retention);
        }
        inner.events.push(event.clone());
        Ok(event)
    }

    /// Periodic sweep (spawned as a background task by `serve`); independent
    /// of the eager vacuum-on-insert path.
    pub async fn sweep_retention(&self) {
        let mut inner = self.inner.lock().await;
        Self::vacuum_locked(&mut inner, &self.retention);
    }

    pub async fn query(&self, q: &AuditEventQuery) -> Vec<AuditEvent> {
        let inner = self.inner.lock().await;
        let mut results: Vec<AuditEvent> = inner.events.iter().filter(|e| q.matches(e)).cloned().collect();
        if !q.ascending {
            results.reverse();
        }
        if let Some(limit) = q.limit {
            results.truncate(limit);
        }
        results
    }

    pub async fn count(&self, q: &AuditEventQuery) -> usize {
        let inner = self.inner.lock().await;
        inner.events.iter().filter(|e| q.matches(e)).count()
    }

    pub async fn statistics(&self, q: &AuditEventQuery) -> AuditStatistics {
        let events = self.query(q).await;
        let mut by_category = std::collections::BTreeMap::new();
        let mut by_result = std::collections::BTreeMap::new();
        let mut date_range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

        for e in &events {
            *by_category.entry(format!("{:?}", e.category)).or_insert(0) += 1;
            *by_result.entry(format!("{:?}", e.result)).or_insert(0) += 1;
            date_range = Some(match date_range {
                None => (e.timestamp, e.timestamp),
                Some((min, max)) => (min.min(e.timestamp), max.max(e.timestamp)),
            });
        }

        let total_freed_bytes = events
            .iter()
            .filter_map(|e| e.metadata.get("freed_bytes"))
            .filter_map(|v| v.parse::<u64>().ok())
            .sum();

        AuditStatistics {
            total_events: events.len(),
            by_category,
            by_result,
            total_freed_bytes,
            date_range,
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.events.clear();
    }

    pub async fn export_json(&self, q: &AuditEventQuery) -> Result<String, AuditError> {
        let events = self.query(q).await;
        Ok(serde_json::to_string_pretty(&events)?)
    }

    pub async fn export_jsonl(&self, q: &AuditEventQuery) -> Result<String, AuditError> {
        let events = self.query(q).await;
        let mut out = String::new();
        for e in events {
            out.push_str(&serde_json::to_string(&e)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub async fn export_csv(&self, q: &AuditEventQuery) -> Result<String, AuditError> {
        let events = self.query(q).await;
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record([
            "id", "timestamp", "category", "severity", "actor", "target", "action", "result",
            "session", "metadata",
        ])?;
        for e in &events {
            let metadata = e
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";");
            writer.write_record([
                e.id.as_str(),
                &e.timestamp.to_rfc3339(),
                &format!("{:?}", e.category).to_lowercase(),
                &format!("{:?}", e.severity).to_lowercase(),
                e.actor.as_str(),
                e.target.as_str(),
                e.action.as_str(),
                &format!("{:?}", e.result).to_lowercase(),
                e.session_id.as_deref().unwrap_or(""),
                &metadata,
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
