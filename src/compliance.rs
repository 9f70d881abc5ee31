//! Compliance Reporter: weighted scoring and reporting (spec §4.8).
//!
//! The clamp-then-classify idiom here mirrors the teacher's
//! `governance::calculate_health_score`/`classify_health` pair, adapted from
//! a per-pod violation-weight formula to the per-agent policy/health/
//! connectivity weighting the new spec defines.

use crate::audit::{AuditEventQuery, AuditStore};
use crate::distributor::PolicyDistributor;
use crate::model::{
    AuditSeverity, ComplianceLevel, ComplianceScore, ConnectionState, Health, RegisteredAgent,
};
use crate::registry::AgentRegistry;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("agent '{0}' not found")]
    AgentNotFound(String),
    #[error("distribution '{0}' not found")]
    DistributionNotFound(String),
    #[error("invalid date range: end before start")]
    InvalidDateRange,
}

#[derive(Debug, Clone, Copy)]
pub struct ComplianceConfig {
    pub policy_weight: f64,
    pub health_weight: f64,
    pub connectivity_weight: f64,
    pub heartbeat_timeout: Duration,
    pub max_audit_log_entries: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        ComplianceConfig {
            policy_weight: 0.4,
            health_weight: 0.3,
            connectivity_weight: 0.3,
            heartbeat_timeout: Duration::minutes(5),
            max_audit_log_entries: 1000,
        }
    }
}

fn health_score(health: Health) -> f64 {
    match health {
        Health::Healthy => 100.0,
        Health::Warning => 60.0,
        Health::Critical => 20.0,
        Health::Unknown => 50.0,
    }
}

fn connectivity_score(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> f64 {
    let Some(last) = last_heartbeat else {
        return 0.0;
    };
    let elapsed = now - last;
    if elapsed <= timeout {
        return 100.0;
    }
    let decay_window = timeout * 3 - timeout;
    let overage = elapsed - timeout;
    let fraction = (overage.num_milliseconds() as f64 / decay_window.num_milliseconds().max(1) as f64).min(1.0);
    (100.0 * (1.0 - fraction)).max(0.0)
}

fn policy_score(applied: u32, with_issues: u32) -> f64 {
    if applied == 0 {
        100.0
    } else {
        100.0 * (applied - with_issues) as f64 / applied as f64
    }
}

#[derive(Debug, Clone)]
pub struct RecordedAuditLine {
    pub agent_id: String,
    pub severity: AuditSeverity,
    pub category: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FleetOverviewReport {
    pub total_agents: usize,
    pub active_agents: usize,
    pub offline_agents: usize,
    pub average_compliance_score: f64,
    pub compliant_agents: usize,
    pub non_compliant_agents: usize,
    pub critical_agents: usize,
    pub total_policies_deployed: usize,
    pub successful_deployments: usize,
    pub failed_deployments: usize,
    pub total_bytes_freed: u64,
    pub total_cleanup_operations: u64,
    pub compliance_level_breakdown: BTreeMap<String, usize>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AgentComplianceReport {
    pub agent_id: String,
    pub hostname: String,
    pub tags: Vec<String>,
    pub compliance_score: ComplianceScore,
    pub total_bytes_freed: u64,
    pub cleanup_count: u64,
}

#[derive(Debug, Clone)]
pub struct PolicyExecutionReport {
    pub policy_name: String,
    pub version: u64,
    pub total_targeted_agents: usize,
    pub per_agent_status: BTreeMap<String, String>,
    pub success_rate: f64,
}

#[derive(Debug, Clone)]
pub struct AuditLogSummary {
    pub total_entries: usize,
    pub entries_by_severity: BTreeMap<String, usize>,
    pub entries_by_category: BTreeMap<String, usize>,
}

struct Inner {
    cached_scores: HashMap<String, ComplianceScore>,
    ring_buffer: std::collections::VecDeque<RecordedAuditLine>,
}

pub struct ComplianceReporter {
    config: ComplianceConfig,
    registry: Arc<AgentRegistry>,
    distributor: Arc<PolicyDistributor>,
    audit: Arc<AuditStore>,
    inner: Mutex<Inner>,
}

impl ComplianceReporter {
    pub fn new(
        config: ComplianceConfig,
        registry: Arc<AgentRegistry>,
        distributor: Arc<PolicyDistributor>,
        audit: Arc<AuditStore>,
    ) -> Arc<Self> {
        Arc::new(ComplianceReporter {
            config,
            registry,
            distributor,
            audit,
            inner: Mutex::new(Inner {
                cached_scores: HashMap::new(),
                ring_buffer: std::collections::VecDeque::new(),
            }),
        })
    }

    async fn score_for_agent(&self, agent: &RegisteredAgent) -> ComplianceScore {
        let now = Utc::now();
        let (applied, health) = match &agent.latest_status {
            Some(status) => (status.active_policy_count, status.health),
            None => (0, Health::Unknown),
        };
        let with_issues = self
            .distributor
            .issue_count_for_agent(&agent.identity.id)
            .await
            .min(applied);

        let p = policy_score(applied, with_issues);
        let h = health_score(health);
        let c = connectivity_score(agent.last_heartbeat, now, self.config.heartbeat_timeout);

        let overall = self.config.policy_weight * p + self.config.health_weight * h + self.config.connectivity_weight * c;

        ComplianceScore::new(overall, p, h, c, applied, with_issues, now)
    }

    pub async fn calculate_score(&self, id: &str) -> Result<ComplianceScore, ComplianceError> {
        let agent = self
            .registry
            .agent_by_id(id)
            .await
            .ok_or_else(|| ComplianceError::AgentNotFound(id.to_string()))?;
        let score = self.score_for_agent(&agent).await;
        let mut inner = self.inner.lock().await;
        inner.cached_scores.insert(id.to_string(), score.clone());
        Ok(score)
    }

    pub async fn cached_score(&self, id: &str) -> Option<ComplianceScore> {
        let inner = self.inner.lock().await;
        inner.cached_scores.get(id).cloned()
    }

    pub async fn record_audit_log(
        &self,
        agent_id: &str,
        severity: AuditSeverity,
        category: &str,
        message: &str,
    ) {
        let mut inner = self.inner.lock().await;
        inner.ring_buffer.push_back(RecordedAuditLine {
            agent_id: agent_id.to_string(),
            severity,
            category: category.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
        while inner.ring_buffer.len() > self.config.max_audit_log_entries {
            inner.ring_buffer.pop_front();
        }
    }

    pub async fn generate_fleet_overview(
        &self,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> FleetOverviewReport {
        let agents = self.registry.all_agents().await;
        let stats = self.registry.statistics().await;

        let mut total_score = 0.0;
        let mut compliant = 0;
        let mut non_compliant = 0;
        let mut critical = 0;
        let mut breakdown: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_bytes_freed = 0u64;
        let mut total_cleanup_operations = 0u64;

        for agent in &agents {
            let score = self.score_for_agent(agent).await;
            total_score += score.overall;
            match score.compliance_level() {
                ComplianceLevel::Compliant => compliant += 1,
                ComplianceLevel::NonCompliant => non_compliant += 1,
                ComplianceLevel::Critical => critical += 1,
                ComplianceLevel::PartiallyCompliant => {}
            }
            *breakdown.entry(format!("{:?}", score.compliance_level())).or_insert(0) += 1;
            if let Some(status) = &agent.latest_status {
                total_bytes_freed += status.cumulative_freed_bytes;
                total_cleanup_operations += status.cleanup_count;
            }
        }

        let average = if agents.is_empty() { 100.0 } else { total_score / agents.len() as f64 };

        let history = self.distributor.all_history().await;
        let total_deployed = history.len();
        let successful = history
            .iter()
            .filter(|d| d.outcome == crate::model::DistributionOutcome::Succeeded)
            .count();
        let failed = total_deployed - successful;

        FleetOverviewReport {
            total_agents: stats.total_agents,
            active_agents: stats.active_agents,
            offline_agents: stats.offline_agents,
            average_compliance_score: average,
            compliant_agents: compliant,
            non_compliant_agents: non_compliant,
            critical_agents: critical,
            total_policies_deployed: total_deployed,
            successful_deployments: successful,
            failed_deployments: failed,
            total_bytes_freed,
            total_cleanup_operations,
            compliance_level_breakdown: breakdown,
            period_start: period.map(|(s, _)| s),
            period_end: period.map(|(_, e)| e),
        }
    }

    pub async fn generate_agent_report(&self, id: &str) -> Result<AgentComplianceReport, ComplianceError> {
        let agent = self
            .registry
            .agent_by_id(id)
            .await
            .ok_or_else(|| ComplianceError::AgentNotFound(id.to_string()))?;
        let score = self.score_for_agent(&agent).await;
        let (bytes_freed, cleanup_count) = agent
            .latest_status
            .as_ref()
            .map(|s| (s.cumulative_freed_bytes, s.cleanup_count))
            .unwrap_or((0, 0));

        Ok(AgentComplianceReport {
            agent_id: agent.identity.id.clone(),
            hostname: agent.identity.hostname.clone(),
            tags: agent.identity.tags.iter().cloned().collect(),
            compliance_score: score,
            total_bytes_freed: bytes_freed,
            cleanup_count,
        })
    }

    pub async fn generate_policy_execution_report(
        &self,
        distribution_id: &str,
    ) -> Result<PolicyExecutionReport, ComplianceError> {
        let dist = self
            .distributor
            .status(distribution_id)
            .await
            .ok_or_else(|| ComplianceError::DistributionNotFound(distribution_id.to_string()))?;

        let per_agent_status = dist
            .agents
            .iter()
            .map(|(id, status)| (id.clone(), format!("{:?}", status.state)))
            .collect();

        Ok(PolicyExecutionReport {
            policy_name: dist.policy_name,
            version: dist.version,
            total_targeted_agents: dist.total(),
            per_agent_status,
            success_rate: dist.success_rate(),
        })
    }

    pub async fn generate_audit_log_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AuditLogSummary, ComplianceError> {
        if end < start {
            return Err(ComplianceError::InvalidDateRange);
        }
        let query = AuditEventQuery {
            since: Some(start),
            until: Some(end),
            ..Default::default()
        };
        let stats = self.audit.statistics(&query).await;
        let mut entries_by_severity = BTreeMap::new();
        for event in self.audit.query(&query).await {
            *entries_by_severity.entry(format!("{:?}", event.severity)).or_insert(0) += 1;
        }
        Ok(AuditLogSummary {
            total_entries: stats.total_events,
            entries_by_severity,
            entries_by_category: stats.by_category,
        })
    }

    pub fn export_fleet_overview_json(report: &FleetOverviewReport) -> serde_json::Value {
        serde_json::json!({
            "totalAgents": report.total_agents,
            "activeAgents": report.active_agents,
            "offlineAgents": report.offline_agents,
            "averageComplianceScore": report.average_compliance_score,
            "compliantAgents": report.compliant_agents,
            "nonCompliantAgents": report.non_compliant_agents,
            "criticalAgents": report.critical_agents,
            "totalBytesFreed": report.total_bytes_freed,
            "totalCleanupOperations": report.total_cleanup_operations,
            "complianceLevelBreakdown": report.compliance_level_breakdown,
        })
    }

    pub fn export_fleet_overview_csv(report: &FleetOverviewReport) -> String {
        let mut out = String::from("metric,value\n");
        out.push_str(&format!("total_agents,{}\n", report.total_agents));
        out.push_str(&format!("active_agents,{}\n", report.active_agents));
        out.push_str(&format!("offline_agents,{}\n", report.offline_agents));
        out.push_str(&format!("average_compliance_score,{:.2}\n", report.average_compliance_score));
        out.push_str(&format!("compliant_agents,{}\n", report.compliant_agents));
        out.push_str(&format!("non_compliant_agents,{}\n", report.non_compliant_agents));
        out.push_str(&format!("critical_agents,{}\n", report.critical_agents));
        out.push_str(&format!("total_bytes_freed,{}\n", report.total_bytes_freed));
        out
    }

    pub fn export_policy_execution_csv(report: &PolicyExecutionReport) -> String {
        let mut out = String::from("agent_id,state\n");
        for (id, state) in &report.per_agent_status {
            out.push_str(&format!("{id},{state}\n"));
        }
        out
    }
}
