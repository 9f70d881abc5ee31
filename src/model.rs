//! Shared data model for the fleet management control plane.
//!
//! Types here are passed between every component; none of them own a mutex
//! or any async behaviour themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/* ============================= AGENT IDENTITY ============================= */

/// Immutable fingerprint of one agent install, captured once at
/// registration and never mutated afterward — a reregistration produces a
/// new `AgentIdentity`, not an edit of this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: String,
    pub hostname: String,
    pub os_version: String,
    pub app_version: String,
    pub hardware_model: String,
    pub serial_hash: String,
    pub username: String,
    pub registered_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

/// Where an agent sits in the registration/liveness lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Pending,
    Active,
    Offline,
    Disconnected,
    Rejected,
}

impl ConnectionState {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectionState::Pending | ConnectionState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

/// Most recent heartbeat payload for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub connection_state: ConnectionState,
    pub health: Health,
    pub timestamp: DateTime<Utc>,
    pub active_policy_count: u32,
    pub total_disk_bytes: u64,
    pub available_disk_bytes: u64,
    pub cumulative_freed_bytes: u64,
    pub cleanup_count: u64,
}

impl AgentStatus {
    pub fn disk_usage_percent(&self) -> Option<f64> {
        if self.total_disk_bytes == 0 {
            return None;
        }
        Some(1.0 - (self.available_disk_bytes as f64 / self.total_disk_bytes as f64))
    }
}

/// Registry row: everything the control plane knows about one agent.
///
/// `identity` is set once at admission; every other field is updated by
/// heartbeats and distribution acks as the agent's lifecycle progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub identity: AgentIdentity,
    pub auth_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub capabilities: BTreeSet<String>,
    pub state: ConnectionState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub latest_status: Option<AgentStatus>,
}

impl RegisteredAgent {
    pub fn is_online(&self) -> bool {
        self.state.is_online()
    }

    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expires_at
    }
}

/* ============================= POLICY TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    Clean,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Manual,
    Daily,
    Weekly,
    Monthly,
}

/// What a rule's action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleTarget {
    SystemCaches,
    AppCaches,
    BrowserCaches,
    DeveloperCaches,
    PackageCaches,
    SystemLogs,
    AppLogs,
    Downloads,
    Trash,
    All,
}

/// Inclusive hour-of-day window (0–23), used by [`PolicyCondition::hour_range`]
/// to restrict a rule to a maintenance window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

/// Optional gating conditions a rule must satisfy before it runs, evaluated
/// by the agent itself at execution time — the control plane never checks
/// these, it only ships them down.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyCondition {
    /// Only target files older than this duration (e.g. "30d").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than: Option<String>,

    /// Only run while free disk space is below this threshold (e.g. "10%").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_free_space: Option<String>,

    /// Stop running once free disk space rises above this threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_free_space: Option<String>,

    /// Only target files at or above this size (e.g. "100MB").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_file_size: Option<String>,

    /// Only target files at or below this size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<String>,

    /// Restrict this rule to Monday–Friday.
    #[serde(default)]
    pub weekdays_only: bool,

    /// Restrict this rule to a specific hour-of-day window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_range: Option<HourRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub target: RuleTarget,
    pub action: RuleAction,
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<PolicyCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A versioned declarative cleanup policy document: the unit the Policy
/// Store persists and the Policy Distributor ships to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Document schema version, not the rollout version tracked by
    /// [`DistributionStatus::version`].
    pub schema_version: String,

    /// Stable identifier; also the filename under the policy directory.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PolicyRule>,

    /// Paths excluded from every rule in this policy, regardless of target.
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub notifications: bool,
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* ============================= DISTRIBUTION TYPES ============================= */

/// Narrows a [`DistributionTarget`] down further by agent attribute, used
/// inside `DistributionTarget::Filter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionFilter {
    #[serde(default)]
    pub required_tags: BTreeSet<String>,
    #[serde(default)]
    pub excluded_agents: BTreeSet<String>,
    #[serde(default)]
    pub max_agents: Option<usize>,
    #[serde(default)]
    pub required_connection_state: Option<ConnectionState>,
}

/// Which agents a distribution targets (spec §4.7 target resolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DistributionTarget {
    All,
    Agents(BTreeSet<String>),
    Tags(BTreeSet<String>),
    Capabilities(BTreeSet<String>),
    Combined(Vec<DistributionTarget>),
    Filter(DistributionFilter),
}

/// Per-agent state within one distribution's rollout. `Dispatched` means
/// the heartbeat response handed the agent the policy; `Acknowledged` and
/// `Completed` are two distinct agent-originated messages, not one —
/// acking receipt of a policy is not the same claim as finishing applying
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentDistributionState {
    Pending,
    Dispatched,
    Acknowledged,
    Completed,
    Failed,
    TimedOut,
    RolledBack,
    RolledBackPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDistributionStatus {
    pub state: AgentDistributionState,
    pub retry_count: u32,
    pub error: Option<String>,
    pub ack_at: Option<DateTime<Utc>>,
    pub complete_at: Option<DateTime<Utc>>,
}

impl AgentDistributionStatus {
    pub fn new() -> Self {
        AgentDistributionStatus {
            state: AgentDistributionState::Pending,
            retry_count: 0,
            error: None,
            ack_at: None,
            complete_at: None,
        }
    }
}

impl Default for AgentDistributionStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn is_terminal(state: AgentDistributionState) -> bool {
    matches!(
        state,
        AgentDistributionState::Completed
            | AgentDistributionState::Failed
            | AgentDistributionState::TimedOut
            | AgentDistributionState::RolledBack
            | AgentDistributionState::RolledBackPending
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistributionOutcome {
    InProgress,
    Succeeded,
    FailedRollout,
    RolledBack,
    Cancelled,
}

/// One versioned rollout of a policy, with per-agent tracking. Moves from
/// `active` to a policy's `history` ring once every agent reaches a
/// terminal state (see [`DistributionStatus::all_terminal`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionStatus {
    pub id: String,
    pub policy_name: String,
    pub version: u64,
    pub target: DistributionTarget,
    pub initiated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub agents: BTreeMap<String, AgentDistributionStatus>,
    pub outcome: DistributionOutcome,
}

impl DistributionStatus {
    pub fn total(&self) -> usize {
        self.agents.len()
    }

    pub fn completed(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.state == AgentDistributionState::Completed)
            .count()
    }

    pub fn success_rate(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        (self.completed() as f64 * 100.0) / self.total() as f64
    }

    pub fn is_fully_successful(&self) -> bool {
        self.success_rate() == 100.0
    }

    pub fn all_terminal(&self) -> bool {
        self.agents.values().all(|a| is_terminal(a.state))
    }
}

/* ============================= COMPLIANCE TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComplianceLevel {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
    Critical,
}

/// Weighted policy/health/connectivity score for one agent (spec §4.8).
/// `overall` and the three components are always clamped to `0..=100` by
/// [`ComplianceScore::new`] — nothing downstream needs to re-clamp them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceScore {
    pub overall: f64,
    pub policy: f64,
    pub health: f64,
    pub connectivity: f64,
    pub active_policies: u32,
    pub policies_with_issues: u32,
    pub calculated_at: DateTime<Utc>,
}

fn clamp01_100(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

impl ComplianceScore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        overall: f64,
        policy: f64,
        health: f64,
        connectivity: f64,
        active_policies: u32,
        policies_with_issues: u32,
        calculated_at: DateTime<Utc>,
    ) -> Self {
        ComplianceScore {
            overall: clamp01_100(overall),
            policy: clamp01_100(policy),
            health: clamp01_100(health),
            connectivity: clamp01_100(connectivity),
            active_policies,
            policies_with_issues,
            calculated_at,
        }
    }

    pub fn compliance_level(&self) -> ComplianceLevel {
        if self.overall >= 90.0 {
            ComplianceLevel::Compliant
        } else if self.overall >= 70.0 {
            ComplianceLevel::PartiallyCompliant
        } else if self.overall >= 50.0 {
            ComplianceLevel::NonCompliant
        } else {
            ComplianceLevel::Critical
        }
    }
}

/* ============================= AUDIT TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Cleanup,
    Policy,
    Security,
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Warning,
    Skipped,
}

/// One append-only audit-log entry. `id` is assigned by the Audit Store on
/// insert — callers constructing one to pass to `AuditStore::insert` leave
/// it blank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    pub actor: String,
    pub target: String,
    pub action: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/* ============================= AUTH TYPES ============================= */

/// Operator role, ordered by privilege — compared via [`Role::level`]
/// rather than derived `Ord`, since the access table checks "at least this
/// role" rather than exact equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    pub fn level(self) -> u8 {
        match self {
            Role::Viewer => 10,
            Role::Operator => 50,
            Role::Admin => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Decoded JWT payload (spec §4.10). `sub` is the user id the Token
/// Provider signed the token for — the Access Controller looks this id up
/// in the User Directory to check [`User::active`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JWTClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub exp: i64,
    pub jti: String,
    pub username: String,
    pub role: Role,
    pub token_type: TokenType,
}

/// Operator account record backing the User Directory. `active` gates
/// whether a token already issued to this id is still honored.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub active: bool,
}
