//! Pre-defined policy templates. Supplemented feature (spec.md is silent on
//! built-in templates), carried over from the teacher's `bundles.rs` pattern:
//! a fixed small set of named specs, looked up case-insensitively.

use crate::model::{Policy, PolicyCondition, PolicyRule, Priority, RuleAction, RuleTarget, Schedule};
use crate::policy::model::new_policy;

#[derive(Debug, Clone)]
pub struct PolicyBundle {
    pub name: String,
    pub description: String,
    pub spec: Policy,
}

pub fn all_bundles() -> Vec<PolicyBundle> {
    vec![baseline_bundle(), aggressive_bundle(), conservative_bundle()]
}

pub fn get_bundle(name: &str) -> Option<PolicyBundle> {
    let lower = name.to_lowercase();
    all_bundles().into_iter().find(|b| b.name == lower)
}

fn baseline_bundle() -> PolicyBundle {
    let mut spec = new_policy("baseline", "Baseline Cleanup");
    spec.description = "Conservative system and app cache cleanup on a daily schedule.".to_string();
    spec.exclusions = vec!["~/Library/Caches/important".to_string()];
    spec.rules = vec![
        PolicyRule {
            id: "system-caches".to_string(),
            target: RuleTarget::SystemCaches,
            action: RuleAction::Clean,
            schedule: Schedule::Daily,
            enabled: true,
            conditions: Some(PolicyCondition {
                older_than: Some("7d".to_string()),
                ..Default::default()
            }),
            description: None,
        },
        PolicyRule {
            id: "app-caches".to_string(),
            target: RuleTarget::AppCaches,
            action: RuleAction::Clean,
            schedule: Schedule::Daily,
            enabled: true,
            conditions: Some(PolicyCondition {
                older_than: Some("14d".to_string()),
                ..Default::default()
            }),
            description: None,
        },
    ];
    PolicyBundle {
        name: "baseline".to_string(),
        description: "Conservative daily cache cleanup, widely exclusion-guarded.".to_string(),
        spec,
    }
}

fn aggressive_bundle() -> PolicyBundle {
    let mut spec = new_policy("aggressive", "Aggressive Cleanup");
    spec.priority = Priority::High;
    spec.description = "Cleans caches, logs, and downloads weekly with short retention.".to_string();
    spec.exclusions = vec!["~/Downloads/keep".to_string()];
    spec.rules = vec![
        PolicyRule {
            id: "all-caches".to_string(),
            target: RuleTarget::All,
            action: RuleAction::Clean,
            schedule: Schedule::Weekly,
            enabled: true,
            conditions: Some(PolicyCondition {
                older_than: Some("3d".to_string()),
                ..Default::default()
            }),
            description: None,
        },
        PolicyRule {
            id: "downloads".to_string(),
            target: RuleTarget::Downloads,
            action: RuleAction::Clean,
            schedule: Schedule::Weekly,
            enabled: true,
            conditions: Some(PolicyCondition {
                older_than: Some("30d".to_string()),
                ..Default::default()
            }),
            description: None,
        },
        PolicyRule {
            id: "trash".to_string(),
            target: RuleTarget::Trash,
            action: RuleAction::Clean,
            schedule: Schedule::Weekly,
            enabled: true,
            conditions: None,
            description: None,
        },
    ];
    PolicyBundle {
        name: "aggressive".to_string(),
        description: "Weekly sweep of caches, downloads and trash; short retention windows.".to_string(),
        spec,
    }
}

fn conservative_bundle() -> PolicyBundle {
    let mut spec = new_policy("conservative", "Report-Only Cleanup");
    spec.priority = Priority::Low;
    spec.notifications = false;
    spec.description = "Report-only sweep for fleets still building trust in the agent.".to_string();
    spec.rules = vec![PolicyRule {
        id: "report-system-logs".to_string(),
        target: RuleTarget::SystemLogs,
        action: RuleAction::Report,
        schedule: Schedule::Monthly,
        enabled: true,
        conditions: Some(PolicyCondition {
            older_than: Some("90d".to_string()),
            ..Default::default()
        }),
        description: None,
    }];
    PolicyBundle {
        name: "conservative".to_string(),
        description: "Monthly report-only rule, no destructive action taken.".to_string(),
        spec,
    }
}
