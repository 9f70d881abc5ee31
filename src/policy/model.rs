//! Re-exports of the policy-related data model plus small constructors.
//!
//! The entity definitions themselves live in [`crate::model`] so every
//! component shares one copy; this module is the policy-facing façade other
//! components import through.

pub use crate::model::{
    DistributionFilter, DistributionTarget, HourRange, Policy, PolicyCondition, PolicyRule,
    Priority, RuleAction, RuleTarget, Schedule,
};

use chrono::Utc;
use std::collections::BTreeSet;

/// Construct an empty, disabled-by-default policy shell ready for rules to
/// be appended before `PolicyStore::save`.
pub fn new_policy(name: impl Into<String>, display_name: impl Into<String>) -> Policy {
    let now = Utc::now();
    Policy {
        schema_version: format!(
            "{}.{}",
            crate::policy::validator::CURRENT_SCHEMA_VERSION.0,
            crate::policy::validator::CURRENT_SCHEMA_VERSION.1
        ),
        name: name.into(),
        display_name: display_name.into(),
        description: String::new(),
        rules: Vec::new(),
        exclusions: Vec::new(),
        notifications: true,
        priority: Priority::Normal,
        enabled: true,
        tags: BTreeSet::new(),
        created_at: now,
        updated_at: now,
    }
}
