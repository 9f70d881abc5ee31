//! Policy Validator: pure checks over a policy document (spec §4.1).
//!
//! Mirrors the severity-annotated, collect-everything style of
//! `governance::detect_violations_detailed` — validation never short
//! circuits on the first failure, it accumulates errors and warnings.

use crate::model::{Policy, Priority, RuleTarget, Schedule};
use regex::Regex;
use std::sync::LazyLock;

pub const CURRENT_SCHEMA_VERSION: (u32, u32) = (1, 0);

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)$").unwrap());
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[dwmy]$").unwrap());
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+(\.\d+)?(KB|MB|GB|TB)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Parse a duration literal (`\d+[dwmy]`) into seconds.
pub fn parse_duration_seconds(literal: &str) -> Option<u64> {
    if !DURATION_RE.is_match(literal) {
        return None;
    }
    let (digits, unit) = literal.split_at(literal.len() - 1);
    let n: u64 = digits.parse().ok()?;
    let per_unit = match unit {
        "d" => 86_400,
        "w" => 7 * 86_400,
        "m" => 30 * 86_400,
        "y" => 365 * 86_400,
        _ => return None,
    };
    Some(n * per_unit)
}

/// Parse a binary size literal (`\d+(\.\d+)?(KB|MB|GB|TB)`) into bytes.
pub fn parse_size_bytes(literal: &str) -> Option<u64> {
    if !SIZE_RE.is_match(literal) {
        return None;
    }
    let upper = literal.to_uppercase();
    let unit_len = 2;
    let (num_part, unit) = upper.split_at(upper.len() - unit_len);
    let value: f64 = num_part.parse().ok()?;
    let multiplier: f64 = match unit {
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

fn valid_exclusion(pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    pattern.starts_with('~')
        || pattern.starts_with('/')
        || pattern.contains('*')
        || pattern.contains('/')
}

/// Validate a policy document. Never panics; returns a full report.
pub fn validate(policy: &Policy) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match VERSION_RE.captures(&policy.schema_version) {
        None => errors.push(format!(
            "schema_version '{}' does not match \\d+.\\d+",
            policy.schema_version
        )),
        Some(caps) => {
            let major: u32 = caps[1].parse().unwrap_or(u32::MAX);
            let minor: u32 = caps[2].parse().unwrap_or(u32::MAX);
            if (major, minor) > CURRENT_SCHEMA_VERSION {
                errors.push(format!(
                    "schema_version {}.{} is newer than supported {}.{}",
                    major, minor, CURRENT_SCHEMA_VERSION.0, CURRENT_SCHEMA_VERSION.1
                ));
            }
        }
    }

    if !NAME_RE.is_match(&policy.name) {
        errors.push(format!("policy name '{}' is not lowercase-kebab", policy.name));
    }

    if policy.rules.is_empty() {
        errors.push("policy has zero rules".to_string());
    }

    let mut seen_rule_ids = std::collections::HashSet::new();
    for rule in &policy.rules {
        if rule.id.is_empty() {
            errors.push("rule id must not be empty".to_string());
        } else if !NAME_RE.is_match(&rule.id) {
            errors.push(format!("rule id '{}' is not lowercase-kebab", rule.id));
        } else if !seen_rule_ids.insert(rule.id.clone()) {
            errors.push(format!("rule id '{}' is duplicated", rule.id));
        }

        if let Some(cond) = &rule.conditions {
            if let Some(d) = &cond.older_than {
                if parse_duration_seconds(d).is_none() {
                    errors.push(format!("rule '{}' has invalid olderThan literal '{}'", rule.id, d));
                }
            }
            for (label, size) in [
                ("minFreeSpace", &cond.min_free_space),
                ("maxFreeSpace", &cond.max_free_space),
                ("minFileSize", &cond.min_file_size),
                ("maxFileSize", &cond.max_file_size),
            ] {
                if let Some(s) = size {
                    if parse_size_bytes(s).is_none() {
                        errors.push(format!("rule '{}' has invalid {} literal '{}'", rule.id, label, s));
                    }
                }
            }
            if let Some(hr) = &cond.hour_range {
                if hr.start > 23 || hr.end > 23 {
                    errors.push(format!("rule '{}' has out-of-range hour_range", rule.id));
                }
            }
        }

        if rule.target == RuleTarget::Downloads && policy.exclusions.is_empty() {
            warnings.push(format!(
                "rule '{}' targets downloads with no policy-level exclusions",
                rule.id
            ));
        }
        if !policy.notifications && rule.schedule != Schedule::Manual {
            warnings.push(format!(
                "rule '{}' runs on a non-manual schedule with notifications disabled",
                rule.id
            ));
        }
        if policy.priority == Priority::Critical && rule.conditions.is_none() {
            warnings.push(format!(
                "rule '{}' is part of a critical-priority policy but has no conditions",
                rule.id
            ));
        }
    }

    for excl in &policy.exclusions {
        if !valid_exclusion(excl) {
            errors.push(format!(
                "exclusion pattern '{}' must start with ~, /, or contain a wildcard/separator",
                excl
            ));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyCondition, PolicyRule, RuleAction};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn base_policy() -> Policy {
        Policy {
            schema_version: "1.0".to_string(),
            name: "baseline".to_string(),
            display_name: "Baseline".to_string(),
            description: String::new(),
            rules: vec![PolicyRule {
                id: "clear-caches".to_string(),
                target: RuleTarget::SystemCaches,
                action: RuleAction::Clean,
                schedule: Schedule::Daily,
                enabled: true,
                conditions: None,
                description: None,
            }],
            exclusions: vec!["~/Library/Caches/important".to_string()],
            notifications: true,
            priority: Priority::Normal,
            enabled: true,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_well_formed_policy() {
        let report = validate(&base_policy());
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn rejects_empty_rules() {
        let mut p = base_policy();
        p.rules.clear();
        let report = validate(&p);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("zero rules")));
    }

    #[test]
    fn rejects_bad_name() {
        let mut p = base_policy();
        p.name = "Bad Name!".to_string();
        assert!(!validate(&p).valid);
    }

    #[test]
    fn rejects_duplicate_rule_ids() {
        let mut p = base_policy();
        let dup = p.rules[0].clone();
        p.rules.push(dup);
        let report = validate(&p);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("duplicated")));
    }

    #[test]
    fn rejects_invalid_duration_literal() {
        let mut p = base_policy();
        p.rules[0].conditions = Some(PolicyCondition {
            older_than: Some("30".to_string()),
            ..Default::default()
        });
        assert!(!validate(&p).valid);
    }

    #[test]
    fn accepts_valid_duration_and_size_literals() {
        let mut p = base_policy();
        p.rules[0].conditions = Some(PolicyCondition {
            older_than: Some("30d".to_string()),
            min_free_space: Some("1.5GB".to_string()),
            ..Default::default()
        });
        assert!(validate(&p).valid);
    }

    #[test]
    fn warns_on_downloads_target_without_exclusions() {
        let mut p = base_policy();
        p.exclusions.clear();
        p.rules[0].target = RuleTarget::Downloads;
        let report = validate(&p);
        assert!(report.valid);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn rejects_bad_exclusion_pattern() {
        let mut p = base_policy();
        p.exclusions.push("no-separator-no-wildcard".to_string());
        assert!(!validate(&p).valid);
    }

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration_seconds("1d"), Some(86_400));
        assert_eq!(parse_duration_seconds("2w"), Some(2 * 7 * 86_400));
        assert_eq!(parse_duration_seconds("1m"), Some(30 * 86_400));
        assert_eq!(parse_duration_seconds("1y"), Some(365 * 86_400));
        assert_eq!(parse_duration_seconds("bogus"), None);
    }

    #[test]
    fn parses_size_units_binary() {
        assert_eq!(parse_size_bytes("1KB"), Some(1024));
        assert_eq!(parse_size_bytes("1gb"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size_bytes("nope"), None);
    }

    #[test]
    fn rejects_future_schema_version() {
        let mut p = base_policy();
        p.schema_version = "99.0".to_string();
        assert!(!validate(&p).valid);
    }
}
