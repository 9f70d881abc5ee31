//! Ambient configuration aggregation. One `FleetConfig` struct bundling
//! each component's own config struct, loadable from TOML/JSON, following
//! the plain-struct-with-Default idiom the teacher uses for
//! `ScoringWeights::default()`.

use crate::auth::access::AccessControllerConfig;
use crate::auth::token::TokenConfig;
use crate::audit::RetentionConfig;
use crate::compliance::ComplianceConfig;
use crate::distributor::DistributorConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::registration::RegistrationConfig;
use crate::registry::RegistryConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub registry: RegistryConfig,
    pub registration: RegistrationConfig,
    pub heartbeat: HeartbeatConfig,
    pub distributor: DistributorConfig,
    pub compliance: ComplianceConfig,
    pub audit_retention: RetentionConfig,
    pub token: TokenConfig,
    pub access_controller: AccessControllerConfig,
    pub policy_dir: std::path::PathBuf,
    pub bind_addr: String,
}

/// On-disk shape for the handful of fields operators actually tune; the
/// rest keep their component `Default`.
#[derive(Debug, Deserialize, Default)]
pub struct FleetConfigFile {
    pub max_agents: Option<usize>,
    pub token_secret: Option<String>,
    pub token_issuer: Option<String>,
    pub policy_dir: Option<String>,
    pub bind_addr: Option<String>,
    pub minimum_success_rate: Option<f64>,
    pub auto_rollback_on_failure: Option<bool>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            registry: RegistryConfig::default(),
            registration: RegistrationConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            distributor: DistributorConfig::default(),
            compliance: ComplianceConfig::default(),
            audit_retention: RetentionConfig::default(),
            token: TokenConfig {
                secret: "change-me".to_string(),
                issuer: "agentfleet".to_string(),
                access_token_duration: chrono::Duration::minutes(15),
                refresh_token_duration: chrono::Duration::days(7),
            },
            access_controller: AccessControllerConfig::default(),
            policy_dir: std::path::PathBuf::from("./policies"),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn apply_file(mut self, file: FleetConfigFile) -> Self {
        if let Some(max_agents) = file.max_agents {
            self.registry.max_agents = max_agents;
        }
        if let Some(secret) = file.token_secret {
            self.token.secret = secret;
        }
        if let Some(issuer) = file.token_issuer {
            self.token.issuer = issuer;
        }
        if let Some(dir) = file.policy_dir {
            self.policy_dir = std::path::PathBuf::from(dir);
        }
        if let Some(addr) = file.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(rate) = file.minimum_success_rate {
            self.distributor.minimum_success_rate = rate;
        }
        if let Some(flag) = file.auto_rollback_on_failure {
            self.distributor.auto_rollback_on_failure = flag;
        }
        self
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file: FleetConfigFile = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_slice(&bytes)?
        } else {
            toml_like_parse(&bytes)?
        };
        Ok(FleetConfig::default().apply_file(file))
    }
}

/// Minimal TOML-free parser for the handful of `key = value` lines this
/// config supports, keeping the dependency surface aligned with what the
/// rest of the crate already pulls in (serde_json, no toml crate).
fn toml_like_parse(bytes: &[u8]) -> anyhow::Result<FleetConfigFile> {
    let text = String::from_utf8_lossy(bytes);
    let mut file = FleetConfigFile::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "max_agents" => file.max_agents = value.parse().ok(),
            "token_secret" => file.token_secret = Some(value.to_string()),
            "token_issuer" => file.token_issuer = Some(value.to_string()),
            "policy_dir" => file.policy_dir = Some(value.to_string()),
            "bind_addr" => file.bind_addr = Some(value.to_string()),
            "minimum_success_rate" => file.minimum_success_rate = value.parse().ok(),
            "auto_rollback_on_failure" => file.auto_rollback_on_failure = value.parse().ok(),
            _ => {}
        }
    }
    Ok(file)
}
