//! Shape of what the MDM bridge imports into and exports from the core.
//! Third-party REST client adapters (Jamf/Mosyle/Kandji) are out of scope;
//! this module only defines the records that cross that boundary and a
//! `Connector` trait flattening the `MDMConnector` hierarchy (spec §9).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A policy payload as the MDM bridge would import it into the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MDMPolicy {
    pub external_id: String,
    pub name: String,
    pub raw_payload: serde_json::Value,
}

/// A command the core exports for the MDM bridge to relay to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MDMCommand {
    pub agent_id: String,
    pub command_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum MdmError {
    #[error("connector not configured")]
    NotConfigured,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Jamf,
    Mosyle,
    Kandji,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn provider(&self) -> Provider;
    async fn import_policies(&self) -> Result<Vec<MDMPolicy>, MdmError>;
    async fn dispatch_command(&self, command: MDMCommand) -> Result<(), MdmError>;
}

pub struct JamfConnector;
pub struct MosyleConnector;
pub struct KandjiConnector;

#[async_trait]
impl Connector for JamfConnector {
    fn provider(&self) -> Provider {
        Provider::Jamf
    }
    async fn import_policies(&self) -> Result<Vec<MDMPolicy>, MdmError> {
        Err(MdmError::NotConfigured)
    }
    async fn dispatch_command(&self, _command: MDMCommand) -> Result<(), MdmError> {
        Err(MdmError::NotConfigured)
    }
}

#[async_trait]
impl Connector for MosyleConnector {
    fn provider(&self) -> Provider {
        Provider::Mosyle
    }
    async fn import_policies(&self) -> Result<Vec<MDMPolicy>, MdmError> {
        Err(MdmError::NotConfigured)
    }
    async fn dispatch_command(&self, _command: MDMCommand) -> Result<(), MdmError> {
        Err(MdmError::NotConfigured)
    }
}

#[async_trait]
impl Connector for KandjiConnector {
    fn provider(&self) -> Provider {
        Provider::Kandji
    }
    async fn import_policies(&self) -> Result<Vec<MDMPolicy>, MdmError> {
        Err(MdmError::NotConfigured)
    }
    async fn dispatch_command(&self, _command: MDMCommand) -> Result<(), MdmError> {
        Err(MdmError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_connectors_report_not_configured() {
        let connectors: Vec<Box<dyn Connector>> =
            vec![Box::new(JamfConnector), Box::new(MosyleConnector), Box::new(KandjiConnector)];
        for connector in connectors {
            assert!(matches!(
                connector.import_policies().await,
                Err(MdmError::NotConfigured)
            ));
        }
    }

    #[test]
    fn provider_tags_are_distinct() {
        assert_ne!(JamfConnector.provider(), MosyleConnector.provider());
    }
}
