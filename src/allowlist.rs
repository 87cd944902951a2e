//! Allow-list Notifier
//!
//! Best-effort client for the AWS Auto Cleanup allow-list API. Registers a
//! role after a successful create and deregisters it after a successful
//! delete. Callers treat every failure here as a reported step failure,
//! never as something that stops role reconciliation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("AWSServiceRolesManager/", env!("CARGO_PKG_VERSION"));

/// Failure talking to the allow-list registry
#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("allow-list request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("allow-list registry returned {status} (expected {expected})")]
    UnexpectedStatus {
        status: StatusCode,
        expected: StatusCode,
    },
}

/// External registry keeping roles off the auto-cleanup radar
#[async_trait]
pub trait AllowlistRegistry: Send + Sync {
    /// Register a newly created role with the registry
    async fn register(&self, role_name: &str) -> Result<(), AllowlistError>;

    /// Remove a deleted role's registration
    async fn deregister(&self, role_name: &str) -> Result<(), AllowlistError>;
}

/// Registry resource id for a role
pub fn resource_id(role_name: &str) -> String {
    format!("iam:role:{role_name}")
}

/// `AllowlistRegistry` backed by an HTTP endpoint
pub struct HttpAllowlist {
    client: Client,
    endpoint: String,
}

impl HttpAllowlist {
    pub fn new(endpoint: String) -> Result<Self, AllowlistError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AllowlistRegistry for HttpAllowlist {
    async fn register(&self, role_name: &str) -> Result<(), AllowlistError> {
        let resource_id = resource_id(role_name);
        debug!("Registering '{}' with the allow-list registry", resource_id);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("resource_id", resource_id.as_str()),
                ("owner", ""),
                ("comment", "AWS Service Roles Manager"),
                ("permanent", "true"),
            ])
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(AllowlistError::UnexpectedStatus {
                status: response.status(),
                expected: StatusCode::CREATED,
            });
        }

        Ok(())
    }

    async fn deregister(&self, role_name: &str) -> Result<(), AllowlistError> {
        let resource_id = resource_id(role_name);
        debug!("Deregistering '{}' from the allow-list registry", resource_id);

        let response = self
            .client
            .delete(&self.endpoint)
            .query(&[("resource_id", resource_id.as_str())])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(AllowlistError::UnexpectedStatus {
                status: response.status(),
                expected: StatusCode::OK,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_format() {
        assert_eq!(resource_id("lambda-power-user"), "iam:role:lambda-power-user");
    }

    #[test]
    fn test_user_agent_carries_crate_version() {
        assert!(USER_AGENT.starts_with("AWSServiceRolesManager/"));
        assert!(USER_AGENT.len() > "AWSServiceRolesManager/".len());
    }

    #[test]
    fn test_unexpected_status_message() {
        let err = AllowlistError::UnexpectedStatus {
            status: StatusCode::FORBIDDEN,
            expected: StatusCode::CREATED,
        };
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("201"));
    }
}
