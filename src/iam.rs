//! Identity Provider Adapter
//!
//! Trait-based seam over the IAM role, policy, and instance-profile
//! operations the reconciler needs, plus the `aws-sdk-iam` implementation.
//! IAM is the sole source of truth for existence and attachment state;
//! nothing here caches across calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

/// Managed policies every created role carries
pub const POLICY_ARNS: [&str; 1] = ["arn:aws:iam::aws:policy/PowerUserAccess"];

/// Build the assume-role trust policy for a service principal
///
/// Generated fresh on every create and never read back or diffed.
pub fn trust_policy_document(service_name: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "",
                "Effect": "Allow",
                "Principal": { "Service": format!("{service_name}.amazonaws.com") },
                "Action": "sts:AssumeRole",
            }
        ],
    })
    .to_string()
}

/// IAM operations used by the reconciler
///
/// `get_role` maps the provider's NoSuchEntity rejection to `Ok(None)`;
/// every other provider error surfaces as `Err`.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Fetch a role by name, `Ok(None)` when it does not exist
    async fn get_role(&self, role_name: &str) -> Result<Option<RoleSummary>>;

    /// Create a role with the given trust policy document
    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<()>;

    /// Delete a role (rejected by the provider while attachments remain)
    async fn delete_role(&self, role_name: &str) -> Result<()>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()>;

    /// List the ARNs of all managed policies currently attached to a role
    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>>;

    /// Create an instance profile
    async fn create_instance_profile(&self, profile_name: &str) -> Result<()>;

    /// Bind a role to an instance profile
    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str)
        -> Result<()>;

    /// Unbind a role from an instance profile
    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()>;

    /// Delete an instance profile (must be unbound first)
    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()>;
}

/// The slice of a role the reconciler cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSummary {
    pub arn: String,
}

/// `RoleStore` backed by the AWS IAM API
pub struct SdkRoleStore {
    client: aws_sdk_iam::Client,
}

impl SdkRoleStore {
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RoleStore for SdkRoleStore {
    async fn get_role(&self, role_name: &str) -> Result<Option<RoleSummary>> {
        match self.client.get_role().role_name(role_name).send().await {
            Ok(out) => Ok(out.role().map(|role| RoleSummary {
                arn: role.arn().to_string(),
            })),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_entity_exception()) => {
                Ok(None)
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to fetch IAM Role '{role_name}'"))
            }
        }
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<()> {
        self.client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .with_context(|| format!("Failed to create IAM Role '{role_name}'"))?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        self.client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .with_context(|| format!("Failed to delete IAM Role '{role_name}'"))?;
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .with_context(|| {
                format!("Failed to attach IAM Policy '{policy_arn}' to IAM Role '{role_name}'")
            })?;
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .with_context(|| {
                format!("Failed to detach IAM Policy '{policy_arn}' from IAM Role '{role_name}'")
            })?;
        Ok(())
    }

    async fn list_attached_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut req = self.client.list_attached_role_policies().role_name(role_name);
            if let Some(m) = marker.take() {
                req = req.marker(m);
            }

            let page = req.send().await.with_context(|| {
                format!("Failed to list attached IAM Policies for IAM Role '{role_name}'")
            })?;

            for policy in page.attached_policies() {
                if let Some(arn) = policy.policy_arn() {
                    arns.push(arn.to_string());
                }
            }

            match page.marker().filter(|_| page.is_truncated()) {
                Some(m) => marker = Some(m.to_string()),
                None => break,
            }
        }

        Ok(arns)
    }

    async fn create_instance_profile(&self, profile_name: &str) -> Result<()> {
        self.client
            .create_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .with_context(|| format!("Failed to create IAM Instance Profile '{profile_name}'"))?;
        Ok(())
    }

    async fn add_role_to_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()> {
        self.client
            .add_role_to_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to add IAM Role '{role_name}' to IAM Instance Profile '{profile_name}'"
                )
            })?;
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()> {
        self.client
            .remove_role_from_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to remove IAM Role '{role_name}' from IAM Instance Profile '{profile_name}'"
                )
            })?;
        Ok(())
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()> {
        self.client
            .delete_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .with_context(|| format!("Failed to delete IAM Instance Profile '{profile_name}'"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_policy_shape() {
        let doc = trust_policy_document("lambda");
        let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();

        assert_eq!(parsed["Version"], "2012-10-17");
        let statement = &parsed["Statement"][0];
        assert_eq!(statement["Sid"], "");
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Principal"]["Service"], "lambda.amazonaws.com");
        assert_eq!(statement["Action"], "sts:AssumeRole");
        assert_eq!(parsed["Statement"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_trust_policy_embeds_service_principal() {
        let doc = trust_policy_document("ec2");
        assert!(doc.contains("ec2.amazonaws.com"));
        assert!(!doc.contains("lambda"));
    }
}
