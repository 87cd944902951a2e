//! Run Orchestrator
//!
//! Drives the catalog → reconciler loop: one role workflow per admitted
//! service, strictly in sequence, with no state shared between iterations.
//! A role's failure never stops the services after it; everything that
//! happened is collected into a run summary.

use serde::Serialize;
use tracing::info;

use crate::allowlist::AllowlistRegistry;
use crate::catalog::ServiceDescriptor;
use crate::iam::{RoleStore, POLICY_ARNS};
use crate::reconciler::{self, Disposition, RoleReport, RoleSpec};

/// Run mode selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Delete,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Create => write!(f, "create"),
            Mode::Delete => write!(f, "delete"),
        }
    }
}

/// Aggregate outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<RoleReport>,
}

impl RunSummary {
    fn count(&self, disposition: Disposition) -> usize {
        self.reports
            .iter()
            .filter(|r| r.disposition == disposition)
            .count()
    }

    pub fn created(&self) -> usize {
        self.count(Disposition::Created)
    }

    pub fn already_existed(&self) -> usize {
        self.count(Disposition::AlreadyExists)
    }

    pub fn deleted(&self) -> usize {
        self.count(Disposition::Deleted)
    }

    pub fn not_found(&self) -> usize {
        self.count(Disposition::NotFound)
    }

    pub fn blocked(&self) -> usize {
        self.count(Disposition::Failed)
    }

    /// Roles with at least one failed step, blocking or not
    pub fn with_failures(&self) -> usize {
        self.reports.iter().filter(|r| r.has_failures()).count()
    }
}

/// Reconcile every admitted service, one at a time
pub async fn run(
    mode: Mode,
    services: &[ServiceDescriptor],
    suffix: &str,
    store: &dyn RoleStore,
    allowlist: Option<&dyn AllowlistRegistry>,
) -> RunSummary {
    info!(
        "Reconciling {} services in {} mode (suffix: {})",
        services.len(),
        mode,
        suffix
    );

    let mut reports = Vec::with_capacity(services.len());
    for service in services {
        let spec = RoleSpec::new(&service.service_code, suffix);
        let report = match mode {
            Mode::Create => {
                reconciler::create_role(store, allowlist, &spec, &POLICY_ARNS).await
            }
            Mode::Delete => reconciler::delete_role(store, allowlist, &spec).await,
        };
        reports.push(report);
    }

    RunSummary { reports }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::RoleSummary;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Minimal store: roles exist only in delete tests, `create_role`
    /// fails for the service codes listed in `broken`.
    #[derive(Default)]
    struct ScriptedStore {
        broken: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoleStore for ScriptedStore {
        async fn get_role(&self, role_name: &str) -> Result<Option<RoleSummary>> {
            self.calls.lock().unwrap().push(format!("get_role:{role_name}"));
            Ok(None)
        }

        async fn create_role(&self, role_name: &str, _trust_policy: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create_role:{role_name}"));
            if self.broken.iter().any(|code| role_name.starts_with(code)) {
                Err(anyhow!("simulated create failure"))
            } else {
                Ok(())
            }
        }

        async fn delete_role(&self, _role_name: &str) -> Result<()> {
            Ok(())
        }

        async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("attach_role_policy:{role_name}:{policy_arn}"));
            Ok(())
        }

        async fn detach_role_policy(&self, _role_name: &str, _policy_arn: &str) -> Result<()> {
            Ok(())
        }

        async fn list_attached_role_policies(&self, _role_name: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn create_instance_profile(&self, profile_name: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create_instance_profile:{profile_name}"));
            Ok(())
        }

        async fn add_role_to_instance_profile(
            &self,
            _profile_name: &str,
            _role_name: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn remove_role_from_instance_profile(
            &self,
            _profile_name: &str,
            _role_name: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn delete_instance_profile(&self, _profile_name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn services(codes: &[&str]) -> Vec<ServiceDescriptor> {
        codes
            .iter()
            .map(|code| ServiceDescriptor {
                service_code: code.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_admitted_services_each_get_one_creation_attempt() {
        // Catalog filtering happens upstream; "vpc" never reaches the
        // orchestrator.
        let admitted = crate::catalog::admit(services(&["lambda", "vpc"]));
        let store = ScriptedStore::default();

        let summary = run(Mode::Create, &admitted, "power-user", &store, None).await;

        let creates: Vec<_> = store
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create_role"))
            .collect();
        assert_eq!(creates, vec!["create_role:lambda-power-user"]);
        assert_eq!(summary.created(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_service_does_not_stop_the_rest() {
        let store = ScriptedStore {
            broken: vec!["s3".to_string()],
            ..ScriptedStore::default()
        };

        let summary = run(
            Mode::Create,
            &services(&["s3", "lambda"]),
            "power-user",
            &store,
            None,
        )
        .await;

        assert!(store
            .calls()
            .contains(&"create_role:lambda-power-user".to_string()));
        assert_eq!(summary.blocked(), 1);
        assert_eq!(summary.created(), 1);
        assert_eq!(summary.with_failures(), 1);
    }

    #[tokio::test]
    async fn test_delete_mode_counts_missing_roles() {
        let store = ScriptedStore::default();
        let summary = run(
            Mode::Delete,
            &services(&["s3", "lambda"]),
            "power-user",
            &store,
            None,
        )
        .await;

        assert_eq!(summary.not_found(), 2);
        assert_eq!(summary.deleted(), 0);
    }
}
