//! Role Reconciler
//!
//! The per-service create and delete workflows, written as explicit step
//! sequences. Each step is attempted once and its outcome recorded; a
//! failure only stops the workflow where a later step genuinely cannot
//! proceed without it (no role, no attachments to make). Nothing here ever
//! returns an error to the orchestrator: sibling services must not be
//! affected.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::allowlist::AllowlistRegistry;
use crate::iam::{trust_policy_document, RoleStore};

/// Desired state for one service's execution role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSpec {
    pub service_name: String,
    pub role_name: String,
}

impl RoleSpec {
    /// Derive the role spec for a service; `role_name` is a pure function
    /// of `(service_name, suffix)`.
    pub fn new(service_name: &str, suffix: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            role_name: format!("{service_name}-{suffix}"),
        }
    }

    /// Only ec2 roles carry an instance-profile binding, named after the role
    fn wants_instance_profile(&self) -> bool {
        self.service_name == "ec2"
    }
}

/// A named step in the create or delete workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CheckExisting,
    CreateRole,
    CreateInstanceProfile,
    AddRoleToInstanceProfile,
    AttachPolicy(String),
    RegisterAllowlist,
    FetchExisting,
    ListAttachedPolicies,
    DetachPolicy(String),
    RemoveRoleFromInstanceProfile,
    DeleteInstanceProfile,
    DeleteRole,
    DeregisterAllowlist,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::CheckExisting => write!(f, "check-existing"),
            Step::CreateRole => write!(f, "create-role"),
            Step::CreateInstanceProfile => write!(f, "create-instance-profile"),
            Step::AddRoleToInstanceProfile => write!(f, "add-role-to-instance-profile"),
            Step::AttachPolicy(arn) => write!(f, "attach-policy {arn}"),
            Step::RegisterAllowlist => write!(f, "register-allowlist"),
            Step::FetchExisting => write!(f, "fetch-existing"),
            Step::ListAttachedPolicies => write!(f, "list-attached-policies"),
            Step::DetachPolicy(arn) => write!(f, "detach-policy {arn}"),
            Step::RemoveRoleFromInstanceProfile => write!(f, "remove-role-from-instance-profile"),
            Step::DeleteInstanceProfile => write!(f, "delete-instance-profile"),
            Step::DeleteRole => write!(f, "delete-role"),
            Step::DeregisterAllowlist => write!(f, "deregister-allowlist"),
        }
    }
}

/// Outcome of a single attempted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
}

/// One attempted step, tagged with its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Terminal state of one role's reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Create mode: the role was created (later steps may still have failed)
    Created,
    /// Create mode: the role was already present, nothing mutated
    AlreadyExists,
    /// Delete mode: the role was deleted
    Deleted,
    /// Delete mode: the role was not there to delete, nothing mutated
    NotFound,
    /// The workflow's blocking step failed
    Failed,
}

/// Everything that happened while reconciling one role
#[derive(Debug, Clone, Serialize)]
pub struct RoleReport {
    pub service_name: String,
    pub role_name: String,
    pub disposition: Disposition,
    pub steps: Vec<StepReport>,
}

impl RoleReport {
    fn new(spec: &RoleSpec) -> Self {
        Self {
            service_name: spec.service_name.clone(),
            role_name: spec.role_name.clone(),
            disposition: Disposition::Failed,
            steps: Vec::new(),
        }
    }

    fn succeed(&mut self, step: Step) {
        debug!("[{}] {} succeeded", self.role_name, step);
        self.steps.push(StepReport {
            step,
            outcome: StepOutcome::Succeeded,
        });
    }

    fn fail(&mut self, step: Step, reason: String) {
        error!("{reason}");
        self.steps.push(StepReport {
            step,
            outcome: StepOutcome::Failed(reason),
        });
    }

    /// Whether any attempted step failed
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }
}

/// Ensure the role for `spec` exists, with trust policy, managed-policy
/// attachments, the ec2-only instance-profile binding, and an allow-list
/// registration.
///
/// Role presence alone gates creation; an existing role is an idempotent
/// no-op with no policy or trust-document diffing.
pub async fn create_role(
    store: &dyn RoleStore,
    allowlist: Option<&dyn AllowlistRegistry>,
    spec: &RoleSpec,
    policy_arns: &[&str],
) -> RoleReport {
    let mut report = RoleReport::new(spec);

    // A failed probe is not a create precondition; only a confirmed
    // existing role stops the workflow.
    match store.get_role(&spec.role_name).await {
        Ok(Some(_)) => {
            warn!("IAM Role '{}' already exists.", spec.role_name);
            report.succeed(Step::CheckExisting);
            report.disposition = Disposition::AlreadyExists;
            return report;
        }
        Ok(None) => report.succeed(Step::CheckExisting),
        Err(err) => report.fail(Step::CheckExisting, format!("{err:#}")),
    }

    let trust_policy = trust_policy_document(&spec.service_name);
    if let Err(err) = store.create_role(&spec.role_name, &trust_policy).await {
        report.fail(Step::CreateRole, format!("{err:#}"));
        return report;
    }
    info!("Created new IAM Role '{}'.", spec.role_name);
    report.succeed(Step::CreateRole);
    report.disposition = Disposition::Created;

    // Instance-profile work comes before policy attachment; binding is
    // gated on the profile existing, nothing downstream is gated on either.
    if spec.wants_instance_profile() {
        match store.create_instance_profile(&spec.role_name).await {
            Ok(()) => {
                report.succeed(Step::CreateInstanceProfile);
                match store
                    .add_role_to_instance_profile(&spec.role_name, &spec.role_name)
                    .await
                {
                    Ok(()) => report.succeed(Step::AddRoleToInstanceProfile),
                    Err(err) => {
                        report.fail(Step::AddRoleToInstanceProfile, format!("{err:#}"))
                    }
                }
            }
            Err(err) => report.fail(Step::CreateInstanceProfile, format!("{err:#}")),
        }
    }

    // Every attachment is attempted regardless of earlier failures.
    for arn in policy_arns {
        match store.attach_role_policy(&spec.role_name, arn).await {
            Ok(()) => report.succeed(Step::AttachPolicy(arn.to_string())),
            Err(err) => report.fail(Step::AttachPolicy(arn.to_string()), format!("{err:#}")),
        }
    }

    if let Some(registry) = allowlist {
        match registry.register(&spec.role_name).await {
            Ok(()) => report.succeed(Step::RegisterAllowlist),
            Err(err) => report.fail(
                Step::RegisterAllowlist,
                format!(
                    "Could not add IAM Role '{}' to the allow-list registry: {err}",
                    spec.role_name
                ),
            ),
        }
    }

    report
}

/// Remove the role for `spec` along with whatever is actually attached to
/// it right now, the ec2-only instance-profile binding, and its allow-list
/// registration.
///
/// The attached-policy set is discovered live; the create-time set is not
/// trusted.
pub async fn delete_role(
    store: &dyn RoleStore,
    allowlist: Option<&dyn AllowlistRegistry>,
    spec: &RoleSpec,
) -> RoleReport {
    let mut report = RoleReport::new(spec);

    match store.get_role(&spec.role_name).await {
        Ok(Some(_)) => report.succeed(Step::FetchExisting),
        Ok(None) => {
            warn!("IAM Role '{}' does not exist.", spec.role_name);
            report.succeed(Step::FetchExisting);
            report.disposition = Disposition::NotFound;
            return report;
        }
        Err(err) => {
            report.fail(
                Step::FetchExisting,
                format!(
                    "Could not retrieve details of IAM Role '{}': {err:#}",
                    spec.role_name
                ),
            );
            return report;
        }
    }

    // Without the live attachment list nothing further can be attempted
    // safely.
    let attached = match store.list_attached_role_policies(&spec.role_name).await {
        Ok(arns) => {
            report.succeed(Step::ListAttachedPolicies);
            arns
        }
        Err(err) => {
            report.fail(Step::ListAttachedPolicies, format!("{err:#}"));
            return report;
        }
    };

    for arn in &attached {
        match store.detach_role_policy(&spec.role_name, arn).await {
            Ok(()) => report.succeed(Step::DetachPolicy(arn.clone())),
            Err(err) => report.fail(Step::DetachPolicy(arn.clone()), format!("{err:#}")),
        }
    }

    // The profile must be unbound before it can be deleted, so the second
    // step is gated on the first.
    if spec.wants_instance_profile() {
        match store
            .remove_role_from_instance_profile(&spec.role_name, &spec.role_name)
            .await
        {
            Ok(()) => {
                report.succeed(Step::RemoveRoleFromInstanceProfile);
                match store.delete_instance_profile(&spec.role_name).await {
                    Ok(()) => report.succeed(Step::DeleteInstanceProfile),
                    Err(err) => report.fail(Step::DeleteInstanceProfile, format!("{err:#}")),
                }
            }
            Err(err) => report.fail(Step::RemoveRoleFromInstanceProfile, format!("{err:#}")),
        }
    }

    // Attempted even when detach steps failed; the provider decides whether
    // a lingering attachment blocks deletion and its rejection is reported
    // like any other step failure.
    match store.delete_role(&spec.role_name).await {
        Ok(()) => {
            info!("Deleted IAM Role '{}'.", spec.role_name);
            report.succeed(Step::DeleteRole);
            report.disposition = Disposition::Deleted;
        }
        Err(err) => {
            report.fail(Step::DeleteRole, format!("{err:#}"));
            return report;
        }
    }

    if let Some(registry) = allowlist {
        match registry.deregister(&spec.role_name).await {
            Ok(()) => report.succeed(Step::DeregisterAllowlist),
            Err(err) => report.fail(
                Step::DeregisterAllowlist,
                format!(
                    "Could not delete IAM Role '{}' from the allow-list registry: {err}",
                    spec.role_name
                ),
            ),
        }
    }

    report
}
