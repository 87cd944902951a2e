//! AWS Service Roles Manager Library
//!
//! Reconciles per-service IAM execution roles against the account's
//! Service Quotas catalog: one role per admitted service, with trust
//! policy, managed-policy attachments, the ec2-only instance-profile
//! binding, and an optional allow-list registration.

pub mod allowlist;
pub mod catalog;
pub mod iam;
pub mod orchestrator;
pub mod reconciler;

pub use allowlist::{AllowlistRegistry, HttpAllowlist};
pub use catalog::{list_admitted_services, ServiceDescriptor};
pub use iam::{RoleStore, SdkRoleStore};
pub use orchestrator::{run, Mode, RunSummary};
pub use reconciler::{Disposition, RoleReport, RoleSpec, Step};
