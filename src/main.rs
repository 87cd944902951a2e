//! AWS Service Roles Manager
//!
//! A CLI agent that creates or deletes one IAM execution role per AWS
//! service reported by the account's Service Quotas catalog.
//!
//! # Usage
//! ```bash
//! # Create a role per service (default mode)
//! aws-service-roles-manager --create
//!
//! # Delete them again, deregistering from the allow-list registry
//! aws-service-roles-manager --delete --auto-cleanup-api https://cleanup.example.com/allowlist
//!
//! # Use a named credential profile and a custom role suffix
//! aws-service-roles-manager --aws-profile sandbox --role-suffix power-user
//! ```

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use aws_service_roles::allowlist::{AllowlistRegistry, HttpAllowlist};
use aws_service_roles::catalog;
use aws_service_roles::iam::SdkRoleStore;
use aws_service_roles::orchestrator::{self, Mode};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "aws-service-roles-manager")]
#[command(about = "Create or delete per-service AWS IAM execution roles", long_about = None)]
#[command(version)]
struct Cli {
    /// Create roles for every admitted service (default mode)
    #[arg(long, conflicts_with = "delete")]
    create: bool,

    /// Delete roles for every admitted service
    #[arg(long)]
    delete: bool,

    /// Suffix appended to each service code to form the role name
    #[arg(long, default_value = "power-user")]
    role_suffix: String,

    /// AWS Auto Cleanup allow-list API URL
    #[arg(long, env = "AUTO_CLEANUP_API")]
    auto_cleanup_api: Option<String>,

    /// Named AWS credential profile
    #[arg(long)]
    aws_profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mode = if cli.delete { Mode::Delete } else { Mode::Create };
    info!("🚀 AWS Service Roles Manager starting in {} mode...", mode);

    // Profile selection is threaded into client construction, never a
    // process-global default session.
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = cli.aws_profile.as_deref() {
        info!("🔐 Using AWS credential profile: {}", profile);
        loader = loader.profile_name(profile);
    }
    let config = loader.load().await;

    let quotas = aws_sdk_servicequotas::Client::new(&config);
    let store = SdkRoleStore::new(aws_sdk_iam::Client::new(&config));

    let registry = match cli.auto_cleanup_api {
        Some(url) => {
            info!("📡 Allow-list registry configured: {}", url);
            Some(HttpAllowlist::new(url).context("Failed to build allow-list HTTP client")?)
        }
        None => None,
    };
    let allowlist = registry.as_ref().map(|r| r as &dyn AllowlistRegistry);

    // A catalog failure is the one fatal error: with no service list there
    // is no work to define.
    let services = catalog::list_admitted_services(&quotas).await?;
    info!("📋 {} services admitted for reconciliation", services.len());

    let summary =
        orchestrator::run(mode, &services, &cli.role_suffix, &store, allowlist).await;

    match mode {
        Mode::Create => info!(
            "✅ Run complete: {} created, {} already existed, {} blocked, {} roles with step failures",
            summary.created(),
            summary.already_existed(),
            summary.blocked(),
            summary.with_failures(),
        ),
        Mode::Delete => info!(
            "✅ Run complete: {} deleted, {} not found, {} blocked, {} roles with step failures",
            summary.deleted(),
            summary.not_found(),
            summary.blocked(),
            summary.with_failures(),
        ),
    }

    Ok(())
}
