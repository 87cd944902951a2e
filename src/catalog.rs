//! Service Catalog Reader
//!
//! Lists every service the account's Service Quotas catalog knows about,
//! page by page, and filters out the services that never get an execution
//! role. A pagination failure is fatal to the whole run: without the full
//! catalog there is no defined set of roles to reconcile.

use anyhow::{Context, Result};
use aws_sdk_servicequotas::Client as QuotasClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Services that never receive an execution role.
///
/// Exact-match against the catalog's service code; `cognito-sync` is not
/// covered by the `cognito` entry.
const SKIP_SERVICES: [&str; 12] = [
    "application-autoscaling",
    "appmesh",
    "appstream2",
    "AWSCloudMap",
    "cognito",
    "cognito-identity",
    "ecr",
    "fargate",
    "monitoring",
    "polly",
    "shield",
    "vpc",
];

/// A service reported by the Service Quotas catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Catalog identifier, e.g. `lambda` or `ec2`
    pub service_code: String,
}

/// Whether a service code is admitted for role reconciliation
pub fn is_admitted(service_code: &str) -> bool {
    !SKIP_SERVICES.contains(&service_code)
}

/// Drop every descriptor whose service code is in the exclusion set
pub fn admit(services: Vec<ServiceDescriptor>) -> Vec<ServiceDescriptor> {
    services
        .into_iter()
        .filter(|service| is_admitted(&service.service_code))
        .collect()
}

/// List all admitted services from the Service Quotas catalog
///
/// Consumes every page; any page failure propagates and aborts the run.
pub async fn list_admitted_services(client: &QuotasClient) -> Result<Vec<ServiceDescriptor>> {
    let mut services = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let mut req = client.list_services().max_results(100);
        if let Some(token) = next_token.take() {
            req = req.next_token(token);
        }

        let page = req
            .send()
            .await
            .context("Failed to list services from the Service Quotas catalog")?;

        for service in page.services() {
            if let Some(code) = service.service_code() {
                services.push(ServiceDescriptor {
                    service_code: code.to_string(),
                });
            }
        }

        match page.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    debug!("Catalog returned {} services before filtering", services.len());
    Ok(admit(services))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors(codes: &[&str]) -> Vec<ServiceDescriptor> {
        codes
            .iter()
            .map(|code| ServiceDescriptor {
                service_code: code.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_every_skipped_service_is_rejected() {
        for code in SKIP_SERVICES {
            assert!(!is_admitted(code), "{code} should be excluded");
        }
    }

    #[test]
    fn test_admits_regular_services() {
        assert!(is_admitted("lambda"));
        assert!(is_admitted("ec2"));
        assert!(is_admitted("s3"));
    }

    #[test]
    fn test_exclusion_is_exact_match() {
        // `cognito` is excluded, its siblings are not
        assert!(!is_admitted("cognito"));
        assert!(is_admitted("cognito-sync"));
        assert!(is_admitted("vpc-lattice"));
    }

    #[test]
    fn test_admit_filters_excluded_services() {
        let admitted = admit(descriptors(&["lambda", "vpc", "ec2", "monitoring"]));
        assert_eq!(admitted, descriptors(&["lambda", "ec2"]));
    }
}
