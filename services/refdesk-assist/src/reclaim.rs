//! Best-effort release of provider resources.

use crate::gateway::{ProviderGateway, ResourceKind};
use serde::Serialize;

/// Outcome of releasing a set of provider resources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseReport {
    pub released: usize,
    pub failures: Vec<ReleaseFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseFailure {
    pub kind: ResourceKind,
    pub id: String,
    pub error: String,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delete each resource in the given order. Every delete is independent:
/// `NotFound` counts as released, any other failure is logged and recorded
/// without stopping the remaining deletes.
pub async fn release_resources(
    gateway: &dyn ProviderGateway,
    resources: &[(ResourceKind, String)],
) -> ReleaseReport {
    let mut report = ReleaseReport::default();

    for (kind, id) in resources {
        match gateway.delete_resource(*kind, id).await {
            Ok(()) => {
                tracing::debug!(kind = %kind, id = %id, "Released provider resource");
                report.released += 1;
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind = %kind, id = %id, "Provider resource already gone");
                report.released += 1;
            }
            Err(e) => {
                tracing::warn!(kind = %kind, id = %id, error = %e, "Failed to release provider resource");
                report.failures.push(ReleaseFailure {
                    kind: *kind,
                    id: id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    report
}
