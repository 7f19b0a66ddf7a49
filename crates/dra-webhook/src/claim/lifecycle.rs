use std::sync::Arc;

use api_types::ResourceClaim;
use error_stack::Report;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::store::ClaimStore;
use super::store::StoreError;
use super::ClaimError;

/// Idempotent claim creation and deletion on top of a [`ClaimStore`].
///
/// Admission requests are delivered at least once, so a claim that already
/// exists counts as created and a claim that is already gone counts as
/// deleted.
#[derive(Clone)]
pub struct ClaimLifecycle {
    store: Arc<dyn ClaimStore>,
}

impl ClaimLifecycle {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    /// Create `claim`.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::Create`] for any store failure other than already-exists
    pub async fn create(&self, claim: &ResourceClaim) -> Result<(), Report<ClaimError>> {
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        let name = claim.metadata.name.as_deref().unwrap_or_default();

        match self.store.create(claim).await {
            Ok(()) => {
                info!(namespace, claim = name, "Created ResourceClaim");
                Ok(())
            }
            Err(report) if matches!(report.current_context(), StoreError::AlreadyExists { .. }) => {
                debug!(namespace, claim = name, "ResourceClaim already exists");
                Ok(())
            }
            Err(report) => Err(report.change_context(ClaimError::Create {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })),
        }
    }

    /// Delete the named claim.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::Delete`] for any store failure other than not-found
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), Report<ClaimError>> {
        match self.store.delete(namespace, name).await {
            Ok(()) => {
                info!(namespace, claim = name, "Deleted ResourceClaim");
                Ok(())
            }
            Err(report) if matches!(report.current_context(), StoreError::NotFound { .. }) => {
                debug!(namespace, claim = name, "ResourceClaim already deleted");
                Ok(())
            }
            Err(report) => Err(report.change_context(ClaimError::Delete {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })),
        }
    }

    /// Best-effort deletion of claims created earlier in a request that is
    /// now failing. Failures are logged and never returned.
    pub async fn compensate(&self, namespace: &str, names: &[String]) {
        for name in names {
            if let Err(report) = self.delete(namespace, name).await {
                warn!(
                    namespace,
                    claim = %name,
                    error = ?report,
                    "Failed to delete ResourceClaim during compensation"
                );
            }
        }
    }
}
