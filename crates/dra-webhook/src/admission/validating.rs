use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use kube::core::admission::Operation;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::decode_pod;
use super::errored;
use super::patch;
use super::AdmissionError;
use super::AdmissionHandler;
use crate::claim::claim_name;
use crate::claim::ClaimLifecycle;
use crate::claim::ClaimStore;
use crate::config::ResourceNameMapping;

/// Deletes the ResourceClaims of a managed pod when the pod is deleted.
///
/// Every request is allowed. Cleanup is best effort.
pub struct ValidatingAdmission {
    mapping: Arc<ResourceNameMapping>,
    lifecycle: ClaimLifecycle,
}

impl ValidatingAdmission {
    pub fn new(mapping: Arc<ResourceNameMapping>, store: Arc<dyn ClaimStore>) -> Self {
        Self {
            mapping,
            lifecycle: ClaimLifecycle::new(store),
        }
    }

    async fn cleanup(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<(), Report<AdmissionError>> {
        if !matches!(request.operation, Operation::Delete) {
            return Ok(());
        }
        let Some(old_object) = request.old_object.as_ref() else {
            debug!(uid = %request.uid, "Delete request without prior object, nothing to clean up");
            return Ok(());
        };

        let pod = decode_pod(request, old_object)?;
        if !patch::is_managed(&pod, &self.mapping.managed_label) {
            debug!(uid = %request.uid, "Pod is not managed, nothing to clean up");
            return Ok(());
        }

        let namespace = pod
            .metadata
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .or_else(|| request.namespace.clone())
            .unwrap_or_default();
        let name = pod
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| request.name.clone());
        info!(namespace = %namespace, pod = %name, "Deleting ResourceClaims of managed pod");

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();
        for container in containers {
            let claim = claim_name(&namespace, &name, &container.name);
            if let Err(report) = self.lifecycle.delete(&namespace, &claim).await {
                warn!(
                    namespace = %namespace,
                    claim = %claim,
                    error = ?report,
                    "Failed to delete ResourceClaim, continuing"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AdmissionHandler for ValidatingAdmission {
    async fn handle(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        match self.cleanup(request).await {
            Ok(()) => AdmissionResponse::from(request),
            Err(report) => {
                warn!(uid = %request.uid, error = ?report, "Failed to decode deleted pod");
                errored(request, &report)
            }
        }
    }
}
