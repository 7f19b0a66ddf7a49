use std::collections::BTreeMap;

use api_types::AllocationMode;
use api_types::CapacityRequirements;
use api_types::DeviceClaim;
use api_types::DeviceRequest;
use api_types::ExactDeviceRequest;
use api_types::ResourceClaim;
use api_types::ResourceClaimSpec;
use api_types::GPU_REQUEST_NAME;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use super::claim_name;
use super::ClaimError;
use super::ClaimLifecycle;
use super::SelectorBuilder;
use crate::config::ResourceNameMapping;
use crate::quantity;

/// Capacity name the core resource is requested under.
pub const CORES_CAPACITY: &str = "cores";
/// Capacity name the memory resource is requested under.
pub const MEMORY_CAPACITY: &str = "memory";

/// The workload a container belongs to.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadRef<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub annotations: Option<&'a BTreeMap<String, String>>,
}

/// Translates the legacy GPU limits of one container into a ResourceClaim.
pub struct ClaimTranslator<'a> {
    mapping: &'a ResourceNameMapping,
    lifecycle: &'a ClaimLifecycle,
}

impl<'a> ClaimTranslator<'a> {
    pub fn new(mapping: &'a ResourceNameMapping, lifecycle: &'a ClaimLifecycle) -> Self {
        Self { mapping, lifecycle }
    }

    /// Build the claim for `container` without touching the store.
    ///
    /// Returns `None` when the container's limits carry no count resource.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::InvalidQuantity`] if the count is malformed or below one
    pub fn build_claim(
        &self,
        workload: &WorkloadRef<'_>,
        container: &Container,
    ) -> Result<Option<ResourceClaim>, Report<ClaimError>> {
        let Some(limits) = container
            .resources
            .as_ref()
            .and_then(|resources| resources.limits.as_ref())
        else {
            return Ok(None);
        };
        let Some(count) = limits.get(&self.mapping.count_name) else {
            return Ok(None);
        };

        let invalid_count = || ClaimError::InvalidQuantity {
            container: container.name.clone(),
            resource: self.mapping.count_name.clone(),
            value: count.0.clone(),
        };
        let count = quantity::integer_value(count).change_context_lazy(invalid_count)?;
        if count < 1 {
            return Err(Report::new(invalid_count())
                .attach_printable("device count must be at least 1"));
        }

        let mut capacity = BTreeMap::new();
        if let Some(cores) = limits.get(&self.mapping.core_name) {
            capacity.insert(CORES_CAPACITY.to_string(), cores.clone());
        }
        if let Some(memory) = limits.get(&self.mapping.memory_name) {
            capacity.insert(MEMORY_CAPACITY.to_string(), memory.clone());
        }

        let request = ExactDeviceRequest {
            device_class_name: self.mapping.device_class_name.clone(),
            allocation_mode: AllocationMode::ExactCount,
            count,
            capacity: (!capacity.is_empty())
                .then_some(CapacityRequirements { requests: capacity }),
            selectors: SelectorBuilder::new(self.mapping).build(workload.annotations),
        };
        let spec = ResourceClaimSpec {
            devices: DeviceClaim {
                requests: vec![DeviceRequest {
                    name: GPU_REQUEST_NAME.to_string(),
                    exactly: Some(request),
                }],
            },
        };

        Ok(Some(ResourceClaim::new(
            claim_name(workload.namespace, workload.name, &container.name),
            workload.namespace,
            spec,
        )))
    }

    /// Translate `container`, creating its claim in the store.
    ///
    /// On success the count, core and memory entries are removed from the
    /// container's requests and limits and the claim name is returned. The
    /// container is left untouched when no claim is needed or on error.
    ///
    /// # Errors
    ///
    /// - any error of [`Self::build_claim`]
    /// - [`ClaimError::Create`] if the store rejects the claim
    pub async fn translate(
        &self,
        workload: &WorkloadRef<'_>,
        container: &mut Container,
    ) -> Result<Option<String>, Report<ClaimError>> {
        let Some(claim) = self.build_claim(workload, container)? else {
            debug!(
                namespace = workload.namespace,
                workload = workload.name,
                container = %container.name,
                "Container has no GPU count limit, skipping"
            );
            return Ok(None);
        };

        self.lifecycle.create(&claim).await?;
        self.strip_legacy_resources(container);

        Ok(claim.metadata.name)
    }

    fn strip_legacy_resources(&self, container: &mut Container) {
        let Some(resources) = container.resources.as_mut() else {
            return;
        };
        let names = [
            &self.mapping.count_name,
            &self.mapping.core_name,
            &self.mapping.memory_name,
        ];
        let strip = |map: &mut Option<BTreeMap<String, Quantity>>| {
            if let Some(map) = map {
                for name in names {
                    map.remove(name);
                }
            }
        };
        strip(&mut resources.requests);
        strip(&mut resources.limits);
    }
}
