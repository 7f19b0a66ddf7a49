//! Writes claim references back onto the pod and diffs the result.

use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodResourceClaim;
use k8s_openapi::api::core::v1::ResourceClaim as ContainerClaim;
use serde::Serialize;

use super::AdmissionError;

/// Value of the managed label on mutated pods.
pub const MANAGED_LABEL_VALUE: &str = "true";

/// Reference the claim from the container's `resources.claims`.
pub fn attach_container_claim(container: &mut Container, claim: &str) {
    let claims = container
        .resources
        .get_or_insert_with(Default::default)
        .claims
        .get_or_insert_with(Vec::new);
    if !claims.iter().any(|existing| existing.name == claim) {
        claims.push(ContainerClaim {
            name: claim.to_string(),
            ..Default::default()
        });
    }
}

/// Add a pod-level `spec.resourceClaims` entry for every claim.
///
/// The entry name equals the claim name, which is what the container-level
/// reference points at.
pub fn attach_workload_claims(pod: &mut Pod, claims: &[String]) {
    let pod_claims = pod
        .spec
        .get_or_insert_with(Default::default)
        .resource_claims
        .get_or_insert_with(Vec::new);
    for claim in claims {
        if pod_claims.iter().any(|existing| &existing.name == claim) {
            continue;
        }
        pod_claims.push(PodResourceClaim {
            name: claim.clone(),
            resource_claim_name: Some(claim.clone()),
            ..Default::default()
        });
    }
}

pub fn mark_managed(pod: &mut Pod, label: &str) {
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(label.to_string(), MANAGED_LABEL_VALUE.to_string());
}

pub fn is_managed(pod: &Pod, label: &str) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(label))
}

/// JSON patch turning `before` into `after`.
///
/// # Errors
///
/// - [`AdmissionError::Serialization`] if either value fails to serialize
pub fn json_patch<T: Serialize>(
    before: &T,
    after: &T,
) -> Result<json_patch::Patch, Report<AdmissionError>> {
    let serialize = |value: &T| {
        serde_json::to_value(value)
            .map_err(|err| Report::new(err).change_context(AdmissionError::Serialization))
    };
    Ok(json_patch::diff(&serialize(before)?, &serialize(after)?))
}
