//! Admission handlers
//!
//! Both endpoints share one capability, [`AdmissionHandler`]: turn a decoded
//! admission request into an admission response. [`MutatingAdmission`]
//! translates legacy GPU limits into ResourceClaims on pod creation and
//! [`ValidatingAdmission`] deletes those claims again when the pod is deleted.
//!
//! Handler failures never escape as transport errors. They are rendered into
//! a denied response whose `status.code` carries the HTTP-equivalent status.

use core::error::Error;

use async_trait::async_trait;
use error_stack::FrameKind;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use kube::core::admission::AdmissionReview;
use tracing::error;

use crate::claim::ClaimError;

pub mod mutating;
pub mod patch;
pub mod validating;

pub use mutating::MutatingAdmission;
pub use validating::ValidatingAdmission;

/// Decide on one admission request.
#[async_trait]
pub trait AdmissionHandler: Send + Sync {
    async fn handle(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse;
}

/// Errors raised while handling an admission request.
#[derive(Debug, derive_more::Display)]
pub enum AdmissionError {
    #[display("Failed to decode admission object: {message}")]
    Decode { message: String },
    #[display("Failed to translate container {container}")]
    Translation { container: String },
    #[display("Failed to serialize the mutated workload")]
    Serialization,
}

impl Error for AdmissionError {}

impl AdmissionError {
    /// HTTP-equivalent status code reported for `report`.
    pub fn status_code(report: &Report<Self>) -> u16 {
        match report.current_context() {
            Self::Decode { .. } => 400,
            Self::Translation { .. }
                if report
                    .downcast_ref::<ClaimError>()
                    .is_some_and(ClaimError::is_invalid_workload) =>
            {
                400
            }
            Self::Translation { .. } | Self::Serialization => 500,
        }
    }
}

/// Run `handler` on a review envelope and wrap its response.
///
/// An envelope without a request is answered with an invalid response.
pub async fn review(
    handler: &dyn AdmissionHandler,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "Failed to parse admission request");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };

    handler.handle(&request).await.into_review()
}

/// Decode the pod carried in `object`.
///
/// # Errors
///
/// - [`AdmissionError::Decode`] if the request is not for a pod or the object
///   is not a valid pod
pub fn decode_pod(
    request: &AdmissionRequest<DynamicObject>,
    object: &DynamicObject,
) -> Result<Pod, Report<AdmissionError>> {
    if request.kind.kind != "Pod" {
        return Err(Report::new(AdmissionError::Decode {
            message: format!("expected a Pod, got {}", request.kind.kind),
        }));
    }

    serde_json::to_value(object)
        .and_then(serde_json::from_value::<Pod>)
        .map_err(|err| {
            Report::new(AdmissionError::Decode {
                message: err.to_string(),
            })
        })
}

/// Denied response for a failed request.
pub fn errored(
    request: &AdmissionRequest<DynamicObject>,
    report: &Report<AdmissionError>,
) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(report_message(report));
    response.result.code = AdmissionError::status_code(report);
    response
}

/// Context messages of `report`, outermost first.
fn report_message<C>(report: &Report<C>) -> String {
    report
        .frames()
        .filter_map(|frame| match frame.kind() {
            FrameKind::Context(context) => Some(context.to_string()),
            FrameKind::Attachment(_) => None,
        })
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
pub(crate) mod testing {
    use kube::api::DynamicObject;
    use kube::core::admission::AdmissionRequest;
    use kube::core::admission::AdmissionReview;
    use serde_json::json;
    use serde_json::Value;

    pub const UID: &str = "705ab4f5-6393-11e8-b7cc-42010a800002";

    /// Admission review JSON for a pod request.
    pub fn review_json(operation: &str, object: Option<Value>, old_object: Option<Value>) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": UID,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "trainer",
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "system:admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false,
            }
        })
    }

    pub fn request(
        operation: &str,
        object: Option<Value>,
        old_object: Option<Value>,
    ) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> =
            serde_json::from_value(review_json(operation, object, old_object))
                .expect("review should deserialize");
        review.try_into().expect("review should carry a request")
    }

    /// Pod JSON with one container per `(name, limits)` entry.
    pub fn pod(labels: Value, annotations: Value, containers: &[(&str, Value)]) -> Value {
        let containers: Vec<Value> = containers
            .iter()
            .map(|(name, limits)| {
                json!({
                    "name": name,
                    "image": "cuda:12",
                    "resources": {"limits": limits},
                })
            })
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "trainer",
                "namespace": "default",
                "labels": labels,
                "annotations": annotations,
            },
            "spec": {"containers": containers},
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::testing;
    use super::*;

    #[test]
    fn decode_pod_reads_containers() {
        let object = testing::pod(json!({}), json!({}), &[("main", json!({"cpu": "1"}))]);
        let request = testing::request("CREATE", Some(object), None);

        let pod = decode_pod(&request, request.object.as_ref().expect("object"))
            .expect("pod should decode");

        assert_eq!(pod.metadata.name.as_deref(), Some("trainer"));
        let containers = pod.spec.map(|spec| spec.containers).unwrap_or_default();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "main");
    }

    #[test]
    fn decode_rejects_non_pod_objects() {
        let object = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "trainer"},
        });
        let mut request = testing::request("CREATE", Some(object), None);
        request.kind.kind = "Deployment".to_string();

        let report = decode_pod(&request, request.object.as_ref().expect("object"))
            .expect_err("deployment should not decode as a pod");

        assert!(matches!(report.current_context(), AdmissionError::Decode { .. }));
        assert_eq!(AdmissionError::status_code(&report), 400);
    }

    #[test]
    fn errored_response_carries_code_and_causes() {
        let request = testing::request("CREATE", None, None);
        let report = Report::new(ClaimError::Create {
            namespace: "default".to_string(),
            name: "default-trainer-main".to_string(),
        })
        .change_context(AdmissionError::Translation {
            container: "main".to_string(),
        });

        let response = errored(&request, &report);

        assert!(!response.allowed);
        assert_eq!(response.uid, testing::UID);
        assert_eq!(response.result.code, 500);
        assert_eq!(
            response.result.message,
            "Failed to translate container main: Failed to create ResourceClaim default/default-trainer-main"
        );
    }

    #[test]
    fn invalid_workload_translation_is_a_bad_request() {
        let report = Report::new(ClaimError::InvalidQuantity {
            container: "main".to_string(),
            resource: "nvidia.com/gpu".to_string(),
            value: "lots".to_string(),
        })
        .change_context(AdmissionError::Translation {
            container: "main".to_string(),
        });

        assert_eq!(AdmissionError::status_code(&report), 400);
        assert_eq!(
            AdmissionError::status_code(&Report::new(AdmissionError::Serialization)),
            500
        );
    }
}
