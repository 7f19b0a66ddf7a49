use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::core::admission::AdmissionResponse;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::decode_pod;
use super::errored;
use super::patch;
use super::AdmissionError;
use super::AdmissionHandler;
use crate::claim::ClaimLifecycle;
use crate::claim::ClaimStore;
use crate::claim::ClaimTranslator;
use crate::claim::WorkloadRef;
use crate::config::ResourceNameMapping;

/// Translates legacy GPU limits of a pod into ResourceClaims and patches the
/// pod to use them.
pub struct MutatingAdmission {
    mapping: Arc<ResourceNameMapping>,
    lifecycle: ClaimLifecycle,
}

impl MutatingAdmission {
    pub fn new(mapping: Arc<ResourceNameMapping>, store: Arc<dyn ClaimStore>) -> Self {
        Self {
            mapping,
            lifecycle: ClaimLifecycle::new(store),
        }
    }

    async fn mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<AdmissionResponse, Report<AdmissionError>> {
        let Some(object) = request.object.as_ref() else {
            debug!(uid = %request.uid, "No object in request, allowing unchanged");
            return Ok(AdmissionResponse::from(request));
        };

        let original = decode_pod(request, object)?;
        let mut pod = original.clone();

        let namespace = original
            .metadata
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .or_else(|| request.namespace.clone())
            .unwrap_or_default();
        let name = original
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| request.name.clone());
        let workload = WorkloadRef {
            namespace: &namespace,
            name: &name,
            annotations: original.metadata.annotations.as_ref(),
        };

        let translator = ClaimTranslator::new(&self.mapping, &self.lifecycle);
        let mut created = Vec::new();
        let containers = pod
            .spec
            .as_mut()
            .map(|spec| spec.containers.as_mut_slice())
            .unwrap_or_default();
        for container in containers {
            match translator.translate(&workload, container).await {
                Ok(Some(claim)) => {
                    patch::attach_container_claim(container, &claim);
                    created.push(claim);
                }
                Ok(None) => {}
                Err(report) => {
                    if !created.is_empty() {
                        warn!(
                            namespace = %namespace,
                            pod = %name,
                            claims = ?created,
                            "Leaving ResourceClaims of earlier containers in place after a failed translation"
                        );
                    }
                    return Err(report.change_context(AdmissionError::Translation {
                        container: container.name.clone(),
                    }));
                }
            }
        }

        if created.is_empty() {
            debug!(
                namespace = %namespace,
                pod = %name,
                "No container requests GPUs, allowing unchanged"
            );
            return Ok(AdmissionResponse::from(request));
        }

        patch::attach_workload_claims(&mut pod, &created);
        patch::mark_managed(&mut pod, &self.mapping.managed_label);

        info!(
            namespace = %namespace,
            pod = %name,
            claims = ?created,
            "Patching pod to use ResourceClaims"
        );
        self.patched(request, &namespace, &created, &original, &pod)
            .await
    }

    /// Patch response from `before` to `after`. Claims in `created` are
    /// deleted again if the patch cannot be produced.
    async fn patched<T: Serialize + Sync>(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        namespace: &str,
        created: &[String],
        before: &T,
        after: &T,
    ) -> Result<AdmissionResponse, Report<AdmissionError>> {
        let response = patch::json_patch(before, after).and_then(|patch| {
            AdmissionResponse::from(request)
                .with_patch(patch)
                .map_err(|err| Report::new(err).change_context(AdmissionError::Serialization))
        });

        if let Err(report) = &response {
            warn!(
                namespace,
                claims = ?created,
                error = ?report,
                "Deleting ResourceClaims created for a pod that cannot be patched"
            );
            self.lifecycle.compensate(namespace, created).await;
        }
        response
    }
}

#[async_trait]
impl AdmissionHandler for MutatingAdmission {
    async fn handle(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        match self.mutate(request).await {
            Ok(response) => response,
            Err(report) => {
                error!(uid = %request.uid, error = ?report, "Failed to mutate pod");
                errored(request, &report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use json_patch::Patch;
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;
    use serde_json::Value;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::admission::testing;
    use crate::claim::mock::InMemoryClaimStore;
    use crate::claim::ClaimError;

    fn handler() -> (Arc<InMemoryClaimStore>, MutatingAdmission) {
        let store = Arc::new(InMemoryClaimStore::new());
        let handler =
            MutatingAdmission::new(Arc::new(ResourceNameMapping::default()), store.clone());
        (store, handler)
    }

    fn gpu_limits() -> Value {
        json!({"nvidia.com/gpu": "1", "nvidia.com/gpumem": "4Gi"})
    }

    /// Apply the response patch to `object` and decode the resulting pod.
    fn patched_pod(object: &Value, response: &AdmissionResponse) -> Pod {
        let raw = response.patch.as_ref().expect("response should carry a patch");
        let patch: Patch = serde_json::from_slice(raw).expect("patch should be valid JSON");
        let mut object = object.clone();
        json_patch::patch(&mut object, &patch.0).expect("patch should apply");
        serde_json::from_value(object).expect("patched object should be a pod")
    }

    #[test(tokio::test)]
    async fn every_gpu_container_gets_a_claim() {
        let (store, handler) = handler();
        let object = testing::pod(
            json!({"app": "trainer"}),
            json!({}),
            &[("a", gpu_limits()), ("b", gpu_limits()), ("c", gpu_limits())],
        );
        let request = testing::request("CREATE", Some(object.clone()), None);

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        assert_eq!(
            store.create_calls(),
            vec!["default-trainer-a", "default-trainer-b", "default-trainer-c"]
        );

        let pod = patched_pod(&object, &response);
        let labels = pod.metadata.labels.clone().unwrap_or_default();
        assert_eq!(labels.get("hami.io/dra").map(String::as_str), Some("true"));
        assert_eq!(labels.get("app").map(String::as_str), Some("trainer"));

        let spec = pod.spec.expect("pod should keep its spec");
        let pod_claims: Vec<_> = spec
            .resource_claims
            .unwrap_or_default()
            .into_iter()
            .map(|claim| (claim.name, claim.resource_claim_name))
            .collect();
        assert_eq!(
            pod_claims,
            ["a", "b", "c"]
                .map(|c| (format!("default-trainer-{c}"), Some(format!("default-trainer-{c}"))))
                .to_vec()
        );
        for container in spec.containers {
            let resources = container.resources.expect("resources should remain");
            let claims: Vec<_> = resources
                .claims
                .unwrap_or_default()
                .into_iter()
                .map(|claim| claim.name)
                .collect();
            assert_eq!(claims, vec![format!("default-trainer-{}", container.name)]);
            assert_eq!(resources.limits, Some(BTreeMap::new()));
        }
    }

    #[test(tokio::test)]
    async fn pod_without_gpus_is_allowed_unchanged() {
        let (store, handler) = handler();
        let object = testing::pod(json!({}), json!({}), &[("main", json!({"cpu": "1"}))]);
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        assert_eq!(response.patch, None);
        assert!(store.calls().is_empty());
    }

    #[test(tokio::test)]
    async fn request_without_object_is_allowed() {
        let (store, handler) = handler();
        let request = testing::request("CREATE", None, None);

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        assert_eq!(response.patch, None);
        assert!(store.calls().is_empty());
    }

    #[test(tokio::test)]
    async fn create_failure_stops_translation_without_rollback() {
        let (store, handler) = handler();
        store.fail_create("default-trainer-b");
        let object = testing::pod(
            json!({}),
            json!({}),
            &[("a", gpu_limits()), ("b", gpu_limits()), ("c", gpu_limits())],
        );
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(!response.allowed);
        assert_eq!(response.result.code, 500);
        assert!(response.result.message.contains("default-trainer-b"));
        assert_eq!(store.create_calls(), vec!["default-trainer-a", "default-trainer-b"]);
        assert!(store.contains("default", "default-trainer-a"));
        assert!(store.delete_calls().is_empty());
    }

    #[test(tokio::test)]
    async fn invalid_count_is_a_bad_request() {
        let (store, handler) = handler();
        let object = testing::pod(
            json!({}),
            json!({}),
            &[("main", json!({"nvidia.com/gpu": "0"}))],
        );
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(!response.allowed);
        assert_eq!(response.result.code, 400);
        assert!(store.calls().is_empty());
    }

    #[test(tokio::test)]
    async fn malformed_pod_is_a_bad_request() {
        let (store, handler) = handler();
        let object = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "trainer"},
            "spec": {"containers": "not-a-list"},
        });
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(!response.allowed);
        assert_eq!(response.result.code, 400);
        assert!(store.calls().is_empty());
    }

    #[test(tokio::test)]
    async fn request_namespace_is_used_when_object_has_none() {
        let (store, handler) = handler();
        let mut object = testing::pod(json!({}), json!({}), &[("main", gpu_limits())]);
        object["metadata"]
            .as_object_mut()
            .expect("metadata should be an object")
            .remove("namespace");
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        assert!(store.contains("default", "default-trainer-main"));
    }

    #[test(tokio::test)]
    async fn generated_name_pod_is_still_translated() {
        let (store, handler) = handler();
        let mut object = testing::pod(json!({}), json!({}), &[("main", gpu_limits())]);
        let metadata = object["metadata"]
            .as_object_mut()
            .expect("metadata should be an object");
        metadata.remove("name");
        metadata.insert("generateName".to_string(), json!("trainer-7d9f-"));
        let mut request = testing::request("CREATE", Some(object.clone()), None);
        request.name = String::new();

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        assert_eq!(store.create_calls(), vec!["default--main"]);
        let pod = patched_pod(&object, &response);
        let claims: Vec<_> = pod
            .spec
            .and_then(|spec| spec.resource_claims)
            .unwrap_or_default()
            .into_iter()
            .map(|claim| claim.name)
            .collect();
        assert_eq!(claims, vec!["default--main".to_string()]);
    }

    #[test(tokio::test)]
    async fn annotations_select_specific_gpu() {
        let (store, handler) = handler();
        let object = testing::pod(
            json!({}),
            json!({"nvidia.com/use-gpuuuid": "GPU-123"}),
            &[("main", gpu_limits())],
        );
        let request = testing::request("CREATE", Some(object), None);

        let response = handler.handle(&request).await;

        assert!(response.allowed);
        let claim = store
            .get("default", "default-trainer-main")
            .expect("claim should be created");
        let expressions: Vec<String> = claim
            .exact_request()
            .map(|request| {
                request
                    .selectors
                    .iter()
                    .filter_map(|selector| selector.expression().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(
            expressions,
            vec![
                r#"device.attributes["gpu.nvidia.com"].type == "gpu""#.to_string(),
                r#"device.attributes["gpu.nvidia.com"].uuid == "GPU-123""#.to_string(),
            ]
        );
    }

    #[test(tokio::test)]
    async fn patch_failure_compensates_created_claims() {
        let (store, handler) = handler();
        let lifecycle = ClaimLifecycle::new(store.clone());
        let created = vec!["default-trainer-a".to_string(), "default-trainer-b".to_string()];
        for name in &created {
            lifecycle
                .create(&api_types::ResourceClaim::new(
                    name.as_str(),
                    "default",
                    api_types::ResourceClaimSpec::default(),
                ))
                .await
                .expect("seed claim");
        }
        store.fail_delete("default-trainer-a");
        let request = testing::request("CREATE", None, None);
        let unserializable = BTreeMap::from([((1, 2), "non-string key")]);

        let report = handler
            .patched(&request, "default", &created, &unserializable, &unserializable)
            .await
            .expect_err("serialization should fail");

        assert!(matches!(report.current_context(), AdmissionError::Serialization));
        assert_eq!(AdmissionError::status_code(&report), 500);
        assert_eq!(store.delete_calls(), created);
        assert!(store.contains("default", "default-trainer-a"));
        assert!(!store.contains("default", "default-trainer-b"));
    }

    #[test(tokio::test)]
    async fn retried_request_reuses_existing_claims() {
        let (store, handler) = handler();
        let object = testing::pod(json!({}), json!({}), &[("main", gpu_limits())]);
        let request = testing::request("CREATE", Some(object), None);

        let first = handler.handle(&request).await;
        let second = handler.handle(&request).await;

        assert!(first.allowed);
        assert!(second.allowed);
        assert_eq!(first.patch, second.patch);
        assert_eq!(store.claims().len(), 1);
    }

    #[test]
    fn create_errors_are_server_errors() {
        let report = Report::new(ClaimError::Create {
            namespace: "default".to_string(),
            name: "default-trainer-main".to_string(),
        })
        .change_context(AdmissionError::Translation {
            container: "main".to_string(),
        });

        assert_eq!(AdmissionError::status_code(&report), 500);
    }
}
