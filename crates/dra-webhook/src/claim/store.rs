//! Object store access for ResourceClaims.

use core::error::Error;
use std::future::Future;
use std::time::Duration;

use api_types::ResourceClaim;
use async_trait::async_trait;
use error_stack::Report;
use kube::api::DeleteParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;

/// Errors reported by a [`ClaimStore`].
#[derive(Debug, derive_more::Display)]
pub enum StoreError {
    #[display("ResourceClaim {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },
    #[display("ResourceClaim {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[display("Request for ResourceClaim {namespace}/{name} failed: {message}")]
    Request {
        namespace: String,
        name: String,
        message: String,
    },
    #[display("Request for ResourceClaim {namespace}/{name} timed out after {seconds}s")]
    Timeout {
        namespace: String,
        name: String,
        seconds: u64,
    },
}

impl Error for StoreError {}

/// The create/delete surface of the claim store used by the webhook.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Create a claim in the claim's namespace.
    async fn create(&self, claim: &ResourceClaim) -> Result<(), Report<StoreError>>;

    /// Delete the named claim.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>>;
}

/// [`ClaimStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClaimStore {
    client: Client,
    timeout: Duration,
}

impl KubeClaimStore {
    /// Every API call is bounded by `timeout`.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn api(&self, namespace: &str) -> Api<ResourceClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn call<T>(
        &self,
        namespace: &str,
        name: &str,
        request: impl Future<Output = Result<T, kube::Error>> + Send,
    ) -> Result<T, Report<StoreError>> {
        let result = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                Report::new(StoreError::Timeout {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            })?;

        result.map_err(|err| {
            let context = match &err {
                kube::Error::Api(response) if response.code == 409 => StoreError::AlreadyExists {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                other => StoreError::Request {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: other.to_string(),
                },
            };
            Report::new(err).change_context(context)
        })
    }
}

#[async_trait]
impl ClaimStore for KubeClaimStore {
    async fn create(&self, claim: &ResourceClaim) -> Result<(), Report<StoreError>> {
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        let name = claim.metadata.name.as_deref().unwrap_or_default();
        let api = self.api(namespace);

        self.call(namespace, name, api.create(&PostParams::default(), claim))
            .await
            .map(|_| ())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>> {
        let api = self.api(namespace);

        self.call(namespace, name, api.delete(name, &DeleteParams::default()))
            .await
            .map(|_| ())
    }
}
