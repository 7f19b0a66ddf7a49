//! In-memory claim store for tests
//!
//! Records every call in order and supports per-claim failure injection, so
//! tests can assert on exactly which store operations a request performed.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use api_types::ResourceClaim;
use async_trait::async_trait;
use error_stack::Report;

use super::store::ClaimStore;
use super::store::StoreError;

/// A store operation observed by [`InMemoryClaimStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

#[derive(Default)]
struct State {
    claims: BTreeMap<(String, String), ResourceClaim>,
    calls: Vec<StoreCall>,
    failing_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
}

/// Claim store keeping claims in memory
#[derive(Default)]
pub struct InMemoryClaimStore {
    state: Mutex<State>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the store with an existing claim without recording a call.
    pub fn insert(&self, claim: ResourceClaim) {
        let key = claim_key(&claim);
        self.state().claims.insert(key, claim);
    }

    /// Make every create of the named claim fail with a request error.
    pub fn fail_create(&self, name: impl Into<String>) {
        self.state().failing_creates.insert(name.into());
    }

    /// Make every delete of the named claim fail with a request error.
    pub fn fail_delete(&self, name: impl Into<String>) {
        self.state().failing_deletes.insert(name.into());
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<ResourceClaim> {
        self.state()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.get(namespace, name).is_some()
    }

    /// Stored claims, ordered by namespace and name.
    pub fn claims(&self) -> Vec<ResourceClaim> {
        self.state().claims.values().cloned().collect()
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Create { name, .. } => Some(name),
                StoreCall::Delete { .. } => None,
            })
            .collect()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete { name, .. } => Some(name),
                StoreCall::Create { .. } => None,
            })
            .collect()
    }
}

fn claim_key(claim: &ResourceClaim) -> (String, String) {
    (
        claim.metadata.namespace.clone().unwrap_or_default(),
        claim.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn create(&self, claim: &ResourceClaim) -> Result<(), Report<StoreError>> {
        let (namespace, name) = claim_key(claim);
        let mut state = self.state();
        state.calls.push(StoreCall::Create {
            namespace: namespace.clone(),
            name: name.clone(),
        });

        if state.failing_creates.contains(&name) {
            return Err(Report::new(StoreError::Request {
                namespace,
                name,
                message: "injected create failure".to_string(),
            }));
        }
        let key = (namespace, name);
        if state.claims.contains_key(&key) {
            let (namespace, name) = key;
            return Err(Report::new(StoreError::AlreadyExists { namespace, name }));
        }
        state.claims.insert(key, claim.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Report<StoreError>> {
        let mut state = self.state();
        state.calls.push(StoreCall::Delete {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        if state.failing_deletes.contains(name) {
            return Err(Report::new(StoreError::Request {
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: "injected delete failure".to_string(),
            }));
        }
        match state
            .claims
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(Report::new(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })),
        }
    }
}
