//! ResourceClaim translation and lifecycle.
//!
//! The main components are:
//! - [`ClaimTranslator`]: turns one container's legacy GPU limits into a claim
//! - [`SelectorBuilder`]: builds the CEL device selectors of a claim
//! - [`ClaimLifecycle`]: idempotent create/delete and compensation on a [`ClaimStore`]
//!
//! Claims are never referenced by handle. Both the mutating and the deletion
//! path locate a claim by recomputing [`claim_name`].

use core::error::Error;

pub mod lifecycle;
pub mod mock;
pub mod selector;
pub mod store;
pub mod translator;

pub use lifecycle::ClaimLifecycle;
pub use selector::SelectorBuilder;
pub use store::ClaimStore;
pub use store::KubeClaimStore;
pub use store::StoreError;
pub use translator::ClaimTranslator;
pub use translator::WorkloadRef;

/// Deterministic name of the claim owned by one container of a workload.
pub fn claim_name(namespace: &str, workload: &str, container: &str) -> String {
    format!("{namespace}-{workload}-{container}")
}

/// Errors raised while translating or managing claims.
#[derive(Debug, derive_more::Display)]
pub enum ClaimError {
    #[display("Invalid quantity for resource {resource} in container {container}: {value:?}")]
    InvalidQuantity {
        container: String,
        resource: String,
        value: String,
    },
    #[display("Failed to create ResourceClaim {namespace}/{name}")]
    Create { namespace: String, name: String },
    #[display("Failed to delete ResourceClaim {namespace}/{name}")]
    Delete { namespace: String, name: String },
}

impl ClaimError {
    /// Whether the error was caused by the submitted workload rather than by
    /// the claim store.
    pub const fn is_invalid_workload(&self) -> bool {
        matches!(self, Self::InvalidQuantity { .. })
    }
}

impl Error for ClaimError {}
