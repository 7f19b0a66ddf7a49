//! Admission webhook translating legacy GPU resource limits into
//! `resource.k8s.io/v1` ResourceClaims.

pub mod admission;
pub mod claim;
pub mod config;
pub mod kube_client;
pub mod quantity;
pub mod server;
