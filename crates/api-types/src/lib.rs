//! Shared API type definitions
//!
//! This crate contains the wire types used by the DRA webhook: the
//! `resource.k8s.io/v1` `ResourceClaim` the webhook creates for translated
//! containers, and the legacy device configuration file schema that names the
//! GPU resources to translate.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use serde::Serialize;

pub mod device_config;

pub use device_config::DeviceConfigFile;
pub use device_config::NvidiaConfig;

/// Name of the single device request carried by every generated claim.
pub const GPU_REQUEST_NAME: &str = "gpu";

/// `apiVersion` and `kind` of a [`ResourceClaim`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimTypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl Default for ClaimTypeMeta {
    fn default() -> Self {
        Self {
            api_version: <ResourceClaim as k8s_openapi::Resource>::API_VERSION.to_string(),
            kind: <ResourceClaim as k8s_openapi::Resource>::KIND.to_string(),
        }
    }
}

/// A `resource.k8s.io/v1` ResourceClaim.
///
/// Only the spec fields the webhook writes are modelled; the allocation status
/// maintained by the scheduler is ignored on read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    #[serde(flatten)]
    pub types: ClaimTypeMeta,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ResourceClaimSpec,
}

impl ResourceClaim {
    /// Create a namespaced claim with the given spec.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: ResourceClaimSpec,
    ) -> Self {
        Self {
            types: ClaimTypeMeta::default(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            spec,
        }
    }

    /// The single exact-count request of this claim, if any.
    pub fn exact_request(&self) -> Option<&ExactDeviceRequest> {
        self.spec
            .devices
            .requests
            .first()
            .and_then(|request| request.exactly.as_ref())
    }
}

impl k8s_openapi::Resource for ResourceClaim {
    const API_VERSION: &'static str = "resource.k8s.io/v1";
    const GROUP: &'static str = "resource.k8s.io";
    const KIND: &'static str = "ResourceClaim";
    const VERSION: &'static str = "v1";
    const URL_PATH_SEGMENT: &'static str = "resourceclaims";
    type Scope = k8s_openapi::NamespaceResourceScope;
}

impl k8s_openapi::Metadata for ResourceClaim {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaimSpec {
    #[serde(default)]
    pub devices: DeviceClaim,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClaim {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<DeviceRequest>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exactly: Option<ExactDeviceRequest>,
}

/// A request for an exact number of devices of one device class.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactDeviceRequest {
    pub device_class_name: String,
    #[serde(default)]
    pub allocation_mode: AllocationMode,
    #[serde(default)]
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CapacityRequirements>,
    /// Conjoined: a device must satisfy every selector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<DeviceSelector>,
}

/// Only exact-count allocation is requested by the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationMode {
    #[default]
    ExactCount,
}

/// Per-device capacity requests, keyed by capacity name (`cores`, `memory`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<CelDeviceSelector>,
}

impl DeviceSelector {
    pub fn cel(expression: impl Into<String>) -> Self {
        Self {
            cel: Some(CelDeviceSelector {
                expression: expression.into(),
            }),
        }
    }

    /// The CEL expression, if this is a CEL selector.
    pub fn expression(&self) -> Option<&str> {
        self.cel.as_ref().map(|cel| cel.expression.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelDeviceSelector {
    pub expression: String,
}
