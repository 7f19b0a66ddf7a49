//! Device configuration file schema
//!
//! The webhook reads the same `device-config.yaml` the legacy GPU scheduler
//! uses. Only the `nvidia` section is consulted; keys the webhook does not
//! need (MIG geometries, default memory, ...) are ignored.

use serde::Deserialize;
use serde::Serialize;

pub const DEFAULT_RESOURCE_COUNT_NAME: &str = "nvidia.com/gpu";
pub const DEFAULT_RESOURCE_CORE_NAME: &str = "nvidia.com/gpucores";
pub const DEFAULT_RESOURCE_MEMORY_NAME: &str = "nvidia.com/gpumem";
pub const DEFAULT_DEVICE_CLASS_NAME: &str = "gpu.nvidia.com";
pub const DEFAULT_DEVICE_TYPE: &str = "gpu";
pub const DEFAULT_UUID_ANNOTATION: &str = "nvidia.com/use-gpuuuid";
pub const DEFAULT_TYPE_ANNOTATION: &str = "nvidia.com/use-gputype";
pub const DEFAULT_MANAGED_LABEL: &str = "hami.io/dra";

/// Top level of the device configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigFile {
    #[serde(default)]
    pub nvidia: NvidiaConfig,
}

/// NVIDIA section of the device configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NvidiaConfig {
    /// Legacy resource holding the number of GPUs
    pub resource_count_name: String,
    /// Legacy resource holding the per-GPU core percentage
    pub resource_core_name: String,
    /// Legacy resource holding the per-GPU memory
    pub resource_memory_name: String,
    /// Device class (and attribute domain) the claims request devices from
    pub device_class_name: String,
    /// Value of the `type` attribute every matching device must carry
    pub device_type: String,
    /// Pod annotation pinning the claim to a GPU UUID
    pub uuid_annotation: String,
    /// Pod annotation pinning the claim to a GPU product name
    pub type_annotation: String,
    /// Pod label marking pods whose claims the webhook owns
    pub managed_label: String,
}

impl Default for NvidiaConfig {
    fn default() -> Self {
        Self {
            resource_count_name: DEFAULT_RESOURCE_COUNT_NAME.to_string(),
            resource_core_name: DEFAULT_RESOURCE_CORE_NAME.to_string(),
            resource_memory_name: DEFAULT_RESOURCE_MEMORY_NAME.to_string(),
            device_class_name: DEFAULT_DEVICE_CLASS_NAME.to_string(),
            device_type: DEFAULT_DEVICE_TYPE.to_string(),
            uuid_annotation: DEFAULT_UUID_ANNOTATION.to_string(),
            type_annotation: DEFAULT_TYPE_ANNOTATION.to_string(),
            managed_label: DEFAULT_MANAGED_LABEL.to_string(),
        }
    }
}
