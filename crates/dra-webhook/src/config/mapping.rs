//! Resource name mapping shared by every admission handler.

use std::path::Path;

use api_types::DeviceConfigFile;
use api_types::NvidiaConfig;
use error_stack::Report;
use error_stack::ResultExt;

use crate::config::ConfigError;

/// Which legacy resources to translate and how to shape the resulting claims.
///
/// Built once at startup and shared read-only (behind an `Arc`) by all
/// requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNameMapping {
    pub count_name: String,
    pub core_name: String,
    pub memory_name: String,
    pub device_class_name: String,
    pub device_type: String,
    pub uuid_annotation: String,
    pub type_annotation: String,
    pub managed_label: String,
}

impl ResourceNameMapping {
    /// Load the mapping from a device configuration file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if the file is not valid YAML
    /// - [`ConfigError::Invalid`] if the resulting mapping is inconsistent
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Report<ConfigError>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).change_context(ConfigError::Read {
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&contents).attach_printable_lazy(|| format!("file: {}", path.display()))
    }

    /// Parse the mapping from the YAML text of a device configuration file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] if the text is not valid YAML
    /// - [`ConfigError::Invalid`] if the resulting mapping is inconsistent
    pub fn from_yaml(contents: &str) -> Result<Self, Report<ConfigError>> {
        let file: DeviceConfigFile =
            serde_yaml::from_str(contents).map_err(|err| {
                Report::new(ConfigError::Parse {
                    message: err.to_string(),
                })
            })?;
        Self::try_from(file.nvidia)
    }

    fn validate(&self) -> Result<(), Report<ConfigError>> {
        let fields = [
            ("resourceCountName", &self.count_name),
            ("resourceCoreName", &self.core_name),
            ("resourceMemoryName", &self.memory_name),
            ("deviceClassName", &self.device_class_name),
            ("deviceType", &self.device_type),
            ("uuidAnnotation", &self.uuid_annotation),
            ("typeAnnotation", &self.type_annotation),
            ("managedLabel", &self.managed_label),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Report::new(ConfigError::Invalid {
                message: format!("{field} must not be empty"),
            }));
        }

        // a resource translated twice would be counted as both count and capacity
        if self.count_name == self.core_name
            || self.count_name == self.memory_name
            || self.core_name == self.memory_name
        {
            return Err(Report::new(ConfigError::Invalid {
                message: format!(
                    "resource names must be distinct, got count={}, core={}, memory={}",
                    self.count_name, self.core_name, self.memory_name
                ),
            }));
        }
        Ok(())
    }
}

impl TryFrom<NvidiaConfig> for ResourceNameMapping {
    type Error = Report<ConfigError>;

    fn try_from(config: NvidiaConfig) -> Result<Self, Self::Error> {
        let mapping = Self {
            count_name: config.resource_count_name,
            core_name: config.resource_core_name,
            memory_name: config.resource_memory_name,
            device_class_name: config.device_class_name,
            device_type: config.device_type,
            uuid_annotation: config.uuid_annotation,
            type_annotation: config.type_annotation,
            managed_label: config.managed_label,
        };
        mapping.validate()?;
        Ok(mapping)
    }
}

impl Default for ResourceNameMapping {
    fn default() -> Self {
        let config = NvidiaConfig::default();
        Self {
            count_name: config.resource_count_name,
            core_name: config.resource_core_name,
            memory_name: config.resource_memory_name,
            device_class_name: config.device_class_name,
            device_type: config.device_type,
            uuid_annotation: config.uuid_annotation,
            type_annotation: config.type_annotation,
            managed_label: config.managed_label,
        }
    }
}
