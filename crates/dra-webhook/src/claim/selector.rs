use std::collections::BTreeMap;

use api_types::DeviceSelector;

use crate::config::ResourceNameMapping;

/// Builds the CEL device selectors of a claim.
///
/// The selectors are, in order: the device type of the configured device
/// class, then the GPU UUID pinned by annotation, then the product name pinned
/// by annotation. The store conjoins them, so the order only matters for
/// reproducible output.
pub struct SelectorBuilder<'a> {
    mapping: &'a ResourceNameMapping,
}

impl<'a> SelectorBuilder<'a> {
    pub fn new(mapping: &'a ResourceNameMapping) -> Self {
        Self { mapping }
    }

    pub fn build(&self, annotations: Option<&BTreeMap<String, String>>) -> Vec<DeviceSelector> {
        let mut selectors = vec![self.attribute_equals("type", &self.mapping.device_type)];

        let annotation = |key: &str| annotations.and_then(|annotations| annotations.get(key));

        if let Some(uuid) = annotation(&self.mapping.uuid_annotation) {
            selectors.push(self.attribute_equals("uuid", uuid));
        }
        if let Some(product_name) = annotation(&self.mapping.type_annotation) {
            selectors.push(self.attribute_equals("productName", product_name));
        }

        selectors
    }

    fn attribute_equals(&self, attribute: &str, value: &str) -> DeviceSelector {
        DeviceSelector::cel(format!(
            "device.attributes[{}].{attribute} == {}",
            cel_string(&self.mapping.device_class_name),
            cel_string(value)
        ))
    }
}

/// Quotes `value` as a CEL string literal.
fn cel_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn expressions(selectors: &[DeviceSelector]) -> Vec<&str> {
        selectors
            .iter()
            .filter_map(DeviceSelector::expression)
            .collect()
    }

    #[test]
    fn base_selector_only_without_annotations() {
        let mapping = ResourceNameMapping::default();

        let selectors = SelectorBuilder::new(&mapping).build(None);

        assert_eq!(
            expressions(&selectors),
            vec![r#"device.attributes["gpu.nvidia.com"].type == "gpu""#]
        );
    }

    #[test]
    fn uuid_annotation_adds_uuid_selector_after_base() {
        let mapping = ResourceNameMapping::default();
        let annotations =
            BTreeMap::from([("nvidia.com/use-gpuuuid".to_string(), "GPU-123".to_string())]);

        let selectors = SelectorBuilder::new(&mapping).build(Some(&annotations));

        assert_eq!(
            expressions(&selectors),
            vec![
                r#"device.attributes["gpu.nvidia.com"].type == "gpu""#,
                r#"device.attributes["gpu.nvidia.com"].uuid == "GPU-123""#,
            ]
        );
    }

    #[test]
    fn both_annotations_keep_base_uuid_product_order() {
        let mapping = ResourceNameMapping::default();
        let annotations = BTreeMap::from([
            ("nvidia.com/use-gputype".to_string(), "NVIDIA A100".to_string()),
            ("nvidia.com/use-gpuuuid".to_string(), "GPU-123".to_string()),
            ("unrelated".to_string(), "value".to_string()),
        ]);

        let selectors = SelectorBuilder::new(&mapping).build(Some(&annotations));

        assert_eq!(
            expressions(&selectors),
            vec![
                r#"device.attributes["gpu.nvidia.com"].type == "gpu""#,
                r#"device.attributes["gpu.nvidia.com"].uuid == "GPU-123""#,
                r#"device.attributes["gpu.nvidia.com"].productName == "NVIDIA A100""#,
            ]
        );
    }

    #[test]
    fn configured_class_and_annotation_keys_are_used() {
        let mapping = ResourceNameMapping {
            device_class_name: "gpu.example.com".to_string(),
            device_type: "accelerator".to_string(),
            type_annotation: "example.com/gpu-type".to_string(),
            ..ResourceNameMapping::default()
        };
        let annotations = BTreeMap::from([
            ("example.com/gpu-type".to_string(), "H100".to_string()),
            ("nvidia.com/use-gputype".to_string(), "ignored".to_string()),
        ]);

        let selectors = SelectorBuilder::new(&mapping).build(Some(&annotations));

        assert_eq!(
            expressions(&selectors),
            vec![
                r#"device.attributes["gpu.example.com"].type == "accelerator""#,
                r#"device.attributes["gpu.example.com"].productName == "H100""#,
            ]
        );
    }

    #[test]
    fn annotation_values_are_escaped() {
        assert_eq!(cel_string(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(cel_string("line\nbreak"), r#""line\nbreak""#);
    }
}
