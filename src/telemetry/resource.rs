//! Identity of the emitting process.

use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::Resource;

pub const SERVICE_NAME: &str = "service.name";
pub const LIBRARY_LANGUAGE: &str = "library.language";

/// Static attributes attached to every exported span and metric batch.
///
/// Built once at startup; both providers get a clone of the same SDK
/// [`Resource`].
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    service_name: String,
    resource: Resource,
}

impl ResourceDescriptor {
    /// Resource for `service_name` with the language tag set to `rust`.
    ///
    /// Extra labels are applied first, so they can never shadow the two
    /// identifying keys.
    pub fn new(service_name: impl Into<String>, labels: impl IntoIterator<Item = (String, String)>) -> Self {
        let service_name = service_name.into();
        let resource = Resource::builder_empty()
            .with_attributes(labels.into_iter().map(|(k, v)| KeyValue::new(k, v)))
            .with_attributes([
                KeyValue::new(SERVICE_NAME, service_name.clone()),
                KeyValue::new(LIBRARY_LANGUAGE, "rust"),
            ])
            .build();
        Self { service_name, resource }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Value of one resource attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.resource
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.clone())
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifying_keys_cannot_be_overridden() {
        let resource = ResourceDescriptor::new(
            "items-app",
            vec![
                ("service.name".to_string(), "spoofed".to_string()),
                ("deployment.environment".to_string(), "staging".to_string()),
            ],
        );
        assert_eq!(resource.service_name(), "items-app");
        assert_eq!(resource.get(SERVICE_NAME), Some(Value::from("items-app")));
        assert_eq!(resource.get(LIBRARY_LANGUAGE), Some(Value::from("rust")));
        assert_eq!(resource.get("deployment.environment"), Some(Value::from("staging")));
        assert_eq!(resource.resource().len(), 3);
    }
}
