//! Test CRD
//!
//! Minimal namespaced resource carrying a single value, used to exercise
//! watchers and controllers against a real cluster.

use cluster_client::ResourceDescriptor;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the sample resources
pub const GROUP: &str = "k8s.neuroglia.io";

/// Served version of the sample resources
pub const VERSION: &str = "v1alpha1";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "k8s.neuroglia.io",
    version = "v1alpha1",
    kind = "Test",
    plural = "tests",
    namespaced,
    status = "TestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    /// Arbitrary payload
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    /// Value seen by the last reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<String>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

impl Test {
    /// Descriptor used to list and watch `Test` resources.
    #[must_use]
    pub fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new(GROUP, VERSION, "Test", "tests")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn test_descriptor_matches_derive() {
        let descriptor = Test::descriptor();
        assert_eq!(descriptor.api_group, Test::group(&()));
        assert_eq!(descriptor.api_version, Test::version(&()));
        assert_eq!(descriptor.kind, Test::kind(&()));
        assert_eq!(descriptor.plural, Test::plural(&()));
        assert_eq!(descriptor.api_version_string(), "k8s.neuroglia.io/v1alpha1");
    }

    #[test]
    fn test_crd_is_namespaced() {
        let crd = Test::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.plural, "tests");
    }

    #[test]
    fn test_deserialize_from_dynamic_json() {
        let json = serde_json::json!({
            "apiVersion": "k8s.neuroglia.io/v1alpha1",
            "kind": "Test",
            "metadata": { "name": "test", "namespace": "test", "uid": "1234" },
            "spec": { "value": "Hello, world" },
            "status": { "observedValue": "Hello, world" }
        });

        let test: Test = serde_json::from_value(json).unwrap();
        assert_eq!(test.spec.value, "Hello, world");
        assert_eq!(test.metadata.uid.as_deref(), Some("1234"));
        assert_eq!(
            test.status.and_then(|s| s.observed_value).as_deref(),
            Some("Hello, world")
        );
    }
}
