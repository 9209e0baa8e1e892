//! Descriptors derived from statically typed kinds.

use cluster_client::ResourceDescriptor;
use kube::Resource;

/// Builds the descriptor of a statically typed kind (CRD derives and
/// `k8s-openapi` types).
pub fn descriptor_of<K>() -> ResourceDescriptor
where
    K: Resource<DynamicType = ()>,
{
    ResourceDescriptor::new(K::group(&()), K::version(&()), K::kind(&()), K::plural(&()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Event};

    #[test]
    fn test_descriptor_of_core_kinds() {
        assert_eq!(descriptor_of::<Event>(), ResourceDescriptor::core_events());

        let config_maps = descriptor_of::<ConfigMap>();
        assert_eq!(config_maps.api_group, "");
        assert_eq!(config_maps.api_version, "v1");
        assert_eq!(config_maps.kind, "ConfigMap");
        assert_eq!(config_maps.plural, "configmaps");
    }
}
