//! Resource kind and object identity types.

use kube::core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta};
use kube::{Resource, ResourceExt};
use std::fmt;

/// Identifies one watched resource type by group, version and kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKindRef {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKindRef {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Kind reference of a statically typed resource
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::group(&()), K::version(&()), K::kind(&()))
    }

    /// Name of the list counterpart of this kind
    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// API resource with the conventional lowercase plural
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.clone(),
        }
    }

    /// Read the kind reference of an object from its `apiVersion` and `kind`
    pub fn from_object(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", types.api_version.as_str()),
        };
        Some(Self::new(group, version, types.kind.clone()))
    }
}

impl fmt::Display for ResourceKindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

/// Composite (namespace, name) key of one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.namespace().filter(|ns| !ns.is_empty()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn test_kind_ref_for_core_and_grouped_kinds() {
        let cm = ResourceKindRef::of::<ConfigMap>();
        assert_eq!(cm.api_version(), "v1");
        assert_eq!(cm.list_kind(), "ConfigMapList");
        assert_eq!(cm.to_string(), "ConfigMap.v1");

        let net = ResourceKindRef::new("cloud-resources.kyma-project.io", "v1beta1", "IpRange");
        assert_eq!(net.api_version(), "cloud-resources.kyma-project.io/v1beta1");
        assert_eq!(net.api_resource().plural, "ipranges");
    }

    #[test]
    fn test_kind_ref_from_object_round_trips_type_meta() {
        let kind = ResourceKindRef::new("example.io", "v1", "Widget");
        let mut obj = DynamicObject::new("w", &kind.api_resource());
        obj.types = Some(kind.type_meta());
        assert_eq!(ResourceKindRef::from_object(&obj), Some(kind));
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::namespaced("ns", "a").to_string(), "ns/a");
        assert_eq!(ObjectKey::cluster("a").to_string(), "a");
    }
}
