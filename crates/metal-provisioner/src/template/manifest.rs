//! Generic Cluster API object representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub const CLUSTER_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";
pub const CONTROL_PLANE_API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";
pub const BOOTSTRAP_API_VERSION: &str = "bootstrap.cluster.x-k8s.io/v1beta1";
pub const ETCD_CLUSTER_API_VERSION: &str = "etcdcluster.cluster.x-k8s.io/v1beta1";
pub const INFRASTRUCTURE_API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1beta1";

/// Label linking objects to their cluster.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Object metadata carried by rendered manifests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A Kubernetes object with an untyped spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
}

impl CapiManifest {
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ManifestMetadata {
                name: name.into(),
                namespace: Some(namespace.into()),
                ..ManifestMetadata::default()
            },
            spec: None,
        }
    }

    #[must_use]
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = Some(spec);
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.metadata.labels.extend(labels);
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// String at a JSON pointer into the spec, e.g. `/template/spec/hardwareAffinity`.
    #[must_use]
    pub fn spec_str(&self, pointer: &str) -> Option<&str> {
        self.spec.as_ref()?.pointer(pointer)?.as_str()
    }

    /// Replace the value at a JSON pointer into the spec.
    ///
    /// Returns `false` when the pointer does not resolve.
    pub fn set_spec_value(&mut self, pointer: &str, value: Value) -> bool {
        match self.spec.as_mut().and_then(|s| s.pointer_mut(pointer)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Multi-document YAML stream of `manifests`.
///
/// # Errors
///
/// Returns [`crate::ProvisionError::Yaml`] if an object fails to serialize.
pub fn to_yaml_stream<'a>(manifests: impl IntoIterator<Item = &'a CapiManifest>) -> Result<String> {
    let mut documents = Vec::new();
    for manifest in manifests {
        documents.push(serde_yaml::to_string(manifest)?);
    }
    Ok(documents.join("---\n"))
}

/// Labels placed on every object rendered for `cluster`.
#[must_use]
pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())])
}
