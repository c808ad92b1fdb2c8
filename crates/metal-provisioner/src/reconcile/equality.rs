//! Semantic equality between a desired object and what the server holds.

use serde_json::Value;

use crate::template::CapiManifest;

/// Whether `existing` is a derivative of `desired`.
///
/// Fields left unset in `desired` (null, empty strings, empty maps or
/// arrays) are ignored, so values defaulted by the server do not count as a
/// difference. Set fields must match: maps recursively, arrays element-wise
/// and with equal length.
#[must_use]
pub fn semantic_derivative(desired: &Value, existing: &Value) -> bool {
    match (desired, existing) {
        (Value::Null, _) => true,
        (Value::String(d), _) if d.is_empty() => true,
        (Value::Object(d), _) if d.is_empty() => true,
        (Value::Array(d), _) if d.is_empty() => true,
        (Value::Object(d), Value::Object(e)) => d
            .iter()
            .all(|(key, value)| semantic_derivative(value, e.get(key).unwrap_or(&Value::Null))),
        (Value::Array(d), Value::Array(e)) => {
            d.len() == e.len() && d.iter().zip(e).all(|(a, b)| semantic_derivative(a, b))
        }
        (Value::Number(d), Value::Number(e)) => d.as_f64() == e.as_f64(),
        _ => desired == existing,
    }
}

/// Default equality for immutable templates: compares specs only.
#[must_use]
pub fn spec_equal(desired: &CapiManifest, existing: &CapiManifest) -> bool {
    match (&desired.spec, &existing.spec) {
        (Some(d), Some(e)) => semantic_derivative(d, e),
        (None, _) => true,
        (Some(d), None) => semantic_derivative(d, &Value::Null),
    }
}

const NODE_TAINTS: &str = "/template/spec/joinConfiguration/nodeRegistration/taints";
const NODE_LABELS: &str =
    "/template/spec/joinConfiguration/nodeRegistration/kubeletExtraArgs/node-labels";

fn node_taints(manifest: &CapiManifest) -> &[Value] {
    match manifest.spec.as_ref().and_then(|spec| spec.pointer(NODE_TAINTS)) {
        Some(Value::Array(taints)) => taints,
        _ => &[],
    }
}

fn node_labels(manifest: &CapiManifest) -> &str {
    manifest.spec_str(NODE_LABELS).unwrap_or_default()
}

/// Equality for KubeadmConfigTemplates.
///
/// Taints and node labels are compared exactly, since clearing them leaves
/// the desired fields empty and [`spec_equal`] would read that as unset.
#[must_use]
pub fn kubeadm_config_template_equal(desired: &CapiManifest, existing: &CapiManifest) -> bool {
    let (desired_taints, existing_taints) = (node_taints(desired), node_taints(existing));
    desired_taints.len() == existing_taints.len()
        && desired_taints
            .iter()
            .zip(existing_taints)
            .all(|(d, e)| semantic_derivative(d, e))
        && node_labels(desired) == node_labels(existing)
        && spec_equal(desired, existing)
}
