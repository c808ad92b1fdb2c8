//! Cluster topology.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};

/// Kind used by machine-group references to bare metal machine configs.
pub const MACHINE_CONFIG_KIND: &str = "TinkerbellMachineConfig";

/// Reference to a machine config by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub kind: String,
    pub name: String,
}

impl Ref {
    #[must_use]
    pub fn machine_config(name: impl Into<String>) -> Self {
        Self {
            kind: MACHINE_CONFIG_KIND.to_string(),
            name: name.into(),
        }
    }
}

/// A declared cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub spec: ClusterTopology,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Control plane, worker groups and optional external etcd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    /// Kubernetes minor version, e.g. `1.31`.
    pub kubernetes_version: String,
    pub control_plane: ControlPlaneConfiguration,
    #[serde(default)]
    pub worker_node_groups: Vec<WorkerNodeGroupConfiguration>,
    #[serde(default)]
    pub external_etcd: Option<ExternalEtcdConfiguration>,
    #[serde(default)]
    pub cluster_network: ClusterNetwork,
    #[serde(default)]
    pub registry_mirror: Option<RegistryMirrorConfiguration>,
    #[serde(default)]
    pub proxy: Option<ProxyConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfiguration {
    pub count: u32,
    pub endpoint: Endpoint,
    pub machine_group_ref: Ref,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub upgrade_rollout_strategy: Option<UpgradeRolloutStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNodeGroupConfiguration {
    pub name: String,
    pub count: u32,
    pub machine_group_ref: Ref,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub upgrade_rollout_strategy: Option<UpgradeRolloutStrategy>,
    #[serde(default)]
    pub autoscaling: Option<AutoScalingConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEtcdConfiguration {
    pub count: u32,
    pub machine_group_ref: Ref,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNetwork {
    #[serde(default)]
    pub pods: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorConfiguration {
    pub endpoint: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ca_cert_content: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl RegistryMirrorConfiguration {
    /// `host[:port]` of the mirror.
    #[must_use]
    pub fn address(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.endpoint),
            None => self.endpoint.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    pub http_proxy: String,
    pub https_proxy: String,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutStrategyType {
    RollingUpdate,
    InPlace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRolloutStrategy {
    #[serde(rename = "type")]
    pub strategy_type: RolloutStrategyType,
    #[serde(default)]
    pub rolling_update: Option<RollingUpdateParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateParams {
    pub max_surge: u32,
    #[serde(default)]
    pub max_unavailable: u32,
}

impl UpgradeRolloutStrategy {
    /// Extra machines a rolling update may create at once. Defaults to 1.
    #[must_use]
    pub fn max_surge(strategy: Option<&Self>) -> u32 {
        match strategy {
            Some(Self {
                strategy_type: RolloutStrategyType::RollingUpdate,
                rolling_update: Some(params),
            }) => params.max_surge,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingConfiguration {
    pub min_count: u32,
    pub max_count: u32,
}

/// Taint slices are equal when they hold the same taints regardless of order.
#[must_use]
pub fn taints_equal(a: &[Taint], b: &[Taint]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let key = |t: &Taint| (t.key.clone(), t.value.clone(), t.effect.clone());
    let mut left: Vec<_> = a.iter().map(key).collect();
    let mut right: Vec<_> = b.iter().map(key).collect();
    left.sort();
    right.sort();
    left == right
}
