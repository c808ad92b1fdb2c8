//! Declarative cluster model consumed by the bare metal provider.
//!
//! A [`ClusterSpec`] is the fully-resolved input: the cluster topology plus the
//! datacenter, machine and template configs it references, and the versions
//! bundle it deploys.

mod cluster;
mod machine;

pub use cluster::{
    taints_equal, AutoScalingConfiguration, Cluster, ClusterNetwork, ClusterTopology,
    ControlPlaneConfiguration, Endpoint, ExternalEtcdConfiguration, ProxyConfiguration, Ref,
    RegistryMirrorConfiguration, RollingUpdateParams, RolloutStrategyType,
    UpgradeRolloutStrategy, WorkerNodeGroupConfiguration, MACHINE_CONFIG_KIND,
};
pub use machine::{
    ActionImages, DatacenterConfig, DatacenterConfigSpec, MachineConfig, MachineConfigSpec,
    OsFamily, TemplateConfig, UserConfiguration, VersionsBundle,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fully-resolved cluster spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub cluster: Cluster,
    pub datacenter_config: DatacenterConfig,
    #[serde(default)]
    pub machine_configs: Vec<MachineConfig>,
    #[serde(default)]
    pub template_configs: Vec<TemplateConfig>,
    pub bundle: VersionsBundle,
}

impl ClusterSpec {
    /// Parse a spec document.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProvisionError::Yaml`] if the document is malformed.
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.cluster.namespace
    }

    #[must_use]
    pub fn topology(&self) -> &ClusterTopology {
        &self.cluster.spec
    }

    #[must_use]
    pub fn machine_config(&self, name: &str) -> Option<&MachineConfig> {
        self.machine_configs.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn template_config(&self, name: &str) -> Option<&TemplateConfig> {
        self.template_configs.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn control_plane_machine_config(&self) -> Option<&MachineConfig> {
        self.machine_config(&self.topology().control_plane.machine_group_ref.name)
    }

    /// `None` when etcd is stacked or the reference dangles.
    #[must_use]
    pub fn etcd_machine_config(&self) -> Option<&MachineConfig> {
        let etcd = self.topology().external_etcd.as_ref()?;
        self.machine_config(&etcd.machine_group_ref.name)
    }

    #[must_use]
    pub fn worker_machine_config(
        &self,
        group: &WorkerNodeGroupConfiguration,
    ) -> Option<&MachineConfig> {
        self.machine_config(&group.machine_group_ref.name)
    }

    #[must_use]
    pub fn worker_node_group(&self, name: &str) -> Option<&WorkerNodeGroupConfiguration> {
        self.topology()
            .worker_node_groups
            .iter()
            .find(|g| g.name == name)
    }

    #[must_use]
    pub fn has_external_etcd(&self) -> bool {
        self.topology().external_etcd.is_some()
    }
}

/// Shared fixtures for unit tests across modules.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::hardware::Selector;

    pub fn machine_config(name: &str, selector: (&str, &str)) -> MachineConfig {
        MachineConfig {
            name: name.to_string(),
            namespace: "test-namespace".to_string(),
            spec: MachineConfigSpec {
                hardware_selector: Selector::new().with_label(selector.0, selector.1),
                os_family: "ubuntu".to_string(),
                users: vec![UserConfiguration {
                    name: "tink-user".to_string(),
                    ssh_authorized_keys: vec!["ssh-rsa AAAAB3Nza test@example".to_string()],
                }],
                template_ref: None,
                os_image_url: None,
            },
        }
    }

    /// One control plane node on `type=cp` and one worker on `type=worker`.
    pub fn cluster_spec() -> ClusterSpec {
        ClusterSpec {
            cluster: Cluster {
                name: "test".to_string(),
                namespace: "test-namespace".to_string(),
                spec: ClusterTopology {
                    kubernetes_version: "1.31".to_string(),
                    control_plane: ControlPlaneConfiguration {
                        count: 1,
                        endpoint: Endpoint {
                            host: "10.0.0.10".to_string(),
                        },
                        machine_group_ref: Ref::machine_config("test-cp"),
                        taints: vec![],
                        labels: Default::default(),
                        upgrade_rollout_strategy: None,
                    },
                    worker_node_groups: vec![WorkerNodeGroupConfiguration {
                        name: "md-0".to_string(),
                        count: 1,
                        machine_group_ref: Ref::machine_config("test-worker"),
                        taints: vec![],
                        labels: Default::default(),
                        upgrade_rollout_strategy: None,
                        autoscaling: None,
                    }],
                    external_etcd: None,
                    cluster_network: ClusterNetwork {
                        pods: vec!["192.168.0.0/16".to_string()],
                        services: vec!["10.96.0.0/12".to_string()],
                    },
                    registry_mirror: None,
                    proxy: None,
                },
            },
            datacenter_config: DatacenterConfig {
                name: "test".to_string(),
                namespace: "test-namespace".to_string(),
                spec: DatacenterConfigSpec {
                    tinkerbell_ip: "10.0.0.2".to_string(),
                    os_image_url: Some("https://images.example.com/ubuntu.gz".to_string()),
                    hook_images_url_path: None,
                },
            },
            machine_configs: vec![
                machine_config("test-cp", ("type", "cp")),
                machine_config("test-worker", ("type", "worker")),
            ],
            template_configs: vec![],
            bundle: VersionsBundle {
                number: 1,
                actions: ActionImages {
                    image_to_disk: "public.ecr.aws/eks-anywhere/image2disk:v1".to_string(),
                    write_file: "public.ecr.aws/eks-anywhere/writefile:v1".to_string(),
                    reboot: "public.ecr.aws/eks-anywhere/reboot:v1".to_string(),
                },
                bottlerocket_image_url: None,
            },
        }
    }
}
