//! Renders Cluster API objects from a cluster spec.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Taint;
use serde_json::{json, Value};
use tracing::debug;

use super::manifest::{
    cluster_labels, CapiManifest, BOOTSTRAP_API_VERSION, CLUSTER_API_VERSION,
    CONTROL_PLANE_API_VERSION, ETCD_CLUSTER_API_VERSION, INFRASTRUCTURE_API_VERSION,
};
use super::names::ObjectNaming;
use super::objects::{
    ControlPlane, WorkerGroup, Workers, CLUSTER_KIND, ETCDADM_CLUSTER_KIND,
    KUBEADM_CONFIG_TEMPLATE_KIND, KUBEADM_CONTROL_PLANE_KIND, MACHINE_DEPLOYMENT_KIND,
    MACHINE_TEMPLATE_KIND, PROVIDER_CLUSTER_KIND,
};
use super::workflow::{default_workflow, DefaultWorkflowParams, Workflow};
use crate::api::{
    ClusterSpec, MachineConfig, OsFamily, RolloutStrategyType, UpgradeRolloutStrategy,
    WorkerNodeGroupConfiguration,
};
use crate::clock::Clock;
use crate::error::{ProvisionError, Result};
use crate::hardware::{resolve_disk, DiskDiscovery};

/// Registry rewritten to the mirror when one is configured.
pub const PUBLIC_REGISTRY: &str = "public.ecr.aws";

const CONTROL_PLANE_PORT: u16 = 6443;
const AUTOSCALER_MIN_SIZE: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";
const AUTOSCALER_MAX_SIZE: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";
const CONTAINERD_CONFIG_PATH: &str = "/etc/containerd/config_append.toml";
const CONTAINERD_PROXY_PATH: &str = "/etc/systemd/system/containerd.service.d/http-proxy.conf";

/// Names given to the control plane's immutable templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneNames {
    pub machine_template: String,
    pub etcd_machine_template: String,
}

impl ControlPlaneNames {
    /// First-generation names, used at creation.
    #[must_use]
    pub fn initial(cluster: &str) -> Self {
        Self {
            machine_template: ObjectNaming::control_plane_machine_template_name(cluster),
            etcd_machine_template: ObjectNaming::etcd_machine_template_name(cluster),
        }
    }

    /// Fresh time-stamped names for a new template generation.
    #[must_use]
    pub fn timestamped(cluster: &str, clock: &dyn Clock) -> Self {
        Self {
            machine_template: ObjectNaming::timestamped_name(
                &ObjectNaming::control_plane_machine_template_base(cluster),
                clock,
            ),
            etcd_machine_template: ObjectNaming::timestamped_name(
                &ObjectNaming::etcd_machine_template_base(cluster),
                clock,
            ),
        }
    }
}

/// Names given to one worker group's immutable templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerGroupNames {
    pub machine_template: String,
    pub kubeadm_config_template: String,
}

impl WorkerGroupNames {
    #[must_use]
    pub fn initial(cluster: &str, group: &str) -> Self {
        Self {
            machine_template: ObjectNaming::worker_machine_template_name(cluster, group),
            kubeadm_config_template: ObjectNaming::kubeadm_config_template_name(cluster, group),
        }
    }

    #[must_use]
    pub fn timestamped(cluster: &str, group: &str, clock: &dyn Clock) -> Self {
        let name = ObjectNaming::timestamped_name(
            &ObjectNaming::worker_template_base(cluster, group),
            clock,
        );
        Self {
            machine_template: name.clone(),
            kubeadm_config_template: name,
        }
    }
}

/// Per-group names; groups without an entry get initial names.
pub type WorkerNames = BTreeMap<String, WorkerGroupNames>;

/// Renders control plane and worker objects for one cluster spec.
///
/// Rendering is pure apart from disk discovery, which only reads the
/// hardware inventory.
pub struct TemplateBuilder<'a> {
    spec: &'a ClusterSpec,
    disks: &'a dyn DiskDiscovery,
}

impl<'a> TemplateBuilder<'a> {
    #[must_use]
    pub fn new(spec: &'a ClusterSpec, disks: &'a dyn DiskDiscovery) -> Self {
        Self { spec, disks }
    }

    /// # Errors
    ///
    /// Returns a configuration error for missing machine configs or SSH keys,
    /// or [`ProvisionError::DiskNotFound`] when no install disk is known.
    pub fn generate_control_plane(&self, names: &ControlPlaneNames) -> Result<ControlPlane> {
        let spec = self.spec;
        let cluster = spec.name();
        let topology = spec.topology();
        let cp = &topology.control_plane;
        let cp_config = spec.control_plane_machine_config().ok_or_else(|| {
            ProvisionError::config(format!(
                "control plane machine config {} not found",
                cp.machine_group_ref.name
            ))
        })?;

        let machine_template = self.machine_template(&names.machine_template, cp_config)?;

        let (etcd_cluster, etcd_machine_template) = match &topology.external_etcd {
            Some(etcd) => {
                let etcd_config = spec.etcd_machine_config().ok_or_else(|| {
                    ProvisionError::config(format!(
                        "external etcd machine config {} not found",
                        etcd.machine_group_ref.name
                    ))
                })?;
                let template = self.machine_template(&names.etcd_machine_template, etcd_config)?;
                let format = bootstrap_format(etcd_config)?;
                let etcd_users = users(etcd_config)?;
                let etcd_cluster = self.manifest(
                    ETCD_CLUSTER_API_VERSION,
                    ETCDADM_CLUSTER_KIND,
                    &ObjectNaming::etcd_cluster_name(cluster),
                )
                .with_spec(json!({
                    "replicas": etcd.count,
                    "etcdadmConfigSpec": {
                        "format": format,
                        "users": etcd_users,
                    },
                    "infrastructureTemplate": {
                        "apiVersion": INFRASTRUCTURE_API_VERSION,
                        "kind": MACHINE_TEMPLATE_KIND,
                        "name": names.etcd_machine_template,
                    },
                }));
                (Some(etcd_cluster), Some(template))
            }
            None => (None, None),
        };

        let format = bootstrap_format(cp_config)?;
        let cp_users = users(cp_config)?;
        let registration = node_registration(&cp.taints, &cp.labels)?;
        let kubeadm_control_plane = self
            .manifest(
                CONTROL_PLANE_API_VERSION,
                KUBEADM_CONTROL_PLANE_KIND,
                &ObjectNaming::control_plane_name(cluster),
            )
            .with_spec(json!({
                "replicas": cp.count,
                "version": self.kubernetes_version(),
                "machineTemplate": {
                    "infrastructureRef": {
                        "apiVersion": INFRASTRUCTURE_API_VERSION,
                        "kind": MACHINE_TEMPLATE_KIND,
                        "name": names.machine_template,
                    }
                },
                "kubeadmConfigSpec": {
                    "format": format,
                    "users": cp_users,
                    "files": self.files(),
                    "initConfiguration": { "nodeRegistration": registration.clone() },
                    "joinConfiguration": { "nodeRegistration": registration },
                },
                "rolloutStrategy": control_plane_rollout(cp.upgrade_rollout_strategy.as_ref()),
            }));

        let mut cluster_spec = json!({
            "clusterNetwork": {
                "pods": { "cidrBlocks": topology.cluster_network.pods },
                "services": { "cidrBlocks": topology.cluster_network.services },
            },
            "controlPlaneEndpoint": {
                "host": cp.endpoint.host,
                "port": CONTROL_PLANE_PORT,
            },
            "controlPlaneRef": {
                "apiVersion": CONTROL_PLANE_API_VERSION,
                "kind": KUBEADM_CONTROL_PLANE_KIND,
                "name": ObjectNaming::control_plane_name(cluster),
            },
            "infrastructureRef": {
                "apiVersion": INFRASTRUCTURE_API_VERSION,
                "kind": PROVIDER_CLUSTER_KIND,
                "name": cluster,
            },
        });
        if let Some(etcd) = &etcd_cluster {
            cluster_spec["managedExternalEtcdRef"] = json!({
                "apiVersion": ETCD_CLUSTER_API_VERSION,
                "kind": ETCDADM_CLUSTER_KIND,
                "name": etcd.name(),
            });
        }

        let provider_cluster = self
            .manifest(INFRASTRUCTURE_API_VERSION, PROVIDER_CLUSTER_KIND, cluster)
            .with_spec(json!({
                "controlPlaneEndpoint": {
                    "host": cp.endpoint.host,
                    "port": CONTROL_PLANE_PORT,
                },
            }));

        Ok(ControlPlane {
            cluster: self
                .manifest(CLUSTER_API_VERSION, CLUSTER_KIND, cluster)
                .with_spec(cluster_spec),
            provider_cluster,
            kubeadm_control_plane,
            machine_template,
            etcd_cluster,
            etcd_machine_template,
        })
    }

    /// # Errors
    ///
    /// Same conditions as [`Self::generate_control_plane`], per worker group.
    pub fn generate_workers(&self, names: &WorkerNames) -> Result<Workers> {
        let cluster = self.spec.name();
        let groups = self
            .spec
            .topology()
            .worker_node_groups
            .iter()
            .map(|group| {
                let group_names = names
                    .get(&group.name)
                    .cloned()
                    .unwrap_or_else(|| WorkerGroupNames::initial(cluster, &group.name));
                self.worker_group(group, &group_names)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Workers { groups })
    }

    fn worker_group(
        &self,
        group: &WorkerNodeGroupConfiguration,
        names: &WorkerGroupNames,
    ) -> Result<WorkerGroup> {
        let cluster = self.spec.name();
        let config = self.spec.worker_machine_config(group).ok_or_else(|| {
            ProvisionError::config(format!(
                "worker node group {} machine config {} not found",
                group.name, group.machine_group_ref.name
            ))
        })?;

        let machine_template = self.machine_template(&names.machine_template, config)?;
        let format = bootstrap_format(config)?;
        let group_users = users(config)?;
        let registration = node_registration(&group.taints, &group.labels)?;

        let kubeadm_config_template = self
            .manifest(
                BOOTSTRAP_API_VERSION,
                KUBEADM_CONFIG_TEMPLATE_KIND,
                &names.kubeadm_config_template,
            )
            .with_spec(json!({
                "template": {
                    "spec": {
                        "format": format,
                        "users": group_users,
                        "files": self.files(),
                        "joinConfiguration": { "nodeRegistration": registration },
                    }
                }
            }));

        let mut machine_deployment = self
            .manifest(
                CLUSTER_API_VERSION,
                MACHINE_DEPLOYMENT_KIND,
                &ObjectNaming::machine_deployment_name(cluster, &group.name),
            )
            .with_spec(json!({
                "clusterName": cluster,
                "replicas": group.count,
                "selector": { "matchLabels": {} },
                "template": {
                    "metadata": { "labels": cluster_labels(cluster) },
                    "spec": {
                        "clusterName": cluster,
                        "version": self.kubernetes_version(),
                        "bootstrap": {
                            "configRef": {
                                "apiVersion": BOOTSTRAP_API_VERSION,
                                "kind": KUBEADM_CONFIG_TEMPLATE_KIND,
                                "name": names.kubeadm_config_template,
                            }
                        },
                        "infrastructureRef": {
                            "apiVersion": INFRASTRUCTURE_API_VERSION,
                            "kind": MACHINE_TEMPLATE_KIND,
                            "name": names.machine_template,
                        },
                    }
                },
            }));
        if let Some(strategy) = worker_rollout(group.upgrade_rollout_strategy.as_ref()) {
            if let Some(spec) = machine_deployment.spec.as_mut() {
                spec["strategy"] = strategy;
            }
        }
        if let Some(autoscaling) = group.autoscaling {
            machine_deployment = machine_deployment
                .with_annotation(AUTOSCALER_MIN_SIZE, autoscaling.min_count.to_string())
                .with_annotation(AUTOSCALER_MAX_SIZE, autoscaling.max_count.to_string());
        }

        Ok(WorkerGroup {
            name: group.name.clone(),
            machine_deployment,
            kubeadm_config_template,
            machine_template,
        })
    }

    fn manifest(&self, api_version: &str, kind: &str, name: &str) -> CapiManifest {
        CapiManifest::new(api_version, kind, name, self.spec.namespace())
            .with_labels(cluster_labels(self.spec.name()))
    }

    fn kubernetes_version(&self) -> String {
        let version = &self.spec.topology().kubernetes_version;
        if version.starts_with('v') {
            version.clone()
        } else {
            format!("v{version}")
        }
    }

    fn machine_template(&self, name: &str, config: &MachineConfig) -> Result<CapiManifest> {
        let mut workflow = self.workflow(config)?;
        if let Some(mirror) = &self.spec.topology().registry_mirror {
            workflow.with_registry_mirror(PUBLIC_REGISTRY, &mirror.address());
        }
        let workflow_yaml = workflow.to_yaml()?;

        Ok(self
            .manifest(INFRASTRUCTURE_API_VERSION, MACHINE_TEMPLATE_KIND, name)
            .with_spec(json!({
                "template": {
                    "spec": {
                        "hardwareAffinity": {
                            "required": [{
                                "labelSelector": {
                                    "matchLabels": config.spec.hardware_selector.labels(),
                                }
                            }]
                        },
                        "templateOverride": workflow_yaml,
                    }
                }
            })))
    }

    /// Override named by the machine config, or the default workflow.
    fn workflow(&self, config: &MachineConfig) -> Result<Workflow> {
        if let Some(template_ref) = &config.spec.template_ref {
            let template = self.spec.template_config(&template_ref.name).ok_or_else(|| {
                ProvisionError::config(format!(
                    "TinkerbellMachineConfig {}: template config {} not found",
                    config.name, template_ref.name
                ))
            })?;
            debug!(
                "Using template override {} for machine config {}",
                template.name, config.name
            );
            return Ok(template.template.clone());
        }

        let os_family = config.os_family().map_err(ProvisionError::config)?;
        let disk = resolve_disk(self.disks, &config.spec.hardware_selector)?;
        let image_url = self.image_url(config, os_family)?;
        let datacenter = &self.spec.datacenter_config.spec;

        default_workflow(&DefaultWorkflowParams {
            name: self.spec.name(),
            os_family,
            disk: &disk,
            image_url: &image_url,
            tinkerbell_ip: &datacenter.tinkerbell_ip,
            images: &self.spec.bundle.actions,
            proxy_env: self.proxy_env(),
        })
    }

    fn image_url(&self, config: &MachineConfig, os_family: OsFamily) -> Result<String> {
        let bundled = match os_family {
            OsFamily::Bottlerocket => self.spec.bundle.bottlerocket_image_url.as_ref(),
            OsFamily::Ubuntu | OsFamily::RedHat => None,
        };
        config
            .spec
            .os_image_url
            .as_ref()
            .or(self.spec.datacenter_config.spec.os_image_url.as_ref())
            .or(bundled)
            .cloned()
            .ok_or_else(|| {
                ProvisionError::config(format!(
                    "TinkerbellMachineConfig {}: no osImageURL configured for {os_family}",
                    config.name
                ))
            })
    }

    /// Hosts excluded from proxying: cluster CIDRs, configured entries, the
    /// control plane endpoint and the management IP.
    fn no_proxy(&self) -> Vec<String> {
        let topology = self.spec.topology();
        let Some(proxy) = &topology.proxy else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        // First occurrence wins; order is preserved.
        topology
            .cluster_network
            .pods
            .iter()
            .chain(&topology.cluster_network.services)
            .chain(&proxy.no_proxy)
            .chain(std::iter::once(&topology.control_plane.endpoint.host))
            .chain(std::iter::once(&self.spec.datacenter_config.spec.tinkerbell_ip))
            .filter(|entry| seen.insert((*entry).clone()))
            .cloned()
            .collect()
    }

    fn proxy_env(&self) -> BTreeMap<String, String> {
        let Some(proxy) = &self.spec.topology().proxy else {
            return BTreeMap::new();
        };
        BTreeMap::from([
            ("HTTP_PROXY".to_string(), proxy.http_proxy.clone()),
            ("HTTPS_PROXY".to_string(), proxy.https_proxy.clone()),
            ("NO_PROXY".to_string(), self.no_proxy().join(",")),
        ])
    }

    /// Extra files written by the bootstrap provider.
    fn files(&self) -> Vec<Value> {
        let topology = self.spec.topology();
        let mut files = Vec::new();

        if let Some(mirror) = &topology.registry_mirror {
            let address = mirror.address();
            files.push(json!({
                "path": CONTAINERD_CONFIG_PATH,
                "owner": "root:root",
                "content": format!(
                    "[plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors]\n  \
                     [plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"{PUBLIC_REGISTRY}\"]\n    \
                     endpoint = [\"https://{address}\"]\n"
                ),
            }));
            if let Some(ca) = &mirror.ca_cert_content {
                files.push(json!({
                    "path": format!("/etc/containerd/certs.d/{address}/ca.crt"),
                    "owner": "root:root",
                    "content": ca,
                }));
            }
        }

        if let Some(proxy) = &topology.proxy {
            files.push(json!({
                "path": CONTAINERD_PROXY_PATH,
                "owner": "root:root",
                "content": format!(
                    "[Service]\nEnvironment=\"HTTP_PROXY={}\"\n\
                     Environment=\"HTTPS_PROXY={}\"\nEnvironment=\"NO_PROXY={}\"\n",
                    proxy.http_proxy,
                    proxy.https_proxy,
                    self.no_proxy().join(",")
                ),
            }));
        }
        files
    }
}

fn bootstrap_format(config: &MachineConfig) -> Result<&'static str> {
    match config.os_family().map_err(ProvisionError::config)? {
        OsFamily::Bottlerocket => Ok("bottlerocket"),
        OsFamily::Ubuntu | OsFamily::RedHat => Ok("cloud-config"),
    }
}

fn users(config: &MachineConfig) -> Result<Value> {
    let (user, key) = config.ssh_user_and_key().ok_or_else(|| {
        ProvisionError::config(format!(
            "TinkerbellMachineConfig {}: at least one user with an ssh authorized key is required",
            config.name
        ))
    })?;
    Ok(json!([{
        "name": user,
        "sshAuthorizedKeys": [key],
        "sudo": "ALL=(ALL) NOPASSWD:ALL",
    }]))
}

fn node_registration(taints: &[Taint], labels: &BTreeMap<String, String>) -> Result<Value> {
    let mut registration = json!({ "taints": serde_json::to_value(taints)? });
    if !labels.is_empty() {
        let node_labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        registration["kubeletExtraArgs"] = json!({ "node-labels": node_labels.join(",") });
    }
    Ok(registration)
}

fn control_plane_rollout(strategy: Option<&UpgradeRolloutStrategy>) -> Value {
    match strategy {
        Some(s) if s.strategy_type == RolloutStrategyType::InPlace => json!({ "type": "InPlace" }),
        _ => json!({
            "type": "RollingUpdate",
            "rollingUpdate": { "maxSurge": UpgradeRolloutStrategy::max_surge(strategy) },
        }),
    }
}

fn worker_rollout(strategy: Option<&UpgradeRolloutStrategy>) -> Option<Value> {
    let strategy = strategy?;
    Some(match (strategy.strategy_type, strategy.rolling_update) {
        (RolloutStrategyType::InPlace, _) => json!({ "type": "InPlace" }),
        (RolloutStrategyType::RollingUpdate, Some(params)) => json!({
            "type": "RollingUpdate",
            "rollingUpdate": {
                "maxSurge": params.max_surge,
                "maxUnavailable": params.max_unavailable,
            },
        }),
        (RolloutStrategyType::RollingUpdate, None) => json!({ "type": "RollingUpdate" }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        fixtures, AutoScalingConfiguration, ProxyConfiguration, Ref, RegistryMirrorConfiguration,
        TemplateConfig,
    };
    use crate::clock::FixedClock;
    use crate::hardware::{HardwareCatalogue, HardwareRecord, OWNER_NAME_LABEL};

    fn catalogue() -> HardwareCatalogue {
        HardwareCatalogue::from_records([
            HardwareRecord::new("cp-1")
                .with_label("type", "cp")
                .with_disk("/dev/sda"),
            HardwareRecord::new("worker-1")
                .with_label("type", "worker")
                .with_disk("/dev/nvme0n1"),
        ])
        .unwrap()
    }

    fn template_override(machine_template: &CapiManifest) -> Workflow {
        let text = machine_template
            .spec_str("/template/spec/templateOverride")
            .unwrap();
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_control_plane_references() {
        let spec = fixtures::cluster_spec();
        let hardware = catalogue();
        let builder = TemplateBuilder::new(&spec, &hardware);

        let cp = builder
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap();

        assert_eq!(cp.machine_template.name(), "test-control-plane-1");
        assert_eq!(cp.machine_template_ref(), Some("test-control-plane-1"));
        assert_eq!(cp.kubeadm_control_plane.spec_str("/version"), Some("v1.31"));
        assert!(cp.etcd_cluster.is_none());
        assert_eq!(cp.objects().len(), 4);

        let selector = &cp.machine_template.spec.as_ref().unwrap()
            ["template"]["spec"]["hardwareAffinity"]["required"][0]["labelSelector"]["matchLabels"];
        assert_eq!(selector, &json!({"type": "cp"}));

        let workflow = template_override(&cp.machine_template);
        let stream = workflow.actions().next().unwrap();
        assert_eq!(stream.environment["DEST_DISK"], "/dev/sda");
    }

    #[test]
    fn test_disk_from_provisioned_hardware_on_rerun() {
        let spec = fixtures::cluster_spec();
        let hardware = HardwareCatalogue::from_records([HardwareRecord::new("cp-1")
            .with_label("type", "cp")
            .with_label(OWNER_NAME_LABEL, "test-control-plane-1-abcde")
            .with_disk("/dev/sdb")])
        .unwrap();

        let cp = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap();
        let workflow = template_override(&cp.machine_template);
        assert_eq!(
            workflow.actions().next().unwrap().environment["DEST_DISK"],
            "/dev/sdb"
        );
    }

    #[test]
    fn test_missing_disk_fails() {
        let spec = fixtures::cluster_spec();
        let hardware = HardwareCatalogue::new();

        let err = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DiskNotFound { .. }));
    }

    #[test]
    fn test_template_override_skips_disk_discovery() {
        let mut spec = fixtures::cluster_spec();
        let custom = Workflow {
            version: "0.1".into(),
            name: "custom".into(),
            global_timeout: 100,
            tasks: vec![],
        };
        spec.template_configs.push(TemplateConfig {
            name: "custom".into(),
            template: custom.clone(),
        });
        spec.machine_configs[0].spec.template_ref = Some(Ref {
            kind: "TinkerbellTemplateConfig".into(),
            name: "custom".into(),
        });

        // No hardware at all: the override must be used as-is.
        let hardware = HardwareCatalogue::new();
        let cp = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap();
        assert_eq!(template_override(&cp.machine_template), custom);

        spec.machine_configs[0].spec.template_ref.as_mut().unwrap().name = "missing".into();
        let err = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap_err();
        assert!(err.to_string().contains("template config missing not found"));
    }

    #[test]
    fn test_missing_ssh_key_fails() {
        let mut spec = fixtures::cluster_spec();
        spec.machine_configs[0].spec.users[0].ssh_authorized_keys.clear();

        let hardware = catalogue();
        let err = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap_err();
        assert!(err.to_string().contains("ssh authorized key"));
    }

    #[test]
    fn test_worker_group_objects() {
        let mut spec = fixtures::cluster_spec();
        spec.cluster.spec.worker_node_groups[0].taints = vec![Taint {
            key: "dedicated".into(),
            value: Some("gpu".into()),
            effect: "NoSchedule".into(),
            ..Taint::default()
        }];
        spec.cluster.spec.worker_node_groups[0]
            .labels
            .insert("tier".into(), "gpu".into());
        spec.cluster.spec.worker_node_groups[0].autoscaling = Some(AutoScalingConfiguration {
            min_count: 1,
            max_count: 5,
        });

        let hardware = catalogue();
        let workers = TemplateBuilder::new(&spec, &hardware)
            .generate_workers(&WorkerNames::new())
            .unwrap();
        let group = workers.group("md-0").unwrap();

        assert_eq!(group.machine_deployment.name(), "test-md-0");
        assert_eq!(group.machine_template_ref(), Some("test-md-0-1"));
        assert_eq!(group.kubeadm_config_template_ref(), Some("test-md-0-1"));
        assert_eq!(
            group.machine_deployment.metadata.annotations[AUTOSCALER_MAX_SIZE],
            "5"
        );

        let registration = &group.kubeadm_config_template.spec.as_ref().unwrap()
            ["template"]["spec"]["joinConfiguration"]["nodeRegistration"];
        assert_eq!(registration["taints"][0]["key"], "dedicated");
        assert_eq!(registration["kubeletExtraArgs"]["node-labels"], "tier=gpu");
    }

    #[test]
    fn test_timestamped_worker_names() {
        let spec = fixtures::cluster_spec();
        let hardware = catalogue();
        let clock = FixedClock::from_millis(42);
        let names = WorkerNames::from([(
            "md-0".to_string(),
            WorkerGroupNames::timestamped("test", "md-0", &clock),
        )]);

        let workers = TemplateBuilder::new(&spec, &hardware)
            .generate_workers(&names)
            .unwrap();
        assert_eq!(workers.groups[0].machine_template.name(), "test-md-0-42");
    }

    #[test]
    fn test_registry_mirror_and_proxy() {
        let mut spec = fixtures::cluster_spec();
        spec.cluster.spec.registry_mirror = Some(RegistryMirrorConfiguration {
            endpoint: "harbor.local".into(),
            port: Some(5000),
            ca_cert_content: Some("CERT".into()),
            insecure_skip_verify: false,
        });
        spec.cluster.spec.proxy = Some(ProxyConfiguration {
            http_proxy: "http://proxy:3128".into(),
            https_proxy: "http://proxy:3128".into(),
            no_proxy: vec![".internal".into()],
        });

        let hardware = catalogue();
        let cp = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap();

        let text = cp
            .machine_template
            .spec_str("/template/spec/templateOverride")
            .unwrap();
        let workflow: Workflow = serde_yaml::from_str(text).unwrap();
        assert!(workflow
            .actions()
            .all(|a| a.image.starts_with("harbor.local:5000/eks-anywhere/")));
        assert!(text.contains("harbor.local:5000/eks-anywhere/image2disk:v1"));
        assert!(text.contains("192.168.0.0/16,10.96.0.0/12,.internal,10.0.0.10,10.0.0.2"));

        let files = &cp.kubeadm_control_plane.spec.as_ref().unwrap()["kubeadmConfigSpec"]["files"];
        assert_eq!(files.as_array().unwrap().len(), 3);
        assert_eq!(files[1]["path"], "/etc/containerd/certs.d/harbor.local:5000/ca.crt");
    }

    #[test]
    fn test_external_etcd_objects() {
        let mut spec = fixtures::cluster_spec();
        spec.machine_configs
            .push(fixtures::machine_config("test-etcd", ("type", "etcd")));
        spec.cluster.spec.external_etcd = Some(crate::api::ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: Ref::machine_config("test-etcd"),
        });
        let hardware = HardwareCatalogue::from_records([
            HardwareRecord::new("cp-1").with_label("type", "cp").with_disk("/dev/sda"),
            HardwareRecord::new("etcd-1").with_label("type", "etcd").with_disk("/dev/sda"),
        ])
        .unwrap();

        let mut cp = TemplateBuilder::new(&spec, &hardware)
            .generate_control_plane(&ControlPlaneNames::initial("test"))
            .unwrap();
        assert_eq!(cp.objects().len(), 6);
        assert_eq!(
            cp.cluster.spec_str("/managedExternalEtcdRef/name"),
            Some("test-etcd")
        );

        cp.set_etcd_machine_template_name("test-etcd-2");
        assert_eq!(
            cp.etcd_cluster.as_ref().unwrap().spec_str("/infrastructureTemplate/name"),
            Some("test-etcd-2")
        );
    }
}
