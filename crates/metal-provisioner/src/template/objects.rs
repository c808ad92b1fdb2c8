//! Rendered object sets and the references between them.
//!
//! Machine and bootstrap templates are immutable once applied. Their owners
//! (KubeadmControlPlane, EtcdadmCluster, MachineDeployment) reference them by
//! name, so renaming a template always goes through the setters here, which
//! keep the owner pointing at the template.

use serde_json::Value;
use tracing::warn;

use super::manifest::CapiManifest;

pub const CLUSTER_KIND: &str = "Cluster";
pub const PROVIDER_CLUSTER_KIND: &str = "TinkerbellCluster";
pub const KUBEADM_CONTROL_PLANE_KIND: &str = "KubeadmControlPlane";
pub const ETCDADM_CLUSTER_KIND: &str = "EtcdadmCluster";
pub const MACHINE_TEMPLATE_KIND: &str = "TinkerbellMachineTemplate";
pub const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";
pub const KUBEADM_CONFIG_TEMPLATE_KIND: &str = "KubeadmConfigTemplate";

/// KubeadmControlPlane → machine template.
pub const KCP_MACHINE_TEMPLATE_REF: &str = "/machineTemplate/infrastructureRef/name";
/// EtcdadmCluster → machine template.
pub const ETCD_MACHINE_TEMPLATE_REF: &str = "/infrastructureTemplate/name";
/// MachineDeployment → machine template.
pub const MD_MACHINE_TEMPLATE_REF: &str = "/template/spec/infrastructureRef/name";
/// MachineDeployment → KubeadmConfigTemplate.
pub const MD_BOOTSTRAP_TEMPLATE_REF: &str = "/template/spec/bootstrap/configRef/name";

fn rename(template: &mut CapiManifest, owner: &mut CapiManifest, pointer: &str, name: &str) {
    template.metadata.name = name.to_string();
    if !owner.set_spec_value(pointer, Value::String(name.to_string())) {
        warn!(
            "{} {} has no {} to repoint at {} {}",
            owner.kind,
            owner.name(),
            pointer,
            template.kind,
            name
        );
    }
}

/// Control plane objects, including external etcd when configured.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlane {
    pub cluster: CapiManifest,
    pub provider_cluster: CapiManifest,
    pub kubeadm_control_plane: CapiManifest,
    pub machine_template: CapiManifest,
    pub etcd_cluster: Option<CapiManifest>,
    pub etcd_machine_template: Option<CapiManifest>,
}

impl ControlPlane {
    /// Objects in apply order.
    #[must_use]
    pub fn objects(&self) -> Vec<&CapiManifest> {
        let mut objects = vec![&self.cluster, &self.provider_cluster];
        objects.extend(self.etcd_machine_template.iter());
        objects.extend(self.etcd_cluster.iter());
        objects.push(&self.machine_template);
        objects.push(&self.kubeadm_control_plane);
        objects
    }

    /// Rename the machine template and repoint the control plane at it.
    pub fn set_machine_template_name(&mut self, name: &str) {
        rename(
            &mut self.machine_template,
            &mut self.kubeadm_control_plane,
            KCP_MACHINE_TEMPLATE_REF,
            name,
        );
    }

    /// No-op for stacked etcd.
    pub fn set_etcd_machine_template_name(&mut self, name: &str) {
        if let (Some(template), Some(owner)) =
            (self.etcd_machine_template.as_mut(), self.etcd_cluster.as_mut())
        {
            rename(template, owner, ETCD_MACHINE_TEMPLATE_REF, name);
        }
    }

    /// Template name the control plane currently references.
    #[must_use]
    pub fn machine_template_ref(&self) -> Option<&str> {
        self.kubeadm_control_plane.spec_str(KCP_MACHINE_TEMPLATE_REF)
    }
}

/// Objects for one worker node group.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerGroup {
    pub name: String,
    pub machine_deployment: CapiManifest,
    pub kubeadm_config_template: CapiManifest,
    pub machine_template: CapiManifest,
}

impl WorkerGroup {
    #[must_use]
    pub fn objects(&self) -> Vec<&CapiManifest> {
        vec![
            &self.kubeadm_config_template,
            &self.machine_template,
            &self.machine_deployment,
        ]
    }

    pub fn set_machine_template_name(&mut self, name: &str) {
        rename(
            &mut self.machine_template,
            &mut self.machine_deployment,
            MD_MACHINE_TEMPLATE_REF,
            name,
        );
    }

    pub fn set_kubeadm_config_template_name(&mut self, name: &str) {
        rename(
            &mut self.kubeadm_config_template,
            &mut self.machine_deployment,
            MD_BOOTSTRAP_TEMPLATE_REF,
            name,
        );
    }

    #[must_use]
    pub fn machine_template_ref(&self) -> Option<&str> {
        self.machine_deployment.spec_str(MD_MACHINE_TEMPLATE_REF)
    }

    #[must_use]
    pub fn kubeadm_config_template_ref(&self) -> Option<&str> {
        self.machine_deployment.spec_str(MD_BOOTSTRAP_TEMPLATE_REF)
    }
}

/// All worker groups of a cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workers {
    pub groups: Vec<WorkerGroup>,
}

impl Workers {
    #[must_use]
    pub fn objects(&self) -> Vec<&CapiManifest> {
        self.groups.iter().flat_map(WorkerGroup::objects).collect()
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&WorkerGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::template::manifest::{
        BOOTSTRAP_API_VERSION, CLUSTER_API_VERSION, INFRASTRUCTURE_API_VERSION,
    };

    fn manifest(api_version: &str, kind: &str, name: &str) -> CapiManifest {
        CapiManifest::new(api_version, kind, name, "test-namespace")
    }

    fn worker_group(deployment_spec: Value) -> WorkerGroup {
        WorkerGroup {
            name: "md-0".to_string(),
            machine_deployment: manifest(CLUSTER_API_VERSION, MACHINE_DEPLOYMENT_KIND, "test-md-0")
                .with_spec(deployment_spec),
            kubeadm_config_template: manifest(
                BOOTSTRAP_API_VERSION,
                KUBEADM_CONFIG_TEMPLATE_KIND,
                "test-md-0-1",
            ),
            machine_template: manifest(
                INFRASTRUCTURE_API_VERSION,
                MACHINE_TEMPLATE_KIND,
                "test-md-0-1",
            ),
        }
    }

    #[test]
    fn test_rename_repoints_owner() {
        let mut group = worker_group(json!({"template": {"spec": {
            "bootstrap": {"configRef": {"name": "test-md-0-1"}},
            "infrastructureRef": {"name": "test-md-0-1"},
        }}}));

        group.set_kubeadm_config_template_name("test-md-0-2");
        assert_eq!(group.kubeadm_config_template.name(), "test-md-0-2");
        assert_eq!(group.kubeadm_config_template_ref(), Some("test-md-0-2"));
        assert_eq!(group.machine_template_ref(), Some("test-md-0-1"));
    }

    #[test]
    fn test_rename_without_owner_reference_leaves_owner_untouched() {
        let mut group = worker_group(json!({"replicas": 1}));

        group.set_machine_template_name("test-md-0-2");
        assert_eq!(group.machine_template.name(), "test-md-0-2");
        assert_eq!(group.machine_template_ref(), None);
        assert_eq!(group.machine_deployment.spec, Some(json!({"replicas": 1})));
    }
}
