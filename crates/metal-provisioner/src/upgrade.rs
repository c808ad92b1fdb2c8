//! Decides which immutable templates an upgrade has to replace.
//!
//! Each predicate compares the running (old) spec against the requested
//! (new) one. A `true` answer means the template must be rendered under a
//! fresh time-stamped name; `false` means the currently deployed template is
//! kept.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::api::{
    taints_equal, ClusterSpec, DatacenterConfig, MachineConfig, WorkerNodeGroupConfiguration,
};
use crate::error::{ProvisionError, Result};

/// Detects changes to machine or datacenter fields that cannot be applied to
/// existing machines.
///
/// No such fields are enforced today, so [`NoImmutableFields`] is the default.
pub trait ImmutableFieldCheck: Send + Sync {
    fn any_immutable_field_changed(
        &self,
        old_datacenter: &DatacenterConfig,
        new_datacenter: &DatacenterConfig,
        old_machine: &MachineConfig,
        new_machine: &MachineConfig,
    ) -> bool;
}

/// Reports no immutable field changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImmutableFields;

impl ImmutableFieldCheck for NoImmutableFields {
    fn any_immutable_field_changed(
        &self,
        _old_datacenter: &DatacenterConfig,
        _new_datacenter: &DatacenterConfig,
        _old_machine: &MachineConfig,
        _new_machine: &MachineConfig,
    ) -> bool {
        false
    }
}

/// Template decisions for one worker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTemplatePlan {
    pub machine_template: bool,
    pub kubeadm_config_template: bool,
}

/// Which templates an upgrade replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradePlan {
    pub control_plane: bool,
    pub etcd: bool,
    /// Keyed by worker group name, for every group in the new spec.
    pub workers: BTreeMap<String, WorkerTemplatePlan>,
}

fn version_or_bundle_changed(old: &ClusterSpec, new: &ClusterSpec) -> bool {
    old.topology().kubernetes_version != new.topology().kubernetes_version
        || old.bundle.number != new.bundle.number
}

/// Whether a worker group's bootstrap template must be replaced.
///
/// A group that did not exist before always gets a new template.
#[must_use]
pub fn needs_new_kubeadm_config_template(
    new_group: &WorkerNodeGroupConfiguration,
    old_group: Option<&WorkerNodeGroupConfiguration>,
) -> bool {
    match old_group {
        Some(old) => {
            !taints_equal(&new_group.taints, &old.taints) || new_group.labels != old.labels
        }
        None => true,
    }
}

/// Whether only replica counts change between `old` and `new`.
///
/// Groups added by the new spec do not count as scaling.
#[must_use]
pub fn is_scale_up_down(old: &ClusterSpec, new: &ClusterSpec) -> bool {
    if old.topology().control_plane.count != new.topology().control_plane.count {
        return true;
    }
    new.topology().worker_node_groups.iter().any(|group| {
        old.worker_node_group(&group.name)
            .is_some_and(|previous| previous.count != group.count)
    })
}

pub struct UpgradeDecisionEngine {
    immutable: Box<dyn ImmutableFieldCheck>,
}

impl Default for UpgradeDecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeDecisionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            immutable: Box::new(NoImmutableFields),
        }
    }

    #[must_use]
    pub fn with_immutable_field_check(mut self, check: impl ImmutableFieldCheck + 'static) -> Self {
        self.immutable = Box::new(check);
        self
    }

    /// Kubernetes version, endpoint host or bundle changed, or an immutable
    /// field changed.
    #[must_use]
    pub fn needs_new_control_plane_template(
        &self,
        old: &ClusterSpec,
        new: &ClusterSpec,
        old_datacenter: &DatacenterConfig,
        new_datacenter: &DatacenterConfig,
        old_machine: &MachineConfig,
        new_machine: &MachineConfig,
    ) -> bool {
        version_or_bundle_changed(old, new)
            || old.topology().control_plane.endpoint.host
                != new.topology().control_plane.endpoint.host
            || self.immutable.any_immutable_field_changed(
                old_datacenter,
                new_datacenter,
                old_machine,
                new_machine,
            )
    }

    /// Version or bundle changed, or the group's taints or labels changed.
    #[must_use]
    pub fn needs_new_workload_template(
        &self,
        old: &ClusterSpec,
        new: &ClusterSpec,
        old_group: Option<&WorkerNodeGroupConfiguration>,
        new_group: &WorkerNodeGroupConfiguration,
    ) -> bool {
        let Some(old_group) = old_group else {
            return true;
        };
        version_or_bundle_changed(old, new)
            || !taints_equal(&old_group.taints, &new_group.taints)
            || old_group.labels != new_group.labels
    }

    #[must_use]
    pub fn needs_new_etcd_template(
        &self,
        old: &ClusterSpec,
        new: &ClusterSpec,
        old_datacenter: &DatacenterConfig,
        new_datacenter: &DatacenterConfig,
        old_machine: &MachineConfig,
        new_machine: &MachineConfig,
    ) -> bool {
        version_or_bundle_changed(old, new)
            || self.immutable.any_immutable_field_changed(
                old_datacenter,
                new_datacenter,
                old_machine,
                new_machine,
            )
    }

    /// Evaluate every predicate for an upgrade from `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a referenced machine config is
    /// missing from either spec.
    pub fn plan(&self, old: &ClusterSpec, new: &ClusterSpec) -> Result<UpgradePlan> {
        let missing = |which: &str, spec: &ClusterSpec| {
            ProvisionError::config(format!(
                "{which} machine config not found in spec for cluster {}",
                spec.name()
            ))
        };
        let old_cp = old
            .control_plane_machine_config()
            .ok_or_else(|| missing("control plane", old))?;
        let new_cp = new
            .control_plane_machine_config()
            .ok_or_else(|| missing("control plane", new))?;

        let control_plane = self.needs_new_control_plane_template(
            old,
            new,
            &old.datacenter_config,
            &new.datacenter_config,
            old_cp,
            new_cp,
        );

        let etcd = match (old.etcd_machine_config(), new.etcd_machine_config()) {
            (Some(old_etcd), Some(new_etcd)) => self.needs_new_etcd_template(
                old,
                new,
                &old.datacenter_config,
                &new.datacenter_config,
                old_etcd,
                new_etcd,
            ),
            (None, Some(_)) => true,
            (_, None) => false,
        };

        let mut workers = BTreeMap::new();
        for group in &new.topology().worker_node_groups {
            let old_group = old.worker_node_group(&group.name);
            let decision = WorkerTemplatePlan {
                machine_template: self.needs_new_workload_template(old, new, old_group, group),
                kubeadm_config_template: needs_new_kubeadm_config_template(group, old_group),
            };
            debug!(
                "Worker group {}: new machine template {}, new kubeadm config template {}",
                group.name, decision.machine_template, decision.kubeadm_config_template
            );
            workers.insert(group.name.clone(), decision);
        }

        info!(
            "Upgrade plan for {}: new control plane template {}, new etcd template {}",
            new.name(),
            control_plane,
            etcd
        );
        Ok(UpgradePlan {
            control_plane,
            etcd,
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Taint;

    use super::*;
    use crate::api::fixtures;

    fn taint(key: &str) -> Taint {
        Taint {
            key: key.to_string(),
            effect: "NoSchedule".to_string(),
            ..Taint::default()
        }
    }

    struct AlwaysChanged;

    impl ImmutableFieldCheck for AlwaysChanged {
        fn any_immutable_field_changed(
            &self,
            _: &DatacenterConfig,
            _: &DatacenterConfig,
            _: &MachineConfig,
            _: &MachineConfig,
        ) -> bool {
            true
        }
    }

    #[test]
    fn test_default_immutable_field_check_is_permissive() {
        let spec = fixtures::cluster_spec();
        let mut changed = spec.clone();
        changed.datacenter_config.spec.tinkerbell_ip = "10.0.0.99".to_string();
        changed.machine_configs[0].spec.os_family = "redhat".to_string();

        assert!(!NoImmutableFields.any_immutable_field_changed(
            &spec.datacenter_config,
            &changed.datacenter_config,
            &spec.machine_configs[0],
            &changed.machine_configs[0],
        ));
        assert!(!UpgradeDecisionEngine::new().plan(&spec, &changed).unwrap().control_plane);
    }

    #[test]
    fn test_custom_immutable_field_check_is_consulted() {
        let spec = fixtures::cluster_spec();
        let engine = UpgradeDecisionEngine::new().with_immutable_field_check(AlwaysChanged);
        assert!(engine.plan(&spec, &spec).unwrap().control_plane);
    }

    #[test]
    fn test_control_plane_triggers() {
        let engine = UpgradeDecisionEngine::new();
        let old = fixtures::cluster_spec();
        assert!(!engine.plan(&old, &old).unwrap().control_plane);

        let mut new = old.clone();
        new.cluster.spec.kubernetes_version = "1.32".to_string();
        assert!(engine.plan(&old, &new).unwrap().control_plane);

        let mut new = old.clone();
        new.bundle.number = 2;
        assert!(engine.plan(&old, &new).unwrap().control_plane);

        let mut new = old.clone();
        new.cluster.spec.control_plane.endpoint.host = "10.0.0.11".to_string();
        assert!(engine.plan(&old, &new).unwrap().control_plane);
    }

    #[test]
    fn test_worker_taint_change_needs_new_templates() {
        let engine = UpgradeDecisionEngine::new();
        let old = fixtures::cluster_spec();
        let mut new = old.clone();
        new.cluster.spec.worker_node_groups[0].taints = vec![taint("dedicated")];

        let old_group = old.worker_node_group("md-0");
        let new_group = new.worker_node_group("md-0").unwrap();
        assert!(engine.needs_new_workload_template(&old, &new, old_group, new_group));
        assert!(needs_new_kubeadm_config_template(new_group, old_group));

        let plan = engine.plan(&old, &new).unwrap();
        assert!(!plan.control_plane);
        assert_eq!(
            plan.workers["md-0"],
            WorkerTemplatePlan {
                machine_template: true,
                kubeadm_config_template: true,
            }
        );
    }

    #[test]
    fn test_taint_order_is_not_a_change() {
        let mut old = fixtures::cluster_spec();
        old.cluster.spec.worker_node_groups[0].taints = vec![taint("a"), taint("b")];
        let mut new = old.clone();
        new.cluster.spec.worker_node_groups[0].taints = vec![taint("b"), taint("a")];

        let plan = UpgradeDecisionEngine::new().plan(&old, &new).unwrap();
        assert_eq!(
            plan.workers["md-0"],
            WorkerTemplatePlan {
                machine_template: false,
                kubeadm_config_template: false,
            }
        );
    }

    #[test]
    fn test_new_worker_group_needs_new_templates() {
        let old = fixtures::cluster_spec();
        let mut new = old.clone();
        let mut group = new.cluster.spec.worker_node_groups[0].clone();
        group.name = "md-1".to_string();
        new.cluster.spec.worker_node_groups.push(group);

        let plan = UpgradeDecisionEngine::new().plan(&old, &new).unwrap();
        assert!(plan.workers["md-1"].machine_template);
        assert!(plan.workers["md-1"].kubeadm_config_template);
        assert!(!plan.workers["md-0"].machine_template);
    }

    #[test]
    fn test_version_change_keeps_kubeadm_config_template() {
        let old = fixtures::cluster_spec();
        let mut new = old.clone();
        new.cluster.spec.kubernetes_version = "1.32".to_string();

        let plan = UpgradeDecisionEngine::new().plan(&old, &new).unwrap();
        assert!(plan.workers["md-0"].machine_template);
        assert!(!plan.workers["md-0"].kubeadm_config_template);
    }

    #[test]
    fn test_is_scale_up_down() {
        let old = fixtures::cluster_spec();
        assert!(!is_scale_up_down(&old, &old));

        let mut new = old.clone();
        new.cluster.spec.worker_node_groups[0].count = 3;
        assert!(is_scale_up_down(&old, &new));

        let mut new = old.clone();
        new.cluster.spec.worker_node_groups[0].name = "md-1".to_string();
        new.cluster.spec.worker_node_groups[0].count = 3;
        assert!(!is_scale_up_down(&old, &new));
    }

    #[test]
    fn test_missing_machine_config_is_an_error() {
        let old = fixtures::cluster_spec();
        let mut new = old.clone();
        new.machine_configs.clear();
        assert!(UpgradeDecisionEngine::new().plan(&old, &new).is_err());
    }
}
