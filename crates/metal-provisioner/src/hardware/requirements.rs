//! Hardware demand derived from a cluster topology.
//!
//! These checks are advisory. They do not claim or lock hardware; allocation
//! happens later in the provisioning controller, so a passing check is no
//! guarantee that every machine will find a free record.

use std::collections::BTreeMap;

use tracing::debug;

use super::{HardwareCatalogue, Selector};
use crate::api::{ClusterSpec, MachineConfig, UpgradeRolloutStrategy};
use crate::error::{ProvisionError, Result};

/// Requirement name used for the control plane group.
pub const CONTROL_PLANE_REQUIREMENT: &str = "control-plane";

/// Requirement name used for the external etcd group.
pub const EXTERNAL_ETCD_REQUIREMENT: &str = "external-etcd";

/// Minimum number of machines matching a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinimumRequirement {
    /// Group the requirement was derived from.
    pub name: String,
    pub min_count: usize,
    pub selector: Selector,
}

impl MinimumRequirement {
    #[must_use]
    pub fn new(name: impl Into<String>, min_count: usize, selector: Selector) -> Self {
        Self {
            name: name.into(),
            min_count,
            selector,
        }
    }
}

/// Current shape of a running cluster, used by day-2 checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentTopology {
    pub kubernetes_version: String,
    pub control_plane_replicas: u32,
    /// Worker replicas keyed by worker group name.
    pub worker_replicas: BTreeMap<String, u32>,
}

impl CurrentTopology {
    /// Snapshot the topology a spec declares.
    #[must_use]
    pub fn from_spec(spec: &ClusterSpec) -> Self {
        let topology = spec.topology();
        Self {
            kubernetes_version: topology.kubernetes_version.clone(),
            control_plane_replicas: topology.control_plane.count,
            worker_replicas: topology
                .worker_node_groups
                .iter()
                .map(|g| (g.name.clone(), g.count))
                .collect(),
        }
    }
}

fn referenced<'a>(spec: &'a ClusterSpec, context: &str, name: &str) -> Result<&'a MachineConfig> {
    spec.machine_config(name).ok_or_else(|| {
        ProvisionError::config(format!(
            "{context} configuration machine ref: missing machine config ref: name={name}"
        ))
    })
}

/// Build one requirement per control plane, external etcd and worker group.
///
/// # Errors
///
/// Returns a configuration error if a group references an unknown machine config.
pub fn build_requirements(spec: &ClusterSpec) -> Result<Vec<MinimumRequirement>> {
    let topology = spec.topology();
    let mut requirements = Vec::with_capacity(topology.worker_node_groups.len() + 2);

    let cp = &topology.control_plane;
    let cp_config = referenced(spec, "control plane", &cp.machine_group_ref.name)?;
    requirements.push(MinimumRequirement::new(
        CONTROL_PLANE_REQUIREMENT,
        cp.count as usize,
        cp_config.spec.hardware_selector.clone(),
    ));

    if let Some(etcd) = &topology.external_etcd {
        let etcd_config = referenced(spec, "external etcd", &etcd.machine_group_ref.name)?;
        requirements.push(MinimumRequirement::new(
            EXTERNAL_ETCD_REQUIREMENT,
            etcd.count as usize,
            etcd_config.spec.hardware_selector.clone(),
        ));
    }

    for group in &topology.worker_node_groups {
        let config = referenced(spec, "worker node group", &group.machine_group_ref.name)?;
        requirements.push(MinimumRequirement::new(
            group.name.clone(),
            group.count as usize,
            config.spec.hardware_selector.clone(),
        ));
    }

    Ok(requirements)
}

/// Every machine config referenced by the topology must carry a selector.
///
/// An empty selector matches all hardware, which makes the per-group checks
/// meaningless.
///
/// # Errors
///
/// Returns a configuration error naming the first machine config without one.
pub fn ensure_hardware_selectors_specified(spec: &ClusterSpec) -> Result<()> {
    let topology = spec.topology();
    let mut refs = vec![&topology.control_plane.machine_group_ref];
    refs.extend(topology.worker_node_groups.iter().map(|g| &g.machine_group_ref));
    refs.extend(topology.external_etcd.iter().map(|e| &e.machine_group_ref));

    for machine_ref in refs {
        let config = referenced(spec, "machine group", &machine_ref.name)?;
        if config.spec.hardware_selector.is_empty() {
            return Err(ProvisionError::config(format!(
                "missing hardware selector for {}",
                config.name
            )));
        }
    }
    Ok(())
}

/// Fails iff the catalogue holds fewer records than all groups request together.
///
/// # Errors
///
/// Returns [`ProvisionError::TotalHardwareShortfall`] reporting the deficit.
pub fn validate_total_hardware_requested_available(
    requirements: &[MinimumRequirement],
    catalogue: &HardwareCatalogue,
) -> Result<()> {
    let requested: usize = requirements.iter().map(|r| r.min_count).sum();
    let available = catalogue.total_hardware();
    debug!("Hardware requested: {requested}, available: {available}");

    if available < requested {
        return Err(ProvisionError::TotalHardwareShortfall {
            available,
            requested,
            deficit: requested - available,
        });
    }
    Ok(())
}

/// Check each requirement against the records matching its selector.
///
/// A record matching several selectors counts toward each of them. Exclusive
/// assignment depends on the order machines claim hardware at runtime, which
/// is not known here.
///
/// # Errors
///
/// Returns [`ProvisionError::InsufficientHardware`] for the first group short
/// of hardware.
pub fn validate_minimum_hardware_requirements(
    requirements: &[MinimumRequirement],
    catalogue: &HardwareCatalogue,
) -> Result<()> {
    for requirement in requirements {
        let observed = catalogue.count_matching(&requirement.selector);
        debug!(
            "Requirement {} ({}): {observed} matching, {} required",
            requirement.name, requirement.selector, requirement.min_count
        );
        if observed < requirement.min_count {
            return Err(ProvisionError::InsufficientHardware {
                name: requirement.name.clone(),
                selector: requirement.selector.clone(),
                observed,
                required: requirement.min_count,
            });
        }
    }
    Ok(())
}

/// Run the create-time hardware checks against a catalogue.
pub struct RequirementValidator<'a> {
    catalogue: &'a HardwareCatalogue,
}

impl<'a> RequirementValidator<'a> {
    #[must_use]
    pub fn new(catalogue: &'a HardwareCatalogue) -> Self {
        Self { catalogue }
    }

    /// Selector presence, aggregate count, then per-group counts.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or insufficiency error found.
    pub fn validate(&self, spec: &ClusterSpec) -> Result<()> {
        ensure_hardware_selectors_specified(spec)?;
        let requirements = build_requirements(spec)?;
        validate_total_hardware_requested_available(&requirements, self.catalogue)?;
        validate_minimum_hardware_requirements(&requirements, self.catalogue)
    }

    /// Extra hardware needed to scale from `current` to `spec`.
    ///
    /// Only growth needs hardware. Scaling is rejected during a rolling
    /// upgrade and for clusters with external etcd.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported scaling, otherwise the
    /// first insufficiency found.
    pub fn validate_scale(
        &self,
        spec: &ClusterSpec,
        current: &CurrentTopology,
        rolling_upgrade: bool,
    ) -> Result<()> {
        ensure_hardware_selectors_specified(spec)?;
        if spec.has_external_etcd() {
            return Err(ProvisionError::config(
                "scale up/down not supported for external etcd",
            ));
        }

        let topology = spec.topology();
        let mut requirements = Vec::new();
        let scaling_during_upgrade =
            || ProvisionError::config("cannot perform scale up or down during rolling upgrades");

        let cp = &topology.control_plane;
        if cp.count != current.control_plane_replicas {
            if rolling_upgrade {
                return Err(scaling_during_upgrade());
            }
            if cp.count > current.control_plane_replicas {
                let config = referenced(spec, "control plane", &cp.machine_group_ref.name)?;
                requirements.push(MinimumRequirement::new(
                    CONTROL_PLANE_REQUIREMENT,
                    (cp.count - current.control_plane_replicas) as usize,
                    config.spec.hardware_selector.clone(),
                ));
            }
        }

        for group in &topology.worker_node_groups {
            let existing = current.worker_replicas.get(&group.name).copied();
            if existing == Some(group.count) {
                continue;
            }
            if rolling_upgrade {
                return Err(scaling_during_upgrade());
            }
            let current_count = existing.unwrap_or(0);
            if group.count > current_count {
                let config = referenced(spec, "worker node group", &group.machine_group_ref.name)?;
                requirements.push(MinimumRequirement::new(
                    group.name.clone(),
                    (group.count - current_count) as usize,
                    config.spec.hardware_selector.clone(),
                ));
            }
        }

        validate_minimum_hardware_requirements(&requirements, self.catalogue)
            .map_err(|e| ProvisionError::config(format!("for scale up, {e}")))
    }

    /// Spare hardware needed to roll nodes during an upgrade.
    ///
    /// Each group being rolled needs `maxSurge` extra machines (1 unless a
    /// rolling-update strategy says otherwise). A bundle upgrade rolls every
    /// group.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for external etcd, otherwise the first
    /// insufficiency found.
    pub fn validate_rolling_upgrade(
        &self,
        spec: &ClusterSpec,
        current: &CurrentTopology,
        bundle_upgrade: bool,
    ) -> Result<()> {
        ensure_hardware_selectors_specified(spec)?;
        if spec.has_external_etcd() {
            return Err(ProvisionError::config("external etcd upgrade is not supported"));
        }

        let topology = spec.topology();
        let version_changed = topology.kubernetes_version != current.kubernetes_version;
        let mut requirements = Vec::new();

        if version_changed || bundle_upgrade {
            let cp = &topology.control_plane;
            let config = referenced(spec, "control plane", &cp.machine_group_ref.name)?;
            requirements.push(MinimumRequirement::new(
                CONTROL_PLANE_REQUIREMENT,
                UpgradeRolloutStrategy::max_surge(cp.upgrade_rollout_strategy.as_ref()) as usize,
                config.spec.hardware_selector.clone(),
            ));

            // Worker groups inherit the cluster version.
            for group in &topology.worker_node_groups {
                let config = referenced(spec, "worker node group", &group.machine_group_ref.name)?;
                requirements.push(MinimumRequirement::new(
                    group.name.clone(),
                    UpgradeRolloutStrategy::max_surge(group.upgrade_rollout_strategy.as_ref())
                        as usize,
                    config.spec.hardware_selector.clone(),
                ));
            }
        }

        validate_minimum_hardware_requirements(&requirements, self.catalogue)
            .map_err(|e| ProvisionError::config(format!("for rolling upgrade, {e}")))
    }
}
