//! Assertions over a resolved cluster spec.
//!
//! Plain functions are assertions as-is. Assertions that need a collaborator
//! (a hardware catalogue, a network client) are built by functions returning
//! a closure.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use crate::api::{
    ClusterSpec, MachineConfig, OsFamily, Ref, RolloutStrategyType, UpgradeRolloutStrategy,
};
use crate::error::{ProvisionError, Result};
use crate::hardware::{CurrentTopology, HardwareCatalogue, RequirementValidator, Selector};

use super::network::{is_ip_in_use, is_port_in_use, NetClient, TINKERBELL_PORTS};
use super::ClusterSpecAssertion;

const LOCAL_HOST: &str = "0.0.0.0";

// ============================================================================
// Mandatory assertions
// ============================================================================

/// Datacenter config has a name and a valid management IP.
///
/// # Errors
///
/// Returns a configuration error describing the invalid field.
pub fn assert_datacenter_config_valid(spec: &ClusterSpec) -> Result<()> {
    let dc = &spec.datacenter_config;
    if dc.name.is_empty() {
        return Err(ProvisionError::config("TinkerbellDatacenterConfig: missing name"));
    }
    let ip = &dc.spec.tinkerbell_ip;
    if ip.is_empty() {
        return Err(ProvisionError::config(
            "TinkerbellDatacenterConfig: missing spec.tinkerbellIP field",
        ));
    }
    if ip.parse::<IpAddr>().is_err() {
        return Err(ProvisionError::config(format!(
            "TinkerbellDatacenterConfig: invalid tinkerbell ip: {ip}"
        )));
    }
    Ok(())
}

fn validate_machine_config(config: &MachineConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(ProvisionError::config("TinkerbellMachineConfig: missing name"));
    }
    let selector = &config.spec.hardware_selector;
    if selector.is_empty() {
        return Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig: missing spec.hardwareSelector: {}",
            config.name
        )));
    }
    if selector.len() != 1 {
        return Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig: spec.hardwareSelector must contain only 1 key-value pair: {}",
            config.name
        )));
    }
    if config.spec.os_family.is_empty() {
        return Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig: missing spec.osFamily: {}",
            config.name
        )));
    }
    if config.os_family().is_err() {
        let supported: Vec<String> =
            OsFamily::SUPPORTED.iter().map(ToString::to_string).collect();
        return Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig: unsupported spec.osFamily ({}); Please use one of the following: {}",
            config.spec.os_family,
            supported.join(", ")
        )));
    }
    Ok(())
}

/// Every machine config has a name, a single-pair selector and a supported OS.
///
/// # Errors
///
/// Returns a configuration error for the first invalid machine config.
pub fn assert_machine_configs_valid(spec: &ClusterSpec) -> Result<()> {
    spec.machine_configs.iter().try_for_each(validate_machine_config)
}

fn validate_machine_ref_exists(
    spec: &ClusterSpec,
    machine_ref: &Ref,
) -> std::result::Result<(), String> {
    match spec.machine_config(&machine_ref.name) {
        Some(_) => Ok(()),
        None => Err(format!(
            "missing machine config ref: kind={}; name={}",
            machine_ref.kind, machine_ref.name
        )),
    }
}

/// # Errors
///
/// Returns a configuration error if the control plane references an unknown
/// machine config.
pub fn assert_control_plane_machine_ref_exists(spec: &ClusterSpec) -> Result<()> {
    validate_machine_ref_exists(spec, &spec.topology().control_plane.machine_group_ref).map_err(
        |e| ProvisionError::config(format!("control plane configuration machine ref: {e}")),
    )
}

/// Stacked etcd passes trivially.
///
/// # Errors
///
/// Returns a configuration error if external etcd references an unknown
/// machine config.
pub fn assert_etcd_machine_ref_exists(spec: &ClusterSpec) -> Result<()> {
    let Some(etcd) = &spec.topology().external_etcd else {
        return Ok(());
    };
    validate_machine_ref_exists(spec, &etcd.machine_group_ref).map_err(|e| {
        ProvisionError::config(format!("external etcd configuration machine group ref: {e}"))
    })
}

/// # Errors
///
/// Returns a configuration error for the first worker group with an unknown
/// machine config.
pub fn assert_worker_node_group_machine_refs_exist(spec: &ClusterSpec) -> Result<()> {
    for group in &spec.topology().worker_node_groups {
        validate_machine_ref_exists(spec, &group.machine_group_ref).map_err(|e| {
            ProvisionError::config(format!(
                "worker node group configuration machine group ref: {e}"
            ))
        })?;
    }
    Ok(())
}

/// # Errors
///
/// Returns a configuration error naming the first machine config in another
/// namespace.
pub fn assert_machine_config_namespace_matches_datacenter_config(spec: &ClusterSpec) -> Result<()> {
    let namespace = &spec.datacenter_config.namespace;
    match spec.machine_configs.iter().find(|m| &m.namespace != namespace) {
        Some(config) => Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig's namespace must match TinkerbellDatacenterConfig's namespace: {}",
            config.name
        ))),
        None => Ok(()),
    }
}

// ============================================================================
// Optional assertions
// ============================================================================

/// Etcd and workers run the control plane's OS, and non-Bottlerocket images
/// need an explicit image URL.
///
/// # Errors
///
/// Returns a configuration error for the first inconsistency.
pub fn assert_os_family_consistent(spec: &ClusterSpec) -> Result<()> {
    let cp = spec
        .control_plane_machine_config()
        .ok_or_else(|| ProvisionError::config("control plane machine config not found"))?;
    let family = cp.os_family().map_err(ProvisionError::config)?;

    if let Some(etcd) = spec.etcd_machine_config() {
        if etcd.os_family() != Ok(family) {
            return Err(ProvisionError::config(
                "etcd osFamily cannot be different from control plane osFamily",
            ));
        }
    }

    for group in &spec.topology().worker_node_groups {
        if let Some(config) = spec.worker_machine_config(group) {
            if config.os_family() != Ok(family) {
                return Err(ProvisionError::config(
                    "worker node group osFamily cannot be different from control plane osFamily",
                ));
            }
        }
    }

    let has_image = spec.datacenter_config.spec.os_image_url.is_some()
        || cp.spec.os_image_url.is_some();
    if family != OsFamily::Bottlerocket && !has_image {
        return Err(ProvisionError::config(
            "please use bottlerocket as osFamily for auto-importing or provide a valid osImageURL",
        ));
    }
    Ok(())
}

/// Every machine config carries at least one user with an SSH key.
///
/// # Errors
///
/// Returns a configuration error naming the first machine config without a key.
pub fn assert_ssh_keys_present(spec: &ClusterSpec) -> Result<()> {
    match spec.machine_configs.iter().find(|m| m.ssh_user_and_key().is_none()) {
        Some(config) => Err(ProvisionError::config(format!(
            "TinkerbellMachineConfig {}: at least one user with an ssh authorized key is required",
            config.name
        ))),
        None => Ok(()),
    }
}

/// # Errors
///
/// Returns a configuration error when the two addresses coincide.
pub fn assert_tinkerbell_ip_and_control_plane_ip_differ(spec: &ClusterSpec) -> Result<()> {
    let tinkerbell_ip = &spec.datacenter_config.spec.tinkerbell_ip;
    if *tinkerbell_ip == spec.topology().control_plane.endpoint.host {
        return Err(ProvisionError::config(format!(
            "controlPlaneConfiguration.endpoint.host and tinkerbellIP are the same ({tinkerbell_ip}), please provide two unique IPs"
        )));
    }
    Ok(())
}

/// Kubernetes 1.20 cannot be provisioned on bare metal.
///
/// # Errors
///
/// Returns a configuration error for `1.20`.
pub fn assert_kubernetes_version_not_120(spec: &ClusterSpec) -> Result<()> {
    let version = &spec.topology().kubernetes_version;
    if version.trim_start_matches('v') == "1.20" {
        return Err(ProvisionError::config(
            "kubernetes version v1.20 is not supported for Bare Metal",
        ));
    }
    Ok(())
}

/// Nodes behind a proxy boot from a locally hosted Hook image.
///
/// # Errors
///
/// Returns a configuration error when a proxy is set without
/// `hookImagesURLPath`.
pub fn assert_hook_retrievable_without_proxy(spec: &ClusterSpec) -> Result<()> {
    if spec.topology().proxy.is_none() {
        return Ok(());
    }
    match spec.datacenter_config.spec.hook_images_url_path.as_deref() {
        Some(path) if !path.is_empty() => Ok(()),
        _ => Err(ProvisionError::config(
            "locally hosted hookImagesURLPath is required to support ProxyConfiguration",
        )),
    }
}

/// Rolling parameters must allow progress, and in-place upgrades take neither
/// rolling parameters nor autoscaling.
///
/// # Errors
///
/// Returns a configuration error for the first invalid strategy.
pub fn assert_upgrade_rollout_strategy_valid(spec: &ClusterSpec) -> Result<()> {
    let topology = spec.topology();
    let cp = topology.control_plane.upgrade_rollout_strategy.as_ref();
    validate_rollout_strategy("control plane", cp)?;

    for group in &topology.worker_node_groups {
        let strategy = group.upgrade_rollout_strategy.as_ref();
        validate_rollout_strategy(&format!("worker node group {}", group.name), strategy)?;

        let in_place = strategy.is_some_and(|s| s.strategy_type == RolloutStrategyType::InPlace);
        if in_place && group.autoscaling.is_some() {
            return Err(ProvisionError::config(format!(
                "autoscaler configuration not supported with InPlace upgrades: worker node group {}",
                group.name
            )));
        }
    }
    Ok(())
}

fn validate_rollout_strategy(
    owner: &str,
    strategy: Option<&UpgradeRolloutStrategy>,
) -> Result<()> {
    let Some(strategy) = strategy else {
        return Ok(());
    };
    match (strategy.strategy_type, strategy.rolling_update) {
        (RolloutStrategyType::InPlace, Some(_)) => Err(ProvisionError::config(format!(
            "{owner}: rollingUpdate parameters are not allowed with InPlace upgrades"
        ))),
        (RolloutStrategyType::RollingUpdate, Some(params))
            if params.max_surge == 0 && params.max_unavailable == 0 =>
        {
            Err(ProvisionError::config(format!(
                "{owner}: maxSurge and maxUnavailable cannot both be 0"
            )))
        }
        _ => Ok(()),
    }
}

/// Every machine config referenced by the topology, once per selector.
fn selectors_from_cluster_spec(spec: &ClusterSpec) -> BTreeSet<Selector> {
    let topology = spec.topology();
    let mut refs = vec![&topology.control_plane.machine_group_ref];
    refs.extend(topology.worker_node_groups.iter().map(|g| &g.machine_group_ref));
    refs.extend(topology.external_etcd.iter().map(|e| &e.machine_group_ref));

    refs.into_iter()
        .filter_map(|r| spec.machine_config(&r.name))
        .map(|m| m.spec.hardware_selector.clone())
        .collect()
}

/// No hardware record may satisfy more than one group selector.
#[must_use]
pub fn hardware_satisfies_only_one_selector(
    catalogue: Arc<HardwareCatalogue>,
) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| {
        let selectors = selectors_from_cluster_spec(spec);
        for hardware in catalogue.all_hardware() {
            let matched: Vec<String> = selectors
                .iter()
                .filter(|s| s.matches(&hardware.labels))
                .map(ToString::to_string)
                .collect();
            if matched.len() > 1 {
                return Err(ProvisionError::config(format!(
                    "hardware must only satisfy 1 selector: hardware name '{}'; selectors '{}'",
                    hardware.id,
                    matched.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Create workflow: the catalogue can host every group.
#[must_use]
pub fn minimum_hardware_available_for_create(
    catalogue: Arc<HardwareCatalogue>,
) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| RequirementValidator::new(&catalogue).validate(spec)
}

/// Day-2 workflow: spare hardware for growing groups.
#[must_use]
pub fn hardware_available_for_scale(
    catalogue: Arc<HardwareCatalogue>,
    current: CurrentTopology,
    rolling_upgrade: bool,
) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| {
        RequirementValidator::new(&catalogue).validate_scale(spec, &current, rolling_upgrade)
    }
}

/// Day-2 workflow: surge capacity for groups being rolled.
#[must_use]
pub fn hardware_available_for_rolling_upgrade(
    catalogue: Arc<HardwareCatalogue>,
    current: CurrentTopology,
    bundle_upgrade: bool,
) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| {
        RequirementValidator::new(&catalogue).validate_rolling_upgrade(
            spec,
            &current,
            bundle_upgrade,
        )
    }
}

/// The control plane endpoint must not answer.
///
/// Best effort: a host that drops connections looks unused.
#[must_use]
pub fn endpoint_ip_not_in_use(client: Arc<dyn NetClient>) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| {
        let ip = &spec.topology().control_plane.endpoint.host;
        if is_ip_in_use(client.as_ref(), ip) {
            return Err(ProvisionError::config(format!(
                "control plane endpoint ip in use: {ip}"
            )));
        }
        Ok(())
    }
}

/// The management IP must not answer before the stack is deployed.
#[must_use]
pub fn tinkerbell_ip_not_in_use(client: Arc<dyn NetClient>) -> impl ClusterSpecAssertion {
    move |spec: &ClusterSpec| {
        let ip = &spec.datacenter_config.spec.tinkerbell_ip;
        if is_ip_in_use(client.as_ref(), ip) {
            return Err(ProvisionError::config(format!(
                "tinkerbellIP <{ip}> is already in use, please provide a unique IP"
            )));
        }
        Ok(())
    }
}

/// The ports the Tinkerbell stack binds must be free on this machine.
#[must_use]
pub fn tinkerbell_ports_not_in_use(client: Arc<dyn NetClient>) -> impl ClusterSpecAssertion {
    move |_: &ClusterSpec| {
        let taken: Vec<String> = TINKERBELL_PORTS
            .iter()
            .filter(|port| is_port_in_use(client.as_ref(), LOCAL_HOST, **port))
            .map(ToString::to_string)
            .collect();
        if !taken.is_empty() {
            return Err(ProvisionError::config(format!(
                "localhost ports [{}] are already in use, please ensure these ports are available",
                taken.join(", ")
            )));
        }
        Ok(())
    }
}
