//! Entry points for the create and upgrade workflows.

use std::sync::Arc;

use tracing::info;

use crate::api::ClusterSpec;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::hardware::{CurrentTopology, HardwareCatalogue};
use crate::reconcile::{ImmutableObjectReconciler, ObjectLookup};
use crate::template::objects::MACHINE_TEMPLATE_KIND;
use crate::template::{
    to_yaml_stream, CapiManifest, ControlPlane, ControlPlaneNames, TemplateBuilder,
    WorkerGroupNames, WorkerNames, Workers,
};
use crate::upgrade::{is_scale_up_down, UpgradeDecisionEngine};
use crate::validation::assertions::{
    assert_hook_retrievable_without_proxy, assert_kubernetes_version_not_120,
    assert_os_family_consistent, assert_ssh_keys_present,
    assert_tinkerbell_ip_and_control_plane_ip_differ, assert_upgrade_rollout_strategy_valid,
    endpoint_ip_not_in_use, hardware_available_for_rolling_upgrade, hardware_available_for_scale,
    hardware_satisfies_only_one_selector, minimum_hardware_available_for_create,
    tinkerbell_ip_not_in_use, tinkerbell_ports_not_in_use,
};
use crate::validation::{ClusterSpecValidator, NetClient, TcpNetClient};

/// Rendered objects for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterObjects {
    pub control_plane: ControlPlane,
    pub workers: Workers,
    /// Set for pure scale operations, where machine templates are unchanged
    /// and left out of the output.
    pub omit_machine_templates: bool,
}

impl ClusterObjects {
    /// Objects in apply order.
    #[must_use]
    pub fn objects(&self) -> Vec<&CapiManifest> {
        let mut objects = self.control_plane.objects();
        objects.extend(self.workers.objects());
        if self.omit_machine_templates {
            objects.retain(|o| o.kind != MACHINE_TEMPLATE_KIND);
        }
        objects
    }

    /// # Errors
    ///
    /// Returns [`crate::ProvisionError::Yaml`] if an object fails to serialize.
    pub fn to_yaml(&self) -> Result<String> {
        to_yaml_stream(self.objects())
    }
}

/// Bare metal provider for one hardware inventory.
pub struct MetalProvider {
    catalogue: Arc<HardwareCatalogue>,
    net: Arc<dyn NetClient>,
    clock: Arc<dyn Clock>,
    upgrades: UpgradeDecisionEngine,
    skip_ip_check: bool,
}

impl MetalProvider {
    #[must_use]
    pub fn new(catalogue: HardwareCatalogue) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
            net: Arc::new(TcpNetClient),
            clock: Arc::new(SystemClock),
            upgrades: UpgradeDecisionEngine::new(),
            skip_ip_check: false,
        }
    }

    #[must_use]
    pub fn with_net_client(mut self, net: Arc<dyn NetClient>) -> Self {
        self.net = net;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_upgrade_engine(mut self, upgrades: UpgradeDecisionEngine) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// Skip probing the endpoint and management IPs.
    #[must_use]
    pub fn skip_ip_check(mut self, skip: bool) -> Self {
        self.skip_ip_check = skip;
        self
    }

    #[must_use]
    pub fn catalogue(&self) -> &HardwareCatalogue {
        &self.catalogue
    }

    #[must_use]
    pub fn upgrade_engine(&self) -> &UpgradeDecisionEngine {
        &self.upgrades
    }

    fn base_validator(&self) -> ClusterSpecValidator {
        ClusterSpecValidator::new()
            .with_assertion(assert_os_family_consistent)
            .with_assertion(assert_ssh_keys_present)
            .with_assertion(assert_tinkerbell_ip_and_control_plane_ip_differ)
            .with_assertion(assert_upgrade_rollout_strategy_valid)
    }

    /// Validate a spec for cluster creation.
    ///
    /// # Errors
    ///
    /// Returns the first failed assertion.
    pub fn validate_create(&self, spec: &ClusterSpec) -> Result<()> {
        let mut validator = self
            .base_validator()
            .with_assertion(assert_kubernetes_version_not_120)
            .with_assertion(assert_hook_retrievable_without_proxy)
            .with_assertion(hardware_satisfies_only_one_selector(self.catalogue.clone()))
            .with_assertion(minimum_hardware_available_for_create(self.catalogue.clone()));
        if self.skip_ip_check {
            info!("Skipping check for whether control plane ip is in use");
        } else {
            validator.register(endpoint_ip_not_in_use(self.net.clone()));
            validator.register(tinkerbell_ip_not_in_use(self.net.clone()));
            validator.register(tinkerbell_ports_not_in_use(self.net.clone()));
        }
        validator.validate(spec)
    }

    /// Validate an upgrade from `current` to `new`.
    ///
    /// Hardware already claimed by the cluster does not count towards spare
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns the first failed assertion.
    pub fn validate_upgrade(&self, current: &ClusterSpec, new: &ClusterSpec) -> Result<()> {
        let spare = Arc::new(HardwareCatalogue::from_records(
            self.catalogue
                .all_hardware()
                .iter()
                .filter(|h| !h.is_provisioned())
                .cloned(),
        )?);
        let topology = CurrentTopology::from_spec(current);
        let bundle_upgrade = current.bundle.number != new.bundle.number;
        let rolling_upgrade =
            topology.kubernetes_version != new.topology().kubernetes_version || bundle_upgrade;

        let mut validator = self
            .base_validator()
            .with_assertion(hardware_satisfies_only_one_selector(self.catalogue.clone()));
        if rolling_upgrade {
            validator.register(hardware_available_for_rolling_upgrade(
                spare.clone(),
                topology.clone(),
                bundle_upgrade,
            ));
        }
        validator.register(hardware_available_for_scale(spare, topology, rolling_upgrade));
        validator.validate(new)
    }

    fn builder<'a>(&'a self, spec: &'a ClusterSpec) -> TemplateBuilder<'a> {
        TemplateBuilder::new(spec, self.catalogue.as_ref())
    }

    /// Render first-generation objects for a new cluster.
    ///
    /// # Errors
    ///
    /// Returns template rendering failures.
    pub fn generate_create(&self, spec: &ClusterSpec) -> Result<ClusterObjects> {
        let builder = self.builder(spec);
        let names = ControlPlaneNames::initial(spec.name());
        Ok(ClusterObjects {
            control_plane: builder.generate_control_plane(&names)?,
            workers: builder.generate_workers(&WorkerNames::new())?,
            omit_machine_templates: false,
        })
    }

    /// Render objects for a new cluster and settle their names against the
    /// live cluster, so re-running a create reuses what already exists.
    ///
    /// # Errors
    ///
    /// Returns rendering failures and lookup failures other than not-found.
    pub async fn reconcile_create(
        &self,
        spec: &ClusterSpec,
        lookup: Arc<dyn ObjectLookup>,
    ) -> Result<ClusterObjects> {
        let mut objects = self.generate_create(spec)?;
        let reconciler = ImmutableObjectReconciler::new(lookup, self.clock.clone());
        reconciler
            .update_control_plane_names(&mut objects.control_plane)
            .await?;
        reconciler.update_worker_names(&mut objects.workers).await?;
        Ok(objects)
    }

    /// Render objects for an upgrade from `current` to `new`.
    ///
    /// Templates the upgrade replaces get fresh time-stamped names; the rest
    /// keep whatever the cluster currently references.
    ///
    /// # Errors
    ///
    /// Returns planning and rendering failures and lookup failures other
    /// than not-found.
    pub async fn generate_upgrade(
        &self,
        current: &ClusterSpec,
        new: &ClusterSpec,
        lookup: Arc<dyn ObjectLookup>,
    ) -> Result<ClusterObjects> {
        let plan = self.upgrades.plan(current, new)?;
        let cluster = new.name();
        let clock = self.clock.as_ref();

        let fresh = ControlPlaneNames::timestamped(cluster, clock);
        let initial = ControlPlaneNames::initial(cluster);
        let cp_names = ControlPlaneNames {
            machine_template: if plan.control_plane {
                fresh.machine_template
            } else {
                initial.machine_template
            },
            etcd_machine_template: if plan.etcd {
                fresh.etcd_machine_template
            } else {
                initial.etcd_machine_template
            },
        };

        let mut worker_names = WorkerNames::new();
        for (group, decision) in &plan.workers {
            let fresh = WorkerGroupNames::timestamped(cluster, group, clock);
            let initial = WorkerGroupNames::initial(cluster, group);
            worker_names.insert(
                group.clone(),
                WorkerGroupNames {
                    machine_template: if decision.machine_template {
                        fresh.machine_template
                    } else {
                        initial.machine_template
                    },
                    kubeadm_config_template: if decision.kubeadm_config_template {
                        fresh.kubeadm_config_template
                    } else {
                        initial.kubeadm_config_template
                    },
                },
            );
        }

        let builder = self.builder(new);
        let mut control_plane = builder.generate_control_plane(&cp_names)?;
        let mut workers = builder.generate_workers(&worker_names)?;

        let reconciler = ImmutableObjectReconciler::new(lookup, self.clock.clone());
        if !plan.control_plane {
            reconciler
                .reconcile_control_plane_template(&mut control_plane)
                .await?;
        }
        if !plan.etcd {
            reconciler.reconcile_etcd_template(&mut control_plane).await?;
        }
        for group in &mut workers.groups {
            let Some(decision) = plan.workers.get(&group.name) else {
                continue;
            };
            if !decision.machine_template {
                reconciler.reconcile_worker_machine_template(group).await?;
            }
            if !decision.kubeadm_config_template {
                reconciler.reconcile_kubeadm_config_template(group).await?;
            }
        }

        Ok(ClusterObjects {
            control_plane,
            workers,
            omit_machine_templates: is_scale_up_down(current, new),
        })
    }
}
