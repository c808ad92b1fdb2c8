//! Keep-or-supersede decisions for immutable templates.
//!
//! Machine templates and bootstrap config templates are never patched. On
//! every pass each one is looked up under the name its owner references. If
//! the stored object still matches what is desired the name is kept;
//! otherwise a new name is minted and the owner is repointed at it. The old
//! object is left for the apply layer to clean up.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::equality::{kubeadm_config_template_equal, spec_equal};
use super::lookup::ObjectLookup;
use crate::clock::Clock;
use crate::error::Result;
use crate::template::objects::{
    ETCD_MACHINE_TEMPLATE_REF, KCP_MACHINE_TEMPLATE_REF, MD_BOOTSTRAP_TEMPLATE_REF,
    MD_MACHINE_TEMPLATE_REF,
};
use crate::template::{CapiManifest, ControlPlane, ObjectNaming, WorkerGroup, Workers};

/// Equality predicate between a desired and an existing object.
pub type EqualityPredicate = dyn Fn(&CapiManifest, &CapiManifest) -> bool + Send + Sync;

/// Outcome for one immutable object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameDecision {
    /// Nothing exists under the name yet.
    Create(String),
    /// The existing object matches and is reused.
    Reuse(String),
    /// The existing object differs; `name` replaces `previous`.
    Supersede { previous: String, name: String },
}

impl NameDecision {
    /// Name the object should be applied under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create(name) | Self::Reuse(name) | Self::Supersede { name, .. } => name,
        }
    }
}

impl fmt::Display for NameDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(name) => write!(f, "create {name}"),
            Self::Reuse(name) => write!(f, "reuse {name}"),
            Self::Supersede { previous, name } => write!(f, "replace {previous} with {name}"),
        }
    }
}

pub struct ImmutableObjectReconciler {
    lookup: Arc<dyn ObjectLookup>,
    equal: Box<EqualityPredicate>,
    bootstrap_equal: Box<EqualityPredicate>,
    clock: Arc<dyn Clock>,
}

impl ImmutableObjectReconciler {
    /// Reconciler comparing machine templates with [`spec_equal`] and
    /// KubeadmConfigTemplates with [`kubeadm_config_template_equal`].
    #[must_use]
    pub fn new(lookup: Arc<dyn ObjectLookup>, clock: Arc<dyn Clock>) -> Self {
        Self {
            lookup,
            equal: Box::new(spec_equal),
            bootstrap_equal: Box::new(kubeadm_config_template_equal),
            clock,
        }
    }

    #[must_use]
    pub fn with_equality(
        mut self,
        equal: impl Fn(&CapiManifest, &CapiManifest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.equal = Box::new(equal);
        self
    }

    async fn get(&self, object: &CapiManifest) -> Result<Option<CapiManifest>> {
        Ok(self
            .lookup
            .get_object(
                &object.api_version,
                &object.kind,
                object.name(),
                object.namespace(),
            )
            .await?)
    }

    /// Decide the name `desired` is applied under.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn ensure_name(&self, desired: &CapiManifest) -> Result<NameDecision> {
        self.decide(desired, self.equal.as_ref()).await
    }

    async fn decide(
        &self,
        desired: &CapiManifest,
        equal: &EqualityPredicate,
    ) -> Result<NameDecision> {
        let Some(existing) = self.get(desired).await? else {
            debug!("{} {} does not exist yet", desired.kind, desired.name());
            return Ok(NameDecision::Create(desired.name().to_string()));
        };

        if equal(desired, &existing) {
            debug!("{} {} is unchanged, reusing", desired.kind, desired.name());
            return Ok(NameDecision::Reuse(desired.name().to_string()));
        }

        let name = ObjectNaming::next_name(desired.name(), self.clock.as_ref());
        info!(
            "{} {} changed, superseding with {}",
            desired.kind,
            desired.name(),
            name
        );
        Ok(NameDecision::Supersede {
            previous: desired.name().to_string(),
            name,
        })
    }

    /// Template name the owner currently references in the cluster, if any.
    async fn deployed_ref(&self, owner: &CapiManifest, pointer: &str) -> Result<Option<String>> {
        Ok(self
            .get(owner)
            .await?
            .and_then(|existing| existing.spec_str(pointer).map(str::to_string)))
    }

    /// Reconcile the control plane machine template.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn reconcile_control_plane_template(&self, cp: &mut ControlPlane) -> Result<()> {
        if let Some(name) = self
            .deployed_ref(&cp.kubeadm_control_plane, KCP_MACHINE_TEMPLATE_REF)
            .await?
        {
            cp.set_machine_template_name(&name);
        }
        let decision = self.ensure_name(&cp.machine_template).await?;
        cp.set_machine_template_name(decision.name());
        Ok(())
    }

    /// Reconcile the external etcd machine template. No-op for stacked etcd.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn reconcile_etcd_template(&self, cp: &mut ControlPlane) -> Result<()> {
        if let Some(etcd_cluster) = &cp.etcd_cluster {
            if let Some(name) = self
                .deployed_ref(etcd_cluster, ETCD_MACHINE_TEMPLATE_REF)
                .await?
            {
                cp.set_etcd_machine_template_name(&name);
            }
        }
        if let Some(template) = &cp.etcd_machine_template {
            let decision = self.ensure_name(template).await?;
            cp.set_etcd_machine_template_name(decision.name());
        }
        Ok(())
    }

    /// Reconcile a worker group's machine template.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn reconcile_worker_machine_template(&self, group: &mut WorkerGroup) -> Result<()> {
        if let Some(name) = self
            .deployed_ref(&group.machine_deployment, MD_MACHINE_TEMPLATE_REF)
            .await?
        {
            group.set_machine_template_name(&name);
        }
        let decision = self.ensure_name(&group.machine_template).await?;
        group.set_machine_template_name(decision.name());
        Ok(())
    }

    /// Reconcile a worker group's KubeadmConfigTemplate.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn reconcile_kubeadm_config_template(&self, group: &mut WorkerGroup) -> Result<()> {
        if let Some(name) = self
            .deployed_ref(&group.machine_deployment, MD_BOOTSTRAP_TEMPLATE_REF)
            .await?
        {
            group.set_kubeadm_config_template_name(&name);
        }
        let decision = self
            .decide(&group.kubeadm_config_template, self.bootstrap_equal.as_ref())
            .await?;
        group.set_kubeadm_config_template_name(decision.name());
        Ok(())
    }

    /// Settle the control plane's machine template names, including etcd.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn update_control_plane_names(&self, cp: &mut ControlPlane) -> Result<()> {
        self.reconcile_control_plane_template(cp).await?;
        self.reconcile_etcd_template(cp).await
    }

    /// Settle machine and bootstrap template names for every worker group.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures other than not-found.
    pub async fn update_worker_names(&self, workers: &mut Workers) -> Result<()> {
        for group in &mut workers.groups {
            self.reconcile_worker_machine_template(group).await?;
            self.reconcile_kubeadm_config_template(group).await?;
        }
        Ok(())
    }
}
