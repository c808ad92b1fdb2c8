//! Cluster spec validation.
//!
//! [`ClusterSpecValidator`] runs an ordered list of assertions and stops at the
//! first failure. The mandatory assertions are registered on construction;
//! callers append workflow-specific ones (hardware availability, IP probes)
//! with [`ClusterSpecValidator::register`].

pub mod assertions;
pub mod network;

use tracing::{debug, warn};

use crate::api::ClusterSpec;
use crate::error::Result;

pub use network::{NetClient, TcpNetClient};

/// A single check run against a cluster spec.
pub trait ClusterSpecAssertion: Send + Sync {
    /// # Errors
    ///
    /// Returns the reason the spec is rejected.
    fn check(&self, spec: &ClusterSpec) -> Result<()>;
}

impl<F> ClusterSpecAssertion for F
where
    F: Fn(&ClusterSpec) -> Result<()> + Send + Sync,
{
    fn check(&self, spec: &ClusterSpec) -> Result<()> {
        self(spec)
    }
}

/// Ordered, fail-fast assertion pipeline.
pub struct ClusterSpecValidator {
    assertions: Vec<Box<dyn ClusterSpecAssertion>>,
}

impl Default for ClusterSpecValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterSpecValidator {
    /// Validator holding the mandatory assertions.
    #[must_use]
    pub fn new() -> Self {
        Self::empty()
            .with_assertion(assertions::assert_datacenter_config_valid)
            .with_assertion(assertions::assert_machine_configs_valid)
            .with_assertion(assertions::assert_control_plane_machine_ref_exists)
            .with_assertion(assertions::assert_etcd_machine_ref_exists)
            .with_assertion(assertions::assert_worker_node_group_machine_refs_exist)
            .with_assertion(assertions::assert_machine_config_namespace_matches_datacenter_config)
    }

    /// Validator with no assertions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            assertions: Vec::new(),
        }
    }

    /// Append an assertion; it runs after everything registered before it.
    pub fn register(&mut self, assertion: impl ClusterSpecAssertion + 'static) {
        self.assertions.push(Box::new(assertion));
    }

    #[must_use]
    pub fn with_assertion(mut self, assertion: impl ClusterSpecAssertion + 'static) -> Self {
        self.register(assertion);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    /// Run assertions in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later assertions are not run.
    pub fn validate(&self, spec: &ClusterSpec) -> Result<()> {
        debug!(
            "Validating cluster {} with {} assertions",
            spec.name(),
            self.assertions.len()
        );
        for (index, assertion) in self.assertions.iter().enumerate() {
            if let Err(e) = assertion.check(spec) {
                warn!("Cluster {} failed assertion #{index}: {e}", spec.name());
                return Err(e);
            }
        }
        Ok(())
    }
}
