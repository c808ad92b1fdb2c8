use crate::clock::Clock;
use crate::error::{ProvisionError, Result};

/// Generation suffix of freshly created objects.
const INITIAL_VERSION: u64 = 1;

pub struct ObjectNaming;

impl ObjectNaming {
    /// `{base}-{version}`
    #[must_use]
    pub fn object_name(base: &str, version: u64) -> String {
        format!("{base}-{version}")
    }

    /// First generation of `base`.
    #[must_use]
    pub fn default_object_name(base: &str) -> String {
        Self::object_name(base, INITIAL_VERSION)
    }

    /// Name stamped with the current time in milliseconds.
    #[must_use]
    pub fn timestamped_name(base: &str, clock: &dyn Clock) -> String {
        format!("{base}-{}", clock.now().timestamp_millis())
    }

    #[must_use]
    pub fn control_plane_machine_template_base(cluster: &str) -> String {
        format!("{cluster}-control-plane")
    }

    #[must_use]
    pub fn etcd_machine_template_base(cluster: &str) -> String {
        format!("{cluster}-etcd")
    }

    /// Base shared by a worker group's machine and bootstrap templates.
    #[must_use]
    pub fn worker_template_base(cluster: &str, group: &str) -> String {
        format!("{cluster}-{group}")
    }

    #[must_use]
    pub fn control_plane_machine_template_name(cluster: &str) -> String {
        Self::default_object_name(&Self::control_plane_machine_template_base(cluster))
    }

    #[must_use]
    pub fn etcd_machine_template_name(cluster: &str) -> String {
        Self::default_object_name(&Self::etcd_machine_template_base(cluster))
    }

    #[must_use]
    pub fn worker_machine_template_name(cluster: &str, group: &str) -> String {
        Self::default_object_name(&Self::worker_template_base(cluster, group))
    }

    #[must_use]
    pub fn kubeadm_config_template_name(cluster: &str, group: &str) -> String {
        Self::default_object_name(&Self::worker_template_base(cluster, group))
    }

    /// Machine deployments are not versioned.
    #[must_use]
    pub fn machine_deployment_name(cluster: &str, group: &str) -> String {
        format!("{cluster}-{group}")
    }

    #[must_use]
    pub fn control_plane_name(cluster: &str) -> String {
        cluster.to_string()
    }

    #[must_use]
    pub fn etcd_cluster_name(cluster: &str) -> String {
        format!("{cluster}-etcd")
    }

    /// Bump the trailing `-<n>` of `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `name` has no numeric suffix.
    pub fn increment_name(name: &str) -> Result<String> {
        let invalid = || ProvisionError::config(format!("invalid format of name [name={name}]"));
        let (base, version) = name.rsplit_once('-').ok_or_else(invalid)?;
        if base.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let version = version
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_add(1))
            .ok_or_else(invalid)?;
        Ok(Self::object_name(base, version))
    }

    /// Next generation of `name`.
    ///
    /// Names without a numeric suffix get a time-derived one.
    #[must_use]
    pub fn next_name(name: &str, clock: &dyn Clock) -> String {
        Self::increment_name(name).unwrap_or_else(|_| Self::timestamped_name(name, clock))
    }
}
