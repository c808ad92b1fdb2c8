//! Error types for bare metal provisioning.

use thiserror::Error;

use crate::hardware::Selector;

/// Errors raised while validating a cluster spec, building templates or
/// reconciling immutable objects.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Invalid or inconsistent cluster configuration.
    #[error("{0}")]
    Configuration(String),

    /// The catalogue holds fewer machines than the topology requests.
    #[error("insufficient hardware: have {available}, require {requested} (short by {deficit})")]
    TotalHardwareShortfall {
        available: usize,
        requested: usize,
        deficit: usize,
    },

    /// A single requirement group is not satisfied by matching hardware.
    #[error(
        "minimum hardware count not met for {name} with selector '{selector}': have {observed}, require {required}"
    )]
    InsufficientHardware {
        name: String,
        selector: Selector,
        observed: usize,
        required: usize,
    },

    /// Neither unprovisioned nor provisioned hardware yielded a disk.
    #[error("cannot determine disk: no hardware matching selector '{selector}' reports a disk")]
    DiskNotFound { selector: Selector },

    /// Hardware identity inserted twice into a catalogue.
    #[error("duplicate hardware: {id}")]
    DuplicateHardware { id: String },

    /// Hardware inventory could not be read or is malformed.
    #[error("hardware inventory: {0}")]
    Inventory(String),

    /// Live-cluster lookup failed for a reason other than not-found.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Serialization of a rendered object failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML input or output failed to (de)serialize.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Shorthand for a [`ProvisionError::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Failure reading an object from the live cluster.
#[derive(Error, Debug)]
#[error("reading {kind} {namespace}/{name} from API: {message}")]
pub struct LookupError {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub message: String,
}

/// Result alias used throughout the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
