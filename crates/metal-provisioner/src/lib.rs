//! Bare metal (Tinkerbell) provisioning for Cluster API clusters.
//!
//! This crate validates that a declared cluster topology can be hosted by a
//! labeled hardware inventory, renders the Cluster API objects for it, and
//! decides on every pass whether immutable machine templates are reused or
//! superseded under a new name.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use metal_provisioner::{ClusterSpec, HardwareInventory, KubeObjectLookup, MetalProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let spec = ClusterSpec::from_yaml(&std::fs::read_to_string("cluster.yaml")?)?;
//!     let inventory = HardwareInventory::from_yaml(&std::fs::read_to_string("hardware.yaml")?)?;
//!
//!     let provider = MetalProvider::new(inventory.into_catalogue()?);
//!     provider.validate_create(&spec)?;
//!
//!     let lookup = Arc::new(KubeObjectLookup::try_default().await?);
//!     let objects = provider.reconcile_create(&spec, lookup).await?;
//!     println!("{}", objects.to_yaml()?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod clock;
pub mod error;
pub mod hardware;
pub mod provider;
pub mod reconcile;
pub mod template;
pub mod upgrade;
pub mod validation;

pub use api::{ClusterSpec, MachineConfig, OsFamily};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{LookupError, ProvisionError, Result};
pub use hardware::{
    HardwareCatalogue, HardwareInventory, HardwareRecord, RequirementValidator, Selector,
};
pub use provider::{ClusterObjects, MetalProvider};
pub use reconcile::{ImmutableObjectReconciler, KubeObjectLookup, NameDecision, ObjectLookup};
pub use template::{CapiManifest, TemplateBuilder};
pub use upgrade::{ImmutableFieldCheck, NoImmutableFields, UpgradeDecisionEngine, UpgradePlan};
pub use validation::{ClusterSpecAssertion, ClusterSpecValidator};
