//! Hardware inventory, selectors and requirement checks.

pub mod catalogue;
pub mod disk;
pub mod inventory;
pub mod requirements;
pub mod selector;

pub use catalogue::{HardwareCatalogue, HardwareRecord, OWNER_NAME_LABEL};
pub use disk::{format_partition, resolve_disk, DiskDiscovery};
pub use inventory::HardwareInventory;
pub use requirements::{
    build_requirements, ensure_hardware_selectors_specified,
    validate_minimum_hardware_requirements, validate_total_hardware_requested_available,
    CurrentTopology, MinimumRequirement, RequirementValidator,
};
pub use selector::Selector;
