//! Install-disk discovery for machine groups.
//!
//! The default provisioning workflow writes the OS image to a concrete device,
//! so the disk must be known when templates are rendered. Discovery first
//! looks at hardware that no machine has claimed yet. On a re-run every
//! matching record may already be claimed, so it then looks at provisioned
//! hardware. The two lookups stay separate calls.

use tracing::{debug, warn};

use super::{HardwareCatalogue, Selector};
use crate::error::{ProvisionError, Result};

/// Read-only disk lookups against a hardware inventory.
pub trait DiskDiscovery {
    /// First disk of unclaimed hardware matching `selector`.
    fn unprovisioned_disk(&self, selector: &Selector) -> Option<String>;

    /// First disk of claimed hardware matching `selector`.
    fn provisioned_disk(&self, selector: &Selector) -> Option<String>;
}

impl DiskDiscovery for HardwareCatalogue {
    fn unprovisioned_disk(&self, selector: &Selector) -> Option<String> {
        self.unprovisioned_matching(selector)
            .find_map(|h| h.install_disk().map(str::to_string))
    }

    fn provisioned_disk(&self, selector: &Selector) -> Option<String> {
        self.provisioned_matching(selector)
            .find_map(|h| h.install_disk().map(str::to_string))
    }
}

/// Resolve the install disk for a group, unprovisioned hardware first.
///
/// # Errors
///
/// Returns [`ProvisionError::DiskNotFound`] when neither lookup yields a disk.
pub fn resolve_disk(discovery: &dyn DiskDiscovery, selector: &Selector) -> Result<String> {
    if let Some(disk) = discovery.unprovisioned_disk(selector) {
        debug!("Using disk {disk} from unprovisioned hardware for selector '{selector}'");
        return Ok(disk);
    }

    if let Some(disk) = discovery.provisioned_disk(selector) {
        debug!("Using disk {disk} from provisioned hardware for selector '{selector}'");
        return Ok(disk);
    }

    warn!("No hardware matching selector '{selector}' reports a disk");
    Err(ProvisionError::DiskNotFound {
        selector: selector.clone(),
    })
}

/// Partition device path for `disk`.
///
/// Devices whose name ends in a digit (`/dev/nvme0n1`) separate the partition
/// number with `p`.
#[must_use]
pub fn format_partition(disk: &str, partition: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p{partition}")
    } else {
        format!("{disk}{partition}")
    }
}
