//! In-memory hardware catalogue.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::Selector;
use crate::error::{ProvisionError, Result};

/// Label set by the provisioning controller once a machine claims a record.
pub const OWNER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/ownerName";

/// A physical machine in the provisioning inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareRecord {
    /// Unique identity within the inventory.
    pub id: String,
    /// Labels used for selector matching.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Block devices, install disk first (e.g. `/dev/sda`).
    #[serde(default)]
    pub disks: Vec<String>,
    /// Out-of-band management controller reference.
    #[serde(default)]
    pub bmc_ref: Option<String>,
    /// Primary MAC address.
    #[serde(default)]
    pub mac: Option<String>,
    /// Primary IPv4 address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Hostname assigned when provisioned.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl HardwareRecord {
    /// Create a record with no labels or disks.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
            disks: Vec::new(),
            bmc_ref: None,
            mac: None,
            ip_address: None,
            hostname: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_disk(mut self, disk: impl Into<String>) -> Self {
        self.disks.push(disk.into());
        self
    }

    #[must_use]
    pub fn with_bmc_ref(mut self, bmc_ref: impl Into<String>) -> Self {
        self.bmc_ref = Some(bmc_ref.into());
        self
    }

    /// Whether a machine has already claimed this hardware.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.labels.contains_key(OWNER_NAME_LABEL)
    }

    /// The install disk, if any is reported.
    #[must_use]
    pub fn install_disk(&self) -> Option<&str> {
        self.disks.first().map(String::as_str)
    }
}

/// Collection of hardware records, unique by identity.
///
/// Built once per call from an inventory snapshot. There is no internal
/// locking; do not share across concurrent calls.
#[derive(Debug, Default)]
pub struct HardwareCatalogue {
    hardware: Vec<HardwareRecord>,
    ids: HashSet<String>,
}

impl HardwareCatalogue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalogue from records, failing on the first duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DuplicateHardware`] if two records share an id.
    pub fn from_records(records: impl IntoIterator<Item = HardwareRecord>) -> Result<Self> {
        let mut catalogue = Self::new();
        for record in records {
            catalogue.insert_hardware(record)?;
        }
        Ok(catalogue)
    }

    /// Store a record.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DuplicateHardware`] if the id is already present.
    pub fn insert_hardware(&mut self, record: HardwareRecord) -> Result<()> {
        if !self.ids.insert(record.id.clone()) {
            return Err(ProvisionError::DuplicateHardware { id: record.id });
        }
        self.hardware.push(record);
        Ok(())
    }

    /// All records in insertion order.
    #[must_use]
    pub fn all_hardware(&self) -> &[HardwareRecord] {
        &self.hardware
    }

    #[must_use]
    pub fn total_hardware(&self) -> usize {
        self.hardware.len()
    }

    /// Records whose labels satisfy `selector`.
    pub fn matching<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> impl Iterator<Item = &'a HardwareRecord> + 'a {
        self.hardware
            .iter()
            .filter(move |h| selector.matches(&h.labels))
    }

    #[must_use]
    pub fn count_matching(&self, selector: &Selector) -> usize {
        self.matching(selector).count()
    }

    /// Matching records not yet claimed by a machine.
    pub fn unprovisioned_matching<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> impl Iterator<Item = &'a HardwareRecord> + 'a {
        self.matching(selector).filter(|h| !h.is_provisioned())
    }

    /// Matching records already claimed by a machine.
    pub fn provisioned_matching<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> impl Iterator<Item = &'a HardwareRecord> + 'a {
        self.matching(selector).filter(|h| h.is_provisioned())
    }
}
