//! Hardware inventory documents.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{HardwareCatalogue, HardwareRecord};
use crate::error::{ProvisionError, Result};

/// RFC 1123 subdomain, as required for hardware object names.
static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("DNS-1123 pattern compiles")
});

const MAX_NAME_LENGTH: usize = 253;

// ============================================================================
// Inventory types
// ============================================================================

/// Hardware inventory snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInventory {
    /// Hardware records.
    #[serde(default)]
    pub hardware: Vec<HardwareRecord>,
    /// When the snapshot was taken.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl HardwareInventory {
    /// Parse an inventory document.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Yaml`] if the document is malformed.
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Check record identities and management references.
    ///
    /// Ids must be valid object names and unique. Two records may not share a
    /// management controller.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::DuplicateHardware`] for a repeated id and
    /// [`ProvisionError::Inventory`] for any other invalid record.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut bmc_refs = HashSet::new();

        for record in &self.hardware {
            validate_name(&record.id)?;
            if !ids.insert(record.id.as_str()) {
                return Err(ProvisionError::DuplicateHardware {
                    id: record.id.clone(),
                });
            }
            if let Some(bmc_ref) = &record.bmc_ref {
                if !bmc_refs.insert(bmc_ref.as_str()) {
                    return Err(ProvisionError::Inventory(format!(
                        "bmc ref {bmc_ref} is used by more than one hardware record (found on {})",
                        record.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and load into a fresh catalogue.
    ///
    /// # Errors
    ///
    /// Returns the first validation or insertion error.
    pub fn into_catalogue(self) -> Result<HardwareCatalogue> {
        self.validate()?;
        debug!("Loading {} hardware records", self.hardware.len());
        HardwareCatalogue::from_records(self.hardware)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::Inventory("hardware id is required".into()));
    }
    if name.len() > MAX_NAME_LENGTH || !DNS1123_SUBDOMAIN.is_match(name) {
        return Err(ProvisionError::Inventory(format!(
            "hardware id {name} is not a valid DNS-1123 subdomain"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
hardware:
  - id: worker-01
    labels:
      type: worker
    disks: [/dev/sda]
    bmcRef: bmc-worker-01
    mac: "00:00:00:00:00:01"
  - id: cp-01
    labels:
      type: cp
    disks: [/dev/nvme0n1]
    bmcRef: bmc-cp-01
"#;

    #[test]
    fn test_load_inventory() {
        let inventory = HardwareInventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(inventory.hardware.len(), 2);
        assert_eq!(inventory.hardware[1].install_disk(), Some("/dev/nvme0n1"));

        let catalogue = inventory.into_catalogue().unwrap();
        assert_eq!(catalogue.total_hardware(), 2);
    }

    #[test]
    fn test_rejects_invalid_names() {
        let inventory = HardwareInventory {
            hardware: vec![HardwareRecord::new("Worker_01")],
            updated_at: None,
        };
        let err = inventory.validate().unwrap_err();
        assert!(err.to_string().contains("DNS-1123"));

        let inventory = HardwareInventory {
            hardware: vec![HardwareRecord::new("")],
            updated_at: None,
        };
        assert!(inventory.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicates() {
        let inventory = HardwareInventory {
            hardware: vec![HardwareRecord::new("hw-1"), HardwareRecord::new("hw-1")],
            updated_at: None,
        };
        assert!(matches!(
            inventory.validate(),
            Err(ProvisionError::DuplicateHardware { id }) if id == "hw-1"
        ));
        assert!(matches!(
            inventory.into_catalogue(),
            Err(ProvisionError::DuplicateHardware { .. })
        ));

        let inventory = HardwareInventory {
            hardware: vec![
                HardwareRecord::new("hw-1").with_bmc_ref("bmc"),
                HardwareRecord::new("hw-2").with_bmc_ref("bmc"),
            ],
            updated_at: None,
        };
        assert!(inventory
            .validate()
            .unwrap_err()
            .to_string()
            .contains("bmc ref bmc"));
    }
}
