//! Machine, datacenter and provisioning-template configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Ref;
use crate::hardware::Selector;
use crate::template::workflow::Workflow;

/// Operating systems the bare metal provider can install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Ubuntu,
    Bottlerocket,
    RedHat,
}

impl OsFamily {
    pub const SUPPORTED: [Self; 3] = [Self::Ubuntu, Self::RedHat, Self::Bottlerocket];

    /// Root filesystem partition written by the default workflow.
    #[must_use]
    pub fn root_partition(self) -> u32 {
        match self {
            Self::Ubuntu => 2,
            Self::RedHat => 1,
            Self::Bottlerocket => 12,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ubuntu => write!(f, "ubuntu"),
            Self::Bottlerocket => write!(f, "bottlerocket"),
            Self::RedHat => write!(f, "redhat"),
        }
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ubuntu" => Ok(Self::Ubuntu),
            "bottlerocket" => Ok(Self::Bottlerocket),
            "redhat" => Ok(Self::RedHat),
            other => Err(format!("unsupported osFamily: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfiguration {
    pub name: String,
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
}

/// Per machine group settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: MachineConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigSpec {
    #[serde(default)]
    pub hardware_selector: Selector,
    /// Kept as text so unsupported values surface as validation errors.
    #[serde(default)]
    pub os_family: String,
    #[serde(default)]
    pub users: Vec<UserConfiguration>,
    /// Provisioning-workflow override.
    #[serde(default)]
    pub template_ref: Option<Ref>,
    #[serde(default)]
    pub os_image_url: Option<String>,
}

impl MachineConfig {
    /// Parsed OS family.
    ///
    /// # Errors
    ///
    /// Returns a message naming the unsupported value.
    pub fn os_family(&self) -> Result<OsFamily, String> {
        self.spec.os_family.parse()
    }

    /// First user and its first key, as rendered into bootstrap configs.
    #[must_use]
    pub fn ssh_user_and_key(&self) -> Option<(&str, &str)> {
        let user = self.spec.users.first()?;
        let key = user.ssh_authorized_keys.first()?;
        Some((user.name.as_str(), key.as_str()))
    }
}

/// Datacenter-wide provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterConfig {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub spec: DatacenterConfigSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterConfigSpec {
    /// Management (Tinkerbell stack) IP.
    #[serde(default)]
    pub tinkerbell_ip: String,
    /// Base OS image location used by the default workflow.
    #[serde(default)]
    pub os_image_url: Option<String>,
    #[serde(default)]
    pub hook_images_url_path: Option<String>,
}

/// Named provisioning-workflow override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    pub name: String,
    pub template: Workflow,
}

/// Versioned set of component images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionsBundle {
    pub number: u32,
    pub actions: ActionImages,
    /// Image installed when a Bottlerocket machine has no explicit image URL.
    #[serde(default)]
    pub bottlerocket_image_url: Option<String>,
}

/// Images used by the default provisioning workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionImages {
    pub image_to_disk: String,
    pub write_file: String,
    pub reboot: String,
}
