//! Provisioning workflows executed on a machine before it joins the cluster.
//!
//! A workflow streams the OS image to the install disk, writes network and
//! metadata configuration onto the root partition, then reboots into the new
//! OS. Machine configs may supply their own workflow; otherwise
//! [`default_workflow`] synthesizes one for the machine's OS family.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{ActionImages, OsFamily};
use crate::error::{ProvisionError, Result};
use crate::hardware::format_partition;

/// Port the metadata service listens on.
pub const METADATA_PORT: u16 = 50061;

const CLOUD_INIT_TEMPLATE: &str = "cloud_init";
const CLOUD_INIT: &str = r"datasource:
  Ec2:
    metadata_urls: [{{#each urls}}{{#unless @first}},{{/unless}}{{#if ../quoted}}'{{this}}'{{else}}{{this}}{{/if}}{{/each}}]
    strict_id: false
manage_etc_hosts: localhost
warnings:
  dsid_missing_source: off
";

const BOTTLEROCKET_BOOTCONFIG: &str = "kernel {}";

/// Tinkerbell template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub version: String,
    pub name: String,
    pub global_timeout: u32,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub worker: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub image: String,
    pub timeout: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

impl Workflow {
    /// YAML text embedded in machine templates.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Yaml`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Every action across all tasks.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.tasks.iter().flat_map(|t| t.actions.iter())
    }

    /// Point action images hosted on `registry` at `mirror` instead.
    ///
    /// Only the `image` of each action is rewritten.
    pub fn with_registry_mirror(&mut self, registry: &str, mirror: &str) {
        let prefix = format!("{registry}/");
        for action in self.tasks.iter_mut().flat_map(|t| t.actions.iter_mut()) {
            if let Some(path) = action.image.strip_prefix(&prefix) {
                action.image = format!("{mirror}/{path}");
            }
        }
    }
}

/// Inputs for a synthesized workflow.
#[derive(Debug, Clone)]
pub struct DefaultWorkflowParams<'a> {
    pub name: &'a str,
    pub os_family: OsFamily,
    /// Install disk, e.g. `/dev/sda`.
    pub disk: &'a str,
    pub image_url: &'a str,
    pub tinkerbell_ip: &'a str,
    pub images: &'a ActionImages,
    /// `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` for the image download.
    pub proxy_env: BTreeMap<String, String>,
}

fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn action(name: &str, image: &str, timeout: u32, environment: BTreeMap<String, String>) -> Action {
    Action {
        name: name.to_string(),
        image: image.to_string(),
        timeout,
        environment,
        pid: None,
        volumes: Vec::new(),
    }
}

fn render_cloud_init(urls: &[String], quoted: bool) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string(CLOUD_INIT_TEMPLATE, CLOUD_INIT)
        .map_err(|e| ProvisionError::config(format!("cloud-init template: {e}")))?;
    handlebars
        .render(CLOUD_INIT_TEMPLATE, &json!({ "urls": urls, "quoted": quoted }))
        .map_err(|e| ProvisionError::config(format!("rendering cloud-init config: {e}")))
}

fn stream_image(params: &DefaultWorkflowParams<'_>) -> Action {
    let mut environment = env(&[
        ("DEST_DISK", params.disk),
        ("IMG_URL", params.image_url),
        ("COMPRESSED", "true"),
    ]);
    environment.extend(params.proxy_env.clone());
    action("stream-image", &params.images.image_to_disk, 600, environment)
}

fn write_netplan(images: &ActionImages, partition: &str, os_family: OsFamily) -> Action {
    let mut environment = env(&[
        ("DEST_DISK", partition),
        ("DEST_PATH", "/etc/netplan/config.yaml"),
        ("DIRMODE", "0755"),
        ("FS_TYPE", "ext4"),
        ("GID", "0"),
        ("MODE", "0644"),
        ("UID", "0"),
    ]);
    if os_family == OsFamily::Bottlerocket {
        environment.insert("DEST_PATH".into(), "/net.toml".into());
        environment.insert("STATIC_BOTTLEROCKET".into(), "true".into());
        environment.insert("IFNAME".into(), "eno1".into());
    } else {
        environment.insert("STATIC_NETPLAN".into(), "true".into());
    }
    Action {
        pid: Some("host".into()),
        ..action("write-netplan", &images.write_file, 90, environment)
    }
}

fn write_file(
    images: &ActionImages,
    name: &str,
    partition: &str,
    path: &str,
    contents: &str,
) -> Action {
    action(
        name,
        &images.write_file,
        90,
        env(&[
            ("DEST_DISK", partition),
            ("FS_TYPE", "ext4"),
            ("DEST_PATH", path),
            ("CONTENTS", contents),
            ("UID", "0"),
            ("GID", "0"),
            ("MODE", "0600"),
            ("DIRMODE", "0700"),
        ]),
    )
}

fn reboot(images: &ActionImages) -> Action {
    Action {
        pid: Some("host".into()),
        volumes: vec!["/worker:/worker".into()],
        ..action("reboot-image", &images.reboot, 90, BTreeMap::new())
    }
}

fn bottlerocket_actions(
    images: &ActionImages,
    partition: &str,
    metadata_urls: &[String],
) -> Vec<Action> {
    let hegel_urls = metadata_urls.join(",");
    let bootconfig = Action {
        pid: Some("host".into()),
        ..action(
            "write-bootconfig",
            &images.write_file,
            90,
            env(&[
                ("DEST_DISK", partition),
                ("FS_TYPE", "ext4"),
                ("DEST_PATH", "/bootconfig.data"),
                ("BOOTCONFIG_CONTENTS", BOTTLEROCKET_BOOTCONFIG),
                ("UID", "0"),
                ("GID", "0"),
                ("MODE", "0644"),
                ("DIRMODE", "0700"),
            ]),
        )
    };
    let user_data = Action {
        pid: Some("host".into()),
        ..action(
            "write-user-data",
            &images.write_file,
            90,
            env(&[
                ("DEST_DISK", partition),
                ("FS_TYPE", "ext4"),
                ("DEST_PATH", "/user-data.toml"),
                ("HEGEL_URLS", hegel_urls.as_str()),
                ("UID", "0"),
                ("GID", "0"),
                ("MODE", "0644"),
                ("DIRMODE", "0700"),
            ]),
        )
    };
    // write-netplan appends to user-data.toml so it must come after write-user-data.
    vec![
        bootconfig,
        user_data,
        write_netplan(images, partition, OsFamily::Bottlerocket),
    ]
}

fn cloud_init_actions(
    images: &ActionImages,
    partition: &str,
    os_family: OsFamily,
    metadata_urls: &[String],
) -> Result<Vec<Action>> {
    let cloud_init = render_cloud_init(metadata_urls, os_family == OsFamily::RedHat)?;
    Ok(vec![
        write_netplan(images, partition, os_family),
        write_file(
            images,
            "disable-cloud-init-network-capabilities",
            partition,
            "/etc/cloud/cloud.cfg.d/99-disable-network-config.cfg",
            "network: {config: disabled}",
        ),
        write_file(
            images,
            "add-tink-cloud-init-config",
            partition,
            "/etc/cloud/cloud.cfg.d/10_tinkerbell.cfg",
            &cloud_init,
        ),
        write_file(
            images,
            "add-tink-cloud-init-ds-config",
            partition,
            "/etc/cloud/ds-identify.cfg",
            "datasource: Ec2\n",
        ),
    ])
}

/// Synthesize the provisioning workflow for an OS family.
///
/// # Errors
///
/// Returns a configuration error if the cloud-init content fails to render.
pub fn default_workflow(params: &DefaultWorkflowParams<'_>) -> Result<Workflow> {
    let partition = format_partition(params.disk, params.os_family.root_partition());
    let metadata_urls = vec![format!("http://{}:{METADATA_PORT}", params.tinkerbell_ip)];

    let mut actions = vec![stream_image(params)];
    match params.os_family {
        OsFamily::Bottlerocket => {
            actions.extend(bottlerocket_actions(params.images, &partition, &metadata_urls));
        }
        OsFamily::Ubuntu | OsFamily::RedHat => {
            actions.extend(cloud_init_actions(
                params.images,
                &partition,
                params.os_family,
                &metadata_urls,
            )?);
        }
    }
    actions.push(reboot(params.images));

    Ok(Workflow {
        version: "0.1".to_string(),
        name: params.name.to_string(),
        global_timeout: 6000,
        tasks: vec![Task {
            name: params.name.to_string(),
            worker: "{{.device_1}}".to_string(),
            volumes: vec![
                "/dev:/dev".to_string(),
                "/dev/console:/dev/console".to_string(),
                "/lib/firmware:/lib/firmware:ro".to_string(),
            ],
            actions,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> ActionImages {
        ActionImages {
            image_to_disk: "public.ecr.aws/eks-anywhere/image2disk:v1".into(),
            write_file: "public.ecr.aws/eks-anywhere/writefile:v1".into(),
            reboot: "public.ecr.aws/eks-anywhere/reboot:v1".into(),
        }
    }

    fn params<'a>(
        images: &'a ActionImages,
        os_family: OsFamily,
        disk: &'a str,
    ) -> DefaultWorkflowParams<'a> {
        DefaultWorkflowParams {
            name: "test",
            os_family,
            disk,
            image_url: "https://images.example.com/os.gz",
            tinkerbell_ip: "10.0.0.2",
            images,
            proxy_env: BTreeMap::new(),
        }
    }

    fn names(workflow: &Workflow) -> Vec<&str> {
        workflow.actions().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_ubuntu_workflow() {
        let images = images();
        let workflow = default_workflow(&params(&images, OsFamily::Ubuntu, "/dev/sda")).unwrap();

        assert_eq!(
            names(&workflow),
            vec![
                "stream-image",
                "write-netplan",
                "disable-cloud-init-network-capabilities",
                "add-tink-cloud-init-config",
                "add-tink-cloud-init-ds-config",
                "reboot-image",
            ]
        );

        let stream = &workflow.tasks[0].actions[0];
        assert_eq!(stream.environment["DEST_DISK"], "/dev/sda");
        assert_eq!(stream.environment["COMPRESSED"], "true");
        assert_eq!(stream.timeout, 600);

        let netplan = &workflow.tasks[0].actions[1];
        assert_eq!(netplan.environment["DEST_DISK"], "/dev/sda2");

        let cloud_init = &workflow.tasks[0].actions[3].environment["CONTENTS"];
        assert!(cloud_init.contains("metadata_urls: [http://10.0.0.2:50061]"));
    }

    #[test]
    fn test_registry_mirror_rewrites_action_images_only() {
        let images = images();
        let mut params = params(&images, OsFamily::Ubuntu, "/dev/sda");
        params.image_url = "https://public.ecr.aws/os/ubuntu.gz";
        let mut workflow = default_workflow(&params).unwrap();

        workflow.with_registry_mirror("public.ecr.aws", "harbor.local:5000");

        assert!(workflow
            .actions()
            .all(|a| a.image.starts_with("harbor.local:5000/eks-anywhere/")));
        let stream = &workflow.tasks[0].actions[0];
        assert_eq!(stream.environment["IMG_URL"], "https://public.ecr.aws/os/ubuntu.gz");
    }

    #[test]
    fn test_redhat_quotes_metadata_urls() {
        let images = images();
        let workflow = default_workflow(&params(&images, OsFamily::RedHat, "/dev/sda")).unwrap();

        let cloud_init = &workflow.tasks[0].actions[3].environment["CONTENTS"];
        assert!(cloud_init.contains("metadata_urls: ['http://10.0.0.2:50061']"));
        assert_eq!(workflow.tasks[0].actions[1].environment["DEST_DISK"], "/dev/sda1");
    }

    #[test]
    fn test_bottlerocket_workflow() {
        let images = images();
        let workflow =
            default_workflow(&params(&images, OsFamily::Bottlerocket, "/dev/nvme0n1")).unwrap();

        assert_eq!(
            names(&workflow),
            vec![
                "stream-image",
                "write-bootconfig",
                "write-user-data",
                "write-netplan",
                "reboot-image",
            ]
        );
        let netplan = &workflow.tasks[0].actions[3];
        assert_eq!(netplan.environment["DEST_DISK"], "/dev/nvme0n1p12");
        assert_eq!(netplan.environment["DEST_PATH"], "/net.toml");
    }

    #[test]
    fn test_proxy_env_reaches_stream_image() {
        let images = images();
        let mut p = params(&images, OsFamily::Ubuntu, "/dev/sda");
        p.proxy_env
            .insert("HTTPS_PROXY".into(), "http://proxy:3128".into());

        let workflow = default_workflow(&p).unwrap();
        assert_eq!(
            workflow.tasks[0].actions[0].environment["HTTPS_PROXY"],
            "http://proxy:3128"
        );
    }
}
