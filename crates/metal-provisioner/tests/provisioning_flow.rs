//! End-to-end provisioning flows against an in-memory cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Taint;
use metal_provisioner::template::objects::{KUBEADM_CONFIG_TEMPLATE_KIND, MACHINE_TEMPLATE_KIND};
use metal_provisioner::{
    CapiManifest, ClusterObjects, ClusterSpec, FixedClock, HardwareInventory, LookupError,
    MetalProvider, ObjectLookup, ProvisionError,
};

const CLUSTER: &str = r#"
cluster:
  name: test
  namespace: test-namespace
  spec:
    kubernetesVersion: "1.31"
    controlPlane:
      count: 1
      endpoint:
        host: 10.0.0.10
      machineGroupRef:
        kind: TinkerbellMachineConfig
        name: test-cp
    workerNodeGroups:
      - name: md-0
        count: 1
        machineGroupRef:
          kind: TinkerbellMachineConfig
          name: test-worker
    clusterNetwork:
      pods: [192.168.0.0/16]
      services: [10.96.0.0/12]
datacenterConfig:
  name: test
  namespace: test-namespace
  spec:
    tinkerbellIp: 10.0.0.2
    osImageUrl: https://images.example.com/ubuntu.gz
machineConfigs:
  - name: test-cp
    namespace: test-namespace
    spec:
      hardwareSelector:
        type: cp
      osFamily: ubuntu
      users:
        - name: tink-user
          sshAuthorizedKeys: ["ssh-rsa AAAAB3Nza test@example"]
  - name: test-worker
    namespace: test-namespace
    spec:
      hardwareSelector:
        type: worker
      osFamily: ubuntu
      users:
        - name: tink-user
          sshAuthorizedKeys: ["ssh-rsa AAAAB3Nza test@example"]
bundle:
  number: 1
  actions:
    imageToDisk: public.ecr.aws/eks-anywhere/image2disk:v1
    writeFile: public.ecr.aws/eks-anywhere/writefile:v1
    reboot: public.ecr.aws/eks-anywhere/reboot:v1
"#;

const HARDWARE: &str = r"
hardware:
  - id: cp-01
    labels:
      type: cp
    disks: [/dev/sda]
  - id: cp-02
    labels:
      type: cp
    disks: [/dev/sda]
  - id: worker-01
    labels:
      type: worker
    disks: [/dev/nvme0n1]
  - id: worker-02
    labels:
      type: worker
    disks: [/dev/nvme0n1]
";

const NOW_MILLIS: i64 = 1_700_000_000_000;

/// Objects stored by kind and name.
#[derive(Default)]
struct InMemoryCluster {
    objects: Mutex<HashMap<(String, String), CapiManifest>>,
}

impl InMemoryCluster {
    fn apply(&self, objects: &ClusterObjects) {
        let mut stored = self.objects.lock().unwrap();
        for object in objects.objects() {
            stored.insert(
                (object.kind.clone(), object.name().to_string()),
                object.clone(),
            );
        }
    }
}

#[async_trait]
impl ObjectLookup for InMemoryCluster {
    async fn get_object(
        &self,
        _api_version: &str,
        kind: &str,
        name: &str,
        _namespace: &str,
    ) -> Result<Option<CapiManifest>, LookupError> {
        let stored = self.objects.lock().unwrap();
        Ok(stored.get(&(kind.to_string(), name.to_string())).cloned())
    }
}

fn spec() -> ClusterSpec {
    ClusterSpec::from_yaml(CLUSTER).unwrap()
}

fn provider() -> MetalProvider {
    let catalogue = HardwareInventory::from_yaml(HARDWARE)
        .unwrap()
        .into_catalogue()
        .unwrap();
    MetalProvider::new(catalogue)
        .skip_ip_check(true)
        .with_clock(Arc::new(FixedClock::from_millis(NOW_MILLIS)))
}

fn no_schedule(key: &str) -> Taint {
    Taint {
        key: key.to_string(),
        effect: "NoSchedule".to_string(),
        ..Taint::default()
    }
}

#[test]
fn test_validate_rejects_undersized_worker_group() {
    let mut spec = spec();
    spec.cluster.spec.worker_node_groups[0].count = 3;

    let err = provider().validate_create(&spec).unwrap_err();
    assert!(
        matches!(&err, ProvisionError::InsufficientHardware { name, .. } if name == "md-0"),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("md-0"));
}

#[test]
fn test_validate_accepts_fitting_topology() {
    provider().validate_create(&spec()).unwrap();
}

#[tokio::test]
async fn test_recreate_reuses_unchanged_templates() {
    let provider = provider();
    let spec = spec();
    let cluster = Arc::new(InMemoryCluster::default());

    let first = provider.reconcile_create(&spec, cluster.clone()).await.unwrap();
    assert_eq!(first.control_plane.machine_template.name(), "test-control-plane-1");
    cluster.apply(&first);

    let second = provider.reconcile_create(&spec, cluster).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        second.control_plane.machine_template_ref(),
        Some("test-control-plane-1")
    );
}

#[tokio::test]
async fn test_changed_control_plane_template_is_superseded() {
    let provider = provider();
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&spec()).unwrap());

    let mut changed = spec();
    changed.machine_configs[0].spec.os_image_url =
        Some("https://images.example.com/ubuntu-2.gz".to_string());

    let objects = provider.reconcile_create(&changed, cluster).await.unwrap();
    let cp = &objects.control_plane;
    assert_eq!(cp.machine_template.name(), "test-control-plane-2");
    assert_eq!(cp.machine_template_ref(), Some("test-control-plane-2"));

    // Worker templates were untouched.
    let group = objects.workers.group("md-0").unwrap();
    assert_eq!(group.machine_template.name(), "test-md-0-1");
    assert_eq!(group.kubeadm_config_template_ref(), Some("test-md-0-1"));
}

#[tokio::test]
async fn test_upgrade_with_worker_taint_replaces_group_templates() {
    let provider = provider();
    let current = spec();
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&current).unwrap());

    let mut new = current.clone();
    new.cluster.spec.worker_node_groups[0]
        .taints
        .push(no_schedule("dedicated"));

    let plan = provider.upgrade_engine().plan(&current, &new).unwrap();
    assert!(!plan.control_plane);
    assert!(!plan.etcd);
    let md0 = &plan.workers["md-0"];
    assert!(md0.machine_template);
    assert!(md0.kubeadm_config_template);

    provider.validate_upgrade(&current, &new).unwrap();
    let objects = provider
        .generate_upgrade(&current, &new, cluster)
        .await
        .unwrap();
    assert!(!objects.omit_machine_templates);

    let stamped = format!("test-md-0-{NOW_MILLIS}");
    let group = objects.workers.group("md-0").unwrap();
    assert_eq!(group.machine_template_ref(), Some(stamped.as_str()));
    assert_eq!(group.kubeadm_config_template_ref(), Some(stamped.as_str()));
    assert_eq!(
        objects.control_plane.machine_template_ref(),
        Some("test-control-plane-1")
    );
}

#[tokio::test]
async fn test_version_upgrade_keeps_kubeadm_config_template() {
    let provider = provider();
    let current = spec();
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&current).unwrap());

    let mut new = current.clone();
    new.cluster.spec.kubernetes_version = "1.32".to_string();

    provider.validate_upgrade(&current, &new).unwrap();
    let objects = provider
        .generate_upgrade(&current, &new, cluster)
        .await
        .unwrap();

    let cp_name = format!("test-control-plane-{NOW_MILLIS}");
    assert_eq!(
        objects.control_plane.machine_template_ref(),
        Some(cp_name.as_str())
    );
    let group = objects.workers.group("md-0").unwrap();
    assert_eq!(
        group.machine_template_ref(),
        Some(format!("test-md-0-{NOW_MILLIS}").as_str())
    );
    assert_eq!(group.kubeadm_config_template_ref(), Some("test-md-0-1"));
}

#[tokio::test]
async fn test_scale_out_omits_machine_templates() {
    let provider = provider();
    let current = spec();
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&current).unwrap());

    let mut new = current.clone();
    new.cluster.spec.worker_node_groups[0].count = 2;

    provider.validate_upgrade(&current, &new).unwrap();
    let objects = provider
        .generate_upgrade(&current, &new, cluster)
        .await
        .unwrap();
    assert!(objects.omit_machine_templates);
    assert!(objects
        .objects()
        .iter()
        .all(|o| o.kind != MACHINE_TEMPLATE_KIND));
    assert!(objects
        .objects()
        .iter()
        .any(|o| o.kind == KUBEADM_CONFIG_TEMPLATE_KIND && o.name() == "test-md-0-1"));

    let yaml = objects.to_yaml().unwrap();
    assert!(!yaml.contains(MACHINE_TEMPLATE_KIND));
}

#[tokio::test]
async fn test_upgrade_adds_new_worker_group() {
    let provider = provider();
    let current = spec();
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&current).unwrap());

    let mut new = current.clone();
    let mut group = new.cluster.spec.worker_node_groups[0].clone();
    group.name = "md-1".to_string();
    new.cluster.spec.worker_node_groups.push(group);

    let plan = provider.upgrade_engine().plan(&current, &new).unwrap();
    assert!(plan.workers["md-1"].machine_template);
    assert!(!plan.workers["md-0"].machine_template);

    let objects = provider
        .generate_upgrade(&current, &new, cluster)
        .await
        .unwrap();
    assert_eq!(
        objects.workers.group("md-0").unwrap().machine_template_ref(),
        Some("test-md-0-1")
    );
    assert_eq!(
        objects.workers.group("md-1").unwrap().machine_template_ref(),
        Some(format!("test-md-1-{NOW_MILLIS}").as_str())
    );
}

#[tokio::test]
async fn test_cleared_worker_taints_supersede_kubeadm_config_template() {
    let provider = provider();
    let mut tainted = spec();
    tainted.cluster.spec.worker_node_groups[0]
        .taints
        .push(no_schedule("dedicated"));
    let cluster = Arc::new(InMemoryCluster::default());
    cluster.apply(&provider.generate_create(&tainted).unwrap());

    let objects = provider.reconcile_create(&spec(), cluster).await.unwrap();
    let group = objects.workers.group("md-0").unwrap();
    assert_eq!(group.kubeadm_config_template_ref(), Some("test-md-0-2"));
    assert_eq!(group.machine_template_ref(), Some("test-md-0-1"));
}
