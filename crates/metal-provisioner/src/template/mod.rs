//! Cluster API object generation.

pub mod builder;
pub mod manifest;
pub mod names;
pub mod objects;
pub mod workflow;

pub use builder::{
    ControlPlaneNames, TemplateBuilder, WorkerGroupNames, WorkerNames, PUBLIC_REGISTRY,
};
pub use manifest::{cluster_labels, to_yaml_stream, CapiManifest, ManifestMetadata};
pub use names::ObjectNaming;
pub use objects::{ControlPlane, WorkerGroup, Workers};
pub use workflow::{default_workflow, DefaultWorkflowParams, Workflow};
