//! Reconciliation of immutable templates against the live cluster.

pub mod equality;
pub mod immutable;
pub mod lookup;

pub use equality::{kubeadm_config_template_equal, semantic_derivative, spec_equal};
pub use immutable::{EqualityPredicate, ImmutableObjectReconciler, NameDecision};
pub use lookup::{KubeObjectLookup, ObjectLookup};
