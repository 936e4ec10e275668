//! HyperConverged - meta-operator for a virtualization platform on Kubernetes
//!
//! A single `HyperConverged` resource describes how virtualization should run
//! on the cluster. The operator translates it into the custom resources of the
//! component operators (virtualization engine, data importer, network
//! add-ons, scheduling/templates), keeps them in sync, and reports their
//! aggregated health back on the HyperConverged status.
//!
//! # Modules
//!
//! - [`crd`] - HyperConverged API (v1beta1 and v1) and the operand CR kinds
//! - [`conversion`] - Lossless conversion between the two HyperConverged versions
//! - [`nodeinfo`] - Cluster topology and CPU-model recommendations
//! - [`upgrade_patch`] - Version-ranged patches applied during upgrades
//! - [`golden_images`] - Built-in boot-source catalog merged with user templates
//! - [`operands`] - Building and reconciling every managed object
//! - [`controller`] - HyperConverged reconciliation loop
//! - [`webhook`] - Validating, mutating and conversion admission endpoints
//! - [`metrics`] - Operator metrics and alerting rules
//! - [`tls_profile`] - TLS security profile resolution shared by controller and webhooks
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod conversion;
pub mod crd;
pub mod error;
pub mod events;
pub mod golden_images;
pub mod kube_utils;
pub mod metrics;
pub mod nodeinfo;
pub mod operands;
pub mod quantity;
pub mod telemetry;
pub mod tls_profile;
pub mod upgrade_patch;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
