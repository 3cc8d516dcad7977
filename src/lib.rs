//! kube-pressure library
//!
//! Pressure-testing harness for Kubernetes clusters: bulk pod and service
//! creation, network-policy isolation checks and pod-to-pod throughput.

pub mod config;
pub mod drivers;
pub mod error;
pub mod k8s;
pub mod report;

pub use error::{Error, Result};
