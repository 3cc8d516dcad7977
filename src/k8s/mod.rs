//! Kubernetes integration module for kube-pressure
//!
//! This module handles all interactions with the cluster:
//! - Building namespace, pod, service and network policy descriptors
//! - Waiting for pods to converge on an expected status
//! - Driving many pod-creation pipelines from one polling loop
//! - Probing connectivity between pods and services

mod client;
pub mod connectivity;
mod gateway;
pub mod pipeline;
pub mod poller;
pub mod resources;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{K8sClient, ProfileRegistry, DEFAULT_PROFILE, LIMIT_RANGE_NAME};
pub use connectivity::{
    ConnectivityChecker, Expectation, MatrixPlan, PlannedCheck, Probe, Violation, ViolationKind,
};
pub use gateway::{pod_stats, ready_node_names, ClusterGateway, NodeInfo, PodStatus, SimplePodInfo};
pub use pipeline::{BulkDeployer, Pipeline, PipelinePhase, Slot, SlotFactory};
pub use poller::{is_pod_running, remove_pod, wait_for_pod_state, Ticker};

#[cfg(test)]
pub use gateway::MockClusterGateway;
