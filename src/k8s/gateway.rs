//! Cluster gateway abstraction
//!
//! Every remote effect the harness has goes through [`ClusterGateway`], so the
//! convergence, bulk-deployment and connectivity logic can run against a fake
//! cluster in tests and against a real API server in production.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// Observed phase of a pod, plus the sentinel for a pod absent from the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PodStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    NotFound,
}

impl From<&str> for PodStatus {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodStatus::Pending,
            "Running" => PodStatus::Running,
            "Succeeded" => PodStatus::Succeeded,
            "Failed" => PodStatus::Failed,
            _ => PodStatus::Unknown,
        }
    }
}

impl FromStr for PodStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PodStatus::Pending),
            "Running" => Ok(PodStatus::Running),
            "Succeeded" => Ok(PodStatus::Succeeded),
            "Failed" => Ok(PodStatus::Failed),
            "Unknown" => Ok(PodStatus::Unknown),
            "NotFound" => Ok(PodStatus::NotFound),
            other => Err(format!("unknown pod status: {}", other)),
        }
    }
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodStatus::Pending => write!(f, "Pending"),
            PodStatus::Running => write!(f, "Running"),
            PodStatus::Succeeded => write!(f, "Succeeded"),
            PodStatus::Failed => write!(f, "Failed"),
            PodStatus::Unknown => write!(f, "Unknown"),
            PodStatus::NotFound => write!(f, "NotFound"),
        }
    }
}

/// Read-only projection of a live pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplePodInfo {
    pub name: String,
    pub pod_ip: Option<String>,
    pub host_ip: Option<String>,
    pub status: PodStatus,
}

impl SimplePodInfo {
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            pod_ip: status.and_then(|s| s.pod_ip.clone()),
            host_ip: status.and_then(|s| s.host_ip.clone()),
            status: status
                .and_then(|s| s.phase.as_deref())
                .map(PodStatus::from)
                .unwrap_or(PodStatus::Unknown),
        }
    }
}

/// Cluster node as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    pub schedulable: bool,
}

/// Remote resource-management operations the harness consumes.
///
/// Errors surface as [`crate::Error::Conflict`] (409), [`crate::Error::NotFound`]
/// (404) or a transport/other error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn create_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    /// Delete every pod in a namespace
    async fn delete_pods(&self, namespace: &str) -> Result<()>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<SimplePodInfo>;
    async fn list_pods(&self, namespace: &str) -> Result<Vec<SimplePodInfo>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
    /// Virtual address assigned to a service, if one has been allocated
    async fn get_service_ip(&self, namespace: &str, name: &str) -> Result<Option<String>>;
    async fn list_services(&self, namespace: &str) -> Result<Vec<String>>;

    async fn create_network_policy(&self, policy: &NetworkPolicy) -> Result<()>;
    async fn replace_network_policy(&self, policy: &NetworkPolicy) -> Result<()>;
    async fn read_network_policy(&self, namespace: &str, name: &str) -> Result<NetworkPolicy>;
    async fn delete_network_policy(&self, namespace: &str, name: &str) -> Result<()>;
    /// Delete every network policy in a namespace
    async fn delete_network_policies(&self, namespace: &str) -> Result<()>;
    async fn list_network_policies(&self, namespace: &str) -> Result<Vec<String>>;

    async fn create_replica_set(&self, replica_set: &ReplicaSet) -> Result<()>;
    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create or replace the default container limit range of a namespace
    async fn apply_limit_range(&self, namespace: &str) -> Result<()>;

    /// Run a command inside a pod and return what it printed on stdout
    async fn exec_in_pod(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<String>;
    async fn read_pod_log(&self, namespace: &str, pod: &str, tail_lines: Option<i64>) -> Result<String>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Names of ready, schedulable nodes starting with `prefix`, sorted.
pub async fn ready_node_names(gateway: &dyn ClusterGateway, prefix: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = gateway
        .list_nodes()
        .await?
        .into_iter()
        .filter(|n| n.ready && n.schedulable && n.name.starts_with(prefix))
        .map(|n| n.name)
        .collect();
    names.sort();
    Ok(names)
}

/// Count pods per host IP and phase
pub async fn pod_stats(
    gateway: &dyn ClusterGateway,
    namespace: &str,
) -> Result<BTreeMap<String, BTreeMap<PodStatus, usize>>> {
    let mut stats: BTreeMap<String, BTreeMap<PodStatus, usize>> = BTreeMap::new();
    for pod in gateway.list_pods(namespace).await? {
        let host = pod.host_ip.unwrap_or_else(|| "unscheduled".to_string());
        *stats.entry(host).or_default().entry(pod.status).or_default() += 1;
    }
    Ok(stats)
}
