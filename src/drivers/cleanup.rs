//! Teardown of the numbered namespaces
//!
//! Policies go first, then services, then pods, then the namespaces
//! themselves. Objects that are already gone are skipped.

use tracing::{info, instrument};

use super::{delete_services, namespace_name, NAMESPACE_PREFIX};
use crate::error::{best_effort, Result};
use crate::k8s::ClusterGateway;

/// How many namespaces carry the numbered prefix
pub async fn count_numbered_namespaces(gateway: &dyn ClusterGateway) -> Result<u32> {
    let count = gateway
        .list_namespaces()
        .await?
        .iter()
        .filter(|name| name.starts_with(NAMESPACE_PREFIX))
        .count();
    Ok(count as u32)
}

/// Remove everything the other drivers created; returns the namespace count.
#[instrument(skip(gateway))]
pub async fn run(gateway: &dyn ClusterGateway) -> Result<u32> {
    let count = count_numbered_namespaces(gateway).await?;
    let namespaces: Vec<String> = (0..count).map(namespace_name).collect();
    info!(namespaces = count, "Cleaning up");

    for ns in &namespaces {
        best_effort(
            "delete network policies",
            gateway.delete_network_policies(ns).await,
        )?;
    }
    for ns in &namespaces {
        delete_services(gateway, ns).await?;
    }
    for ns in &namespaces {
        best_effort("delete pods", gateway.delete_pods(ns).await)?;
    }
    for ns in &namespaces {
        best_effort("delete namespace", gateway.delete_namespace(ns).await)?;
    }

    info!(namespaces = count, "Cleanup finished");
    Ok(count)
}
