//! Pressure-test drivers
//!
//! One driver per scenario. They share the numbered-namespace layout:
//! namespace `namespace-<i>` carries the label `ns-<i>: ns-<i>`, and every
//! node owns pod `pod-<mark>-<i>` behind service `svc-<mark>-<i>` in it.

pub mod cleanup;
pub mod pod_create;
pub mod policy_create;
pub mod throughput;
pub mod traffic;

use crate::error::{best_effort, Result};
use crate::k8s::ClusterGateway;

pub const NAMESPACE_PREFIX: &str = "namespace-";

pub fn namespace_name(index: u32) -> String {
    format!("{}{}", NAMESPACE_PREFIX, index)
}

/// Label key and value selecting namespace `index`
pub fn namespace_label(index: u32) -> String {
    format!("ns-{}", index)
}

/// Node name usable inside object names
pub fn node_mark(node: &str) -> String {
    node.replace('.', "-")
}

pub fn pod_name(mark: &str, index: u32) -> String {
    format!("pod-{}-{}", mark, index)
}

pub fn service_name(mark: &str, index: u32) -> String {
    format!("svc-{}-{}", mark, index)
}

/// Delete every service of a namespace, skipping ones already gone
pub(crate) async fn delete_services(gateway: &dyn ClusterGateway, namespace: &str) -> Result<()> {
    let services = best_effort("list services", gateway.list_services(namespace).await)?;
    for service in services.unwrap_or_default() {
        best_effort(
            "delete service",
            gateway.delete_service(namespace, &service).await,
        )?;
    }
    Ok(())
}
