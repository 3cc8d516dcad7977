//! Kubernetes resource descriptors for kube-pressure
//!
//! Builders assemble Namespace, Pod, ReplicaSet, Service and NetworkPolicy
//! objects in memory. Nothing touches the cluster until `deploy`, `update` or
//! `un_deploy` is called with a gateway.

use std::collections::BTreeMap;
use std::future::Future;

use tracing::info;

use crate::error::Result;

mod container;
mod namespace;
mod pod;
mod policy;
mod service;

pub use container::{CephFsSource, ContainerSpec, RbdSource, ServicePort, Volume, VolumeSource};
pub use namespace::NamespaceBuilder;
pub use pod::{PodBuilder, ReplicaSetBuilder, HOSTNAME_ANNOTATION};
pub use policy::{NetworkPolicyBuilder, NetworkPolicyPort, PolicyPeer, PolicyRule, PolicyType};
pub use service::ServiceBuilder;

/// Label map from key/value pairs
pub fn labels<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> BTreeMap<String, String>
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Submit a create call. With `force`, an "already exists" answer deletes the
/// live object and creates once more; any other failure propagates.
pub(crate) async fn create_or_replace<T, C, CF, D, DF>(
    kind: &str,
    namespace: &str,
    name: &str,
    force: bool,
    create: C,
    delete: D,
) -> Result<T>
where
    C: Fn() -> CF,
    CF: Future<Output = Result<T>>,
    D: FnOnce() -> DF,
    DF: Future<Output = Result<()>>,
{
    match create().await {
        Err(e) if force && e.is_conflict() => {
            info!(kind, namespace, name, "Resource already exists, recreating");
            delete().await?;
            create().await
        }
        other => other,
    }
}

fn non_empty<T>(items: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

fn non_empty_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}
