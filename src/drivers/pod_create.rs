//! Bulk pod creation
//!
//! Creates the numbered namespaces, then one pipeline per ready node. Slot `i`
//! of a node's pipeline puts a probe pod and its service in `namespace-<i>`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::{namespace_label, namespace_name, node_mark, pod_name, service_name};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::k8s::resources::{ContainerSpec, NamespaceBuilder, PodBuilder, ServiceBuilder, ServicePort};
use crate::k8s::{pod_stats, ready_node_names, BulkDeployer, ClusterGateway, Pipeline, Slot, SlotFactory};

#[derive(Debug, Clone)]
pub struct PodCreateOptions {
    pub namespaces: u32,
    pub node_prefix: String,
    /// Also install the default container limit range in every namespace
    pub limit_range: bool,
}

#[derive(Debug, Clone)]
pub struct PodCreateSummary {
    pub nodes: Vec<String>,
    pub pods: u32,
    pub elapsed: Duration,
}

pub fn client_port() -> ServicePort {
    ServicePort::new("clientport", 8080, 8080)
}

/// Probe pod and service for one (node, namespace) slot
struct ProbeSlots {
    image: String,
    port: ServicePort,
}

#[async_trait]
impl SlotFactory for ProbeSlots {
    async fn create_slot(
        &self,
        gateway: &dyn ClusterGateway,
        node: &str,
        slot: u32,
    ) -> Result<Slot> {
        let mark = node_mark(node);
        let namespace = namespace_name(slot);
        let pod = pod_name(&mark, slot);

        let service = ServiceBuilder::new(&service_name(&mark, slot), &namespace).add_port(&self.port);
        service.deploy(gateway, true).await?;

        let deployed = PodBuilder::new(&pod, &namespace)
            .set_node(node)
            .add_container(
                ContainerSpec::new(&pod, &self.image)
                    .port(&self.port)
                    .request("cpu", "0")
                    .request("memory", "0")
                    .limit("cpu", "1")
                    .limit("memory", "32Mi"),
            )
            .attach_service(&service)
            .deploy(gateway)
            .await;
        match deployed {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                info!(namespace = %namespace, pod = %pod, "Pod already exists, waiting for it")
            }
            Err(e) => return Err(e),
        }

        Ok(Slot { namespace, pod })
    }
}

/// Create `namespace-0..count`; namespaces left over from an earlier run are reused.
pub async fn create_namespaces(
    gateway: &dyn ClusterGateway,
    count: u32,
    limit_range: bool,
) -> Result<()> {
    for i in 0..count {
        let label = namespace_label(i);
        let namespace = NamespaceBuilder::new(&namespace_name(i)).label(&label, &label);
        match namespace.deploy(gateway).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                info!(namespace = %namespace.name(), "Namespace already exists, reusing it")
            }
            Err(e) => return Err(e),
        }
        if limit_range {
            gateway.apply_limit_range(namespace.name()).await?;
        }
    }
    Ok(())
}

#[instrument(skip(gateway, config))]
pub async fn run(
    gateway: &dyn ClusterGateway,
    config: &Config,
    options: &PodCreateOptions,
) -> Result<PodCreateSummary> {
    let nodes = ready_node_names(gateway, &options.node_prefix).await?;
    if nodes.is_empty() {
        return Err(Error::validation(format!(
            "no ready node starts with {:?}",
            options.node_prefix
        )));
    }
    info!(nodes = nodes.len(), namespaces = options.namespaces, "Creating pods");

    create_namespaces(gateway, options.namespaces, options.limit_range).await?;

    let mut pipelines: Vec<Pipeline> = nodes
        .iter()
        .map(|node| Pipeline::new(node, options.namespaces))
        .collect();
    let factory = ProbeSlots {
        image: config.probe_image.clone(),
        port: client_port(),
    };
    let elapsed = BulkDeployer::new(config.pass_ticker())
        .with_deadline(config.bulk_deadline())
        .run(gateway, &factory, &mut pipelines)
        .await?;

    for i in 0..options.namespaces {
        let namespace = namespace_name(i);
        for (host, phases) in pod_stats(gateway, &namespace).await? {
            info!(namespace = %namespace, host = %host, ?phases, "Pods per host");
        }
    }

    Ok(PodCreateSummary {
        pods: pipelines.iter().map(Pipeline::completed).sum(),
        nodes,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeCluster;
    use crate::k8s::NodeInfo;

    fn options(namespaces: u32) -> PodCreateOptions {
        PodCreateOptions {
            namespaces,
            node_prefix: "10.0".to_string(),
            limit_range: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fills_every_namespace_on_every_node() {
        let cluster = FakeCluster::new()
            .with_nodes(&["10.0.0.1", "10.0.0.2", "192.168.1.1"])
            .with_node(NodeInfo {
                name: "10.0.0.3".to_string(),
                ready: false,
                schedulable: true,
            })
            .with_startup_reads(1);

        let summary = run(&cluster, &Config::default(), &options(3)).await.unwrap();

        assert_eq!(summary.nodes, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(summary.pods, 6);
        for i in 0..3 {
            let ns = namespace_name(i);
            let label = namespace_label(i);
            assert_eq!(cluster.namespace_labels(&ns).unwrap()[&label], label);
            assert_eq!(
                cluster.pod_names(&ns),
                vec![format!("pod-10-0-0-1-{}", i), format!("pod-10-0-0-2-{}", i)]
            );
            assert_eq!(cluster.service_names(&ns).len(), 2);
        }
        assert_eq!(cluster.calls("create_pod"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_pod_shape() {
        let cluster = FakeCluster::new().with_nodes(&["10.0.0.1"]);
        run(&cluster, &Config::default(), &options(1)).await.unwrap();

        let pod = cluster.pod("namespace-0", "pod-10-0-0-1-0").unwrap();
        assert_eq!(
            pod.metadata.labels.unwrap()["svc-10-0-0-1-0-service"],
            "svc-10-0-0-1-0"
        );
        let spec = pod.spec.unwrap();
        assert_eq!(spec.node_name.as_deref(), Some("10.0.0.1"));
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("xujieasd/alphine-restcheck:0.5"));
        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.limits.as_ref().unwrap()["memory"].0, "32Mi");
        assert_eq!(resources.requests.as_ref().unwrap()["cpu"].0, "0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_namespaces_are_reused() {
        let cluster = FakeCluster::new().with_nodes(&["10.0.0.1"]);
        create_namespaces(&cluster, 2, true).await.unwrap();
        create_namespaces(&cluster, 2, true).await.unwrap();

        assert_eq!(cluster.list_namespaces().await.unwrap().len(), 2);
        assert!(cluster.has_limit_range("namespace-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_reuses_existing_pods() {
        let cluster = FakeCluster::new().with_nodes(&["10.0.0.1"]);
        run(&cluster, &Config::default(), &options(2)).await.unwrap();

        let summary = run(&cluster, &Config::default(), &options(2)).await.unwrap();

        assert_eq!(summary.pods, 2);
        assert_eq!(cluster.pod_names("namespace-1"), vec!["pod-10-0-0-1-1".to_string()]);
        assert_eq!(cluster.service_names("namespace-1").len(), 1);
        assert_eq!(cluster.list_namespaces().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_matching_nodes() {
        let cluster = FakeCluster::new().with_nodes(&["worker-1"]);
        let err = run(&cluster, &Config::default(), &options(1)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
