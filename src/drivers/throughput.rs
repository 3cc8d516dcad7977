//! Pod-to-pod throughput between every pair of nodes
//!
//! An iperf server is pinned to each node in turn. Every node then runs a
//! client against it twice, once by pod IP and once through the shared
//! service, and the reported bandwidth lands in the HTML report.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tracing::{info, instrument, warn};

use super::{delete_services, node_mark};
use crate::config::Config;
use crate::error::{best_effort, Error, Result};
use crate::k8s::resources::{ContainerSpec, PodBuilder, ServiceBuilder, ServicePort};
use crate::k8s::{ready_node_names, remove_pod, wait_for_pod_state, ClusterGateway, PodStatus, Ticker};
use crate::report::ThroughputReport;

pub const NAMESPACE: &str = "k8sft";
pub const SERVER_SERVICE: &str = "iperf-server";
pub const SERVER_ARGS: &str = "iperf -f M -i 1 -m -s";
pub const CLIENT_ARGS: &str = "iperf -f M -t 10 -i 1 -c %s";
pub const MEMORY_LIMIT: &str = "8Gi";

const BANDWIDTH_PATTERN: &str = r"^.*[^.\d]+([.\d]+) MBytes/sec";
const START_TIMEOUT_TICKS: u32 = 600;
const REMOVE_TIMEOUT_TICKS: u32 = 120;
const SERVER_WARMUP: Duration = Duration::from_secs(5);
const LOG_TAIL_LINES: i64 = 20;
const ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct ThroughputOptions {
    pub node_prefix: String,
    pub output: PathBuf,
}

pub fn server_port() -> ServicePort {
    ServicePort::new("serverport", 5001, 5001)
}

/// Bandwidth figure from the summary line of a client log
pub fn parse_bandwidth(pattern: &Regex, summary: &str) -> Option<String> {
    pattern
        .captures(summary)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn bandwidth_pattern() -> Result<Regex> {
    Regex::new(BANDWIDTH_PATTERN).map_err(|e| Error::validation(e.to_string()))
}

fn container(name: &str, image: &str, args: &str) -> ContainerSpec {
    ContainerSpec::new(&format!("{}-container", name), image)
        .args(args)
        .limit("cpu", "0")
        .limit("memory", MEMORY_LIMIT)
        .request("cpu", "0")
        .request("memory", "0")
}

struct Measurement<'a> {
    gateway: &'a dyn ClusterGateway,
    image: String,
    nodes: Vec<String>,
    poll: Ticker,
    pattern: Regex,
    report: ThroughputReport,
}

impl<'a> Measurement<'a> {
    /// Serve from `server_node` and measure from every node
    async fn run_server(&mut self, server_node: &str) -> Result<()> {
        let name = format!("server-{}", node_mark(server_node));
        let service = ServiceBuilder::new(SERVER_SERVICE, NAMESPACE).add_port(&server_port());
        PodBuilder::new(&name, NAMESPACE)
            .add_container(container(&name, &self.image, SERVER_ARGS).port(&server_port()))
            .set_node(server_node)
            .attach_service(&service)
            .deploy(self.gateway)
            .await?;

        let outcome = self.measure_from_all(&name, server_node).await;
        let removed = remove_pod(self.gateway, NAMESPACE, &name, REMOVE_TIMEOUT_TICKS, &self.poll).await;
        best_effort("throughput server", outcome)?;
        best_effort("remove server", removed)?;
        Ok(())
    }

    async fn measure_from_all(&mut self, server: &str, server_node: &str) -> Result<()> {
        wait_for_pod_state(
            self.gateway,
            NAMESPACE,
            server,
            START_TIMEOUT_TICKS,
            PodStatus::Running,
            &self.poll,
        )
        .await?;
        tokio::time::sleep(SERVER_WARMUP).await;

        let server_ip = self
            .gateway
            .get_pod(NAMESPACE, server)
            .await?
            .pod_ip
            .ok_or_else(|| Error::NotFound(format!("pod {}/{} has no IP", NAMESPACE, server)))?;

        for client_node in self.nodes.clone() {
            self.run_client(&client_node, server_node, &server_ip).await?;
            self.run_client(&client_node, server_node, SERVER_SERVICE).await?;
        }
        Ok(())
    }

    /// One measurement from `client_node` towards `target`
    async fn run_client(&mut self, client_node: &str, server_node: &str, target: &str) -> Result<()> {
        let name = format!("client-{}", node_mark(client_node));
        let pod = PodBuilder::new(&name, NAMESPACE)
            .add_container(container(&name, &self.image, &CLIENT_ARGS.replace("%s", target)))
            .set_node(client_node);

        let outcome = self.measure(&pod).await;
        let removed = remove_pod(self.gateway, NAMESPACE, &name, REMOVE_TIMEOUT_TICKS, &self.poll).await;
        if let Some(result) = best_effort("throughput client", outcome)? {
            info!(client = client_node, server = server_node, target, result = %result, "Measured");
            self.report.add(client_node, server_node, &result);
        }
        best_effort("remove client", removed)?;
        Ok(())
    }

    /// Bandwidth, or the last log line when no attempt produced one
    async fn measure(&self, pod: &PodBuilder) -> Result<String> {
        let mut summary = String::new();
        for attempt in 1..=ATTEMPTS {
            pod.deploy(self.gateway).await?;
            wait_for_pod_state(
                self.gateway,
                NAMESPACE,
                pod.name(),
                START_TIMEOUT_TICKS,
                PodStatus::Succeeded,
                &self.poll,
            )
            .await?;

            let logs = self
                .gateway
                .read_pod_log(NAMESPACE, pod.name(), Some(LOG_TAIL_LINES))
                .await?;
            summary = logs.trim().lines().last().unwrap_or_default().to_string();
            if let Some(bandwidth) = parse_bandwidth(&self.pattern, &summary) {
                return Ok(bandwidth);
            }
            warn!(pod = pod.name(), attempt, summary = %summary, "No bandwidth in client log");
            if attempt < ATTEMPTS {
                remove_pod(self.gateway, NAMESPACE, pod.name(), REMOVE_TIMEOUT_TICKS, &self.poll).await?;
            }
        }
        Ok(summary)
    }
}

/// Clear leftovers of an earlier run from the test namespace
async fn cleanup(gateway: &dyn ClusterGateway) -> Result<()> {
    best_effort("delete pods", gateway.delete_pods(NAMESPACE).await)?;
    delete_services(gateway, NAMESPACE).await
}

#[instrument(skip(gateway, config))]
pub async fn run(
    gateway: &dyn ClusterGateway,
    config: &Config,
    options: &ThroughputOptions,
) -> Result<ThroughputReport> {
    let nodes = ready_node_names(gateway, &options.node_prefix).await?;
    info!(nodes = nodes.len(), "Measuring throughput");

    match gateway.create_namespace(NAMESPACE, &Default::default()).await {
        Err(e) if !e.is_conflict() => return Err(e),
        _ => {}
    }
    cleanup(gateway).await?;

    let service = ServiceBuilder::new(SERVER_SERVICE, NAMESPACE).add_port(&server_port());
    service.deploy(gateway, true).await?;

    let mut measurement = Measurement {
        gateway,
        image: config.iperf_image.clone(),
        report: ThroughputReport::new(
            &nodes,
            SERVER_ARGS,
            CLIENT_ARGS,
            MEMORY_LIMIT,
        ),
        nodes,
        poll: config.poll_ticker(),
        pattern: bandwidth_pattern()?,
    };
    for node in measurement.nodes.clone() {
        measurement.run_server(&node).await?;
    }

    measurement.report.save(&options.output)?;
    best_effort("delete server service", service.un_deploy(gateway).await)?;
    Ok(measurement.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeCluster;

    const IPERF_LOG: &str = "------------------------------------------------------------
Client connecting to 10.244.0.5, TCP port 5001
[  3]  0.0- 1.0 sec   113 MBytes   113 MBytes/sec
[  3]  0.0-10.0 sec  1120 MBytes   112.4 MBytes/sec";

    fn options(name: &str) -> ThroughputOptions {
        ThroughputOptions {
            node_prefix: "10.0".to_string(),
            output: std::env::temp_dir().join(format!("{}-{}.html", name, std::process::id())),
        }
    }

    #[test]
    fn test_parse_bandwidth() {
        let pattern = bandwidth_pattern().unwrap();
        assert_eq!(
            parse_bandwidth(&pattern, "[  3]  0.0-10.0 sec  1120 MBytes   112.4 MBytes/sec"),
            Some("112.4".to_string())
        );
        assert_eq!(parse_bandwidth(&pattern, "connect failed: Connection refused"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measures_every_node_pair() {
        let cluster = FakeCluster::new()
            .with_nodes(&["10.0.0.1", "10.0.0.2"])
            .with_settled_phase("client-", PodStatus::Succeeded)
            .with_log("client-", IPERF_LOG);
        let options = options("throughput");

        let report = run(&cluster, &Config::default(), &options).await.unwrap();
        std::fs::remove_file(&options.output).ok();

        for client in ["10.0.0.1", "10.0.0.2"] {
            for server in ["10.0.0.1", "10.0.0.2"] {
                assert_eq!(report.cell(client, server), Some("112.4|112.4"));
            }
        }
        // two servers, eight single-attempt clients
        assert_eq!(cluster.calls("create_pod"), 10);
        assert!(cluster.pod_names(NAMESPACE).is_empty());
        assert!(cluster.service_names(NAMESPACE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_log_is_recorded_after_two_attempts() {
        let cluster = FakeCluster::new()
            .with_nodes(&["10.0.0.1"])
            .with_settled_phase("client-", PodStatus::Succeeded)
            .with_log("client-", "connect failed: Connection refused");
        let options = options("throughput-failed");

        let report = run(&cluster, &Config::default(), &options).await.unwrap();
        std::fs::remove_file(&options.output).ok();

        assert_eq!(
            report.cell("10.0.0.1", "10.0.0.1"),
            Some("connect failed: Connection refused|connect failed: Connection refused")
        );
        assert_eq!(cluster.calls("create_pod"), 1 + 2 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_that_never_finishes_halts_the_run() {
        let cluster = FakeCluster::new()
            .with_nodes(&["10.0.0.1"])
            .with_settled_phase("client-", PodStatus::Failed);
        let options = options("throughput-timeout");

        let err = run(&cluster, &Config::default(), &options).await.unwrap_err();

        assert!(matches!(err, Error::ConvergenceTimeout { .. }));
        // the client and the server were still removed
        assert!(cluster.pod_names(NAMESPACE).is_empty());
    }
}
