//! Policy isolation check over the numbered namespaces
//!
//! With `policies = P`, pods in namespaces `0..P` must reach every service,
//! and pods in namespaces `P..N` must reach nothing outside their own namespace.

use tracing::{info, instrument};

use super::{namespace_name, node_mark, pod_name, service_name};
use crate::config::Config;
use crate::error::Result;
use crate::k8s::{ready_node_names, ClusterGateway, ConnectivityChecker, Expectation, MatrixPlan, Violation};

#[derive(Debug, Clone)]
pub struct TrafficOptions {
    pub namespaces: u32,
    pub policies: u32,
    pub node_prefix: String,
}

/// Every check implied by the namespace and policy counts, reachability first.
///
/// A pod never probes its own node's service in its own namespace, and the
/// blocked set skips the target's own namespace.
pub fn build_plan(marks: &[String], namespaces: u32, policies: u32) -> MatrixPlan {
    let allowed = policies.min(namespaces);
    let mut plan = MatrixPlan::new();

    for target in 0..namespaces {
        let target_ns = namespace_name(target);
        for source in 0..allowed {
            let source_ns = namespace_name(source);
            for (i, source_mark) in marks.iter().enumerate() {
                for (k, target_mark) in marks.iter().enumerate() {
                    if i == k && source == target {
                        continue;
                    }
                    plan.expect(
                        Expectation::Reachable,
                        (&source_ns, &pod_name(source_mark, source)),
                        (&target_ns, &service_name(target_mark, target)),
                    );
                }
            }
        }
    }

    for target in 0..namespaces {
        let target_ns = namespace_name(target);
        for source in allowed..namespaces {
            if source == target {
                continue;
            }
            let source_ns = namespace_name(source);
            for source_mark in marks {
                for target_mark in marks {
                    plan.expect(
                        Expectation::Blocked,
                        (&source_ns, &pod_name(source_mark, source)),
                        (&target_ns, &service_name(target_mark, target)),
                    );
                }
            }
        }
    }

    plan
}

#[instrument(skip(gateway, config))]
pub async fn run(
    gateway: &dyn ClusterGateway,
    config: &Config,
    options: &TrafficOptions,
) -> Result<Vec<Violation>> {
    let marks: Vec<String> = ready_node_names(gateway, &options.node_prefix)
        .await?
        .iter()
        .map(|node| node_mark(node))
        .collect();
    let plan = build_plan(&marks, options.namespaces, options.policies);
    info!(nodes = marks.len(), checks = plan.len(), "Checking connectivity");

    let mut checker = ConnectivityChecker::new(gateway, config.probe());
    checker.check_all(&plan).await
}
