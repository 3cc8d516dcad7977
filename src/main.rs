use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kube_pressure::{
    config::Config,
    drivers::{
        cleanup, pod_create, policy_create,
        throughput::{self, ThroughputOptions},
        traffic::{self, TrafficOptions},
    },
    k8s::{K8sClient, ProfileRegistry, Violation},
};

mod cli;

use cli::{Args, Command};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Close a traffic test: summarize what was found and decide the exit status
fn conclude_traffic_test(violations: &[Violation], fail_on_violation: bool) -> Result<()> {
    if violations.is_empty() {
        tracing::info!("No issue found");
        return Ok(());
    }
    tracing::warn!(violations = violations.len(), "Issues found");
    if fail_on_violation {
        bail!("{} connectivity violations found", violations.len());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = Config::load(args.config.as_deref())?;
    tracing::info!("Configuration loaded");

    let mut registry = ProfileRegistry::default();
    for (name, candidates) in &config.profiles {
        let path = registry.register(name, candidates)?;
        tracing::debug!(profile = %name, path = %path.display(), "Registered profile");
    }
    let profile = args.profile.as_deref().unwrap_or(&config.default_profile);
    tracing::debug!(profiles = ?registry.names(), profile, "Selecting profile");
    let client = K8sClient::connect(registry, profile).await?;

    match args.command {
        Command::PodCreate {
            namespaces,
            node_prefix,
            limit_range,
        } => {
            let options = pod_create::PodCreateOptions {
                namespaces,
                node_prefix,
                limit_range,
            };
            let summary = pod_create::run(&client, &config, &options).await?;
            tracing::info!(
                nodes = summary.nodes.len(),
                pods = summary.pods,
                seconds = summary.elapsed.as_secs(),
                "Pods created"
            );
        }
        Command::PolicyCreate {
            namespaces,
            policies,
        } => {
            policy_create::run(&client, namespaces, policies).await?;
        }
        Command::TrafficTest {
            namespaces,
            policies,
            node_prefix,
            fail_on_violation,
        } => {
            let options = TrafficOptions {
                namespaces,
                policies,
                node_prefix,
            };
            let violations = traffic::run(&client, &config, &options).await?;
            conclude_traffic_test(&violations, fail_on_violation)?;
        }
        Command::Throughput {
            node_prefix,
            output,
        } => {
            let options = ThroughputOptions {
                node_prefix,
                output: output.unwrap_or_else(|| config.report_path.clone().into()),
            };
            throughput::run(&client, &config, &options).await?;
        }
        Command::Cleanup => {
            cleanup::run(&client).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_pressure::k8s::ViolationKind;

    fn violation() -> Violation {
        Violation {
            kind: ViolationKind::UnexpectedConnection,
            source_namespace: "namespace-2".to_string(),
            source_pod: "pod-10-0-0-1-2".to_string(),
            target_namespace: "namespace-0".to_string(),
            target_service: "svc-10-0-0-2-0".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn test_clean_run_succeeds() {
        assert!(conclude_traffic_test(&[], true).is_ok());
    }

    #[test]
    fn test_violations_fail_only_when_asked() {
        let found = vec![violation(), violation()];
        assert!(conclude_traffic_test(&found, false).is_ok());

        let err = conclude_traffic_test(&found, true).unwrap_err();
        assert_eq!(err.to_string(), "2 connectivity violations found");
    }
}
