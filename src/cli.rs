use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pressure tests for pod, service and network-policy scale.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Credential profile to run against
    #[arg(long, global = true, env = "KUBE_PRESSURE_PROFILE")]
    pub profile: Option<String>,

    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create numbered namespaces and fill them with probe pods on every node
    PodCreate {
        /// How many namespaces to create
        #[arg(long)]
        namespaces: u32,

        /// Prefix of the nodes to use, e.g. `ubuntu-client` for `ubuntu-client3`
        #[arg(long, default_value = "")]
        node_prefix: String,

        /// Install the default container limit range in each namespace
        #[arg(long)]
        limit_range: bool,
    },

    /// Create the ingress policies of every numbered namespace
    PolicyCreate {
        #[arg(long)]
        namespaces: u32,

        /// How many namespaces are admitted everywhere
        #[arg(long)]
        policies: u32,
    },

    /// Verify reachability and isolation between the numbered namespaces
    TrafficTest {
        #[arg(long)]
        namespaces: u32,

        #[arg(long)]
        policies: u32,

        #[arg(long, default_value = "")]
        node_prefix: String,

        /// Exit with an error when any violation is found
        #[arg(long)]
        fail_on_violation: bool,
    },

    /// Measure pod-to-pod throughput between every pair of nodes
    Throughput {
        #[arg(long, default_value = "")]
        node_prefix: String,

        /// Report file, defaults to the configured report path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete everything the other commands created
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_traffic_test() {
        let args = Args::parse_from([
            "kube-pressure",
            "traffic-test",
            "--namespaces",
            "10",
            "--policies",
            "3",
            "--node-prefix",
            "worker",
            "--profile",
            "staging",
        ]);
        assert_eq!(args.profile.as_deref(), Some("staging"));
        match args.command {
            Command::TrafficTest {
                namespaces,
                policies,
                node_prefix,
                fail_on_violation,
            } => {
                assert_eq!((namespaces, policies), (10, 3));
                assert_eq!(node_prefix, "worker");
                assert!(!fail_on_violation);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_pod_create_requires_namespaces() {
        assert!(Args::try_parse_from(["kube-pressure", "pod-create"]).is_err());
    }
}
