use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::k8s::{Probe, Ticker, DEFAULT_PROFILE};

/// File read when no `--config` is given; absent is fine
pub const DEFAULT_CONFIG_FILE: &str = "kube-pressure.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tick of the convergence poller
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep between two passes of the bulk deployment loop
    #[serde(default = "default_pass_interval_ms")]
    pub pass_interval_ms: u64,

    /// Wall-clock ceiling of a bulk deployment, 0 for none
    #[serde(default = "default_bulk_deadline_secs")]
    pub bulk_deadline_secs: u64,

    #[serde(default = "default_probe_image")]
    pub probe_image: String,

    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    #[serde(default = "default_success_marker")]
    pub success_marker: String,

    #[serde(default = "default_iperf_image")]
    pub iperf_image: String,

    #[serde(default = "default_report_path")]
    pub report_path: String,

    #[serde(default = "default_profile")]
    pub default_profile: String,

    /// Profile name to candidate kubeconfig paths
    #[serde(default)]
    pub profiles: HashMap<String, Vec<String>>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_pass_interval_ms() -> u64 {
    3000
}

fn default_bulk_deadline_secs() -> u64 {
    1800
}

fn default_probe_image() -> String {
    "xujieasd/alphine-restcheck:0.5".to_string()
}

fn default_probe_command() -> String {
    "/opt/check2.sh".to_string()
}

fn default_probe_port() -> u16 {
    8080
}

fn default_success_marker() -> String {
    "CHECK_PASS".to_string()
}

fn default_iperf_image() -> String {
    "127.0.0.1:30100/library/alpine-iperf:0.1".to_string()
}

fn default_report_path() -> String {
    "report.html".to_string()
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Config {
    /// Layer defaults, the TOML file and `KUBE_PRESSURE_*` variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("KUBE_PRESSURE"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn poll_ticker(&self) -> Ticker {
        Ticker::from_millis(self.poll_interval_ms)
    }

    pub fn pass_ticker(&self) -> Ticker {
        Ticker::from_millis(self.pass_interval_ms)
    }

    pub fn bulk_deadline(&self) -> Option<Duration> {
        match self.bulk_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn probe(&self) -> Probe {
        Probe::new(&self.probe_command, self.probe_port, &self.success_marker)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            pass_interval_ms: default_pass_interval_ms(),
            bulk_deadline_secs: default_bulk_deadline_secs(),
            probe_image: default_probe_image(),
            probe_command: default_probe_command(),
            probe_port: default_probe_port(),
            success_marker: default_success_marker(),
            iperf_image: default_iperf_image(),
            report_path: default_report_path(),
            default_profile: default_profile(),
            profiles: HashMap::new(),
        }
    }
}
