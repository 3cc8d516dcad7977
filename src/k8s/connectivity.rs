//! Connectivity matrix verification
//!
//! A probe runs inside a source pod and prints a marker when it could open a
//! connection to the target address. Checks that expect a connection get one
//! retry; checks that expect isolation never do, so a policy hole cannot hide
//! behind a lucky second attempt. Violations are data and are collected for
//! the whole matrix.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::ClusterGateway;
use crate::error::{Error, Result};

/// Command run inside a source pod to test one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    command: String,
    port: u16,
    marker: String,
}

impl Probe {
    pub fn new(command: &str, port: u16, marker: &str) -> Self {
        Self {
            command: command.to_string(),
            port,
            marker: marker.to_string(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn argv(&self, address: &str) -> Vec<String> {
        vec![self.command.clone(), address.to_string(), self.port.to_string()]
    }

    fn passed(&self, output: &str) -> bool {
        output.contains(&self.marker)
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new("/opt/check2.sh", 8080, "CHECK_PASS")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Expectation {
    Reachable,
    Blocked,
}

/// One probe of the matrix: from a pod towards a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCheck {
    pub expectation: Expectation,
    pub source_namespace: String,
    pub source_pod: String,
    pub target_namespace: String,
    pub target_service: String,
}

/// Ordered list of checks to run
#[derive(Debug, Clone, Default)]
pub struct MatrixPlan {
    checks: Vec<PlannedCheck>,
}

impl MatrixPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(
        &mut self,
        expectation: Expectation,
        source: (&str, &str),
        target: (&str, &str),
    ) -> &mut Self {
        self.checks.push(PlannedCheck {
            expectation,
            source_namespace: source.0.to_string(),
            source_pod: source.1.to_string(),
            target_namespace: target.0.to_string(),
            target_service: target.1.to_string(),
        });
        self
    }

    pub fn checks(&self) -> &[PlannedCheck] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    /// A connection that should work did not, even after a retry
    ConnectionFailed,
    /// A connection that should be blocked went through
    UnexpectedConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub source_namespace: String,
    pub source_pod: String,
    pub target_namespace: String,
    pub target_service: String,
    pub port: u16,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ViolationKind::ConnectionFailed => "failed to connect",
            ViolationKind::UnexpectedConnection => "unexpected connection",
        };
        write!(
            f,
            "{} {}/{}:{} from {}/{}",
            what,
            self.target_namespace,
            self.target_service,
            self.port,
            self.source_namespace,
            self.source_pod
        )
    }
}

/// Runs probes through a gateway, caching service addresses
pub struct ConnectivityChecker<'a> {
    gateway: &'a dyn ClusterGateway,
    probe: Probe,
    service_ips: HashMap<(String, String), String>,
}

impl<'a> ConnectivityChecker<'a> {
    pub fn new(gateway: &'a dyn ClusterGateway, probe: Probe) -> Self {
        Self {
            gateway,
            probe,
            service_ips: HashMap::new(),
        }
    }

    async fn attempt(&self, namespace: &str, pod: &str, address: &str) -> Result<bool> {
        let output = self
            .gateway
            .exec_in_pod(namespace, pod, self.probe.argv(address))
            .await?;
        if self.probe.passed(&output) {
            Ok(true)
        } else {
            debug!(namespace, pod, address, output = %output.trim(), "Probe did not pass");
            Ok(false)
        }
    }

    /// True if `pod` reaches `address`; a failed attempt is retried once.
    pub async fn check_connected(&self, namespace: &str, pod: &str, address: &str) -> bool {
        for attempt in 1..=2 {
            match self.attempt(namespace, pod, address).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!(namespace, pod, address, attempt, error = %e, "Probe failed to run"),
            }
        }
        false
    }

    /// True if `pod` cannot reach `address`. Probed exactly once; a probe that
    /// fails to run does not prove isolation and counts as a failure.
    pub async fn check_unconnected(&self, namespace: &str, pod: &str, address: &str) -> bool {
        match self.attempt(namespace, pod, address).await {
            Ok(passed) => !passed,
            Err(e) => {
                warn!(namespace, pod, address, error = %e, "Isolation probe failed to run");
                false
            }
        }
    }

    async fn service_ip(&mut self, namespace: &str, name: &str) -> Result<String> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(ip) = self.service_ips.get(&key) {
            return Ok(ip.clone());
        }
        let ip = self
            .gateway
            .get_service_ip(namespace, name)
            .await?
            .ok_or_else(|| {
                Error::validation(format!("service {}/{} has no cluster IP", namespace, name))
            })?;
        self.service_ips.insert(key, ip.clone());
        Ok(ip)
    }

    /// Run every check of `plan` and return all violations found.
    ///
    /// Probe outcomes never abort the run; failing to resolve a service does.
    #[instrument(skip_all, fields(checks = plan.len()))]
    pub async fn check_all(&mut self, plan: &MatrixPlan) -> Result<Vec<Violation>> {
        let mut violations = Vec::new();

        for check in plan.checks() {
            let address = self
                .service_ip(&check.target_namespace, &check.target_service)
                .await?;
            let ok = match check.expectation {
                Expectation::Reachable => {
                    self.check_connected(&check.source_namespace, &check.source_pod, &address)
                        .await
                }
                Expectation::Blocked => {
                    self.check_unconnected(&check.source_namespace, &check.source_pod, &address)
                        .await
                }
            };
            if ok {
                continue;
            }

            let violation = Violation {
                kind: match check.expectation {
                    Expectation::Reachable => ViolationKind::ConnectionFailed,
                    Expectation::Blocked => ViolationKind::UnexpectedConnection,
                },
                source_namespace: check.source_namespace.clone(),
                source_pod: check.source_pod.clone(),
                target_namespace: check.target_namespace.clone(),
                target_service: check.target_service.clone(),
                port: self.probe.port(),
            };
            warn!(%violation, "Connectivity violation");
            violations.push(violation);
        }

        info!(
            checks = plan.len(),
            violations = violations.len(),
            "Connectivity matrix checked"
        );
        Ok(violations)
    }
}
