//! Convergence polling
//!
//! Wait for a pod to report an expected status by reading it once per tick
//! until it matches or the tick budget runs out. `NotFound` is a status like
//! any other here, so waiting for a deletion to finish uses the same loop.

use std::time::Duration;

use tracing::{debug, instrument};

use super::{ClusterGateway, PodStatus};
use crate::error::{Error, Result};

/// Fixed wall-clock interval between two polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    interval: Duration,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn tick(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Poll `namespace/name` until it reports `expected`.
///
/// Always sleeps one tick before the first read. Returns the ticks left in the
/// budget. When `expected` is [`PodStatus::NotFound`] a 404 counts as success;
/// any other read failure propagates at once. Running out of ticks yields
/// [`Error::ConvergenceTimeout`] with the last status seen.
#[instrument(skip(gateway, ticker))]
pub async fn wait_for_pod_state(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    name: &str,
    timeout_ticks: u32,
    expected: PodStatus,
    ticker: &Ticker,
) -> Result<u32> {
    ticker.tick().await;

    let mut remaining = timeout_ticks;
    let mut last_observed = None;
    while remaining > 0 {
        match gateway.get_pod(namespace, name).await {
            Ok(info) => {
                last_observed = Some(info.status);
                if info.status == expected {
                    debug!(remaining, "Pod reached expected status");
                    return Ok(remaining);
                }
            }
            Err(e) if expected == PodStatus::NotFound && e.is_not_found() => {
                debug!(remaining, "Pod is gone");
                return Ok(remaining);
            }
            Err(e) => return Err(e),
        }
        ticker.tick().await;
        remaining -= 1;
    }

    Err(Error::ConvergenceTimeout {
        kind: "pod",
        namespace: namespace.to_string(),
        name: name.to_string(),
        expected,
        last_observed,
    })
}

/// Single non-blocking status read; any failure reads as "not running".
pub async fn is_pod_running(gateway: &dyn ClusterGateway, namespace: &str, name: &str) -> bool {
    match gateway.get_pod(namespace, name).await {
        Ok(info) => info.status == PodStatus::Running,
        Err(e) => {
            debug!(namespace, pod = name, error = %e, "Pod status unavailable");
            false
        }
    }
}

/// Delete a pod and wait until it is gone. A pod that is already absent is
/// treated as removed.
#[instrument(skip(gateway, ticker))]
pub async fn remove_pod(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    name: &str,
    timeout_ticks: u32,
    ticker: &Ticker,
) -> Result<()> {
    match gateway.delete_pod(namespace, name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    }
    wait_for_pod_state(gateway, namespace, name, timeout_ticks, PodStatus::NotFound, ticker).await?;
    Ok(())
}
