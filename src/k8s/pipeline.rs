//! Bulk deployment state machine
//!
//! Many independent pipelines each create one pod at a time and wait for it
//! to run before moving to the next slot. A single loop visits every pipeline
//! once per pass, in index order, so the cluster works on all of them at once
//! while this process only ever issues one request at a time.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{is_pod_running, ClusterGateway, Ticker};
use crate::error::{Error, Result};

/// Pod whose readiness completes a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub namespace: String,
    pub pod: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelinePhase {
    /// No creation request is outstanding for the current slot
    AwaitingCreate,
    /// The current slot was submitted and is polled for `Running`
    Deploying(Slot),
    Done,
}

/// Submits the resources behind one slot of a pipeline
#[async_trait]
pub trait SlotFactory: Send + Sync {
    async fn create_slot(
        &self,
        gateway: &dyn ClusterGateway,
        pipeline: &str,
        slot: u32,
    ) -> Result<Slot>;
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    target: u32,
    completed: u32,
    phase: PipelinePhase,
    finished_after: Option<Duration>,
}

impl Pipeline {
    pub fn new(name: &str, target: u32) -> Self {
        let phase = if target == 0 {
            PipelinePhase::Done
        } else {
            PipelinePhase::AwaitingCreate
        };
        Self {
            name: name.to_string(),
            target,
            completed: 0,
            phase,
            finished_after: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn phase(&self) -> &PipelinePhase {
        &self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == PipelinePhase::Done
    }

    /// Time from the start of the run until the last slot was running
    pub fn finished_after(&self) -> Option<Duration> {
        self.finished_after
    }

    /// Advance by at most one step. A creation request that fails with a
    /// recoverable error leaves the slot awaiting creation for the next pass.
    async fn step(
        &mut self,
        gateway: &dyn ClusterGateway,
        factory: &dyn SlotFactory,
        started: Instant,
    ) -> Result<()> {
        match &self.phase {
            PipelinePhase::Done => Ok(()),
            PipelinePhase::AwaitingCreate => {
                match factory.create_slot(gateway, &self.name, self.completed).await {
                    Ok(slot) => {
                        debug!(pipeline = %self.name, namespace = %slot.namespace, pod = %slot.pod, "Submitted slot");
                        self.phase = PipelinePhase::Deploying(slot);
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(pipeline = %self.name, slot = self.completed, error = %e, "Slot creation failed, retrying");
                    }
                    Err(e) => return Err(e),
                }
                Ok(())
            }
            PipelinePhase::Deploying(slot) => {
                if !is_pod_running(gateway, &slot.namespace, &slot.pod).await {
                    return Ok(());
                }
                self.completed += 1;
                if self.completed >= self.target {
                    let elapsed = started.elapsed();
                    info!(
                        pipeline = %self.name,
                        pods = self.completed,
                        seconds = elapsed.as_secs(),
                        "Pipeline finished"
                    );
                    self.finished_after = Some(elapsed);
                    self.phase = PipelinePhase::Done;
                } else {
                    self.phase = PipelinePhase::AwaitingCreate;
                }
                Ok(())
            }
        }
    }
}

/// Round-robin driver for a set of pipelines
#[derive(Debug, Clone)]
pub struct BulkDeployer {
    pass: Ticker,
    deadline: Option<Duration>,
}

impl BulkDeployer {
    pub fn new(pass: Ticker) -> Self {
        Self {
            pass,
            deadline: None,
        }
    }

    /// Give up once a run has taken longer than `deadline`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Drive every pipeline to its target, sleeping one pass interval between
    /// full passes. Returns the total time taken.
    #[instrument(skip_all, fields(pipelines = pipelines.len()))]
    pub async fn run(
        &self,
        gateway: &dyn ClusterGateway,
        factory: &dyn SlotFactory,
        pipelines: &mut [Pipeline],
    ) -> Result<Duration> {
        let started = Instant::now();
        let mut passes = 0u64;

        loop {
            for pipeline in pipelines.iter_mut() {
                pipeline.step(gateway, factory, started).await?;
            }
            passes += 1;

            if pipelines.iter().all(Pipeline::is_done) {
                break;
            }
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    return Err(Error::DeadlineExceeded {
                        pending: pipelines
                            .iter()
                            .filter(|p| !p.is_done())
                            .map(|p| p.name.clone())
                            .collect(),
                    });
                }
            }
            self.pass.tick().await;
        }

        let elapsed = started.elapsed();
        info!(passes, seconds = elapsed.as_secs(), "Bulk deployment finished");
        Ok(elapsed)
    }
}
