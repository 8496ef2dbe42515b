//! Background execution of processing jobs.
//!
//! The [`ProcessingQueue`] accepts jobs for plans the tracker has started and
//! runs them on the capability matching the plan's execution site. A
//! dispatcher task drains the channel and runs up to `workers` jobs at once.
//! Every outcome goes back through [`ProcessingTracker::report_outcome`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use mediagate_common::{ExecutionSite, ProcessingPath};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::capability::{
    CapabilityError, JobDescription, ProcessingCapability, ProcessingOutcome, Submission,
};
use super::tracker::ProcessingTracker;

/// Channel capacity for the job queue.
const QUEUE_CAPACITY: usize = 256;

/// Capabilities jobs can be routed to.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub local: Option<Arc<dyn ProcessingCapability>>,
    pub remote: Option<Arc<dyn ProcessingCapability>>,
}

impl Capabilities {
    fn for_site(&self, site: ExecutionSite) -> Option<&Arc<dyn ProcessingCapability>> {
        match site {
            ExecutionSite::Local => self.local.as_ref(),
            ExecutionSite::Remote => self.remote.as_ref(),
        }
    }
}

/// Handle to the background processing queue.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: mpsc::Sender<JobDescription>,
}

struct Worker {
    tracker: Arc<ProcessingTracker>,
    capabilities: Capabilities,
    local_timeout: Duration,
}

impl ProcessingQueue {
    /// Create the queue and spawn its dispatcher.
    ///
    /// The dispatcher runs until every queue handle is dropped.
    pub fn new(
        tracker: Arc<ProcessingTracker>,
        capabilities: Capabilities,
        workers: usize,
        local_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let worker = Arc::new(Worker {
            tracker,
            capabilities,
            local_timeout,
        });

        tokio::spawn(dispatch(receiver, worker, workers.max(1)));

        Self { sender }
    }

    /// Queue a job for execution.
    pub async fn submit(&self, job: JobDescription) -> Result<()> {
        info!(
            item_id = %job.item_id,
            plan_id = %job.plan_id,
            route = %job.route,
            site = %job.execution_site,
            "Submitting processing job"
        );

        self.sender
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("Processing queue is closed"))?;

        Ok(())
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<JobDescription>,
    worker: Arc<Worker>,
    workers: usize,
) {
    info!(workers, "Processing queue started");
    let permits = Arc::new(Semaphore::new(workers));

    while let Some(job) = receiver.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let worker = worker.clone();

        tokio::spawn(async move {
            worker.run(job).await;
            drop(permit);
        });
    }

    info!("Processing queue stopped (channel closed)");
}

impl Worker {
    async fn run(&self, job: JobDescription) {
        let outcome = match self.capabilities.for_site(job.execution_site) {
            None => Some(ProcessingOutcome::failure(format!(
                "EnvironmentUnsupported: no {} processing capability",
                job.execution_site
            ))),
            Some(capability) => match job.execution_site {
                ExecutionSite::Local => Some(self.run_local(capability.as_ref(), &job).await),
                ExecutionSite::Remote => self.run_remote(capability.as_ref(), &job).await,
            },
        };

        if let Some(outcome) = outcome {
            self.report(&job, outcome);
        }
    }

    /// Local jobs finish synchronously, bounded by the job timeout.
    ///
    /// A local WebP transcode that fails for a reason other than the input
    /// format is retried once on the JPEG fallback route.
    async fn run_local(
        &self,
        capability: &dyn ProcessingCapability,
        job: &JobDescription,
    ) -> ProcessingOutcome {
        match self.attempt(capability, job).await {
            Err(e) if job.route == ProcessingPath::WebpLocal && !e.is_format_error() => {
                warn!(item_id = %job.item_id, error = %e, "WebP transcode failed; retrying as JPEG");
                match self.attempt(capability, &job.as_jpeg_fallback()).await {
                    Ok(outcome) => outcome,
                    Err(e) => ProcessingOutcome::failure(e.to_string()),
                }
            }
            Err(e) => ProcessingOutcome::failure(e.to_string()),
            Ok(outcome) => outcome,
        }
    }

    async fn attempt(
        &self,
        capability: &dyn ProcessingCapability,
        job: &JobDescription,
    ) -> Result<ProcessingOutcome, CapabilityError> {
        match timeout(self.local_timeout, capability.submit(job)).await {
            Err(_) => Ok(ProcessingOutcome::timeout()),
            Ok(Ok(Submission::Completed(outcome))) => Ok(outcome),
            Ok(Ok(Submission::Accepted)) => Err(CapabilityError::Failed(format!(
                "{} capability did not return a result",
                capability.name()
            ))),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Remote jobs report later through the callback; only a failed hand-off
    /// produces an outcome here.
    async fn run_remote(
        &self,
        capability: &dyn ProcessingCapability,
        job: &JobDescription,
    ) -> Option<ProcessingOutcome> {
        match capability.submit(job).await {
            Ok(Submission::Accepted) => None,
            Ok(Submission::Completed(outcome)) => Some(outcome),
            Err(e) => Some(ProcessingOutcome::failure(format!(
                "RemoteProcessingFailed: {}",
                e
            ))),
        }
    }

    fn report(&self, job: &JobDescription, outcome: ProcessingOutcome) {
        if let Err(e) = self.tracker.report_outcome(job.item_id, job.plan_id, outcome) {
            error!(item_id = %job.item_id, error = %e, "Failed to record processing outcome");
        }
    }
}

/// Spawn the task that fails remote jobs past their deadline.
pub fn spawn_deadline_sweeper(tracker: Arc<ProcessingTracker>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = tracker.expire_overdue(Utc::now()) {
                warn!(error = %e, "Deadline sweep failed");
            }
        }
    })
}
