//! Concurrent provisioning with fail-together semantics.
//!
//! A batch launches every job on its own scoped thread, then waits for all of
//! them. A failing job never cancels its siblings; once every job has
//! reported, the failures (if any) are folded into a single
//! [`ProvisionError::Aggregate`]. Outcomes are only inspected after the whole
//! batch has finished.

use std::any::Any;
use std::thread;

use log::{debug, info};

use crate::error::{JobFailure, ProvisionError, Result};

/// Non-error result of a provisioning job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job did its work.
    Completed,
    /// Nothing needed doing, e.g. the tool was already installed.
    AlreadySatisfied {
        /// Why the job was a no-op.
        detail: String,
    },
}

type Task<'scope> = Box<dyn FnOnce() -> Result<JobOutcome> + Send + 'scope>;

/// A named unit of concurrent work.
pub struct ProvisioningJob<'scope> {
    name: String,
    task: Task<'scope>,
}

impl<'scope> ProvisioningJob<'scope> {
    /// Wrap `task` under `name`.
    pub fn new(
        name: impl Into<String>,
        task: impl FnOnce() -> Result<JobOutcome> + Send + 'scope,
    ) -> Self {
        Self {
            name: name.into(),
            task: Box::new(task),
        }
    }

    /// The job's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ProvisioningJob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningJob")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Outcomes of a batch in which every job succeeded, in launch order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchReport {
    /// `(job name, outcome)` pairs.
    pub outcomes: Vec<(String, JobOutcome)>,
}

impl BatchReport {
    /// Outcome of the job called `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find(|(job, _)| job == name)
            .map(|(_, outcome)| outcome)
    }
}

/// Runs batches of independent provisioning jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvisioningCoordinator;

impl ProvisioningCoordinator {
    /// Run every job concurrently and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Aggregate`] listing every failed job when
    /// one or more jobs fail, panic, or cannot be started.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::coordinator::{JobOutcome, ProvisioningCoordinator, ProvisioningJob};
    ///
    /// let report = ProvisioningCoordinator.run_all(vec![
    ///     ProvisioningJob::new("a", || Ok(JobOutcome::Completed)),
    ///     ProvisioningJob::new("b", || Ok(JobOutcome::Completed)),
    /// ])?;
    /// assert_eq!(report.outcomes.len(), 2);
    /// # Ok::<(), gostrap_installer::error::ProvisionError>(())
    /// ```
    pub fn run_all(&self, jobs: Vec<ProvisioningJob<'_>>) -> Result<BatchReport> {
        info!(
            "starting {} provisioning job(s): {}",
            jobs.len(),
            jobs.iter()
                .map(ProvisioningJob::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let results: Vec<(String, Result<JobOutcome>)> = thread::scope(|scope| {
            let launched: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    let handle = thread::Builder::new()
                        .name(format!("gostrap-{}", job.name))
                        .spawn_scoped(scope, job.task);
                    (job.name, handle)
                })
                .collect();

            launched
                .into_iter()
                .map(|(name, handle)| {
                    let result = match handle {
                        Ok(handle) => handle.join().unwrap_or_else(|payload| {
                            Err(ProvisionError::JobPanicked {
                                job: name.clone(),
                                message: panic_message(payload.as_ref()),
                            })
                        }),
                        Err(source) => Err(ProvisionError::Io(source)),
                    };
                    (name, result)
                })
                .collect()
        });

        let mut outcomes = Vec::with_capacity(results.len());
        let mut causes = Vec::new();
        for (job, result) in results {
            match result {
                Ok(outcome) => {
                    debug!("job {job} finished: {outcome:?}");
                    outcomes.push((job, outcome));
                }
                Err(error) => causes.push(JobFailure { job, error }),
            }
        }

        if causes.is_empty() {
            Ok(BatchReport { outcomes })
        } else {
            Err(ProvisionError::Aggregate { causes })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
