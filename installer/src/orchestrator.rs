//! Drives one invocation: plan the requested step, then run each planned
//! step in order until the first failure.

use gostrap::BuildStep;
use log::info;

use crate::error::Result;
use crate::graph::{ExecutionPlan, TaskGraph};

/// What happened when a step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The step did its work.
    Ran,
    /// Nothing needed doing.
    Skipped {
        /// Why the step was a no-op.
        reason: String,
    },
}

/// Executes the action behind a single step.
#[cfg_attr(test, mockall::automock)]
pub trait StepRunner {
    /// Run `step` as part of `plan`.
    ///
    /// # Errors
    ///
    /// Returns the step's failure.
    fn run_step(&self, step: BuildStep, plan: &ExecutionPlan) -> Result<StepStatus>;
}

/// Per-step results of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// The plan that was executed.
    pub plan: ExecutionPlan,
    /// Status of every step, in execution order.
    pub statuses: Vec<(BuildStep, StepStatus)>,
}

impl RunSummary {
    /// Steps that did work.
    pub fn ran(&self) -> impl Iterator<Item = BuildStep> + '_ {
        self.statuses
            .iter()
            .filter(|(_, status)| *status == StepStatus::Ran)
            .map(|(step, _)| *step)
    }
}

/// Top-level driver over a validated [`TaskGraph`].
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    graph: TaskGraph,
}

impl BuildOrchestrator {
    /// Validate the step graph and build an orchestrator over it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProvisionError::InvalidGraph`] if the static
    /// prerequisite table is cyclic.
    pub fn new() -> Result<Self> {
        Ok(Self::with_graph(TaskGraph::new()?))
    }

    /// Orchestrate over an already validated graph.
    #[must_use]
    pub const fn with_graph(graph: TaskGraph) -> Self {
        Self { graph }
    }

    /// The steps `target` needs, without running any of them.
    #[must_use]
    pub fn plan(&self, target: BuildStep) -> ExecutionPlan {
        self.graph.plan(target)
    }

    /// Run `target` and its prerequisites through `runner`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error wrapped in
    /// [`crate::error::ProvisionError::Step`]; later steps are not run.
    pub fn run(&self, target: BuildStep, runner: &dyn StepRunner) -> Result<RunSummary> {
        let plan = self.plan(target);
        info!(
            "running {target}: {}",
            plan.iter().map(|step| step.name()).collect::<Vec<_>>().join(" -> ")
        );

        let mut statuses = Vec::with_capacity(plan.steps().len());
        for step in plan.iter() {
            let status = runner
                .run_step(step, &plan)
                .map_err(|err| err.in_step(step))?;
            match &status {
                StepStatus::Ran => info!("{step}: done"),
                StepStatus::Skipped { reason } => info!("{step}: skipped ({reason})"),
            }
            statuses.push((step, status));
        }
        Ok(RunSummary { plan, statuses })
    }
}
