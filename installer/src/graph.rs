//! The fixed step graph: prerequisites, ordering, and dependency sets.
//!
//! Prerequisites are a static table. The table is still validated once when
//! a [`TaskGraph`] is built so that a future edit introducing a cycle fails
//! at startup with [`ProvisionError::InvalidGraph`] instead of hanging.

use std::collections::{BTreeMap, BTreeSet};

use gostrap::BuildStep;

use crate::error::{ProvisionError, Result};

/// Steps that must run before `step`.
#[must_use]
pub const fn prerequisites(step: BuildStep) -> &'static [BuildStep] {
    match step {
        BuildStep::Env | BuildStep::Clean => &[],
        BuildStep::Dep => &[BuildStep::Env],
        BuildStep::Grpc | BuildStep::Swag => &[BuildStep::Dep],
        BuildStep::Test => &[BuildStep::Dep, BuildStep::Grpc],
        BuildStep::Build => &[BuildStep::Dep, BuildStep::Grpc, BuildStep::Test],
    }
}

/// A validated, acyclic prerequisite graph over [`BuildStep`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    edges: BTreeMap<BuildStep, Vec<BuildStep>>,
    order: Vec<BuildStep>,
}

impl TaskGraph {
    /// Build the graph from the static [`prerequisites`] table.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidGraph`] if the table has a cycle.
    pub fn new() -> Result<Self> {
        Self::from_edges(
            BuildStep::ALL
                .iter()
                .map(|step| (*step, prerequisites(*step).to_vec())),
        )
    }

    /// Build a graph from explicit `(step, prerequisites)` edges.
    ///
    /// Steps absent from `edges` have no prerequisites.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidGraph`] if the edges form a cycle.
    pub fn from_edges(edges: impl IntoIterator<Item = (BuildStep, Vec<BuildStep>)>) -> Result<Self> {
        let mut table: BTreeMap<BuildStep, Vec<BuildStep>> =
            BuildStep::ALL.iter().map(|step| (*step, Vec::new())).collect();
        for (step, requires) in edges {
            table.insert(step, requires);
        }
        let order = topological_sort(&table)?;
        Ok(Self {
            edges: table,
            order,
        })
    }

    /// Every step in an order that respects all prerequisite edges.
    #[must_use]
    pub fn topological_order(&self) -> &[BuildStep] {
        &self.order
    }

    /// The steps needed to run `target`, in execution order.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap::BuildStep;
    /// use gostrap_installer::graph::TaskGraph;
    ///
    /// let graph = TaskGraph::new()?;
    /// let plan = graph.plan(BuildStep::Test);
    /// assert_eq!(
    ///     plan.steps(),
    ///     [BuildStep::Env, BuildStep::Dep, BuildStep::Grpc, BuildStep::Test]
    /// );
    /// # Ok::<(), gostrap_installer::error::ProvisionError>(())
    /// ```
    #[must_use]
    pub fn plan(&self, target: BuildStep) -> ExecutionPlan {
        let mut needed = BTreeSet::new();
        let mut pending = vec![target];
        while let Some(step) = pending.pop() {
            if needed.insert(step) {
                if let Some(requires) = self.edges.get(&step) {
                    pending.extend(requires.iter().copied());
                }
            }
        }
        let steps = self
            .topological_order()
            .iter()
            .copied()
            .filter(|step| needed.contains(step))
            .collect();
        ExecutionPlan { target, steps }
    }
}

/// Kahn's algorithm, always taking the first ready step in declaration order
/// so the result is deterministic.
fn topological_sort(edges: &BTreeMap<BuildStep, Vec<BuildStep>>) -> Result<Vec<BuildStep>> {
    let mut placed: Vec<BuildStep> = Vec::with_capacity(edges.len());
    let mut remaining: Vec<BuildStep> = BuildStep::ALL.to_vec();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|step| {
            edges
                .get(step)
                .is_none_or(|requires| requires.iter().all(|req| placed.contains(req)))
        });
        let Some(index) = ready else {
            let stuck: Vec<_> = remaining.iter().map(ToString::to_string).collect();
            return Err(ProvisionError::InvalidGraph {
                reason: format!("cycle among steps {}", stuck.join(", ")),
            });
        };
        placed.push(remaining.remove(index));
    }
    Ok(placed)
}

/// The ordered steps a single invocation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    target: BuildStep,
    steps: Vec<BuildStep>,
}

impl ExecutionPlan {
    /// The step the user asked for.
    #[must_use]
    pub const fn target(&self) -> BuildStep {
        self.target
    }

    /// Steps in execution order, ending with the target.
    #[must_use]
    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    /// Whether `step` is scheduled in this plan.
    #[must_use]
    pub fn contains(&self, step: BuildStep) -> bool {
        self.steps.contains(&step)
    }

    /// Iterate over the scheduled steps.
    pub fn iter(&self) -> impl Iterator<Item = BuildStep> + '_ {
        self.steps.iter().copied()
    }
}

/// Ordered, duplicate-free list of module paths to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    modules: Vec<String>,
}

impl DependencySet {
    /// `base` followed by `extra`, keeping the first occurrence of each path.
    #[must_use]
    pub fn merge(base: &[String], extra: &[String]) -> Self {
        let mut modules: Vec<String> = Vec::with_capacity(base.len() + extra.len());
        for module in base.iter().chain(extra) {
            if !modules.contains(module) {
                modules.push(module.clone());
            }
        }
        Self { modules }
    }

    /// Module paths in resolution order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.modules
    }

    /// Iterate over module paths.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }

    /// Number of module paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether there is nothing to resolve.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Dependencies to resolve when `current` is the step being scheduled.
///
/// Test-only modules are included only when `current` is [`BuildStep::Test`].
///
/// # Examples
///
/// ```
/// use gostrap::BuildStep;
/// use gostrap_installer::graph::dependencies_for;
///
/// let base = vec!["a".to_owned(), "b".to_owned()];
/// let test_only = vec!["c".to_owned()];
/// assert_eq!(dependencies_for(BuildStep::Test, &base, &test_only).as_slice(), ["a", "b", "c"]);
/// assert_eq!(dependencies_for(BuildStep::Build, &base, &test_only).as_slice(), ["a", "b"]);
/// ```
#[must_use]
pub fn dependencies_for(current: BuildStep, base: &[String], test_only: &[String]) -> DependencySet {
    if current == BuildStep::Test {
        DependencySet::merge(base, test_only)
    } else {
        DependencySet::merge(base, &[])
    }
}

/// Dependencies to resolve for a whole invocation.
///
/// Test-only modules are included whenever the plan schedules
/// [`BuildStep::Test`], which also covers targets that require it.
#[must_use]
pub fn dependencies_for_plan(
    plan: &ExecutionPlan,
    base: &[String],
    test_only: &[String],
) -> DependencySet {
    if plan.contains(BuildStep::Test) {
        DependencySet::merge(base, test_only)
    } else {
        DependencySet::merge(base, &[])
    }
}
