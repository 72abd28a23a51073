// src/dag/resolver.rs

//! Dependency resolution: which jobs may run now, and which can never run.

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::JobDeclaration;
use crate::dag::execution::JobExecution;
use crate::dag::fan_out::generated_ids;
use crate::errors::{Result, TunedagError};
use crate::types::{JobId, JobStatus};

/// Reject declaration sets that contain a dependency cycle.
///
/// Edge direction is `dependency -> job`; a fan-in contributes an edge from
/// its source fan-out.
pub fn check_acyclic<'a>(decls: impl IntoIterator<Item = &'a JobDeclaration>) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for decl in decls {
        graph.add_node(decl.id.as_str());
        for dep in decl.all_dependencies() {
            graph.add_edge(dep, decl.id.as_str(), ());
        }
    }

    // A topological sort (DFS based) fails if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TunedagError::DagCycle(format!(
            "cycle detected in job graph involving job '{}'",
            cycle.node_id()
        ))),
    }
}

/// Jobs that are `pending` and whose every dependency is `completed`, in
/// declaration order.
///
/// A fan-in additionally waits for its source fan-out to be `completed` and
/// for every job listed in the fan-out's output to be terminal. Jobs without
/// an execution record are ignored.
pub fn ready_jobs(
    declarations: &IndexMap<JobId, JobDeclaration>,
    executions: &IndexMap<JobId, JobExecution>,
) -> Vec<JobId> {
    declarations
        .values()
        .filter(|decl| {
            executions
                .get(&decl.id)
                .is_some_and(|exec| exec.status == JobStatus::Pending)
        })
        .filter(|decl| deps_completed(decl, executions))
        .filter(|decl| !decl.is_fan_in() || fan_in_children_terminal(decl, executions))
        .map(|decl| decl.id.clone())
        .collect()
}

fn deps_completed(decl: &JobDeclaration, executions: &IndexMap<JobId, JobExecution>) -> bool {
    decl.all_dependencies().into_iter().all(|dep| {
        executions
            .get(dep)
            .is_some_and(|exec| exec.status == JobStatus::Completed)
    })
}

fn fan_in_children_terminal(
    decl: &JobDeclaration,
    executions: &IndexMap<JobId, JobExecution>,
) -> bool {
    let Some(spec) = &decl.fan_in else {
        return true;
    };
    let Some(children) = executions
        .get(&spec.source)
        .and_then(|exec| exec.output.as_ref())
        .and_then(generated_ids)
    else {
        return false;
    };

    children.iter().all(|child| {
        executions
            .get(child)
            .is_some_and(JobExecution::is_terminal)
    })
}

/// First dependency of `decl` that has permanently failed, if any.
pub fn failed_dependency<'a>(
    decl: &'a JobDeclaration,
    executions: &IndexMap<JobId, JobExecution>,
) -> Option<&'a str> {
    decl.all_dependencies().into_iter().find(|dep| {
        executions
            .get(*dep)
            .is_some_and(|exec| exec.status == JobStatus::Failed)
    })
}
