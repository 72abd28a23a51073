// src/dag/graph.rs

use indexmap::IndexMap;

use crate::config::model::JobDeclaration;
use crate::types::JobId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies, including a fan-in's source fan-out.
    deps: Vec<JobId>,
    /// Direct dependents: jobs that depend on this one.
    dependents: Vec<JobId>,
}

/// In-memory adjacency for the live job graph.
///
/// Unlike the declarations it is built from, the graph grows during a run:
/// the coordinator appends generated jobs when a fan-out expands. Acyclicity
/// is checked up front in `resolver::check_acyclic`; generated jobs only point
/// at existing nodes, so appending cannot create a cycle.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: IndexMap<JobId, DagNode>,
}

impl DagGraph {
    /// Build a graph from validated declarations.
    pub fn from_declarations<'a>(decls: impl IntoIterator<Item = &'a JobDeclaration>) -> Self {
        let mut graph = DagGraph::default();
        for decl in decls {
            graph.add_job(decl);
        }
        graph
    }

    /// Append a job (declared or generated) to the graph.
    ///
    /// Dependencies that are not yet nodes are recorded on the new job and
    /// linked back when they are added.
    pub fn add_job(&mut self, decl: &JobDeclaration) {
        let deps: Vec<JobId> = decl
            .all_dependencies()
            .into_iter()
            .map(str::to_string)
            .collect();

        for dep in &deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                if !dep_node.dependents.contains(&decl.id) {
                    dep_node.dependents.push(decl.id.clone());
                }
            }
        }

        // Earlier nodes that already named this job as a dependency.
        let dependents: Vec<JobId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.deps.contains(&decl.id))
            .map(|(name, _)| name.clone())
            .collect();

        let node = self.nodes.entry(decl.id.clone()).or_default();
        node.deps = deps;
        for dependent in dependents {
            if !node.dependents.contains(&dependent) {
                node.dependents.push(dependent);
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Return all job ids in insertion order.
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
