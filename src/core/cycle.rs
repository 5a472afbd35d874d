//! Cycle detection over the union of dependency and hierarchy edges.

use crate::core::graph::GraphIndex;
use crate::db::TaskRepository;
use crate::error::{Result, TgError};
use crate::id::TaskId;
use crate::types::EdgeKind;

/// An edge about to be added. `from` must finish after `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedEdge {
    pub kind: EdgeKind,
    pub from: TaskId,
    pub to: TaskId,
}

impl ProposedEdge {
    /// `task` depends on `depends_on`.
    pub fn dependency(task: &TaskId, depends_on: &TaskId) -> Self {
        Self {
            kind: EdgeKind::Dependency,
            from: task.clone(),
            to: depends_on.clone(),
        }
    }

    /// `parent` gains `child`.
    pub fn hierarchy(parent: &TaskId, child: &TaskId) -> Self {
        Self {
            kind: EdgeKind::Hierarchy,
            from: parent.clone(),
            to: child.clone(),
        }
    }

    pub fn into_error(self) -> TgError {
        TgError::DependencyCycle {
            kind: self.kind,
            from: self.from,
            to: self.to,
        }
    }
}

/// First edge of the batch that would close a cycle, if any.
///
/// Edges are overlaid one at a time, so later edges are checked against the
/// earlier ones as well as the stored graph. An edge u -> v is rejected when
/// u == v or u is already reachable from v. The overlay is left in `graph`.
pub fn find_cycle_edge<R: TaskRepository>(
    graph: &mut GraphIndex<'_, R>,
    edges: &[ProposedEdge],
) -> Result<Option<ProposedEdge>> {
    for edge in edges {
        if edge.from == edge.to || graph.reaches(&edge.to, &edge.from)? {
            return Ok(Some(edge.clone()));
        }
        graph.link(edge.kind, &edge.from, &edge.to)?;
    }
    Ok(None)
}

pub fn would_create_cycle<R: TaskRepository>(
    graph: &mut GraphIndex<'_, R>,
    edges: &[ProposedEdge],
) -> Result<bool> {
    Ok(find_cycle_edge(graph, edges)?.is_some())
}

/// Fails with `DependencyCycle` naming the offending edge.
pub fn ensure_acyclic<R: TaskRepository>(
    graph: &mut GraphIndex<'_, R>,
    edges: &[ProposedEdge],
) -> Result<()> {
    match find_cycle_edge(graph, edges)? {
        Some(edge) => {
            tracing::debug!(kind = %edge.kind, from = %edge.from, to = %edge.to, "rejected cyclic edge");
            Err(edge.into_error())
        }
        None => Ok(()),
    }
}
