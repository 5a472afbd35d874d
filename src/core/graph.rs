//! Per-operation adjacency index over the dependency + hierarchy graph.
//!
//! Nodes live in an arena addressed by `NodeIx`; adjacency is fetched from
//! the repository the first time a node is visited and memoized until the
//! index is dropped. Staged tasks and proposed edges can be overlaid without
//! touching storage, which is how a batch is validated before any write.

use std::collections::{HashMap, HashSet};

use crate::db::TaskRepository;
use crate::error::{Result, TgError};
use crate::id::TaskId;
use crate::types::{EdgeKind, Task};

pub type NodeIx = usize;

#[derive(Debug)]
struct Node {
    id: TaskId,
    task: Option<Task>,
    children: Option<Vec<NodeIx>>,
    blockers: Option<Vec<NodeIx>>,
    dependents: Option<Vec<NodeIx>>,
}

impl Node {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            task: None,
            children: None,
            blockers: None,
            dependents: None,
        }
    }
}

pub struct GraphIndex<'r, R: TaskRepository> {
    repo: &'r R,
    nodes: Vec<Node>,
    index: HashMap<TaskId, NodeIx>,
}

impl<'r, R: TaskRepository> GraphIndex<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self {
            repo,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn repo(&self) -> &'r R {
        self.repo
    }

    fn ix(&mut self, id: &TaskId) -> NodeIx {
        if let Some(&ix) = self.index.get(id) {
            return ix;
        }
        let ix = self.nodes.len();
        self.nodes.push(Node::new(id.clone()));
        self.index.insert(id.clone(), ix);
        ix
    }

    fn ids(&self, ixs: &[NodeIx]) -> Vec<TaskId> {
        ixs.iter().map(|&ix| self.nodes[ix].id.clone()).collect()
    }

    /// Task record, memoized. Fails with `TaskNotFound` for unknown ids.
    pub fn task(&mut self, id: &TaskId) -> Result<Task> {
        self.find(id)?
            .ok_or_else(|| TgError::TaskNotFound(id.clone()))
    }

    pub fn find(&mut self, id: &TaskId) -> Result<Option<Task>> {
        let ix = self.ix(id);
        if self.nodes[ix].task.is_none() {
            self.nodes[ix].task = self.repo.get_by_id(id)?;
        }
        Ok(self.nodes[ix].task.clone())
    }

    /// Replace the memoized record, e.g. after a save bumped its version.
    pub fn put(&mut self, task: Task) {
        let ix = self.ix(&task.id);
        self.nodes[ix].task = Some(task);
    }

    /// Save through the repository and keep the memo in step.
    pub fn save(&mut self, task: &Task) -> Result<Task> {
        let saved = self.repo.save(task)?;
        self.put(saved.clone());
        Ok(saved)
    }

    /// Register a task that exists only in this operation so far.
    pub fn stage(&mut self, task: Task) {
        let ix = self.ix(&task.id);
        let node = &mut self.nodes[ix];
        node.task = Some(task);
        node.children = Some(Vec::new());
        node.blockers = Some(Vec::new());
        node.dependents = Some(Vec::new());
    }

    fn load_children(&mut self, ix: NodeIx) -> Result<Vec<NodeIx>> {
        if let Some(children) = &self.nodes[ix].children {
            return Ok(children.clone());
        }
        let id = self.nodes[ix].id.clone();
        let mut children = Vec::new();
        for child in self.repo.get_children(&id)? {
            let cix = self.ix(&child.id);
            if self.nodes[cix].task.is_none() {
                self.nodes[cix].task = Some(child);
            }
            children.push(cix);
        }
        self.nodes[ix].children = Some(children.clone());
        Ok(children)
    }

    fn load_blockers(&mut self, ix: NodeIx) -> Result<Vec<NodeIx>> {
        if let Some(blockers) = &self.nodes[ix].blockers {
            return Ok(blockers.clone());
        }
        let id = self.nodes[ix].id.clone();
        let blockers: Vec<NodeIx> = self
            .repo
            .get_blockers(&id)?
            .iter()
            .map(|b| self.ix(b))
            .collect();
        self.nodes[ix].blockers = Some(blockers.clone());
        Ok(blockers)
    }

    fn load_dependents(&mut self, ix: NodeIx) -> Result<Vec<NodeIx>> {
        if let Some(dependents) = &self.nodes[ix].dependents {
            return Ok(dependents.clone());
        }
        let id = self.nodes[ix].id.clone();
        let dependents: Vec<NodeIx> = self
            .repo
            .get_dependents(&id)?
            .iter()
            .map(|d| self.ix(d))
            .collect();
        self.nodes[ix].dependents = Some(dependents.clone());
        Ok(dependents)
    }

    pub fn children(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let ix = self.ix(id);
        let children = self.load_children(ix)?;
        Ok(self.ids(&children))
    }

    pub fn blockers(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let ix = self.ix(id);
        let blockers = self.load_blockers(ix)?;
        Ok(self.ids(&blockers))
    }

    pub fn dependents(&mut self, id: &TaskId) -> Result<Vec<TaskId>> {
        let ix = self.ix(id);
        let dependents = self.load_dependents(ix)?;
        Ok(self.ids(&dependents))
    }

    /// Add an edge to the overlay. Hierarchy edges run parent -> child,
    /// dependency edges run task -> blocker.
    pub fn link(&mut self, kind: EdgeKind, from: &TaskId, to: &TaskId) -> Result<()> {
        let (f, t) = (self.ix(from), self.ix(to));
        match kind {
            EdgeKind::Hierarchy => {
                self.load_children(f)?;
                push_unique(self.nodes[f].children.as_mut(), t);
            }
            EdgeKind::Dependency => {
                self.load_blockers(f)?;
                self.load_dependents(t)?;
                push_unique(self.nodes[f].blockers.as_mut(), t);
                push_unique(self.nodes[t].dependents.as_mut(), f);
            }
        }
        Ok(())
    }

    pub fn unlink(&mut self, kind: EdgeKind, from: &TaskId, to: &TaskId) -> Result<()> {
        let (f, t) = (self.ix(from), self.ix(to));
        match kind {
            EdgeKind::Hierarchy => {
                self.load_children(f)?;
                if let Some(children) = self.nodes[f].children.as_mut() {
                    children.retain(|&c| c != t);
                }
            }
            EdgeKind::Dependency => {
                self.load_blockers(f)?;
                self.load_dependents(t)?;
                if let Some(blockers) = self.nodes[f].blockers.as_mut() {
                    blockers.retain(|&b| b != t);
                }
                if let Some(dependents) = self.nodes[t].dependents.as_mut() {
                    dependents.retain(|&d| d != f);
                }
            }
        }
        Ok(())
    }

    /// Tasks that must finish before `ix` may: its children and its blockers.
    fn successors(&mut self, ix: NodeIx) -> Result<Vec<NodeIx>> {
        let mut next = self.load_children(ix)?;
        next.extend(self.load_blockers(ix)?);
        Ok(next)
    }

    /// Whether `to` is reachable from `from` over children and blockers.
    pub fn reaches(&mut self, from: &TaskId, to: &TaskId) -> Result<bool> {
        let target = self.ix(to);
        let mut visited = HashSet::new();
        let mut stack = vec![self.ix(from)];

        while let Some(current) = stack.pop() {
            if current == target {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            for next in self.successors(current)? {
                if !visited.contains(&next) {
                    stack.push(next);
                }
            }
        }

        Ok(false)
    }
}

fn push_unique(list: Option<&mut Vec<NodeIx>>, ix: NodeIx) {
    if let Some(list) = list {
        if !list.contains(&ix) {
            list.push(ix);
        }
    }
}
