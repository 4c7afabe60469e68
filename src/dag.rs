//! Arena-backed directed acyclic graph shared by the shader graph and the render graph.
//!
//! Nodes live in a [`Dag`] and are addressed by a stable [`NodeIndex`]. Each node keeps an
//! ordered list of outgoing "depends on" edges. The only algorithm here is
//! [`Dag::dependency_order`]: a post-order traversal that lists every node reachable from a
//! root after all of its own dependencies.
//!
//! ```text
//!        root
//!       /    \
//!      b      c        dependency_order(root) == [d, b, c, root]
//!       \    /
//!         d
//! ```
//!
//! Acyclicity is a construction-time discipline. The traversal still defends against a forced
//! back-edge and reports it as [`DagError::Cycle`] instead of looping forever.

use thiserror::Error;

/// Stable index of a node inside a [`Dag`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Raw arena slot of this node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for NodeIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised while traversing a [`Dag`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    /// The traversal re-entered a node that is still being visited.
    #[error("dependency cycle detected: node {node} was re-entered during traversal")]
    Cycle { node: NodeIndex },
    /// An edge points at an index that does not exist in the arena.
    #[error("node {referenced_by} depends on node {node}, which is not part of the graph")]
    MissingNode {
        node: NodeIndex,
        referenced_by: NodeIndex,
    },
    /// A traversal was started from an index that does not exist in the arena.
    #[error("traversal root {root} is not part of the graph")]
    MissingRoot { root: NodeIndex },
}

#[derive(Clone, Debug)]
struct DagNode<T> {
    value: T,
    dependencies: Vec<NodeIndex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// An arena of values connected by "depends on" edges.
#[derive(Clone, Debug)]
pub struct Dag<T> {
    nodes: Vec<DagNode<T>>,
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dag<T> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Adds a node with no dependencies and returns its index.
    pub fn add(&mut self, value: T) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(DagNode {
            value,
            dependencies: Vec::new(),
        });
        index
    }

    /// Records that `node` depends on `dependency`.
    ///
    /// Duplicate edges are ignored so diamond-shaped authoring does not inflate edge lists.
    pub fn connect_to(&mut self, node: NodeIndex, dependency: NodeIndex) {
        if let Some(entry) = self.nodes.get_mut(node.0) {
            if !entry.dependencies.contains(&dependency) {
                entry.dependencies.push(dependency);
            }
        }
    }

    /// Replaces the full dependency list of `node`.
    pub fn set_dependencies(&mut self, node: NodeIndex, dependencies: Vec<NodeIndex>) {
        if let Some(entry) = self.nodes.get_mut(node.0) {
            entry.dependencies = dependencies;
        }
    }

    /// Ordered dependencies of `node`, empty for unknown indices.
    pub fn dependencies(&self, node: NodeIndex) -> &[NodeIndex] {
        self.nodes
            .get(node.0)
            .map(|entry| entry.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, node: NodeIndex) -> Option<&T> {
        self.nodes.get(node.0).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, node: NodeIndex) -> Option<&mut T> {
        self.nodes.get_mut(node.0).map(|entry| &mut entry.value)
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Removes every node. Previously issued indices become invalid.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Iterates nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &T)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, entry)| (NodeIndex(index), &entry.value))
    }

    /// Returns every node reachable from `root`, dependencies first, `root` last.
    ///
    /// Each node appears exactly once even when it is reachable along several paths.
    pub fn dependency_order(&self, root: NodeIndex) -> Result<Vec<NodeIndex>, DagError> {
        self.dependency_order_from([root])
    }

    /// Multi-root variant of [`dependency_order`](Self::dependency_order).
    ///
    /// Roots are visited in the given order; nodes already emitted for an earlier root are not
    /// repeated.
    pub fn dependency_order_from(
        &self,
        roots: impl IntoIterator<Item = NodeIndex>,
    ) -> Result<Vec<NodeIndex>, DagError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::new();
        // (node, next dependency to visit)
        let mut stack: Vec<(NodeIndex, usize)> = Vec::new();

        for root in roots {
            if !self.contains(root) {
                return Err(DagError::MissingRoot { root });
            }
            if marks[root.0] == Mark::Done {
                continue;
            }
            marks[root.0] = Mark::Visiting;
            stack.push((root, 0));

            while let Some(&(node, cursor)) = stack.last() {
                let dependencies = &self.nodes[node.0].dependencies;
                if cursor < dependencies.len() {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;

                    let dependency = dependencies[cursor];
                    if !self.contains(dependency) {
                        return Err(DagError::MissingNode {
                            node: dependency,
                            referenced_by: node,
                        });
                    }
                    match marks[dependency.0] {
                        Mark::Done => {}
                        Mark::Visiting => return Err(DagError::Cycle { node: dependency }),
                        Mark::Unvisited => {
                            marks[dependency.0] = Mark::Visiting;
                            stack.push((dependency, 0));
                        }
                    }
                } else {
                    marks[node.0] = Mark::Done;
                    order.push(node);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}
