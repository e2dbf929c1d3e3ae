//! Generic directed-graph support.
//!
//! The evaluator needs two graph views of a program: the control-flow graph of every function
//! (to collapse loops into SCC nodes) and the call graph (to close per-function reference sets
//! over callees). Both implement the small trait family defined here, and the algorithms in
//! [`algorithms`] are written against those traits only.
//!
//! # Traits
//!
//! - [`GraphBase`] - node count
//! - [`Successors`] - outgoing edges
//! - [`Predecessors`] - incoming edges
//! - [`RootedGraph`] - graphs with a distinguished entry node
//!
//! [`DirectedGraph`] is a plain adjacency-list implementation used for call graphs and tests.

pub mod algorithms;
mod directed;
mod node;

pub use directed::DirectedGraph;
pub use node::NodeId;

/// Base trait for graphs with a dense node id space `0..node_count()`.
pub trait GraphBase {
    /// Number of nodes in the graph.
    fn node_count(&self) -> usize;
}

/// Graphs that can enumerate the successors of a node.
pub trait Successors: GraphBase {
    /// Returns the direct successors of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// Graphs that can enumerate the predecessors of a node.
pub trait Predecessors: GraphBase {
    /// Returns the direct predecessors of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// Graphs with a single entry node.
pub trait RootedGraph: Successors {
    /// The entry node; every traversal of a function starts here.
    fn entry(&self) -> NodeId;
}
