//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! A strongly connected component is a maximal set of nodes in which every node reaches every
//! other. On a control-flow graph the non-trivial components are exactly the loops; on a call
//! graph they are the groups of mutually recursive functions.
//!
//! The implementation keeps its own DFS stack instead of recursing, so functions with very
//! long block chains cannot overflow the native stack.

use std::collections::HashSet;

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of a directed graph.
///
/// # Arguments
///
/// * `graph` - The directed graph to analyze
///
/// # Returns
///
/// A vector of SCCs, each a vector of `NodeId`s. The SCCs are returned in **reverse
/// topological order**: if there is an edge from SCC A to SCC B, then A appears after B.
///
/// # Complexity
///
/// - Time: O(V + E)
/// - Space: O(V)
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::utils::graph::{DirectedGraph, algorithms::strongly_connected_components};
///
/// // header -> body -> header, header -> exit
/// let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
/// let header = graph.add_node(());
/// let body = graph.add_node(());
/// let exit = graph.add_node(());
/// graph.add_edge(header, body, ())?;
/// graph.add_edge(body, header, ())?;
/// graph.add_edge(header, exit, ())?;
///
/// let sccs = strongly_connected_components(&graph);
/// assert_eq!(sccs.len(), 2);
/// ```
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);

    for i in 0..node_count {
        if state.index[i].is_none() {
            state.visit(graph, NodeId::new(i));
        }
    }

    state.sccs
}

/// Internal state for Tarjan's algorithm.
struct TarjanState {
    /// Discovery index for each node (None if not yet visited)
    index: Vec<Option<usize>>,
    /// Lowlink value for each node
    lowlink: Vec<usize>,
    /// Whether a node is currently on the component stack
    on_stack: Vec<bool>,
    /// Nodes of components that are not yet complete
    stack: Vec<NodeId>,
    /// Next discovery index
    current_index: usize,
    /// Completed components
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn discover(&mut self, v: NodeId) -> usize {
        let discovered = self.current_index;
        self.index[v.index()] = Some(discovered);
        self.lowlink[v.index()] = discovered;
        self.current_index += 1;
        self.stack.push(v);
        self.on_stack[v.index()] = true;
        discovered
    }

    fn visit<G: Successors>(&mut self, graph: &G, root: NodeId) {
        self.discover(root);
        // Each frame holds a node and the successors still to be examined.
        let mut work: Vec<(NodeId, Vec<NodeId>)> = vec![(root, graph.successors(root).collect())];

        while let Some((v, pending)) = work.last_mut() {
            let v = *v;
            if let Some(w) = pending.pop() {
                match self.index[w.index()] {
                    None => {
                        self.discover(w);
                        work.push((w, graph.successors(w).collect()));
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v.index()] = self.lowlink[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if let Some((parent, _)) = work.last() {
                let parent = parent.index();
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v.index()]);
            }

            if Some(self.lowlink[v.index()]) == self.index[v.index()] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                scc.sort();
                self.sccs.push(scc);
            }
        }
    }
}

/// Returns the condensation graph: a DAG where each SCC is collapsed to a single node.
///
/// # Arguments
///
/// * `graph` - The original graph
/// * `sccs` - The SCCs as returned by [`strongly_connected_components`]
///
/// # Returns
///
/// A tuple containing:
/// - A vector mapping each original node to its SCC index
/// - A vector of deduplicated edges `(from_scc, to_scc)` between different SCCs
pub fn condensation<G>(graph: &G, sccs: &[Vec<NodeId>]) -> (Vec<usize>, Vec<(usize, usize)>)
where
    G: Successors,
{
    let node_count = graph.node_count();

    let mut node_to_scc = vec![0; node_count];
    for (scc_idx, scc) in sccs.iter().enumerate() {
        for &node in scc {
            node_to_scc[node.index()] = scc_idx;
        }
    }

    let mut edges = Vec::new();
    let mut seen_edges = HashSet::new();
    for (i, &from_scc) in node_to_scc.iter().enumerate() {
        for to_node in graph.successors(NodeId::new(i)) {
            let to_scc = node_to_scc[to_node.index()];
            if from_scc != to_scc && seen_edges.insert((from_scc, to_scc)) {
                edges.push((from_scc, to_scc));
            }
        }
    }

    (node_to_scc, edges)
}

/// Returns `true` if `scc` contains a cycle: more than one node, or a node with a self edge.
pub fn is_cyclic<G>(graph: &G, scc: &[NodeId]) -> bool
where
    G: Successors,
{
    match scc {
        [single] => graph.successors(*single).any(|s| s == *single),
        _ => scc.len() > 1,
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{
        algorithms::scc::{condensation, is_cyclic, strongly_connected_components},
        DirectedGraph, NodeId,
    };

    fn graph_with(nodes: usize, edges: &[(usize, usize)]) -> DirectedGraph<(), ()> {
        let mut graph = DirectedGraph::new();
        for _ in 0..nodes {
            graph.add_node(());
        }
        for &(from, to) in edges {
            graph
                .add_edge(NodeId::new(from), NodeId::new(to), ())
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_scc_empty_graph() {
        let graph: DirectedGraph<(), ()> = DirectedGraph::new();
        assert!(strongly_connected_components(&graph).is_empty());
    }

    #[test]
    fn test_scc_straight_line_is_trivial() {
        let graph = graph_with(3, &[(0, 1), (1, 2)]);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 3);
        // Reverse topological: the sink comes first.
        assert_eq!(sccs[0], vec![NodeId::new(2)]);
        assert_eq!(sccs[2], vec![NodeId::new(0)]);
        assert!(sccs.iter().all(|scc| !is_cyclic(&graph, scc)));
    }

    #[test]
    fn test_scc_self_loop_is_cyclic() {
        let graph = graph_with(2, &[(0, 1), (1, 1)]);
        let sccs = strongly_connected_components(&graph);
        let looped = sccs.iter().find(|scc| scc[0] == NodeId::new(1)).unwrap();
        assert!(is_cyclic(&graph, looped));
    }

    #[test]
    fn test_scc_loop_with_exit() {
        // entry -> header <-> body, header -> exit
        let graph = graph_with(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 3);
        let loop_scc = sccs.iter().find(|scc| scc.len() == 2).unwrap();
        assert_eq!(loop_scc, &vec![NodeId::new(1), NodeId::new(2)]);
        assert!(is_cyclic(&graph, loop_scc));
    }

    #[test]
    fn test_scc_nested_loops_collapse() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3 -> 0
        let graph = graph_with(4, &[(0, 1), (1, 2), (2, 1), (2, 3), (3, 0)]);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 4);
    }

    #[test]
    fn test_scc_long_chain_does_not_recurse() {
        let edges: Vec<_> = (0..50_000).map(|i| (i, i + 1)).collect();
        let graph = graph_with(50_001, &edges);
        assert_eq!(strongly_connected_components(&graph).len(), 50_001);
    }

    #[test]
    fn test_condensation_is_a_dag_in_order() {
        let graph = graph_with(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let sccs = strongly_connected_components(&graph);
        let (node_to_scc, edges) = condensation(&graph, &sccs);

        assert_eq!(node_to_scc[1], node_to_scc[2]);
        assert_eq!(edges.len(), 2);
        for (from, to) in edges {
            // Reverse topological numbering: edges point to smaller indices.
            assert!(from > to);
        }
    }
}
