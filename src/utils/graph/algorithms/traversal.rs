//! Depth-first orderings.
//!
//! Forward analyses want to see a node after its predecessors, which on acyclic regions is
//! exactly reverse postorder. The evaluator uses [`reverse_postorder_within`] to order the
//! blocks of one loop starting from the loop's entry blocks.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder of the nodes reachable from `starts` while staying inside the
/// nodes accepted by `include`.
///
/// Start nodes rejected by `include` or outside the graph are skipped. Starts are explored in
/// the given order; a node already reached from an earlier start is not revisited.
///
/// # Arguments
///
/// * `graph` - The graph to traverse
/// * `starts` - The nodes traversal begins from
/// * `include` - Predicate restricting the traversal to a subgraph
///
/// # Complexity
///
/// - Time: O(V + E)
/// - Space: O(V)
#[allow(clippy::items_after_statements)]
pub fn postorder_within<G, F>(graph: &G, starts: &[NodeId], include: F) -> Vec<NodeId>
where
    G: Successors,
    F: Fn(NodeId) -> bool,
{
    let node_count = graph.node_count();
    let mut visited = vec![false; node_count];
    let mut result = Vec::new();

    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    for &start in starts {
        if start.index() >= node_count || !include(start) {
            continue;
        }

        let mut stack = vec![(start, State::Enter)];
        while let Some((node, state)) = stack.pop() {
            match state {
                State::Enter => {
                    if visited[node.index()] {
                        continue;
                    }
                    visited[node.index()] = true;
                    stack.push((node, State::Exit));

                    let successors: Vec<NodeId> = graph.successors(node).collect();
                    for &succ in successors.iter().rev() {
                        if succ.index() < node_count && !visited[succ.index()] && include(succ) {
                            stack.push((succ, State::Enter));
                        }
                    }
                }
                State::Exit => result.push(node),
            }
        }
    }

    result
}

/// Computes the postorder traversal of nodes reachable from `start`.
///
/// # Examples
///
/// ```rust,ignore
/// use preeval::utils::graph::{DirectedGraph, algorithms::postorder};
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let a = graph.add_node("A");
/// let b = graph.add_node("B");
/// graph.add_edge(a, b, ())?;
/// assert_eq!(postorder(&graph, a), vec![b, a]);
/// ```
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    postorder_within(graph, &[start], |_| true)
}

/// Computes the reverse postorder of nodes reachable from `start`.
///
/// Every node appears before its successors unless the edge is a back edge.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

/// Reverse postorder restricted to a subgraph, see [`postorder_within`].
pub fn reverse_postorder_within<G, F>(graph: &G, starts: &[NodeId], include: F) -> Vec<NodeId>
where
    G: Successors,
    F: Fn(NodeId) -> bool,
{
    let mut result = postorder_within(graph, starts, include);
    result.reverse();
    result
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{
        algorithms::traversal::{postorder, reverse_postorder, reverse_postorder_within},
        DirectedGraph, NodeId,
    };

    fn diamond() -> (DirectedGraph<&'static str, ()>, [NodeId; 4]) {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node("A");
        let b = graph.add_node("B");
        let c = graph.add_node("C");
        let d = graph.add_node("D");
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(a, c, ()).unwrap();
        graph.add_edge(b, d, ()).unwrap();
        graph.add_edge(c, d, ()).unwrap();
        (graph, [a, b, c, d])
    }

    #[test]
    fn test_postorder_diamond_visits_join_first() {
        let (graph, [a, _, _, d]) = diamond();
        let order = postorder(&graph, a);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], d);
        assert_eq!(*order.last().unwrap(), a);
    }

    #[test]
    fn test_reverse_postorder_respects_edges() {
        let (graph, [a, b, c, d]) = diamond();
        let order = reverse_postorder(&graph, a);
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_reverse_postorder_with_back_edge() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let header = graph.add_node(());
        let body = graph.add_node(());
        let exit = graph.add_node(());
        graph.add_edge(header, body, ()).unwrap();
        graph.add_edge(body, header, ()).unwrap();
        graph.add_edge(header, exit, ()).unwrap();

        assert_eq!(reverse_postorder(&graph, header)[0], header);
    }

    #[test]
    fn test_within_stays_inside_subgraph() {
        let (graph, [a, b, c, d]) = diamond();
        let order = reverse_postorder_within(&graph, &[a], |n| n != c);
        assert_eq!(order, vec![a, b, d]);

        let excluded_start = reverse_postorder_within(&graph, &[c], |n| n != c);
        assert!(excluded_start.is_empty());
    }

    #[test]
    fn test_within_multiple_starts() {
        let (graph, [_, b, c, d]) = diamond();
        let order = reverse_postorder_within(&graph, &[b, c], |_| true);
        assert_eq!(order.len(), 3);
        assert_eq!(*order.last().unwrap(), d);
    }
}
