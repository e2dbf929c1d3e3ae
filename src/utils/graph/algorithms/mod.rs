//! Graph algorithms used by the evaluator.
//!
//! # Available Algorithms
//!
//! ## Traversal
//!
//! - [`postorder`] / [`reverse_postorder`] - Depth-first orderings from one node
//! - [`reverse_postorder_within`] - Reverse postorder of a subgraph from several entries
//!
//! ## Strongly Connected Components
//!
//! - [`strongly_connected_components`] - Tarjan's SCC algorithm
//! - [`condensation`] - The DAG of SCCs
//! - [`is_cyclic`] - Whether one SCC is a real cycle
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Postorder | O(V + E) | Loop body iteration order |
//! | SCC | O(V + E) | Loop collapsing, recursion groups |

mod scc;
mod traversal;

pub use scc::{condensation, is_cyclic, strongly_connected_components};
pub use traversal::{postorder, postorder_within, reverse_postorder, reverse_postorder_within};
