//! Support data structures shared by the IR and the evaluator.

mod bitset;
pub mod graph;

pub use bitset::BitSet;
