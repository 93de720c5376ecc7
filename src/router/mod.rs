//! Route tree matching (spec.md §4.1, §3 "Route tree").
//!
//! Path patterns are parsed (`crate::uri`) into segments, then inserted
//! into a [`Node`] tree. At request time `Node::resolve` walks the tree
//! segment by segment with the match-priority rules spec.md §4.1 lays out.

mod radix;

pub use radix::{Matched, Node, NodeValue};
