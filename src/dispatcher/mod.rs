//! Request dispatch (spec.md §4.5): recursion-depth enforcement, the
//! shallow-clone invariant, route resolution, filter-stack wrapping, and
//! response normalization.

mod core;

pub use core::{Context, Dispatcher, RequestClass};
