mod diff;
mod tree;

pub use diff::diff_trees;
pub use tree::{ReferenceTracker, TrackedTree};
