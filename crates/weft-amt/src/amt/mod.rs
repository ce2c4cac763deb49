//! Array Mapped Trie model and traversal

pub mod node;
pub mod tree;

pub use node::{AmtNode, AmtRoot, MAX_BIT_WIDTH, MIN_BIT_WIDTH};
pub use tree::Amt;
