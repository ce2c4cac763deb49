//! Verified retrieval and traversal of Filecoin-style AMTs
//!
//! This crate provides building blocks for reading content-addressed state
//! collections without trusting the channel they arrive over:
//!
//! - **Identifiers**: parse CIDs against an enumerated tag set and verify
//!   fetched bytes against the identifier they were requested under
//! - **Strict DAG-CBOR**: a canonical-only decoder producing a closed
//!   [`Value`](cbor::Value) tree; non-canonical encodings are rejected
//! - **AMT traversal**: resolve small integer keys (deal IDs and the like)
//!   to values across hash-linked blocks, fetched on demand through a
//!   pluggable [`BlockSource`]
//!
//! # Design Philosophy
//!
//! - Verification before decoding, always over the raw fetched bytes
//! - A single bit error is detected and fatal, never propagated
//! - Structured results only; presentation and logging belong to callers
//! - Read-only: no mutation or write paths exist
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_amt::{Amt, identifier};
//!
//! # async fn example(source: impl weft_amt::BlockSource + Sync) -> weft_amt::Result<()> {
//! let root = identifier::parse_cid(
//!     "bafy2bzacebwg6zmvh62eplkwipho46zd5xe2dbeqkitgerc44bbrz6nbmkxn4",
//! )?;
//! let proposals = Amt::load(root, source).await?;
//! match proposals.get(45_774_364).await? {
//!     Some(deal) => println!("found: {:?}", deal),
//!     None => println!("no such deal"),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// Array Mapped Trie model and traversal
pub mod amt;
/// Strict canonical DAG-CBOR decoding
pub mod cbor;
pub mod error;
/// Content identifier parsing and verification
pub mod identifier;
/// Block source abstraction
pub mod source;

pub use amt::{Amt, AmtNode, AmtRoot};
pub use cbor::Value;
pub use error::{AmtError, AmtErrorKind, Result};
pub use source::{BlockSource, MemoryBlockSource};
