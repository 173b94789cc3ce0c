//! Organization tree store: named XML documents addressed by a small path
//! language, with subtree graft, prune and report operations.
//!
//! The engine ([`xml`], [`path`], [`mutation`], [`document`]) is stateless:
//! every operation parses a stored body, applies one change and serializes
//! the result. [`store`], [`service`] and [`server`] wrap it with persistence
//! and an MCP stdio surface.

pub mod config;
pub mod document;
pub mod error;
pub mod mutation;
pub mod node;
pub mod path;
pub mod server;
pub mod service;
pub mod store;
pub mod xml;

pub use document::{apply, Document, Envelope, MutationRequest, Outcome, Submission};
pub use error::{StoreError, TreeError};
pub use node::{Content, Node};
pub use path::{locate, resolve, Location, PathExpr};
pub use xml::{parse, serialize, serialize_with, Layout, MAX_DEPTH};
