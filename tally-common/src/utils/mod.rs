//! utils.rs
//!
//! Common types and helper implementations shared across tally crates.
//!
//! This module provides the node identifier and clock helpers.

pub mod node_id;
pub use node_id::NodeId;

pub mod time;
