//! # disktree-common
//!
//! Shared utilities and types for the disktree inspection engine.
//!
//! This crate provides common functionality used across disktree crates:
//! - The error taxonomy
//! - Scratch storage locations
//! - External tool invocation

#![warn(missing_docs)]

pub mod error;
pub mod paths;
pub mod process;

pub use error::{DisktreeError, DisktreeResult};
pub use paths::DisktreePaths;
pub use process::{Invocation, ToolOutput};
