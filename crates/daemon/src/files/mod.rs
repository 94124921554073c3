//! Filesystem operations exposed as tools.
//!
//! This module provides:
//! - Whole-file and line-window reads, plus concurrent batch reads
//! - Single-level directory listing and directory creation
//! - Concurrent recursive directory tree building with cancellation
//!
//! # Security
//!
//! Functions here perform I/O on the paths they are given. Every path must
//! have been resolved through [`AllowList::resolve`](crate::sandbox::AllowList::resolve)
//! first; [`read_many`] is the exception and gates each of its paths itself.

pub mod browser;
pub mod error;
pub mod reader;
pub mod tree;

pub use browser::{
    create_directory, list_directory, render_listing, require_directory, DirectoryEntry,
};
pub use error::FileError;
pub use reader::{read_lines, read_many, render_batch, BatchItem, LineWindow};
pub use tree::TreeBuilder;
