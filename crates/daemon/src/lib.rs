//! # fsgate Daemon Library
//!
//! This crate provides the fsgate daemon: a tool server that exposes a small
//! set of filesystem operations to a caller, confined to an allow-list of
//! root directories.
//!
//! ## Overview
//!
//! - **Sandbox**: lexical containment check every path goes through
//! - **File Operations**: line-windowed reads, batch reads, listings,
//!   directory creation and concurrent tree building
//! - **Tool Router**: argument validation and dispatch for the tool catalog
//! - **Service**: per-connection request loop with cancellation
//! - **Transports**: standard streams and Unix Domain Sockets
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │        stdio / Unix socket (newline-delimited JSON)        │
//! ├───────────────────────────────────────────────────────────┤
//! │  Service: request loop, in-flight calls, single writer     │
//! ├───────────────────────────────────────────────────────────┤
//! │  ToolRouter: typed arguments ──► AllowList gate            │
//! ├───────────────────────────────────────────────────────────┤
//! │  files: reader │ browser │ tree (JoinSet fan-out)          │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{AllowList, Service, ToolRouter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let allow_list = Arc::new(AllowList::new(["/srv/data"])?);
//!     let service = Service::new(ToolRouter::new(allow_list), CancellationToken::new());
//!
//!     // Serve requests on stdin/stdout until stdin closes
//!     daemon::ipc::serve_stdio(service).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`sandbox`]: Allow-list and path containment
//! - [`files`]: Filesystem operations
//! - [`router`]: Tool catalog and dispatch
//! - [`service`]: Request loop
//! - [`ipc`]: Transports and client
//! - [`logging`]: Tracing subscriber setup

pub mod config;
pub mod files;
pub mod ipc;
pub mod logging;
pub mod router;
pub mod sandbox;
pub mod service;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export sandbox types for convenience
pub use sandbox::{AllowList, SandboxError};

// Re-export files types for convenience
pub use files::{DirectoryEntry, FileError, LineWindow, TreeBuilder};

// Re-export router types for convenience
pub use router::{RouterError, Tool, ToolRouter};

// Re-export service and transport types for convenience
pub use ipc::{IpcClient, IpcError, IpcServer};
pub use service::Service;
