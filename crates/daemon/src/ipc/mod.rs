//! Transports for the fsgate daemon.
//!
//! Both transports speak the same newline-delimited JSON protocol and hand
//! each connection to a [`Service`](crate::service::Service).
//!
//! ## Standard streams
//!
//! [`serve_stdio`] serves a single connection over stdin/stdout. This is the
//! default when no socket path is configured, which lets a parent process
//! spawn the daemon and talk to it over pipes. Logs go to stderr.
//!
//! ## Unix Domain Socket
//!
//! [`IpcServer`] accepts any number of concurrent clients on a socket. The
//! default socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/fsgate/fsgate.sock`
//! - Fallback: `/tmp/fsgate-$UID/fsgate.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{default_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&default_socket_path()).await?;
//!
//!     if client.ping().await? {
//!         let text = client
//!             .call_tool(1, "list_directory", serde_json::json!({ "path": "/srv" }))
//!             .await?;
//!         println!("{}", text);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod server;

pub use client::IpcClient;
pub use server::{IpcError, IpcServer};

use std::path::PathBuf;

use crate::service::Service;

/// Serve a single connection over the process's standard streams.
///
/// Returns when stdin reaches end of file or shutdown is requested.
pub async fn serve_stdio(service: Service) -> Result<(), IpcError> {
    tracing::info!("Serving on standard input/output");
    service.serve(tokio::io::stdin(), tokio::io::stdout()).await
}

/// Default socket path for the daemon.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/fsgate/fsgate.sock`
/// 2. Otherwise: `/tmp/fsgate-$UID/fsgate.sock`
#[cfg(unix)]
pub fn default_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("fsgate").join("fsgate.sock")
        }
        _ => {
            // Get UID by checking metadata of a file we own
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/fsgate-{}", uid)).join("fsgate.sock")
        }
    }
}

/// Non-Unix platforms have no Unix Domain Sockets.
#[cfg(not(unix))]
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("fsgate").join("fsgate.sock")
}
