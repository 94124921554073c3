//! IPC server accepting client connections on a Unix Domain Socket.
//!
//! Every accepted connection is served on its own task by a clone of the
//! [`Service`], so clients never wait on each other.

use std::io;
use std::path::{Path, PathBuf};

use protocol::{ErrorMessage, ProtocolError};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::Service;

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// This will create the socket file and any necessary parent directories.
    /// If a socket file already exists at the path, it will be removed first.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directories cannot be created
    /// - The existing socket cannot be removed
    /// - The socket cannot be bound
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Stale socket from a previous run
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        info!(socket = %path.display(), "IPC server listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Path of the bound socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    ///
    /// This method waits until a client connects.
    pub async fn accept(&self) -> Result<UnixStream, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    ///
    /// Open connections are drained before this returns and the socket file
    /// is removed.
    pub async fn run(self, service: Service, shutdown: CancellationToken) -> Result<(), IpcError> {
        let mut connections = JoinSet::new();
        let mut next_connection: u64 = 0;

        let result = loop {
            let stream = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = self.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => break Err(IpcError::Io(e)),
                },
                // Reap finished connections so the set does not grow unbounded.
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            };

            next_connection += 1;
            let connection = next_connection;
            let service = service.clone();
            debug!(connection, "Accepted IPC connection");

            connections.spawn(async move {
                let (reader, writer) = stream.into_split();
                match service.serve(reader, writer).await {
                    Ok(()) => debug!(connection, "IPC connection closed"),
                    Err(e) => warn!(connection, error = %e, "IPC connection failed"),
                }
            });
        };

        while connections.join_next().await.is_some() {}

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(socket = %self.path.display(), error = %e, "Could not remove socket file");
        }
        info!("IPC server stopped");
        result
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The daemon answered with an error.
    #[error("daemon returned {:?}: {}", .0.code, .0.message)]
    Remote(ErrorMessage),

    /// The daemon answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
