//! IPC client for talking to a running daemon over its Unix socket.
//!
//! Requests are sent one at a time and each waits for its answer, which is
//! all the CLI needs.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{decode_line, encode_line, Request, Response, ToolDescriptor};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the daemon with a custom timeout, used for both the
    /// connection attempt and every later request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the daemon and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent, the response cannot
    /// be read or parsed, or the operation times out.
    pub async fn send(&mut self, request: Request) -> Result<Response, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))?
    }

    async fn send_internal(&mut self, request: Request) -> Result<Response, IpcError> {
        let line = encode_line(&request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        Ok(decode_line(&line)?)
    }

    /// Send a ping request to check if the daemon is responsive.
    ///
    /// Returns `true` if the daemon responds with a Pong, `false` otherwise.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(Request::Ping).await?;
        Ok(matches!(response, Response::Pong))
    }

    /// Fetch the tool catalog.
    pub async fn list_tools(&mut self, id: u64) -> Result<Vec<ToolDescriptor>, IpcError> {
        match self.send(Request::ListTools { id }).await? {
            Response::Tools { tools, .. } => Ok(tools),
            Response::Error { error, .. } => Err(IpcError::Remote(error)),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Call a tool and return its result text.
    ///
    /// A tool failure is reported as [`IpcError::Remote`].
    pub async fn call_tool(
        &mut self,
        id: u64,
        name: &str,
        arguments: Value,
    ) -> Result<String, IpcError> {
        match self.send(Request::call(id, name, arguments)).await? {
            Response::ToolResult { id: answered, text } if answered == id => Ok(text),
            Response::Error { error, .. } => Err(IpcError::Remote(error)),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }
}
