//! Request loop shared by every transport.
//!
//! A connection is a pair of byte streams carrying newline-delimited JSON.
//! Each `CallTool` runs as its own task with a per-request cancellation
//! token, so slow calls never block the reader and can be aborted with a
//! `Cancel` request. All responses go through a single writer task, which
//! keeps lines from interleaving.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::{
    decode_line, encode_line, ErrorCode, ErrorMessage, Request, Response, MAX_LINE_BYTES,
};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::files::FileError;
use crate::ipc::IpcError;
use crate::router::{RouterError, ToolRouter};

/// Capacity of the per-connection response queue.
const RESPONSE_QUEUE: usize = 64;

type InFlight = Arc<DashMap<u64, CancellationToken>>;

/// Serves requests against a [`ToolRouter`].
#[derive(Debug, Clone)]
pub struct Service {
    router: ToolRouter,
    request_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl Service {
    /// Create a service. Calls observe `shutdown` in addition to their own
    /// cancellation token.
    pub fn new(router: ToolRouter, shutdown: CancellationToken) -> Self {
        Self {
            router,
            request_timeout: None,
            shutdown,
        }
    }

    /// Cancel every call that runs longer than `timeout`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Serve one connection until the peer closes its side or shutdown is
    /// requested.
    ///
    /// Calls still running when the input ends are allowed to finish and
    /// their responses are flushed before this returns.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), IpcError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let in_flight: InFlight = Arc::new(DashMap::new());

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        let read_result = loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                read = read_line(&mut reader, &mut buf) => read,
            };

            match read {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(IpcError::Io(e)),
            }

            let response = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match decode_line::<Request>(line) {
                    Ok(request) => self.handle(request, &tx, &in_flight).await,
                    Err(e) => Some(malformed(e.to_string())),
                },
                Err(e) => Some(malformed(format!("request is not valid UTF-8: {}", e))),
            };

            if let Some(response) = response {
                if tx.send(response).await.is_err() {
                    debug!("Response writer stopped, closing connection");
                    break Ok(());
                }
            }
        };

        drop(tx);
        match writer_task.await {
            Ok(write_result) => read_result.and(write_result),
            Err(join_error) => Err(IpcError::Io(std::io::Error::other(join_error.to_string()))),
        }
    }

    /// Handle one request. Returns the response to send immediately, if any;
    /// tool calls answer asynchronously through `tx`.
    async fn handle(
        &self,
        request: Request,
        tx: &mpsc::Sender<Response>,
        in_flight: &InFlight,
    ) -> Option<Response> {
        match request {
            Request::Ping => Some(Response::Pong),
            Request::ListTools { id } => Some(Response::Tools {
                id,
                tools: self.router.tools(),
            }),
            Request::Cancel { id } => {
                match in_flight.get(&id) {
                    Some(token) => {
                        info!(id, "Cancelling request");
                        token.cancel();
                    }
                    None => debug!(id, "Cancel for unknown or finished request"),
                }
                None
            }
            Request::CallTool {
                id,
                name,
                arguments,
            } => {
                let token = match in_flight.entry(id) {
                    Entry::Occupied(_) => {
                        warn!(id, "Duplicate in-flight request id");
                        return Some(Response::Error {
                            id: Some(id),
                            error: ErrorMessage::new(
                                ErrorCode::InvalidArgument,
                                format!("request id {} is already in flight", id),
                            ),
                        });
                    }
                    Entry::Vacant(slot) => slot.insert(self.shutdown.child_token()).clone(),
                };

                self.spawn_call(id, name, arguments, token, tx.clone(), in_flight.clone());
                None
            }
        }
    }

    fn spawn_call(
        &self,
        id: u64,
        name: String,
        arguments: serde_json::Value,
        token: CancellationToken,
        tx: mpsc::Sender<Response>,
        in_flight: InFlight,
    ) {
        let router = self.router.clone();
        let timeout = self.request_timeout;

        tokio::spawn(async move {
            info!(id, tool = %name, "Tool call started");
            let call = router.call(&name, arguments, token.clone());

            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            id,
                            tool = %name,
                            timeout_secs = limit.as_secs(),
                            "Tool call hit its deadline"
                        );
                        token.cancel();
                        Err(RouterError::File(FileError::Cancelled))
                    }
                },
                None => call.await,
            };
            in_flight.remove(&id);

            let response = match result {
                Ok(text) => {
                    info!(id, tool = %name, bytes = text.len(), "Tool call finished");
                    Response::ToolResult { id, text }
                }
                Err(e) => {
                    warn!(id, tool = %name, error = %e, "Tool call failed");
                    Response::Error {
                        id: Some(id),
                        error: e.to_error_message(),
                    }
                }
            };

            if tx.send(response).await.is_err() {
                debug!(id, "Connection closed before response was sent");
            }
        });
    }
}

/// Read one line, refusing to buffer more than [`MAX_LINE_BYTES`] + 1 bytes.
///
/// One byte over the limit is enough for the decoder to reject the line.
async fn read_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let limit = (MAX_LINE_BYTES + 1) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if read as u64 == limit && buf.last() != Some(&b'\n') {
        let skipped = skip_line(reader).await?;
        debug!(skipped, "Discarded tail of oversized line");
    }
    Ok(read)
}

/// Consume input up to and including the next newline without keeping it.
///
/// Memory use is bounded by the reader's internal buffer, whatever the
/// length of the line.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<u64> {
    let mut skipped = 0u64;
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => (true, end + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        skipped += used as u64;
        if found {
            return Ok(skipped);
        }
    }
}

fn malformed(message: String) -> Response {
    warn!(error = %message, "Malformed request");
    Response::Error {
        id: None,
        error: ErrorMessage::new(ErrorCode::MalformedRequest, message),
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<Response>) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let line = encode_line(&response)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::AllowList;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream, Lines};

    struct Harness {
        input: tokio::io::WriteHalf<DuplexStream>,
        output: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        task: tokio::task::JoinHandle<Result<(), IpcError>>,
    }

    impl Harness {
        fn start(service: Service) -> Self {
            let (client, server) = duplex(64 * 1024);
            let (server_read, server_write) = tokio::io::split(server);
            let (client_read, client_write) = tokio::io::split(client);

            let task = tokio::spawn(async move { service.serve(server_read, server_write).await });

            Self {
                input: client_write,
                output: BufReader::new(client_read).lines(),
                task,
            }
        }

        async fn send_raw(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.flush().await.unwrap();
        }

        async fn send(&mut self, request: &Request) {
            let line = encode_line(request).unwrap();
            self.send_raw(&line).await;
        }

        async fn recv(&mut self) -> Response {
            let line = self.output.next_line().await.unwrap().unwrap();
            decode_line(&line).unwrap()
        }
    }

    fn service_for(dir: &std::path::Path) -> Service {
        let allow_list = Arc::new(AllowList::new([dir]).unwrap());
        Service::new(ToolRouter::new(allow_list), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_ping_and_list_tools() {
        let temp_dir = TempDir::new().unwrap();
        let mut harness = Harness::start(service_for(temp_dir.path()));

        harness.send(&Request::Ping).await;
        assert_eq!(harness.recv().await, Response::Pong);

        harness.send(&Request::ListTools { id: 3 }).await;
        match harness.recv().await {
            Response::Tools { id, tools } => {
                assert_eq!(id, 3);
                assert_eq!(tools.len(), 5);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_tool_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("hello.txt");
        std::fs::write(&file, "hello world").unwrap();
        let mut harness = Harness::start(service_for(temp_dir.path()));

        harness
            .send(&Request::call(
                1,
                "read_file",
                json!({ "path": file.display().to_string() }),
            ))
            .await;

        assert_eq!(
            harness.recv().await,
            Response::ToolResult {
                id: 1,
                text: "hello world".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_tool_error_carries_id_and_code() {
        let temp_dir = TempDir::new().unwrap();
        let mut harness = Harness::start(service_for(temp_dir.path()));

        harness
            .send(&Request::call(9, "read_file", json!({ "path": "/etc/passwd" })))
            .await;

        match harness.recv().await {
            Response::Error { id, error } => {
                assert_eq!(id, Some(9));
                assert_eq!(error.code, ErrorCode::OutsideAllowedDirectories);
                assert_eq!(error.path.as_deref(), Some("/etc/passwd"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_connection_open() {
        let temp_dir = TempDir::new().unwrap();
        let mut harness = Harness::start(service_for(temp_dir.path()));

        harness.send_raw("this is not json\n").await;
        match harness.recv().await {
            Response::Error { id, error } => {
                assert_eq!(id, None);
                assert_eq!(error.code, ErrorCode::MalformedRequest);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        harness.send_raw("\n").await;
        harness.send(&Request::Ping).await;
        assert_eq!(harness.recv().await, Response::Pong);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let temp_dir = TempDir::new().unwrap();
        let mut harness = Harness::start(service_for(temp_dir.path()));

        harness.send(&Request::call(4, "write_file", json!({}))).await;
        match harness.recv().await {
            Response::Error { id, error } => {
                assert_eq!(id, Some(4));
                assert_eq!(error.code, ErrorCode::UnknownTool);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_flushes_pending_calls() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..10 {
            std::fs::write(temp_dir.path().join(format!("f{}.txt", i)), format!("{}", i)).unwrap();
        }
        let mut harness = Harness::start(service_for(temp_dir.path()));

        for i in 0..10u64 {
            let path = temp_dir.path().join(format!("f{}.txt", i));
            harness
                .send(&Request::call(i, "read_file", json!({ "path": path.display().to_string() })))
                .await;
        }
        harness.input.shutdown().await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..10 {
            match harness.recv().await {
                Response::ToolResult { id, text } => {
                    assert_eq!(text, id.to_string());
                    seen.push(id);
                }
                other => panic!("unexpected response: {:?}", other),
            }
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let temp_dir = TempDir::new().unwrap();
        let shutdown = CancellationToken::new();
        let allow_list = Arc::new(AllowList::new([temp_dir.path()]).unwrap());
        let service = Service::new(ToolRouter::new(allow_list), shutdown.clone());
        let harness = Harness::start(service);

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), harness.task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let service = service_for(temp_dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        let in_flight: InFlight = Arc::new(DashMap::new());
        in_flight.insert(5, CancellationToken::new());

        let response = service
            .handle(Request::call(5, "read_file", json!({})), &tx, &in_flight)
            .await;

        match response {
            Some(Response::Error { id, error }) => {
                assert_eq!(id, Some(5));
                assert_eq!(error.code, ErrorCode::InvalidArgument);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_fires_request_token() {
        let temp_dir = TempDir::new().unwrap();
        let service = service_for(temp_dir.path());
        let (tx, _rx) = mpsc::channel(8);
        let in_flight: InFlight = Arc::new(DashMap::new());
        let token = CancellationToken::new();
        in_flight.insert(7, token.clone());

        let response = service.handle(Request::Cancel { id: 7 }, &tx, &in_flight).await;
        assert!(response.is_none());
        assert!(token.is_cancelled());

        // Unknown ids are ignored.
        let response = service.handle(Request::Cancel { id: 99 }, &tx, &in_flight).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_deadline_answers_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..30 {
            for j in 0..30 {
                let dir = temp_dir.path().join(format!("d{}/e{}", i, j));
                std::fs::create_dir_all(&dir).unwrap();
                std::fs::write(dir.join("f.txt"), "x").unwrap();
            }
        }
        let service = service_for(temp_dir.path()).with_request_timeout(Some(Duration::ZERO));
        let mut harness = Harness::start(service);

        harness
            .send(&Request::call(
                2,
                "directory_tree",
                json!({ "path": temp_dir.path().display().to_string() }),
            ))
            .await;

        match harness.recv().await {
            Response::Error { id, error } => {
                assert_eq!(id, Some(2));
                assert_eq!(error.code, ErrorCode::Cancelled);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_line_is_malformed() {
        let mut reader = BufReader::new(std::io::Cursor::new({
            let mut bytes = vec![b'a'; MAX_LINE_BYTES + 10];
            bytes.extend_from_slice(b"\n{\"type\":\"Ping\"}\n");
            bytes
        }));
        let mut buf = Vec::new();

        let read = read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(read, MAX_LINE_BYTES + 1);
        assert!(decode_line::<Request>(std::str::from_utf8(&buf).unwrap()).is_err());

        buf.clear();
        read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"{\"type\":\"Ping\"}\n");
    }

    #[tokio::test]
    async fn test_oversized_tail_is_skipped_without_buffering() {
        const TAIL: u64 = 64 * 1024 * 1024;
        let ping = encode_line(&Request::Ping).unwrap();
        let source = tokio::io::repeat(b'a')
            .take(MAX_LINE_BYTES as u64 + TAIL)
            .chain(&b"\n"[..])
            .chain(ping.as_bytes());
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();

        let read = read_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(read, MAX_LINE_BYTES + 1);
        assert_eq!(buf.len(), MAX_LINE_BYTES + 1);

        buf.clear();
        read_line(&mut reader, &mut buf).await.unwrap();
        let request: Request = decode_line(std::str::from_utf8(&buf).unwrap()).unwrap();
        assert_eq!(request, Request::Ping);
    }

    #[tokio::test]
    async fn test_skip_line_stops_after_newline() {
        let mut reader = BufReader::with_capacity(4, &b"abcdefghij\nrest"[..]);

        assert_eq!(skip_line(&mut reader).await.unwrap(), 11);
        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "rest");

        // End of input without a newline
        let mut reader = BufReader::new(&b"no newline"[..]);
        assert_eq!(skip_line(&mut reader).await.unwrap(), 10);
    }
}
