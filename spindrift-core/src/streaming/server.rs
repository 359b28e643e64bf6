//! Local HTTP stream server.
//!
//! Serves the target file progressively over loopback so any media player
//! can read it like a static download. Every GET gets a response no matter
//! which path it names; seeks arrive as Range requests and are satisfied
//! as soon as the swarm has downloaded the covering pieces.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, stream};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::HttpConfig;
use crate::media::TargetFile;
use crate::streaming::log_gate::LogGates;
use crate::streaming::range::parse_range_header;
use crate::swarm::{SwarmClient, SwarmError};

/// Errors surfaced by the stream server.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to bind stream server on {address}: {reason}")]
    BindFailed { address: SocketAddr, reason: String },

    #[error("Stream server did not stop within {grace:?}")]
    ShutdownTimedOut { grace: Duration },
}

/// Shared state for all stream requests.
#[derive(Clone)]
struct StreamState {
    swarm: Arc<dyn SwarmClient>,
    target: Arc<TargetFile>,
    config: HttpConfig,
    gates: Arc<LogGates>,
}

/// Handle to the running stream server.
///
/// Bound eagerly so a busy port fails the session before the player
/// is launched.
pub struct StreamServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
}

impl StreamServer {
    /// Binds the loopback listener and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// - `StreamError::BindFailed` - Port is busy or the listener address
    ///   cannot be resolved
    pub async fn bind(
        config: HttpConfig,
        swarm: Arc<dyn SwarmClient>,
        target: TargetFile,
    ) -> Result<Self, StreamError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| StreamError::BindFailed {
                address,
                reason: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StreamError::BindFailed {
                address,
                reason: e.to_string(),
            })?;

        let state = StreamState {
            swarm,
            target: Arc::new(target),
            config,
            gates: Arc::new(LogGates::default()),
        };

        let app = Router::new()
            .fallback(stream_video)
            .layer(CorsLayer::permissive())
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Stream server error: {e}");
            }
        });

        tracing::info!("Stream server listening on http://{local_addr}");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            serve_task: Some(serve_task),
        })
    }

    /// Address the listener actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL media players read the stream from.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Closes the listener and waits for the accept loop to stop.
    ///
    /// In-flight responses get `grace` to drain. A player holding an open
    /// body past that is cut off so teardown can continue.
    ///
    /// # Errors
    ///
    /// - `StreamError::ShutdownTimedOut` - Open connections outlived the
    ///   grace period and the serve task was aborted
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), StreamError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.serve_task.take() {
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Stream server task ended abnormally: {e}"),
                Err(_) => {
                    task.abort();
                    return Err(StreamError::ShutdownTimedOut { grace });
                }
            }
        }

        Ok(())
    }
}

/// Catch-all handler: any GET path streams the target file.
async fn stream_video(
    State(state): State<StreamState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    serve_range(state, &headers).await
}

/// Builds the 200/206/416 response for a GET.
async fn serve_range(state: StreamState, headers: &HeaderMap) -> Response {
    let file_length = state.target.length;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    // An absent or unparseable Range header serves the whole file.
    let resolved = match range_header.and_then(parse_range_header) {
        None => None,
        Some(spec) => match spec.resolve(file_length) {
            Ok(range) => Some(range),
            Err(e) => {
                tracing::debug!("Rejecting range request: {e}");
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(
                        header::CONTENT_RANGE,
                        HeaderValue::from_str(&format!("bytes */{file_length}"))
                            .unwrap_or_else(|_| HeaderValue::from_static("bytes */0")),
                    )],
                )
                    .into_response();
            }
        },
    };

    let (status, start, length, content_range) = match resolved {
        Some(range) => (
            StatusCode::PARTIAL_CONTENT,
            range.start,
            range.length(),
            Some(format!("bytes {}-{}/{}", range.start, range.end, file_length)),
        ),
        None => (StatusCode::OK, 0, file_length, None),
    };

    // Nudge the swarm toward the requested bytes before the body starts.
    if let Err(e) = state
        .swarm
        .prioritize(state.target.index, start..start + length)
        .await
    {
        tracing::trace!("Range prioritization hint failed: {e}");
    }

    let body = range_body(&state, start, length);

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, state.target.content_type())
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=3600");

    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Assembles the guarded, chunked body for one response.
fn range_body(state: &StreamState, start: u64, length: u64) -> Body {
    let stream = chunk_stream(
        Arc::clone(&state.swarm),
        state.target.index,
        start,
        length,
        state.config.chunk_size,
        state.config.read_timeout,
        Arc::clone(&state.gates),
    );

    Body::from_stream(AbortGuard::new(Box::pin(stream), Arc::clone(&state.gates)))
}

/// Yields the byte range as a sequence of swarm reads.
///
/// Each chunk read blocks until its pieces have arrived, so response
/// headers go out immediately while the body trickles at download speed.
fn chunk_stream(
    swarm: Arc<dyn SwarmClient>,
    file_index: usize,
    start: u64,
    length: u64,
    chunk_size: usize,
    read_timeout: Option<Duration>,
    gates: Arc<LogGates>,
) -> impl Stream<Item = Result<Bytes, io::Error>> {
    stream::unfold(
        (swarm, start, start + length, 0u64),
        move |(swarm, start, end, offset)| {
            let gates = Arc::clone(&gates);
            async move {
                if offset >= end - start {
                    return None;
                }

                let chunk_start = start + offset;
                let chunk_len = std::cmp::min(chunk_size as u64, end - chunk_start) as usize;

                let read = swarm.read_at(file_index, chunk_start, chunk_len);
                let result = match read_timeout {
                    Some(deadline) => match tokio::time::timeout(deadline, read).await {
                        Ok(result) => result,
                        Err(_) => Err(SwarmError::ReadFailed {
                            offset: chunk_start,
                            reason: format!("no data within {deadline:?}"),
                        }),
                    },
                    None => read.await,
                };

                match result {
                    Ok(bytes) => {
                        let bytes_len = bytes.len() as u64;
                        Some((Ok(bytes), (swarm, start, end, offset + bytes_len)))
                    }
                    Err(e) => {
                        if gates.read_failure.first() {
                            tracing::warn!(
                                "Swarm read failed mid-stream: {e} (later failures log at trace)"
                            );
                        } else {
                            tracing::trace!("Swarm read failed mid-stream: {e}");
                        }
                        Some((
                            Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                            (swarm, start, end, offset),
                        ))
                    }
                }
            }
        },
    )
}

/// Body stream wrapper that notices when a client walks away.
///
/// Hyper drops the body stream when the peer disconnects mid-response,
/// which is routine for seeking players. The drop before the final chunk
/// is the only abort signal this stack gets.
struct AbortGuard<S> {
    inner: S,
    finished: bool,
    gates: Arc<LogGates>,
}

impl<S> AbortGuard<S> {
    fn new(inner: S, gates: Arc<LogGates>) -> Self {
        Self {
            inner,
            finished: false,
            gates,
        }
    }
}

impl<S> Stream for AbortGuard<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        match &poll {
            // An error ends the body as far as hyper is concerned.
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => self.finished = true,
            _ => {}
        }
        poll
    }
}

impl<S> Drop for AbortGuard<S> {
    fn drop(&mut self) {
        if !self.finished {
            if self.gates.client_abort.first() {
                tracing::debug!("Client dropped the stream mid-body (later aborts log at trace)");
            } else {
                tracing::trace!("Client dropped the stream mid-body");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Range;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::StreamExt;
    use tokio::sync::broadcast;

    use super::*;
    use crate::swarm::{SwarmEvent, SwarmFile, SwarmStats};

    // In-file test double; the full simulation client lives in spindrift-sim.
    struct TestSwarm {
        data: Bytes,
        fail_next: AtomicBool,
        stall_reads: bool,
        prioritized: Mutex<Vec<Range<u64>>>,
        events: broadcast::Sender<SwarmEvent>,
    }

    impl TestSwarm {
        fn new(data: Bytes) -> Self {
            let (events, _) = broadcast::channel(1);
            Self {
                data,
                fail_next: AtomicBool::new(false),
                stall_reads: false,
                prioritized: Mutex::new(Vec::new()),
                events,
            }
        }

        fn stalled(data: Bytes) -> Self {
            Self {
                stall_reads: true,
                ..Self::new(data)
            }
        }
    }

    #[async_trait::async_trait]
    impl SwarmClient for TestSwarm {
        async fn files(&self) -> Result<Vec<SwarmFile>, SwarmError> {
            Ok(vec![SwarmFile {
                index: 0,
                name: "movie.mp4".to_string(),
                length: self.data.len() as u64,
            }])
        }

        async fn stats(&self, _file_index: usize) -> Result<SwarmStats, SwarmError> {
            Ok(SwarmStats::default())
        }

        async fn read_at(
            &self,
            _file_index: usize,
            offset: u64,
            length: usize,
        ) -> Result<Bytes, SwarmError> {
            if self.stall_reads {
                std::future::pending::<()>().await;
            }
            if self.fail_next.swap(false, Ordering::AcqRel) {
                return Err(SwarmError::ReadFailed {
                    offset,
                    reason: "simulated failure".to_string(),
                });
            }
            let start = offset as usize;
            Ok(self.data.slice(start..start + length))
        }

        async fn prioritize(
            &self,
            _file_index: usize,
            range: Range<u64>,
        ) -> Result<(), SwarmError> {
            self.prioritized.lock().unwrap().push(range);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
            self.events.subscribe()
        }

        async fn shutdown(&self) -> Result<(), SwarmError> {
            Ok(())
        }
    }

    fn test_state(swarm: Arc<TestSwarm>) -> StreamState {
        let length = swarm.data.len() as u64;
        StreamState {
            swarm,
            target: Arc::new(TargetFile {
                index: 0,
                name: "movie.mp4".to_string(),
                length,
            }),
            config: HttpConfig::default(),
            gates: Arc::new(LogGates::default()),
        }
    }

    #[tokio::test]
    async fn test_full_file_request() {
        let data = Bytes::from((0..100u8).collect::<Vec<_>>());
        let swarm = Arc::new(TestSwarm::new(data.clone()));
        let response = serve_range(test_state(Arc::clone(&swarm)), &HeaderMap::new()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "100"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
        assert_eq!(
            response.headers().get(header::ACCEPT_RANGES).unwrap(),
            "bytes"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, data);

        // The full-file request still registered a priority hint
        assert_eq!(swarm.prioritized.lock().unwrap().as_slice(), &[0..100]);
    }

    #[tokio::test]
    async fn test_range_request() {
        let data = Bytes::from((0..100u8).collect::<Vec<_>>());
        let swarm = Arc::new(TestSwarm::new(data));

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=10-19"));
        let response = serve_range(test_state(swarm), &headers).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "10"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 10-19/100"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, vec![10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
    }

    #[tokio::test]
    async fn test_suffix_range_request() {
        let data = Bytes::from((0..100u8).collect::<Vec<_>>());
        let swarm = Arc::new(TestSwarm::new(data));

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=-10"));
        let response = serve_range(test_state(swarm), &headers).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 90-99/100"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, vec![90, 91, 92, 93, 94, 95, 96, 97, 98, 99]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let data = Bytes::from(vec![0u8; 100]);
        let swarm = Arc::new(TestSwarm::new(data));

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=150-200"));
        let response = serve_range(test_state(swarm), &headers).await;

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */100"
        );
    }

    #[tokio::test]
    async fn test_malformed_range_serves_full_file() {
        let data = Bytes::from(vec![7u8; 50]);
        let swarm = Arc::new(TestSwarm::new(data.clone()));

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=oops"));
        let response = serve_range(test_state(swarm), &headers).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "50"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn test_zero_length_file() {
        let swarm = Arc::new(TestSwarm::new(Bytes::new()));

        let response = serve_range(test_state(Arc::clone(&swarm)), &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "0");
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        assert!(body.is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-"));
        let response = serve_range(test_state(swarm), &headers).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */0"
        );
    }

    #[tokio::test]
    async fn test_non_get_method_rejected() {
        let swarm = Arc::new(TestSwarm::new(Bytes::from(vec![0u8; 10])));

        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let response = stream_video(
                State(test_state(Arc::clone(&swarm))),
                method.clone(),
                HeaderMap::new(),
            )
            .await;
            assert_eq!(
                response.status(),
                StatusCode::METHOD_NOT_ALLOWED,
                "method {method} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_read_failure_terminates_body_and_gates_log() {
        let data = Bytes::from(vec![0u8; 100]);
        let swarm = Arc::new(TestSwarm::new(data));
        swarm.fail_next.store(true, Ordering::Release);

        let state = test_state(Arc::clone(&swarm));
        let gates = Arc::clone(&state.gates);
        let response = serve_range(state, &HeaderMap::new()).await;

        // Headers promise the full file but the body errors out.
        assert_eq!(response.status(), StatusCode::OK);
        let result = axum::body::to_bytes(response.into_body(), 1024).await;
        assert!(result.is_err());
        assert!(gates.read_failure.has_fired());
    }

    #[tokio::test]
    async fn test_read_timeout_surfaces_error() {
        let swarm: Arc<dyn SwarmClient> =
            Arc::new(TestSwarm::stalled(Bytes::from(vec![0u8; 100])));
        let gates = Arc::new(LogGates::default());

        let mut stream = Box::pin(chunk_stream(
            swarm,
            0,
            0,
            100,
            64,
            Some(Duration::from_millis(10)),
            Arc::clone(&gates),
        ));

        let first = stream.next().await;
        assert!(matches!(first, Some(Err(_))));
        assert!(gates.read_failure.has_fired());
    }

    #[tokio::test]
    async fn test_abort_guard_fires_gate_on_early_drop() {
        let swarm: Arc<dyn SwarmClient> = Arc::new(TestSwarm::new(Bytes::from(vec![0u8; 1024])));
        let gates = Arc::new(LogGates::default());

        let stream = chunk_stream(Arc::clone(&swarm), 0, 0, 1024, 64, None, Arc::clone(&gates));
        let mut guarded = AbortGuard::new(Box::pin(stream), Arc::clone(&gates));

        // Consume one chunk, then walk away mid-body.
        let first = guarded.next().await;
        assert!(matches!(first, Some(Ok(_))));
        drop(guarded);

        assert!(gates.client_abort.has_fired());
    }

    #[tokio::test]
    async fn test_abort_guard_quiet_on_completion() {
        let swarm: Arc<dyn SwarmClient> = Arc::new(TestSwarm::new(Bytes::from(vec![0u8; 64])));
        let gates = Arc::new(LogGates::default());

        let stream = chunk_stream(Arc::clone(&swarm), 0, 0, 64, 64, None, Arc::clone(&gates));
        let mut guarded = AbortGuard::new(Box::pin(stream), Arc::clone(&gates));

        while guarded.next().await.is_some() {}
        drop(guarded);

        assert!(!gates.client_abort.has_fired());
    }
}
