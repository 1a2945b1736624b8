//! Per-connection batch dispatcher.
//!
//! # Responsibilities
//! - Parse inbound chunks into request parts
//! - Dispatch parts as sub-requests, at most `parallel_limit` at a time
//! - Halt intake while the undispatched backlog exceeds the limit
//! - Retry failed sub-requests with escalating backoff
//! - Write one reply per part as it completes
//! - Write the terminal boundary exactly once
//!
//! # Design Decisions
//! - One task owns all connection state: parser, backlog, in-flight set
//! - Sub-requests run in a `JoinSet`; completion order is unconstrained
//! - Intake is halted by not polling the inbound stream
//! - The stream ends only when the client has finished AND no work remains

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::Instrument;
use url::Url;

use crate::config::BatchConfig;
use crate::observability::metrics;
use crate::protocol::{
    framing, Boundary, ConnectionState, ParseEvent, PartParser, RequestBlock, RequestPart,
};
use crate::resilience::RetryPolicy;
use crate::server::downstream::{Downstream, DownstreamError, SubRequest, SubResponse};

/// Outer request headers never forwarded to sub-requests.
const NOT_FORWARDED: [HeaderName; 6] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONTENT_TYPE,
    header::CONNECTION,
    header::EXPECT,
];

/// Why a dispatcher stopped before writing the terminal boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("inbound stream failed: {0}")]
    Inbound(String),

    #[error("inbound stream ended before the terminal boundary")]
    PrematureEnd,

    #[error("outbound stream closed by the peer")]
    SinkClosed,
}

/// Settings and collaborators shared by every sub-request of one connection.
pub(crate) struct DispatchContext {
    pub(crate) config: Arc<BatchConfig>,
    pub(crate) downstream: Arc<dyn Downstream>,
    pub(crate) retry: RetryPolicy,
    /// `host[:port]` sub-requests are sent to.
    pub(crate) authority: Option<String>,
    /// Forwardable headers of the outer request.
    pub(crate) base_headers: HeaderMap,
}

impl DispatchContext {
    pub(crate) fn new(
        config: Arc<BatchConfig>,
        downstream: Arc<dyn Downstream>,
        request_headers: &HeaderMap,
    ) -> Self {
        let authority = config.upstream.clone().or_else(|| {
            request_headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        let mut base_headers = request_headers.clone();
        for name in &NOT_FORWARDED {
            base_headers.remove(name);
        }

        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            downstream,
            authority,
            base_headers,
        }
    }

    fn logging(&self) -> bool {
        self.config.logging
    }
}

/// Result of one part, ready to be framed.
#[derive(Debug)]
struct Completed {
    content_id: Option<String>,
    outcome: Result<SubResponse, PartFailure>,
}

/// A part that produced no downstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PartFailure {
    status: StatusCode,
    message: String,
}

impl PartFailure {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn upstream(error: &DownstreamError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: error.to_string(),
        }
    }
}

/// Drives one batch connection from first inbound byte to terminal boundary.
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
    boundary: Boundary,
    sink: mpsc::Sender<Bytes>,
    state: ConnectionState,
    backlog: VecDeque<RequestPart>,
    in_flight: JoinSet<Completed>,
    paused: bool,
    client_finished: bool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("boundary", &self.boundary)
            .field("state", &self.state)
            .field("backlog", &self.backlog.len())
            .field("in_flight", &self.in_flight.len())
            .field("paused", &self.paused)
            .finish()
    }
}

impl Dispatcher {
    pub(crate) fn new(ctx: Arc<DispatchContext>, boundary: Boundary, sink: mpsc::Sender<Bytes>) -> Self {
        Self {
            ctx,
            boundary,
            sink,
            state: ConnectionState::AwaitingPreamble,
            backlog: VecDeque::new(),
            in_flight: JoinSet::new(),
            paused: false,
            client_finished: false,
        }
    }

    /// Consume `inbound` and write replies to the sink until the exchange ends.
    ///
    /// The sink is dropped on return, which ends the outbound stream.
    pub async fn run<S, B, E>(mut self, inbound: S) -> Result<(), DispatchError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        metrics::record_connection();
        let mut inbound = std::pin::pin!(inbound);
        let mut parser = PartParser::<RequestBlock>::new(&self.boundary);

        self.write(framing::PREAMBLE.to_string()).await?;

        loop {
            self.admit();

            if self.client_finished && self.backlog.is_empty() && self.in_flight.is_empty() {
                return self.finish().await;
            }

            let reading = !self.paused && !self.client_finished;
            tokio::select! {
                chunk = inbound.next(), if reading => match chunk {
                    Some(Ok(data)) => {
                        parser.feed(data.as_ref());
                        self.drain(&mut parser);
                    }
                    Some(Err(e)) => return Err(self.abort(DispatchError::Inbound(e.to_string()))),
                    None => {
                        parser.finish_input();
                        self.drain(&mut parser);
                        if !self.client_finished {
                            return Err(self.abort(DispatchError::PrematureEnd));
                        }
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok(completed) => self.reply(completed).await?,
                        Err(e) => {
                            metrics::in_flight_finished(1);
                            tracing::error!(error = %e, "Sub-request task failed, its reply is lost");
                        }
                    }
                },
                else => return Err(self.abort(DispatchError::PrematureEnd)),
            }
        }
    }

    fn drain(&mut self, parser: &mut PartParser<RequestBlock>) {
        while let Some(event) = parser.next_event() {
            match event {
                ParseEvent::Preamble(_) => self.state = ConnectionState::Streaming,
                ParseEvent::Part(part) => self.backlog.push_back(part),
                ParseEvent::Malformed(error) => {
                    if self.ctx.logging() {
                        tracing::warn!(boundary = %self.boundary, error = %error, "Dropping malformed line");
                    }
                }
                ParseEvent::End => {
                    self.client_finished = true;
                    self.state = ConnectionState::Draining;
                    if self.ctx.logging() {
                        tracing::debug!(
                            boundary = %self.boundary,
                            backlog = self.backlog.len(),
                            in_flight = self.in_flight.len(),
                            "Client finished sending"
                        );
                    }
                }
            }
        }
    }

    /// Dispatch up to the limit, then halt or resume intake.
    fn admit(&mut self) {
        let limit = self.ctx.config.parallel_limit;
        while self.in_flight.len() < limit {
            let Some(part) = self.backlog.pop_front() else {
                break;
            };
            self.dispatch(part);
        }

        let backlog = self.backlog.len();
        if !self.paused && backlog > limit {
            self.paused = true;
            if self.ctx.logging() {
                tracing::info!(boundary = %self.boundary, backlog, "Pausing intake");
            }
        } else if self.paused && backlog < limit {
            self.paused = false;
            if self.ctx.logging() {
                tracing::info!(boundary = %self.boundary, backlog, "Resuming intake");
            }
        }
    }

    fn dispatch(&mut self, part: RequestPart) {
        if self.ctx.logging() {
            tracing::info!(
                boundary = %self.boundary,
                content_id = part.content_id().unwrap_or("-"),
                "Processing part"
            );
        }
        metrics::in_flight_started();
        let ctx = Arc::clone(&self.ctx);
        self.in_flight
            .spawn(execute(ctx, part).instrument(tracing::Span::current()));
    }

    async fn reply(&mut self, completed: Completed) -> Result<(), DispatchError> {
        metrics::in_flight_finished(1);
        let content_id = completed.content_id.as_deref();
        let frame = match &completed.outcome {
            Ok(response) => {
                metrics::record_part(if response.is_success() { "success" } else { "error_status" });
                framing::reply_part(
                    &self.boundary,
                    content_id,
                    response.status,
                    &response.headers,
                    &response.body,
                )
            }
            Err(failure) => {
                metrics::record_part("failure");
                framing::reply_part(
                    &self.boundary,
                    content_id,
                    failure.status.as_u16(),
                    &[],
                    &failure.message,
                )
            }
        };
        self.write(frame).await
    }

    async fn finish(&mut self) -> Result<(), DispatchError> {
        self.write(framing::terminator(&self.boundary)).await?;
        self.state = ConnectionState::Closed;
        if self.ctx.logging() {
            tracing::info!(boundary = %self.boundary, "Batch complete");
        }
        Ok(())
    }

    async fn write(&mut self, frame: String) -> Result<(), DispatchError> {
        if self.sink.send(Bytes::from(frame)).await.is_err() {
            return Err(self.abort(DispatchError::SinkClosed));
        }
        Ok(())
    }

    fn abort(&mut self, error: DispatchError) -> DispatchError {
        metrics::in_flight_finished(self.in_flight.len());
        self.in_flight.abort_all();
        self.backlog.clear();
        self.state = ConnectionState::Closed;
        if self.ctx.logging() {
            tracing::error!(boundary = %self.boundary, error = %error, "Batch connection aborted");
        }
        error
    }
}

/// Run one part to completion, retrying within the budget.
async fn execute(ctx: Arc<DispatchContext>, part: RequestPart) -> Completed {
    let content_id = part.content_id().map(str::to_string);
    let label = content_id.clone().unwrap_or_else(|| "-".to_string());

    let request = match prepare(&ctx, &part) {
        Ok(request) => request,
        Err(failure) => {
            if ctx.logging() {
                tracing::error!(content_id = %label, error = %failure.message, "Rejecting part");
            }
            return Completed {
                content_id,
                outcome: Err(failure),
            };
        }
    };

    let mut attempt = 1;
    loop {
        let started = Instant::now();
        let result = match tokio::time::timeout(request.timeout, ctx.downstream.call(request.clone())).await {
            Ok(result) => result,
            Err(_) => Err(DownstreamError::Timeout(request.timeout)),
        };
        metrics::record_sub_request(result.as_ref().ok().map(|r| r.status), started);

        let outcome = match result {
            Ok(response) if response.is_success() => {
                return Completed {
                    content_id,
                    outcome: Ok(response),
                };
            }
            other => other,
        };

        let reason = match &outcome {
            Ok(response) => format!("status {}", response.status),
            Err(error) => error.to_string(),
        };

        if ctx.retry.should_retry(attempt) {
            let delay = ctx.retry.delay(attempt);
            if ctx.logging() {
                tracing::warn!(
                    content_id = %label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Sub-request failed, retrying"
                );
            }
            metrics::record_retry();
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        if ctx.logging() {
            tracing::error!(content_id = %label, attempt, reason = %reason, "Sub-request failed");
        }
        return Completed {
            content_id,
            outcome: outcome.map_err(|error| PartFailure::upstream(&error)),
        };
    }
}

/// Build the sub-request for a part, or explain why it cannot be sent.
fn prepare(ctx: &DispatchContext, part: &RequestPart) -> Result<SubRequest, PartFailure> {
    let block = &part.message;
    if block.method.is_empty() || block.path.is_empty() {
        return Err(PartFailure::invalid("part has no request line"));
    }
    let method = Method::from_bytes(block.method.as_bytes())
        .map_err(|_| PartFailure::invalid(format!("invalid method {}", block.method)))?;

    let authority = ctx
        .authority
        .as_deref()
        .ok_or_else(|| PartFailure::invalid("no upstream host for sub-request"))?;
    let url = format!("{}://{}{}", ctx.config.protocol, authority, block.path);
    Url::parse(&url).map_err(|e| PartFailure::invalid(format!("invalid sub-request URL {}: {}", url, e)))?;

    let body = if part.body.is_empty() {
        None
    } else {
        let value = serde_json::from_str(&part.body)
            .map_err(|e| PartFailure::invalid(format!("part body is not JSON: {}", e)))?;
        Some(value)
    };

    Ok(SubRequest {
        method,
        url,
        headers: merge_headers(&ctx.base_headers, &block.headers),
        body,
        timeout: Duration::from_millis(ctx.config.timeout_ms),
    })
}

/// Outer request headers overridden by the part's own headers.
fn merge_headers(base: &HeaderMap, part_headers: &crate::protocol::HeaderFields) -> HeaderMap {
    let mut merged = base.clone();
    for (name, value) in part_headers {
        let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) else {
            tracing::debug!(header = %name, "Skipping unrepresentable part header");
            continue;
        };
        if name == header::TRANSFER_ENCODING || name == header::CONTENT_LENGTH {
            continue;
        }
        merged.insert(name, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use futures_util::future::{BoxFuture, FutureExt};
    use futures_util::stream;
    use tokio::sync::Semaphore;

    use crate::protocol::{ReplyPart, StatusBlock};

    #[derive(Default)]
    struct FakeDownstream {
        calls: Mutex<HashMap<String, u32>>,
        seen: Mutex<Vec<SubRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
        gate: Option<Arc<Semaphore>>,
        fail_first: u32,
        fail_status: u16,
        transport_error: bool,
    }

    impl FakeDownstream {
        fn calls_for(&self, url: &str) -> u32 {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    impl Downstream for FakeDownstream {
        fn call(&self, request: SubRequest) -> BoxFuture<'_, Result<SubResponse, DownstreamError>> {
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);

                if let Some(gate) = &self.gate {
                    let _permit = gate.acquire().await;
                }
                tokio::time::sleep(self.delay).await;

                let attempt = {
                    let mut calls = self.calls.lock().unwrap();
                    let count = calls.entry(request.url.clone()).or_default();
                    *count += 1;
                    *count
                };
                self.seen.lock().unwrap().push(request.clone());
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self.transport_error {
                    return Err(DownstreamError::Transport("boom".into()));
                }
                if attempt <= self.fail_first {
                    return Ok(SubResponse {
                        status: self.fail_status,
                        headers: vec![],
                        body: "nope".into(),
                    });
                }
                Ok(SubResponse {
                    status: 200,
                    headers: vec![("content-type".into(), "application/json".into())],
                    body: format!("{{\"url\":\"{}\"}}", request.url),
                })
            }
            .boxed()
        }
    }

    fn boundary() -> Boundary {
        Boundary::new("test-boundary").unwrap()
    }

    fn config(parallel_limit: usize, retries: u32) -> BatchConfig {
        BatchConfig {
            parallel_limit,
            retries,
            protocol: "http".into(),
            retry_jitter_ms: 0,
            retry_step_ms: 1,
            logging: false,
            ..BatchConfig::default()
        }
    }

    fn outer_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("downstream.test"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer X"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/mixed; boundary=x"));
        headers
    }

    fn dispatcher(config: BatchConfig, fake: &Arc<FakeDownstream>) -> (Dispatcher, mpsc::Receiver<Bytes>) {
        let downstream: Arc<dyn Downstream> = fake.clone();
        let ctx = Arc::new(DispatchContext::new(Arc::new(config), downstream, &outer_headers()));
        let (sink, rx) = mpsc::channel(4);
        (Dispatcher::new(ctx, boundary(), sink), rx)
    }

    /// Preamble, one chunk per part, terminator.
    fn request_chunks(parts: u64) -> Vec<String> {
        let boundary = boundary();
        let mut chunks = vec![framing::PREAMBLE.to_string()];
        chunks.extend((1..=parts).map(|id| {
            framing::request_part(&boundary, id, "POST", &format!("/items/{}", id), Some(r#"{"n":1}"#))
        }));
        chunks.push(framing::terminator(&boundary));
        chunks
    }

    async fn collect(mut rx: mpsc::Receiver<Bytes>) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).unwrap()
    }

    fn replies(output: &str) -> Vec<ReplyPart> {
        let mut parser = PartParser::<StatusBlock>::new(&boundary());
        parser.feed(output.as_bytes());
        parser.finish_input();
        std::iter::from_fn(|| parser.next_event())
            .filter_map(|event| match event {
                ParseEvent::Part(part) => Some(part),
                _ => None,
            })
            .collect()
    }

    fn ok_stream(chunks: Vec<String>) -> impl Stream<Item = Result<String, Infallible>> {
        stream::iter(chunks.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn replies_to_every_part_and_terminates_once() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, rx) = dispatcher(config(2, 0), &fake);

        let (result, output) = tokio::join!(dispatcher.run(ok_stream(request_chunks(5))), collect(rx));
        assert_eq!(result, Ok(()));

        let mut ids: Vec<u64> = replies(&output)
            .iter()
            .map(|p| p.content_id().unwrap().parse().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(output.matches("--test-boundary--").count(), 1);
        assert!(output.ends_with("\r\n--test-boundary--\r\n"));
        assert!(output.starts_with(framing::PREAMBLE));
    }

    #[tokio::test]
    async fn never_exceeds_parallel_limit() {
        let fake = Arc::new(FakeDownstream {
            delay: Duration::from_millis(5),
            ..FakeDownstream::default()
        });
        let (dispatcher, rx) = dispatcher(config(3, 0), &fake);

        let (result, output) = tokio::join!(dispatcher.run(ok_stream(request_chunks(20))), collect(rx));
        assert_eq!(result, Ok(()));
        assert_eq!(replies(&output).len(), 20);
        assert!(fake.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(fake.total_calls(), 20);
    }

    #[tokio::test]
    async fn pauses_intake_while_backlog_exceeds_limit() {
        let gate = Arc::new(Semaphore::new(0));
        let fake = Arc::new(FakeDownstream {
            gate: Some(gate.clone()),
            ..FakeDownstream::default()
        });
        let (dispatcher, rx) = dispatcher(config(2, 0), &fake);

        let chunks = request_chunks(20);
        let total = chunks.len();
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let inbound = ok_stream(chunks).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = tokio::spawn(dispatcher.run(inbound));
        let output = tokio::spawn(collect(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let pulled_while_blocked = pulled.load(Ordering::SeqCst);
        assert!(
            pulled_while_blocked < total,
            "intake should halt, pulled {} of {}",
            pulled_while_blocked,
            total
        );
        assert!(fake.max_in_flight.load(Ordering::SeqCst) <= 2);

        gate.add_permits(1_000);
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(pulled.load(Ordering::SeqCst), total);
        assert_eq!(replies(&output.await.unwrap()).len(), 20);
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let fake = Arc::new(FakeDownstream {
            fail_first: 2,
            fail_status: 503,
            ..FakeDownstream::default()
        });
        let (dispatcher, rx) = dispatcher(config(4, 3), &fake);

        let (result, output) = tokio::join!(dispatcher.run(ok_stream(request_chunks(3))), collect(rx));
        assert_eq!(result, Ok(()));

        let replies = replies(&output);
        assert_eq!(replies.len(), 3);
        assert!(replies.iter().all(|p| p.message.status == 200));
        assert_eq!(fake.calls_for("http://downstream.test/items/1"), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_reply_with_the_failing_status() {
        let fake = Arc::new(FakeDownstream {
            fail_first: u32::MAX,
            fail_status: 500,
            ..FakeDownstream::default()
        });
        let (dispatcher, rx) = dispatcher(config(4, 1), &fake);

        let (result, output) = tokio::join!(dispatcher.run(ok_stream(request_chunks(1))), collect(rx));
        assert_eq!(result, Ok(()));

        let replies = replies(&output);
        assert_eq!(replies[0].message.status, 500);
        assert_eq!(replies[0].body, "nope");
        assert_eq!(fake.calls_for("http://downstream.test/items/1"), 2);
    }

    #[tokio::test]
    async fn transport_errors_become_failure_replies() {
        let fake = Arc::new(FakeDownstream {
            transport_error: true,
            ..FakeDownstream::default()
        });
        let (dispatcher, rx) = dispatcher(config(4, 0), &fake);

        let (result, output) = tokio::join!(dispatcher.run(ok_stream(request_chunks(2))), collect(rx));
        assert_eq!(result, Ok(()));

        let replies = replies(&output);
        assert_eq!(replies.len(), 2);
        for reply in &replies {
            assert_eq!(reply.message.status, 502);
            assert_eq!(reply.message.status_message, "Bad Gateway");
            assert!(reply.body.contains("boom"));
        }
    }

    #[tokio::test]
    async fn does_not_terminate_before_the_client_finishes() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, mut rx) = dispatcher(config(2, 0), &fake);

        let mut chunks = request_chunks(3);
        let terminator = chunks.pop().unwrap();
        let (tx, inbound_rx) = mpsc::unbounded_channel::<Result<String, Infallible>>();
        for chunk in chunks {
            tx.send(Ok(chunk)).unwrap();
        }

        let inbound = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let handle = tokio::spawn(dispatcher.run(inbound));

        // Part 3 stays open until the terminator arrives.
        let mut seen = String::new();
        while seen.matches("Content-ID:").count() < 2 {
            let chunk = rx.recv().await.unwrap();
            seen.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "nothing may follow while the client is still sending");
        assert!(!seen.contains("--test-boundary--"));

        tx.send(Ok(terminator)).unwrap();
        assert_eq!(handle.await.unwrap(), Ok(()));
        let rest = collect(rx).await;
        assert_eq!(rest.matches("Content-ID: 3").count(), 1);
        assert!(rest.ends_with("\r\n--test-boundary--\r\n"));
    }

    #[tokio::test]
    async fn malformed_header_lines_do_not_drop_parts() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, rx) = dispatcher(config(2, 0), &fake);

        let chunks = vec![
            "\r\n--test-boundary\r\nContent-ID: 1\r\nthis is not a header\r\n\r\nGET /a HTTP/1.1\r\n??\r\n".to_string(),
            "\r\n--test-boundary\r\nContent-ID: 2\r\n\r\nGET /b HTTP/1.1\r\n".to_string(),
            "\r\n--test-boundary--\r\n".to_string(),
        ];
        let (result, output) = tokio::join!(dispatcher.run(ok_stream(chunks)), collect(rx));
        assert_eq!(result, Ok(()));
        assert_eq!(replies(&output).len(), 2);
        assert_eq!(fake.calls_for("http://downstream.test/a"), 1);
        assert_eq!(fake.calls_for("http://downstream.test/b"), 1);
    }

    #[tokio::test]
    async fn invalid_parts_fail_without_calling_downstream() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, rx) = dispatcher(config(2, 3), &fake);

        let chunks = vec![
            "--test-boundary\r\nContent-ID: 1\r\n\r\nPOST /a HTTP/1.1\r\n\r\nnot json\r\n".to_string(),
            "--test-boundary\r\nContent-ID: 2\r\n\r\n\r\n--test-boundary--\r\n".to_string(),
        ];
        let (result, output) = tokio::join!(dispatcher.run(ok_stream(chunks)), collect(rx));
        assert_eq!(result, Ok(()));

        let replies = replies(&output);
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|p| p.message.status == 400));
        assert_eq!(fake.total_calls(), 0);
    }

    #[tokio::test]
    async fn part_headers_override_outer_headers() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, rx) = dispatcher(config(2, 0), &fake);

        let chunks = vec![
            "--test-boundary\r\nContent-ID: 1\r\n\r\nPOST /a HTTP/1.1\r\nX-Trace: part\r\nTransfer-Encoding: chunked\r\nContent-Type: application/json\r\n\r\n{\"id\":\"OK\"}\r\n--test-boundary--\r\n".to_string(),
        ];
        let (result, _) = tokio::join!(dispatcher.run(ok_stream(chunks)), collect(rx));
        assert_eq!(result, Ok(()));

        let seen = fake.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers["authorization"], "Bearer X");
        assert_eq!(request.headers["x-trace"], "part");
        assert_eq!(request.headers["content-type"], "application/json");
        assert!(request.headers.get(header::HOST).is_none());
        assert!(request.headers.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(request.body, Some(serde_json::json!({"id": "OK"})));
    }

    #[tokio::test]
    async fn premature_end_aborts_without_terminator() {
        let fake = Arc::new(FakeDownstream::default());
        let (dispatcher, rx) = dispatcher(config(2, 0), &fake);

        let mut chunks = request_chunks(2);
        chunks.pop();
        let (result, output) = tokio::join!(dispatcher.run(ok_stream(chunks)), collect(rx));
        assert_eq!(result, Err(DispatchError::PrematureEnd));
        assert!(!output.contains("--test-boundary--"));
    }
}
