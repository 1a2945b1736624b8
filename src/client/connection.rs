//! Client batch connection.
//!
//! # Responsibilities
//! - Open the single outbound stream lazily and write the preamble
//! - Assign Content-IDs and frame each item in send order
//! - Feed the inbound stream to the parser and resolve pending replies
//! - Fail every pending reply when the transport dies
//!
//! # Lifecycle
//! ```text
//! AwaitingPreamble → Streaming     server preamble received
//! Streaming → Draining             close() with replies outstanding
//! Draining → Closed                last pending reply resolved
//! any → Closed                     transport error or stream end
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::{stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::client::{BatchError, BatchItem, ClientError, Reply};
use crate::config::ClientConfig;
use crate::protocol::{framing, Boundary, ConnectionState, ParseEvent, PartParser, ReplyPart, StatusBlock};

type ReplySender = oneshot::Sender<Result<Reply, BatchError>>;

/// One logical batch exchange with a batch endpoint.
///
/// Closes itself when dropped. Methods that open the stream must be called
/// from within a Tokio runtime.
#[derive(Debug)]
pub struct BatchConnection {
    url: Url,
    headers: HeaderMap,
    http: reqwest::Client,
    shared: Arc<Mutex<Shared>>,
}

#[derive(Debug)]
struct Shared {
    state: ConnectionState,
    accepting: bool,
    sent_items: u64,
    pending: HashMap<u64, ReplySender>,
    outbound: Option<Outbound>,
}

#[derive(Debug)]
struct Outbound {
    boundary: Boundary,
    tx: mpsc::UnboundedSender<String>,
}

impl BatchConnection {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client for the outer batch request.
    pub fn with_client(config: &ClientConfig, http: reqwest::Client) -> Result<Self, ClientError> {
        if config.url.trim().is_empty() {
            return Err(ClientError::MissingUrl);
        }
        let url = Url::parse(&config.url)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            url,
            headers,
            http,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::AwaitingPreamble,
                accepting: true,
                sent_items: 0,
                pending: HashMap::new(),
                outbound: None,
            })),
        })
    }

    /// Open the outbound stream if it is not open yet.
    ///
    /// Returns the boundary of the live stream.
    pub fn connect(&self) -> Result<Boundary, ClientError> {
        let mut shared = self.lock();
        if !shared.accepting {
            return Err(ClientError::Closed);
        }
        Ok(self.open_stream(&mut shared).boundary.clone())
    }

    /// Send an item and wait for its reply through the returned handle.
    ///
    /// After `close` the handle resolves to [`BatchError::Closed`] and nothing
    /// is written. Only an invalid item is reported synchronously.
    pub fn send(&self, item: BatchItem) -> Result<PendingReply, ClientError> {
        item.validate()?;
        let (tx, rx) = oneshot::channel();

        let mut shared = self.lock();
        if !shared.accepting {
            drop(shared);
            let _ = tx.send(Err(BatchError::Closed));
            return Ok(PendingReply { content_id: None, rx });
        }

        match self.write_item(&mut shared, &item) {
            Ok(content_id) => {
                shared.pending.insert(content_id, tx);
                Ok(PendingReply {
                    content_id: Some(content_id),
                    rx,
                })
            }
            Err(error) => {
                drop(shared);
                let _ = tx.send(Err(error));
                Ok(PendingReply { content_id: None, rx })
            }
        }
    }

    /// Send an item and hand its outcome to `callback` once it arrives.
    pub fn send_with<F>(&self, item: BatchItem, callback: F) -> Result<(), ClientError>
    where
        F: FnOnce(Result<Reply, BatchError>) + Send + 'static,
    {
        let pending = self.send(item)?;
        tokio::spawn(async move { callback(pending.await) });
        Ok(())
    }

    /// Fire-and-forget: the item is written but its reply is discarded.
    ///
    /// Returns the assigned Content-ID, or `None` if nothing was written.
    pub fn send_detached(&self, item: BatchItem) -> Result<Option<u64>, ClientError> {
        item.validate()?;
        let mut shared = self.lock();
        if !shared.accepting {
            tracing::debug!(path = %item.path, "Dropping detached item sent after close");
            return Ok(None);
        }
        Ok(self.write_item(&mut shared, &item).ok())
    }

    /// Stop accepting sends and write the terminal boundary. Idempotent.
    pub fn close(&self) {
        close_shared(&mut self.lock());
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Replies still awaited.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        !self.lock().accepting
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    fn write_item(&self, shared: &mut Shared, item: &BatchItem) -> Result<u64, BatchError> {
        shared.sent_items += 1;
        let content_id = shared.sent_items;

        let outbound = self.open_stream(shared);
        let frame = framing::request_part(
            &outbound.boundary,
            content_id,
            &item.method.to_ascii_uppercase(),
            &item.path,
            item.body_text().as_deref(),
        );
        outbound
            .tx
            .send(frame)
            .map_err(|_| BatchError::ConnectionLost)?;

        tracing::trace!(boundary = %outbound.boundary, content_id, "Item written");
        Ok(content_id)
    }

    fn open_stream<'a>(&self, shared: &'a mut Shared) -> &'a Outbound {
        shared.outbound.get_or_insert_with(|| self.spawn_exchange())
    }

    fn spawn_exchange(&self) -> Outbound {
        let boundary = Boundary::generate();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        // The receiver is alive until the exchange task ends.
        let _ = tx.send(framing::PREAMBLE.to_string());

        let body = reqwest::Body::wrap_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        }));
        let request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, boundary.content_type())
            .body(body);

        tracing::debug!(boundary = %boundary, url = %self.url, "Opening batch connection");
        tokio::spawn(exchange(request, boundary.clone(), Arc::clone(&self.shared)));

        Outbound { boundary, tx }
    }
}

impl Drop for BatchConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to one reply. Resolves exactly once.
#[derive(Debug)]
#[must_use = "a pending reply does nothing unless awaited"]
pub struct PendingReply {
    content_id: Option<u64>,
    rx: oneshot::Receiver<Result<Reply, BatchError>>,
}

impl PendingReply {
    /// Content-ID assigned to the item, if it was written.
    pub fn content_id(&self) -> Option<u64> {
        self.content_id
    }
}

impl Future for PendingReply {
    type Output = Result<Reply, BatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(BatchError::ConnectionLost)))
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn close_shared(shared: &mut Shared) {
    if !shared.accepting {
        return;
    }
    shared.accepting = false;

    if let Some(outbound) = shared.outbound.take() {
        let _ = outbound.tx.send(framing::terminator(&outbound.boundary));
        tracing::debug!(
            boundary = %outbound.boundary,
            pending = shared.pending.len(),
            "Closing batch connection"
        );
    }

    shared.state = if shared.pending.is_empty() {
        ConnectionState::Closed
    } else {
        ConnectionState::Draining
    };
}

/// Drive one outer request: send it, then parse replies until the stream ends.
async fn exchange(request: reqwest::RequestBuilder, boundary: Boundary, shared: Arc<Mutex<Shared>>) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(boundary = %boundary, error = %e, "Batch request failed");
            fail_pending(&shared, BatchError::Transport(e.to_string()));
            return;
        }
    };

    if response.status() != StatusCode::OK {
        let status = response.status().as_u16();
        tracing::error!(boundary = %boundary, status, "Batch endpoint rejected the connection");
        fail_pending(&shared, BatchError::Rejected(status));
        return;
    }

    let mut parser = PartParser::<StatusBlock>::new(&boundary);
    let mut chunks = response.bytes_stream();
    loop {
        let ended = match chunks.next().await {
            Some(Ok(chunk)) => {
                parser.feed(&chunk);
                false
            }
            Some(Err(e)) => {
                tracing::error!(boundary = %boundary, error = %e, "Batch stream failed");
                fail_pending(&shared, BatchError::Transport(e.to_string()));
                return;
            }
            None => {
                parser.finish_input();
                true
            }
        };

        while let Some(event) = parser.next_event() {
            handle_event(&shared, &boundary, event);
        }

        if ended {
            break;
        }
    }

    fail_pending(&shared, BatchError::ConnectionLost);
}

fn handle_event(shared: &Mutex<Shared>, boundary: &Boundary, event: ParseEvent<StatusBlock>) {
    match event {
        ParseEvent::Preamble(_) => {
            let mut shared = lock(shared);
            if shared.state == ConnectionState::AwaitingPreamble {
                shared.state = ConnectionState::Streaming;
            }
        }
        ParseEvent::Part(part) => resolve(shared, boundary, part),
        ParseEvent::Malformed(error) => {
            tracing::warn!(boundary = %boundary, error = %error, "Dropping malformed reply line");
        }
        ParseEvent::End => {
            tracing::debug!(boundary = %boundary, "Server finished the batch");
            close_shared(&mut lock(shared));
        }
    }
}

fn resolve(shared: &Mutex<Shared>, boundary: &Boundary, part: ReplyPart) {
    let Some(content_id) = part.content_id().and_then(|id| id.trim().parse::<u64>().ok()) else {
        tracing::warn!(boundary = %boundary, "Reply without a usable Content-ID");
        return;
    };

    let mut guard = lock(shared);
    let Some(tx) = guard.pending.remove(&content_id) else {
        tracing::trace!(boundary = %boundary, content_id, "Reply for an untracked item");
        return;
    };
    if !guard.accepting && guard.pending.is_empty() {
        guard.state = ConnectionState::Closed;
    }
    drop(guard);

    let _ = tx.send(Ok(Reply::from_part(content_id, part)));
}

/// Transport-level failure: the connection is unusable from here on.
fn fail_pending(shared: &Mutex<Shared>, error: BatchError) {
    let pending = {
        let mut guard = lock(shared);
        guard.accepting = false;
        guard.outbound = None;
        guard.state = ConnectionState::Closed;
        std::mem::take(&mut guard.pending)
    };

    if !pending.is_empty() {
        tracing::warn!(pending = pending.len(), error = %error, "Failing pending replies");
    }
    for (_, tx) in pending {
        let _ = tx.send(Err(error.clone()));
    }
}
