//! Request events, the streaming handle and client lifecycle events.
//!
//! Every request yields the sequence
//! `request → response → (metadata? → row*)? → (end | error)` on its
//! [`RequestHandle`]. At most one terminal event fires; after it, nothing
//! else does. The handle's `wait()` drains the sequence and resolves
//! strictly after the terminal event — the callback analogue.

use crate::error::Error;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Cache validator headers, surfaced verbatim from the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub expires: Option<String>,
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    /// True for a 304 response; the body is discarded.
    pub not_modified: bool,
    pub headers: CacheHeaders,
}

/// The HTTP response augmented with cache information and, in buffered
/// mode, the parsed JSON body.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cache_info: CacheInfo,
    /// Raw body bytes. Empty in streaming mode and for 304 responses.
    pub raw: Bytes,
    /// Parsed body, when the content type is JSON-shaped.
    pub body: Option<Value>,
}

/// Low-level request descriptor: what actually goes on the wire. The
/// preprocess hook may mutate it before dispatch.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug)]
pub enum RequestEvent {
    /// Fired once per dispatch attempt (retries included).
    Request(RequestDescriptor),
    Response(ResponseEnvelope),
    /// View metadata (`total_rows`, `offset`), streaming mode only.
    Metadata(Value),
    /// One parsed view row, streaming mode only.
    Row(Value),
    End,
    Error(Error),
}

impl RequestEvent {
    /// True for `End` and `Error`, after which no further events fire
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error(_))
    }
}

/// Lifecycle events broadcast on the client, for logging and metrics.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Request {
        method: Method,
        url: String,
    },
    SuccessfulRequest {
        url: String,
        status: StatusCode,
    },
    FailedRequest {
        url: String,
        status: Option<StatusCode>,
        error: String,
        num_retries_left: u32,
    },
}

/// Sending half of a request's event sequence. Enforces the single
/// terminal event: anything sent after `End`/`Error` is dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RequestEvent>,
    terminated: Arc<AtomicBool>,
}

impl EventSender {
    pub fn send(&self, event: RequestEvent) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        if event.is_terminal() {
            self.terminated.store(true, Ordering::SeqCst);
        }
        let _ = self.tx.send(event);
    }

    /// True once a terminal event went out
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Handle to one in-flight request.
#[derive(Debug)]
pub struct RequestHandle {
    rx: mpsc::UnboundedReceiver<RequestEvent>,
    abort: Option<tokio::task::AbortHandle>,
    aborted: Arc<AtomicBool>,
    finished: bool,
    last_response: Option<ResponseEnvelope>,
}

impl RequestHandle {
    /// Create an unbound handle plus its sending half
    #[must_use]
    pub fn channel() -> (EventSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventSender {
                tx,
                terminated: Arc::new(AtomicBool::new(false)),
            },
            Self {
                rx,
                abort: None,
                aborted: Arc::new(AtomicBool::new(false)),
                finished: false,
                last_response: None,
            },
        )
    }

    /// Bind the driving task so `abort()` can cancel it
    pub fn bind(&mut self, abort: tokio::task::AbortHandle) {
        self.abort = Some(abort);
    }

    /// Receive the next event. Returns `None` after the terminal event,
    /// after `abort()`, or once the driving task is gone.
    pub async fn recv(&mut self) -> Option<RequestEvent> {
        if self.finished || self.aborted.load(Ordering::SeqCst) {
            return None;
        }
        let event = self.rx.recv().await?;
        if let RequestEvent::Response(envelope) = &event {
            self.last_response = Some(envelope.clone());
        }
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    /// Drain events until the terminal one and return the response
    /// envelope, or the error that ended the request.
    ///
    /// # Errors
    ///
    /// Returns the request's terminal error; [`Error::Aborted`] if the
    /// request was aborted before completing.
    pub async fn wait(mut self) -> Result<ResponseEnvelope, Error> {
        while let Some(event) = self.recv().await {
            match event {
                RequestEvent::Error(err) => return Err(err),
                RequestEvent::End => {
                    return self
                        .last_response
                        .take()
                        .map_or(Err(Error::Aborted), Ok);
                }
                _ => {}
            }
        }
        Err(Error::Aborted)
    }

    /// Cancel the in-flight request. Idempotent; no further events fire.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        // A dropped handle cancels the driving task; aborting a finished
        // task is a no-op.
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

/// Broadcast channel for client lifecycle events. Sends are best-effort:
/// with no subscribers they are dropped.
#[derive(Debug, Clone)]
pub struct LifecycleChannel {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleChannel {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl LifecycleChannel {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_stop_after_terminal() {
        let (tx, mut handle) = RequestHandle::channel();
        tx.send(RequestEvent::Row(json!({"id": "a"})));
        tx.send(RequestEvent::End);
        tx.send(RequestEvent::Row(json!({"id": "b"})));

        assert!(matches!(
            handle.recv().await,
            Some(RequestEvent::Row(_))
        ));
        assert!(matches!(handle.recv().await, Some(RequestEvent::End)));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn sender_drops_everything_after_error() {
        let (tx, mut handle) = RequestHandle::channel();
        tx.send(RequestEvent::Error(Error::bad_gateway("broken")));
        tx.send(RequestEvent::End);
        assert!(tx.is_terminated());

        assert!(matches!(
            handle.recv().await,
            Some(RequestEvent::Error(_))
        ));
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn wait_resolves_after_end_with_the_envelope() {
        let (tx, handle) = RequestHandle::channel();
        let envelope = ResponseEnvelope {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cache_info: CacheInfo::default(),
            raw: Bytes::new(),
            body: Some(json!({"ok": true})),
        };
        tx.send(RequestEvent::Response(envelope));
        tx.send(RequestEvent::End);

        let envelope = handle.wait().await.unwrap();
        assert_eq!(envelope.body, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn wait_surfaces_the_terminal_error() {
        let (tx, handle) = RequestHandle::channel();
        tx.send(RequestEvent::Error(Error::bad_gateway("broken")));
        assert!(matches!(
            handle.wait().await,
            Err(Error::BadGateway { .. })
        ));
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_silences_events() {
        let (tx, mut handle) = RequestHandle::channel();
        handle.abort();
        handle.abort();
        tx.send(RequestEvent::End);
        assert!(handle.recv().await.is_none());
    }
}
