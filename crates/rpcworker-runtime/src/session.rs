//! Inbound side of a session and the table of open sessions.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// Application-level failure reported by the control plane for a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request error {code}: {message}")]
pub struct RequestError {
    pub code: u32,
    pub message: String,
}

/// What a handler observes on its [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Chunk(Bytes),
    Close,
    Error(RequestError),
}

/// Create the two ends of a session's inbound path.
pub fn request_pair(session: u64) -> (RequestSink, Request) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RequestSink { session, tx }, Request { session, rx })
}

/// Dispatcher-side end: feeds data and end-of-input into the handler.
#[derive(Debug)]
pub struct RequestSink {
    session: u64,
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl RequestSink {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn push(&self, data: Bytes) -> Result<(), SessionError> {
        self.deliver(RequestEvent::Chunk(data))
    }

    pub fn close(&self) -> Result<(), SessionError> {
        self.deliver(RequestEvent::Close)
    }

    pub fn error(&self, err: RequestError) -> Result<(), SessionError> {
        self.deliver(RequestEvent::Error(err))
    }

    fn deliver(&self, event: RequestEvent) -> Result<(), SessionError> {
        self.tx
            .send(event)
            .map_err(|_| SessionError::RequestDropped(self.session))
    }
}

/// Handler-side end: the readable inbound stream of one session.
#[derive(Debug)]
pub struct Request {
    session: u64,
    rx: mpsc::UnboundedReceiver<RequestEvent>,
}

impl Request {
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the worker has gone away without closing the session.
    pub async fn recv(&mut self) -> Option<RequestEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<RequestEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next chunk.
    ///
    /// `Ok(None)` means end of input, either a close or a vanished worker.
    pub async fn read(&mut self) -> Result<Option<Bytes>, RequestError> {
        match self.rx.recv().await {
            Some(RequestEvent::Chunk(data)) => Ok(Some(data)),
            Some(RequestEvent::Error(err)) => Err(err),
            Some(RequestEvent::Close) | None => Ok(None),
        }
    }
}

/// Open sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<u64, RequestSink>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. An id may not be reused while it is still open.
    pub fn insert(&mut self, sink: RequestSink) -> Result<(), SessionError> {
        let session = sink.session();
        if self.sessions.contains_key(&session) {
            return Err(SessionError::Duplicate(session));
        }
        self.sessions.insert(session, sink);
        Ok(())
    }

    pub fn get(&self, session: u64) -> Option<&RequestSink> {
        self.sessions.get(&session)
    }

    pub fn remove(&mut self, session: u64) -> Option<RequestSink> {
        self.sessions.remove(&session)
    }

    pub fn contains(&self, session: u64) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
