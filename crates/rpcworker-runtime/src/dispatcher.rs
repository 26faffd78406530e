//! Protocol state machine.
//!
//! The dispatcher owns the session table, the disown deadline and the
//! sandbox. It consumes decoded messages and timer fires, and emits outbound
//! messages into an [`Outbox`]. It performs no I/O and reads no clock: callers
//! pass `now` in, so tests can drive it with synthetic input.

use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use rpcworker_proto::Message;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::identity::WorkerIdentity;
use crate::liveness::{Liveness, LivenessConfig};
use crate::sandbox::Sandbox;
use crate::session::{request_pair, RequestError, SessionTable};
use crate::stream::{Outbox, Stream};

/// Why the worker loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// No heartbeat from the control plane before the disown deadline.
    Disowned,
    /// The control plane sent TERMINATE; it was echoed back.
    Terminated { reason: u32, message: String },
    /// The worker itself asked to terminate.
    Requested { reason: u32, message: String },
    /// The control plane closed the channel.
    Disconnected,
}

/// Central dispatch for one worker connection.
pub struct Dispatcher<S> {
    identity: WorkerIdentity,
    sandbox: S,
    sessions: SessionTable,
    liveness: Liveness,
    outbox: Outbox,
    stopped: Option<Shutdown>,
}

impl<S: Sandbox> Dispatcher<S> {
    /// Create the dispatcher and send the handshake.
    ///
    /// The handshake is the first message queued on `outbox`. The disown
    /// deadline is armed at the same time, so a control plane that never
    /// answers is detected after one `disown_timeout`.
    pub fn start(
        identity: WorkerIdentity,
        sandbox: S,
        outbox: Outbox,
        liveness: LivenessConfig,
        now: Instant,
    ) -> Self {
        let mut dispatcher = Self {
            identity,
            sandbox,
            sessions: SessionTable::new(),
            liveness: Liveness::new(liveness.disown_timeout),
            outbox,
            stopped: None,
        };

        debug!(identity = %dispatcher.identity, "sending handshake");
        dispatcher.emit(Message::handshake(dispatcher.identity.as_str()));
        dispatcher.liveness.arm(now);
        dispatcher
    }

    /// Apply one inbound message.
    pub fn dispatch(&mut self, message: Message) -> ControlFlow<Shutdown> {
        if let Some(shutdown) = &self.stopped {
            return ControlFlow::Break(shutdown.clone());
        }

        match message {
            Message::Invoke { session, event } => self.on_invoke(session, &event),
            Message::Chunk { session, data } => self.on_chunk(session, data),
            Message::Choke { session } => self.on_choke(session),
            Message::Error {
                session,
                code,
                message,
            } => self.on_error(session, RequestError { code, message }),
            Message::Heartbeat => {
                if self.liveness.disarm() {
                    trace!("heartbeat received, disown cancelled");
                }
            }
            Message::Terminate { reason, message } => {
                info!(reason, message = %message, "received terminate");
                self.emit(Message::terminate(reason, message.clone()));
                return self.stop(Shutdown::Terminated { reason, message });
            }
            Message::Handshake { .. } => {
                debug!("ignoring inbound handshake");
            }
        }
        ControlFlow::Continue(())
    }

    /// Heartbeat timer fired: ping the control plane and (re)arm disown.
    pub fn on_heartbeat_timer(&mut self, now: Instant) -> ControlFlow<Shutdown> {
        if let Some(shutdown) = &self.stopped {
            return ControlFlow::Break(shutdown.clone());
        }
        trace!("sending heartbeat");
        self.liveness.arm(now);
        self.emit(Message::Heartbeat);
        ControlFlow::Continue(())
    }

    /// Disown deadline fired. Stale fires (disarmed or rearmed) are ignored.
    pub fn on_disown_timer(&mut self, now: Instant) -> ControlFlow<Shutdown> {
        if let Some(shutdown) = &self.stopped {
            return ControlFlow::Break(shutdown.clone());
        }
        if !self.liveness.is_expired(now) {
            return ControlFlow::Continue(());
        }
        error!(identity = %self.identity, "disowned: control plane stopped answering heartbeats");
        self.liveness.disarm();
        self.stop(Shutdown::Disowned)
    }

    /// Worker-initiated graceful shutdown.
    pub fn terminate(&mut self, reason: u32, message: impl Into<String>) -> ControlFlow<Shutdown> {
        if let Some(shutdown) = &self.stopped {
            return ControlFlow::Break(shutdown.clone());
        }
        let message = message.into();
        info!(reason, message = %message, "terminating");
        self.emit(Message::terminate(reason, message.clone()));
        self.stop(Shutdown::Requested { reason, message })
    }

    /// Record that the channel closed underneath us.
    pub fn disconnected(&mut self) -> ControlFlow<Shutdown> {
        if let Some(shutdown) = &self.stopped {
            return ControlFlow::Break(shutdown.clone());
        }
        warn!(open_sessions = self.sessions.len(), "control plane closed the channel");
        self.stop(Shutdown::Disconnected)
    }

    /// Pending disown deadline, for the reactor to sleep on.
    pub fn disown_deadline(&self) -> Option<Instant> {
        self.liveness.deadline()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Why the dispatcher stopped, once it has.
    pub fn shutdown(&self) -> Option<&Shutdown> {
        self.stopped.as_ref()
    }

    fn on_invoke(&mut self, session: u64, event: &str) {
        debug!(session, event, "invoke");
        if self.sessions.contains(session) {
            warn!(session, event, "invoke for a session that is already open, ignoring");
            return;
        }

        let (sink, request) = request_pair(session);
        let stream = Stream::new(session, self.outbox.clone());
        let sandbox = &mut self.sandbox;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            sandbox.invoke(event, request, stream)
        }));

        match outcome {
            Ok(Ok(())) => {
                if let Err(err) = self.sessions.insert(sink) {
                    warn!(session, error = %err, "failed to register session");
                }
            }
            Ok(Err(err)) => {
                error!(session, event, error = %err, "invoke failed");
            }
            Err(panic) => {
                error!(session, event, panic = panic_message(&*panic), "handler panicked during invoke");
            }
        }
    }

    fn on_chunk(&mut self, session: u64, data: Bytes) {
        trace!(session, size = data.len(), "chunk");
        let Some(sink) = self.sessions.get(session) else {
            trace!(session, "chunk for unknown session, ignoring");
            return;
        };
        if let Err(err) = sink.push(data) {
            error!(session, error = %err, "push failed");
        }
    }

    fn on_choke(&mut self, session: u64) {
        debug!(session, "choke");
        let Some(sink) = self.sessions.remove(session) else {
            trace!(session, "choke for unknown session, ignoring");
            return;
        };
        if let Err(err) = sink.close() {
            debug!(session, error = %err, "close after request dropped");
        }
    }

    fn on_error(&mut self, session: u64, err: RequestError) {
        debug!(session, code = err.code, message = %err.message, "session error");
        let Some(sink) = self.sessions.get(session) else {
            trace!(session, "error for unknown session, ignoring");
            return;
        };
        if let Err(err) = sink.error(err) {
            error!(session, error = %err, "error delivery failed");
        }
    }

    fn emit(&self, message: Message) {
        if let Err(message) = self.outbox.send(message) {
            warn!(kind = %message.kind(), "outbound queue closed, dropping message");
        }
    }

    fn stop(&mut self, shutdown: Shutdown) -> ControlFlow<Shutdown> {
        self.stopped = Some(shutdown.clone());
        ControlFlow::Break(shutdown)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
