//! The worker reactor.
//!
//! One task owns the channel: it reads and decodes inbound bytes, runs the
//! heartbeat and disown timers, takes local commands and drains the outbound
//! queue onto the transport. All dispatch happens on this task, so sessions
//! and timers need no locking.

use std::future::poll_fn;
use std::ops::ControlFlow;
use std::task::{ready, Context, Poll};

use futures_util::SinkExt;
use rpcworker_proto::{Decoder, Message, MessageCodec, ProtoError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::dispatcher::{Dispatcher, Shutdown};
use crate::error::Result;
use crate::sandbox::Sandbox;
use crate::stream::Outbox;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug)]
enum Command {
    Terminate { reason: u32, message: String },
}

/// Handle for asking a running worker to stop.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl WorkerHandle {
    /// Request a graceful terminate. Returns `false` if the worker has already stopped.
    pub fn terminate(&self, reason: u32, message: impl Into<String>) -> bool {
        self.tx
            .send(Command::Terminate {
                reason,
                message: message.into(),
            })
            .is_ok()
    }
}

/// A worker bound to its configuration and sandbox, not yet connected.
pub struct Worker<S> {
    config: WorkerConfig,
    sandbox: S,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl<S: Sandbox> Worker<S> {
    pub fn new(config: WorkerConfig, sandbox: S) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            sandbox,
            commands_tx,
            commands_rx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Connect to the configured endpoint and serve until shutdown.
    pub async fn run(self) -> Result<Shutdown> {
        let io = self.config.endpoint.connect().await?;
        info!(endpoint = %self.config.endpoint, "connected to control plane");
        self.run_on(io).await
    }

    /// Serve on an already-connected channel until shutdown.
    ///
    /// Returns why the worker stopped. Transport and encoding failures are
    /// returned as errors.
    pub async fn run_on<T>(self, io: T) -> Result<Shutdown>
    where
        T: AsyncRead + AsyncWrite,
    {
        let Worker {
            config,
            sandbox,
            commands_tx: _commands_tx,
            commands_rx: mut commands,
        } = self;

        info!(
            identity = %config.identity,
            app = %config.app,
            heartbeat_interval = ?config.liveness.heartbeat_interval,
            disown_timeout = ?config.liveness.disown_timeout,
            "worker starting"
        );

        let (mut reader, writer) = tokio::io::split(io);
        let mut outgoing = OutboundWriter::new(FramedWrite::new(
            writer,
            MessageCodec::with_max_frame(config.max_frame_size),
        ));
        let mut decoder = Decoder::with_max_frame(config.max_frame_size);
        let mut buf = vec![0u8; READ_CHUNK];

        let (outbox, mut outbound) = Outbox::channel();
        let now = Instant::now();
        let mut dispatcher = Dispatcher::start(
            config.identity.clone(),
            sandbox,
            outbox,
            config.liveness,
            now,
        );

        let interval = config.liveness.heartbeat_interval;
        let mut heartbeat = time::interval_at(now + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Writes are a select arm of their own: a peer that stops reading
        // stalls only that arm, never the disown deadline.
        let shutdown = loop {
            let disown = dispatcher.disown_deadline();
            let writing = !outgoing.is_idle();
            let accepting = outgoing.can_accept();

            let flow = tokio::select! {
                biased;

                _ = time::sleep_until(disown.unwrap_or_else(Instant::now)), if disown.is_some() => {
                    dispatcher.on_disown_timer(Instant::now())
                }

                Some(command) = commands.recv() => match command {
                    Command::Terminate { reason, message } => dispatcher.terminate(reason, message),
                },

                written = outgoing.progress(), if writing => {
                    written?;
                    ControlFlow::Continue(())
                }

                Some(message) = outbound.recv(), if accepting => {
                    outgoing.push(message);
                    ControlFlow::Continue(())
                }

                read = reader.read(&mut buf) => match read? {
                    0 => dispatcher.disconnected(),
                    n => decoder.feed(&buf[..n], |message| dispatcher.dispatch(message)),
                },

                _ = heartbeat.tick() => dispatcher.on_heartbeat_timer(Instant::now()),
            };

            if let ControlFlow::Break(shutdown) = flow {
                break shutdown;
            }
        };

        if shutdown != Shutdown::Disconnected {
            // Bounded: a peer that stopped reading must not keep the worker alive.
            let grace = config.liveness.disown_timeout;
            match time::timeout(grace, outgoing.finish(&mut outbound)).await {
                Ok(Ok(())) => debug!("outbound queue flushed"),
                Ok(Err(err)) => warn!(error = %err, "failed to flush outbound queue on shutdown"),
                Err(_) => warn!(grace = ?grace, "peer not reading, dropping unflushed output"),
            }
        }

        info!(reason = ?shutdown, open_sessions = dispatcher.sessions().len(), "worker stopped");
        Ok(shutdown)
    }
}

/// Write half of the channel, driven one step at a time.
///
/// Holds at most one message that the sink has not accepted yet. Every step
/// is a fresh poll on owned state, so dropping a [`OutboundWriter::progress`]
/// future loses nothing.
struct OutboundWriter<W> {
    sink: FramedWrite<W, MessageCodec>,
    pending: Option<Message>,
    dirty: bool,
}

impl<W: AsyncWrite + Unpin> OutboundWriter<W> {
    fn new(sink: FramedWrite<W, MessageCodec>) -> Self {
        Self {
            sink,
            pending: None,
            dirty: false,
        }
    }

    fn can_accept(&self) -> bool {
        self.pending.is_none()
    }

    fn is_idle(&self) -> bool {
        self.pending.is_none() && !self.dirty
    }

    fn push(&mut self, message: Message) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(message);
    }

    /// Hand the pending message to the sink, or flush if there is none.
    fn poll_progress(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), ProtoError>> {
        if let Some(message) = self.pending.take() {
            match self.sink.poll_ready_unpin(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => {
                    self.pending = Some(message);
                    return Poll::Pending;
                }
            }
            self.sink.start_send_unpin(message)?;
            self.dirty = true;
            return Poll::Ready(Ok(()));
        }

        if self.dirty {
            ready!(self.sink.poll_flush_unpin(cx))?;
            self.dirty = false;
        }
        Poll::Ready(Ok(()))
    }

    async fn progress(&mut self) -> std::result::Result<(), ProtoError> {
        poll_fn(|cx| self.poll_progress(cx)).await
    }

    /// Write everything still queued, then flush.
    async fn finish(
        &mut self,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
    ) -> std::result::Result<(), ProtoError> {
        loop {
            if self.pending.is_none() {
                if let Ok(message) = outbound.try_recv() {
                    self.pending = Some(message);
                }
            }
            if self.is_idle() {
                return Ok(());
            }
            self.progress().await?;
        }
    }
}

impl<S> std::fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use rpcworker_proto::TERMINATE_NORMAL;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::liveness::LivenessConfig;
    use crate::sandbox::{HandlerError, HandlerRegistry};
    use crate::session::Request;
    use crate::stream::Stream;

    type PeerRx = FramedRead<ReadHalf<DuplexStream>, MessageCodec>;
    type PeerTx = FramedWrite<WriteHalf<DuplexStream>, MessageCodec>;

    fn config() -> WorkerConfig {
        WorkerConfig::new("worker-7f3a", "echo", "/run/engine.sock")
            .unwrap()
            .with_liveness(LivenessConfig {
                heartbeat_interval: Duration::from_secs(5),
                disown_timeout: Duration::from_secs(2),
            })
            .unwrap()
    }

    fn channel() -> (DuplexStream, PeerRx, PeerTx) {
        channel_with_capacity(64 * 1024)
    }

    /// A channel whose worker-to-peer direction holds at most `capacity` bytes.
    fn channel_with_capacity(capacity: usize) -> (DuplexStream, PeerRx, PeerTx) {
        let (worker_io, peer_io) = duplex(capacity);
        let (read, write) = tokio::io::split(peer_io);
        (
            worker_io,
            FramedRead::new(read, MessageCodec::new()),
            FramedWrite::new(write, MessageCodec::new()),
        )
    }

    fn echo_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.on(
            "echo",
            |mut request: Request, mut stream: Stream| -> std::result::Result<(), HandlerError> {
                tokio::task::spawn_local(async move {
                    while let Ok(Some(data)) = request.read().await {
                        if stream.write(data).is_err() {
                            return;
                        }
                    }
                    let _ = stream.close();
                });
                Ok(())
            },
        );
        registry
    }

    async fn next(rx: &mut PeerRx) -> Message {
        rx.next().await.unwrap().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn silent_control_plane_disowns_worker() {
        let (io, mut rx, tx) = channel();
        let started = Instant::now();

        let (result, _peer) = tokio::join!(
            Worker::new(config(), HandlerRegistry::new()).run_on(io),
            async move {
                assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
                (rx, tx)
            }
        );

        assert_eq!(result.unwrap(), Shutdown::Disowned);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn answered_heartbeats_keep_worker_alive_until_terminate() {
        let (io, mut rx, mut tx) = channel();
        let started = Instant::now();

        let (result, ()) = tokio::join!(
            Worker::new(config(), HandlerRegistry::new()).run_on(io),
            async move {
                assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
                tx.send(Message::Heartbeat).await.unwrap();

                for _ in 0..3 {
                    assert_eq!(next(&mut rx).await, Message::Heartbeat);
                    tx.send(Message::Heartbeat).await.unwrap();
                }

                tx.send(Message::terminate(TERMINATE_NORMAL, "done")).await.unwrap();
                assert_eq!(
                    next(&mut rx).await,
                    Message::terminate(TERMINATE_NORMAL, "done")
                );
            }
        );

        assert_eq!(
            result.unwrap(),
            Shutdown::Terminated {
                reason: TERMINATE_NORMAL,
                message: "done".to_string()
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_session_round_trips_over_the_channel() {
        let (io, mut rx, mut tx) = channel();
        let local = tokio::task::LocalSet::new();

        let (result, ()) = local
            .run_until(async move {
                tokio::join!(
                    Worker::new(config(), echo_registry()).run_on(io),
                    async move {
                        assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
                        tx.send(Message::Heartbeat).await.unwrap();
                        tx.send(Message::invoke(1, "echo")).await.unwrap();
                        tx.send(Message::chunk(1, "hello")).await.unwrap();
                        tx.send(Message::choke(1)).await.unwrap();

                        assert_eq!(next(&mut rx).await, Message::chunk(1, "hello"));
                        assert_eq!(next(&mut rx).await, Message::choke(1));
                        // Closing the channel stops the worker.
                        drop(tx);
                        drop(rx);
                    }
                )
            })
            .await;

        assert_eq!(result.unwrap(), Shutdown::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_frames_do_not_stop_the_worker() {
        let (io, mut rx, mut tx) = channel();

        let (result, ()) = tokio::join!(
            Worker::new(config(), HandlerRegistry::new()).run_on(io),
            async move {
                assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
                // [9, 0] has an unknown kind, [3, 1] is an INVOKE missing its event.
                tx.get_mut().write_all(&[0x92, 0x09, 0x00, 0x92, 0x03, 0x01]).await.unwrap();
                tx.send(Message::terminate(TERMINATE_NORMAL, "bye")).await.unwrap();
                assert_eq!(
                    next(&mut rx).await,
                    Message::terminate(TERMINATE_NORMAL, "bye")
                );
            }
        );

        assert!(matches!(result.unwrap(), Shutdown::Terminated { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_terminate_is_sent_after_handshake() {
        let (io, mut rx, tx) = channel();
        let worker = Worker::new(config(), HandlerRegistry::new());
        let handle = worker.handle();
        assert!(handle.terminate(TERMINATE_NORMAL, "interrupted"));

        let (result, _peer) = tokio::join!(worker.run_on(io), async move {
            assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
            assert_eq!(
                next(&mut rx).await,
                Message::terminate(TERMINATE_NORMAL, "interrupted")
            );
            (rx, tx)
        });

        assert_eq!(
            result.unwrap(),
            Shutdown::Requested {
                reason: TERMINATE_NORMAL,
                message: "interrupted".to_string()
            }
        );
        assert!(!handle.terminate(TERMINATE_NORMAL, "again"));
    }

    #[tokio::test(start_paused = true)]
    async fn peer_that_stops_reading_is_still_disowned() {
        // The 15-byte handshake fills the pipe, so the first heartbeat stalls.
        let (io, rx, mut tx) = channel_with_capacity(16);
        let started = Instant::now();

        let run = async {
            let (result, _peer) = tokio::join!(
                Worker::new(config(), HandlerRegistry::new()).run_on(io),
                async move {
                    tx.send(Message::Heartbeat).await.unwrap();
                    (rx, tx)
                }
            );
            result
        };

        let result = time::timeout(Duration::from_secs(60), run)
            .await
            .expect("stalled writes must not block the disown deadline");
        assert_eq!(result.unwrap(), Shutdown::Disowned);

        // Heartbeat at 5s, disowned at 7s, then at most one more timeout flushing.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(9), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flush_gives_up_on_a_peer_that_never_reads() {
        let (io, rx, mut tx) = channel_with_capacity(16);
        let started = Instant::now();

        let (result, _peer) = tokio::join!(
            Worker::new(config(), HandlerRegistry::new()).run_on(io),
            async move {
                tx.send(Message::terminate(TERMINATE_NORMAL, "done")).await.unwrap();
                (rx, tx)
            }
        );

        assert_eq!(
            result.unwrap(),
            Shutdown::Terminated {
                reason: TERMINATE_NORMAL,
                message: "done".to_string()
            }
        );
        // The terminate echo cannot be written; the flush waits one disown timeout.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_output_drains_once_the_peer_reads_again() {
        let (io, mut rx, mut tx) = channel_with_capacity(16);

        let (result, ()) = tokio::join!(
            Worker::new(config(), HandlerRegistry::new()).run_on(io),
            async move {
                tx.send(Message::Heartbeat).await.unwrap();
                tx.send(Message::terminate(TERMINATE_NORMAL, "done")).await.unwrap();
                time::sleep(Duration::from_secs(1)).await;
                assert_eq!(next(&mut rx).await, Message::handshake("worker-7f3a"));
                assert_eq!(
                    next(&mut rx).await,
                    Message::terminate(TERMINATE_NORMAL, "done")
                );
            }
        );

        assert!(matches!(result.unwrap(), Shutdown::Terminated { .. }));
    }
}
