//! Pipelined Connection
//!
//! Any number of callers may `send()` at once. Each request is queued
//! together with its callback, and a single event-loop task owns the socket,
//! writes requests in batches, and answers callbacks strictly in the order
//! their requests were written.
//!
//! ## Event Loop
//!
//! ```text
//!   callers ──send()──> request queue ──notify──┐
//!                                               ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │  wait for readiness (READABLE [+ WRITABLE]), ≤ idle tick │
//!   │                                                          │
//!   │  nothing ready   -> idle tick, maybe queue an `mn` probe │
//!   │  readable        -> read -> ResponseReader -> oldest     │
//!   │                     in-flight callback                   │
//!   │  writable        -> request queue -> RequestWriter,      │
//!   │                     links move to the in-flight queue    │
//!   │  error           -> fail everything, tell coordinator    │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Memcached answers pipelined requests in order, so the oldest in-flight
//! request is always the one a new response belongs to. A response with
//! nothing in flight means the stream can no longer be trusted.

use super::buffer::{CommandBuffer, MissingLink};
use super::callback::{PendingResponse, RequestCallback};
use super::config::{ConnectionConfig, MemcachedHost, DEFAULT_SEND_BUFFER_SIZE};
use super::coordinator::ConnectionCoordinator;
use super::error::ConnectionError;
use super::keepalive::KeepAlive;
use super::state::{ConnectionState, StateCell};
use super::stats::ConnectionStats;
use super::writer::RequestWriter;
use crate::commands::{AuthenticationCommand, Command, DefaultKeyTranslator, KeyTranslator, NoopCommand};
use crate::protocol::{Response, ResponseCode, ResponseReader};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{Interest, Ready};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Requests accepted from callers but not yet handed to the writer.
#[derive(Debug, Default)]
struct RequestQueue {
    requests: VecDeque<MissingLink>,
    /// Set by `send()`, cleared by the event loop once the queue is empty
    write_interest: bool,
    sequence: u64,
}

impl RequestQueue {
    fn push(&mut self, callback: RequestCallback, request: Bytes) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        self.requests
            .push_back(MissingLink::new(callback, CommandBuffer::new(sequence, request)));
        self.write_interest = true;
        sequence
    }
}

/// State touched by both callers and the event loop.
struct Shared {
    host: MemcachedHost,
    config: ConnectionConfig,
    state: StateCell,
    queue: Mutex<RequestQueue>,
    wakeup: Notify,
    stats: ConnectionStats,
    coordinator: Arc<dyn ConnectionCoordinator>,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a caller's request. The state is checked under the queue lock
    /// so a request can never slip in behind teardown.
    fn enqueue(&self, request: Bytes) -> Result<PendingResponse, ConnectionError> {
        let (callback, pending) = RequestCallback::client();
        {
            let mut queue = self.lock_queue();
            match self.state.get() {
                ConnectionState::NotStarted => return Err(ConnectionError::NotStarted),
                ConnectionState::Closed => return Err(ConnectionError::Closed),
                ConnectionState::Connected | ConnectionState::Draining => {}
            }
            let sequence = queue.push(callback, request);
            trace!(host = %self.host, sequence = sequence, "Request queued");
        }
        self.wakeup.notify_one();
        Ok(pending)
    }
}

/// A pipelined, non-blocking connection to one memcached server.
///
/// # Example
///
/// ```no_run
/// use memlink::commands::RawCommand;
/// use memlink::connection::{ConnectionConfig, NoopCoordinator, PipelinedConnection};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), memlink::connection::ConnectionError> {
/// let connection = PipelinedConnection::new(
///     "127.0.0.1:11211".parse::<std::net::SocketAddr>().unwrap().into(),
///     ConnectionConfig::default(),
///     Arc::new(NoopCoordinator),
/// );
/// connection.start().await?;
///
/// let response = connection
///     .send(&RawCommand::line("version"), Some(Duration::from_secs(1)))
///     .await?;
/// println!("{}", response);
///
/// connection.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct PipelinedConnection {
    shared: Arc<Shared>,
    translator: Arc<dyn KeyTranslator>,
    shutdown_tx: watch::Sender<bool>,
    /// Event-loop task; the lock also serializes `start()` and `stop()`
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PipelinedConnection {
    pub fn new(
        host: MemcachedHost,
        config: ConnectionConfig,
        coordinator: Arc<dyn ConnectionCoordinator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                host,
                config,
                state: StateCell::new(),
                queue: Mutex::new(RequestQueue::default()),
                wakeup: Notify::new(),
                stats: ConnectionStats::new(),
                coordinator,
            }),
            translator: Arc::new(DefaultKeyTranslator),
            shutdown_tx,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Replaces the key translator handed to every command.
    pub fn with_translator(mut self, translator: Arc<dyn KeyTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn host(&self) -> &MemcachedHost {
        &self.shared.host
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// Connects, starts the event loop and authenticates if configured.
    ///
    /// A connection can be started once. Any failure closes it for good.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        let mut task = self.task.lock().await;

        match self.shared.state.get() {
            ConnectionState::NotStarted => {}
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Connected | ConnectionState::Draining => return Ok(()),
        }

        let (stream, capacity) = match connect(&self.shared.host, &self.shared.config).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(host = %self.shared.host, error = %e, "Connect failed");
                self.shared.state.close();
                return Err(e);
            }
        };

        {
            let mut queue = self.shared.lock_queue();
            queue.requests.clear();
            queue.sequence = 0;
            queue.write_interest = false;
        }

        let event_loop = EventLoop::new(
            Arc::clone(&self.shared),
            stream,
            capacity,
            self.shutdown_tx.subscribe(),
        );
        *task = Some(tokio::spawn(event_loop.run()));

        if let Err(e) = self.authenticate().await {
            self.shutdown_tx.send_replace(true);
            if let Some(handle) = task.take() {
                let _ = handle.await;
            }
            return Err(e);
        }

        if !self
            .shared
            .state
            .transition(ConnectionState::NotStarted, ConnectionState::Connected)
        {
            return Err(ConnectionError::Closed);
        }

        info!(host = %self.shared.host, writer_capacity = capacity, "Connected");
        Ok(())
    }

    /// Sends credentials ahead of any caller traffic.
    async fn authenticate(&self) -> Result<(), ConnectionError> {
        let Some(authentication) = self.shared.config.authentication.clone() else {
            return Ok(());
        };

        let request = AuthenticationCommand::new(authentication).construct(self.translator.as_ref())?;
        let pending = {
            let (callback, pending) = RequestCallback::client();
            self.shared.lock_queue().push(callback, request);
            pending
        };
        self.shared.wakeup.notify_one();

        match pending.wait(Some(self.shared.config.connect_timeout)).await {
            Ok(response) if response.code() == ResponseCode::Stored => {
                debug!(host = %self.shared.host, "Authenticated");
                Ok(())
            }
            Ok(response) => Err(ConnectionError::Authentication(response.to_string())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(ConnectionError::Authentication(e.to_string())),
        }
    }

    /// Shuts the connection down and waits for the event loop to exit.
    ///
    /// Pending requests fail with [`ConnectionError::Closed`]. The
    /// coordinator is not told.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(host = %self.shared.host, error = %e, "Event loop task failed");
            }
        }
        self.shared.state.close();
    }

    /// Sends one command and waits for its response.
    ///
    /// With no `timeout`, the configured default applies. A timed-out
    /// request stays in flight; its response is read and discarded.
    pub async fn send(
        &self,
        command: &dyn Command,
        timeout: Option<Duration>,
    ) -> Result<Response, ConnectionError> {
        let request = command.construct(self.translator.as_ref())?;
        let pending = self.shared.enqueue(request)?;

        let result = pending
            .wait(timeout.or(self.shared.config.default_request_timeout))
            .await;

        if let Err(ConnectionError::Timeout) = result {
            self.shared.stats.request_timed_out();
            debug!(host = %self.shared.host, "Request timed out");
        }
        result
    }
}

impl std::fmt::Debug for PipelinedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinedConnection")
            .field("host", &self.shared.host)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

/// Opens the socket with the configured options and connects within the
/// connect timeout. Also returns the writer capacity to use.
pub(crate) async fn connect(
    host: &MemcachedHost,
    config: &ConnectionConfig,
) -> Result<(TcpStream, usize), ConnectionError> {
    let address = host.address();
    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(config.tcp_keepalive)?;

    let capacity = config
        .send_buffer_size
        .or_else(|| socket.send_buffer_size().ok().map(|size| size as usize))
        .filter(|&size| size > 0)
        .unwrap_or(DEFAULT_SEND_BUFFER_SIZE);

    let stream = tokio::time::timeout(config.connect_timeout, socket.connect(address))
        .await
        .map_err(|_| ConnectionError::ConnectTimeout)??;
    stream.set_nodelay(config.tcp_nodelay)?;

    Ok((stream, capacity))
}

/// Sole owner of the socket, the reader, the writer and the in-flight queue.
struct EventLoop {
    shared: Arc<Shared>,
    stream: TcpStream,
    reader: ResponseReader,
    writer: RequestWriter,
    read_buf: BytesMut,
    in_flight: VecDeque<MissingLink>,
    keepalive: KeepAlive,
    invalid_readiness: u32,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventLoop {
    fn new(
        shared: Arc<Shared>,
        stream: TcpStream,
        capacity: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let keepalive = KeepAlive::new(shared.config.keep_alive_ticks());
        let read_buf = BytesMut::with_capacity(shared.config.read_buffer_size);

        Self {
            shared,
            stream,
            reader: ResponseReader::new(),
            writer: RequestWriter::new(capacity),
            read_buf,
            in_flight: VecDeque::new(),
            keepalive,
            invalid_readiness: 0,
            shutdown_rx,
        }
    }

    async fn run(mut self) {
        match self.drive().await {
            Ok(()) => self.teardown(ConnectionError::Closed, false),
            Err(e) => {
                error!(host = %self.shared.host, error = %e, "Connection failed");
                self.teardown(e, true)
            }
        }
    }

    /// Returns `Ok` when asked to stop, `Err` on anything fatal.
    async fn drive(&mut self) -> Result<(), ConnectionError> {
        let idle_tick = self.shared.config.idle_tick.max(Duration::from_millis(1));

        loop {
            let interest = self.interest();

            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => return Ok(()),
                _ = self.shared.wakeup.notified() => continue,
                ready = tokio::time::timeout(idle_tick, self.stream.ready(interest)) => {
                    match ready {
                        Err(_) => self.on_idle(),
                        Ok(ready) => self.on_ready(ready?)?,
                    }
                }
            }
        }
    }

    fn interest(&self) -> Interest {
        if self.shared.lock_queue().write_interest || self.writer.has_pending() {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        }
    }

    fn on_idle(&mut self) {
        if !self.keepalive.tick() {
            return;
        }

        let request = match NoopCommand.construct(&DefaultKeyTranslator) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Could not build keepalive probe");
                return;
            }
        };
        let sequence = self.shared.lock_queue().push(RequestCallback::server(), request);
        self.shared.stats.keepalive_probe();
        debug!(host = %self.shared.host, sequence = sequence, "Sending keepalive probe");
    }

    fn on_ready(&mut self, ready: Ready) -> Result<(), ConnectionError> {
        if !ready.is_readable() && !ready.is_writable() {
            self.invalid_readiness += 1;
            warn!(
                host = %self.shared.host,
                count = self.invalid_readiness,
                "Readiness event with nothing to do"
            );
            if self.invalid_readiness >= self.shared.config.max_invalid_readiness {
                return Err(ConnectionError::InvalidReadiness(self.invalid_readiness));
            }
            return Ok(());
        }
        self.invalid_readiness = 0;

        if ready.is_readable() {
            self.read()?;
        }
        if ready.is_writable() {
            self.write()?;
        }
        Ok(())
    }

    /// Reads until the socket would block, dispatching every complete response.
    fn read(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.read_buf.reserve(self.shared.config.read_buffer_size);

            match self.stream.try_read_buf(&mut self.read_buf) {
                Ok(0) => return Err(ConnectionError::ServerClosed),
                Ok(n) => {
                    self.shared.stats.bytes_read(n);
                    self.keepalive.reset();
                    trace!(host = %self.shared.host, bytes = n, "Read data");
                    self.dispatch()?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn dispatch(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.reader.next(&mut self.read_buf) {
                Ok(Some(response)) => {
                    let link = self.oldest_in_flight()?;
                    trace!(
                        host = %self.shared.host,
                        sequence = link.sequence(),
                        code = %response.code(),
                        "Response received"
                    );
                    self.shared.stats.response_received();
                    link.complete(response);
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(host = %self.shared.host, error = %e, "Unparseable response");
                    self.oldest_in_flight()?.fail(e.into());
                }
            }
        }
    }

    fn oldest_in_flight(&mut self) -> Result<MissingLink, ConnectionError> {
        self.in_flight
            .pop_front()
            .ok_or(ConnectionError::Desynchronized)
    }

    /// Moves queued requests into the writer while it has room, then makes
    /// one write attempt.
    fn write(&mut self) -> Result<(), ConnectionError> {
        if self.writer.prepare() {
            let mut queue = self.shared.lock_queue();

            while let Some(link) = queue.requests.pop_front() {
                let whole = self.writer.add(link.buffer());
                self.shared.stats.command_sent();
                self.in_flight.push_back(link);

                if !whole || !self.writer.prepare() {
                    break;
                }
            }

            if queue.requests.is_empty() {
                queue.write_interest = false;
            }
        }

        let written = self.writer.write(&self.stream)?;
        if written > 0 {
            self.shared.stats.bytes_written(written);
            self.keepalive.reset();
        }
        self.shared.state.set_draining(self.writer.is_draining());
        Ok(())
    }

    /// Closes for good and fails every outstanding request with `cause`.
    fn teardown(mut self, cause: ConnectionError, unexpected: bool) {
        let previous = self.shared.state.close();

        let queued: Vec<MissingLink> = {
            let mut queue = self.shared.lock_queue();
            queue.write_interest = false;
            queue.requests.drain(..).collect()
        };

        if !self.reader.is_idle() {
            debug!(host = %self.shared.host, "Discarding a partially read response");
        }

        let failed = self.in_flight.len() + queued.len();
        for link in self.in_flight.drain(..).chain(queued) {
            link.fail(cause.clone());
        }

        if unexpected && previous.is_some_and(ConnectionState::is_open) {
            self.shared.coordinator.disconnect(&self.shared.host);
        }

        info!(
            host = %self.shared.host,
            failed_requests = failed,
            "Connection closed"
        );
    }
}
