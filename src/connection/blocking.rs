//! Blocking Connection
//!
//! The simple mode: one request on the wire at a time. Callers queue their
//! requests and wait; a worker task writes one request in full, reads until
//! its response is complete, answers the caller and moves on.
//!
//! Waiting callbacks are parked in an [`ExpiringMap`] keyed by sequence
//! number. A sweeper resolves any that outlive `callback_expiry` with
//! [`ConnectionError::Timeout`], so callers are released even if the socket
//! silently stops delivering.

use super::buffer::CommandBuffer;
use super::callback::{into_result, RequestCallback, ResponseResult};
use super::config::{ConnectionConfig, MemcachedHost};
use super::coordinator::ConnectionCoordinator;
use super::error::ConnectionError;
use super::pipelined::connect;
use super::state::{ConnectionState, StateCell};
use super::stats::ConnectionStats;
use crate::commands::{AuthenticationCommand, Command, DefaultKeyTranslator, KeyTranslator};
use crate::expiring::{ExpiringMap, ExpirySweeper};
use crate::protocol::{Response, ResponseCode, ResponseReader};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

type CallbackMap = ExpiringMap<u64, RequestCallback>;

struct Shared {
    host: MemcachedHost,
    config: ConnectionConfig,
    state: StateCell,
    stats: ConnectionStats,
    coordinator: Arc<dyn ConnectionCoordinator>,
    callbacks: Arc<CallbackMap>,
    /// Request queue into the worker. Taken on teardown.
    requests: Mutex<Option<mpsc::UnboundedSender<CommandBuffer>>>,
    sequence: AtomicU64,
}

impl Shared {
    fn lock_requests(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<CommandBuffer>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks the callback and queues the request. `internal` requests skip
    /// the state check; they are sent before the connection opens.
    fn enqueue(
        &self,
        callback: RequestCallback,
        request: Bytes,
        internal: bool,
    ) -> Result<u64, ConnectionError> {
        let requests = self.lock_requests();

        if !internal {
            match self.state.get() {
                ConnectionState::NotStarted => return Err(ConnectionError::NotStarted),
                ConnectionState::Closed => return Err(ConnectionError::Closed),
                ConnectionState::Connected | ConnectionState::Draining => {}
            }
        }
        let Some(sender) = requests.as_ref() else {
            return Err(ConnectionError::Closed);
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        if self
            .callbacks
            .insert_if_absent(sequence, callback, Some(self.config.callback_expiry))
            .is_err()
        {
            // Sequence numbers only repeat after wrapping
            return Err(ConnectionError::Desynchronized);
        }

        if sender.send(CommandBuffer::new(sequence, request)).is_err() {
            self.callbacks.remove(&sequence);
            return Err(ConnectionError::Closed);
        }

        trace!(host = %self.host, sequence = sequence, "Request queued");
        Ok(sequence)
    }

    /// Closes for good and fails every parked callback with `cause`.
    fn teardown(&self, cause: ConnectionError, unexpected: bool) {
        let previous = self.state.close();
        self.lock_requests().take();

        let failed = self.callbacks.drain();
        let count = failed.len();
        for (_, callback) in failed {
            callback.resolve(Err(cause.clone()));
        }

        if unexpected && previous.is_some_and(ConnectionState::is_open) {
            self.coordinator.disconnect(&self.host);
        }

        info!(host = %self.host, failed_requests = count, "Connection closed");
    }
}

/// Worker task and sweeper of a started connection.
struct Running {
    worker: JoinHandle<()>,
    _sweeper: ExpirySweeper,
}

/// A connection with one request in flight at a time.
pub struct BlockingConnection {
    shared: Arc<Shared>,
    translator: Arc<dyn KeyTranslator>,
    shutdown_tx: watch::Sender<bool>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl BlockingConnection {
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
                stats: ConnectionStats::new(),
                coordinator,
                callbacks: Arc::new(ExpiringMap::new(None)),
                requests: Mutex::new(None),
                sequence: AtomicU64::new(0),
            }),
            translator: Arc::new(DefaultKeyTranslator),
            shutdown_tx,
            running: tokio::sync::Mutex::new(None),
        }
    }

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

    /// Connects and starts the worker.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        match self.shared.state.get() {
            ConnectionState::NotStarted => {}
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Connected | ConnectionState::Draining => return Ok(()),
        }

        let (stream, _) = match connect(&self.shared.host, &self.shared.config).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(host = %self.shared.host, error = %e, "Connect failed");
                self.shared.state.close();
                return Err(e);
            }
        };

        self.start_with(stream).await
    }

    /// Starts the worker on an already connected stream.
    pub(crate) async fn start_with<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut running = self.running.lock().await;

        match self.shared.state.get() {
            ConnectionState::NotStarted => {}
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Connected | ConnectionState::Draining => return Ok(()),
        }

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        *self.shared.lock_requests() = Some(requests_tx);
        self.shared.sequence.store(0, Ordering::Relaxed);

        let host = self.shared.host.clone();
        let sweeper = ExpirySweeper::start(
            Arc::clone(&self.shared.callbacks),
            self.shared.config.sweep.clone(),
            move |sequence, callback: RequestCallback| {
                debug!(host = %host, sequence = sequence, "Callback expired");
                callback.resolve(Err(ConnectionError::Timeout));
            },
        );

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            stream,
            reader: ResponseReader::new(),
            read_buf: BytesMut::with_capacity(self.shared.config.read_buffer_size),
            requests: requests_rx,
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        *running = Some(Running {
            worker: tokio::spawn(worker.run()),
            _sweeper: sweeper,
        });

        if let Err(e) = self.authenticate().await {
            self.shutdown_tx.send_replace(true);
            if let Some(running) = running.take() {
                let _ = running.worker.await;
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

        info!(host = %self.shared.host, "Connected (blocking)");
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), ConnectionError> {
        let Some(authentication) = self.shared.config.authentication.clone() else {
            return Ok(());
        };

        let request = AuthenticationCommand::new(authentication).construct(self.translator.as_ref())?;
        let (callback, pending) = RequestCallback::client();
        self.shared.enqueue(callback, request, true)?;

        match pending.wait(Some(self.shared.config.connect_timeout)).await {
            Ok(response) if response.code() == ResponseCode::Stored => Ok(()),
            Ok(response) => Err(ConnectionError::Authentication(response.to_string())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(ConnectionError::Authentication(e.to_string())),
        }
    }

    /// Shuts down and waits for the worker to exit. The coordinator is not told.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        self.shutdown_tx.send_replace(true);

        if let Some(running) = running.take() {
            if let Err(e) = running.worker.await {
                error!(host = %self.shared.host, error = %e, "Worker task failed");
            }
        }
        self.shared.state.close();
    }

    /// Sends one command and waits for its response.
    pub async fn send(
        &self,
        command: &dyn Command,
        timeout: Option<Duration>,
    ) -> Result<Response, ConnectionError> {
        let request = command.construct(self.translator.as_ref())?;
        let (callback, pending) = RequestCallback::client();
        self.shared.enqueue(callback, request, false)?;

        let result = pending
            .wait(timeout.or(self.shared.config.default_request_timeout))
            .await;

        if let Err(ConnectionError::Timeout) = result {
            self.shared.stats.request_timed_out();
        }
        result
    }
}

impl std::fmt::Debug for BlockingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingConnection")
            .field("host", &self.shared.host)
            .field("state", &self.shared.state.get())
            .finish()
    }
}

/// Serves the request queue over one stream.
struct Worker<S> {
    shared: Arc<Shared>,
    stream: S,
    reader: ResponseReader,
    read_buf: BytesMut,
    requests: mpsc::UnboundedReceiver<CommandBuffer>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        match self.drive().await {
            Ok(()) => self.shared.teardown(ConnectionError::Closed, false),
            Err(e) => {
                error!(host = %self.shared.host, error = %e, "Connection failed");
                self.shared.teardown(e, true);
            }
        }
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        loop {
            let buffer = tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => return Ok(()),
                next = self.requests.recv() => match next {
                    Some(buffer) => buffer,
                    None => return Ok(()),
                },
            };

            let mut shutdown_rx = self.shutdown_rx.clone();
            let result = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => return Ok(()),
                result = self.round_trip(&buffer) => result?,
            };

            match self.shared.callbacks.remove(&buffer.sequence()) {
                Some(callback) => {
                    let result = result.and_then(|response| into_result(response, buffer.request()));
                    callback.resolve(result);
                }
                None => debug!(
                    host = %self.shared.host,
                    sequence = buffer.sequence(),
                    "Response for an expired callback discarded"
                ),
            }
        }
    }

    /// Writes one request and reads its response.
    ///
    /// The outer error is fatal to the connection; the inner one belongs to
    /// this request's caller alone.
    async fn round_trip(&mut self, buffer: &CommandBuffer) -> Result<ResponseResult, ConnectionError> {
        self.stream.write_all(buffer.request()).await?;
        self.stream.flush().await?;
        self.shared.stats.command_sent();
        self.shared.stats.bytes_written(buffer.len());

        let read_timeout = self.shared.config.read_timeout;
        let response = tokio::time::timeout(read_timeout, self.read_response())
            .await
            .map_err(|_| ConnectionError::ReadTimeout)??;

        if response.is_ok() {
            self.shared.stats.response_received();
        }
        Ok(response)
    }

    async fn read_response(&mut self) -> Result<ResponseResult, ConnectionError> {
        loop {
            match self.reader.next(&mut self.read_buf) {
                Ok(Some(response)) => return Ok(Ok(response)),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(host = %self.shared.host, error = %e, "Unparseable response");
                    return Ok(Err(e.into()));
                }
            }

            self.read_buf.reserve(self.shared.config.read_buffer_size);
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ConnectionError::ServerClosed);
            }
            self.shared.stats.bytes_read(n);
            trace!(host = %self.shared.host, bytes = n, "Read data");
        }
    }
}
