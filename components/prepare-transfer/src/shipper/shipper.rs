//! Shipper - responsibility and behavior
//!
//! The Shipper forwards log records to the on-site log server over TCP. It is
//! fed by [`LogServerLayer`], a tracing layer installed at startup, before the
//! log server address is known (the address comes from the configuration
//! server). Records produced until then are held back and flushed once the
//! Shipper is attached, or dropped if log forwarding is disabled.
//!
//! Key responsibilities:
//! - Translate tracing events (with their span context) into log-server records.
//! - Own a background worker that keeps one TCP connection to the log server.
//! - Reconnect with exponential backoff + jitter, giving up after a bounded
//! number of attempts. An unreachable log server never fails the tool.
//! - Drain queued records on shutdown, bounded by a timeout.

// Local crates
use crate::shipper::record::{LogRecord, LogServerIdentity, RecordSource, START_STOP_LEVELNO};

// External crates
use bytes::Bytes;
use rand::Rng;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Subscriber, instrument};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Target of the start/stop marker records.
pub const START_STOP_TARGET: &str = "start_stop";

/// Records held back before the Shipper is attached.
const MAX_PENDING_RECORDS: usize = 10_000;

/// Own diagnostics never loop back into the log server.
const SELF_TARGET: &str = module_path!();

/// Errors of the log server connection.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    /// The address is not `host:port`.
    #[error("invalid log server address {0:?}, expected host:port")]
    InvalidAddress(String),
    /// The log server did not accept a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The worker did not finish sending within the drain timeout.
    #[error("shipper worker did not drain within {0:?}")]
    DrainTimeout(Duration),
}

/// Connection policy towards the log server.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Timeout of a single connection attempt.
    pub connection_timeout_ms: u64,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u64>,
    /// Delay before the first retry.
    pub initial_retry_delay_ms: u64,
    /// Cap on the retry delay.
    pub max_retry_delay_ms: u64,
    /// Growth of the retry delay per failed attempt.
    pub backoff_factor: f64,
    /// Fraction of the delay added or removed at random.
    pub retry_jitter: f64,
    /// Upper bound on [`Shipper::shutdown`].
    pub drain_timeout_ms: u64,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 2_000,
            max_reconnect_attempts: Some(3),
            initial_retry_delay_ms: 200,
            max_retry_delay_ms: 2_000,
            backoff_factor: 2.0,
            retry_jitter: 0.1,
            drain_timeout_ms: 5_000,
        }
    }
}

/// Split and validate a `host:port` log server address.
pub fn parse_address(addr: &str) -> Result<(String, u16), ShipperError> {
    let (host, port) = addr
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| ShipperError::InvalidAddress(addr.to_string()))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| ShipperError::InvalidAddress(addr.to_string()))?;
    if host.is_empty() {
        return Err(ShipperError::InvalidAddress(addr.to_string()));
    }
    Ok((host.to_string(), port))
}

enum ShipperState {
    Pending(Vec<Bytes>),
    Attached(mpsc::UnboundedSender<Bytes>),
    Disabled,
}

/// Shared switch between the tracing layer and the Shipper.
#[derive(Clone)]
pub struct LogServerHandle {
    state: Arc<Mutex<ShipperState>>,
}

impl fmt::Debug for LogServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            ShipperState::Pending(records) => format!("Pending({})", records.len()),
            ShipperState::Attached(_) => "Attached".to_string(),
            ShipperState::Disabled => "Disabled".to_string(),
        };
        f.debug_struct("LogServerHandle").field("state", &state).finish()
    }
}

impl Default for LogServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl LogServerHandle {
    /// Handle that buffers until attached.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ShipperState::Pending(Vec::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ShipperState> {
        // A poisoned lock only means a panic elsewhere; the state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, frame: Bytes) {
        match &mut *self.lock() {
            ShipperState::Pending(records) => {
                if records.len() < MAX_PENDING_RECORDS {
                    records.push(frame);
                }
            }
            ShipperState::Attached(tx) => {
                let _ = tx.send(frame);
            }
            ShipperState::Disabled => {}
        }
    }

    /// Number of records held back, waiting for [`Shipper::attach`].
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            ShipperState::Pending(records) => records.len(),
            _ => 0,
        }
    }

    /// Stop forwarding and drop anything held back.
    pub fn disable(&self) {
        *self.lock() = ShipperState::Disabled;
    }
}

/// Shipper
///
/// Owns the background worker that writes framed records to the log server.
/// The worker runs until the handle is disabled and the queue is drained.
#[derive(Debug)]
pub struct Shipper {
    handle: LogServerHandle,
    worker_handle: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Shipper {
    /// Start shipping to `addr`, flushing records held back so far.
    #[instrument(
        name = "shipper::attach",
        target = "shipper::shipper::Shipper",
        skip_all,
        level = "debug"
    )]
    pub fn attach(
        handle: &LogServerHandle,
        addr: &str,
        config: ShipperConfig,
    ) -> Result<Self, ShipperError> {
        let (host, port) = parse_address(addr)?;
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = handle.lock();
            if let ShipperState::Pending(records) = &mut *state {
                tracing::debug!(
                    records = records.len(),
                    "Flushing records held back before log server setup"
                );
                for frame in records.drain(..) {
                    let _ = tx.send(frame);
                }
            }
            *state = ShipperState::Attached(tx);
        }

        let drain_timeout = Duration::from_millis(config.drain_timeout_ms);
        let worker = tokio::spawn(run_worker(format!("{host}:{port}"), config, rx));

        Ok(Self {
            handle: handle.clone(),
            worker_handle: Some(worker),
            drain_timeout,
        })
    }

    /// Gracefully shutdown the Shipper worker
    ///
    /// Closes the record channel and waits for the worker to send what is
    /// queued, up to the drain timeout.
    pub async fn shutdown(&mut self) -> Result<(), ShipperError> {
        tracing::debug!("Closing log server record channel");
        self.handle.disable();

        if let Some(worker) = self.worker_handle.take() {
            if tokio::time::timeout(self.drain_timeout, worker).await.is_err() {
                return Err(ShipperError::DrainTimeout(self.drain_timeout));
            }
        }

        tracing::debug!("Shipper worker drained");
        Ok(())
    }
}

/// Background worker loop (owns the TCP connection).
///
/// Connects lazily on the first record, reconnects once when a write fails,
/// and discards records after the log server proved unreachable.
async fn run_worker(addr: String, config: ShipperConfig, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let mut stream: Option<TcpStream> = None;
    let mut unreachable = false;

    while let Some(frame) = rx.recv().await {
        if unreachable {
            continue;
        }

        for _ in 0..2 {
            if stream.is_none() {
                match connect_with_retry(&addr, &config).await {
                    Ok(s) => stream = Some(s),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            log_server = %addr,
                            "Log server unreachable, records will only be written locally"
                        );
                        unreachable = true;
                        break;
                    }
                }
            }

            if let Some(s) = stream.as_mut() {
                match s.write_all(&frame).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "Log server connection broken, reconnecting");
                        stream = None;
                    }
                }
            }
        }
    }

    if let Some(mut s) = stream {
        let _ = s.shutdown().await;
    }
}

/// Attempt connection establishment to the log server with exponential backoff + jitter logic
///
/// Policy:
/// - Start with `initial_retry_delay_ms`.
/// - Multiply delay by `backoff_factor` on each failed attempt, capping at `max_retry_delay_ms`.
/// - Apply jitter to randomize retry timing.
/// - Respect `max_reconnect_attempts` (if set); otherwise retry indefinitely.
async fn connect_with_retry(addr: &str, config: &ShipperConfig) -> Result<TcpStream, ShipperError> {
    let mut attempts = 0;
    let mut delay = Duration::from_millis(config.initial_retry_delay_ms);
    let timeout = Duration::from_millis(config.connection_timeout_ms);

    loop {
        attempts += 1;

        let error = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(log_server = %addr, attempts, "Connected to log server");
                return Ok(stream);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {timeout:?}"),
        };

        if let Some(limit) = config.max_reconnect_attempts {
            if attempts >= limit {
                return Err(ShipperError::ConnectionFailed(error));
            }
        }

        let jitter_factor: f64 = if config.retry_jitter > 0.0 {
            rand::rng().random_range(1.0 - config.retry_jitter..1.0 + config.retry_jitter)
        } else {
            1.0
        };
        let sleep_duration = delay.mul_f64(jitter_factor);
        tracing::debug!(
            error = %error,
            sleep_duration = ?sleep_duration,
            "Log server connection attempt {attempts} failed, sleeping"
        );
        sleep(sleep_duration).await;

        delay = Duration::from_millis(
            (delay.as_millis() as f64 * config.backoff_factor).min(config.max_retry_delay_ms as f64)
                as u64,
        );
    }
}

/// Span fields, root first, stored in the span's extensions.
#[derive(Debug, Default)]
struct SpanContext(Vec<(String, String)>);

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

fn upsert(context: &mut Vec<(String, String)>, key: String, value: String) {
    match context.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => context.push((key, value)),
    }
}

/// Tracing layer turning INFO-and-above events into log-server records.
pub struct LogServerLayer {
    handle: LogServerHandle,
    identity: LogServerIdentity,
    started: Instant,
}

impl fmt::Debug for LogServerLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogServerLayer")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .finish()
    }
}

impl LogServerLayer {
    /// Layer feeding `handle`, stamping records with `identity`.
    pub fn new(handle: LogServerHandle, identity: LogServerIdentity) -> Self {
        Self {
            handle,
            identity,
            started: Instant::now(),
        }
    }
}

fn level_name(target: &str, level: &Level) -> (&'static str, u32) {
    if target == START_STOP_TARGET {
        return ("START_STOP", START_STOP_LEVELNO);
    }
    match *level {
        Level::ERROR => ("ERROR", 40),
        Level::WARN => ("WARNING", 30),
        Level::INFO => ("INFO", 20),
        _ => ("DEBUG", 10),
    }
}

impl<S> Layer<S> for LogServerLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanContext(collector.fields));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        values.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(context) = extensions.get_mut::<SpanContext>() {
                for (k, v) in collector.fields {
                    upsert(&mut context.0, k, v);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO || meta.target() == SELF_TARGET {
            return;
        }

        let mut context = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanContext>() {
                    for (k, v) in &fields.0 {
                        upsert(&mut context, k.clone(), v.clone());
                    }
                }
            }
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        for (k, v) in collector.fields {
            upsert(&mut context, k, v);
        }

        let (levelname, levelno) = level_name(meta.target(), meta.level());
        let record = LogRecord::new(
            RecordSource {
                target: meta.target(),
                levelname,
                levelno,
                file: meta.file(),
                line: meta.line(),
                module_path: meta.module_path(),
            },
            collector.message.as_deref().unwrap_or_default(),
            &context,
            &self.identity,
            self.started.elapsed().as_secs_f64() * 1000.0,
        );

        if let Ok(frame) = record.to_frame() {
            self.handle.push(frame);
        }
    }
}
