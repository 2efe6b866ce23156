//! The XMPP receiver: connects to the NWWS-OI multi-user chat room, parses
//! inbound stanzas into [`RawIngest`](crate::pipeline::types::RawIngest)
//! events, and submits them to the ingest queue.
//!
//! Generalizes the teacher's `connection.rs`/`stream.rs`/`message.rs` trio
//! into the full connection lifecycle named by `SPEC_FULL.md` §4.1:
//! `Disconnected → Connecting → Connected → Authenticated → Joined →
//! Running → {Stopped | Reconnecting}`.

mod connection;
mod parse;

pub mod framing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use crate::config::XmppConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::types::PipelineEvent;

use connection::XmppConnection;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const STATS_INTERVAL: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(75);
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);
const BACKOFF_MULTIPLIER: f64 = 2.0;
const CREDENTIAL_FAILURE_DELAY: Duration = Duration::from_secs(300);

/// Condition a receiver can fail with; surfaced to the caller alongside a
/// [`ConnectionState::Reconnecting`] transition rather than terminating the
/// process.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("invalid XMPP configuration: {0}")]
    Configuration(String),
    #[error("credentials were refused: {0}")]
    Credentials(tokio_xmpp::Error),
    #[error("network error: {0}")]
    Network(tokio_xmpp::Error),
    #[error("XMPP parse error: {0}")]
    XmppParse(#[from] xmpp_parsers::Error),
    #[error("the XMPP stream ended")]
    StreamEnded,
    #[error("connection attempt timed out after {CONNECT_TIMEOUT:?}")]
    ConnectTimeout,
    #[error("no message received in over {0:?}")]
    IdleTimeout(Duration),
}

impl From<tokio_xmpp::Error> for ReceiverError {
    fn from(e: tokio_xmpp::Error) -> Self {
        Self::Network(e)
    }
}

impl ReceiverError {
    /// Whether a reconnect is likely to help, mirroring
    /// `pipeline::errors::PipelineError::is_transient`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReceiverError::Network(_)
                | ReceiverError::StreamEnded
                | ReceiverError::ConnectTimeout
                | ReceiverError::IdleTimeout(_)
        )
    }

    /// Credential/configuration failures get a long, fixed backoff instead
    /// of the ordinary exponential schedule: retrying sooner cannot help.
    fn is_persistent_auth_failure(&self) -> bool {
        matches!(self, ReceiverError::Configuration(_) | ReceiverError::Credentials(_))
    }
}

/// The receiver's connection lifecycle state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Joined,
    Running,
    Reconnecting,
    Stopped,
}

/// Events a receiver emits for observability: connection lifecycle
/// transitions and non-fatal errors. Product events go straight to the
/// ingest queue instead, since that path needs backpressure.
#[derive(Debug)]
pub enum ReceiverEvent {
    ConnectionState(ConnectionState),
    Error(ReceiverError),
}

/// Handle to a receiver running on its own OS thread.
pub struct ReceiverHandle {
    events: mpsc::Receiver<ReceiverEvent>,
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl ReceiverHandle {
    /// Receives the next lifecycle/error event, or `None` once the receiver
    /// has fully stopped and dropped its sender.
    pub async fn recv(&mut self) -> Option<ReceiverEvent> {
        self.events.recv().await
    }

    /// Requests a graceful shutdown: the receiver leaves the MUC,
    /// disconnects, and stops reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// The nickname used to join the MUC: the UTC launch minute, `YYYYMMDDHHMM`.
///
/// Grounded in `original_source/src/nwws/receiver/weather_wire.py:
/// self.nickname = f"{datetime.now(UTC):%Y%m%d%H%M}"`.
pub fn launch_nickname() -> String {
    Utc::now().format("%Y%m%d%H%M").to_string()
}

/// Spawns the receiver on a dedicated OS thread running a
/// `tokio::task::LocalSet`, since `tokio-xmpp`/`xmpp-parsers` types are
/// `!Send` (teacher's `stream.rs::Stream::new` does the same).
///
/// Parsed products are submitted to `queue_tx`; a full queue fails the
/// submission after `submit_timeout` and is logged and counted, never
/// blocking the receiver indefinitely.
pub fn spawn(
    xmpp: XmppConfig,
    queue_tx: mpsc::Sender<PipelineEvent>,
    submit_timeout: Duration,
    metrics: Option<MetricsCollector>,
) -> ReceiverHandle {
    let (event_tx, event_rx) = mpsc::channel(32);
    let shutdown = Arc::new(Notify::new());
    let stopped = Arc::new(AtomicBool::new(false));

    let thread_shutdown = shutdown.clone();
    let thread_stopped = stopped.clone();
    std::thread::spawn(move || {
        let local = tokio::task::LocalSet::new();
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("receiver runtime failed to start: {e}");
                thread_stopped.store(true, Ordering::SeqCst);
                return;
            }
        };

        local.spawn_local(run(xmpp, queue_tx, submit_timeout, metrics, event_tx, thread_shutdown));
        rt.block_on(local);
        thread_stopped.store(true, Ordering::SeqCst);
    });

    ReceiverHandle {
        events: event_rx,
        shutdown,
        stopped,
    }
}

/// Exponential backoff with a cap, reset after every successful connection.
struct Backoff {
    base: Duration,
    cap: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration, cap: Duration, multiplier: f64) -> Self {
        Self { base, cap, multiplier, attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt as i32);
        let delay = self.base.mul_f64(factor).min(self.cap);
        self.attempt += 1;
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

enum RunOutcome {
    ShuttingDown,
    Error(ReceiverError),
}

async fn run(
    xmpp: XmppConfig,
    queue_tx: mpsc::Sender<PipelineEvent>,
    submit_timeout: Duration,
    metrics: Option<MetricsCollector>,
    event_tx: mpsc::Sender<ReceiverEvent>,
    shutdown: Arc<Notify>,
) {
    let mut backoff = Backoff::new(BACKOFF_BASE, BACKOFF_CAP, BACKOFF_MULTIPLIER);
    let nickname = launch_nickname();

    loop {
        if event_tx
            .send(ReceiverEvent::ConnectionState(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return;
        }
        if let Some(m) = &metrics {
            m.update_status("xmpp_connection", 0.0, &[]);
        }

        let outcome = run_once(
            &xmpp,
            &nickname,
            &queue_tx,
            submit_timeout,
            metrics.as_ref(),
            &event_tx,
            &shutdown,
        )
        .await;

        match outcome {
            RunOutcome::ShuttingDown => {
                let _ = event_tx
                    .send(ReceiverEvent::ConnectionState(ConnectionState::Stopped))
                    .await;
                return;
            }
            RunOutcome::Error(e) => {
                let persistent_auth_failure = e.is_persistent_auth_failure();
                error!("receiver error, reconnecting: {e}");
                let _ = event_tx.send(ReceiverEvent::Error(e)).await;
                let _ = event_tx
                    .send(ReceiverEvent::ConnectionState(ConnectionState::Reconnecting))
                    .await;
                if let Some(m) = &metrics {
                    m.increment_counter("xmpp_reconnects_total", &[], 1.0);
                }

                let delay = if persistent_auth_failure {
                    CREDENTIAL_FAILURE_DELAY
                } else {
                    backoff.next_delay()
                };

                tokio::select! {
                    _ = shutdown.notified() => {
                        let _ = event_tx.send(ReceiverEvent::ConnectionState(ConnectionState::Stopped)).await;
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn run_once(
    xmpp: &XmppConfig,
    nickname: &str,
    queue_tx: &mpsc::Sender<PipelineEvent>,
    submit_timeout: Duration,
    metrics: Option<&MetricsCollector>,
    event_tx: &mpsc::Sender<ReceiverEvent>,
    shutdown: &Notify,
) -> RunOutcome {
    let last_message_time = Arc::new(Mutex::new(Instant::now()));

    let mut conn = tokio::select! {
        _ = shutdown.notified() => return RunOutcome::ShuttingDown,
        result = tokio::time::timeout(CONNECT_TIMEOUT, XmppConnection::connect(xmpp, nickname, last_message_time.clone())) => {
            match result {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => return RunOutcome::Error(e),
                Err(_) => return RunOutcome::Error(ReceiverError::ConnectTimeout),
            }
        }
    };

    if event_tx.send(ReceiverEvent::ConnectionState(ConnectionState::Connected)).await.is_err() {
        return RunOutcome::ShuttingDown;
    }
    let _ = event_tx.send(ReceiverEvent::ConnectionState(ConnectionState::Authenticated)).await;
    let _ = event_tx.send(ReceiverEvent::ConnectionState(ConnectionState::Joined)).await;
    let _ = event_tx.send(ReceiverEvent::ConnectionState(ConnectionState::Running)).await;
    if let Some(m) = metrics {
        m.update_status("xmpp_connection", 1.0, &[]);
    }
    info!("receiver running as {nickname}");

    let mut idle_ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
    let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                conn.end().await;
                return RunOutcome::ShuttingDown;
            }
            _ = idle_ticker.tick() => {
                let idle_for = last_message_time
                    .lock()
                    .expect("receiver last-message-time mutex poisoned")
                    .elapsed();
                if let Some(m) = metrics {
                    m.set_gauge("xmpp_idle_seconds", &[], idle_for.as_secs_f64());
                }
                if idle_for >= IDLE_TIMEOUT {
                    warn!("no message received in {idle_for:?}, forcing reconnect");
                    conn.end().await;
                    return RunOutcome::Error(ReceiverError::IdleTimeout(idle_for));
                }
            }
            _ = stats_ticker.tick() => {
                if let Some(m) = metrics {
                    m.update_status("xmpp_connection", 1.0, &[]);
                }
            }
            message = conn.next_raw_ingest() => {
                match message {
                    Ok(raw) => {
                        submit(queue_tx, PipelineEvent::RawIngest(raw), submit_timeout, metrics).await;
                    }
                    Err(e) => {
                        conn.end().await;
                        return RunOutcome::Error(e);
                    }
                }
            }
        }
    }
}

/// Submits `event` to the ingest queue, giving up after `timeout` so a wedged
/// pipeline never blocks the receiver's own idle watchdog or shutdown path.
async fn submit(
    queue_tx: &mpsc::Sender<PipelineEvent>,
    event: PipelineEvent,
    timeout: Duration,
    metrics: Option<&MetricsCollector>,
) {
    let event_id = event.metadata().event_id;
    match tokio::time::timeout(timeout, queue_tx.send(event)).await {
        Ok(Ok(())) => {
            if let Some(m) = metrics {
                m.increment_counter("events_ingested_total", &[], 1.0);
            }
        }
        Ok(Err(_)) => {
            warn!("ingest queue closed, dropping event {event_id}");
        }
        Err(_) => {
            warn!("ingest queue full after {timeout:?}, dropping event {event_id}");
            if let Some(m) = metrics {
                m.increment_counter("events_backpressure_dropped_total", &[], 1.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_nickname_matches_the_launch_minute_format() {
        let nickname = launch_nickname();
        assert_eq!(nickname.len(), 12);
        assert!(nickname.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn backoff_grows_and_caps_then_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn auth_and_configuration_errors_are_not_transient() {
        assert!(!ReceiverError::Configuration("bad jid".into()).is_transient());
        assert!(ReceiverError::StreamEnded.is_transient());
        assert!(ReceiverError::IdleTimeout(Duration::from_secs(90)).is_transient());
    }
}
