//! Pipeline error handling: retry with backoff and per-stage circuit breakers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::types::PipelineStage;

/// Strategy applied by an [`ErrorHandler`] for a given stage-id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorHandlingStrategy {
    /// Re-raise immediately.
    FailFast,
    /// Record and swallow.
    Continue,
    /// Retry transient errors up to `max_retries` times with backoff.
    Retry,
    /// Track consecutive failures per stage-id, tripping a circuit breaker.
    CircuitBreaker,
}

/// Error raised by pipeline stages, carrying enough context to classify and
/// route it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("filter {stage_id} failed: {message}")]
    Filter { stage_id: String, message: String },

    #[error("transformer {stage_id} failed: {message}")]
    Transformer { stage_id: String, message: String },

    #[error("output {stage_id} failed: {message}")]
    Output { stage_id: String, message: String },

    #[error("circuit open for {stage}.{stage_id}")]
    CircuitOpen {
        stage: PipelineStage,
        stage_id: String,
    },
}

impl PipelineError {
    pub fn stage_id(&self) -> &str {
        match self {
            PipelineError::Filter { stage_id, .. }
            | PipelineError::Transformer { stage_id, .. }
            | PipelineError::Output { stage_id, .. }
            | PipelineError::CircuitOpen { stage_id, .. } => stage_id,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Filter { .. } => PipelineStage::Filter,
            PipelineError::Transformer { .. } => PipelineStage::Transform,
            PipelineError::Output { .. } => PipelineStage::Output,
            PipelineError::CircuitOpen { stage, .. } => *stage,
        }
    }

    /// Whether this error is a transient I/O-shaped failure eligible for
    /// the `Retry` strategy: connection, timeout, and similar kinds.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Output { message, .. } | PipelineError::Transformer { message, .. } => {
                let m = message.to_lowercase();
                m.contains("connection") || m.contains("timeout") || m.contains("timed out") || m.contains("reset")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct StageState {
    retry_count: u32,
    consecutive_failures: u32,
    circuit: CircuitState,
    opened_at: Option<Instant>,
}

impl Default for StageState {
    fn default() -> Self {
        Self {
            retry_count: 0,
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
            opened_at: None,
        }
    }
}

/// Tracks retry counts and circuit-breaker state per `"{stage}.{stage_id}"`.
///
/// Mirrors `original_source/src/nwws/pipeline/errors.py::ErrorHandler`: a
/// single instance is owned by a [`crate::pipeline::Pipeline`] and consulted
/// by every stage.
pub struct ErrorHandler {
    strategy: ErrorHandlingStrategy,
    max_retries: u32,
    retry_delay: Duration,
    backoff_multiplier: f64,
    circuit_breaker_threshold: u32,
    circuit_breaker_timeout: Duration,
    state: Mutex<HashMap<String, StageState>>,
}

impl ErrorHandler {
    pub fn new(strategy: ErrorHandlingStrategy) -> Self {
        Self {
            strategy,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(60),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    pub fn with_circuit_breaker_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_breaker_timeout = timeout;
        self
    }

    fn key(stage: PipelineStage, stage_id: &str) -> String {
        format!("{}.{}", stage.as_str(), stage_id)
    }

    /// Returns `Some(error)` if the circuit is open for `stage_id` and the
    /// call should fail fast without attempting the operation.
    pub fn circuit_open_error(
        &self,
        stage: PipelineStage,
        stage_id: &str,
    ) -> Option<PipelineError> {
        if self.strategy != ErrorHandlingStrategy::CircuitBreaker {
            return None;
        }
        let key = Self::key(stage, stage_id);
        let mut guard = self.state.lock().expect("error handler mutex poisoned");
        let entry = guard.entry(key).or_default();

        match entry.circuit {
            CircuitState::Open => {
                let opened_at = entry.opened_at.expect("open circuit has opened_at");
                if opened_at.elapsed() >= self.circuit_breaker_timeout {
                    entry.circuit = CircuitState::HalfOpen;
                    info!("circuit breaker moving to half-open for {stage_id}");
                    None
                } else {
                    Some(PipelineError::CircuitOpen {
                        stage,
                        stage_id: stage_id.to_string(),
                    })
                }
            }
            _ => None,
        }
    }

    /// Record the outcome of an attempt, updating circuit-breaker and retry
    /// bookkeeping. Returns the number of retries attempted so far for this
    /// stage-id.
    pub fn record_outcome(&self, stage: PipelineStage, stage_id: &str, success: bool) {
        if self.strategy != ErrorHandlingStrategy::CircuitBreaker
            && self.strategy != ErrorHandlingStrategy::Retry
        {
            return;
        }
        let key = Self::key(stage, stage_id);
        let mut guard = self.state.lock().expect("error handler mutex poisoned");
        let entry = guard.entry(key).or_default();

        if success {
            entry.retry_count = 0;
            entry.consecutive_failures = 0;
            if matches!(entry.circuit, CircuitState::Open | CircuitState::HalfOpen) {
                entry.circuit = CircuitState::Closed;
                info!("circuit breaker closed for {stage_id} after success");
            }
        } else {
            entry.consecutive_failures += 1;
            match entry.circuit {
                CircuitState::HalfOpen => {
                    entry.circuit = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    warn!("circuit breaker reopened for {stage_id} (half-open failure)");
                }
                CircuitState::Closed if entry.consecutive_failures >= self.circuit_breaker_threshold => {
                    entry.circuit = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    warn!(
                        "circuit breaker opened for {stage_id} after {} consecutive failures",
                        entry.consecutive_failures
                    );
                }
                _ => {}
            }
        }
    }

    /// Whether `error` should be retried for `stage_id` given the configured
    /// strategy, retry budget, and error transience.
    pub fn should_retry(&self, stage: PipelineStage, stage_id: &str, error: &PipelineError) -> bool {
        if self.strategy != ErrorHandlingStrategy::Retry {
            return false;
        }
        if !error.is_transient() {
            return false;
        }
        let key = Self::key(stage, stage_id);
        let guard = self.state.lock().expect("error handler mutex poisoned");
        let retry_count = guard.get(&key).map(|s| s.retry_count).unwrap_or(0);
        retry_count < self.max_retries
    }

    /// The delay to wait before the given retry attempt (0-indexed).
    pub fn retry_delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.retry_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs)
    }

    pub fn bump_retry_count(&self, stage: PipelineStage, stage_id: &str) {
        let key = Self::key(stage, stage_id);
        let mut guard = self.state.lock().expect("error handler mutex poisoned");
        let entry = guard.entry(key).or_default();
        entry.retry_count += 1;
    }

    pub fn strategy(&self) -> ErrorHandlingStrategy {
        self.strategy
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(ErrorHandlingStrategy::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_opens_after_threshold_consecutive_failures() {
        let handler = ErrorHandler::new(ErrorHandlingStrategy::CircuitBreaker)
            .with_circuit_breaker_threshold(3)
            .with_circuit_breaker_timeout(Duration::from_millis(50));

        assert!(handler.circuit_open_error(PipelineStage::Output, "mqtt").is_none());
        handler.record_outcome(PipelineStage::Output, "mqtt", false);
        handler.record_outcome(PipelineStage::Output, "mqtt", false);
        assert!(handler.circuit_open_error(PipelineStage::Output, "mqtt").is_none());
        handler.record_outcome(PipelineStage::Output, "mqtt", false);

        // Fourth call fails fast.
        let err = handler.circuit_open_error(PipelineStage::Output, "mqtt");
        assert!(matches!(err, Some(PipelineError::CircuitOpen { .. })));
    }

    #[test]
    fn circuit_half_opens_after_timeout_then_closes_on_success() {
        let handler = ErrorHandler::new(ErrorHandlingStrategy::CircuitBreaker)
            .with_circuit_breaker_threshold(1)
            .with_circuit_breaker_timeout(Duration::from_millis(20));

        handler.record_outcome(PipelineStage::Output, "mqtt", false);
        assert!(handler.circuit_open_error(PipelineStage::Output, "mqtt").is_some());

        std::thread::sleep(Duration::from_millis(30));

        // Half-open: admitted once.
        assert!(handler.circuit_open_error(PipelineStage::Output, "mqtt").is_none());
        handler.record_outcome(PipelineStage::Output, "mqtt", true);

        // Closed: consecutive failure counter reset, no immediate open.
        assert!(handler.circuit_open_error(PipelineStage::Output, "mqtt").is_none());
    }

    #[test]
    fn half_open_failure_reopens_circuit() {
        let handler = ErrorHandler::new(ErrorHandlingStrategy::CircuitBreaker)
            .with_circuit_breaker_threshold(1)
            .with_circuit_breaker_timeout(Duration::from_millis(10));

        handler.record_outcome(PipelineStage::Output, "db", false);
        std::thread::sleep(Duration::from_millis(15));
        assert!(handler.circuit_open_error(PipelineStage::Output, "db").is_none()); // half-open
        handler.record_outcome(PipelineStage::Output, "db", false);

        assert!(handler.circuit_open_error(PipelineStage::Output, "db").is_some());
    }
}
