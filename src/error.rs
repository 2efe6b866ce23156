//! Top-level error type composing every module's own error enum, per
//! `SPEC_FULL.md` §7. `main` matches on this once, at the boundaries where a
//! failure either exits the process or gets logged and absorbed.

use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::errors::PipelineError;
use crate::receiver::ReceiverError;

/// A fatal or propagated error reaching `main`.
///
/// Most receiver and pipeline errors never reach here: the receiver retries
/// internally and the pipeline's [`PipelineError`]s are logged per-event by
/// the error handler. `BridgeError` exists for conditions with no further
/// recovery path available to the caller: invalid configuration at startup,
/// or a component that failed to start at all.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("receiver error: {0}")]
    Receiver(#[from] ReceiverError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("http server error: {0}")]
    Http(std::io::Error),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
