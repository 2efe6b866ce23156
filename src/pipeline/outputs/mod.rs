//! Pipeline outputs: sink adapters with a start/stop lifecycle and a
//! per-event send, fanned out concurrently by the pipeline engine.

mod console;
mod database;
mod mqtt;

pub use console::ConsoleOutput;
pub use database::{DatabaseConfig, DatabaseOutput};
pub use mqtt::{MqttConfig, MqttOutput};

use async_trait::async_trait;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// A pipeline output: a sink `send(event)` is dispatched to, alongside a
/// `start`/`stop` connection lifecycle. Both `start` and `stop` must be
/// idempotent; implementations must not block the pipeline indefinitely on
/// `send`.
#[async_trait]
pub trait Output: Send + Sync {
    /// Stable identifier used in logs, metrics, and error-handler keys.
    fn output_id(&self) -> &str;

    /// Establish any connections. Called once before the pipeline begins
    /// processing events; idempotent.
    async fn start(&self) -> Result<(), PipelineError>;

    /// Gracefully close connections. Idempotent; errors are logged by the
    /// caller but never propagated.
    async fn stop(&self) -> Result<(), PipelineError>;

    /// Deliver `event` to the sink.
    async fn send(&self, event: &PipelineEvent) -> Result<(), PipelineError>;
}
