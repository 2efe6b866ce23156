//! The pipeline engine: orchestrates filters, a transformer, and concurrent
//! output fan-out for a single stream of [`types::PipelineEvent`]s.
//!
//! Grounded in `original_source/src/nwws/pipeline/core.py::Pipeline`.

pub mod errors;
pub mod filters;
pub mod outputs;
pub mod transformers;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::join_all;
use log::{error, info, warn};

use crate::metrics::MetricsCollector;

use errors::{ErrorHandler, PipelineError};
use filters::Filter;
use outputs::Output;
use transformers::Transformer;
use types::{PipelineEvent, PipelineStage};

/// Running totals kept by a [`Pipeline`] across its lifetime, mirroring
/// `original_source/src/nwws/pipeline/stats.py`'s event counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: std::sync::atomic::AtomicU64,
    filtered: std::sync::atomic::AtomicU64,
    errored: std::sync::atomic::AtomicU64,
}

impl PipelineStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }
}

/// Owns an ordered list of filters, an optional transformer, a list of
/// outputs, a stats collector, and an error handler, matching spec.md §4.2.
pub struct Pipeline {
    pipeline_id: String,
    filters: Vec<Box<dyn Filter>>,
    transformer: Option<Box<dyn Transformer>>,
    outputs: Vec<Box<dyn Output>>,
    error_handler: ErrorHandler,
    stats: PipelineStats,
    metrics: Option<MetricsCollector>,
    started: AtomicBool,
}

impl Pipeline {
    pub fn new(pipeline_id: impl Into<String>, error_handler: ErrorHandler) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            filters: Vec::new(),
            transformer: None,
            outputs: Vec::new(),
            error_handler,
            stats: PipelineStats::default(),
            metrics: None,
            started: AtomicBool::new(false),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_transformer(mut self, transformer: Box<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_output(mut self, output: Box<dyn Output>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Starts every output in registration order. If any fails, startup
    /// aborts immediately; outputs already started remain started and must
    /// still be explicitly stopped by the caller.
    pub async fn start(&self) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for output in &self.outputs {
            info!("pipeline {} starting output {}", self.pipeline_id, output.output_id());
            output.start().await?;
        }
        Ok(())
    }

    /// Stops every output in registration order. Stop errors are logged but
    /// never propagated.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for output in &self.outputs {
            if let Err(e) = output.stop().await {
                warn!("pipeline {} output {} failed to stop cleanly: {e}", self.pipeline_id, output.output_id());
            }
        }
    }

    /// Runs `event` through filters, the transformer, and every output.
    ///
    /// Returns `Ok(true)` if the event reached every output, `Ok(false)` if
    /// a filter dropped it. An `Err` surfaces the first filter/transformer
    /// failure, or the first output failure once every output has been
    /// attempted.
    pub async fn process(&self, mut event: PipelineEvent) -> Result<bool, PipelineError> {
        if !self.is_started() {
            warn!("pipeline {} not started, skipping event", self.pipeline_id);
            return Ok(false);
        }

        let start = Instant::now();
        let event_id = event.metadata().event_id;

        event.advance_stage(PipelineStage::Filter, &self.pipeline_id);
        let filter_start = Instant::now();
        for filter in &self.filters {
            match self.run_filter(filter.as_ref(), &event) {
                Ok(true) => {}
                Ok(false) => {
                    self.stats.filtered.fetch_add(1, Ordering::Relaxed);
                    event
                        .metadata_mut()
                        .annotate("filtered_by", filter.filter_id().to_string());
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_counter("events_filtered_total", &[("filter", filter.filter_id())], 1.0);
                    }
                    return Ok(false);
                }
                Err(e) => {
                    self.stats.errored.fetch_add(1, Ordering::Relaxed);
                    error!("pipeline {} filter {} failed for event {event_id}: {e}", self.pipeline_id, filter.filter_id());
                    return Err(e);
                }
            }
        }

        event
            .metadata_mut()
            .annotate("filter_duration_ms", filter_start.elapsed().as_secs_f64() * 1000.0);

        event.advance_stage(PipelineStage::Transform, &self.pipeline_id);
        let transform_start = Instant::now();
        if let Some(transformer) = &self.transformer {
            event = match transformer.transform(event) {
                Ok(e) => e,
                Err(e) => {
                    self.stats.errored.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "pipeline {} transformer {} failed for event {event_id}: {e}",
                        self.pipeline_id,
                        transformer.transformer_id()
                    );
                    return Err(e);
                }
            };
        }
        event
            .metadata_mut()
            .annotate("transform_duration_ms", transform_start.elapsed().as_secs_f64() * 1000.0);

        event.advance_stage(PipelineStage::Output, &self.pipeline_id);
        let output_start = Instant::now();
        self.send_to_outputs(&event).await?;
        event
            .metadata_mut()
            .annotate("output_duration_ms", output_start.elapsed().as_secs_f64() * 1000.0);

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            metrics.record_operation("process", true, elapsed_ms, &[("pipeline", self.pipeline_id.as_str())]);
        }
        Ok(true)
    }

    fn run_filter(&self, filter: &dyn Filter, event: &PipelineEvent) -> Result<bool, PipelineError> {
        if let Some(err) = self.error_handler.circuit_open_error(PipelineStage::Filter, filter.filter_id()) {
            return Err(err);
        }
        let result = filter.should_process(event);
        self.error_handler
            .record_outcome(PipelineStage::Filter, filter.filter_id(), result.is_ok());
        result
    }

    /// Dispatches `event` to every output concurrently, waits for all to
    /// finish, and re-raises the first error (after logging the rest).
    async fn send_to_outputs(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        let futures = self.outputs.iter().map(|output| async move {
            if let Some(err) = self
                .error_handler
                .circuit_open_error(PipelineStage::Output, output.output_id())
            {
                return Err(err);
            }

            let mut attempt = 0;
            loop {
                let result = output.send(event).await;
                let success = result.is_ok();
                self.error_handler
                    .record_outcome(PipelineStage::Output, output.output_id(), success);

                match result {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        if self.error_handler.should_retry(PipelineStage::Output, output.output_id(), &e) {
                            self.error_handler.bump_retry_count(PipelineStage::Output, output.output_id());
                            let delay = self.error_handler.retry_delay_for_attempt(attempt);
                            warn!(
                                "pipeline {} output {} failed, retrying in {:?}: {e}",
                                self.pipeline_id,
                                output.output_id(),
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(e);
                    }
                }
            }
        });

        let results = join_all(futures).await;
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                self.stats.errored.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(e.stage_id(), "output_send", &[]);
                }
                error!("pipeline {} output failed: {e}", self.pipeline_id);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use errors::ErrorHandlingStrategy;
    use filters::TestMessageFilter;
    use types::{PipelineEventMetadata, RawIngest};

    struct CountingOutput {
        id: String,
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Output for CountingOutput {
        fn output_id(&self) -> &str {
            &self.id
        }
        async fn start(&self) -> Result<(), PipelineError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), PipelineError> {
            Ok(())
        }
        async fn send(&self, _event: &PipelineEvent) -> Result<(), PipelineError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(awipsid: &str) -> PipelineEvent {
        PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: awipsid.to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        })
    }

    #[tokio::test]
    async fn process_delivers_to_all_outputs_when_not_filtered() {
        let count = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new("test", ErrorHandler::new(ErrorHandlingStrategy::Continue))
            .with_filter(Box::new(TestMessageFilter::default()))
            .with_output(Box::new(CountingOutput { id: "a".into(), count: count.clone() }))
            .with_output(Box::new(CountingOutput { id: "b".into(), count: count.clone() }));
        pipeline.start().await.unwrap();

        let delivered = pipeline.process(event("TORALY")).await.unwrap();
        assert!(delivered);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.stats().processed(), 1);
    }

    #[tokio::test]
    async fn process_short_circuits_on_filter_rejection() {
        let count = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new("test", ErrorHandler::new(ErrorHandlingStrategy::Continue))
            .with_filter(Box::new(TestMessageFilter::default()))
            .with_output(Box::new(CountingOutput { id: "a".into(), count: count.clone() }));
        pipeline.start().await.unwrap();

        let delivered = pipeline.process(event("TSTMSG")).await.unwrap();
        assert!(!delivered);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.stats().filtered(), 1);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_harmless_noop() {
        let pipeline = Pipeline::new("test", ErrorHandler::default());
        pipeline.stop().await;
        assert!(!pipeline.is_started());
    }

    #[tokio::test]
    async fn start_then_stop_is_idempotent_and_returns_to_initial_state() {
        let pipeline = Pipeline::new("test", ErrorHandler::default());
        pipeline.start().await.unwrap();
        assert!(pipeline.is_started());
        pipeline.start().await.unwrap();
        pipeline.stop().await;
        assert!(!pipeline.is_started());
        pipeline.stop().await;
    }
}
