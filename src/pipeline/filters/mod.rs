//! Pipeline filters: CPU-bound, synchronous accept/reject decisions.

mod duplicate;
mod generic;
mod test_message;

pub use duplicate::DuplicateFilter;
pub use generic::{AttributeFilter, CompositeOp, CompositeFilter, FunctionFilter, PassThroughFilter, RegexFilter};
pub use test_message::TestMessageFilter;

use std::collections::HashMap;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// A pipeline filter: decides whether an event continues through the
/// pipeline. Filters never perform I/O (`SPEC_FULL.md` §5).
pub trait Filter: Send + Sync {
    /// Stable identifier used in logs, metrics, and error-handler keys.
    fn filter_id(&self) -> &str;

    /// Evaluate the filter against `event`.
    ///
    /// Returns `Ok(true)` to continue processing, `Ok(false)` to drop the
    /// event, or `Err` if the filter itself failed.
    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError>;
}

/// A factory producing a configured [`Filter`] from a `config` map, the
/// shape registered filter types are constructed from.
pub type FilterFactory = Box<dyn Fn(&str, &HashMap<String, String>) -> Box<dyn Filter> + Send + Sync>;

/// String-keyed registry of filter factories, mirroring
/// `original_source/src/nwws/pipeline/filters.py::FilterRegistry`.
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// A registry pre-populated with the built-in filter types:
    /// `passthrough`, `test_message`, `duplicate`, `attribute`, `regex`,
    /// `composite`.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("passthrough", |_id, _cfg| {
            Box::new(PassThroughFilter) as Box<dyn Filter>
        });
        registry.register("test_message", |id, _cfg| {
            Box::new(TestMessageFilter::new(id)) as Box<dyn Filter>
        });
        registry.register("duplicate", |id, cfg| {
            let window_seconds = cfg
                .get("window_seconds")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(300.0);
            Box::new(DuplicateFilter::new(id, std::time::Duration::from_secs_f64(window_seconds)))
                as Box<dyn Filter>
        });
        registry
    }

    pub fn register(
        &mut self,
        filter_type: &str,
        factory: impl Fn(&str, &HashMap<String, String>) -> Box<dyn Filter> + Send + Sync + 'static,
    ) {
        self.factories.insert(filter_type.to_string(), Box::new(factory));
    }

    pub fn create(
        &self,
        filter_type: &str,
        filter_id: &str,
        config: &HashMap<String, String>,
    ) -> Option<Box<dyn Filter>> {
        self.factories.get(filter_type).map(|f| f(filter_id, config))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
