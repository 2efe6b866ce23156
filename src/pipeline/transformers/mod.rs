//! Pipeline transformers: CPU-bound conversions between event variants.

mod chain;
mod noaaport;
mod xml;

pub use chain::ChainTransformer;
pub use noaaport::{NoaaPortTransformer, UgcProvider};
pub use xml::XmlTransformer;

use std::collections::HashMap;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// A pipeline transformer: converts an event, possibly changing its variant,
/// while preserving identity (`event_id`, `trace_id`). Transformers never
/// perform I/O (`SPEC_FULL.md` §5) and return the input unchanged when it is
/// not of the variant they operate on.
pub trait Transformer: Send + Sync {
    /// Stable identifier used in logs, metrics, and error-handler keys.
    fn transformer_id(&self) -> &str;

    /// Transform `event`, returning the replacement event (or the same event,
    /// unchanged, on pass-through).
    fn transform(&self, event: PipelineEvent) -> Result<PipelineEvent, PipelineError>;
}

/// A factory producing a configured [`Transformer`] from a `config` map.
pub type TransformerFactory =
    Box<dyn Fn(&str, &HashMap<String, String>) -> Box<dyn Transformer> + Send + Sync>;

/// String-keyed registry of transformer factories. The nested
/// `{transformer_type, transformer_id, config}` shape used to build a
/// [`ChainTransformer`] is pinned by spec.md §4.4; the registry itself
/// mirrors `FilterRegistry` (`crate::pipeline::filters::FilterRegistry`).
pub struct TransformerRegistry {
    factories: HashMap<String, TransformerFactory>,
}

impl TransformerRegistry {
    /// A registry pre-populated with the built-in transformer types:
    /// `noaaport`, `xml`.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("noaaport", |id, _cfg| {
            Box::new(NoaaPortTransformer::new(id, UgcProvider::empty())) as Box<dyn Transformer>
        });
        registry.register("xml", |id, _cfg| {
            Box::new(XmlTransformer::new(id)) as Box<dyn Transformer>
        });
        registry
    }

    pub fn register(
        &mut self,
        transformer_type: &str,
        factory: impl Fn(&str, &HashMap<String, String>) -> Box<dyn Transformer> + Send + Sync + 'static,
    ) {
        self.factories
            .insert(transformer_type.to_string(), Box::new(factory));
    }

    pub fn create(
        &self,
        transformer_type: &str,
        transformer_id: &str,
        config: &HashMap<String, String>,
    ) -> Option<Box<dyn Transformer>> {
        self.factories
            .get(transformer_type)
            .map(|f| f(transformer_id, config))
    }

    /// Build a [`ChainTransformer`] from an ordered list of `(transformer_type,
    /// transformer_id, config)` triples.
    pub fn build_chain(
        &self,
        chain_id: impl Into<String>,
        specs: &[(&str, &str, HashMap<String, String>)],
    ) -> Option<ChainTransformer> {
        let mut stages = Vec::with_capacity(specs.len());
        for (transformer_type, transformer_id, config) in specs {
            stages.push(self.create(transformer_type, transformer_id, config)?);
        }
        Some(ChainTransformer::new(chain_id, stages))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
