use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::TextProduct;

/// The stage a [`PipelineEvent`] currently occupies.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Ingest,
    Filter,
    Transform,
    Output,
}

impl PipelineStage {
    /// The lowercase string used to key error-handler and metric state,
    /// e.g. `"filter"` or `"output"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Ingest => "ingest",
            PipelineStage::Filter => "filter",
            PipelineStage::Transform => "transform",
            PipelineStage::Output => "output",
        }
    }
}

/// Metadata carried by every event as it advances through the pipeline.
///
/// Metadata is immutable per stage: [`PipelineEventMetadata::with_stage`]
/// returns a new value sharing `event_id` and `trace_id` but with a fresh
/// `timestamp` and updated `stage`/`source`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineEventMetadata {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub stage: PipelineStage,
    pub trace_id: Uuid,
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl PipelineEventMetadata {
    /// Create metadata for a freshly ingested event: a new `event_id` and
    /// `trace_id`, stage `Ingest`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            stage: PipelineStage::Ingest,
            trace_id: Uuid::new_v4(),
            custom: BTreeMap::new(),
        }
    }

    /// Advance to a new stage, preserving identity.
    pub fn with_stage(&self, stage: PipelineStage, source: impl Into<String>) -> Self {
        Self {
            event_id: self.event_id,
            timestamp: Utc::now(),
            source: source.into(),
            stage,
            trace_id: self.trace_id,
            custom: self.custom.clone(),
        }
    }

    /// Insert a custom annotation (applied-transformer list, filter decision,
    /// stage duration, ...), overwriting any previous value for the key.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.custom.insert(key.into(), value.into());
    }
}

/// A raw product as received from the XMPP ingest, before parsing.
///
/// Field names mirror the NWWS-OI vendor namespace attributes; see
/// `SPEC_FULL.md` §3.2.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawIngest {
    pub metadata: PipelineEventMetadata,
    pub awipsid: String,
    pub cccc: String,
    pub product_id: String,
    pub issue: DateTime<Utc>,
    pub ttaaii: String,
    pub subject: String,
    pub noaaport: String,
    pub delay_stamp: Option<DateTime<Utc>>,
}

impl RawIngest {
    pub const CONTENT_TYPE: &'static str = "application/octet-stream";
}

/// A [`RawIngest`] event enriched with a fully parsed structured product.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextProductEvent {
    pub metadata: PipelineEventMetadata,
    pub awipsid: String,
    pub cccc: String,
    pub product_id: String,
    pub issue: DateTime<Utc>,
    pub ttaaii: String,
    pub subject: String,
    pub noaaport: String,
    pub delay_stamp: Option<DateTime<Utc>>,
    pub product: TextProduct,
}

impl TextProductEvent {
    pub const CONTENT_TYPE: &'static str = "application/json";
}

/// A [`TextProductEvent`] with an XML blob extracted from its text.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct XmlEvent {
    pub metadata: PipelineEventMetadata,
    pub awipsid: String,
    pub cccc: String,
    pub product_id: String,
    pub issue: DateTime<Utc>,
    pub ttaaii: String,
    pub subject: String,
    pub noaaport: String,
    pub delay_stamp: Option<DateTime<Utc>>,
    pub product: TextProduct,
    pub xml: String,
}

impl XmlEvent {
    pub const CONTENT_TYPE: &'static str = "text/xml";
}

/// The tagged union of event variants flowing through the pipeline.
///
/// This models the dynamic `isinstance`-dispatch of the source system as an
/// explicit Rust enum (see `SPEC_FULL.md` §9 "Ambient dynamism").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "variant")]
pub enum PipelineEvent {
    RawIngest(RawIngest),
    TextProduct(TextProductEvent),
    Xml(XmlEvent),
}

impl PipelineEvent {
    pub fn metadata(&self) -> &PipelineEventMetadata {
        match self {
            PipelineEvent::RawIngest(e) => &e.metadata,
            PipelineEvent::TextProduct(e) => &e.metadata,
            PipelineEvent::Xml(e) => &e.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut PipelineEventMetadata {
        match self {
            PipelineEvent::RawIngest(e) => &mut e.metadata,
            PipelineEvent::TextProduct(e) => &mut e.metadata,
            PipelineEvent::Xml(e) => &mut e.metadata,
        }
    }

    /// Advance every variant's metadata to `stage`, tagging the new source.
    pub fn advance_stage(&mut self, stage: PipelineStage, source: impl Into<String>) {
        let new_metadata = self.metadata().with_stage(stage, source);
        *self.metadata_mut() = new_metadata;
    }

    pub fn product_id(&self) -> &str {
        match self {
            PipelineEvent::RawIngest(e) => &e.product_id,
            PipelineEvent::TextProduct(e) => &e.product_id,
            PipelineEvent::Xml(e) => &e.product_id,
        }
    }

    pub fn awipsid(&self) -> &str {
        match self {
            PipelineEvent::RawIngest(e) => &e.awipsid,
            PipelineEvent::TextProduct(e) => &e.awipsid,
            PipelineEvent::Xml(e) => &e.awipsid,
        }
    }

    pub fn cccc(&self) -> &str {
        match self {
            PipelineEvent::RawIngest(e) => &e.cccc,
            PipelineEvent::TextProduct(e) => &e.cccc,
            PipelineEvent::Xml(e) => &e.cccc,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PipelineEvent::RawIngest(_) => RawIngest::CONTENT_TYPE,
            PipelineEvent::TextProduct(_) => TextProductEvent::CONTENT_TYPE,
            PipelineEvent::Xml(_) => XmlEvent::CONTENT_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_stage_preserves_identity_and_refreshes_timestamp() {
        let meta = PipelineEventMetadata::new("ingest");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let advanced = meta.with_stage(PipelineStage::Filter, "duplicate-filter");

        assert_eq!(meta.event_id, advanced.event_id);
        assert_eq!(meta.trace_id, advanced.trace_id);
        assert_eq!(advanced.stage, PipelineStage::Filter);
        assert_eq!(advanced.source, "duplicate-filter");
        assert!(advanced.timestamp >= meta.timestamp);
    }
}
