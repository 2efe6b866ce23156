use std::collections::HashSet;

use log::{error, warn};

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

use super::Filter;

/// Allows every event through. Useful as a registry default or a no-op slot
/// in a configured filter chain.
pub struct PassThroughFilter;

impl Filter for PassThroughFilter {
    fn filter_id(&self) -> &str {
        "passthrough"
    }

    fn should_process(&self, _event: &PipelineEvent) -> Result<bool, PipelineError> {
        Ok(true)
    }
}

/// Filters on an arbitrary string-valued accessor against an allowed set.
///
/// Stands in for the source's `AttributeFilter`/`PropertyFilter`, which used
/// `getattr` against a dynamically named field; Rust's event variants are a
/// closed enum, so the accessor is supplied as a typed closure rather than a
/// field name.
pub struct AttributeFilter {
    filter_id: String,
    accessor: Box<dyn Fn(&PipelineEvent) -> Option<String> + Send + Sync>,
    allowed_values: HashSet<String>,
    case_sensitive: bool,
}

impl AttributeFilter {
    pub fn new(
        filter_id: impl Into<String>,
        accessor: impl Fn(&PipelineEvent) -> Option<String> + Send + Sync + 'static,
        allowed_values: impl IntoIterator<Item = String>,
        case_sensitive: bool,
    ) -> Self {
        Self {
            filter_id: filter_id.into(),
            accessor: Box::new(accessor),
            allowed_values: allowed_values.into_iter().collect(),
            case_sensitive,
        }
    }
}

impl Filter for AttributeFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        let Some(value) = (self.accessor)(event) else {
            warn!(
                "attribute filter {} found no value to compare, dropping event",
                self.filter_id
            );
            return Ok(false);
        };

        if self.case_sensitive {
            Ok(self.allowed_values.contains(&value))
        } else {
            let lowered = value.to_lowercase();
            Ok(self
                .allowed_values
                .iter()
                .any(|v| v.to_lowercase() == lowered))
        }
    }
}

/// Filters on an arbitrary string-valued accessor against a regular
/// expression, mirroring the source's `RegexFilter`.
pub struct RegexFilter {
    filter_id: String,
    accessor: Box<dyn Fn(&PipelineEvent) -> Option<String> + Send + Sync>,
    regex: regex::Regex,
}

impl RegexFilter {
    pub fn new(
        filter_id: impl Into<String>,
        accessor: impl Fn(&PipelineEvent) -> Option<String> + Send + Sync + 'static,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            filter_id: filter_id.into(),
            accessor: Box::new(accessor),
            regex: regex::Regex::new(pattern)?,
        })
    }
}

impl Filter for RegexFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        match (self.accessor)(event) {
            Some(value) => Ok(self.regex.is_match(&value)),
            None => {
                warn!(
                    "regex filter {} found no value to match, dropping event",
                    self.filter_id
                );
                Ok(false)
            }
        }
    }
}

/// How a [`CompositeFilter`] combines its children's decisions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompositeOp {
    And,
    Or,
}

/// Combines multiple filters with a logical AND/OR, mirroring the source's
/// `CompositeFilter`.
pub struct CompositeFilter {
    filter_id: String,
    filters: Vec<Box<dyn Filter>>,
    op: CompositeOp,
}

impl CompositeFilter {
    pub fn new(filter_id: impl Into<String>, filters: Vec<Box<dyn Filter>>, op: CompositeOp) -> Self {
        Self {
            filter_id: filter_id.into(),
            filters,
            op,
        }
    }
}

impl Filter for CompositeFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        if self.filters.is_empty() {
            return Ok(true);
        }
        match self.op {
            CompositeOp::And => {
                for f in &self.filters {
                    if !f.should_process(event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            CompositeOp::Or => {
                for f in &self.filters {
                    if f.should_process(event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Wraps an arbitrary closure as a filter, mirroring the source's
/// `FunctionFilter`.
pub struct FunctionFilter {
    filter_id: String,
    f: Box<dyn Fn(&PipelineEvent) -> bool + Send + Sync>,
}

impl FunctionFilter {
    pub fn new(filter_id: impl Into<String>, f: impl Fn(&PipelineEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter_id: filter_id.into(),
            f: Box::new(f),
        }
    }
}

impl Filter for FunctionFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.f)(event)));
        result.map_err(|_| {
            error!("function filter {} panicked", self.filter_id);
            PipelineError::Filter {
                stage_id: self.filter_id.clone(),
                message: "filter function panicked".to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest};
    use chrono::Utc;

    fn event(cccc: &str) -> PipelineEvent {
        PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: cccc.to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        })
    }

    #[test]
    fn attribute_filter_matches_allowed_set() {
        let filter = AttributeFilter::new(
            "office",
            |e: &PipelineEvent| Some(e.cccc().to_string()),
            ["KTBW".to_string()],
            true,
        );
        assert!(filter.should_process(&event("KTBW")).unwrap());
        assert!(!filter.should_process(&event("KDMX")).unwrap());
    }

    #[test]
    fn composite_and_requires_all() {
        let a = AttributeFilter::new("a", |e: &PipelineEvent| Some(e.cccc().to_string()), ["KTBW".to_string()], true);
        let b = FunctionFilter::new("b", |_e| true);
        let composite = CompositeFilter::new("c", vec![Box::new(a), Box::new(b)], CompositeOp::And);
        assert!(composite.should_process(&event("KTBW")).unwrap());
        assert!(!composite.should_process(&event("KDMX")).unwrap());
    }

    #[test]
    fn composite_or_requires_any() {
        let a = AttributeFilter::new("a", |e: &PipelineEvent| Some(e.cccc().to_string()), ["KTBW".to_string()], true);
        let b = FunctionFilter::new("b", |_e| true);
        let composite = CompositeFilter::new("c", vec![Box::new(a), Box::new(b)], CompositeOp::Or);
        assert!(composite.should_process(&event("KDMX")).unwrap());
    }
}
