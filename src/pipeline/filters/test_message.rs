use log::warn;

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

use super::Filter;

/// Drops events whose `awipsid` uppercases to exactly `"TSTMSG"`.
///
/// Grounded in `original_source/src/nwws/filters/test_msg_filter.py`.
pub struct TestMessageFilter {
    filter_id: String,
}

impl TestMessageFilter {
    pub fn new(filter_id: impl Into<String>) -> Self {
        Self {
            filter_id: filter_id.into(),
        }
    }
}

impl Default for TestMessageFilter {
    fn default() -> Self {
        Self::new("test-msg-filter")
    }
}

impl Filter for TestMessageFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        let awipsid = event.awipsid();
        if awipsid.is_empty() {
            return Ok(true);
        }
        if awipsid.chars().all(|c| c.is_ascii()) {
            Ok(awipsid.to_uppercase() != "TSTMSG")
        } else {
            warn!(
                "filter {} saw a non-ASCII awipsid {:?}, passing through",
                self.filter_id, awipsid
            );
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest};
    use chrono::Utc;

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

    #[test]
    fn filters_exact_case_insensitive_match() {
        let filter = TestMessageFilter::default();
        assert!(!filter.should_process(&event("TSTMSG")).unwrap());
        assert!(!filter.should_process(&event("tstmsg")).unwrap());
    }

    #[test]
    fn passes_non_exact_match() {
        let filter = TestMessageFilter::default();
        assert!(filter.should_process(&event("TSTMSG123")).unwrap());
    }

    #[test]
    fn passes_missing_awipsid() {
        let filter = TestMessageFilter::default();
        assert!(filter.should_process(&event("")).unwrap());
    }

    #[test]
    fn passes_unrelated_awipsid() {
        let filter = TestMessageFilter::default();
        assert!(filter.should_process(&event("TORALY")).unwrap());
    }
}
