use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

use super::Filter;

/// Rejects products already seen within a time window, keyed on
/// `product_id`.
///
/// Grounded in `original_source/src/nwws/filters/duplicate_filter.py`: the
/// cache is purged of expired entries before every lookup, an O(n) cost per
/// event that the spec's Open Questions explicitly permit keeping simple
/// (`SPEC_FULL.md` §9).
pub struct DuplicateFilter {
    filter_id: String,
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DuplicateFilter {
    pub fn new(filter_id: impl Into<String>, window: Duration) -> Self {
        Self {
            filter_id: filter_id.into(),
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Number of product IDs currently tracked.
    pub fn cache_size(&self) -> usize {
        self.seen.lock().expect("duplicate filter mutex poisoned").len()
    }

    /// Age of the oldest tracked entry, or `None` if the cache is empty.
    pub fn oldest_entry_age(&self) -> Option<Duration> {
        self.seen
            .lock()
            .expect("duplicate filter mutex poisoned")
            .values()
            .map(Instant::elapsed)
            .max()
    }

    fn purge_expired(&self, cache: &mut HashMap<String, Instant>) {
        let window = self.window;
        let before = cache.len();
        cache.retain(|_, seen_at| seen_at.elapsed() < window);
        let purged = before - cache.len();
        if purged > 0 {
            debug!(
                "duplicate filter {} purged {} expired entries, {} remain",
                self.filter_id,
                purged,
                cache.len()
            );
        }
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new("duplicate-filter", Duration::from_secs(300))
    }
}

impl Filter for DuplicateFilter {
    fn filter_id(&self) -> &str {
        &self.filter_id
    }

    fn should_process(&self, event: &PipelineEvent) -> Result<bool, PipelineError> {
        let product_id = event.product_id();
        if product_id.is_empty() {
            warn!(
                "duplicate filter {} saw an event with no product_id, passing through",
                self.filter_id
            );
            return Ok(true);
        }

        let mut cache = self.seen.lock().expect("duplicate filter mutex poisoned");
        self.purge_expired(&mut cache);

        if cache.contains_key(product_id) {
            debug!(
                "duplicate filter {} dropped duplicate product {}",
                self.filter_id, product_id
            );
            return Ok(false);
        }

        cache.insert(product_id.to_string(), Instant::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest};
    use chrono::Utc;

    fn event(product_id: &str) -> PipelineEvent {
        PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: product_id.to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        })
    }

    #[test]
    fn first_occurrence_passes_repeat_within_window_is_dropped() {
        let filter = DuplicateFilter::new("dup", Duration::from_secs(300));
        assert!(filter.should_process(&event("X")).unwrap());
        assert!(!filter.should_process(&event("X")).unwrap());
    }

    #[test]
    fn repeat_after_window_expiry_passes() {
        let filter = DuplicateFilter::new("dup", Duration::from_millis(20));
        assert!(filter.should_process(&event("X")).unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(filter.should_process(&event("X")).unwrap());
    }

    #[test]
    fn missing_product_id_always_passes() {
        let filter = DuplicateFilter::default();
        assert!(filter.should_process(&event("")).unwrap());
        assert!(filter.should_process(&event("")).unwrap());
    }

    #[test]
    fn distinct_product_ids_do_not_collide() {
        let filter = DuplicateFilter::default();
        assert!(filter.should_process(&event("A")).unwrap());
        assert!(filter.should_process(&event("B")).unwrap());
        assert_eq!(filter.cache_size(), 2);
    }
}
