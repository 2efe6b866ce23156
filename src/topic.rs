//! MQTT topic construction: a deterministic function from a processed event
//! to a topic string, grounded in
//! `original_source/src/nwws/utils/topic_builder.py`.

use crate::pipeline::types::PipelineEvent;

/// `{prefix}/{cccc}/{product_type}/{awipsid}/{product_id}`.
pub const DEFAULT_TOPIC_PATTERN: &str = "{prefix}/{cccc}/{product_type}/{awipsid}/{product_id}";

/// Computes the `product_type` topic segment for `event`.
///
/// Resolution order: VTEC phenomena.significance of the first segment that
/// has one, else (for `Xml` events) the upper-cased first three characters
/// of `awipsid` or `"XML"` if absent, else the upper-cased first three
/// characters of `awipsid`, else `"GENERAL"`.
pub fn product_type_indicator(event: &PipelineEvent) -> String {
    if let PipelineEvent::TextProduct(e) = event {
        if let Some(vtec) = e.product.first_vtec() {
            return vtec.phenomena_significance();
        }
    }
    if let PipelineEvent::Xml(e) = event {
        if let Some(vtec) = e.product.first_vtec() {
            return vtec.phenomena_significance();
        }
        return awipsid_prefix(&e.awipsid).unwrap_or_else(|| "XML".to_string());
    }

    awipsid_prefix(event.awipsid()).unwrap_or_else(|| "GENERAL".to_string())
}

fn awipsid_prefix(awipsid: &str) -> Option<String> {
    if awipsid.is_empty() {
        return None;
    }
    let upper = awipsid.to_uppercase();
    Some(upper.chars().take(3).collect())
}

fn sanitize_segment(segment: &str) -> String {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.replace(['/', '+', '#'], "_")
    }
}

/// Builds the MQTT topic for `event` under `prefix`, applying
/// [`DEFAULT_TOPIC_PATTERN`].
///
/// Guarantees: identical inputs produce identical topics; every
/// placeholder expands to exactly one non-empty, slash-free segment, so the
/// component count of the output always matches the template; the topic
/// never starts with `/` and never contains MQTT wildcard characters (`+`,
/// `#`).
pub fn build_topic(event: &PipelineEvent, prefix: &str) -> String {
    let cccc = sanitize_segment(event.cccc());
    let product_type = sanitize_segment(&product_type_indicator(event));
    let awipsid = {
        let raw = event.awipsid();
        if raw.is_empty() {
            "GENERAL".to_string()
        } else {
            sanitize_segment(raw)
        }
    };
    let product_id = sanitize_segment(event.product_id());
    let prefix = sanitize_segment(prefix);

    format!("{prefix}/{cccc}/{product_type}/{awipsid}/{product_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, TextProduct, Vtec, WmoHeader};
    use crate::pipeline::types::{PipelineEventMetadata, RawIngest, TextProductEvent};
    use chrono::Utc;

    fn wmo() -> WmoHeader {
        WmoHeader {
            ttaaii: "WFUS51".to_string(),
            cccc: "KTBW".to_string(),
            issue: Utc::now(),
        }
    }

    fn vtec() -> Vtec {
        Vtec {
            line: "/O.NEW.KTBW.TO.W.0001.230101T0000Z-230101T0100Z/".to_string(),
            status: "O".to_string(),
            action: "NEW".to_string(),
            office: "TBW".to_string(),
            office4: "KTBW".to_string(),
            phenomena: "TO".to_string(),
            significance: "W".to_string(),
            etn: 1,
            begin: None,
            end: None,
        }
    }

    #[test]
    fn vtec_product_uses_phenomena_significance() {
        let event = PipelineEvent::TextProduct(TextProductEvent {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORTBW".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "abc-123".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
            product: TextProduct {
                wmo: wmo(),
                afos: None,
                segments: vec![Segment {
                    vtec: vec![vtec()],
                    ..Default::default()
                }],
                product_id: None,
                is_correction: None,
                is_resent: None,
                attn_wfo: Vec::new(),
                attn_rfc: Vec::new(),
                main_headline: None,
                signature: None,
                text: String::new(),
            },
        });

        assert_eq!(build_topic(&event, "nwws"), "nwws/KTBW/TO.W/TORTBW/abc-123");
    }

    #[test]
    fn raw_ingest_falls_back_to_awipsid_prefix() {
        let event = PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "tornaly".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        });

        assert_eq!(build_topic(&event, "nwws"), "nwws/KTBW/TOR/tornaly/1");
    }

    #[test]
    fn missing_awipsid_falls_back_to_general_for_both_segments() {
        let event = PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: String::new(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        });

        let topic = build_topic(&event, "nwws");
        assert_eq!(topic, "nwws/KTBW/GENERAL/GENERAL/1");
        assert_eq!(topic.split('/').count(), 5);
    }

    #[test]
    fn identical_inputs_produce_identical_topics() {
        let event = PipelineEvent::RawIngest(RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: String::new(),
            delay_stamp: None,
        });
        assert_eq!(build_topic(&event, "nwws"), build_topic(&event, "nwws"));
    }
}
