//! Extracts [`RawIngest`] pipeline events from NWWS-OI groupchat stanzas.
//!
//! Grounded in the teacher's `message.rs`: the `delay`/XEP-0203 and
//! `x`/`nwws-oi` extraction logic is unchanged, retargeted to populate a
//! pipeline event instead of a standalone `Message` type.

use chrono::{DateTime, Utc};
use xmpp_parsers::message::{Message, MessageType};

use crate::pipeline::types::{PipelineEventMetadata, RawIngest};

use super::framing::to_noaaport;

pub(crate) const SOURCE: &str = "xmpp-receiver";

/// Returns `None` for stanzas that are not NWWS-OI products: the welcome
/// banner, terms-of-service notice, or a groupchat message without the
/// vendor `x` payload.
pub(crate) fn extract_raw_ingest(value: Message) -> Option<RawIngest> {
    if value.type_ != MessageType::Groupchat {
        return None;
    }

    let delay_stamp = value
        .payloads
        .iter()
        .find(|p| p.is("delay", "urn:xmpp:delay"))
        .and_then(|delay| delay.attr("stamp"))
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let oi = value.payloads.iter().find(|p| p.is("x", "nwws-oi"))?;
    let raw_text = oi.text();

    // Some messages have every "\n" doubled to "\n\n"; detect and undo it so
    // downstream parsing sees the product text as it was actually issued.
    let text = if raw_text.matches('\n').count() == raw_text.matches("\n\n").count() * 2 {
        raw_text.replace("\n\n", "\n")
    } else {
        raw_text
    };

    // The wire text is prefixed with a bare LDM sequence number line; it
    // carries no product semantics, so peel it off and keep it as metadata.
    let (ldm_sequence_number, text) = match {
        let mut parts = text.splitn(3, '\n');
        (parts.next(), parts.next().and_then(|s| s.parse::<u32>().ok()), parts.next())
    } {
        (Some(""), Some(seq), Some(rest)) => (Some(seq), rest.to_string()),
        _ => (None, text),
    };

    let awipsid = oi.attr("awipsid").unwrap_or_default();
    let cccc = oi.attr("cccc")?;
    let product_id = oi.attr("id")?;
    let issue = oi
        .attr("issue")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))?;
    let ttaaii = oi.attr("ttaaii")?;

    let subject = value
        .subjects
        .values()
        .next()
        .or_else(|| value.bodies.values().next())
        .cloned()
        .unwrap_or_default();

    let mut metadata = PipelineEventMetadata::new(SOURCE);
    if let Some(seq) = ldm_sequence_number {
        metadata.annotate("ldm_sequence_number", seq);
    }

    Some(RawIngest {
        metadata,
        awipsid: if awipsid.is_empty() {
            "NONE".to_string()
        } else {
            awipsid.to_string()
        },
        cccc: cccc.to_string(),
        product_id: product_id.to_string(),
        issue,
        ttaaii: ttaaii.to_string(),
        subject,
        noaaport: to_noaaport(&text),
        delay_stamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(xml: &str) -> Message {
        let element: xmpp_parsers::Element = xml.parse().unwrap();
        element.try_into().unwrap()
    }

    #[test]
    fn banner_messages_are_not_products() {
        let msg = message("<message xmlns=\"jabber:client\" from=\"nwws@conference.nwws-oi.weather.gov\" to=\"w.glynn@nwws-oi.weather.gov/todo\" type=\"groupchat\"><subject>National Weather Wire Service Open Interface</subject><delay xmlns=\"urn:xmpp:delay\" from=\"nwws@conference.nwws-oi.weather.gov\" stamp=\"2015-02-03T20:48:44.222Z\"/></message>");
        assert!(extract_raw_ingest(msg).is_none());
    }

    #[test]
    fn extracts_a_product_with_ldm_sequence_and_awipsid() {
        let msg = message("<message xmlns=\"jabber:client\" to=\"w.glynn@nwws-oi.weather.gov/uuid/25976f21-a846-4e08-8890-d750a95d96a2\" type=\"groupchat\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"><x xmlns=\"nwws-oi\" cccc=\"KLMK\" ttaaii=\"SRUS43\" issue=\"2022-02-04T02:54:00Z\" awipsid=\"RRMLMK\" id=\"14425.25117\"><![CDATA[\n\n987\n\nSRUS43 KLMK 040254\n\nRRMLMK\n\n.ER PRSK2 20220203 Z DC202202040254/DUE/DQG/DH17/HGIFE/DIH1/\n\n]]></x><delay xmlns=\"urn:xmpp:delay\" stamp=\"2022-02-04T02:55:11.810Z\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"/></message>");

        let raw = extract_raw_ingest(msg).unwrap();
        assert_eq!(raw.cccc, "KLMK");
        assert_eq!(raw.ttaaii, "SRUS43");
        assert_eq!(raw.awipsid, "RRMLMK");
        assert_eq!(raw.product_id, "14425.25117");
        assert!(raw.delay_stamp.is_some());
        assert_eq!(raw.metadata.custom.get("ldm_sequence_number").and_then(|v| v.as_u64()), Some(987));
        assert!(raw.noaaport.starts_with('\u{01}'));
        assert!(raw.noaaport.ends_with('\u{03}'));
    }

    #[test]
    fn missing_awipsid_becomes_none_sentinel() {
        let msg = message("<message xmlns=\"jabber:client\" to=\"w.glynn@nwws-oi.weather.gov/uuid/851c737e-ead3-460d-b0a6-6749602fccd9\" type=\"groupchat\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"><x xmlns=\"nwws-oi\" cccc=\"PHEB\" ttaaii=\"NTXX98\" issue=\"2022-02-04T01:23:00Z\" awipsid=\"\" id=\"14425.22800\"><![CDATA[\n\n593\n\nNTXX98 PHEB 040123\n\nPTWC TEST\n\n]]></x></message>");

        let raw = extract_raw_ingest(msg).unwrap();
        assert_eq!(raw.awipsid, "NONE");
    }
}
