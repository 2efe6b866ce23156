use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::error;
use regex::Regex;

use super::Transformer;
use crate::model::{Hvtec, Segment, TextProduct, Ugc, Vtec, WmoHeader};
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::{PipelineEvent, PipelineStage, TextProductEvent};

/// A pre-loaded table of UGC code → human-readable zone/county name.
///
/// Grounded in `original_source/src/nwws/transformers/noaa_port_transformer.py`,
/// which loads a `UGCProvider` once, lazily, and reuses it for every
/// transform call rather than hitting a lookup per event.
#[derive(Debug, Clone, Default)]
pub struct UgcProvider {
    names: HashMap<String, String>,
}

impl UgcProvider {
    pub fn empty() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn from_table(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn lookup(&self, code: &str) -> Option<String> {
        self.names.get(code).cloned()
    }
}

fn vtec_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"/([OTEX])\.([A-Z]{3})\.([A-Z]{4})\.([A-Z]{2})\.([A-Z])\.(\d{4})\.(\d{6}T\d{4}Z|000000T0000Z)-(\d{6}T\d{4}Z|000000T0000Z)/",
        )
        .expect("static VTEC regex is valid")
    })
}

fn hvtec_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"/([A-Z0-9]{5})\.([A-Z])\.([A-Z]{2})\.(\d{6}T\d{4}Z|000000T0000Z)\.(\d{6}T\d{4}Z|000000T0000Z)\.(\d{6}T\d{4}Z|000000T0000Z)\.([A-Z]{2})/",
        )
        .expect("static HVTEC regex is valid")
    })
}

fn ugc_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9>-]+-(\d{6})-\s*$").expect("static UGC line regex is valid"))
}

fn headline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\.\.\.(.+?)\.\.\.").expect("static headline regex is valid"))
}

fn tag_re(label: &str) -> Regex {
    Regex::new(&format!(r"{label}\.\.\.([^\n.]+)")).expect("tag regex built from fixed label is valid")
}

fn parse_vtec_time(s: &str) -> Option<DateTime<Utc>> {
    if s == "000000T0000Z" {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%y%m%dT%H%MZ")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn extract_vtec(text: &str) -> Vec<Vtec> {
    vtec_re()
        .captures_iter(text)
        .map(|c| {
            let office4 = c[3].to_string();
            let office = office4.trim_start_matches(['K', 'P', 'T']).to_string();
            Vtec {
                line: c[0].to_string(),
                status: c[1].to_string(),
                action: c[2].to_string(),
                office,
                office4,
                phenomena: c[4].to_string(),
                significance: c[5].to_string(),
                etn: c[6].parse().unwrap_or(0),
                begin: parse_vtec_time(&c[7]),
                end: parse_vtec_time(&c[8]),
            }
        })
        .collect()
}

fn extract_hvtec(text: &str) -> Vec<Hvtec> {
    hvtec_re()
        .captures_iter(text)
        .map(|c| Hvtec {
            nwsli: c[1].to_string(),
            severity: c[2].to_string(),
            cause: c[3].to_string(),
            record: c[7].to_string(),
            crest: parse_vtec_time(&c[5]),
        })
        .collect()
}

/// Expands a UGC code-list line (e.g. `FLZ052-053>055-200000-`) into
/// individual codes plus an optional purge-time stamp, handling both plain
/// lists and `>`-delimited numeric ranges within a shared state/type prefix.
fn extract_ugc(text: &str, ugc: &UgcProvider) -> (Vec<Ugc>, Option<(u32, u32, u32)>) {
    let mut codes = Vec::new();
    let mut expire = None;

    for line in text.lines() {
        let line = line.trim();
        if !ugc_line_re().is_match(line) {
            continue;
        }
        let trimmed = line.trim_end_matches('-');
        let parts: Vec<&str> = trimmed.split('-').collect();
        if parts.is_empty() {
            continue;
        }
        let (body_parts, stamp) = parts.split_at(parts.len() - 1);
        // Stamp is DDHHMM with no month/year; the calendar date is resolved
        // by the caller against the product's issue time.
        if stamp[0].len() == 6 {
            let day: u32 = stamp[0][0..2].parse().unwrap_or(0);
            let hour: u32 = stamp[0][2..4].parse().unwrap_or(0);
            let minute: u32 = stamp[0][4..6].parse().unwrap_or(0);
            if day > 0 {
                expire = Some((day, hour, minute));
            }
        }

        let mut prefix = String::new();
        for part in body_parts {
            if part.len() >= 3 && part.chars().take(2).all(|c| c.is_ascii_uppercase()) {
                prefix = part[0..3].to_string();
                codes.push(part.to_string());
            } else if let Some((start, end)) = part.split_once('>') {
                let start_num: u32 = start.parse().unwrap_or(0);
                let end_num: u32 = end.parse().unwrap_or(start_num);
                for n in start_num..=end_num {
                    codes.push(format!("{prefix}{n:03}"));
                }
            } else if !prefix.is_empty() {
                codes.push(format!("{prefix}{part}"));
            }
        }
    }

    let ugcs = codes
        .into_iter()
        .map(|code| {
            let name = ugc.lookup(&code);
            Ugc { code, name }
        })
        .collect();
    (ugcs, expire)
}

fn extract_headlines(text: &str) -> Vec<String> {
    headline_re()
        .captures_iter(text)
        .map(|c| c[1].split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

fn extract_bullets(text: &str) -> Vec<String> {
    let mut bullets = Vec::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("* ") {
            if let Some(b) = current.take() {
                bullets.push(b.trim().to_string());
            }
            current = Some(rest.to_string());
        } else if trimmed.is_empty() {
            if let Some(b) = current.take() {
                bullets.push(b.trim().to_string());
            }
        } else if let Some(b) = current.as_mut() {
            b.push(' ');
            b.push_str(trimmed.trim());
        }
    }
    if let Some(b) = current.take() {
        bullets.push(b.trim().to_string());
    }
    bullets
}

fn extract_tag(text: &str, label: &str) -> Option<String> {
    tag_re(label)
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

fn extract_flood_tags(text: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    for label in ["FLOOD DAMAGE THREAT", "PEAK STREAM FLOW", "FLOOD WARNING"] {
        if let Some(value) = extract_tag(text, label) {
            tags.insert(label.to_string(), value);
        }
    }
    tags
}

/// Resolves a UGC purge stamp (day-of-month/hour/minute, no month or year)
/// against the product's issue time, rolling into the next month if the day
/// has already passed within the issue month.
fn resolve_ugc_expire(issue: DateTime<Utc>, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    use chrono::{Datelike, TimeZone};

    let mut year = issue.year();
    let mut month = issue.month();
    if day < issue.day() {
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or(issue)
}

fn strip_framing(raw: &str) -> String {
    raw.trim_start_matches('\u{1}')
        .trim_end_matches('\u{3}')
        .replace("\r\r\n", "\n")
        .replace("\r\n", "\n")
}

fn build_segment(text: &str, ugc: &UgcProvider, issue: DateTime<Utc>) -> Segment {
    let vtec = extract_vtec(text);
    let hvtec = extract_hvtec(text);
    let (ugc_codes, expire) = extract_ugc(text, ugc);

    Segment {
        unixtext: text.trim().to_string(),
        vtec,
        hvtec,
        ugc: ugc_codes,
        ugc_expire: expire.map(|(day, hour, minute)| resolve_ugc_expire(issue, day, hour, minute)),
        headlines: extract_headlines(text),
        bullets: extract_bullets(text),
        is_emergency: text.contains("TORNADO EMERGENCY") || text.contains("FLASH FLOOD EMERGENCY"),
        is_pds: text.contains("PARTICULARLY DANGEROUS SITUATION"),
        wind_tag: extract_tag(text, "WIND"),
        hail_tag: extract_tag(text, "HAIL"),
        tornado_tag: extract_tag(text, "TORNADO"),
        waterspout_tag: extract_tag(text, "WATERSPOUT"),
        landspout_tag: extract_tag(text, "LANDSPOUT"),
        damage_tag: extract_tag(text, "DAMAGE THREAT"),
        squall_tag: extract_tag(text, "SNOW SQUALL"),
        flood_tags: extract_flood_tags(text),
    }
}

fn parse_text_product(
    body: &str,
    ttaaii: &str,
    cccc: &str,
    issue: DateTime<Utc>,
    awipsid: &str,
    product_id: &str,
    ugc: &UgcProvider,
) -> Result<TextProduct, String> {
    let text = strip_framing(body);
    if text.trim().is_empty() {
        return Err("empty product body after framing removed".to_string());
    }

    let segments: Vec<Segment> = text
        .split("$$")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| build_segment(s, ugc, issue))
        .collect();

    let segments = if segments.is_empty() {
        vec![build_segment(&text, ugc, issue)]
    } else {
        segments
    };

    let main_headline = segments.iter().find_map(|s| s.headlines.first().cloned());
    let signature = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && l.len() <= 40 && l.chars().all(|c| c.is_ascii_uppercase() || c == ' '))
        .map(str::to_string);

    Ok(TextProduct {
        wmo: WmoHeader {
            ttaaii: ttaaii.to_string(),
            cccc: cccc.to_string(),
            issue,
        },
        afos: if awipsid.is_empty() || awipsid == "NONE" {
            None
        } else {
            Some(awipsid.to_string())
        },
        segments,
        product_id: Some(product_id.to_string()),
        is_correction: Some(text.contains("...CORRECTED...") || text.contains("CORRECTED PRODUCT")),
        is_resent: Some(text.contains("...RESENT...") || text.contains("THIS IS A RETRANSMISSION")),
        attn_wfo: Vec::new(),
        attn_rfc: Vec::new(),
        main_headline,
        signature,
        text,
    })
}

/// Parses a raw NOAAPort body into a structured [`TextProduct`], mirroring
/// `original_source/src/nwws/transformers/noaa_port_transformer.py`'s
/// `NoaaPortTransformer`.
///
/// The original drives a third-party grammar parser (`pyiem.nws.products`);
/// this implementation is a from-scratch equivalent over the same wire
/// format, since that dependency has no Rust-ecosystem counterpart in the
/// corpus.
pub struct NoaaPortTransformer {
    transformer_id: String,
    ugc: UgcProvider,
}

impl NoaaPortTransformer {
    pub fn new(transformer_id: impl Into<String>, ugc: UgcProvider) -> Self {
        Self {
            transformer_id: transformer_id.into(),
            ugc,
        }
    }
}

impl Transformer for NoaaPortTransformer {
    fn transformer_id(&self) -> &str {
        &self.transformer_id
    }

    fn transform(&self, event: PipelineEvent) -> Result<PipelineEvent, PipelineError> {
        let PipelineEvent::RawIngest(raw) = event else {
            return Ok(event);
        };

        match parse_text_product(
            &raw.noaaport,
            &raw.ttaaii,
            &raw.cccc,
            raw.issue,
            &raw.awipsid,
            &raw.product_id,
            &self.ugc,
        ) {
            Ok(product) => {
                let mut metadata = raw.metadata.with_stage(PipelineStage::Transform, &self.transformer_id);
                metadata.annotate("transformer", self.transformer_id.clone());
                Ok(PipelineEvent::TextProduct(TextProductEvent {
                    metadata,
                    awipsid: raw.awipsid,
                    cccc: raw.cccc,
                    product_id: raw.product_id,
                    issue: raw.issue,
                    ttaaii: raw.ttaaii,
                    subject: raw.subject,
                    noaaport: raw.noaaport,
                    delay_stamp: raw.delay_stamp,
                    product,
                }))
            }
            Err(message) => {
                error!(
                    "NOAAPort transformer {} failed to parse product {}: {}",
                    self.transformer_id, raw.product_id, message
                );
                Ok(PipelineEvent::RawIngest(raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::PipelineEventMetadata;

    fn raw_event(body: &str) -> PipelineEvent {
        PipelineEvent::RawIngest(crate::pipeline::types::RawIngest {
            metadata: PipelineEventMetadata::new("test"),
            awipsid: "TORALY".to_string(),
            cccc: "KTBW".to_string(),
            product_id: "1".to_string(),
            issue: Utc::now(),
            ttaaii: "WFUS51".to_string(),
            subject: String::new(),
            noaaport: body.to_string(),
            delay_stamp: None,
        })
    }

    #[test]
    fn parses_vtec_and_headline() {
        let body = "\x01\nTORNADO WARNING\n/O.NEW.KTBW.TO.W.0001.230101T0000Z-230101T0100Z/\n...TORNADO WARNING IN EFFECT...\n* WIND...60 MPH\n* HAIL...1.00 IN\n$$\n\x03";
        let transformer = NoaaPortTransformer::new("noaaport", UgcProvider::empty());
        let result = transformer.transform(raw_event(body)).unwrap();

        let PipelineEvent::TextProduct(event) = result else {
            panic!("expected a TextProduct event");
        };
        let vtec = event.product.first_vtec().expect("vtec present");
        assert_eq!(vtec.phenomena, "TO");
        assert_eq!(vtec.significance, "W");
        assert_eq!(vtec.etn, 1);
        assert_eq!(event.product.segments[0].wind_tag.as_deref(), Some("60 MPH"));
        assert_eq!(event.product.segments[0].hail_tag.as_deref(), Some("1.00 IN"));
        assert!(event.product.main_headline.is_some());
    }

    #[test]
    fn empty_body_falls_back_to_raw_ingest_unchanged() {
        let transformer = NoaaPortTransformer::new("noaaport", UgcProvider::empty());
        let result = transformer.transform(raw_event("\x01\x03")).unwrap();
        assert!(matches!(result, PipelineEvent::RawIngest(_)));
    }

    #[test]
    fn non_raw_ingest_events_pass_through_unchanged() {
        let body = "\x01\nTEST\n$$\n\x03";
        let transformer = NoaaPortTransformer::new("noaaport", UgcProvider::empty());
        let text_product = transformer.transform(raw_event(body)).unwrap();
        let again = transformer.transform(text_product.clone()).unwrap();
        assert_eq!(again, text_product);
    }
}
