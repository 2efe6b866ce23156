use chrono::{DateTime, Utc};

use super::vtec::{Hvtec, Ugc, Vtec};

/// The WMO abbreviated heading shared by every product.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WmoHeader {
    /// Six-character WMO product ID (data type + issuance hour).
    pub ttaaii: String,
    /// Four-character issuing office/center.
    pub cccc: String,
    /// Issuance time, UTC.
    pub issue: DateTime<Utc>,
}

/// One segment of a text product, delimited by `$$` in the raw text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub struct Segment {
    /// Segment text with Unix line endings.
    pub unixtext: String,
    /// VTEC records found in this segment, in document order.
    pub vtec: Vec<Vtec>,
    /// HVTEC records found in this segment.
    pub hvtec: Vec<Hvtec>,
    /// UGC codes covered by this segment.
    pub ugc: Vec<Ugc>,
    /// UGC expiration time, if present.
    pub ugc_expire: Option<DateTime<Utc>>,
    /// Headlines extracted from the segment (`...TORNADO WARNING...` style lines).
    pub headlines: Vec<String>,
    /// Bulleted items (`* ` lines) extracted from the segment.
    pub bullets: Vec<String>,
    /// Whether this segment is flagged as a tornado/flash-flood emergency.
    pub is_emergency: bool,
    /// Whether this segment is flagged Particularly Dangerous Situation.
    pub is_pds: bool,
    /// Wind speed tag, e.g. `"60 MPH"`.
    pub wind_tag: Option<String>,
    /// Hail size tag, e.g. `"1.00 INCH"`.
    pub hail_tag: Option<String>,
    /// Tornado presence/threat tag.
    pub tornado_tag: Option<String>,
    /// Waterspout presence/threat tag.
    pub waterspout_tag: Option<String>,
    /// Landspout presence/threat tag.
    pub landspout_tag: Option<String>,
    /// Damage threat tag, e.g. `"CONSIDERABLE"`.
    pub damage_tag: Option<String>,
    /// Snow squall tag.
    pub squall_tag: Option<String>,
    /// Flood-specific key/value tags.
    pub flood_tags: std::collections::BTreeMap<String, String>,
}

impl Segment {
    /// The first VTEC record in this segment, if any.
    pub fn first_vtec(&self) -> Option<&Vtec> {
        self.vtec.first()
    }
}

/// A fully parsed NWS text product.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TextProduct {
    /// WMO abbreviated heading.
    pub wmo: WmoHeader,
    /// AFOS PIL (product identifier line), if present.
    pub afos: Option<String>,
    /// Parsed product segments, in document order.
    pub segments: Vec<Segment>,
    /// Server-assigned unique product ID, duplicated here for convenience.
    pub product_id: Option<String>,
    /// Whether this product is flagged as a correction (`...CORRECTED...`).
    pub is_correction: Option<bool>,
    /// Whether this product is a resend of a prior issuance.
    pub is_resent: Option<bool>,
    /// WFOs named in an `ATTN...WFO` line.
    pub attn_wfo: Vec<String>,
    /// RFCs named in an `ATTN...RFC` line.
    pub attn_rfc: Vec<String>,
    /// The primary headline across all segments, if any.
    pub main_headline: Option<String>,
    /// Forecaster sign-off line, if present.
    pub signature: Option<String>,
    /// The full product body, with Unix line endings.
    pub text: String,
}

impl TextProduct {
    /// The first VTEC record of the first segment that has one, if any.
    ///
    /// This is the field the topic builder uses to derive a product type.
    pub fn first_vtec(&self) -> Option<&Vtec> {
        self.segments.iter().find_map(Segment::first_vtec)
    }
}
