use chrono::{DateTime, Utc};

/// A Valid Time Event Code record embedded in a text product segment.
///
/// See the [NWS VTEC documentation](https://www.weather.gov/vtec/) for the
/// meaning of each field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Vtec {
    /// The raw VTEC line, as it appeared in the product text.
    pub line: String,
    /// VTEC status code (e.g. `NEW`, `CON`, `EXP`).
    pub status: String,
    /// VTEC action code (e.g. `NEW`, `CON`, `CAN`).
    pub action: String,
    /// Issuing NWS office, 3-letter form.
    pub office: String,
    /// Issuing NWS office, 4-letter form (including leading `K`/`P`).
    pub office4: String,
    /// Phenomena code, e.g. `TO` (tornado), `SV` (severe thunderstorm).
    pub phenomena: String,
    /// Significance code: `W` warning, `A` watch, `Y` advisory.
    pub significance: String,
    /// Event Tracking Number, disambiguating successive events of the same
    /// phenomena from the same office.
    pub etn: u32,
    /// Event begin timestamp, UTC.
    pub begin: Option<DateTime<Utc>>,
    /// Event end timestamp, UTC.
    pub end: Option<DateTime<Utc>>,
}

impl Vtec {
    /// The `{phenomena}.{significance}` pair used as the MQTT product-type key.
    pub fn phenomena_significance(&self) -> String {
        format!("{}.{}", self.phenomena, self.significance)
    }
}

/// A Hydrologic VTEC record, extending VTEC with river gauge details.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hvtec {
    /// NWS Location Identifier for the affected river gauge.
    pub nwsli: String,
    /// Severity code.
    pub severity: String,
    /// Cause code (e.g. `ER` excessive rainfall).
    pub cause: String,
    /// Record status code.
    pub record: String,
    /// Forecast crest timestamp, UTC, if known.
    pub crest: Option<DateTime<Utc>>,
}

/// A Universal Geographic Code identifying a county (`C`) or forecast zone (`Z`).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ugc {
    /// The raw UGC code, e.g. `FLC057` or `FLZ148`.
    pub code: String,
    /// Human-readable name, if resolved against the UGC lookup table.
    pub name: Option<String>,
}
