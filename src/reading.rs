/// Telemetry readings and wire-frame decoding
///
/// A sensor frame is a JSON object `{bpm?, spo2?, ts?, source?}`. Decoding
/// is lenient about field contents (a bad `ts` falls back to ingestion time,
/// a non-numeric `bpm` becomes null) but strict about structure: anything
/// that is not a JSON object is rejected and the frame is dropped.
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Source tag used when a frame does not name its device
pub const DEFAULT_SOURCE: &str = "esp32";

/// One telemetry reading. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    bpm: Option<f64>,
    spo2: Option<f64>,
    #[serde(rename = "ts")]
    timestamp: DateTime<Utc>,
    source: String,
}

impl Reading {
    pub fn new(
        bpm: Option<f64>,
        spo2: Option<f64>,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            bpm,
            spo2,
            timestamp,
            source: source.into(),
        }
    }

    /// Decode a raw frame, applying defaults relative to `received_at`
    ///
    /// Returns `None` for frames that are not a JSON object.
    pub fn from_frame(frame: &str, received_at: DateTime<Utc>) -> Option<Self> {
        let fields: Map<String, Value> = serde_json::from_str(frame).ok()?;

        Some(Self {
            bpm: fields.get("bpm").and_then(as_number),
            spo2: fields.get("spo2").and_then(as_number),
            timestamp: fields
                .get("ts")
                .and_then(as_timestamp)
                .unwrap_or(received_at),
            source: fields
                .get("source")
                .and_then(as_source)
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        })
    }

    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    pub fn spo2(&self) -> Option<f64> {
        self.spo2
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A reading as returned by the store, with its row id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Numbers pass through; numeric strings are accepted; anything else is null.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn as_source(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(number_label(n)),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// Integral floats print without a fraction (`5.0` is "5")
fn number_label(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

/// Numbers are epoch milliseconds; strings may be RFC 3339, a naive ISO
/// datetime (taken as UTC) or a plain date.
fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults_for_bpm_only_frame() {
        let reading = Reading::from_frame(r#"{"bpm":72}"#, now()).unwrap();
        assert_eq!(reading.bpm(), Some(72.0));
        assert_eq!(reading.spo2(), None);
        assert_eq!(reading.source(), DEFAULT_SOURCE);
        assert_eq!(reading.timestamp(), now());
    }

    #[test]
    fn test_full_frame() {
        let frame = r#"{"bpm":88.5,"spo2":97,"ts":"2026-02-28T23:59:30Z","source":"wrist-2","extra":1}"#;
        let reading = Reading::from_frame(frame, now()).unwrap();
        assert_eq!(reading.bpm(), Some(88.5));
        assert_eq!(reading.spo2(), Some(97.0));
        assert_eq!(reading.source(), "wrist-2");
        assert_eq!(
            reading.timestamp(),
            Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 30).unwrap()
        );
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(Reading::from_frame("not json", now()).is_none());
        assert!(Reading::from_frame("{\"bpm\":", now()).is_none());
        assert!(Reading::from_frame("[1,2,3]", now()).is_none());
        assert!(Reading::from_frame("72", now()).is_none());
        assert!(Reading::from_frame("", now()).is_none());
    }

    #[test]
    fn test_lenient_field_decoding() {
        let frame = r#"{"bpm":"64","spo2":"n/a","ts":"yesterday","source":""}"#;
        let reading = Reading::from_frame(frame, now()).unwrap();
        assert_eq!(reading.bpm(), Some(64.0));
        assert_eq!(reading.spo2(), None);
        assert_eq!(reading.timestamp(), now());
        assert_eq!(reading.source(), DEFAULT_SOURCE);

        let reading = Reading::from_frame(r#"{"source":null,"bpm":null}"#, now()).unwrap();
        assert_eq!(reading.bpm(), None);
        assert_eq!(reading.source(), DEFAULT_SOURCE);
    }

    #[test]
    fn test_non_string_sources() {
        let source = |frame: &str| Reading::from_frame(frame, now()).unwrap().source().to_string();

        assert_eq!(source(r#"{"source":5.0}"#), "5");
        assert_eq!(source(r#"{"source":7}"#), "7");
        assert_eq!(source(r#"{"source":2.5}"#), "2.5");
        assert_eq!(source(r#"{"source":true}"#), "true");
        assert_eq!(source(r#"{"source":0}"#), DEFAULT_SOURCE);
        assert_eq!(source(r#"{"source":false}"#), DEFAULT_SOURCE);
    }

    #[test]
    fn test_out_of_range_number_rejects_frame() {
        // Not representable as f64, so the frame is not valid JSON to us
        assert!(Reading::from_frame(r#"{"bpm":1e400}"#, now()).is_none());
    }

    #[test]
    fn test_timestamp_formats() {
        let millis = Reading::from_frame(r#"{"ts":1767225600000}"#, now()).unwrap();
        assert_eq!(
            millis.timestamp(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );

        let naive = Reading::from_frame(r#"{"ts":"2026-01-01 08:30:00"}"#, now()).unwrap();
        assert_eq!(
            naive.timestamp(),
            Utc.with_ymd_and_hms(2026, 1, 1, 8, 30, 0).unwrap()
        );

        let date = Reading::from_frame(r#"{"ts":"2026-01-02"}"#, now()).unwrap();
        assert_eq!(
            date.timestamp(),
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_stored_reading_serialization() {
        let stored = StoredReading {
            id: 7,
            reading: Reading::new(Some(72.0), None, now(), DEFAULT_SOURCE),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["bpm"], 72.0);
        assert!(json["spo2"].is_null());
        assert_eq!(json["source"], "esp32");
        assert_eq!(json["ts"], "2026-03-01T12:00:00Z");
    }
}
