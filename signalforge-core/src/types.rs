//! Shared types, error enum, and decoded record types for signalforge-core.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// All errors produced by signalforge.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate decoder name: {0}")]
    DuplicateDecoder(String),
    #[error("binary not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SignalError>;

/// Current wall-clock time as fractional unix seconds.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Decoded payloads
// ---------------------------------------------------------------------------

/// One decoded event, tagged by the kind of source that produced it.
///
/// Serializes with a `kind` discriminator (`ism_device`, `pager`, `adsb`)
/// next to the variant's own fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    IsmDevice(IsmDeviceEvent),
    Pager(PagerEvent),
    Adsb(AdsbEvent),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::IsmDevice(_) => "ism_device",
            Payload::Pager(_) => "pager",
            Payload::Adsb(_) => "adsb",
        }
    }

    /// Short human-readable description for log lines and the CLI.
    pub fn summary(&self) -> String {
        match self {
            Payload::IsmDevice(ev) => {
                let model = ev.model().unwrap_or("unknown");
                match ev.fields.get("id") {
                    Some(id) => format!("{model} id={id}"),
                    None => model.to_string(),
                }
            }
            Payload::Pager(ev) => {
                let addr = ev
                    .address
                    .or(ev.capcode)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".into());
                let preview: String = ev.content.chars().take(80).collect();
                format!("{} addr={addr} \"{preview}\"", ev.protocol)
            }
            Payload::Adsb(ev) => {
                let mut s = ev.icao.clone();
                if let Some(cs) = &ev.callsign {
                    s.push_str(&format!(" {cs}"));
                }
                if let Some(alt) = ev.altitude {
                    s.push_str(&format!(" {alt}ft"));
                }
                if let (Some(lat), Some(lon)) = (ev.latitude, ev.longitude) {
                    s.push_str(&format!(" {lat:.4},{lon:.4}"));
                }
                s
            }
        }
    }
}

/// An rtl_433 device transmission. Fields are passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsmDeviceEvent {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl IsmDeviceEvent {
    pub fn model(&self) -> Option<&str> {
        self.fields.get("model").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PagerEncoding {
    Alpha,
    Numeric,
    /// Address-only page with no message body.
    Tone,
}

/// A POCSAG or FLEX page decoded by multimon-ng.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerEvent {
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capcode: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<PagerEncoding>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    pub timestamp: f64,
}

/// One BaseStation `MSG` line from dump1090's SBS port.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdsbEvent {
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Output record
// ---------------------------------------------------------------------------

/// A parsed payload stamped with its source decoder. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub timestamp: f64,
    pub decoder_name: String,
    pub payload: Payload,
}

impl OutputRecord {
    pub fn new(decoder_name: &str, payload: Payload, timestamp: f64) -> Self {
        OutputRecord {
            timestamp,
            decoder_name: decoder_name.to_string(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pager() -> PagerEvent {
        PagerEvent {
            protocol: "POCSAG1200".into(),
            address: Some(1234567),
            capcode: Some(1234567),
            function: Some(0),
            encoding: Some(PagerEncoding::Alpha),
            content: "Fire at Main St".into(),
            baud_rate: Some(1200),
            timestamp: 1700000000.0,
        }
    }

    #[test]
    fn test_pager_serializes_with_kind_tag() {
        let v = serde_json::to_value(Payload::Pager(pager())).unwrap();
        assert_eq!(v["kind"], "pager");
        assert_eq!(v["protocol"], "POCSAG1200");
        assert_eq!(v["capcode"], 1234567);
        assert_eq!(v["encoding"], "Alpha");
        assert_eq!(v["baudRate"], 1200);
    }

    #[test]
    fn test_ism_fields_flattened() {
        let mut fields = Map::new();
        fields.insert("model".into(), json!("Acurite-5n1"));
        fields.insert("id".into(), json!(1234));
        let v = serde_json::to_value(Payload::IsmDevice(IsmDeviceEvent { fields })).unwrap();
        assert_eq!(
            v,
            json!({"kind": "ism_device", "model": "Acurite-5n1", "id": 1234})
        );
    }

    #[test]
    fn test_adsb_skips_missing_fields() {
        let ev = AdsbEvent {
            icao: "4CA2B4".into(),
            message_type: Some("3".into()),
            callsign: None,
            altitude: Some(35000),
            speed: None,
            heading: None,
            latitude: None,
            longitude: None,
            vertical_rate: None,
            squawk: None,
            timestamp: 1.0,
        };
        let v = serde_json::to_value(Payload::Adsb(ev)).unwrap();
        assert_eq!(v["messageType"], "3");
        assert!(v.get("callsign").is_none());
        assert!(v.get("verticalRate").is_none());
    }

    #[test]
    fn test_record_wraps_payload() {
        let rec = OutputRecord::new("multimon", Payload::Pager(pager()), 5.0);
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["decoderName"], "multimon");
        assert_eq!(v["payload"]["kind"], "pager");
    }

    #[test]
    fn test_summary() {
        let s = Payload::Pager(pager()).summary();
        assert_eq!(s, "POCSAG1200 addr=1234567 \"Fire at Main St\"");
    }
}
