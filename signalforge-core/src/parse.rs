//! Line parsers for each decoder's output format.
//!
//! Every parser is a pure function of one trimmed line and a timestamp.
//! `None` means "not a record": tools interleave banners, status chatter
//! and partial decodes with real output, so rejection is the common case
//! and never an error.
//!
//! - rtl_433:      one JSON object per line (`-F json`)
//! - multimon-ng:  POCSAG / FLEX text lines
//! - dump1090:     stdout carries nothing (`--quiet`); data comes over SBS
//! - SBS:          BaseStation CSV from dump1090's port 30003

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::types::*;

// ---------------------------------------------------------------------------
// rtl_433
// ---------------------------------------------------------------------------

/// Parse one rtl_433 JSON line into an ISM device event.
pub fn parse_rtl433(line: &str) -> Option<Payload> {
    match serde_json::from_str::<Value>(line).ok()? {
        Value::Object(mut fields) => {
            // The payload's own tag takes this key when serialized.
            fields.remove("kind");
            Some(Payload::IsmDevice(IsmDeviceEvent { fields }))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// multimon-ng
// ---------------------------------------------------------------------------

static POCSAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(POCSAG\d+):\s+Address:\s+(\d+)\s+Function:\s+(\d+)\s+(Alpha|Numeric):\s*(.*)",
    )
    .expect("valid POCSAG regex")
});

static POCSAG_TONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(POCSAG\d+):\s+Address:\s+(\d+)\s+Function:\s+(\d+)\s*$")
        .expect("valid POCSAG tone regex")
});

static FLEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^FLEX[:|]\s*(.*)").expect("valid FLEX regex"));

static FLEX_CAPCODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid FLEX capcode regex"));

/// Parse one multimon-ng output line into a pager event.
pub fn parse_multimon(line: &str, timestamp: f64) -> Option<Payload> {
    if let Some(caps) = POCSAG_RE.captures(line) {
        let protocol = caps[1].to_string();
        let address = caps[2].parse::<u64>().ok()?;
        let encoding = match &caps[4] {
            "Alpha" => PagerEncoding::Alpha,
            _ => PagerEncoding::Numeric,
        };
        return Some(Payload::Pager(PagerEvent {
            baud_rate: pocsag_baud(&protocol),
            protocol,
            address: Some(address),
            capcode: Some(address),
            function: caps[3].parse().ok(),
            encoding: Some(encoding),
            content: caps[5].trim_end().to_string(),
            timestamp,
        }));
    }

    if let Some(caps) = POCSAG_TONE_RE.captures(line) {
        let protocol = caps[1].to_string();
        let address = caps[2].parse::<u64>().ok()?;
        return Some(Payload::Pager(PagerEvent {
            baud_rate: pocsag_baud(&protocol),
            protocol,
            address: Some(address),
            capcode: Some(address),
            function: caps[3].parse().ok(),
            encoding: Some(PagerEncoding::Tone),
            content: String::new(),
            timestamp,
        }));
    }

    if let Some(caps) = FLEX_RE.captures(line) {
        let content = caps[1].to_string();
        let (capcode, baud_rate) = flex_details(&content);
        return Some(Payload::Pager(PagerEvent {
            protocol: "FLEX".into(),
            address: capcode,
            capcode,
            function: None,
            encoding: None,
            content,
            baud_rate,
            timestamp,
        }));
    }

    None
}

/// `POCSAG1200` -> 1200.
fn pocsag_baud(protocol: &str) -> Option<u32> {
    protocol.strip_prefix("POCSAG")?.parse().ok()
}

/// Best-effort capcode and baud rate from a FLEX body.
///
/// Handles the bracketed form (`... [001234567] text`) and the pipe-delimited
/// form (`2024-01-01 12:00:00|1600/2/K/A|07.023|001234567|ALN|text`).
fn flex_details(content: &str) -> (Option<u64>, Option<u32>) {
    if let Some(caps) = FLEX_CAPCODE_RE.captures(content) {
        return (caps[1].parse().ok(), None);
    }

    let fields: Vec<&str> = content.split('|').map(str::trim).collect();
    if fields.len() < 4 {
        return (None, None);
    }

    let capcode = fields
        .iter()
        .find(|f| f.len() >= 7 && f.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|f| f.parse().ok());
    let baud_rate = fields.iter().find_map(|f| {
        let (speed, _) = f.split_once('/')?;
        speed
            .parse::<u32>()
            .ok()
            .filter(|b| matches!(b, 1600 | 3200 | 6400))
    });

    (capcode, baud_rate)
}

// ---------------------------------------------------------------------------
// dump1090
// ---------------------------------------------------------------------------

/// dump1090 runs with `--net --quiet`; nothing on stdout is a record.
pub fn parse_dump1090(_line: &str) -> Option<Payload> {
    None
}

// ---------------------------------------------------------------------------
// SBS / BaseStation
// ---------------------------------------------------------------------------

/// Parse one BaseStation CSV line (`MSG,<type>,...`) into an ADS-B event.
///
/// Field positions: 1 message type, 4 ICAO, 10 callsign, 11 altitude,
/// 12 ground speed, 13 track, 14 latitude, 15 longitude, 16 vertical rate,
/// 17 squawk. Empty or unparsable fields are left out.
pub fn parse_sbs(line: &str, timestamp: f64) -> Option<Payload> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.first().copied() != Some("MSG") {
        return None;
    }

    let icao = sbs_field(&fields, 4)?.to_string();

    Some(Payload::Adsb(AdsbEvent {
        icao,
        message_type: sbs_field(&fields, 1).map(str::to_string),
        callsign: sbs_field(&fields, 10).map(str::to_string),
        altitude: sbs_field(&fields, 11).and_then(parse_int),
        speed: sbs_field(&fields, 12).and_then(|f| f.parse().ok()),
        heading: sbs_field(&fields, 13).and_then(|f| f.parse().ok()),
        latitude: sbs_field(&fields, 14).and_then(|f| f.parse().ok()),
        longitude: sbs_field(&fields, 15).and_then(|f| f.parse().ok()),
        vertical_rate: sbs_field(&fields, 16).and_then(parse_int),
        squawk: sbs_field(&fields, 17).map(str::to_string),
        timestamp,
    }))
}

fn sbs_field<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields
        .get(idx)
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
}

/// Integer field that some feeders write with a decimal part (`35000.0`).
fn parse_int(field: &str) -> Option<i32> {
    field
        .parse::<i32>()
        .ok()
        .or_else(|| field.parse::<f64>().ok().map(|v| v.trunc() as i32))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: f64 = 1700000000.0;

    fn pager(line: &str) -> PagerEvent {
        match parse_multimon(line, T) {
            Some(Payload::Pager(ev)) => ev,
            other => panic!("expected pager event, got {other:?}"),
        }
    }

    fn adsb(line: &str) -> AdsbEvent {
        match parse_sbs(line, T) {
            Some(Payload::Adsb(ev)) => ev,
            other => panic!("expected adsb event, got {other:?}"),
        }
    }

    #[test]
    fn test_rtl433_json() {
        let payload =
            parse_rtl433(r#"{"model":"Acurite-5n1","id":1234,"temperature_C":21.5}"#).unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "kind": "ism_device",
                "model": "Acurite-5n1",
                "id": 1234,
                "temperature_C": 21.5
            })
        );
    }

    #[test]
    fn test_rtl433_rejects_non_json() {
        assert!(parse_rtl433("not json").is_none());
        assert!(parse_rtl433("").is_none());
        assert!(parse_rtl433("rtl_433 version 23.11").is_none());
    }

    #[test]
    fn test_rtl433_rejects_non_object() {
        assert!(parse_rtl433("42").is_none());
        assert!(parse_rtl433(r#"["model"]"#).is_none());
    }

    #[test]
    fn test_pocsag_alpha() {
        let ev = pager("POCSAG1200: Address: 1234567 Function: 0 Alpha:   Fire at Main St");
        assert_eq!(ev.protocol, "POCSAG1200");
        assert_eq!(ev.address, Some(1234567));
        assert_eq!(ev.capcode, Some(1234567));
        assert_eq!(ev.function, Some(0));
        assert_eq!(ev.encoding, Some(PagerEncoding::Alpha));
        assert_eq!(ev.content, "Fire at Main St");
        assert_eq!(ev.baud_rate, Some(1200));
        assert_eq!(ev.timestamp, T);
    }

    #[test]
    fn test_pocsag_numeric() {
        let ev = pager("POCSAG512: Address:   98765 Function: 3 Numeric: 555-0134");
        assert_eq!(ev.protocol, "POCSAG512");
        assert_eq!(ev.address, Some(98765));
        assert_eq!(ev.function, Some(3));
        assert_eq!(ev.encoding, Some(PagerEncoding::Numeric));
        assert_eq!(ev.content, "555-0134");
        assert_eq!(ev.baud_rate, Some(512));
    }

    #[test]
    fn test_pocsag_empty_alpha_body() {
        let ev = pager("POCSAG2400: Address: 42 Function: 1 Alpha:");
        assert_eq!(ev.content, "");
        assert_eq!(ev.encoding, Some(PagerEncoding::Alpha));
    }

    #[test]
    fn test_pocsag_tone_only() {
        let ev = pager("POCSAG1200: Address: 1234567 Function: 2");
        assert_eq!(ev.encoding, Some(PagerEncoding::Tone));
        assert_eq!(ev.function, Some(2));
        assert!(ev.content.is_empty());
    }

    #[test]
    fn test_flex_colon() {
        let ev = pager("FLEX: some page text");
        assert_eq!(ev.protocol, "FLEX");
        assert_eq!(ev.content, "some page text");
        assert!(ev.address.is_none());
        assert!(ev.encoding.is_none());
    }

    #[test]
    fn test_flex_pipe_format() {
        let ev = pager("FLEX|2024-01-01 12:00:00|1600/2/K/A|07.023|001234567|ALN|UNIT 5 RESPOND");
        assert_eq!(ev.capcode, Some(1234567));
        assert_eq!(ev.address, Some(1234567));
        assert_eq!(ev.baud_rate, Some(1600));
        assert!(ev.content.ends_with("UNIT 5 RESPOND"));
    }

    #[test]
    fn test_flex_bracketed_capcode() {
        let ev = pager("FLEX: 1600 [0004567] ALN test message");
        assert_eq!(ev.capcode, Some(4567));
    }

    #[test]
    fn test_multimon_noise() {
        assert!(parse_multimon("multimon-ng 1.2.0", T).is_none());
        assert!(parse_multimon("Enabled demodulators: POCSAG512 POCSAG1200", T).is_none());
        assert!(parse_multimon("POCSAG1200: Address: abc Function: 0 Alpha: x", T).is_none());
        assert!(parse_multimon("", T).is_none());
    }

    #[test]
    fn test_dump1090_stdout_never_parses() {
        assert!(parse_dump1090("*8D4840D6202CC371C32CE0576098;").is_none());
        assert!(parse_dump1090("MSG,3,1,1,4CA2B4,1").is_none());
    }

    #[test]
    fn test_sbs_full_message() {
        let ev = adsb(
            "MSG,3,1,1,4CA2B4,1,2024/01/01,12:00:00,2024/01/01,12:00:00,BAW123,35000,450,270,51.47,-0.45,,7000,,,,",
        );
        assert_eq!(ev.icao, "4CA2B4");
        assert_eq!(ev.message_type.as_deref(), Some("3"));
        assert_eq!(ev.callsign.as_deref(), Some("BAW123"));
        assert_eq!(ev.altitude, Some(35000));
        assert_eq!(ev.speed, Some(450.0));
        assert_eq!(ev.heading, Some(270.0));
        assert_eq!(ev.latitude, Some(51.47));
        assert_eq!(ev.longitude, Some(-0.45));
        assert_eq!(ev.vertical_rate, None);
        assert_eq!(ev.squawk.as_deref(), Some("7000"));
    }

    #[test]
    fn test_sbs_rejects_non_msg() {
        assert!(parse_sbs("SEL,,496,2286,4CA4E5,27215,2010/02/19,18:06:07.710,,,,", T).is_none());
        assert!(parse_sbs("AIR,,496,1,4CA2B4,1,,,,", T).is_none());
        assert!(parse_sbs("msg,3,1,1,4CA2B4", T).is_none());
    }

    #[test]
    fn test_sbs_rejects_missing_icao() {
        assert!(parse_sbs("MSG,3,1,1,,1", T).is_none());
        assert!(parse_sbs("MSG,3,1,1,   ,1", T).is_none());
        assert!(parse_sbs("MSG,3", T).is_none());
    }

    #[test]
    fn test_sbs_short_line() {
        let ev = adsb("MSG,8,1,1,A1B2C3,1");
        assert_eq!(ev.icao, "A1B2C3");
        assert!(ev.callsign.is_none());
        assert!(ev.altitude.is_none());
        assert!(ev.squawk.is_none());
    }

    #[test]
    fn test_sbs_velocity_message() {
        let ev = adsb("MSG,4,1,1,A1B2C3,1,2024/01/01,12:00:00,2024/01/01,12:00:00,,,420.5,93.2,,,-1280,,,,,0");
        assert_eq!(ev.speed, Some(420.5));
        assert_eq!(ev.heading, Some(93.2));
        assert_eq!(ev.vertical_rate, Some(-1280));
        assert!(ev.latitude.is_none());
    }

    #[test]
    fn test_sbs_garbage_numbers_dropped() {
        let ev = adsb("MSG,3,1,1,A1B2C3,1,,,,,,FL350,fast,,x,y,,");
        assert!(ev.altitude.is_none());
        assert!(ev.speed.is_none());
        assert!(ev.latitude.is_none());
        assert!(ev.longitude.is_none());
    }

    #[test]
    fn test_sbs_decimal_altitude() {
        let ev = adsb("MSG,3,1,1,A1B2C3,1,,,,,,35000.0");
        assert_eq!(ev.altitude, Some(35000));
    }
}
