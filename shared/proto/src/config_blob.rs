//! The 302-byte repeater-configuration blob carried by `RPTC`.
//!
//! Fixed-width ASCII fields, left-justified and space-padded, in the
//! order given by spec §4.A: callsign, rx/tx frequency, tx power,
//! colour code, latitude/longitude (decimal ASCII), height, location,
//! description, slot count, URL, software id, package id.

use crate::error::HubError;

const CALLSIGN: usize = 8;
const RX_FREQ: usize = 9;
const TX_FREQ: usize = 9;
const TX_POWER: usize = 2;
const COLOUR_CODE: usize = 2;
const LATITUDE: usize = 8;
const LONGITUDE: usize = 9;
const HEIGHT: usize = 3;
const LOCATION: usize = 20;
const DESCRIPTION: usize = 19;
const SLOTS: usize = 1;
const URL: usize = 132;
const SOFTWARE_ID: usize = 40;
const PACKAGE_ID: usize = 40;

pub const BLOB_LEN: usize = CALLSIGN
    + RX_FREQ
    + TX_FREQ
    + TX_POWER
    + COLOUR_CODE
    + LATITUDE
    + LONGITUDE
    + HEIGHT
    + LOCATION
    + DESCRIPTION
    + SLOTS
    + URL
    + SOFTWARE_ID
    + PACKAGE_ID;

/// A parsed repeater-configuration blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepeaterConfigBlob {
    pub callsign: String,
    pub rx_freq_hz: String,
    pub tx_freq_hz: String,
    pub tx_power: u32,
    pub colour_code: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub height: u32,
    pub location: String,
    pub description: String,
    pub slots: u32,
    pub url: String,
    pub software_id: String,
    pub package_id: String,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn take_str(&mut self, len: usize) -> Result<String, HubError> {
        let raw = self.take(len);
        std::str::from_utf8(raw)
            .map(|s| s.trim_end().to_string())
            .map_err(|_| HubError::MalformedPacket("config blob field is not valid UTF-8"))
    }
}

fn parse_unsigned(field: &str, name: &'static str) -> Result<u32, HubError> {
    let trimmed = field.trim();
    if trimmed.starts_with('-') {
        return Err(HubError::MalformedPacket(name));
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| HubError::MalformedPacket(name))
}

fn parse_signed_decimal(field: &str, name: &'static str) -> Result<f64, HubError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| HubError::MalformedPacket(name))
}

/// Parse a 302-byte config blob. Rejects negative integers in
/// unsigned fields and out-of-range latitude/longitude/colour code.
pub fn decode(data: &[u8]) -> Result<RepeaterConfigBlob, HubError> {
    if data.len() != BLOB_LEN {
        return Err(HubError::MalformedPacket("config blob length mismatch"));
    }

    let mut cur = Cursor { data, pos: 0 };

    let callsign = cur.take_str(CALLSIGN)?;
    let rx_freq_hz = cur.take_str(RX_FREQ)?;
    let tx_freq_hz = cur.take_str(TX_FREQ)?;
    let tx_power = parse_unsigned(&cur.take_str(TX_POWER)?, "tx power must be unsigned")?;
    let colour_code = parse_unsigned(&cur.take_str(COLOUR_CODE)?, "colour code must be unsigned")?;

    let latitude = parse_signed_decimal(&cur.take_str(LATITUDE)?, "latitude not decimal")?;
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(HubError::MalformedPacket("latitude out of range"));
    }

    let longitude = parse_signed_decimal(&cur.take_str(LONGITUDE)?, "longitude not decimal")?;
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(HubError::MalformedPacket("longitude out of range"));
    }

    let height = parse_unsigned(&cur.take_str(HEIGHT)?, "height must be unsigned")?;
    let location = cur.take_str(LOCATION)?;
    let description = cur.take_str(DESCRIPTION)?;
    let slots = parse_unsigned(&cur.take_str(SLOTS)?, "slots must be unsigned")?;
    let url = cur.take_str(URL)?;
    let software_id = cur.take_str(SOFTWARE_ID)?;
    let package_id = cur.take_str(PACKAGE_ID)?;

    if !(1..=15).contains(&colour_code) {
        return Err(HubError::MalformedPacket("colour code out of range 1..15"));
    }

    Ok(RepeaterConfigBlob {
        callsign,
        rx_freq_hz,
        tx_freq_hz,
        tx_power,
        colour_code,
        latitude,
        longitude,
        height,
        location,
        description,
        slots,
        url,
        software_id,
        package_id,
    })
}

fn write_field(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(width);
    out.extend_from_slice(&bytes[..take]);
    out.resize(out.len() + (width - take), b' ');
}

/// Encode a config blob back to its 302-byte wire form. Oversized
/// strings are truncated to their field width rather than rejected.
pub fn encode(cfg: &RepeaterConfigBlob) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOB_LEN);
    write_field(&mut out, &cfg.callsign, CALLSIGN);
    write_field(&mut out, &cfg.rx_freq_hz, RX_FREQ);
    write_field(&mut out, &cfg.tx_freq_hz, TX_FREQ);
    write_field(&mut out, &cfg.tx_power.to_string(), TX_POWER);
    write_field(&mut out, &cfg.colour_code.to_string(), COLOUR_CODE);
    write_field(&mut out, &format!("{:.4}", cfg.latitude), LATITUDE);
    write_field(&mut out, &format!("{:.4}", cfg.longitude), LONGITUDE);
    write_field(&mut out, &cfg.height.to_string(), HEIGHT);
    write_field(&mut out, &cfg.location, LOCATION);
    write_field(&mut out, &cfg.description, DESCRIPTION);
    write_field(&mut out, &cfg.slots.to_string(), SLOTS);
    write_field(&mut out, &cfg.url, URL);
    write_field(&mut out, &cfg.software_id, SOFTWARE_ID);
    write_field(&mut out, &cfg.package_id, PACKAGE_ID);
    debug_assert_eq!(out.len(), BLOB_LEN);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RepeaterConfigBlob {
        RepeaterConfigBlob {
            callsign: "W1ABC".into(),
            rx_freq_hz: "446500000".into(),
            tx_freq_hz: "441500000".into(),
            tx_power: 25,
            colour_code: 1,
            latitude: 42.3601,
            longitude: -71.0589,
            height: 30,
            location: "Boston, MA".into(),
            description: "Test repeater".into(),
            slots: 2,
            url: "https://example.invalid".into(),
            software_id: "DMRHub-rs".into(),
            package_id: "1.0.0".into(),
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let cfg = sample();
        let bytes = encode(&cfg);
        assert_eq!(bytes.len(), BLOB_LEN);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, cfg);
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let mut cfg = sample();
        cfg.latitude = 95.0;
        let bytes = encode(&cfg);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_out_of_range_colour_code() {
        let mut cfg = sample();
        cfg.colour_code = 16;
        let bytes = encode(&cfg);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn truncates_oversized_strings_on_encode() {
        let mut cfg = sample();
        cfg.callsign = "WAYTOOLONGCALLSIGN".into();
        let bytes = encode(&cfg);
        assert_eq!(bytes.len(), BLOB_LEN);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.callsign.len(), CALLSIGN);
    }
}
