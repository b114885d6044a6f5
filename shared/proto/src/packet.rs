//! The fixed-layout DMRD burst codec (component A).
//!
//! Layout (big-endian fields), see spec §4.A:
//!
//! | offset | size | field                                    |
//! |--------|------|------------------------------------------|
//! | 0      | 4    | signature                                 |
//! | 4      | 1    | seq                                       |
//! | 5      | 3    | src                                       |
//! | 8      | 3    | dst                                       |
//! | 11     | 4    | repeater                                   |
//! | 15     | 1    | bit-packed slot/groupCall/frameType/dtype |
//! | 16     | 4    | streamID                                   |
//! | 20     | 33   | dmrData                                    |
//! | 53     | 1    | ber (optional)                             |
//! | 54     | 1    | rssi (optional)                            |

use crate::error::HubError;

pub const MIN_LEN: usize = 53;
pub const MAX_LEN: usize = 55;
pub const DMR_DATA_LEN: usize = 33;

/// The two known burst signatures. Interned to avoid a per-packet
/// allocation, per spec §4.A.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signature {
    /// Ordinary data burst; the only signature the hub routes.
    Dmrd,
    /// Audio-tagged variant some peer implementations emit.
    Dmra,
}

impl Signature {
    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Signature::Dmrd => b"DMRD",
            Signature::Dmra => b"DMRA",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"DMRD" => Some(Signature::Dmrd),
            b"DMRA" => Some(Signature::Dmra),
            _ => None,
        }
    }

    pub fn is_routed(self) -> bool {
        matches!(self, Signature::Dmrd)
    }
}

/// Voice/VoiceSync/DataSync, per spec §3. Values match the 2-bit
/// on-wire encoding directly (DataSync = 2, the value exercised by
/// spec.md's concrete decode scenario).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameType {
    Voice = 0,
    VoiceSync = 1,
    DataSync = 2,
}

impl FrameType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => FrameType::Voice,
            1 => FrameType::VoiceSync,
            _ => FrameType::DataSync,
        }
    }

    fn to_bits(self) -> u8 {
        self as u8
    }
}

/// Interpretation of `dtypeOrVSeq` when `frameType == DataSync`.
/// Meaningless (a plain voice-burst index A..F) for Voice/VoiceSync.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    VoiceHeader,
    VoiceTerm,
    Csbk,
    Other(u8),
}

impl DataType {
    pub fn from_dtype(dtype: u8) -> Self {
        match dtype {
            1 => DataType::VoiceHeader,
            2 => DataType::VoiceTerm,
            3 => DataType::Csbk,
            other => DataType::Other(other),
        }
    }
}

/// A decoded DMRD burst. Immutable once decoded; passed by value
/// through the hub (spec §3 ownership rules).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub signature: Signature,
    pub seq: u8,
    pub src: u32,
    pub dst: u32,
    pub repeater: u32,
    pub slot: bool,
    pub group_call: bool,
    pub frame_type: FrameType,
    pub dtype_or_vseq: u8,
    pub stream_id: u32,
    pub dmr_data: [u8; DMR_DATA_LEN],
    /// -1 denotes absent, per spec §3.
    pub ber: i8,
    /// -1 denotes absent, per spec §3.
    pub rssi: i8,
}

impl Packet {
    pub fn data_type(&self) -> DataType {
        DataType::from_dtype(self.dtype_or_vseq)
    }

    /// `checkPacketType` from spec §4.G step 1: classify a packet as
    /// voice-bearing, data-bearing, or neither.
    pub fn classify(&self) -> (bool, bool) {
        use DataType::*;
        use FrameType::*;
        match self.frame_type {
            Voice | VoiceSync => (true, false),
            DataSync => match self.data_type() {
                VoiceHeader | VoiceTerm => (true, false),
                _ => (false, true),
            },
        }
    }

    pub fn is_voice(&self) -> bool {
        self.classify().0
    }

    pub fn is_data(&self) -> bool {
        self.classify().1
    }

    pub fn is_terminator(&self) -> bool {
        self.frame_type == FrameType::DataSync && matches!(self.data_type(), DataType::VoiceTerm)
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
}

fn write_u24(value: u32, out: &mut [u8]) {
    out[0] = (value >> 16) as u8;
    out[1] = (value >> 8) as u8;
    out[2] = value as u8;
}

/// Decode a wire-format burst. Fails for `len < 53` or `len > 55`.
pub fn decode(data: &[u8]) -> Result<Packet, HubError> {
    if data.len() < MIN_LEN || data.len() > MAX_LEN {
        return Err(HubError::MalformedPacket("DMRD burst length out of range"));
    }

    let signature = Signature::from_bytes(&data[0..4])
        .ok_or(HubError::MalformedPacket("unrecognised DMRD signature"))?;

    let seq = data[4];
    let src = read_u24(&data[5..8]);
    let dst = read_u24(&data[8..11]);
    let repeater = u32::from_be_bytes(data[11..15].try_into().unwrap());

    let flags = data[15];
    let slot = flags & 0x80 != 0;
    let group_call = flags & 0x40 == 0;
    let frame_type = FrameType::from_bits(flags >> 4);
    let dtype_or_vseq = flags & 0x0F;

    let stream_id = u32::from_be_bytes(data[16..20].try_into().unwrap());

    let mut dmr_data = [0u8; DMR_DATA_LEN];
    dmr_data.copy_from_slice(&data[20..53]);

    let (ber, rssi) = match data.len() {
        MIN_LEN => (-1i8, -1i8),
        54 => (data[53] as i8, -1i8),
        _ => (data[53] as i8, data[54] as i8),
    };

    Ok(Packet {
        signature,
        seq,
        src,
        dst,
        repeater,
        slot,
        group_call,
        frame_type,
        dtype_or_vseq,
        stream_id,
        dmr_data,
        ber,
        rssi,
    })
}

/// Encode a burst. Always writes 55 bytes; trailer bytes are zeroed
/// when `ber`/`rssi` are absent (-1), per spec §4.A/§9 option (b).
pub fn encode(packet: &Packet) -> [u8; MAX_LEN] {
    let mut out = [0u8; MAX_LEN];
    out[0..4].copy_from_slice(packet.signature.as_bytes());
    out[4] = packet.seq;
    write_u24(packet.src, &mut out[5..8]);
    write_u24(packet.dst, &mut out[8..11]);
    out[11..15].copy_from_slice(&packet.repeater.to_be_bytes());

    let mut flags = 0u8;
    if packet.slot {
        flags |= 0x80;
    }
    if !packet.group_call {
        flags |= 0x40;
    }
    flags |= packet.frame_type.to_bits() << 4;
    flags |= packet.dtype_or_vseq & 0x0F;
    out[15] = flags;

    out[16..20].copy_from_slice(&packet.stream_id.to_be_bytes());
    out[20..53].copy_from_slice(&packet.dmr_data);

    out[53] = if packet.ber == -1 { 0 } else { packet.ber as u8 };
    out[54] = if packet.rssi == -1 { 0 } else { packet.rssi as u8 };

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        let mut v = vec![68, 77, 82, 68, 1, 0, 0, 2, 0, 0, 3, 0, 0, 0, 4, 0xA5, 0, 0, 0, 6];
        v.extend(1u8..=33u8);
        v.push(7);
        v.push(8);
        v
    }

    #[test]
    fn decodes_known_good_dmrd() {
        let bytes = sample_bytes();
        let p = decode(&bytes).unwrap();
        assert_eq!(p.signature, Signature::Dmrd);
        assert_eq!(p.seq, 1);
        assert_eq!(p.src, 2);
        assert_eq!(p.dst, 3);
        assert_eq!(p.repeater, 4);
        assert!(p.slot);
        assert!(p.group_call);
        assert_eq!(p.frame_type, FrameType::DataSync);
        assert_eq!(p.dtype_or_vseq, 5);
        assert_eq!(p.stream_id, 6);
        assert_eq!(p.dmr_data, {
            let mut d = [0u8; 33];
            for (i, b) in d.iter_mut().enumerate() {
                *b = (i + 1) as u8;
            }
            d
        });
        assert_eq!(p.ber, 7);
        assert_eq!(p.rssi, 8);
    }

    #[test]
    fn rejects_out_of_range_length() {
        let mut bytes = sample_bytes();
        bytes.truncate(52);
        assert!(decode(&bytes).is_err());

        let mut bytes = sample_bytes();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn fifty_three_byte_burst_has_absent_trailer() {
        let bytes = &sample_bytes()[..53];
        let p = decode(bytes).unwrap();
        assert_eq!(p.ber, -1);
        assert_eq!(p.rssi, -1);
    }

    #[test]
    fn round_trips_when_trailer_present() {
        let original = decode(&sample_bytes()).unwrap();
        let encoded = encode(&original);
        assert_eq!(encoded.len(), MAX_LEN);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn absent_trailer_round_trips_to_zero() {
        let bytes = &sample_bytes()[..53];
        let original = decode(bytes).unwrap();
        assert_eq!(original.ber, -1);
        let encoded = encode(&original);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.ber, 0);
        assert_eq!(decoded.rssi, 0);
        assert_eq!(decoded.src, original.src);
        assert_eq!(decoded.dst, original.dst);
        assert_eq!(decoded.repeater, original.repeater);
        assert_eq!(decoded.stream_id, original.stream_id);
        assert_eq!(decoded.slot, original.slot);
        assert_eq!(decoded.group_call, original.group_call);
        assert_eq!(decoded.frame_type, original.frame_type);
        assert_eq!(decoded.dtype_or_vseq, original.dtype_or_vseq);
        assert_eq!(decoded.dmr_data, original.dmr_data);
    }

    #[test]
    fn classifies_voice_and_data() {
        let mut p = decode(&sample_bytes()).unwrap();
        p.frame_type = FrameType::Voice;
        assert_eq!(p.classify(), (true, false));

        p.frame_type = FrameType::DataSync;
        p.dtype_or_vseq = 1; // VoiceHeader
        assert_eq!(p.classify(), (true, false));

        p.dtype_or_vseq = 3; // Csbk
        assert_eq!(p.classify(), (false, true));
    }

    #[test]
    fn recognises_terminator() {
        let mut p = decode(&sample_bytes()).unwrap();
        p.frame_type = FrameType::DataSync;
        p.dtype_or_vseq = 2; // VoiceTerm
        assert!(p.is_terminator());
    }
}
