//! The Homebrew/MMDVM ASCII command grammar (spec §4.F/§6). Every
//! message is one UDP datagram, tagged by a leading ASCII string.
//! Unknown tags are logged and discarded by the caller, not nak-ed.

use crate::config_blob;
use crate::error::HubError;

pub const SHA256_LEN: usize = 32;

/// A parsed inbound command. `Data` is left undecoded here — the
/// caller runs it through `packet::decode`, since the codec already
/// owns the DMRD byte layout.
#[derive(Debug, Clone)]
pub enum Command {
    /// `RPTL <id>` — login request.
    Login { id: u32 },
    /// `RPTK <id> <sha256>` — login challenge response.
    Challenge { id: u32, hash: [u8; SHA256_LEN] },
    /// `RPTC <id> <302-byte blob>` — configuration.
    Config { id: u32, blob: Vec<u8> },
    /// `RPTCL <id>` — client requests close.
    Close { id: u32 },
    /// `RPTPING <id>` — keepalive.
    Ping { id: u32 },
    /// `RPTO <id> <options>` — options string.
    Options { id: u32, options: String },
    /// `DMRD ...` — a data burst; bytes are handed to `packet::decode`.
    Data(Vec<u8>),
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().unwrap())
}

/// Parse one inbound datagram into a command. Unknown leading tags
/// return `MalformedPacket`; the caller is expected to log and
/// discard rather than nak, per spec §6.
pub fn parse(data: &[u8]) -> Result<Command, HubError> {
    if data.starts_with(b"DMRD") || data.starts_with(b"DMRA") {
        return Ok(Command::Data(data.to_vec()));
    }

    // RPTCL (5-byte tag) must be checked before RPTC (4-byte tag).
    if data.starts_with(b"RPTCL") {
        if data.len() != 9 {
            return Err(HubError::MalformedPacket("RPTCL wrong length"));
        }
        return Ok(Command::Close {
            id: read_u32(&data[5..9]),
        });
    }

    if data.starts_with(b"RPTPING") {
        if data.len() != 11 {
            return Err(HubError::MalformedPacket("RPTPING wrong length"));
        }
        return Ok(Command::Ping {
            id: read_u32(&data[7..11]),
        });
    }

    if data.starts_with(b"RPTL") {
        if data.len() != 8 {
            return Err(HubError::MalformedPacket("RPTL wrong length"));
        }
        return Ok(Command::Login {
            id: read_u32(&data[4..8]),
        });
    }

    if data.starts_with(b"RPTK") {
        if data.len() != 4 + 4 + SHA256_LEN {
            return Err(HubError::MalformedPacket("RPTK wrong length"));
        }
        let id = read_u32(&data[4..8]);
        let mut hash = [0u8; SHA256_LEN];
        hash.copy_from_slice(&data[8..8 + SHA256_LEN]);
        return Ok(Command::Challenge { id, hash });
    }

    if data.starts_with(b"RPTC") {
        if data.len() != 4 + 4 + config_blob::BLOB_LEN {
            return Err(HubError::MalformedPacket("RPTC wrong length"));
        }
        let id = read_u32(&data[4..8]);
        let blob = data[8..8 + config_blob::BLOB_LEN].to_vec();
        return Ok(Command::Config { id, blob });
    }

    if data.starts_with(b"RPTO") {
        if data.len() < 8 {
            return Err(HubError::MalformedPacket("RPTO wrong length"));
        }
        let id = read_u32(&data[4..8]);
        let options = String::from_utf8_lossy(&data[8..]).trim_end().to_string();
        return Ok(Command::Options { id, options });
    }

    Err(HubError::MalformedPacket("unrecognised command tag"))
}

/// `RPTACK<payload>` — the server's acknowledgement, carrying either
/// the login salt or nothing (config ack).
pub fn encode_rptack(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + payload.len());
    out.extend_from_slice(b"RPTACK");
    out.extend_from_slice(payload);
    out
}

/// `MSTNAK<id>` — negative acknowledgement.
pub fn encode_mstnak(id: u32) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0..6].copy_from_slice(b"MSTNAK");
    out[6..10].copy_from_slice(&id.to_be_bytes());
    out
}

/// `MSTPONG<id>` — keepalive reply.
pub fn encode_mstpong(id: u32) -> [u8; 11] {
    let mut out = [0u8; 11];
    out[0..7].copy_from_slice(b"MSTPONG");
    out[7..11].copy_from_slice(&id.to_be_bytes());
    out
}

/// `MSTCL<id>` — server-initiated eviction.
pub fn encode_mstcl(id: u32) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0..5].copy_from_slice(b"MSTCL");
    out[5..9].copy_from_slice(&id.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rptl() {
        let mut data = b"RPTL".to_vec();
        data.extend_from_slice(&100_001u32.to_be_bytes());
        match parse(&data).unwrap() {
            Command::Login { id } => assert_eq!(id, 100_001),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_rptk_with_hash() {
        let mut data = b"RPTK".to_vec();
        data.extend_from_slice(&100_001u32.to_be_bytes());
        data.extend_from_slice(&[0xAB; SHA256_LEN]);
        match parse(&data).unwrap() {
            Command::Challenge { id, hash } => {
                assert_eq!(id, 100_001);
                assert_eq!(hash, [0xAB; SHA256_LEN]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn distinguishes_rptc_from_rptcl() {
        let mut close = b"RPTCL".to_vec();
        close.extend_from_slice(&5u32.to_be_bytes());
        assert!(matches!(parse(&close).unwrap(), Command::Close { id: 5 }));
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(parse(b"XYZZY123").is_err());
    }

    #[test]
    fn round_trips_mstpong() {
        let bytes = encode_mstpong(42);
        assert_eq!(&bytes[0..7], b"MSTPONG");
        assert_eq!(read_u32(&bytes[7..11]), 42);
    }
}
