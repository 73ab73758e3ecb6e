#![forbid(unsafe_code)]

//! Global subject identifiers (GSIDs) and their generator.
//!
//! A GSID is `GSID-` followed by 16 characters of base-32 over an alphabet
//! that drops the visually ambiguous glyphs `0 O 1 I`. The payload carries
//! 80 bits drawn from the OS random source, so accidental collision is
//! negligible and identifiers remain fixed-length and scheme-tagged.

use rand::RngCore;
use rand::rngs::OsRng;

pub const GSID_PREFIX: &str = "GSID-";
pub const GSID_PAYLOAD_LEN: usize = 16;
const GSID_PAYLOAD_BYTES: usize = 10;

const ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gsid(String);

impl Gsid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a stored or externally supplied GSID. The store re-checks
    /// identifiers read back from disk at the boundary.
    pub fn try_new(value: impl Into<String>) -> Result<Self, GsidError> {
        let value = value.into();
        let Some(payload) = value.strip_prefix(GSID_PREFIX) else {
            return Err(GsidError::MissingPrefix);
        };
        if payload.len() != GSID_PAYLOAD_LEN {
            return Err(GsidError::WrongLength {
                actual: payload.len(),
            });
        }
        for (index, ch) in payload.chars().enumerate() {
            if !ch.is_ascii() || !ALPHABET.contains(&(ch as u8)) {
                return Err(GsidError::InvalidChar { ch, index });
            }
        }
        Ok(Self(value))
    }
}

impl std::fmt::Display for Gsid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GsidError {
    MissingPrefix,
    WrongLength { actual: usize },
    InvalidChar { ch: char, index: usize },
}

impl std::fmt::Display for GsidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "gsid must start with {GSID_PREFIX}"),
            Self::WrongLength { actual } => {
                write!(f, "gsid payload must be {GSID_PAYLOAD_LEN} characters, got {actual}")
            }
            Self::InvalidChar { ch, index } => {
                write!(f, "gsid payload contains invalid character {ch:?} at index {index}")
            }
        }
    }
}

impl std::error::Error for GsidError {}

/// Draws fresh GSIDs from the OS random source. Construction probes the
/// source once; an unavailable source is a fatal initialization error, never
/// a per-call retry.
#[derive(Debug)]
pub struct GsidGenerator {
    rng: OsRng,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GsidGeneratorError(String);

impl std::fmt::Display for GsidGeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "os random source unavailable: {}", self.0)
    }
}

impl std::error::Error for GsidGeneratorError {}

impl GsidGenerator {
    pub fn new() -> Result<Self, GsidGeneratorError> {
        let mut rng = OsRng;
        let mut probe = [0u8; GSID_PAYLOAD_BYTES];
        rng.try_fill_bytes(&mut probe)
            .map_err(|err| GsidGeneratorError(err.to_string()))?;
        Ok(Self { rng })
    }

    pub fn generate(&mut self) -> Gsid {
        let mut bytes = [0u8; GSID_PAYLOAD_BYTES];
        self.rng.fill_bytes(&mut bytes);
        Gsid(format!("{GSID_PREFIX}{}", encode_payload(&bytes)))
    }
}

fn encode_payload(bytes: &[u8; GSID_PAYLOAD_BYTES]) -> String {
    let mut out = String::with_capacity(GSID_PAYLOAD_LEN);
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    out
}
