//! # Codec - Device Record Encoding
//!
//! Serializes the set of campaigns a device belongs to into the value bytes
//! stored under the device identifier, and implements the add/remove merge
//! used by every write path.
//!
//! ## Binary Record Format
//!
//! ```text
//! [version: u8][count: u32 LE][campaign: u32 LE] x count [crc32: u32 LE]
//! ```
//!
//! The CRC covers every byte before it. Campaigns are kept in first-insertion
//! order and are distinct; a record that violates either rule fails to decode.
//!
//! ## Example
//!
//! ```rust
//! use codec::{apply, decode, Operation};
//!
//! let first = apply(Operation::Add, 7, None).unwrap();
//! assert!(first.changed);
//!
//! let value = first.value.unwrap();
//! let again = apply(Operation::Add, 7, Some(value.as_ref())).unwrap();
//! assert!(!again.changed);
//!
//! assert_eq!(decode(&value).unwrap().as_slice(), &[7]);
//! ```

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Identifier of an advertising campaign.
pub type CampaignId = u32;

/// Current value layout version, stored in the first byte of every record.
pub const FORMAT_VERSION: u8 = 1;

/// version (1) + count (4) + crc (4)
const OVERHEAD: usize = 9;

/// Errors raised while decoding a stored record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes than the smallest possible record.
    #[error("record truncated: {len} bytes")]
    Truncated { len: usize },

    /// The version byte is not one this codec understands.
    #[error("unknown record version {0}")]
    UnknownVersion(u8),

    /// The declared campaign count disagrees with the buffer length.
    #[error("record length mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: u64, actual: usize },

    /// The stored checksum does not match the payload.
    #[error("record checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// A campaign appears more than once.
    #[error("duplicate campaign {0} in record")]
    DuplicateCampaign(CampaignId),
}

/// Ordered set of campaign identifiers.
///
/// Iteration order is first-insertion order. Membership checks are linear,
/// which is faster than hashing for the few dozen campaigns a device
/// typically carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignSet(Vec<CampaignId>);

impl CampaignSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends `campaign` unless it is already present. Returns `true` if the
    /// set grew.
    pub fn insert(&mut self, campaign: CampaignId) -> bool {
        if self.contains(campaign) {
            return false;
        }
        self.0.push(campaign);
        true
    }

    /// Removes every occurrence of `campaign`, keeping the order of the rest.
    /// Returns `true` if anything was removed.
    pub fn remove(&mut self, campaign: CampaignId) -> bool {
        let before = self.0.len();
        self.0.retain(|&c| c != campaign);
        self.0.len() != before
    }

    pub fn contains(&self, campaign: CampaignId) -> bool {
        self.0.contains(&campaign)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[CampaignId] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = CampaignId> + '_ {
        self.0.iter().copied()
    }

    pub fn into_vec(self) -> Vec<CampaignId> {
        self.0
    }
}

/// Builds a set from an iterator, dropping repeats after their first
/// occurrence.
impl FromIterator<CampaignId> for CampaignSet {
    fn from_iter<I: IntoIterator<Item = CampaignId>>(iter: I) -> Self {
        let mut set = CampaignSet::new();
        for campaign in iter {
            set.insert(campaign);
        }
        set
    }
}

/// Serializes `set` into a freshly allocated record.
pub fn encode(set: &CampaignSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(OVERHEAD + set.len() * 4);
    encode_into(set, &mut out);
    out
}

/// Serializes `set` into `out`, replacing its contents but keeping its
/// allocation.
pub fn encode_into(set: &CampaignSet, out: &mut Vec<u8>) {
    let body_len = 5 + set.len() * 4;
    out.clear();
    out.resize(body_len + 4, 0);

    out[0] = FORMAT_VERSION;
    LittleEndian::write_u32(&mut out[1..5], set.len() as u32);
    for (i, campaign) in set.iter().enumerate() {
        let at = 5 + i * 4;
        LittleEndian::write_u32(&mut out[at..at + 4], campaign);
    }

    let mut hasher = Crc32::new();
    hasher.update(&out[..body_len]);
    LittleEndian::write_u32(&mut out[body_len..], hasher.finalize());
}

/// Parses a stored record.
///
/// Any structural problem is an error; a corrupt record never decodes to an
/// empty set.
pub fn decode(bytes: &[u8]) -> Result<CampaignSet, CodecError> {
    if bytes.len() < OVERHEAD {
        return Err(CodecError::Truncated { len: bytes.len() });
    }

    let mut rdr = bytes;
    let version = rdr.read_u8().map_err(|_| truncated(bytes))?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }

    let count = rdr
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated(bytes))? as u64;
    let expected = OVERHEAD as u64 + count * 4;
    if expected != bytes.len() as u64 {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    let body_len = bytes.len() - 4;
    let stored = LittleEndian::read_u32(&bytes[body_len..]);
    let mut hasher = Crc32::new();
    hasher.update(&bytes[..body_len]);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    let mut set = CampaignSet(Vec::with_capacity(count as usize));
    for _ in 0..count {
        let campaign = rdr
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated(bytes))?;
        if !set.insert(campaign) {
            return Err(CodecError::DuplicateCampaign(campaign));
        }
    }
    Ok(set)
}

fn truncated(bytes: &[u8]) -> CodecError {
    CodecError::Truncated { len: bytes.len() }
}

/// Membership mutation applied to a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => f.write_str("add"),
            Operation::Remove => f.write_str("remove"),
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(Operation::Add),
            "remove" => Ok(Operation::Remove),
            other => Err(format!("unknown operation: {other}")),
        }
    }
}

/// Outcome of [`apply`].
///
/// `value` is `None` only when there was no previous record and nothing was
/// created. When `changed` is `false` and a previous record existed, `value`
/// borrows it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<'a> {
    pub value: Option<Cow<'a, [u8]>>,
    pub changed: bool,
}

impl Applied<'_> {
    fn unchanged(previous: Option<&[u8]>) -> Applied<'_> {
        Applied {
            value: previous.map(Cow::Borrowed),
            changed: false,
        }
    }
}

/// Merges `op` for `campaign` into the previous record of a device.
///
/// | previous | op     | campaign present | result                  |
/// |----------|--------|------------------|-------------------------|
/// | absent   | Add    | -                | `{campaign}`, changed   |
/// | absent   | Remove | -                | absent, unchanged       |
/// | present  | Add    | yes              | previous, unchanged     |
/// | present  | Add    | no               | appended, changed       |
/// | present  | Remove | yes              | removed, changed        |
/// | present  | Remove | no               | previous, unchanged     |
///
/// A removal that empties the set still yields a record (an encoded empty
/// set), so the device stays known to the store.
///
/// # Errors
///
/// Returns the decode error if `previous` is corrupt.
pub fn apply(
    op: Operation,
    campaign: CampaignId,
    previous: Option<&[u8]>,
) -> Result<Applied<'_>, CodecError> {
    let Some(bytes) = previous else {
        return Ok(match op {
            Operation::Add => {
                let set: CampaignSet = std::iter::once(campaign).collect();
                Applied {
                    value: Some(Cow::Owned(encode(&set))),
                    changed: true,
                }
            }
            Operation::Remove => Applied::unchanged(None),
        });
    };

    let mut set = decode(bytes)?;
    let changed = match op {
        Operation::Add => set.insert(campaign),
        Operation::Remove => set.remove(campaign),
    };
    if !changed {
        return Ok(Applied::unchanged(previous));
    }
    Ok(Applied {
        value: Some(Cow::Owned(encode(&set))),
        changed: true,
    })
}

#[cfg(test)]
mod tests;
