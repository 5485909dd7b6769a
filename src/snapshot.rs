//! Binary snapshot of one ranking set.
//!
//! A snapshot is the unit of durability: the full contents of a set, written
//! wholesale on every flush.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - **Header**: `[SNAPSHOT_MAGIC][FORMAT_VERSION][entry_count:u64][payload_len:u64][crc32:u32]`
//!   (little-endian for integers).
//! - **Payload**: postcard-encoded `Vec<Entry>`, emitted in rank order. Readers
//!   do not depend on that order.
//! - **Checksum**: `crc32fast` over the payload bytes.
//! - **Exactness**: the buffer ends right after the payload; trailing bytes are corruption.

use crate::error::{RankError, RankResult};
use crate::formats::{FORMAT_VERSION, SNAPSHOT_MAGIC};
use crate::rankset::Entry;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashSet;
use std::io::{Read, Write};

/// Upper bound on snapshot payload size, so a corrupt header cannot make us
/// allocate an absurd buffer.
pub const MAX_SNAPSHOT_PAYLOAD_BYTES: usize = 512 * 1024 * 1024; // 512 MiB

/// Fixed-size header stored at the start of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Magic bytes (should equal `SNAPSHOT_MAGIC`).
    pub magic: [u8; 4],
    /// Format version (should equal `FORMAT_VERSION`).
    pub version: u32,
    /// Number of entries in the payload.
    pub entry_count: u64,
    /// Payload length in bytes.
    pub payload_len: u64,
    /// CRC32 computed over payload bytes.
    pub checksum: u32,
}

impl SnapshotHeader {
    /// Number of bytes in the serialized header.
    pub const SIZE: usize = 4 + 4 + 8 + 8 + 4;

    /// Write the header to a stream.
    pub fn write<W: Write>(&self, w: &mut W) -> RankResult<()> {
        w.write_all(&self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.payload_len)?;
        w.write_u32::<LittleEndian>(self.checksum)?;
        Ok(())
    }

    /// Read the header from a stream.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> RankResult<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(RankError::Format("invalid snapshot magic".into()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(RankError::FormatDetail {
                message: "snapshot version mismatch".into(),
                expected: Some(FORMAT_VERSION.to_string()),
                actual: Some(version.to_string()),
            });
        }
        Ok(Self {
            magic,
            version,
            entry_count: r.read_u64::<LittleEndian>()?,
            payload_len: r.read_u64::<LittleEndian>()?,
            checksum: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Encode `entries` as a framed snapshot.
pub fn encode(entries: &[Entry]) -> RankResult<Vec<u8>> {
    let payload = postcard::to_allocvec(entries).map_err(|e| RankError::Encode(e.to_string()))?;
    if payload.len() > MAX_SNAPSHOT_PAYLOAD_BYTES {
        return Err(RankError::Encode(format!(
            "snapshot payload too large: {} bytes (max {})",
            payload.len(),
            MAX_SNAPSHOT_PAYLOAD_BYTES
        )));
    }
    let h = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        version: FORMAT_VERSION,
        entry_count: entries.len() as u64,
        payload_len: payload.len() as u64,
        checksum: crc32fast::hash(&payload),
    };
    let mut buf = Vec::with_capacity(SnapshotHeader::SIZE + payload.len());
    h.write(&mut buf)?;
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a framed snapshot, validating header, length, checksum, entry count
/// and user uniqueness.
pub fn decode(bytes: &[u8]) -> RankResult<Vec<Entry>> {
    if bytes.len() < SnapshotHeader::SIZE {
        return Err(RankError::FormatDetail {
            message: "truncated snapshot header".into(),
            expected: Some(format!(">= {} bytes", SnapshotHeader::SIZE)),
            actual: Some(bytes.len().to_string()),
        });
    }
    let (mut head, payload) = bytes.split_at(SnapshotHeader::SIZE);
    let h = SnapshotHeader::read(&mut head)?;

    let len = usize::try_from(h.payload_len)
        .map_err(|_| RankError::Format("payload_len overflow".into()))?;
    if len > MAX_SNAPSHOT_PAYLOAD_BYTES {
        return Err(RankError::Format(format!(
            "snapshot payload too large: {len} bytes (max {MAX_SNAPSHOT_PAYLOAD_BYTES})"
        )));
    }
    if payload.len() != len {
        return Err(RankError::FormatDetail {
            message: "snapshot payload length mismatch".into(),
            expected: Some(len.to_string()),
            actual: Some(payload.len().to_string()),
        });
    }

    let got = crc32fast::hash(payload);
    if got != h.checksum {
        return Err(RankError::CrcMismatch {
            expected: h.checksum,
            actual: got,
        });
    }

    let entries: Vec<Entry> =
        postcard::from_bytes(payload).map_err(|e| RankError::Decode(e.to_string()))?;
    if entries.len() as u64 != h.entry_count {
        return Err(RankError::FormatDetail {
            message: "snapshot entry count mismatch".into(),
            expected: Some(h.entry_count.to_string()),
            actual: Some(entries.len().to_string()),
        });
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for e in &entries {
        if !seen.insert(e.user_id) {
            return Err(RankError::Format(format!(
                "duplicate user {} in snapshot",
                e.user_id
            )));
        }
    }
    Ok(entries)
}
