//! Snapshot framing for the file-backed store.
//!
//! The snapshot body is serialized with:
//! - JSON for data (compatible with the record serde attributes)
//! - Length-prefixed format for framing
//! - CRC32 checksum for corruption detection
//! - Version byte for forward compatibility

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current snapshot format version.
const FORMAT_VERSION: u8 = 1;

/// Magic bytes identifying flagstick snapshot files.
pub const MAGIC: [u8; 4] = *b"FSTK";

/// Snapshots larger than this are rejected on read.
const MAX_SNAPSHOT_SIZE: usize = 64 * 1024 * 1024;

/// Serializes a value to bytes with checksum.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| {
        IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}"))
    })?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Deserializes a value from bytes, verifying checksum.
///
/// # Errors
/// - Returns an error if the checksum fails (corruption detected)
/// - Returns an error if the version is unsupported
/// - Returns an error if deserialization fails
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    if version[0] != FORMAT_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "unsupported snapshot version: {} (expected {FORMAT_VERSION})",
                version[0]
            ),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_SNAPSHOT_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("snapshot size {len} exceeds maximum {MAX_SNAPSHOT_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();

    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(&data).map_err(|e| {
        IoError::new(
            ErrorKind::InvalidData,
            format!("deserialization failed: {e}"),
        )
    })
}

/// Write the snapshot header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])?;
    Ok(())
}

/// Read and validate the snapshot header, returning the format version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    Ok(version[0])
}
