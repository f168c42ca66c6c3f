// src/container/zip.rs

//! Minimal ZIP reader and deterministic ZIP writer
//!
//! Reading supports STORED and DEFLATE entries in single-disk, non-ZIP64
//! archives, which covers office documents. Sizes and offsets come from
//! the central directory, so entries that use data descriptors read fine.
//!
//! Writing emits a fixed header for every entry: version 2.0, UTF-8 name
//! flag, DOS timestamp 1980-01-01 00:00, no extra fields, no comments,
//! zero external attributes. Entries are written in the order supplied.

use super::{EntryCompression, Parts};
use crate::error::CanonicalizationError;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const VERSION: u16 = 20;
const DOS_TIME: u16 = 0;
// 1980-01-01: year offset 0, month 1, day 1
const DOS_DATE: u16 = (1 << 5) | 1;

/// ODF requires this part to be stored uncompressed
const MIMETYPE_PART: &str = "mimetype";

fn malformed(msg: impl Into<String>) -> CanonicalizationError {
    CanonicalizationError::MalformedContainer(msg.into())
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8], CanonicalizationError> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| malformed(format!("truncated archive at offset {at}")))
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, CanonicalizationError> {
    let b = slice(data, at, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, CanonicalizationError> {
    let b = slice(data, at, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Locate the end-of-central-directory record, scanning back over a
/// trailing archive comment
fn find_eocd(data: &[u8]) -> Result<usize, CanonicalizationError> {
    if data.len() < EOCD_LEN {
        return Err(malformed("archive shorter than end-of-central-directory record"));
    }
    let last = data.len() - EOCD_LEN;
    let first = last.saturating_sub(MAX_COMMENT_LEN);
    (first..=last)
        .rev()
        .find(|&pos| read_u32(data, pos).ok() == Some(EOCD_SIG))
        .ok_or_else(|| malformed("end-of-central-directory record not found"))
}

/// Normalize separators so archives written on Windows compare equal
fn normalize_part_name(raw: &[u8]) -> Result<String, CanonicalizationError> {
    let name = match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    };
    let name = name.replace('\\', "/");
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return Err(malformed("entry with empty name"));
    }
    Ok(name.to_string())
}

fn inflate(path: &str, compressed: &[u8], expected: usize) -> Result<Vec<u8>, CanonicalizationError> {
    let mut out = Vec::with_capacity(expected.min(64 * 1024 * 1024));
    // Read one byte past the declared size to catch lying headers
    DeflateDecoder::new(compressed)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| malformed(format!("{path}: deflate stream error: {e}")))?;
    Ok(out)
}

/// Read every file entry of an archive, in central directory order
pub fn read_archive(data: &[u8]) -> Result<Parts, CanonicalizationError> {
    let eocd = find_eocd(data)?;

    if read_u16(data, eocd + 4)? != 0 || read_u16(data, eocd + 6)? != 0 {
        return Err(malformed("multi-disk archives are not supported"));
    }
    let total = read_u16(data, eocd + 10)?;
    let cd_size = read_u32(data, eocd + 12)?;
    let cd_offset = read_u32(data, eocd + 16)?;
    if total == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
        return Err(malformed("ZIP64 archives are not supported"));
    }

    let mut parts = Parts::new();
    let mut pos = cd_offset as usize;

    for _ in 0..total {
        if read_u32(data, pos)? != CENTRAL_HEADER_SIG {
            return Err(malformed(format!("bad central directory signature at offset {pos}")));
        }
        let flags = read_u16(data, pos + 8)?;
        let method = read_u16(data, pos + 10)?;
        let crc = read_u32(data, pos + 16)?;
        let compressed_size = read_u32(data, pos + 20)? as usize;
        let size = read_u32(data, pos + 24)? as usize;
        let name_len = read_u16(data, pos + 28)? as usize;
        let extra_len = read_u16(data, pos + 30)? as usize;
        let comment_len = read_u16(data, pos + 32)? as usize;
        let local_offset = read_u32(data, pos + 42)? as usize;
        let raw_name = slice(data, pos + CENTRAL_HEADER_LEN, name_len)?;
        pos += CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;

        if raw_name.ends_with(b"/") {
            continue;
        }
        let name = normalize_part_name(raw_name)?;

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(CanonicalizationError::UnsupportedPart {
                path: name,
                reason: "encrypted entry".to_string(),
            });
        }

        if read_u32(data, local_offset)? != LOCAL_HEADER_SIG {
            return Err(malformed(format!("{name}: bad local header signature")));
        }
        let local_name_len = read_u16(data, local_offset + 26)? as usize;
        let local_extra_len = read_u16(data, local_offset + 28)? as usize;
        let data_start = local_offset + LOCAL_HEADER_LEN + local_name_len + local_extra_len;
        let compressed = slice(data, data_start, compressed_size)?;

        let content = match method {
            METHOD_STORED => compressed.to_vec(),
            METHOD_DEFLATE => inflate(&name, compressed, size)?,
            other => {
                return Err(CanonicalizationError::UnsupportedPart {
                    path: name,
                    reason: format!("compression method {other}"),
                });
            }
        };

        if content.len() != size {
            return Err(malformed(format!(
                "{name}: size mismatch (header {size}, actual {})",
                content.len()
            )));
        }
        if crc32fast::hash(&content) != crc {
            return Err(malformed(format!("{name}: CRC-32 mismatch")));
        }

        parts.insert(name, content)?;
    }

    Ok(parts)
}

fn too_large(path: &str, what: &str) -> CanonicalizationError {
    CanonicalizationError::UnsupportedPart {
        path: path.to_string(),
        reason: format!("{what} exceeds ZIP limits"),
    }
}

fn deflate(path: &str, data: &[u8], level: u32) -> Result<Vec<u8>, CanonicalizationError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CanonicalizationError::UnsupportedPart {
            path: path.to_string(),
            reason: format!("deflate failed: {e}"),
        })
}

/// Write parts into a ZIP archive with fixed per-entry metadata
pub fn write_archive(parts: &Parts, compression: EntryCompression) -> Result<Vec<u8>, CanonicalizationError> {
    if parts.len() >= u16::MAX as usize {
        return Err(malformed(format!("too many parts: {}", parts.len())));
    }

    let mut out = Vec::new();
    let mut central = Vec::new();

    for part in parts.iter() {
        let name = part.path.as_bytes();
        let name_len = u16::try_from(name.len()).map_err(|_| too_large(&part.path, "name"))?;
        let size = u32::try_from(part.data.len()).map_err(|_| too_large(&part.path, "size"))?;
        let crc = crc32fast::hash(&part.data);

        let (method, payload) = match compression {
            _ if part.path == MIMETYPE_PART => (METHOD_STORED, part.data.clone()),
            EntryCompression::Stored => (METHOD_STORED, part.data.clone()),
            EntryCompression::Deflate(level) => (METHOD_DEFLATE, deflate(&part.path, &part.data, level)?),
        };
        let compressed_size =
            u32::try_from(payload.len()).map_err(|_| too_large(&part.path, "compressed size"))?;
        let offset = u32::try_from(out.len()).map_err(|_| too_large(&part.path, "offset"))?;

        // Local file header
        out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&FLAG_UTF8.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        out.extend_from_slice(&DOS_TIME.to_le_bytes());
        out.extend_from_slice(&DOS_DATE.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);

        // Central directory entry
        central.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
        central.extend_from_slice(&VERSION.to_le_bytes()); // made by (MS-DOS, 2.0)
        central.extend_from_slice(&VERSION.to_le_bytes()); // needed to extract
        central.extend_from_slice(&FLAG_UTF8.to_le_bytes());
        central.extend_from_slice(&method.to_le_bytes());
        central.extend_from_slice(&DOS_TIME.to_le_bytes());
        central.extend_from_slice(&DOS_DATE.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&compressed_size.to_le_bytes());
        central.extend_from_slice(&size.to_le_bytes());
        central.extend_from_slice(&name_len.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra
        central.extend_from_slice(&0u16.to_le_bytes()); // comment
        central.extend_from_slice(&0u16.to_le_bytes()); // disk start
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        central.extend_from_slice(&0u32.to_le_bytes()); // external attributes
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name);
    }

    let cd_offset = u32::try_from(out.len()).map_err(|_| malformed("archive exceeds 4 GiB"))?;
    let cd_size = u32::try_from(central.len()).map_err(|_| malformed("central directory exceeds 4 GiB"))?;
    let count = parts.len() as u16;
    out.extend_from_slice(&central);

    out.extend_from_slice(&EOCD_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // this disk
    out.extend_from_slice(&0u16.to_le_bytes()); // disk with central directory
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment length

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parts() -> Parts {
        let mut parts = Parts::new();
        parts.insert("[Content_Types].xml", b"<Types/>".to_vec()).unwrap();
        parts
            .insert("word/document.xml", b"<w:document>hello hello hello</w:document>".to_vec())
            .unwrap();
        parts.insert("media/image1.png", vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3]).unwrap();
        parts
    }

    #[test]
    fn test_write_then_read_stored() {
        let parts = sample_parts();
        let archive = write_archive(&parts, EntryCompression::Stored).unwrap();
        assert!(archive.starts_with(b"PK\x03\x04"));
        assert_eq!(read_archive(&archive).unwrap(), parts);
    }

    #[test]
    fn test_write_then_read_deflate() {
        let parts = sample_parts();
        let archive = write_archive(&parts, EntryCompression::Deflate(9)).unwrap();
        assert_eq!(read_archive(&archive).unwrap(), parts);
    }

    #[test]
    fn test_write_is_deterministic() {
        let a = write_archive(&sample_parts(), EntryCompression::Deflate(6)).unwrap();
        let b = write_archive(&sample_parts(), EntryCompression::Deflate(6)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mimetype_always_stored() {
        let mut parts = Parts::new();
        parts.insert("mimetype", b"application/vnd.oasis.opendocument.text".to_vec()).unwrap();
        let archive = write_archive(&parts, EntryCompression::Deflate(9)).unwrap();

        // Method field of the first local header
        assert_eq!(read_u16(&archive, 8).unwrap(), METHOD_STORED);
        // Stored payload directly follows the 8-byte name
        assert_eq!(
            &archive[LOCAL_HEADER_LEN + 8..LOCAL_HEADER_LEN + 8 + 39],
            b"application/vnd.oasis.opendocument.text"
        );
    }

    #[test]
    fn test_empty_archive() {
        let archive = write_archive(&Parts::new(), EntryCompression::Stored).unwrap();
        assert_eq!(archive.len(), EOCD_LEN);
        assert!(read_archive(&archive).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_archive_is_malformed() {
        let archive = write_archive(&sample_parts(), EntryCompression::Stored).unwrap();
        let err = read_archive(&archive[..archive.len() / 2]).unwrap_err();
        assert!(matches!(err, CanonicalizationError::MalformedContainer(_)));

        let err = read_archive(b"not a zip at all, definitely not").unwrap_err();
        assert!(matches!(err, CanonicalizationError::MalformedContainer(_)));
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut parts = Parts::new();
        parts.insert("a.txt", b"abcdef".to_vec()).unwrap();
        let mut archive = write_archive(&parts, EntryCompression::Stored).unwrap();

        // Flip a payload byte (payload follows the 30-byte header and 5-byte name)
        archive[LOCAL_HEADER_LEN + 5] ^= 0xff;
        let err = read_archive(&archive).unwrap_err();
        assert!(matches!(err, CanonicalizationError::MalformedContainer(_)));
    }

    #[test]
    fn test_backslash_names_normalized() {
        assert_eq!(normalize_part_name(b"word\\document.xml").unwrap(), "word/document.xml");
        assert_eq!(normalize_part_name(b"/docProps/app.xml").unwrap(), "docProps/app.xml");
        assert!(normalize_part_name(b"/").is_err());
    }

    #[test]
    fn test_archive_comment_tolerated() {
        let mut archive = write_archive(&sample_parts(), EntryCompression::Stored).unwrap();
        // Patch the comment length and append a comment
        let len = archive.len();
        archive[len - 2..].copy_from_slice(&5u16.to_le_bytes());
        archive.extend_from_slice(b"hello");
        assert_eq!(read_archive(&archive).unwrap(), sample_parts());
    }
}
