//! XAR archive extraction
//!
//! `InstallAssistant.pkg` is a XAR archive whose table of contents is
//! zlib-compressed XML. This reads just enough of the format to pull one
//! named file (SharedSupport.dmg) straight out of the heap without
//! unpacking anything else.

use flate2::read::ZlibDecoder;
use once_cell::sync::Lazy;
use osxpve_common::{Error, Result};
use regex::Regex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Fixed 28-byte header at the front of every XAR archive.
pub const XAR_HEADER_SIZE: usize = 28;

const XAR_MAGIC: &[u8; 4] = b"xar!";

/// Parsed XAR header fields (all big-endian on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XarHeader {
    pub header_size: u16,
    pub version: u16,
    pub toc_compressed: u64,
    pub toc_uncompressed: u64,
    pub checksum_algo: u32,
}

/// A file entry's location within the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub offset: u64,
    pub length: u64,
}

/// Parse the 28-byte XAR header.
pub fn parse_header(bytes: &[u8]) -> Result<XarHeader> {
    if bytes.len() < XAR_HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "XAR header truncated: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != XAR_MAGIC {
        return Err(Error::Protocol("not a XAR archive (bad magic)".into()));
    }
    Ok(XarHeader {
        header_size: u16::from_be_bytes([bytes[4], bytes[5]]),
        version: u16::from_be_bytes([bytes[6], bytes[7]]),
        toc_compressed: u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
        toc_uncompressed: u64::from_be_bytes(bytes[16..24].try_into().unwrap()),
        checksum_algo: u32::from_be_bytes(bytes[24..28].try_into().unwrap()),
    })
}

static OFFSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<offset>(\d+)</offset>").unwrap());
static LENGTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<length>(\d+)</length>").unwrap());

/// Find a file entry by name in the decompressed TOC XML.
///
/// The data offset/length are read from the `<file>` element enclosing
/// the matching `<name>`.
pub fn find_toc_entry(toc_xml: &str, name: &str) -> Result<TocEntry> {
    let needle = format!("<name>{name}</name>");
    let start = toc_xml
        .find(&needle)
        .ok_or_else(|| Error::Protocol(format!("'{name}' not found in XAR table of contents")))?;
    let rest = &toc_xml[start..];
    let end = rest.find("</file>").unwrap_or(rest.len());
    let scope = &rest[..end];

    let offset = OFFSET_RE
        .captures(scope)
        .and_then(|c| c[1].parse::<u64>().ok())
        .ok_or_else(|| Error::Protocol(format!("no data offset for '{name}' in XAR TOC")))?;
    let length = LENGTH_RE
        .captures(scope)
        .and_then(|c| c[1].parse::<u64>().ok())
        .ok_or_else(|| Error::Protocol(format!("no data length for '{name}' in XAR TOC")))?;

    Ok(TocEntry { offset, length })
}

/// Stream one named file out of a XAR archive into `dest`.
pub fn extract_file(archive: &Path, name: &str, dest: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(archive)?);

    let mut header_bytes = [0u8; XAR_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = parse_header(&header_bytes)?;

    let mut compressed = vec![0u8; header.toc_compressed as usize];
    reader.seek(SeekFrom::Start(header.header_size as u64))?;
    reader.read_exact(&mut compressed)?;

    let mut toc_xml = String::with_capacity(header.toc_uncompressed as usize);
    ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut toc_xml)
        .map_err(|e| Error::Protocol(format!("XAR TOC inflate failed: {e}")))?;

    let entry = find_toc_entry(&toc_xml, name)?;
    let heap_offset = header.header_size as u64 + header.toc_compressed + entry.offset;
    debug!(
        "extracting {} from {}: heap offset {}, {} bytes",
        name,
        archive.display(),
        heap_offset,
        entry.length
    );

    reader.seek(SeekFrom::Start(heap_offset))?;
    let mut out = File::create(dest)?;
    let copied = std::io::copy(&mut reader.by_ref().take(entry.length), &mut out)?;
    if copied != entry.length {
        let _ = std::fs::remove_file(dest);
        return Err(Error::Protocol(format!(
            "XAR heap truncated: wanted {} bytes of '{name}', got {copied}",
            entry.length
        )));
    }
    Ok(())
}
