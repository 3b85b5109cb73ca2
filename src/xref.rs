//! Cross-reference table parsing.
//!
//! Reads the chain of cross-reference sections that starts at the last
//! `startxref`: classic `xref` tables, cross-reference streams (PDF 1.5)
//! and hybrid files whose trailer carries `/XRefStm`. Newer sections
//! shadow older ones, following `/Prev`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::lexer::skip_ws;
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_at, parse_object};

/// Maximum number of sections followed through `/Prev`.
const MAX_XREF_CHAIN: u32 = 100;

/// Kind of a cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Free entry (object deleted or never used)
    Free,
    /// Object stored at a byte offset
    Uncompressed,
    /// Object stored inside an object stream
    Compressed,
}

/// A single cross-reference entry.
///
/// For compressed entries `offset` holds the object stream number and
/// `generation` the index inside that stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefEntry {
    /// Entry kind
    pub entry_type: XRefEntryType,
    /// Byte offset, or object stream number for compressed entries
    pub offset: u64,
    /// Generation number, or index for compressed entries
    pub generation: u16,
}

impl XRefEntry {
    /// An object stored at a byte offset.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// An object stored inside an object stream.
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// A free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Merged view of a document's cross-reference chain.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dictionary,
    /// Whether any section of the chain is a cross-reference stream
    pub has_xref_stream: bool,
}

impl CrossRefTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trailer of the newest section.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Add an entry, replacing any previous one.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Look up an entry.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Highest object number mentioned by any section.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add the entries of an older section that this table does not shadow.
    fn merge_older(&mut self, older: CrossRefTable) {
        for (obj_num, entry) in older.entries {
            self.entries.entry(obj_num).or_insert(entry);
        }
        self.has_xref_stream |= older.has_xref_stream;
        if self.trailer.is_empty() {
            self.trailer = older.trailer;
        }
    }
}

/// Locate the offset stored after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    let digits: String = String::from_utf8_lossy(skip_ws(&tail[pos + keyword.len()..]))
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    digits.parse::<u64>().map_err(|_| Error::InvalidXref)
}

/// Parse the whole cross-reference chain starting at `offset`.
pub fn parse_xref_chain(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    parse_section(data, offset, 0)
}

fn parse_section(data: &[u8], offset: u64, depth: u32) -> Result<CrossRefTable> {
    if depth > MAX_XREF_CHAIN {
        return Err(Error::RecursionLimitExceeded(MAX_XREF_CHAIN));
    }

    let start = usize::try_from(offset).map_err(|_| Error::InvalidXref)?;
    let section = data.get(start..).ok_or(Error::InvalidXref)?;
    let body = skip_ws(section);

    log::debug!("Parsing xref section at offset {}", offset);

    let mut xref = if body.starts_with(b"xref") {
        let mut table = parse_classic_section(data, start + (section.len() - body.len()))?;
        if let Some(stm) = table.trailer.get("XRefStm").and_then(|o| o.as_integer()) {
            log::debug!("Hybrid file: merging /XRefStm at {}", stm);
            let stream_table = parse_stream_section(data, stm as usize)?;
            table.merge_older(stream_table);
        }
        table
    } else if body.first().is_some_and(|c| c.is_ascii_digit()) {
        parse_stream_section(data, start)?
    } else {
        return Err(Error::InvalidXref);
    };

    if let Some(prev) = xref.trailer.get("Prev").and_then(|o| o.as_integer()) {
        if prev < 0 || prev as u64 == offset {
            return Err(Error::InvalidPdf(format!("invalid /Prev offset {}", prev)));
        }
        let older = parse_section(data, prev as u64, depth + 1)?;
        xref.merge_older(older);
    }

    Ok(xref)
}

/// Parse `xref` subsections followed by `trailer << ... >>`.
fn parse_classic_section(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let mut xref = CrossRefTable::new();
    let mut rest = &data[start + b"xref".len()..];

    loop {
        rest = skip_ws(rest);
        if let Some(after) = rest.strip_prefix(b"trailer") {
            let (_, trailer) = parse_object(after).map_err(|_| Error::InvalidXref)?;
            xref.trailer = trailer.into_dict()?;
            return Ok(xref);
        }

        let (first, count, after_header) = read_subsection_header(rest)?;
        rest = after_header;

        for i in 0..count {
            rest = skip_ws(rest);
            // Entries are "nnnnnnnnnn ggggg n" with a two-byte end of line
            let line_end = rest.iter().position(|&c| c == b'\n' || c == b'\r').unwrap_or(rest.len());
            let line = String::from_utf8_lossy(&rest[..line_end]);
            let parts: Vec<&str> = line.split_whitespace().collect();

            let entry = match parts.as_slice() {
                [offset, gen, kind] => {
                    let offset: u64 = offset.parse().map_err(|_| Error::InvalidXref)?;
                    let gen: u16 = gen.parse().map_err(|_| Error::InvalidXref)?;
                    match *kind {
                        "n" => XRefEntry::uncompressed(offset, gen),
                        "f" => XRefEntry::free(offset, gen),
                        other => {
                            log::warn!("Invalid xref type flag {:?}, treating as free", other);
                            XRefEntry::free(0, 65535)
                        },
                    }
                },
                _ => return Err(Error::InvalidXref),
            };

            xref.add_entry(first + i, entry);
            rest = &rest[line_end..];
        }
    }
}

fn read_subsection_header(input: &[u8]) -> Result<(u32, u32, &[u8])> {
    let line_end = input.iter().position(|&c| c == b'\n' || c == b'\r').unwrap_or(input.len());
    let line = String::from_utf8_lossy(&input[..line_end]);
    let mut parts = line.split_whitespace();

    let first = parts.next().and_then(|p| p.parse::<u32>().ok());
    let count = parts.next().and_then(|p| p.parse::<u32>().ok());
    match (first, count) {
        (Some(first), Some(count)) if count <= 1_000_000 => Ok((first, count, &input[line_end..])),
        _ => Err(Error::InvalidXref),
    }
}

/// Parse a cross-reference stream object (`/Type /XRef`).
fn parse_stream_section(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let (_, object) = parse_indirect_at(data, start)?;

    if !matches!(object, Object::Stream { .. }) {
        return Err(Error::InvalidPdf("xref stream is not a stream object".to_string()));
    }
    let dict = object.as_dict().cloned().unwrap_or_default();

    if let Some(type_name) = dict.get("Type").and_then(|o| o.as_name()) {
        if type_name != "XRef" {
            return Err(Error::InvalidPdf(format!("expected /Type /XRef, got /Type /{}", type_name)));
        }
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .ok_or_else(|| Error::InvalidPdf("missing /W array in xref stream".to_string()))?
        .iter()
        .map(|o| o.as_integer().map(|w| w as usize))
        .collect::<Option<Vec<_>>>()
        .filter(|w| w.len() == 3)
        .ok_or_else(|| Error::InvalidPdf("invalid /W array".to_string()))?;
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let entry_size = w1 + w2 + w3;
    if entry_size == 0 {
        return Err(Error::InvalidPdf("zero-width xref stream entries".to_string()));
    }

    let size = dict
        .get("Size")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::InvalidPdf("missing /Size in xref stream".to_string()))? as u32;

    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [start, count] => Some((start.as_integer()? as u32, count.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = object.decode_stream_data()?;
    let mut xref = CrossRefTable::new();
    xref.has_xref_stream = true;
    let mut rows = decoded.chunks_exact(entry_size);

    for (first, count) in ranges {
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::InvalidPdf("truncated xref stream data".to_string()))?;

            // A zero-width type field defaults to type 1
            let kind = if w1 > 0 { read_int(&row[..w1]) } else { 1 };
            let field2 = read_int(&row[w1..w1 + w2]);
            let field3 = read_int(&row[w1 + w2..]);

            let entry = match kind {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                other => {
                    log::warn!("Ignoring xref stream entry of unknown type {}", other);
                    continue;
                },
            };
            xref.add_entry(first + i, entry);
        }
    }

    xref.trailer = dict;
    Ok(xref)
}

/// Read a big-endian unsigned integer of any width up to 8 bytes.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
