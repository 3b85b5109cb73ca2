//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//! The array itself is written as a fixed-width placeholder and patched in
//! place once the final file length is known, so patching never moves bytes.

use crate::error::{Error, Result};

use super::contents::SignatureContents;

/// Width reserved for the `/ByteRange` array, brackets included.
///
/// Fits four ten-digit integers with separators.
pub const BYTE_RANGE_WIDTH: usize = 48;

/// Calculator for PDF signature byte ranges.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator for a signature of at most `capacity` bytes.
    ///
    /// The placeholder size is `capacity * 2 + 2`: each byte becomes two hex
    /// digits, plus the angle brackets.
    pub fn new(capacity: usize) -> Self {
        Self {
            placeholder_size: capacity * 2 + 2,
        }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Calculate the ByteRange array given the position of the /Contents value.
    ///
    /// `contents_offset` is the offset of the opening `<`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// Format a ByteRange array padded with spaces to exactly `width` bytes.
    pub fn format_padded(byte_range: &[i64; 4], width: usize) -> Result<String> {
        let formatted = Self::format_byte_range(byte_range);
        if formatted.len() > width {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {} does not fit in {} bytes",
                formatted, width
            )));
        }
        Ok(format!("{:<width$}", formatted, width = width))
    }

    /// The placeholder written before the file length is known.
    pub fn placeholder_byte_range() -> String {
        format!("{:<width$}", "[0 0 0 0]", width = BYTE_RANGE_WIDTH)
    }

    /// Borrow the two ranges covered by a ByteRange.
    pub fn signed_ranges<'a>(pdf_data: &'a [u8], byte_range: &[i64; 4]) -> Result<[&'a [u8]; 2]> {
        if byte_range.iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!("negative ByteRange value in {:?}", byte_range)));
        }
        let [offset1, length1, offset2, length2] = byte_range.map(|v| v as usize);

        let first = pdf_data.get(offset1..offset1 + length1).ok_or_else(|| {
            Error::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1,
                length1,
                pdf_data.len()
            ))
        })?;
        let second = pdf_data.get(offset2..offset2 + length2).ok_or_else(|| {
            Error::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2,
                length2,
                pdf_data.len()
            ))
        })?;

        Ok([first, second])
    }

    /// Extract the bytes to be signed (the concatenation of both ranges).
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        Ok(Self::signed_ranges(pdf_data, byte_range)?.concat())
    }

    /// Check that a ByteRange covers the entire document except the signature.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, length2] = *byte_range;

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let expected_end = file_size as i64;
        let actual_end = offset2 + length2;
        if actual_end != expected_end {
            return Err(Error::InvalidPdf(format!(
                "ByteRange must end at file size {}, got {}",
                expected_end, actual_end
            )));
        }

        if length1 > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Find the /Contents value position in a signature dictionary.
    ///
    /// Searches at most 4096 bytes from `sig_dict_offset` for `/Contents <`
    /// and returns the offset of the opening angle bracket.
    pub fn find_contents_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        find_value_after(pdf_data, sig_dict_offset, b"/Contents", b'<')
    }

    /// Find the `/ByteRange` array position in a signature dictionary.
    ///
    /// Returns the offset of the opening `[`.
    pub fn find_byte_range_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        find_value_after(pdf_data, sig_dict_offset, b"/ByteRange", b'[')
    }

    /// Overwrite the placeholder `/ByteRange` at `offset` with the real values.
    pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let padded = Self::format_padded(byte_range, BYTE_RANGE_WIDTH)?;
        let target = pdf_data
            .get_mut(offset..offset + BYTE_RANGE_WIDTH)
            .ok_or_else(|| Error::InvalidPdf("ByteRange placeholder exceeds file bounds".to_string()))?;
        if target[0] != b'[' {
            return Err(Error::InvalidPdf(format!("no ByteRange array at offset {}", offset)));
        }
        target.copy_from_slice(padded.as_bytes());
        Ok(())
    }

    /// Write hex-encoded `signature_der` over the placeholder at `contents_offset`.
    ///
    /// The value is padded with `0` digits to fill the whole placeholder.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature_der: &[u8],
    ) -> Result<()> {
        let value = SignatureContents::Assemble {
            structure: signature_der.to_vec(),
            capacity: (self.placeholder_size - 2) / 2,
        }
        .render()?;

        let target = pdf_data
            .get_mut(contents_offset..contents_offset + self.placeholder_size)
            .ok_or_else(|| Error::InvalidPdf("Signature insertion would exceed file bounds".to_string()))?;
        if target[0] != b'<' || target[self.placeholder_size - 1] != b'>' {
            return Err(Error::InvalidPdf(format!(
                "no signature placeholder at offset {}",
                contents_offset
            )));
        }

        target.copy_from_slice(value.as_bytes());
        Ok(())
    }
}

fn find_value_after(pdf_data: &[u8], start: usize, key: &[u8], opener: u8) -> Option<usize> {
    let search_end = (start + 4096).min(pdf_data.len());
    let window = pdf_data.get(start..search_end)?;

    let mut pos = 0;
    while pos + key.len() < window.len() {
        if window[pos..].starts_with(key) {
            for (i, &byte) in window.iter().enumerate().skip(pos + key.len()) {
                if byte == opener {
                    return Some(start + i);
                }
                if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                    break;
                }
            }
        }
        pos += 1;
    }

    None
}
