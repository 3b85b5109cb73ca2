//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) packs several objects into one
//! compressed stream. The decoded data starts with `/N` pairs of
//! `object-number offset`, followed at `/First` by the objects themselves.
//!
//! ```text
//! 10 0 11 15    % object 10 at offset 0, object 11 at offset 15
//! << ... >>     % object 10
//! [ ... ]       % object 11
//! ```

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::parse_object;

/// Parse an object stream and return its objects keyed by object number.
///
/// Objects that fail to parse are skipped with a warning.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        _ => return Err(Error::InvalidPdf("object stream is not a Stream object".to_string())),
    };

    if let Some(type_name) = dict.get("Type").and_then(|o| o.as_name()) {
        if type_name != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /Type /{}", type_name)));
        }
    }

    let n = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N entry".to_string()))?;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First entry".to_string()))?;

    if !(0..=1_000_000).contains(&n) {
        return Err(Error::InvalidPdf(format!("invalid object stream /N value: {}", n)));
    }
    if !(0..=10_000_000).contains(&first) {
        return Err(Error::InvalidPdf(format!("invalid object stream /First value: {}", first)));
    }
    let (n, first) = (n as usize, first as usize);

    let decoded = stream_obj.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::InvalidPdf(format!(
            "object stream data too short: {} bytes, expected at least {}",
            decoded.len(),
            first
        )));
    }

    let pairs = parse_object_number_pairs(&decoded[..first], n)?;
    let objects_data = &decoded[first..];
    let mut result = HashMap::with_capacity(pairs.len());

    for (obj_num, offset) in pairs {
        let Some(obj_data) = objects_data.get(offset..) else {
            log::warn!("Object {} offset {} is beyond object stream data", obj_num, offset);
            continue;
        };

        match parse_object(obj_data) {
            Ok((_, obj)) => {
                result.insert(obj_num, obj);
            },
            Err(e) => log::warn!("Failed to parse object {} from object stream: {:?}", obj_num, e),
        }
    }

    Ok(result)
}

/// Read `count` pairs of (object number, relative offset).
fn parse_object_number_pairs(data: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let text = String::from_utf8_lossy(data);
    let numbers: Vec<u64> = text
        .split_whitespace()
        .map(|n| {
            n.parse::<u64>()
                .map_err(|_| Error::InvalidPdf(format!("invalid number in object stream header: {:?}", n)))
        })
        .collect::<Result<_>>()?;

    if numbers.len() < count * 2 {
        return Err(Error::InvalidPdf(format!(
            "object stream header has {} numbers, expected {}",
            numbers.len(),
            count * 2
        )));
    }

    Ok(numbers
        .chunks_exact(2)
        .take(count)
        .map(|pair| (pair[0] as u32, pair[1] as usize))
        .collect())
}
