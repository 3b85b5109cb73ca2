//! Stream decoders for the filters used by document structure.
//!
//! Cross-reference streams and object streams are almost always
//! FlateDecode-compressed, usually with a PNG "Up" predictor. Content
//! filters (images, fonts) are never decoded by this crate.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound on a decoded structural stream.
const MAX_DECODED_SIZE: usize = 256 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// Decode stream data through a filter pipeline, then undo any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            _ => return Err(Error::UnsupportedFilter(filter_name.clone())),
        };

        current = decoder.decode(&current)?;
        log::debug!("{} produced {} bytes", decoder.name(), current.len());

        if current.len() > MAX_DECODED_SIZE {
            return Err(Error::Decode(format!(
                "decoded stream of {} bytes exceeds limit of {} bytes",
                current.len(),
                MAX_DECODED_SIZE
            )));
        }
    }

    if let Some(params) = params {
        if params.predictor != 1 {
            current = decode_predictor(&current, params)?;
        }
    }

    Ok(current)
}
