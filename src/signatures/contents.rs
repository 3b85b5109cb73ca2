//! The `/Contents` value of a signature dictionary.
//!
//! A single strategy type covers both phases: [`SignatureContents::Reserve`]
//! renders the zero-filled placeholder written during reservation, and
//! [`SignatureContents::Assemble`] renders the assembled structure padded to
//! the same width. Both render to exactly `capacity * 2 + 2` bytes.

use crate::config::CapacityConfig;
use crate::error::{Error, Result};
use crate::writer::hex_upper;

use super::types::RevocationStore;

/// How the `/Contents` slot is filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureContents {
    /// Placeholder of `capacity` zero bytes
    Reserve {
        /// Reserved DER length
        capacity: usize,
    },
    /// Assembled structure, zero-padded to `capacity`
    Assemble {
        /// DER-encoded signature structure
        structure: Vec<u8>,
        /// Reserved DER length
        capacity: usize,
    },
}

impl SignatureContents {
    /// Reserved DER length.
    pub fn capacity(&self) -> usize {
        match self {
            SignatureContents::Reserve { capacity } | SignatureContents::Assemble { capacity, .. } => *capacity,
        }
    }

    /// Rendered width in bytes, brackets included.
    pub fn rendered_len(&self) -> usize {
        self.capacity() * 2 + 2
    }

    /// Render the hex string value.
    ///
    /// Fails with [`Error::ReservationSize`] when an assembled structure is
    /// longer than the capacity.
    pub fn render(&self) -> Result<String> {
        let (hex, capacity) = match self {
            SignatureContents::Reserve { capacity } => (String::new(), *capacity),
            SignatureContents::Assemble { structure, capacity } => {
                if structure.len() > *capacity {
                    return Err(Error::ReservationSize {
                        required: structure.len(),
                        capacity: *capacity,
                    });
                }
                (hex_upper(structure), *capacity)
            },
        };

        let mut out = String::with_capacity(capacity * 2 + 2);
        out.push('<');
        out.push_str(&hex);
        out.extend(std::iter::repeat('0').take(capacity * 2 - hex.len()));
        out.push('>');
        Ok(out)
    }
}

/// Estimate the DER length of the final signature structure.
///
/// The estimate is fixed before the structure exists: it counts the
/// envelope allowance, every certificate of the chain, every revocation
/// entry with its encoding overhead and the timestamp allowance.
pub fn estimate_capacity(config: &CapacityConfig, chain: &[Vec<u8>], revocation: &RevocationStore) -> usize {
    let certificates: usize = chain.iter().map(Vec::len).sum();
    let entries: usize = revocation
        .iter()
        .map(|(_, entry)| entry.len() + config.per_entry_overhead)
        .sum();

    config.base_overhead + certificates + entries + config.timestamp_margin
}
