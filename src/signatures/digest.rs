//! Document digest over the signed byte ranges.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

use super::byterange::ByteRangeCalculator;
use super::types::{DigestAlgorithm, PlaceholderReservation};

/// Computes digests over a sequence of byte slices.
pub trait DigestClient: Send + Sync {
    /// Hash the concatenation of `ranges`.
    fn digest(&self, algorithm: DigestAlgorithm, ranges: &[&[u8]]) -> Result<Vec<u8>>;
}

/// Local SHA-1/SHA-2 implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha2Digester;

impl DigestClient for Sha2Digester {
    fn digest(&self, algorithm: DigestAlgorithm, ranges: &[&[u8]]) -> Result<Vec<u8>> {
        Ok(match algorithm {
            DigestAlgorithm::Sha1 => digest_ranges::<Sha1>(ranges),
            DigestAlgorithm::Sha256 => digest_ranges::<Sha256>(ranges),
            DigestAlgorithm::Sha384 => digest_ranges::<Sha384>(ranges),
            DigestAlgorithm::Sha512 => digest_ranges::<Sha512>(ranges),
        })
    }
}

fn digest_ranges<D: Digest>(ranges: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for range in ranges {
        hasher.update(range);
    }
    hasher.finalize().to_vec()
}

/// Hash a single buffer.
pub fn hash(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        DigestAlgorithm::Sha1 => digest_ranges::<Sha1>(&[data]),
        DigestAlgorithm::Sha256 => digest_ranges::<Sha256>(&[data]),
        DigestAlgorithm::Sha384 => digest_ranges::<Sha384>(&[data]),
        DigestAlgorithm::Sha512 => digest_ranges::<Sha512>(&[data]),
    }
}

/// Digest the ranges a reservation covers in the intermediate document.
///
/// The ByteRange must cover the whole file minus exactly the reserved slot,
/// so placeholder bytes are never hashed.
pub fn digest_reservation(
    client: &dyn DigestClient,
    algorithm: DigestAlgorithm,
    intermediate: &[u8],
    reservation: &PlaceholderReservation,
) -> Result<Vec<u8>> {
    if intermediate.len() != reservation.file_len {
        return Err(Error::InvalidPdf(format!(
            "intermediate document is {} bytes, reservation expects {}",
            intermediate.len(),
            reservation.file_len
        )));
    }
    ByteRangeCalculator::validate_byte_range(&reservation.byte_range, intermediate.len())?;
    if reservation.byte_range[1] != reservation.contents_offset as i64
        || reservation.byte_range[2] != reservation.contents_end() as i64
    {
        return Err(Error::InvalidPdf(format!(
            "ByteRange {:?} does not exclude exactly the signature slot",
            reservation.byte_range
        )));
    }

    let ranges = ByteRangeCalculator::signed_ranges(intermediate, &reservation.byte_range)?;
    let digest = client.digest(algorithm, &ranges)?;
    if digest.len() != algorithm.output_len() {
        return Err(Error::UnsupportedAlgorithm(format!(
            "digest client returned {} bytes for {}",
            digest.len(),
            algorithm.name()
        )));
    }

    log::debug!(
        "{} over {} + {} bytes",
        algorithm.name(),
        ranges[0].len(),
        ranges[1].len()
    );
    Ok(digest)
}
