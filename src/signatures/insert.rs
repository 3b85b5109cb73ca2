//! Deferred insertion of the signature structure.

use std::io::Write;
use std::path::Path;

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

use super::byterange::ByteRangeCalculator;
use super::types::{PlaceholderReservation, SignatureStructure};

/// Find the `/Contents` offset of the signature field named `slot_name`.
///
/// Follows `/AcroForm /Fields` to the field whose `/T` matches, then its
/// `/V` signature dictionary.
pub fn locate_slot(intermediate: &[u8], slot_name: &str) -> Result<usize> {
    let mut doc = PdfDocument::from_bytes(intermediate.to_vec())?;
    let catalog = doc.catalog()?;
    let acroform = doc
        .resolve_dict(catalog.get("AcroForm"))?
        .ok_or_else(|| Error::InvalidPdf("document has no AcroForm".to_string()))?;
    let fields = match acroform.get("Fields") {
        Some(fields) => doc.resolve(fields)?,
        None => Object::Null,
    };

    for field in fields.as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(field) = doc.resolve_dict(Some(field))? else {
            continue;
        };
        if field_name(&field) != Some(slot_name.as_bytes()) {
            continue;
        }

        let sig_ref = field
            .get("V")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf(format!("field {} has no signature reference", slot_name)))?;
        let sig_offset = doc
            .object_offset(sig_ref)
            .ok_or_else(|| Error::InvalidPdf(format!("signature dictionary {} is not addressable", sig_ref)))?;
        return ByteRangeCalculator::find_contents_offset(intermediate, sig_offset)
            .ok_or_else(|| Error::InvalidPdf(format!("signature {} has no /Contents", sig_ref)));
    }

    Err(Error::InvalidPdf(format!("signature field {} not found", slot_name)))
}

fn field_name(field: &Dictionary) -> Option<&[u8]> {
    field.get("T").and_then(Object::as_string)
}

/// Write `structure` into the reserved slot.
///
/// The slot is located by name and must agree with the reservation. Every
/// byte outside the slot is left as it was in `intermediate`.
pub fn finalize(
    intermediate: &[u8],
    reservation: &PlaceholderReservation,
    structure: &SignatureStructure,
) -> Result<Vec<u8>> {
    if intermediate.len() != reservation.file_len {
        return Err(Error::InvalidPdf(format!(
            "intermediate document changed size: {} bytes, expected {}",
            intermediate.len(),
            reservation.file_len
        )));
    }
    if structure.len() > reservation.capacity {
        return Err(Error::ReservationSize {
            required: structure.len(),
            capacity: reservation.capacity,
        });
    }

    let located = locate_slot(intermediate, &reservation.slot_name)?;
    if located != reservation.contents_offset {
        return Err(Error::InvalidPdf(format!(
            "slot {} found at {}, reserved at {}",
            reservation.slot_name, located, reservation.contents_offset
        )));
    }

    let mut output = intermediate.to_vec();
    ByteRangeCalculator::new(reservation.capacity).insert_signature(
        &mut output,
        reservation.contents_offset,
        &structure.der,
    )?;

    let (start, end) = (reservation.contents_offset, reservation.contents_end());
    if output[..start] != intermediate[..start] || output[end..] != intermediate[end..] {
        return Err(Error::InvalidPdf("bytes outside the signature slot changed".to_string()));
    }

    log::debug!(
        "Inserted {} byte structure into slot {} ({} reserved)",
        structure.len(),
        reservation.slot_name,
        reservation.capacity
    );
    Ok(output)
}

/// Write `bytes` to `destination` through a temporary file in the same
/// directory, so the destination never holds a partial document.
pub fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::reserve::{reserve, ReservationParams};
    use crate::signatures::types::{RevocationStore, SignatureMetadata, SignatureSubFilter};
    use crate::testing::{build_pdf, SamplePdf};

    fn intermediate(capacity: usize) -> (Vec<u8>, PlaceholderReservation) {
        let meta = SignatureMetadata::default();
        let store = RevocationStore::new();
        reserve(
            &build_pdf(&SamplePdf::default()),
            &ReservationParams {
                slot_name: "Signature-1",
                metadata: &meta,
                revocation: &store,
                capacity,
                sub_filter: SignatureSubFilter::Pkcs7Detached,
            },
        )
        .unwrap()
    }

    fn structure(len: usize) -> SignatureStructure {
        SignatureStructure {
            der: vec![0xC3; len],
            timestamp_embedded: false,
            revocation_entries: 0,
        }
    }

    #[test]
    fn test_locate_slot() {
        let (bytes, reservation) = intermediate(32);
        assert_eq!(locate_slot(&bytes, "Signature-1").unwrap(), reservation.contents_offset);
        assert!(locate_slot(&bytes, "Signature-2").is_err());
    }

    #[test]
    fn test_finalize_changes_only_the_slot() {
        let (bytes, reservation) = intermediate(32);
        let signed = finalize(&bytes, &reservation, &structure(10)).unwrap();

        assert_eq!(signed.len(), bytes.len());
        let (start, end) = (reservation.contents_offset, reservation.contents_end());
        assert_eq!(&signed[..start], &bytes[..start]);
        assert_eq!(&signed[end..], &bytes[end..]);
        assert!(signed[start..end].starts_with(b"<C3C3"));
        assert!(signed[start..end].ends_with(b"00>"));
    }

    #[test]
    fn test_finalize_capacity_boundary() {
        let (bytes, reservation) = intermediate(32);
        assert!(finalize(&bytes, &reservation, &structure(32)).is_ok());
        assert!(matches!(
            finalize(&bytes, &reservation, &structure(33)),
            Err(Error::ReservationSize {
                required: 33,
                capacity: 32
            })
        ));
    }

    #[test]
    fn test_finalize_rejects_foreign_reservation() {
        let (bytes, mut reservation) = intermediate(32);
        reservation.contents_offset -= 1;
        assert!(finalize(&bytes, &reservation, &structure(4)).is_err());
    }

    #[test]
    fn test_write_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.pdf");
        write_atomically(&dest, b"%PDF-1.7\n").unwrap();
        write_atomically(&dest, b"%PDF-2.0\n").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-2.0\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
