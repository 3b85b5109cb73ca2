//! Placeholder reservation.
//!
//! Appends one incremental update to the source document holding an empty
//! signature slot:
//!
//! - the signature dictionary, with a zero-filled `/Contents` of the
//!   estimated capacity and a fixed-width `/ByteRange` patched in place
//! - an invisible signature widget on the first page
//! - the AcroForm with the new field and `/SigFlags 3`
//! - the DSS with one stream per CRL, only when evidence was collected
//! - the catalog, with the ADBE extension marker for pre-2.0 documents
//!
//! Nothing before the update is modified, and nothing after reservation
//! moves: the insertion phase only overwrites the `/Contents` hex digits.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::{IncrementalUpdate, ObjectSerializer};

use super::byterange::ByteRangeCalculator;
use super::contents::SignatureContents;
use super::types::{PlaceholderReservation, RevocationStore, SignatureMetadata, SignatureSubFilter};

/// `/F` for the widget: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Extension level that declares PAdES DSS support.
const ADBE_EXTENSION_LEVEL: i64 = 5;

/// What goes into the reserved slot.
#[derive(Debug, Clone, Copy)]
pub struct ReservationParams<'a> {
    /// Field name (`/T`) of the new signature field
    pub slot_name: &'a str,
    /// Descriptive entries of the signature dictionary
    pub metadata: &'a SignatureMetadata,
    /// Evidence written to the DSS
    pub revocation: &'a RevocationStore,
    /// Reserved DER length of the signature structure
    pub capacity: usize,
    /// `/SubFilter` value
    pub sub_filter: SignatureSubFilter,
}

/// Write the intermediate document.
///
/// Returns the intermediate bytes and the record of the reserved slot.
pub fn reserve(source: &[u8], params: &ReservationParams<'_>) -> Result<(Vec<u8>, PlaceholderReservation)> {
    if params.capacity == 0 {
        return Err(Error::InvalidRequest("signature capacity must be positive".to_string()));
    }

    let mut doc = PdfDocument::from_bytes(source.to_vec())?;
    if doc.is_encrypted() {
        return Err(Error::Unsupported("signing encrypted documents".to_string()));
    }

    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;
    let version = doc.effective_version()?;
    let page_ref = doc.first_page_ref()?;

    let mut update = IncrementalUpdate::new(doc.startxref(), doc.next_object_number(), doc.trailer());
    let sig_ref = update.allocate();
    let field_ref = update.allocate();

    update.put_raw(sig_ref, signature_dictionary(params)?);
    update.put(field_ref, &signature_widget(params.slot_name, sig_ref, page_ref));

    add_annotation(&mut doc, &mut update, page_ref, field_ref)?;
    add_form_field(&mut doc, &mut update, &mut catalog, field_ref)?;

    if params.revocation.is_empty() {
        log::debug!("No revocation evidence; DSS left untouched");
    } else {
        write_dss(&mut doc, &mut update, &mut catalog, params.revocation)?;
    }

    if version < (2, 0) {
        mark_extensions(&mut doc, &mut catalog)?;
    }
    update.put(catalog_ref, &Object::Dictionary(catalog));

    let written = update.write(doc.bytes())?;
    let mut bytes = written.bytes;

    let sig_offset = *written
        .offsets
        .get(&sig_ref.id)
        .ok_or_else(|| Error::InvalidPdf("signature dictionary was not written".to_string()))?;
    let contents_offset = ByteRangeCalculator::find_contents_offset(&bytes, sig_offset)
        .ok_or_else(|| Error::InvalidPdf("/Contents placeholder not found".to_string()))?;
    let byte_range_offset = ByteRangeCalculator::find_byte_range_offset(&bytes, sig_offset)
        .ok_or_else(|| Error::InvalidPdf("/ByteRange placeholder not found".to_string()))?;

    let calculator = ByteRangeCalculator::new(params.capacity);
    let byte_range = calculator.calculate_byte_range(bytes.len(), contents_offset);
    ByteRangeCalculator::patch_byte_range(&mut bytes, byte_range_offset, &byte_range)?;

    log::debug!(
        "Reserved slot {} at {} ({} bytes), ByteRange {}",
        params.slot_name,
        contents_offset,
        calculator.placeholder_size(),
        ByteRangeCalculator::format_byte_range(&byte_range)
    );

    let reservation = PlaceholderReservation {
        slot_name: params.slot_name.to_string(),
        byte_range,
        contents_offset,
        capacity: params.capacity,
        file_len: bytes.len(),
    };
    Ok((bytes, reservation))
}

/// Serialize the signature dictionary by hand so `/ByteRange` and
/// `/Contents` come first, at predictable widths.
fn signature_dictionary(params: &ReservationParams<'_>) -> Result<Vec<u8>> {
    let serializer = ObjectSerializer::compact();
    let text = |s: &str| serializer.serialize_to_string(&ObjectSerializer::string(s));
    let contents = SignatureContents::Reserve {
        capacity: params.capacity,
    }
    .render()?;

    let mut dict = String::with_capacity(contents.len() + 512);
    dict.push_str("<< /Type /Sig /Filter /Adobe.PPKLite");
    dict.push_str(&format!(" /SubFilter /{}", params.sub_filter.as_pdf_name()));
    dict.push_str(&format!(" /ByteRange {}", ByteRangeCalculator::placeholder_byte_range()));
    dict.push_str(&format!(" /Contents {}", contents));
    dict.push_str(&format!(" /M {}", text(&pdf_date(params.metadata))));

    let metadata = params.metadata;
    for (key, value) in [
        ("Name", &metadata.name),
        ("Reason", &metadata.reason),
        ("Location", &metadata.location),
        ("ContactInfo", &metadata.contact_info),
    ] {
        if let Some(value) = value {
            dict.push_str(&format!(" /{} {}", key, text(value)));
        }
    }
    dict.push_str(" >>");
    Ok(dict.into_bytes())
}

fn pdf_date(metadata: &SignatureMetadata) -> String {
    metadata.signing_time.format("D:%Y%m%d%H%M%SZ").to_string()
}

fn signature_widget(slot_name: &str, sig_ref: ObjectRef, page_ref: ObjectRef) -> Object {
    ObjectSerializer::dict(vec![
        ("Type", ObjectSerializer::name("Annot")),
        ("Subtype", ObjectSerializer::name("Widget")),
        ("FT", ObjectSerializer::name("Sig")),
        ("T", ObjectSerializer::string(slot_name)),
        ("V", Object::Reference(sig_ref)),
        ("F", ObjectSerializer::integer(WIDGET_FLAGS)),
        ("Rect", ObjectSerializer::array(vec![Object::Integer(0); 4])),
        ("P", Object::Reference(page_ref)),
    ])
}

/// Re-emit the page with the widget appended to `/Annots`.
fn add_annotation(
    doc: &mut PdfDocument,
    update: &mut IncrementalUpdate,
    page_ref: ObjectRef,
    field_ref: ObjectRef,
) -> Result<()> {
    let mut page = doc.load_object(page_ref)?.into_dict()?;
    match page.get("Annots").cloned() {
        // A shared annotation array is updated where it lives
        Some(Object::Reference(annots_ref)) => {
            let mut annots = array_or_empty(doc.load_object(annots_ref)?);
            annots.push(Object::Reference(field_ref));
            update.put(annots_ref, &Object::Array(annots));
        },
        existing => {
            let mut annots = existing.map(array_or_empty).unwrap_or_default();
            annots.push(Object::Reference(field_ref));
            page.insert("Annots".to_string(), Object::Array(annots));
            update.put(page_ref, &Object::Dictionary(page));
        },
    }
    Ok(())
}

/// Append the field to the AcroForm, creating it when absent.
fn add_form_field(
    doc: &mut PdfDocument,
    update: &mut IncrementalUpdate,
    catalog: &mut Dictionary,
    field_ref: ObjectRef,
) -> Result<()> {
    let acroform_ref = catalog.get("AcroForm").and_then(Object::as_reference);
    let mut acroform = doc.resolve_dict(catalog.get("AcroForm"))?.unwrap_or_default();

    let mut fields = match acroform.get("Fields") {
        Some(fields) => array_or_empty(doc.resolve(fields)?),
        None => Vec::new(),
    };
    fields.push(Object::Reference(field_ref));
    acroform.insert("Fields".to_string(), Object::Array(fields));

    let flags = acroform.get("SigFlags").and_then(Object::as_integer).unwrap_or(0);
    acroform.insert("SigFlags".to_string(), Object::Integer(flags | SIG_FLAGS));

    match acroform_ref {
        Some(r) => update.put(r, &Object::Dictionary(acroform)),
        None => {
            catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
        },
    }
    Ok(())
}

/// Write one stream per CRL and a DSS listing them after any existing CRLs.
fn write_dss(
    doc: &mut PdfDocument,
    update: &mut IncrementalUpdate,
    catalog: &mut Dictionary,
    revocation: &RevocationStore,
) -> Result<()> {
    let existing_ref = catalog.get("DSS").and_then(Object::as_reference);
    let mut dss = doc.resolve_dict(catalog.get("DSS"))?.unwrap_or_default();
    dss.insert("Type".to_string(), ObjectSerializer::name("DSS"));

    let mut crls = match dss.get("CRLs") {
        Some(crls) => array_or_empty(doc.resolve(crls)?),
        None => Vec::new(),
    };
    for entry in revocation.crls() {
        let crl_ref = update.allocate();
        update.put(
            crl_ref,
            &Object::Stream {
                dict: Dictionary::new(),
                data: bytes::Bytes::copy_from_slice(entry.as_bytes()),
            },
        );
        crls.push(Object::Reference(crl_ref));
    }
    dss.insert("CRLs".to_string(), Object::Array(crls));

    let dss_ref = existing_ref.unwrap_or_else(|| update.allocate());
    update.put(dss_ref, &Object::Dictionary(dss));
    catalog.insert("DSS".to_string(), Object::Reference(dss_ref));

    log::debug!("DSS {} with {} new CRL streams", dss_ref, revocation.crls().len());
    Ok(())
}

/// Declare ADBE extension level 5, keeping other developer extensions.
fn mark_extensions(doc: &mut PdfDocument, catalog: &mut Dictionary) -> Result<()> {
    let mut extensions = doc.resolve_dict(catalog.get("Extensions"))?.unwrap_or_default();
    let current = match extensions.get("ADBE") {
        Some(adbe) => doc
            .resolve_dict(Some(adbe))?
            .and_then(|d| d.get("ExtensionLevel").and_then(Object::as_integer)),
        None => None,
    };

    if current.map_or(true, |level| level < ADBE_EXTENSION_LEVEL) {
        extensions.insert(
            "ADBE".to_string(),
            ObjectSerializer::dict(vec![
                ("BaseVersion", ObjectSerializer::name("1.7")),
                ("ExtensionLevel", ObjectSerializer::integer(ADBE_EXTENSION_LEVEL)),
            ]),
        );
    }
    catalog.insert("Extensions".to_string(), Object::Dictionary(extensions));
    Ok(())
}

fn array_or_empty(obj: Object) -> Vec<Object> {
    match obj {
        Object::Array(items) => items,
        _ => Vec::new(),
    }
}
