//! Inspection of signed documents.
//!
//! Reads every signature field back, checks ByteRange coverage and recomputes
//! the document digest for comparison with the CMS `messageDigest`
//! attribute. Certificate trust and revocation status are not evaluated.

use cms::cert::CertificateChoices;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use x509_cert::Certificate;

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

use super::byterange::ByteRangeCalculator;
use super::cms as sig_cms;
use super::digest::{DigestClient, Sha2Digester};
use super::types::{DigestAlgorithm, SignatureInfo, SignatureSubFilter};

/// Reader for signatures embedded in a document.
pub struct SignatureVerifier {
    doc: PdfDocument,
}

impl SignatureVerifier {
    /// Parse a document for inspection.
    pub fn new(pdf_data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            doc: PdfDocument::from_bytes(pdf_data)?,
        })
    }

    /// Signature dictionaries of all signed fields, with their field names.
    fn signature_dictionaries(&mut self) -> Result<Vec<(Option<String>, Dictionary)>> {
        let catalog = self.doc.catalog()?;
        let Some(acroform) = self.doc.resolve_dict(catalog.get("AcroForm"))? else {
            return Ok(Vec::new());
        };
        let fields = match acroform.get("Fields") {
            Some(fields) => self.doc.resolve(fields)?,
            None => Object::Null,
        };

        let mut found = Vec::new();
        for field in fields.as_array().map(Vec::as_slice).unwrap_or_default() {
            let Some(field) = self.doc.resolve_dict(Some(field))? else {
                continue;
            };
            if field.get("FT").and_then(Object::as_name) != Some("Sig") {
                continue;
            }
            if let Some(sig) = self.doc.resolve_dict(field.get("V"))? {
                let name = field
                    .get("T")
                    .and_then(Object::as_string)
                    .map(|t| String::from_utf8_lossy(t).into_owned());
                found.push((name, sig));
            }
        }
        Ok(found)
    }

    /// Inspect every signature of the document.
    pub fn inspect(&mut self) -> Result<Vec<SignatureInfo>> {
        let signatures = self.signature_dictionaries()?;
        signatures
            .into_iter()
            .map(|(name, sig)| self.inspect_one(name, &sig))
            .collect()
    }

    fn inspect_one(&self, field_name: Option<String>, sig: &Dictionary) -> Result<SignatureInfo> {
        let text = |key: &str| {
            sig.get(key)
                .and_then(Object::as_string)
                .map(|s| String::from_utf8_lossy(s).into_owned())
        };

        let mut info = SignatureInfo {
            field_name,
            signer_name: text("Name"),
            signing_time: text("M"),
            reason: text("Reason"),
            location: text("Location"),
            sub_filter: sig
                .get("SubFilter")
                .and_then(Object::as_name)
                .and_then(SignatureSubFilter::from_pdf_name),
            byte_range: sig
                .get("ByteRange")
                .and_then(Object::as_array)
                .map(|a| a.iter().filter_map(Object::as_integer).collect())
                .unwrap_or_default(),
            ..SignatureInfo::default()
        };

        let data = self.doc.bytes();
        let byte_range: [i64; 4] = match info.byte_range.as_slice() {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => return Err(Error::InvalidPdf(format!("ByteRange has {} entries", info.byte_range.len()))),
        };
        info.covers_whole_document = ByteRangeCalculator::validate_byte_range(&byte_range, data.len()).is_ok();

        let contents = sig
            .get("Contents")
            .and_then(Object::as_string)
            .ok_or_else(|| Error::InvalidPdf("signature has no /Contents".to_string()))?;
        let content_info = sig_cms::decode_content_info(contents)?;
        let signed_data = sig_cms::signed_data(&content_info)?;
        let signer = sig_cms::first_signer(&signed_data)?;

        let algorithm = DigestAlgorithm::from_oid(&signer.digest_alg.oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(signer.digest_alg.oid.to_string()))?;
        let ranges = ByteRangeCalculator::signed_ranges(data, &byte_range)?;
        let digest = Sha2Digester.digest(algorithm, &ranges)?;
        info.digest_matches = sig_cms::message_digest(signer).as_deref() == Some(digest.as_slice());

        let certificates = certificates(&signed_data);
        info.certificate_count = certificates.len();
        info.certificate_subject = signer_certificate(signer, &certificates)
            .map(|cert| cert.tbs_certificate.subject.to_string());
        info.archived_crls = sig_cms::archived_crls(signer)?.len();
        info.has_timestamp = sig_cms::timestamp_token(signer)?.is_some();

        Ok(info)
    }

    /// CRL streams stored in the document security store.
    pub fn dss_crls(&mut self) -> Result<Vec<Vec<u8>>> {
        let catalog = self.doc.catalog()?;
        let Some(dss) = self.doc.resolve_dict(catalog.get("DSS"))? else {
            return Ok(Vec::new());
        };
        let crls = match dss.get("CRLs") {
            Some(crls) => self.doc.resolve(crls)?,
            None => return Ok(Vec::new()),
        };

        let mut out = Vec::new();
        for crl in crls.as_array().map(Vec::as_slice).unwrap_or_default() {
            out.push(self.doc.resolve(crl)?.decode_stream_data()?);
        }
        Ok(out)
    }
}

fn certificates(signed_data: &SignedData) -> Vec<&Certificate> {
    signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect()
}

fn signer_certificate<'a>(signer: &SignerInfo, certificates: &[&'a Certificate]) -> Option<&'a Certificate> {
    match &signer.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certificates
            .iter()
            .find(|c| c.tbs_certificate.issuer == id.issuer && c.tbs_certificate.serial_number == id.serial_number)
            .copied(),
        SignerIdentifier::SubjectKeyIdentifier(_) => certificates.first().copied(),
    }
}
