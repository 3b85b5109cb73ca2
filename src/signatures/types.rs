//! Digital signature types and data structures.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use super::cms::oids;
use super::pipeline::PipelineState;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Get the OID for this digest algorithm.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => oids::SHA1,
            DigestAlgorithm::Sha256 => oids::SHA256,
            DigestAlgorithm::Sha384 => oids::SHA384,
            DigestAlgorithm::Sha512 => oids::SHA512,
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            _ => None,
        }
    }
}

/// Descriptive fields written into the signature dictionary.
#[derive(Debug, Clone)]
pub struct SignatureMetadata {
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Time written to `/M` and the signing-time attribute
    pub signing_time: DateTime<Utc>,
}

impl Default for SignatureMetadata {
    fn default() -> Self {
        Self {
            name: None,
            reason: None,
            location: None,
            contact_info: None,
            signing_time: Utc::now(),
        }
    }
}

impl SignatureMetadata {
    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Pin the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = time;
        self
    }
}

/// Kind of revocation evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RevocationKind {
    /// Certificate revocation list
    Crl,
    /// OCSP response
    Ocsp,
}

/// Encoded revocation data for one certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct RevocationEntry(pub Vec<u8>);

impl RevocationEntry {
    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the entry holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for RevocationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RevocationEntry({} bytes)", self.0.len())
    }
}

/// Revocation evidence collected for one signing operation.
///
/// Entries keep insertion order. Kinds with no entries are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationStore {
    entries: BTreeMap<RevocationKind, Vec<RevocationEntry>>,
}

impl RevocationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Empty entries are ignored.
    pub fn push(&mut self, kind: RevocationKind, entry: RevocationEntry) {
        if entry.is_empty() {
            log::debug!("Dropping empty {:?} revocation entry", kind);
            return;
        }
        self.entries.entry(kind).or_default().push(entry);
    }

    /// Entries of one kind, in insertion order.
    pub fn get(&self, kind: RevocationKind) -> &[RevocationEntry] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// CRL entries.
    pub fn crls(&self) -> &[RevocationEntry] {
        self.get(RevocationKind::Crl)
    }

    /// Every entry of every kind.
    pub fn iter(&self) -> impl Iterator<Item = (RevocationKind, &RevocationEntry)> {
        self.entries
            .iter()
            .flat_map(|(kind, entries)| entries.iter().map(move |e| (*kind, e)))
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether the store holds no evidence.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The signature slot written by the reservation phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderReservation {
    /// Field name (`/T`) of the signature field
    pub slot_name: String,
    /// `[0, a, b, c]` as written in `/ByteRange`
    pub byte_range: [i64; 4],
    /// Offset of the `<` opening the `/Contents` value
    pub contents_offset: usize,
    /// Maximum DER length of the signature structure, in bytes
    pub capacity: usize,
    /// Length of the intermediate document
    pub file_len: usize,
}

impl PlaceholderReservation {
    /// Bytes taken by `/Contents` including the angle brackets.
    pub fn slot_len(&self) -> usize {
        self.capacity * 2 + 2
    }

    /// Offset just past the closing `>`.
    pub fn contents_end(&self) -> usize {
        self.contents_offset + self.slot_len()
    }
}

/// An encoded detached CMS signature ready for insertion.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureStructure {
    /// DER-encoded `ContentInfo`
    pub der: Vec<u8>,
    /// Whether a timestamp token was embedded
    pub timestamp_embedded: bool,
    /// Number of revocation entries referenced by the signed attributes
    pub revocation_entries: usize,
}

impl SignatureStructure {
    /// Encoded length.
    pub fn len(&self) -> usize {
        self.der.len()
    }

    /// Whether the structure is empty.
    pub fn is_empty(&self) -> bool {
        self.der.is_empty()
    }
}

impl std::fmt::Debug for SignatureStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureStructure")
            .field("der", &format!("{} bytes", self.der.len()))
            .field("timestamp_embedded", &self.timestamp_embedded)
            .field("revocation_entries", &self.revocation_entries)
            .finish()
    }
}

/// Outcome of a successful signing run.
#[derive(Debug, Clone)]
pub struct SigningReport {
    /// Final state (always `Finalized`)
    pub state: PipelineState,
    /// Path of the signed document
    pub destination: PathBuf,
    /// The slot that was filled
    pub reservation: PlaceholderReservation,
    /// DER length of the embedded signature structure
    pub structure_len: usize,
    /// Number of revocation entries embedded
    pub revocation_entries: usize,
    /// Whether a timestamp token was embedded
    pub timestamp_embedded: bool,
    /// Whether the intermediate document was removed
    pub intermediate_removed: bool,
}

/// Information about an existing signature in a PDF.
#[derive(Debug, Clone, Default)]
pub struct SignatureInfo {
    /// Field name (`/T`)
    pub field_name: Option<String>,
    /// Name of the signer from `/Name`
    pub signer_name: Option<String>,
    /// Signing time from `/M`
    pub signing_time: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Signature sub-filter type
    pub sub_filter: Option<SignatureSubFilter>,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
    /// Whether the signature covers the whole document
    pub covers_whole_document: bool,
    /// Whether the recomputed digest equals the `messageDigest` attribute
    pub digest_matches: bool,
    /// Certificates carried in the CMS structure
    pub certificate_count: usize,
    /// Subject of the signing certificate
    pub certificate_subject: Option<String>,
    /// CRLs in the revocation-info-archival attribute
    pub archived_crls: usize,
    /// Whether a timestamp token is attached
    pub has_timestamp: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        assert_eq!(DigestAlgorithm::Sha1.name(), "SHA-1");
        assert_eq!(DigestAlgorithm::Sha384.output_len(), 48);
    }

    #[test]
    fn test_digest_algorithm_oid_lookup() {
        for alg in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256, DigestAlgorithm::Sha512] {
            assert_eq!(DigestAlgorithm::from_oid(&alg.oid()), Some(alg));
        }
        assert_eq!(DigestAlgorithm::Sha256.oid().to_string(), "2.16.840.1.101.3.4.2.1");
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::Pkcs7Detached.as_pdf_name(), "adbe.pkcs7.detached");
        assert_eq!(
            SignatureSubFilter::from_pdf_name("ETSI.CAdES.detached"),
            Some(SignatureSubFilter::CadesDetached)
        );
        assert_eq!(SignatureSubFilter::from_pdf_name("adbe.x509.rsa_sha1"), None);
    }

    #[test]
    fn test_revocation_store_drops_empty_entries() {
        let mut store = RevocationStore::new();
        store.push(RevocationKind::Crl, RevocationEntry(Vec::new()));
        assert!(store.is_empty());

        store.push(RevocationKind::Crl, RevocationEntry(vec![1, 2]));
        store.push(RevocationKind::Crl, RevocationEntry(vec![3]));
        assert_eq!(store.len(), 2);
        assert_eq!(store.crls()[1].as_bytes(), &[3]);
        assert!(store.get(RevocationKind::Ocsp).is_empty());
    }

    #[test]
    fn test_reservation_slot_geometry() {
        let reservation = PlaceholderReservation {
            slot_name: "Signature1".to_string(),
            byte_range: [0, 100, 2102, 50],
            contents_offset: 100,
            capacity: 1000,
            file_len: 2152,
        };
        assert_eq!(reservation.slot_len(), 2002);
        assert_eq!(reservation.contents_end(), 2102);
    }

    #[test]
    fn test_metadata_builder() {
        let meta = SignatureMetadata::default().with_reason("Approval").with_location("Berlin");
        assert_eq!(meta.reason.as_deref(), Some("Approval"));
        assert_eq!(meta.location.as_deref(), Some("Berlin"));
        assert!(meta.name.is_none());
    }
}
