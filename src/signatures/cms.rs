//! CMS (RFC 5652) structures for detached PDF signatures.
//!
//! Builds `ContentInfo(SignedData)` with the signed attributes a PAdES
//! long-term signature carries, and reads the same structures back.
//!
//! Signed attributes:
//! - content-type (`id-data`)
//! - message-digest of the document byte ranges
//! - signing-time
//! - signing-certificate-v2 (ESS)
//! - adbe-revocationInfoArchival with the embedded CRLs (omitted when empty)
//!
//! The timestamp token is an unsigned attribute added after signing.

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier,
    SignerInfo, SignerInfos, UnsignedAttributes,
};
use chrono::{DateTime, Datelike, Utc};
use der::asn1::{Any, GeneralizedTime, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode, Reader, Sequence, SliceReader};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::error::{Error, Result};

use super::digest::hash;
use super::types::{DigestAlgorithm, RevocationStore};

/// Object identifiers used in signatures.
pub mod oids {
    use der::asn1::ObjectIdentifier;

    /// id-data
    pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    /// id-signedData
    pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    /// id-ct-TSTInfo
    pub const ID_CT_TST_INFO: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

    /// contentType attribute
    pub const CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    /// messageDigest attribute
    pub const MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    /// signingTime attribute
    pub const SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
    /// id-aa-signingCertificateV2
    pub const SIGNING_CERTIFICATE_V2: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
    /// id-aa-timeStampToken
    pub const TIMESTAMP_TOKEN: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
    /// adbe-revocationInfoArchival
    pub const ADBE_REVOCATION_INFO_ARCHIVAL: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113583.1.1.8");

    /// SHA-1
    pub const SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
    /// SHA-256
    pub const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
    /// SHA-384
    pub const SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
    /// SHA-512
    pub const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

    /// rsaEncryption
    pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    /// sha1WithRSAEncryption
    pub const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
    /// sha256WithRSAEncryption
    pub const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
    /// sha384WithRSAEncryption
    pub const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
    /// sha512WithRSAEncryption
    pub const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
}

/// ESSCertIDv2 (RFC 5035). `hash_algorithm` defaults to SHA-256 when absent.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertIdV2 {
    /// Hash algorithm, omitted for SHA-256
    pub hash_algorithm: Option<AlgorithmIdentifierOwned>,
    /// Hash of the signing certificate
    pub cert_hash: OctetString,
}

/// SigningCertificateV2 (RFC 5035), without the optional policies.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificateV2 {
    /// Certificate identifiers, signer first
    pub certs: Vec<EssCertIdV2>,
}

/// Adobe RevocationInfoArchival.
///
/// ```text
/// RevocationInfoArchival ::= SEQUENCE {
///     crl  [0] EXPLICIT SEQUENCE OF CRLs OPTIONAL,
///     ocsp [1] EXPLICIT SEQUENCE OF OCSPResponse OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevocationInfoArchival {
    /// Encoded CRLs
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub crl: Option<Vec<Any>>,
    /// Encoded OCSP responses
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ocsp: Option<Vec<Any>>,
}

/// Algorithm identifier for a digest, parameters absent.
pub fn digest_algorithm_identifier(alg: DigestAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: alg.oid(),
        parameters: None,
    }
}

fn attribute(oid: der::asn1::ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

/// Build the signed attributes bound by the signature.
pub fn build_signed_attributes(
    digest_alg: DigestAlgorithm,
    message_digest: &[u8],
    signing_time: DateTime<Utc>,
    signer_certificate: &[u8],
    revocation: &RevocationStore,
) -> Result<SignedAttributes> {
    let mut attrs = vec![
        attribute(oids::CONTENT_TYPE, Any::encode_from(&oids::ID_DATA)?)?,
        attribute(oids::MESSAGE_DIGEST, Any::encode_from(&OctetString::new(message_digest)?)?)?,
    ];

    attrs.push(attribute(oids::SIGNING_TIME, Any::encode_from(&signing_time_value(signing_time)?)?)?);

    let ess = SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm: (digest_alg != DigestAlgorithm::Sha256).then(|| digest_algorithm_identifier(digest_alg)),
            cert_hash: OctetString::new(hash(digest_alg, signer_certificate))?,
        }],
    };
    attrs.push(attribute(oids::SIGNING_CERTIFICATE_V2, Any::encode_from(&ess)?)?);

    if let Some(archival) = revocation_archival(revocation)? {
        attrs.push(attribute(oids::ADBE_REVOCATION_INFO_ARCHIVAL, Any::encode_from(&archival)?)?);
    }

    Ok(SetOfVec::try_from(attrs)?)
}

/// `UTCTime` through 2049, `GeneralizedTime` from 2050 on.
fn signing_time_value(signing_time: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(signing_time.timestamp())
        .map_err(|_| Error::Encoding(format!("signing time {} is before 1970", signing_time)))?;
    let unix = std::time::Duration::from_secs(secs);
    if signing_time.year() < 2050 {
        Ok(UtcTime::from_unix_duration(unix)?.into())
    } else {
        Ok(GeneralizedTime::from_unix_duration(unix)?.into())
    }
}

/// The archival attribute value, or `None` when there is no evidence.
fn revocation_archival(revocation: &RevocationStore) -> Result<Option<RevocationInfoArchival>> {
    if revocation.is_empty() {
        return Ok(None);
    }

    let wrap = |entries: &[super::types::RevocationEntry]| -> Result<Option<Vec<Any>>> {
        if entries.is_empty() {
            return Ok(None);
        }
        entries
            .iter()
            .map(|e| {
                Any::from_der(e.as_bytes())
                    .map_err(|err| Error::Encoding(format!("revocation entry is not valid DER: {}", err)))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    };

    Ok(Some(RevocationInfoArchival {
        crl: wrap(revocation.crls())?,
        ocsp: wrap(revocation.get(super::types::RevocationKind::Ocsp))?,
    }))
}

/// DER of the signed attributes as a SET, the input to the signature.
pub fn signed_attributes_der(attrs: &SignedAttributes) -> Result<Vec<u8>> {
    Ok(attrs.to_der()?)
}

/// Unsigned attribute carrying a timestamp token.
pub fn timestamp_attribute(token: &[u8]) -> Result<Attribute> {
    let value = Any::from_der(token).map_err(|e| Error::Timestamp(format!("token is not valid DER: {}", e)))?;
    attribute(oids::TIMESTAMP_TOKEN, value)
}

/// Inputs for [`build_content_info`].
pub struct SignedDataParts<'a> {
    /// Digest algorithm for the document and attributes
    pub digest_alg: DigestAlgorithm,
    /// Certificate chain, signer first
    pub chain: &'a [Certificate],
    /// Signed attributes as signed
    pub signed_attrs: SignedAttributes,
    /// Algorithm reported by the signing capability
    pub signature_algorithm: AlgorithmIdentifierOwned,
    /// Raw signature value
    pub signature: &'a [u8],
    /// Unsigned attributes (the timestamp token)
    pub unsigned_attrs: Vec<Attribute>,
}

/// Encode `ContentInfo(SignedData)` with a detached `id-data` content.
pub fn build_content_info(parts: SignedDataParts<'_>) -> Result<Vec<u8>> {
    let signer = parts
        .chain
        .first()
        .ok_or_else(|| Error::InvalidRequest("certificate chain is empty".to_string()))?;

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: signer.tbs_certificate.issuer.clone(),
            serial_number: signer.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_algorithm_identifier(parts.digest_alg),
        signed_attrs: Some(parts.signed_attrs),
        signature_algorithm: parts.signature_algorithm,
        signature: OctetString::new(parts.signature)?,
        unsigned_attrs: if parts.unsigned_attrs.is_empty() {
            None
        } else {
            Some(UnsignedAttributes::try_from(parts.unsigned_attrs)?)
        },
    };

    let certificates: Vec<CertificateChoices> =
        parts.chain.iter().cloned().map(CertificateChoices::Certificate).collect();

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_algorithm_identifier(parts.digest_alg)])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };

    Ok(content_info.to_der()?)
}

/// Decode a `ContentInfo`, ignoring trailing bytes such as `/Contents` padding.
pub fn decode_content_info(bytes: &[u8]) -> Result<ContentInfo> {
    let mut reader = SliceReader::new(bytes)?;
    Ok(reader.decode::<ContentInfo>()?)
}

/// Decode the `SignedData` inside a `ContentInfo`.
pub fn signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(Error::Encoding(format!(
            "expected signedData content, got {}",
            content_info.content_type
        )));
    }
    Ok(SignedData::from_der(&content_info.content.to_der()?)?)
}

/// The single signer of a PDF signature.
pub fn first_signer(signed_data: &SignedData) -> Result<&SignerInfo> {
    signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::Encoding("SignedData has no signer".to_string()))
}

/// First value of an attribute.
pub fn attribute_value<'a>(attrs: &'a SetOfVec<Attribute>, oid: &der::asn1::ObjectIdentifier) -> Option<&'a Any> {
    attrs
        .iter()
        .find(|a| a.oid == *oid)
        .and_then(|a| a.values.iter().next())
}

/// The `messageDigest` value from signed attributes.
pub fn message_digest(signer: &SignerInfo) -> Option<Vec<u8>> {
    let attrs = signer.signed_attrs.as_ref()?;
    attribute_value(attrs, &oids::MESSAGE_DIGEST).map(|v| v.value().to_vec())
}

/// CRLs from the revocation-info-archival attribute.
pub fn archived_crls(signer: &SignerInfo) -> Result<Vec<Vec<u8>>> {
    let Some(value) = signer
        .signed_attrs
        .as_ref()
        .and_then(|attrs| attribute_value(attrs, &oids::ADBE_REVOCATION_INFO_ARCHIVAL))
    else {
        return Ok(Vec::new());
    };

    let archival = RevocationInfoArchival::from_der(&value.to_der()?)?;
    archival
        .crl
        .unwrap_or_default()
        .iter()
        .map(|crl| Ok(crl.to_der()?))
        .collect()
}

/// The timestamp token attached to a signer, if any.
pub fn timestamp_token(signer: &SignerInfo) -> Result<Option<Vec<u8>>> {
    match signer
        .unsigned_attrs
        .as_ref()
        .and_then(|attrs| attribute_value(attrs, &oids::TIMESTAMP_TOKEN))
    {
        Some(token) => Ok(Some(token.to_der()?)),
        None => Ok(None),
    }
}
