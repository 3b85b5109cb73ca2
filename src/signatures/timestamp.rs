//! RFC 3161 timestamp tokens.
//!
//! A token is requested over the signature value (not the document) and
//! attached as the `id-aa-timeStampToken` unsigned attribute. Before it is
//! embedded, the token's `TSTInfo.messageImprint` must equal the hash of the
//! signature value under the requested algorithm.

use der::asn1::{Any, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;

use crate::error::{Error, Result};

use super::cms::{self, digest_algorithm_identifier, oids};
use super::digest::hash;
use super::types::DigestAlgorithm;

/// Obtains timestamp tokens from a timestamp authority.
pub trait TimestampClient: Send + Sync {
    /// Request a token over `signature_value`, hashed with `algorithm`.
    ///
    /// Returns the DER `ContentInfo` of the token.
    fn request(&self, signature_value: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// `MessageImprint ::= SEQUENCE { hashAlgorithm, hashedMessage }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Hash algorithm
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the timestamped data
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Imprint of `data` under `algorithm`.
    pub fn of(data: &[u8], algorithm: DigestAlgorithm) -> Result<Self> {
        Ok(Self {
            hash_algorithm: digest_algorithm_identifier(algorithm),
            hashed_message: OctetString::new(hash(algorithm, data))?,
        })
    }
}

/// `TimeStampReq` without policy and extensions.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Always 1
    pub version: u8,
    /// Imprint of the signature value
    pub message_imprint: MessageImprint,
    /// Requested policy
    pub req_policy: Option<ObjectIdentifier>,
    /// Replay protection
    pub nonce: Option<u64>,
    /// Ask the TSA to include its certificate
    #[asn1(default = "Default::default")]
    pub cert_req: bool,
}

/// Encode a timestamp request over `signature_value`.
pub fn encode_request(signature_value: &[u8], algorithm: DigestAlgorithm, nonce: Option<u64>) -> Result<Vec<u8>> {
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint::of(signature_value, algorithm)?,
        req_policy: None,
        nonce,
        cert_req: true,
    };
    Ok(request.to_der()?)
}

/// Extract the token from a DER `TimeStampResp`.
///
/// Status `granted` (0) and `grantedWithMods` (1) are accepted; anything else
/// is reported with the status code.
pub fn parse_response(bytes: &[u8]) -> Result<Vec<u8>> {
    let malformed = |e: der::Error| Error::Timestamp(format!("malformed TimeStampResp: {}", e));

    let elements = Vec::<Any>::from_der(bytes).map_err(malformed)?;
    let status_info = elements
        .first()
        .ok_or_else(|| Error::Timestamp("TimeStampResp has no status".to_string()))?;
    let status_fields = Vec::<Any>::from_der(&status_info.to_der().map_err(malformed)?).map_err(malformed)?;
    let status = match status_fields.first() {
        Some(field) => u32::from_der(&field.to_der().map_err(malformed)?).map_err(malformed)?,
        None => return Err(Error::Timestamp("PKIStatusInfo has no status".to_string())),
    };

    if status > 1 {
        return Err(Error::Timestamp(format!("timestamp authority rejected the request (status {})", status)));
    }

    let token = elements
        .get(1)
        .ok_or_else(|| Error::Timestamp("response granted but carries no token".to_string()))?;
    token.to_der().map_err(malformed)
}

/// Check that `token` timestamps `signature_value` under `algorithm`.
pub fn verify_token(token: &[u8], signature_value: &[u8], algorithm: DigestAlgorithm) -> Result<()> {
    let imprint = token_imprint(token)?;
    if imprint.hash_algorithm.oid != algorithm.oid() {
        return Err(Error::Timestamp(format!(
            "token imprint uses {}, expected {}",
            imprint.hash_algorithm.oid,
            algorithm.name()
        )));
    }
    if imprint.hashed_message.as_bytes() != hash(algorithm, signature_value).as_slice() {
        return Err(Error::Timestamp("token imprint does not match the signature value".to_string()));
    }
    Ok(())
}

/// Check that `token` echoes the nonce sent with its request.
pub fn verify_nonce(token: &[u8], nonce: u64) -> Result<()> {
    match token_nonce(token)? {
        Some(found) if found == nonce => Ok(()),
        Some(found) => Err(Error::Timestamp(format!(
            "token nonce {} does not match the request nonce {}",
            found, nonce
        ))),
        None => Err(Error::Timestamp("token does not echo the request nonce".to_string())),
    }
}

fn invalid(what: &str) -> Error {
    Error::Timestamp(format!("invalid timestamp token: {}", what))
}

/// The fields of a token's `TSTInfo`.
///
/// `TSTInfo ::= SEQUENCE { version, policy, messageImprint, serialNumber,
/// genTime, accuracy OPTIONAL, ordering DEFAULT FALSE, nonce OPTIONAL, ... }`
fn tst_info(token: &[u8]) -> Result<Vec<Any>> {
    let content_info = cms::decode_content_info(token).map_err(|_| invalid("not a ContentInfo"))?;
    let signed_data = cms::signed_data(&content_info).map_err(|_| invalid("not SignedData"))?;
    let encap = &signed_data.encap_content_info;
    if encap.econtent_type != oids::ID_CT_TST_INFO {
        return Err(invalid("content is not TSTInfo"));
    }
    let econtent = encap.econtent.as_ref().ok_or_else(|| invalid("TSTInfo missing"))?;
    Vec::<Any>::from_der(econtent.value()).map_err(|_| invalid("TSTInfo is not a SEQUENCE"))
}

/// The message imprint inside a token's `TSTInfo`.
pub fn token_imprint(token: &[u8]) -> Result<MessageImprint> {
    let fields = tst_info(token)?;
    let imprint = fields.get(2).ok_or_else(|| invalid("TSTInfo has no messageImprint"))?;
    imprint
        .to_der()
        .and_then(|der| MessageImprint::from_der(&der))
        .map_err(|_| invalid("malformed messageImprint"))
}

/// The nonce inside a token's `TSTInfo`, if the authority echoed one.
pub fn token_nonce(token: &[u8]) -> Result<Option<u64>> {
    // accuracy is a SEQUENCE and ordering a BOOLEAN, so the first INTEGER after genTime is the nonce
    match tst_info(token)?.iter().skip(5).find(|field| field.tag() == Tag::Integer) {
        Some(field) => field
            .to_der()
            .and_then(|der| u64::from_der(&der))
            .map(Some)
            .map_err(|_| invalid("nonce out of range")),
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ::cms::content_info::{CmsVersion, ContentInfo};
    use ::cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
    use der::asn1::{GeneralizedTime, SetOfVec};

    /// Minimal token carrying a TSTInfo for `data`.
    pub(crate) fn fake_token(data: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
        token_with_nonce(data, algorithm, None)
    }

    pub(crate) fn token_with_nonce(data: &[u8], algorithm: DigestAlgorithm, nonce: Option<u64>) -> Vec<u8> {
        let mut tst_info = vec![
            Any::encode_from(&1u8).unwrap(),
            Any::encode_from(&ObjectIdentifier::new_unwrap("1.3.6.1.4.1.4146.2.3")).unwrap(),
            Any::encode_from(&MessageImprint::of(data, algorithm).unwrap()).unwrap(),
            Any::encode_from(&42u32).unwrap(),
            Any::encode_from(&GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(1_700_000_000)).unwrap())
                .unwrap(),
        ];
        if let Some(nonce) = nonce {
            tst_info.push(Any::encode_from(&true).unwrap());
            tst_info.push(Any::encode_from(&nonce).unwrap());
        }
        let signed_data = SignedData {
            version: CmsVersion::V3,
            digest_algorithms: SetOfVec::new(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: oids::ID_CT_TST_INFO,
                econtent: Some(Any::encode_from(&OctetString::new(tst_info.to_der().unwrap()).unwrap()).unwrap()),
            },
            certificates: None,
            crls: None,
            signer_infos: SignerInfos(SetOfVec::new()),
        };
        ContentInfo {
            content_type: oids::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        }
        .to_der()
        .unwrap()
    }

    #[test]
    fn test_request_encoding() {
        let der = encode_request(b"signature", DigestAlgorithm::Sha256, Some(7)).unwrap();
        let decoded = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.nonce, Some(7));
        assert!(decoded.cert_req);
        assert_eq!(
            decoded.message_imprint.hashed_message.as_bytes(),
            hash(DigestAlgorithm::Sha256, b"signature").as_slice()
        );
    }

    #[test]
    fn test_token_matches_signature() {
        let token = fake_token(b"sig", DigestAlgorithm::Sha256);
        assert!(verify_token(&token, b"sig", DigestAlgorithm::Sha256).is_ok());
    }

    #[test]
    fn test_token_for_other_data_rejected() {
        let token = fake_token(b"other", DigestAlgorithm::Sha256);
        assert!(matches!(
            verify_token(&token, b"sig", DigestAlgorithm::Sha256),
            Err(Error::Timestamp(_))
        ));
    }

    #[test]
    fn test_token_algorithm_mismatch_rejected() {
        let token = fake_token(b"sig", DigestAlgorithm::Sha384);
        assert!(verify_token(&token, b"sig", DigestAlgorithm::Sha256).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            verify_token(&[0x30, 0x03, 0x02, 0x01, 0x00], b"sig", DigestAlgorithm::Sha256),
            Err(Error::Timestamp(_))
        ));
    }

    fn response(status: u8, token: Option<&[u8]>) -> Vec<u8> {
        let status_info = vec![Any::encode_from(&status).unwrap()];
        let mut fields = vec![Any::encode_from(&status_info).unwrap()];
        if let Some(token) = token {
            fields.push(Any::from_der(token).unwrap());
        }
        fields.to_der().unwrap()
    }

    #[test]
    fn test_parse_granted_response() {
        let token = fake_token(b"sig", DigestAlgorithm::Sha256);
        let parsed = parse_response(&response(0, Some(&token))).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_parse_rejected_response() {
        let err = parse_response(&response(2, None)).unwrap_err();
        assert!(err.to_string().contains("status 2"));
    }

    #[test]
    fn test_parse_granted_without_token() {
        assert!(parse_response(&response(0, None)).is_err());
    }

    #[test]
    fn test_malformed_status_reported_as_timestamp_error() {
        let status_info = vec![Any::encode_from(&ObjectIdentifier::new_unwrap("1.2.3")).unwrap()];
        let body = vec![Any::encode_from(&status_info).unwrap()].to_der().unwrap();
        assert!(matches!(parse_response(&body), Err(Error::Timestamp(_))));
        assert!(matches!(parse_response(b"\x04\x01"), Err(Error::Timestamp(_))));
    }

    #[test]
    fn test_nonce_echoed() {
        let token = token_with_nonce(b"sig", DigestAlgorithm::Sha256, Some(0x1234_5678_9abc));
        assert_eq!(token_nonce(&token).unwrap(), Some(0x1234_5678_9abc));
        verify_nonce(&token, 0x1234_5678_9abc).unwrap();
        verify_token(&token, b"sig", DigestAlgorithm::Sha256).unwrap();
    }

    #[test]
    fn test_nonce_mismatch_rejected() {
        let token = token_with_nonce(b"sig", DigestAlgorithm::Sha256, Some(99));
        let err = verify_nonce(&token, 100).unwrap_err();
        assert!(matches!(err, Error::Timestamp(ref m) if m.contains("99")));
    }

    #[test]
    fn test_missing_nonce_rejected() {
        let token = fake_token(b"sig", DigestAlgorithm::Sha256);
        assert_eq!(token_nonce(&token).unwrap(), None);
        assert!(matches!(verify_nonce(&token, 7), Err(Error::Timestamp(_))));
    }
}
