//! Shared fixtures for the signing integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Encode};
use spki::AlgorithmIdentifierOwned;

use pdf_ltv_sign::signatures::cms::oids;
use pdf_ltv_sign::signatures::timestamp::MessageImprint;
use pdf_ltv_sign::signatures::{
    DigestAlgorithm, RevocationClient, RsaKeyCapability, SigningCapability, SigningRequest, TimestampClient,
};
use pdf_ltv_sign::{Error, Result, RetryPolicy, SignerConfig};

pub const SIGNER_KEY: &str = include_str!("../fixtures/signer.key");
pub const SIGNER_DER: &[u8] = include_bytes!("../fixtures/signer.der");
pub const CA_DER: &[u8] = include_bytes!("../fixtures/ca.der");

/// Single-page document; `catalog_extra` is spliced into the catalog.
pub fn sample_pdf(version: &str, catalog_extra: &str) -> Vec<u8> {
    let objects = [
        format!("<< /Type /Catalog /Pages 2 0 R {}>>", catalog_extra),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>".to_string(),
        "<< /Length 33 >>\nstream\nBT /F1 12 Tf 72 720 Td (Hi) Tj ET\nendstream".to_string(),
    ];

    let mut out = format!("%PDF-{}\n%\u{e2}\u{e3}\n", version).into_bytes();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

/// A 120-byte encoded revocation entry.
pub fn crl_entry() -> Vec<u8> {
    let mut entry = vec![0x30, 0x76];
    entry.extend((0..118u8).map(|b| b.wrapping_mul(7)));
    entry
}

pub fn signer_key() -> Arc<RsaKeyCapability> {
    Arc::new(RsaKeyCapability::from_pem(SIGNER_KEY).unwrap())
}

pub fn config() -> SignerConfig {
    SignerConfig::default().with_retry(RetryPolicy {
        max_attempts: 3,
        backoff_ms: 0,
    })
}

/// Request signing `source` into `destination` with the fixture key.
pub fn request(source: &Path, destination: &Path, chain: Vec<Vec<u8>>) -> SigningRequest {
    SigningRequest::new(source, destination, signer_key(), chain).unwrap()
}

/// Files left in `dir` other than `keep`.
pub fn leftovers(dir: &Path, keep: &[&str]) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| !keep.contains(&name.as_str()))
        .collect()
}

/// Returns the same entry for every certificate and counts calls.
#[derive(Default)]
pub struct StaticRevocation {
    pub calls: AtomicUsize,
}

impl StaticRevocation {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RevocationClient for StaticRevocation {
    fn fetch(&self, _certificate: &[u8], _issuer: Option<&[u8]>) -> Result<Vec<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![crl_entry()])
    }
}

/// Always unreachable.
pub struct OfflineRevocation;

impl RevocationClient for OfflineRevocation {
    fn fetch(&self, _certificate: &[u8], _issuer: Option<&[u8]>) -> Result<Vec<Vec<u8>>> {
        Err(Error::Network("connection refused".to_string()))
    }
}

/// Produces a fixed 256-byte signature value.
pub struct FixedSignature;

impl SigningCapability for FixedSignature {
    fn signature_algorithm(&self, _digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
        Ok(AlgorithmIdentifierOwned {
            oid: ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11"),
            parameters: Some(Any::null()),
        })
    }

    fn sign(&self, _data: &[u8], _digest: DigestAlgorithm) -> Result<Vec<u8>> {
        Ok(vec![0x5a; 256])
    }
}

/// Issues unsigned tokens carrying a correct message imprint.
#[derive(Default)]
pub struct FakeTsa {
    pub calls: AtomicUsize,
}

impl TimestampClient for FakeTsa {
    fn request(&self, signature_value: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(fake_token(signature_value, algorithm))
    }
}

/// Unreachable timestamp authority.
#[derive(Default)]
pub struct DownTsa {
    pub calls: AtomicUsize,
}

impl TimestampClient for DownTsa {
    fn request(&self, _signature_value: &[u8], _algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Network("503 Service Unavailable".to_string()))
    }
}

/// Minimal timestamp token whose TSTInfo covers `data`.
pub fn fake_token(data: &[u8], algorithm: DigestAlgorithm) -> Vec<u8> {
    let tst_info = vec![
        Any::encode_from(&1u8).unwrap(),
        Any::encode_from(&ObjectIdentifier::new_unwrap("1.3.6.1.4.1.4146.2.3")).unwrap(),
        Any::encode_from(&MessageImprint::of(data, algorithm).unwrap()).unwrap(),
        Any::encode_from(&7u32).unwrap(),
        Any::encode_from(&GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(1_700_000_000)).unwrap())
            .unwrap(),
    ];
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
