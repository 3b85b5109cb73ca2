//! End-to-end tests for the deferred signing pipeline.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use common::*;
use pdf_ltv_sign::object::Object;
use pdf_ltv_sign::signatures::{
    cms, CancellationToken, DeferredSigner, DigestAlgorithm, SignatureMetadata, SignatureVerifier, SigningRequest,
    TimestampClient,
};
use pdf_ltv_sign::{Error, PdfDocument, PipelineState, RevocationPolicy, TimestampPolicy};
use tempfile::TempDir;

fn workspace(version: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.pdf");
    std::fs::write(&source, sample_pdf(version, "")).unwrap();
    let destination = dir.path().join("out.pdf");
    (dir, source, destination)
}

fn full_chain() -> Vec<Vec<u8>> {
    vec![SIGNER_DER.to_vec(), CA_DER.to_vec()]
}

fn ltv_signer() -> (DeferredSigner, Arc<StaticRevocation>, Arc<FakeTsa>) {
    let revocation = Arc::new(StaticRevocation::default());
    let tsa = Arc::new(FakeTsa::default());
    let signer = DeferredSigner::new(config())
        .with_revocation_client(revocation.clone())
        .with_timestamp_client(tsa.clone());
    (signer, revocation, tsa)
}

#[test]
fn test_ltv_signature_embeds_evidence() {
    let (dir, source, destination) = workspace("1.7");
    let (signer, revocation, tsa) = ltv_signer();

    let report = signer
        .sign(&request(&source, &destination, full_chain()).with_slot_name("Approval"))
        .unwrap();

    assert_eq!(report.state, PipelineState::Finalized);
    assert_eq!(report.revocation_entries, 1);
    assert!(report.timestamp_embedded);
    assert!(report.intermediate_removed);
    assert!(report.structure_len <= report.reservation.capacity);
    // Leaf only: the last certificate of the chain is the trust anchor
    assert_eq!(revocation.calls(), 1);
    assert_eq!(tsa.calls.load(Ordering::SeqCst), 1);

    let signed = std::fs::read(&destination).unwrap();
    assert_eq!(signed.len(), report.reservation.file_len);

    let mut verifier = SignatureVerifier::new(signed).unwrap();
    assert_eq!(verifier.dss_crls().unwrap(), vec![crl_entry()]);

    let signatures = verifier.inspect().unwrap();
    assert_eq!(signatures.len(), 1);
    let sig = &signatures[0];
    assert_eq!(sig.field_name.as_deref(), Some("Approval"));
    assert!(sig.covers_whole_document);
    assert!(sig.digest_matches);
    assert!(sig.has_timestamp);
    assert_eq!(sig.archived_crls, 1);
    assert_eq!(sig.certificate_count, 2);
    assert!(sig.certificate_subject.as_deref().unwrap_or_default().contains("Test Signer"));

    assert_eq!(leftovers(dir.path(), &["in.pdf", "out.pdf"]), Vec::<String>::new());
}

#[test]
fn test_source_is_a_prefix_of_the_output() {
    let (_dir, source, destination) = workspace("1.7");
    let (signer, _, _) = ltv_signer();
    signer.sign(&request(&source, &destination, full_chain())).unwrap();

    let original = std::fs::read(&source).unwrap();
    let signed = std::fs::read(&destination).unwrap();
    assert!(signed.starts_with(&original));
}

#[test]
fn test_timestamp_failure_aborts_signing() {
    let (dir, source, destination) = workspace("1.7");
    let tsa = Arc::new(DownTsa::default());
    let signer = DeferredSigner::new(config())
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(tsa.clone());

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    assert!(matches!(err.source, Error::Timestamp(_)));
    assert_eq!(tsa.calls.load(Ordering::SeqCst), 3);

    assert!(!destination.exists());
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

#[test]
fn test_leaf_only_chain_with_fixed_signature() {
    let (dir, source, destination) = workspace("1.7");
    let revocation = Arc::new(StaticRevocation::default());
    let signer = DeferredSigner::new(config())
        .with_revocation_client(revocation.clone())
        .with_timestamp_client(Arc::new(FakeTsa::default()));
    let request = SigningRequest::new(&source, &destination, Arc::new(FixedSignature), vec![SIGNER_DER.to_vec()]).unwrap();

    let report = signer.sign(&request).unwrap();
    assert_eq!(report.state, PipelineState::Finalized);
    assert_eq!(revocation.calls(), 1);

    let signed = std::fs::read(&destination).unwrap();
    let open = report.reservation.contents_offset;
    assert_eq!(signed[open], b'<');
    let close = open + report.reservation.slot_len() - 1;
    assert_eq!(signed[close], b'>');
    let slot: Vec<u8> = signed[open + 1..close]
        .chunks(2)
        .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
        .collect();
    assert_eq!(slot.len(), report.reservation.capacity);
    let (structure, padding) = slot.split_at(report.structure_len);
    assert!(padding.iter().all(|&b| b == 0));

    let content_info = cms::decode_content_info(structure).unwrap();
    let signed_data = cms::signed_data(&content_info).unwrap();
    let signer_info = cms::first_signer(&signed_data).unwrap();
    assert_eq!(signer_info.signature.as_bytes(), &[0x5a; 256][..]);
    assert_eq!(cms::archived_crls(signer_info).unwrap(), vec![crl_entry()]);
    assert!(cms::timestamp_token(signer_info).unwrap().is_some());

    let mut verifier = SignatureVerifier::new(signed).unwrap();
    assert_eq!(verifier.dss_crls().unwrap(), vec![crl_entry()]);
    let sig = &verifier.inspect().unwrap()[0];
    assert!(sig.digest_matches);
    assert_eq!(sig.certificate_count, 1);

    assert_eq!(leftovers(dir.path(), &["in.pdf", "out.pdf"]), Vec::<String>::new());
}

/// Answers with a response it cannot decode.
#[derive(Default)]
struct GarbledTsa {
    calls: std::sync::atomic::AtomicUsize,
}

impl TimestampClient for GarbledTsa {
    fn request(&self, _signature_value: &[u8], _algorithm: DigestAlgorithm) -> pdf_ltv_sign::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Encoding("bad PKIStatus".to_string()))
    }
}

#[test]
fn test_undecodable_timestamp_response_is_a_timestamp_failure() {
    let (dir, source, destination) = workspace("1.7");
    let tsa = Arc::new(GarbledTsa::default());
    let signer = DeferredSigner::new(config())
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(tsa.clone());

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    assert!(matches!(err.source, Error::Timestamp(ref m) if m.contains("bad PKIStatus")));
    assert_eq!(tsa.calls.load(Ordering::SeqCst), 1);

    assert!(!destination.exists());
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

/// Issues a token for data other than the signature value.
struct MismatchedTsa;

impl TimestampClient for MismatchedTsa {
    fn request(&self, _signature_value: &[u8], algorithm: DigestAlgorithm) -> pdf_ltv_sign::Result<Vec<u8>> {
        Ok(fake_token(b"something else", algorithm))
    }
}

#[test]
fn test_mismatched_token_is_a_timestamp_failure() {
    let (_dir, source, destination) = workspace("1.7");
    let signer = DeferredSigner::new(config())
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(Arc::new(MismatchedTsa));

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    assert!(matches!(err.source, Error::Timestamp(_)));
    assert!(!destination.exists());
}

#[test]
fn test_best_effort_timestamp_signs_without_token() {
    let (_dir, source, destination) = workspace("1.7");
    let signer = DeferredSigner::new(config().with_timestamp_policy(TimestampPolicy::BestEffort))
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(Arc::new(DownTsa::default()));

    let report = signer.sign(&request(&source, &destination, full_chain())).unwrap();
    assert!(!report.timestamp_embedded);

    let mut verifier = SignatureVerifier::new(std::fs::read(&destination).unwrap()).unwrap();
    let sig = &verifier.inspect().unwrap()[0];
    assert!(!sig.has_timestamp);
    assert!(sig.digest_matches);
}

#[test]
fn test_missing_timestamp_client_is_an_error_when_required() {
    let (_dir, source, destination) = workspace("1.7");
    let signer = DeferredSigner::new(config());

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    assert!(matches!(err.source, Error::Timestamp(_)));
    assert!(!destination.exists());
}

#[test]
fn test_unreachable_revocation_fails_closed() {
    let (dir, source, destination) = workspace("1.7");
    let signer = DeferredSigner::new(config())
        .with_revocation_client(Arc::new(OfflineRevocation))
        .with_timestamp_client(Arc::new(FakeTsa::default()));

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::ReservationFailed);
    assert!(matches!(err.source, Error::RevocationFetch(_)));
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

#[test]
fn test_unreachable_revocation_degrades_to_plain_signature() {
    let (_dir, source, destination) = workspace("1.7");
    let signer = DeferredSigner::new(config().with_revocation_policy(RevocationPolicy::DegradeToNoLtv))
        .with_revocation_client(Arc::new(OfflineRevocation))
        .with_timestamp_client(Arc::new(FakeTsa::default()));

    let report = signer.sign(&request(&source, &destination, full_chain())).unwrap();
    assert_eq!(report.revocation_entries, 0);

    let mut verifier = SignatureVerifier::new(std::fs::read(&destination).unwrap()).unwrap();
    assert!(verifier.dss_crls().unwrap().is_empty());
    assert_eq!(verifier.inspect().unwrap()[0].archived_crls, 0);

    let mut doc = PdfDocument::from_bytes(std::fs::read(&destination).unwrap()).unwrap();
    assert!(doc.catalog().unwrap().get("DSS").is_none());
}

#[test]
fn test_undersized_reservation_is_reported() {
    let (dir, source, destination) = workspace("1.7");
    let mut cfg = config();
    cfg.capacity.base_overhead = 64;
    cfg.capacity.timestamp_margin = 0;
    let signer = DeferredSigner::new(cfg)
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(Arc::new(FakeTsa::default()));

    let err = signer.sign(&request(&source, &destination, full_chain())).unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    match err.source {
        Error::ReservationSize { required, capacity } => assert!(required > capacity),
        other => panic!("expected ReservationSize, got {:?}", other),
    }
    assert!(!destination.exists());
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

#[test]
fn test_extension_marker_follows_version() {
    let (signer, _, _) = ltv_signer();

    for (version, expect_marker) in [("1.4", true), ("2.0", false)] {
        let (_dir, source, destination) = workspace(version);
        signer.sign(&request(&source, &destination, full_chain())).unwrap();

        let mut doc = PdfDocument::from_bytes(std::fs::read(&destination).unwrap()).unwrap();
        let catalog = doc.catalog().unwrap();
        let level = catalog
            .get("Extensions")
            .and_then(Object::as_dict)
            .and_then(|ext| ext.get("ADBE"))
            .and_then(Object::as_dict)
            .and_then(|adbe| adbe.get("ExtensionLevel"))
            .and_then(Object::as_integer);
        assert_eq!(level.is_some(), expect_marker, "PDF {}", version);
        if expect_marker {
            assert_eq!(level, Some(5));
        }
    }
}

#[test]
fn test_cancelled_request_writes_nothing() {
    let (dir, source, destination) = workspace("1.7");
    let (signer, revocation, _) = ltv_signer();
    let token = CancellationToken::new();
    token.cancel();

    let err = signer
        .sign(&request(&source, &destination, full_chain()).with_cancellation(token))
        .unwrap_err();
    assert_eq!(err.state, PipelineState::ReservationFailed);
    assert!(matches!(err.source, Error::Cancelled));
    assert_eq!(revocation.calls(), 0);
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

/// Cancels the request while the timestamp is being fetched.
struct CancellingTsa(CancellationToken);

impl TimestampClient for CancellingTsa {
    fn request(&self, signature_value: &[u8], algorithm: DigestAlgorithm) -> pdf_ltv_sign::Result<Vec<u8>> {
        self.0.cancel();
        Ok(fake_token(signature_value, algorithm))
    }
}

#[test]
fn test_cancellation_after_signing_removes_intermediate() {
    let (dir, source, destination) = workspace("1.7");
    let token = CancellationToken::new();
    let signer = DeferredSigner::new(config())
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(Arc::new(CancellingTsa(token.clone())));

    let err = signer
        .sign(&request(&source, &destination, full_chain()).with_cancellation(token))
        .unwrap_err();
    assert_eq!(err.state, PipelineState::SigningFailed);
    assert!(matches!(err.source, Error::Cancelled));
    assert!(!destination.exists());
    assert_eq!(leftovers(dir.path(), &["in.pdf"]), Vec::<String>::new());
}

#[test]
fn test_intermediate_goes_to_work_dir() {
    let (dir, source, destination) = workspace("1.7");
    let work = TempDir::new().unwrap();
    let signer = DeferredSigner::new(config().with_work_dir(work.path()))
        .with_revocation_client(Arc::new(StaticRevocation::default()))
        .with_timestamp_client(Arc::new(FakeTsa::default()));

    let report = signer.sign(&request(&source, &destination, full_chain())).unwrap();
    assert!(report.intermediate_removed);
    assert_eq!(leftovers(work.path(), &[]), Vec::<String>::new());
    assert_eq!(leftovers(dir.path(), &["in.pdf", "out.pdf"]), Vec::<String>::new());
}

#[test]
fn test_metadata_written_to_signature_dictionary() {
    let (_dir, source, destination) = workspace("1.7");
    let (signer, _, _) = ltv_signer();
    let metadata = SignatureMetadata::default()
        .with_name("Test Signer")
        .with_reason("Approved")
        .with_location("Lab");

    signer
        .sign(&request(&source, &destination, full_chain()).with_metadata(metadata))
        .unwrap();

    let mut verifier = SignatureVerifier::new(std::fs::read(&destination).unwrap()).unwrap();
    let sig = &verifier.inspect().unwrap()[0];
    assert_eq!(sig.signer_name.as_deref(), Some("Test Signer"));
    assert_eq!(sig.reason.as_deref(), Some("Approved"));
    assert_eq!(sig.location.as_deref(), Some("Lab"));
    assert!(sig.signing_time.as_deref().unwrap_or_default().starts_with("D:"));
}

#[test]
fn test_signing_twice_keeps_first_signature() {
    let (dir, source, destination) = workspace("1.7");
    let (signer, _, _) = ltv_signer();
    signer.sign(&request(&source, &destination, full_chain())).unwrap();

    let second = dir.path().join("out2.pdf");
    signer.sign(&request(&destination, &second, full_chain())).unwrap();

    let mut verifier = SignatureVerifier::new(std::fs::read(&second).unwrap()).unwrap();
    let signatures = verifier.inspect().unwrap();
    assert_eq!(signatures.len(), 2);
    assert!(signatures.iter().all(|s| s.digest_matches));
    assert_eq!(signatures.iter().filter(|s| s.covers_whole_document).count(), 1);
    assert_ne!(signatures[0].field_name, signatures[1].field_name);
    assert_eq!(verifier.dss_crls().unwrap().len(), 2);
}

#[test]
fn test_concurrent_requests_are_independent() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.pdf");
    std::fs::write(&source, sample_pdf("1.7", "")).unwrap();
    let (signer, revocation, _) = ltv_signer();
    let signer = Arc::new(signer);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let signer = Arc::clone(&signer);
            let source = source.clone();
            let destination = dir.path().join(format!("out{}.pdf", i));
            thread::spawn(move || {
                let report = signer.sign(&request(&source, &destination, full_chain())).unwrap();
                (destination, report.reservation.slot_name)
            })
        })
        .collect();

    let mut slots = Vec::new();
    for handle in handles {
        let (destination, slot) = handle.join().unwrap();
        let mut verifier = SignatureVerifier::new(std::fs::read(&destination).unwrap()).unwrap();
        assert!(verifier.inspect().unwrap()[0].digest_matches);
        slots.push(slot);
    }
    slots.sort();
    slots.dedup();
    assert_eq!(slots.len(), 4);
    assert_eq!(revocation.calls(), 4);
}
