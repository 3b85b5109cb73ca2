//! Tests for the individual signing phases driven by hand.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use der::Decode;
use proptest::prelude::*;
use x509_cert::Certificate;

use pdf_ltv_sign::signatures::{
    digest_reservation, estimate_capacity, finalize, locate_slot, reserve, AssemblyInput, DigestAlgorithm,
    ReservationParams, RevocationEntry, RevocationKind, RevocationStore, Sha2Digester, SignatureAssembler,
    SignatureMetadata, SignatureSubFilter, SignatureVerifier, TimestampClient,
};
use pdf_ltv_sign::{CapacityConfig, Error, TimestampPolicy};

/// DER SEQUENCE with `content` bytes of payload.
fn der_sequence(content: usize) -> Vec<u8> {
    let mut out = vec![0x30];
    if content < 128 {
        out.push(content as u8);
    } else if content < 256 {
        out.extend_from_slice(&[0x81, content as u8]);
    } else {
        out.extend_from_slice(&[0x82, (content >> 8) as u8, content as u8]);
    }
    out.extend(std::iter::repeat(0xa5).take(content));
    out
}

fn store(entries: &[Vec<u8>]) -> RevocationStore {
    let mut store = RevocationStore::new();
    for entry in entries {
        store.push(RevocationKind::Crl, RevocationEntry(entry.clone()));
    }
    store
}

fn chain() -> (Vec<Vec<u8>>, Vec<Certificate>) {
    let der = vec![SIGNER_DER.to_vec(), CA_DER.to_vec()];
    let parsed = der.iter().map(|d| Certificate::from_der(d).unwrap()).collect();
    (der, parsed)
}

/// Run both phases by hand. Returns the intermediate and the final bytes.
fn sign_in_phases(entries: &[Vec<u8>], capacity: Option<usize>) -> pdf_ltv_sign::Result<(Vec<u8>, Vec<u8>, usize)> {
    let (chain_der, chain) = chain();
    let revocation = store(entries);
    let metadata = SignatureMetadata::default().with_signing_time(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
    let cfg = config();
    let capacity = capacity.unwrap_or_else(|| estimate_capacity(&cfg.capacity, &chain_der, &revocation));

    let (intermediate, reservation) = reserve(
        &sample_pdf("1.7", ""),
        &ReservationParams {
            slot_name: "Signature1",
            metadata: &metadata,
            revocation: &revocation,
            capacity,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
        },
    )?;
    assert_eq!(locate_slot(&intermediate, "Signature1")?, reservation.contents_offset);

    let digest = digest_reservation(&Sha2Digester, DigestAlgorithm::Sha256, &intermediate, &reservation)?;
    let tsa = FakeTsa::default();
    let structure = SignatureAssembler::new(&FixedSignature, Some(&tsa as &dyn TimestampClient), &cfg).assemble(&AssemblyInput {
        message_digest: &digest,
        chain: &chain,
        signer_der: &chain_der[0],
        signing_time: metadata.signing_time,
        revocation: &revocation,
        capacity,
    })?;

    let signed = finalize(&intermediate, &reservation, &structure)?;
    Ok((intermediate, signed, reservation.contents_offset))
}

#[test]
fn test_only_contents_digits_change() {
    let (intermediate, signed, contents_offset) = sign_in_phases(&[crl_entry()], None).unwrap();
    assert_eq!(intermediate.len(), signed.len());

    let end = intermediate[contents_offset..].iter().position(|&b| b == b'>').unwrap() + contents_offset + 1;
    assert_eq!(&intermediate[..=contents_offset], &signed[..=contents_offset]);
    assert_eq!(&intermediate[end - 1..], &signed[end - 1..]);
    assert_ne!(&intermediate[contents_offset..end], &signed[contents_offset..end]);

    let mut verifier = SignatureVerifier::new(signed).unwrap();
    let sig = &verifier.inspect().unwrap()[0];
    assert!(sig.digest_matches);
    assert!(sig.covers_whole_document);
}

#[test]
fn test_entry_appears_in_dss_and_signature() {
    let (_, signed, _) = sign_in_phases(&[crl_entry()], None).unwrap();
    let mut verifier = SignatureVerifier::new(signed).unwrap();
    assert_eq!(verifier.dss_crls().unwrap(), vec![crl_entry()]);
    assert_eq!(verifier.inspect().unwrap()[0].archived_crls, 1);
}

#[test]
fn test_no_dss_without_evidence() {
    let (_, signed, _) = sign_in_phases(&[], None).unwrap();
    let mut verifier = SignatureVerifier::new(signed).unwrap();
    assert!(verifier.dss_crls().unwrap().is_empty());
    assert_eq!(verifier.inspect().unwrap()[0].archived_crls, 0);
}

#[test]
fn test_explicit_capacity_too_small() {
    match sign_in_phases(&[crl_entry()], Some(512)) {
        Err(Error::ReservationSize { required, capacity }) => {
            assert_eq!(capacity, 512);
            assert!(required > 512);
        },
        other => panic!("expected ReservationSize, got {:?}", other.map(|r| r.2)),
    }
}

#[test]
fn test_estimate_terms() {
    let (chain_der, _) = chain();
    let certs: usize = chain_der.iter().map(Vec::len).sum();
    let capacity = CapacityConfig::default();

    assert_eq!(estimate_capacity(&capacity, &chain_der, &store(&[])), 8192 + certs + 4096);
    assert_eq!(
        estimate_capacity(&capacity, &chain_der, &store(&[crl_entry()])),
        8192 + certs + 120 + 16 + 4096
    );
}

#[test]
fn test_config_json_policy_names() {
    let cfg = pdf_ltv_sign::SignerConfig::from_json(r#"{ "timestamp_policy": "best-effort" }"#).unwrap();
    assert_eq!(cfg.timestamp_policy, TimestampPolicy::BestEffort);
    assert_eq!(cfg.capacity, CapacityConfig::default());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_estimate_holds_the_structure(sizes in proptest::collection::vec(16usize..3000, 0..4)) {
        let entries: Vec<Vec<u8>> = sizes.into_iter().map(der_sequence).collect();
        let (intermediate, signed, _) = sign_in_phases(&entries, None).unwrap();
        prop_assert_eq!(intermediate.len(), signed.len());

        let mut verifier = SignatureVerifier::new(signed).unwrap();
        prop_assert_eq!(verifier.dss_crls().unwrap(), entries.clone());
        let sig = &verifier.inspect().unwrap()[0];
        prop_assert!(sig.digest_matches);
        prop_assert_eq!(sig.archived_crls, entries.len());
    }
}
