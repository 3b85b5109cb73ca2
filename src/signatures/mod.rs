//! Deferred long-term-validation signatures.
//!
//! Signing runs in two phases. The reservation phase appends an incremental
//! update with an empty signature slot sized by estimate, plus the DSS with
//! the collected revocation evidence. The signing phase digests the reserved
//! byte ranges, obtains a signature from a [`SigningCapability`], timestamps
//! it and writes the CMS structure into the slot without moving any byte.
//!
//! ## Signature format
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached)
//! - PAdES signatures (ETSI.CAdES.detached)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pdf_ltv_sign::signatures::{DeferredSigner, RsaKeyCapability, SigningRequest};
//! use pdf_ltv_sign::SignerConfig;
//!
//! let key = Arc::new(RsaKeyCapability::from_file("signer.key")?);
//! let request = SigningRequest::new("in.pdf", "out.pdf", key, vec![leaf_der])?;
//! let report = DeferredSigner::new(SignerConfig::default())
//!     .with_timestamp_client(tsa)
//!     .sign(&request)?;
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142-1 - PAdES, document security store
//! - RFC 5652 (CMS), RFC 3161 (timestamps)

mod assembler;
mod byterange;
mod capability;
pub mod cms;
mod contents;
mod digest;
mod insert;
mod pipeline;
mod reserve;
mod revocation;
pub mod timestamp;
mod types;
mod verifier;

pub use assembler::{AssemblyInput, SignatureAssembler};
pub use byterange::{ByteRangeCalculator, BYTE_RANGE_WIDTH};
pub use capability::{RsaKeyCapability, SigningCapability};
pub use contents::{estimate_capacity, SignatureContents};
pub use digest::{digest_reservation, hash, DigestClient, Sha2Digester};
pub use insert::{finalize, locate_slot, write_atomically};
pub use pipeline::{
    CancellationToken, DeferredSigner, IntermediateArtifact, PipelineState, SigningContext, SigningRequest,
};
pub use reserve::{reserve, ReservationParams};
pub use revocation::{RevocationClient, RevocationCollector};
pub use timestamp::TimestampClient;
pub use types::{
    DigestAlgorithm, PlaceholderReservation, RevocationEntry, RevocationKind, RevocationStore, SignatureInfo,
    SignatureMetadata, SignatureStructure, SignatureSubFilter, SigningReport,
};
pub use verifier::SignatureVerifier;
