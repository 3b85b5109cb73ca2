// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # pdf_ltv_sign
//!
//! Deferred, long-term-validation signing of PDF documents.
//!
//! ## Core Features
//!
//! - **Two-phase signing**: reserve a signature slot first, sign later, with
//!   the private key held by any [`SigningCapability`](signatures::SigningCapability)
//! - **Incremental updates**: the original bytes are never rewritten; the
//!   signature, widget, form and DSS objects are appended (ISO 32000-1 §7.5.6)
//! - **LTV evidence**: CRLs are embedded both in the DSS and as the
//!   `adbe-revocationInfoArchival` signed attribute
//! - **RFC 3161 timestamps**: signature timestamp tokens as unsigned attributes
//! - **Policies**: fail-closed or degrade for revocation, required or best
//!   effort for timestamps, bounded retry for transient network errors
//! - **Inspection**: read signatures back and recompute their digests
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pdf_ltv_sign::network::{HttpCrlClient, HttpTimestampClient};
//! use pdf_ltv_sign::signatures::{DeferredSigner, RsaKeyCapability, SigningRequest};
//! use pdf_ltv_sign::SignerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SignerConfig::default().with_tsa_url("https://tsa.example.test");
//! let key = Arc::new(RsaKeyCapability::from_file("signer.key")?);
//! let request = SigningRequest::new("in.pdf", "out.pdf", key, chain_der)?;
//!
//! let timeout = config.http_timeout();
//! let signer = DeferredSigner::new(config)
//!     .with_revocation_client(Arc::new(HttpCrlClient::new(timeout)?))
//!     .with_timestamp_client(Arc::new(HttpTimestampClient::new("https://tsa.example.test", timeout)?));
//! let report = signer.sign(&request)?;
//! println!("{} reserved, {} used", report.reservation.capacity, report.structure_len);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// Incremental writing
pub mod writer;

// Configuration
pub mod config;
pub mod retry;

// Deferred LTV signatures
pub mod signatures;

// HTTP revocation and timestamp clients (optional)
#[cfg(feature = "network")]
#[cfg_attr(docsrs, doc(cfg(feature = "network")))]
pub mod network;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{CapacityConfig, RetryPolicy, RevocationPolicy, SignerConfig, TimestampPolicy};
pub use document::PdfDocument;
pub use error::{Error, PipelineError, Result};
pub use signatures::{
    DeferredSigner, PipelineState, PlaceholderReservation, RevocationStore, SignatureMetadata,
    SignatureStructure, SigningReport, SigningRequest,
};
