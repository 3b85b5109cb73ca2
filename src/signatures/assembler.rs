//! Assembly of the final signature structure.
//!
//! Takes the document digest, signs the attribute set through the
//! [`SigningCapability`], attaches a timestamp over the signature value and
//! encodes the detached CMS structure, refusing anything larger than the
//! reserved capacity.

use chrono::{DateTime, Utc};
use x509_cert::Certificate;

use crate::config::{RetryPolicy, SignerConfig, TimestampPolicy};
use crate::error::{Error, Result};
use crate::retry::{classify, with_retry};

use super::capability::SigningCapability;
use super::cms::{self, SignedDataParts};
use super::timestamp::{self, TimestampClient};
use super::types::{DigestAlgorithm, RevocationStore, SignatureStructure};

/// Inputs bound into one signature structure.
pub struct AssemblyInput<'a> {
    /// Digest of the reserved byte ranges
    pub message_digest: &'a [u8],
    /// Parsed certificate chain, signer first
    pub chain: &'a [Certificate],
    /// DER of the signer certificate
    pub signer_der: &'a [u8],
    /// Value of the signing-time attribute
    pub signing_time: DateTime<Utc>,
    /// Evidence referenced by the signed attributes
    pub revocation: &'a RevocationStore,
    /// Reserved capacity of the slot
    pub capacity: usize,
}

/// Builds [`SignatureStructure`]s.
pub struct SignatureAssembler<'a> {
    capability: &'a dyn SigningCapability,
    timestamp_client: Option<&'a dyn TimestampClient>,
    digest_algorithm: DigestAlgorithm,
    timestamp_policy: TimestampPolicy,
    retry: RetryPolicy,
}

impl<'a> SignatureAssembler<'a> {
    /// Create an assembler for one request.
    pub fn new(
        capability: &'a dyn SigningCapability,
        timestamp_client: Option<&'a dyn TimestampClient>,
        config: &SignerConfig,
    ) -> Self {
        Self {
            capability,
            timestamp_client,
            digest_algorithm: config.digest_algorithm,
            timestamp_policy: config.timestamp_policy,
            retry: config.retry,
        }
    }

    /// Sign and encode.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<SignatureStructure> {
        if input.message_digest.len() != self.digest_algorithm.output_len() {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{}-byte digest does not match {}",
                input.message_digest.len(),
                self.digest_algorithm.name()
            )));
        }

        let signed_attrs = cms::build_signed_attributes(
            self.digest_algorithm,
            input.message_digest,
            input.signing_time,
            input.signer_der,
            input.revocation,
        )?;
        let to_sign = cms::signed_attributes_der(&signed_attrs)?;

        let signature_algorithm = self.capability.signature_algorithm(self.digest_algorithm)?;
        let signature = self.capability.sign(&to_sign, self.digest_algorithm)?;
        if signature.is_empty() {
            return Err(Error::SigningCapability("capability returned an empty signature".to_string()));
        }
        log::debug!("Signing capability returned {} bytes", signature.len());

        let token = self.timestamp(&signature)?;
        let timestamp_embedded = token.is_some();
        let unsigned_attrs = match token {
            Some(token) => vec![cms::timestamp_attribute(&token)?],
            None => Vec::new(),
        };

        let der = cms::build_content_info(SignedDataParts {
            digest_alg: self.digest_algorithm,
            chain: input.chain,
            signed_attrs,
            signature_algorithm,
            signature: &signature,
            unsigned_attrs,
        })?;

        if der.len() > input.capacity {
            return Err(Error::ReservationSize {
                required: der.len(),
                capacity: input.capacity,
            });
        }
        log::debug!("Signature structure: {} of {} reserved bytes", der.len(), input.capacity);

        Ok(SignatureStructure {
            der,
            timestamp_embedded,
            revocation_entries: input.revocation.len(),
        })
    }

    /// Obtain and check a token for `signature`, honoring the policy.
    fn timestamp(&self, signature: &[u8]) -> Result<Option<Vec<u8>>> {
        let result = match self.timestamp_client {
            Some(client) => with_retry(&self.retry, "timestamp request", || {
                client.request(signature, self.digest_algorithm)
            })
            .and_then(|token| {
                timestamp::verify_token(&token, signature, self.digest_algorithm)?;
                Ok(token)
            })
            .map_err(|e| classify(e, Error::Timestamp)),
            None => Err(Error::Timestamp("no timestamp authority configured".to_string())),
        };

        match (result, self.timestamp_policy) {
            (Ok(token), _) => Ok(Some(token)),
            (Err(e), TimestampPolicy::Required) => Err(e),
            (Err(e), TimestampPolicy::BestEffort) => {
                log::warn!("Continuing without a timestamp: {}", e);
                Ok(None)
            },
        }
    }
}
