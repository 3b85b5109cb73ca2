//! The deferred signing pipeline.
//!
//! ```text
//! Unsigned -> Reserved -> Digested -> Signed -> Finalized
//!     |           |           |          |
//!     v           +-----------+----------+--> SigningFailed
//! ReservationFailed
//! ```
//!
//! The intermediate document lives in an [`IntermediateArtifact`] that is
//! removed on every terminal state. A removal failure is reported as
//! `CleanupFailed` in the log and never replaces the pipeline's own error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use der::Decode;
use uuid::Uuid;
use x509_cert::Certificate;

use crate::config::SignerConfig;
use crate::error::{Error, PipelineError, Result};

use super::assembler::{AssemblyInput, SignatureAssembler};
use super::capability::SigningCapability;
use super::contents::estimate_capacity;
use super::digest::{digest_reservation, DigestClient, Sha2Digester};
use super::insert::{finalize, write_atomically};
use super::reserve::{reserve, ReservationParams};
use super::revocation::{RevocationClient, RevocationCollector};
use super::timestamp::TimestampClient;
use super::types::{
    PlaceholderReservation, RevocationStore, SignatureMetadata, SignatureStructure, SigningReport,
};

/// Where a signing run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Nothing written yet
    Unsigned,
    /// Intermediate document with an empty slot exists
    Reserved,
    /// Byte-range digest computed
    Digested,
    /// Signature structure assembled
    Signed,
    /// Final document written
    Finalized,
    /// The slot could not be reserved
    ReservationFailed,
    /// Digesting, signing, timestamping or insertion failed
    SigningFailed,
    /// The intermediate document could not be removed
    CleanupFailed,
}

impl PipelineState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Finalized
                | PipelineState::ReservationFailed
                | PipelineState::SigningFailed
                | PipelineState::CleanupFailed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared flag a caller sets to stop a run between phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The intermediate document on disk, removed when dropped.
#[derive(Debug)]
pub struct IntermediateArtifact {
    path: PathBuf,
    removed: bool,
}

impl IntermediateArtifact {
    /// Write `bytes` to a fresh `<stem>.<uuid>.partial.pdf` in `dir`.
    pub fn create(dir: &Path, stem: &str, bytes: &[u8]) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{}.partial.pdf", stem, Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        log::debug!("Intermediate document at {}", path.display());
        Ok(Self { path, removed: false })
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document back.
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    /// Delete the file now.
    pub fn remove(mut self) -> Result<()> {
        self.remove_file()
    }

    fn remove_file(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Cleanup {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for IntermediateArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.remove_file() {
            log::warn!("{}: {}", PipelineState::CleanupFailed, e);
        }
    }
}

/// One document to sign.
#[derive(Clone)]
pub struct SigningRequest {
    source: PathBuf,
    destination: PathBuf,
    key: Arc<dyn SigningCapability>,
    chain_der: Vec<Vec<u8>>,
    chain: Vec<Certificate>,
    metadata: SignatureMetadata,
    slot_name: Option<String>,
    cancellation: CancellationToken,
}

impl SigningRequest {
    /// Create a request. `chain` is DER, leaf first, and must not be empty.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        key: Arc<dyn SigningCapability>,
        chain: Vec<Vec<u8>>,
    ) -> Result<Self> {
        if chain.is_empty() {
            return Err(Error::InvalidRequest("certificate chain is empty".to_string()));
        }
        let parsed = chain
            .iter()
            .enumerate()
            .map(|(i, der)| {
                Certificate::from_der(der)
                    .map_err(|e| Error::InvalidRequest(format!("certificate {} of chain: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: source.into(),
            destination: destination.into(),
            key,
            chain_der: chain,
            chain: parsed,
            metadata: SignatureMetadata::default(),
            slot_name: None,
            cancellation: CancellationToken::new(),
        })
    }

    /// Set the signature dictionary fields.
    pub fn with_metadata(mut self, metadata: SignatureMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Name the signature field instead of generating `Signature-<uuid>`.
    pub fn with_slot_name(mut self, name: impl Into<String>) -> Self {
        self.slot_name = Some(name.into());
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Source document.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Destination document.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Certificate chain as DER, leaf first.
    pub fn chain_der(&self) -> &[Vec<u8>] {
        &self.chain_der
    }

    /// Parsed certificate chain, leaf first.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.chain[0]
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("chain_len", &self.chain_der.len())
            .field("slot_name", &self.slot_name)
            .finish()
    }
}

/// Per-run state shared read-only by the phases.
#[derive(Debug)]
pub struct SigningContext<'a> {
    /// The request being served
    pub request: &'a SigningRequest,
    /// Pipeline configuration
    pub config: &'a SignerConfig,
    /// Signature dictionary fields
    pub metadata: &'a SignatureMetadata,
    /// Evidence collected before reservation
    pub revocation: RevocationStore,
    /// Field name of the slot
    pub slot_name: String,
}

/// Signs documents in two phases with externally held keys.
///
/// The signer is `Send + Sync`; concurrent calls to [`DeferredSigner::sign`]
/// run independent pipelines.
pub struct DeferredSigner {
    config: SignerConfig,
    digest: Arc<dyn DigestClient>,
    revocation: Option<Arc<dyn RevocationClient>>,
    timestamp: Option<Arc<dyn TimestampClient>>,
}

impl DeferredSigner {
    /// Create a signer with the local digester and no network clients.
    pub fn new(config: SignerConfig) -> Self {
        Self {
            config,
            digest: Arc::new(Sha2Digester),
            revocation: None,
            timestamp: None,
        }
    }

    /// Use a different digest implementation.
    pub fn with_digest_client(mut self, client: Arc<dyn DigestClient>) -> Self {
        self.digest = client;
        self
    }

    /// Collect revocation evidence through `client`.
    pub fn with_revocation_client(mut self, client: Arc<dyn RevocationClient>) -> Self {
        self.revocation = Some(client);
        self
    }

    /// Timestamp signatures through `client`.
    pub fn with_timestamp_client(mut self, client: Arc<dyn TimestampClient>) -> Self {
        self.timestamp = Some(client);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Sign `request.source()` into `request.destination()`.
    pub fn sign(&self, request: &SigningRequest) -> std::result::Result<SigningReport, PipelineError> {
        let fail = |state: PipelineState| move |e: Error| PipelineError::new(state, e);
        let mut state = PipelineState::Unsigned;
        log::debug!("{}: {}", state, request.source.display());

        request.cancellation.check().map_err(fail(PipelineState::ReservationFailed))?;
        self.config.validate().map_err(fail(PipelineState::ReservationFailed))?;

        let source = std::fs::read(&request.source)
            .map_err(Error::from)
            .map_err(fail(PipelineState::ReservationFailed))?;

        let revocation = RevocationCollector::new(self.revocation.as_deref(), &self.config)
            .collect(&request.chain_der)
            .map_err(fail(PipelineState::ReservationFailed))?;

        let context = SigningContext {
            request,
            config: &self.config,
            metadata: &request.metadata,
            revocation,
            slot_name: request
                .slot_name
                .clone()
                .unwrap_or_else(|| format!("Signature-{}", Uuid::new_v4())),
        };

        let (artifact, reservation) = self
            .reserve(&context, &source)
            .map_err(fail(PipelineState::ReservationFailed))?;
        state = transition(state, PipelineState::Reserved);

        let result = self.complete(&context, &artifact, &reservation, &mut state);

        let cleanup = artifact.remove();
        let intermediate_removed = match &cleanup {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}: {}", PipelineState::CleanupFailed, e);
                false
            },
        };

        let structure = result.map_err(|e| {
            log::debug!("{} -> {}: {}", state, PipelineState::SigningFailed, e);
            PipelineError::new(PipelineState::SigningFailed, e)
        })?;
        transition(state, PipelineState::Finalized);

        Ok(SigningReport {
            state: PipelineState::Finalized,
            destination: request.destination.clone(),
            reservation,
            structure_len: structure.len(),
            revocation_entries: structure.revocation_entries,
            timestamp_embedded: structure.timestamp_embedded,
            intermediate_removed,
        })
    }

    /// Reservation phase: size the slot and write the intermediate document.
    fn reserve(&self, context: &SigningContext<'_>, source: &[u8]) -> Result<(IntermediateArtifact, PlaceholderReservation)> {
        let capacity = estimate_capacity(&self.config.capacity, &context.request.chain_der, &context.revocation);
        log::debug!(
            "Estimated capacity {} bytes for {} revocation entries",
            capacity,
            context.revocation.len()
        );

        let (intermediate, reservation) = reserve(
            source,
            &ReservationParams {
                slot_name: &context.slot_name,
                metadata: context.metadata,
                revocation: &context.revocation,
                capacity,
                sub_filter: self.config.sub_filter,
            },
        )?;

        let work_dir = self.work_dir(context.request);
        let stem = context
            .request
            .destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let artifact = IntermediateArtifact::create(&work_dir, &stem, &intermediate)?;
        Ok((artifact, reservation))
    }

    /// Digest, sign and insert. Returns the embedded structure.
    fn complete(
        &self,
        context: &SigningContext<'_>,
        artifact: &IntermediateArtifact,
        reservation: &PlaceholderReservation,
        state: &mut PipelineState,
    ) -> Result<SignatureStructure> {
        let request = context.request;
        let algorithm = self.config.digest_algorithm;

        request.cancellation.check()?;
        let intermediate = artifact.read()?;
        let digest = digest_reservation(self.digest.as_ref(), algorithm, &intermediate, reservation)?;
        *state = transition(*state, PipelineState::Digested);

        request.cancellation.check()?;
        let assembler = SignatureAssembler::new(request.key.as_ref(), self.timestamp.as_deref(), &self.config);
        let structure = assembler.assemble(&AssemblyInput {
            message_digest: &digest,
            chain: &request.chain,
            signer_der: &request.chain_der[0],
            signing_time: context.metadata.signing_time,
            revocation: &context.revocation,
            capacity: reservation.capacity,
        })?;
        *state = transition(*state, PipelineState::Signed);

        request.cancellation.check()?;
        let signed = finalize(&intermediate, reservation, &structure)?;
        write_atomically(&request.destination, &signed)?;
        Ok(structure)
    }

    fn work_dir(&self, request: &SigningRequest) -> PathBuf {
        if let Some(dir) = &self.config.work_dir {
            return dir.clone();
        }
        match request.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl fmt::Debug for DeferredSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSigner")
            .field("config", &self.config)
            .field("revocation_client", &self.revocation.is_some())
            .field("timestamp_client", &self.timestamp.is_some())
            .finish()
    }
}

fn transition(from: PipelineState, to: PipelineState) -> PipelineState {
    log::debug!("{} -> {}", from, to);
    to
}
