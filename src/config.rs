//! Configuration for the signing pipeline.
//!
//! [`SignerConfig`] can be built in code with the `with_*` methods or loaded
//! from JSON. Durations are given in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::signatures::{DigestAlgorithm, SignatureSubFilter};

/// What to do when revocation evidence cannot be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationPolicy {
    /// Abort signing
    #[default]
    FailClosed,
    /// Continue without (some) revocation evidence and log a warning
    DegradeToNoLtv,
}

/// What to do when no timestamp token can be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampPolicy {
    /// Abort signing
    #[default]
    Required,
    /// Embed the signature without a timestamp and log a warning
    BestEffort,
}

/// Bounded retry for network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Fixed pause between attempts, in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Pause between attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Terms of the signature size estimate.
///
/// `capacity = base_overhead + Σ len(cert) + Σ (len(entry) + per_entry_overhead) + timestamp_margin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Fixed allowance for the CMS envelope, attributes and signature value
    pub base_overhead: usize,
    /// Encoding overhead added per revocation entry
    pub per_entry_overhead: usize,
    /// Allowance for the timestamp token
    pub timestamp_margin: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            base_overhead: 8192,
            per_entry_overhead: 16,
            timestamp_margin: 4096,
        }
    }
}

/// Signing pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Signature size estimate terms
    pub capacity: CapacityConfig,
    /// Behavior on revocation retrieval failure
    pub revocation_policy: RevocationPolicy,
    /// Behavior on timestamp failure
    pub timestamp_policy: TimestampPolicy,
    /// Retry for revocation and timestamp requests
    pub retry: RetryPolicy,
    /// Also fetch evidence for intermediate certificates
    pub include_chain_revocation: bool,
    /// Directory for intermediate documents (defaults to the destination directory)
    pub work_dir: Option<PathBuf>,
    /// Digest used for the document and signed attributes
    pub digest_algorithm: DigestAlgorithm,
    /// `/SubFilter` written into the signature dictionary
    pub sub_filter: SignatureSubFilter,
    /// Timeout for HTTP clients, in milliseconds
    pub http_timeout_ms: u64,
    /// Timestamp authority URL used by the HTTP client
    pub tsa_url: Option<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SignerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self {
            capacity: CapacityConfig::default(),
            revocation_policy: RevocationPolicy::FailClosed,
            timestamp_policy: TimestampPolicy::Required,
            retry: RetryPolicy::default(),
            include_chain_revocation: true,
            work_dir: None,
            digest_algorithm: DigestAlgorithm::Sha256,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            http_timeout_ms: 10_000,
            tsa_url: None,
        }
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.capacity.base_overhead == 0 {
            return Err(Error::Config("capacity.base_overhead must be positive".to_string()));
        }
        Ok(())
    }

    /// HTTP client timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Set the capacity estimate terms.
    pub fn with_capacity(mut self, capacity: CapacityConfig) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the revocation policy.
    pub fn with_revocation_policy(mut self, policy: RevocationPolicy) -> Self {
        self.revocation_policy = policy;
        self
    }

    /// Set the timestamp policy.
    pub fn with_timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp_policy = policy;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable evidence retrieval for intermediates.
    pub fn with_chain_revocation(mut self, enable: bool) -> Self {
        self.include_chain_revocation = enable;
        self
    }

    /// Set the directory for intermediate documents.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Set the digest algorithm.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the signature sub-filter.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Set the timestamp authority URL.
    pub fn with_tsa_url(mut self, url: impl Into<String>) -> Self {
        self.tsa_url = Some(url.into());
        self
    }
}
