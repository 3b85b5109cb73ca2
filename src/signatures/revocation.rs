//! Revocation evidence collection.

use crate::config::{RetryPolicy, RevocationPolicy, SignerConfig};
use crate::error::{Error, Result};
use crate::retry::{classify, with_retry};

use super::types::{RevocationEntry, RevocationKind, RevocationStore};

/// Retrieves revocation data for one certificate.
pub trait RevocationClient: Send + Sync {
    /// Fetch encoded CRLs covering `certificate` (DER).
    ///
    /// `issuer` is the next certificate of the chain when known.
    fn fetch(&self, certificate: &[u8], issuer: Option<&[u8]>) -> Result<Vec<Vec<u8>>>;
}

/// Collects revocation evidence for a certificate chain under a policy.
pub struct RevocationCollector<'a> {
    client: Option<&'a dyn RevocationClient>,
    policy: RevocationPolicy,
    retry: RetryPolicy,
    include_chain: bool,
}

impl<'a> RevocationCollector<'a> {
    /// Create a collector. `None` means revocation is not collected.
    pub fn new(client: Option<&'a dyn RevocationClient>, config: &SignerConfig) -> Self {
        Self {
            client,
            policy: config.revocation_policy,
            retry: config.retry,
            include_chain: config.include_chain_revocation,
        }
    }

    /// Indices of the chain certificates evidence is fetched for.
    ///
    /// The leaf always; intermediates when enabled; never the last
    /// certificate of a longer chain (the trust anchor).
    pub fn targets(&self, chain_len: usize) -> Vec<usize> {
        match chain_len {
            0 => Vec::new(),
            1 => vec![0],
            n if self.include_chain => (0..n - 1).collect(),
            _ => vec![0],
        }
    }

    /// Fetch evidence for `chain` (DER, leaf first).
    pub fn collect(&self, chain: &[Vec<u8>]) -> Result<RevocationStore> {
        let mut store = RevocationStore::new();
        let Some(client) = self.client else {
            log::info!("No revocation client configured; signing without revocation evidence");
            return Ok(store);
        };

        for index in self.targets(chain.len()) {
            let issuer = chain.get(index + 1).map(Vec::as_slice);
            let fetched = with_retry(&self.retry, "revocation fetch", || client.fetch(&chain[index], issuer))
                .map_err(|e| classify(e, Error::RevocationFetch));

            match fetched {
                Ok(entries) => {
                    log::debug!("Certificate {} of chain: {} revocation entries", index, entries.len());
                    for entry in entries {
                        store.push(RevocationKind::Crl, RevocationEntry(entry));
                    }
                },
                Err(e) => match self.policy {
                    RevocationPolicy::FailClosed => return Err(e),
                    RevocationPolicy::DegradeToNoLtv => {
                        log::warn!("Revocation evidence for certificate {} unavailable, continuing without it: {}", index, e);
                    },
                },
            }
        }

        log::debug!("Collected {} revocation entries", store.len());
        Ok(store)
    }
}
