//! The external signing capability.
//!
//! The pipeline never touches key material. It hands the DER of the signed
//! attributes to a [`SigningCapability`] and gets raw signature bytes back;
//! a remote custodian, an HSM bridge or the local [`RsaKeyCapability`] all
//! sit behind the same trait.

use std::path::Path;

use der::asn1::Any;
use der::Encode;
use pkcs1::DecodeRsaPrivateKey;
use pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::pkcs1v15::SigningKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer};
use spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::error::{Error, Result};

use super::cms::oids;
use super::types::DigestAlgorithm;

/// Produces signatures on behalf of a key holder.
pub trait SigningCapability: Send + Sync {
    /// Signature algorithm identifier for the given digest, as written to
    /// `SignerInfo.signatureAlgorithm`.
    fn signature_algorithm(&self, digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned>;

    /// Sign `data` (the DER of the signed attributes), hashing it with `digest`.
    fn sign(&self, data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// RSA PKCS#1 v1.5 signing with a key held in memory.
pub struct RsaKeyCapability {
    key: RsaPrivateKey,
}

impl RsaKeyCapability {
    /// Wrap an RSA private key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Load a PEM key, PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = if pem.contains("BEGIN RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| Error::SigningCapability(format!("PKCS#1 key: {}", e)))?
        } else {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| Error::SigningCapability(format!("PKCS#8 key: {}", e)))?
        };
        Ok(Self::new(key))
    }

    /// Load a DER key, trying PKCS#8 first and PKCS#1 second.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_der(der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(der))
            .map_err(|e| Error::SigningCapability(format!("unreadable RSA key: {}", e)))?;
        Ok(Self::new(key))
    }

    /// Load a key file, PEM or DER.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        match std::str::from_utf8(&bytes) {
            Ok(text) if text.contains("-----BEGIN") => Self::from_pem(text),
            _ => Self::from_der(&bytes),
        }
    }

    /// Whether the key pairs with the certificate's subject public key.
    pub fn matches_certificate(&self, certificate: &Certificate) -> Result<bool> {
        let public = RsaPublicKey::from(&self.key)
            .to_public_key_der()
            .map_err(|e| Error::Encoding(e.to_string()))?;
        let cert_spki = certificate.tbs_certificate.subject_public_key_info.to_der()?;
        Ok(public.as_bytes() == cert_spki.as_slice())
    }

    fn sign_with<D>(&self, data: &[u8]) -> Result<Vec<u8>>
    where
        D: sha2::Digest + der::oid::AssociatedOid,
    {
        let signer = SigningKey::<D>::new(self.key.clone());
        let signature = signer
            .try_sign(data)
            .map_err(|e| Error::SigningCapability(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

impl std::fmt::Debug for RsaKeyCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use rsa::traits::PublicKeyParts;
        write!(f, "RsaKeyCapability({} bits)", self.key.n().bits())
    }
}

impl SigningCapability for RsaKeyCapability {
    fn signature_algorithm(&self, digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
        let oid = match digest {
            DigestAlgorithm::Sha1 => oids::SHA1_WITH_RSA,
            DigestAlgorithm::Sha256 => oids::SHA256_WITH_RSA,
            DigestAlgorithm::Sha384 => oids::SHA384_WITH_RSA,
            DigestAlgorithm::Sha512 => oids::SHA512_WITH_RSA,
        };
        Ok(AlgorithmIdentifierOwned {
            oid,
            parameters: Some(Any::null()),
        })
    }

    fn sign(&self, data: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
        match digest {
            DigestAlgorithm::Sha1 => self.sign_with::<Sha1>(data),
            DigestAlgorithm::Sha256 => self.sign_with::<Sha256>(data),
            DigestAlgorithm::Sha384 => self.sign_with::<Sha384>(data),
            DigestAlgorithm::Sha512 => self.sign_with::<Sha512>(data),
        }
    }
}
