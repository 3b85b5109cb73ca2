//! CRL download from the certificate's distribution points.

use std::time::Duration;

use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};
use crate::signatures::RevocationClient;

/// URIs from the CRL distribution points extension.
pub fn crl_distribution_points(certificate: &[u8]) -> Result<Vec<String>> {
    let (_, cert) = X509Certificate::from_der(certificate)
        .map_err(|e| Error::RevocationFetch(format!("unreadable certificate: {}", e)))?;

    let mut urls = Vec::new();
    for extension in cert.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = extension.parsed_extension() {
            for point in points.iter() {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name {
                            urls.push(uri.to_string());
                        }
                    }
                }
            }
        }
    }
    Ok(urls)
}

/// Downloads CRLs over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCrlClient {
    client: reqwest::blocking::Client,
}

impl HttpCrlClient {
    /// Create a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: super::build_client(timeout)?,
        })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("Downloading CRL from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Network(format!("CRL download from {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(super::status_error(url, response.status(), Error::RevocationFetch));
        }
        let body = response
            .bytes()
            .map_err(|e| Error::Network(format!("reading CRL from {} failed: {}", url, e)))?;
        decode_crl(&body)
    }
}

/// Accept DER or a PEM `X509 CRL` block.
fn decode_crl(body: &[u8]) -> Result<Vec<u8>> {
    if body.starts_with(b"-----BEGIN") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(body)
            .map_err(|e| Error::RevocationFetch(format!("malformed PEM CRL: {}", e)))?;
        return Ok(pem.contents);
    }
    match body.first() {
        Some(0x30) => Ok(body.to_vec()),
        _ => Err(Error::RevocationFetch("response is not a DER or PEM CRL".to_string())),
    }
}

impl RevocationClient for HttpCrlClient {
    fn fetch(&self, certificate: &[u8], _issuer: Option<&[u8]>) -> Result<Vec<Vec<u8>>> {
        let urls = crl_distribution_points(certificate)?;
        let http: Vec<&String> = urls
            .iter()
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .collect();
        if http.is_empty() {
            log::info!("Certificate has no HTTP CRL distribution point");
            return Ok(Vec::new());
        }

        // One CRL per certificate; later points are mirrors
        let mut last_error = None;
        for url in http {
            match self.download(url) {
                Ok(crl) => return Ok(vec![crl]),
                Err(e) => {
                    log::debug!("CRL distribution point {} failed: {}", url, e);
                    last_error = Some(e);
                },
            }
        }
        Err(last_error.unwrap_or_else(|| Error::RevocationFetch("no CRL retrieved".to_string())))
    }
}
