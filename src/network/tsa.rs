//! RFC 3161 timestamp requests over HTTP.

use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::signatures::timestamp::{encode_request, parse_response, verify_nonce};
use crate::signatures::{DigestAlgorithm, TimestampClient};

/// Timestamp authority reached over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTimestampClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpTimestampClient {
    /// Create a client for the authority at `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("TSA URL must be http(s): {}", url)));
        }
        Ok(Self {
            url,
            client: super::build_client(timeout)?,
        })
    }

    /// Authority URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TimestampClient for HttpTimestampClient {
    fn request(&self, signature_value: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let nonce = Uuid::new_v4().as_u64_pair().0 >> 1;
        let body = encode_request(signature_value, algorithm, Some(nonce))?;

        log::debug!("Requesting timestamp from {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/timestamp-query")
            .header("Accept", "application/timestamp-reply")
            .body(body)
            .send()
            .map_err(|e| Error::Network(format!("TSA request to {} failed: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(super::status_error(&self.url, response.status(), Error::Timestamp));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::Network(format!("reading TSA response failed: {}", e)))?;
        let token = parse_response(&bytes)?;
        verify_nonce(&token, nonce)?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_url() {
        let err = HttpTimestampClient::new("ldap://tsa.example.test", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let client = HttpTimestampClient::new("https://tsa.example.test/tsr", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url(), "https://tsa.example.test/tsr");
    }
}
