//! HTTP clients for revocation and timestamp retrieval.
//!
//! Both clients are blocking, carry the configured timeout and report
//! transport failures as [`Error::Network`](crate::error::Error::Network) so
//! the pipeline's retry policy applies. A definitive answer from the server
//! (4xx, a rejected timestamp request) is reported with the caller's own
//! error kind and is not retried.

mod crl;
mod tsa;

pub use crl::{crl_distribution_points, HttpCrlClient};
pub use tsa::HttpTimestampClient;

use std::time::Duration;

use crate::error::{Error, Result};

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .user_agent(concat!("pdf_ltv_sign/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))
}

/// Map a non-success status: server errors may be retried, client errors not.
fn status_error(url: &str, status: reqwest::StatusCode, definitive: fn(String) -> Error) -> Error {
    let message = format!("{} returned {}", url, status);
    if status.is_server_error() {
        Error::Network(message)
    } else {
        definitive(message)
    }
}
