//! Bounded retry for network-bound calls.

use std::{mem, thread};

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Returns the last error.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                log::warn!("{} failed (attempt {}/{}): {}; retrying", what, attempt, attempts, e);
                if !policy.backoff().is_zero() {
                    thread::sleep(policy.backoff());
                }
                attempt += 1;
            },
            Err(e) => {
                if attempt > 1 {
                    log::debug!("{} gave up after {} attempts", what, attempt);
                }
                return Err(e);
            },
        }
    }
}

/// Map a final error to the caller's error kind.
///
/// Errors already of that kind pass through; transport errors keep their
/// message and anything else is wrapped with its display text.
pub fn classify(err: Error, wrap: fn(String) -> Error) -> Error {
    match err {
        Error::Network(msg) => wrap(msg),
        other if mem::discriminant(&other) == mem::discriminant(&wrap(String::new())) => other,
        other => wrap(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            backoff_ms: 0,
        }
    }

    #[test]
    fn test_retries_network_errors_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(3), "fetch", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::Network("connection reset".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_stops_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&fast(2), "fetch", || {
            calls.set(calls.get() + 1);
            Err(Error::Network("timeout".to_string()))
        });
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_does_not_retry_other_errors() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(&fast(5), "sign", || {
            calls.set(calls.get() + 1);
            Err(Error::SigningCapability("key locked".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_classify_maps_into_caller_kind() {
        let mapped = classify(Error::Network("down".to_string()), Error::Timestamp);
        assert!(matches!(mapped, Error::Timestamp(m) if m == "down"));

        let kept = classify(Error::Timestamp("rejected".to_string()), Error::Timestamp);
        assert!(matches!(kept, Error::Timestamp(m) if m == "rejected"));

        let wrapped = classify(Error::Encoding("bad PKIStatus".to_string()), Error::RevocationFetch);
        assert!(matches!(wrapped, Error::RevocationFetch(m) if m.contains("bad PKIStatus")));
    }
}
