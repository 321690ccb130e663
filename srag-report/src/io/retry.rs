//! Retry loop for transient collaborator failures.

use std::thread;

use tracing::{info, warn};

use crate::core::backoff::RetryPolicy;
use crate::error::CollaboratorError;

/// Run `op` until it succeeds, fails permanently, or the attempt budget runs out.
///
/// Only [`CollaboratorError::Transient`] failures are retried. The last error
/// is returned when retries are exhausted.
pub fn retry_transient<T, F>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut(u32) -> Result<T, CollaboratorError>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    info!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && policy.allows_retry_after(attempt) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    err = %err,
                    "transient failure, retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(label, attempt, err = %err, "retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = retry_transient(&RetryPolicy::immediate(3), "op", |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(CollaboratorError::transient("reset"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn stops_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_transient(&RetryPolicy::immediate(3), "op", |_| {
            calls.set(calls.get() + 1);
            Err(CollaboratorError::transient("timeout"))
        });
        assert_eq!(result, Err(CollaboratorError::transient("timeout")));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_transient(&RetryPolicy::immediate(3), "op", |_| {
            calls.set(calls.get() + 1);
            Err(CollaboratorError::permanent("bad schema"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn passes_attempt_number() {
        let mut seen = Vec::new();
        let _ = retry_transient(&RetryPolicy::immediate(2), "op", |attempt| {
            seen.push(attempt);
            Err::<(), _>(CollaboratorError::transient("x"))
        });
        assert_eq!(seen, vec![1, 2]);
    }
}
