//! Bounded polling against external state.
//!
//! A poll blocks the calling stage until its predicate holds or the attempt
//! budget runs out. The budget is always finite; exhaustion is fatal for the
//! stage, never a silent continuation with a stale value.

use std::time::Duration;

use crate::error::{BootError, Result};

/// Terminal outcome of a poll task.
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The predicate held; carries the satisfying result.
    Satisfied(T),
    /// The attempt budget ran out before the predicate held.
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    /// Convert exhaustion into a typed error naming what was being waited for.
    pub fn into_result(self, what: &str) -> Result<T> {
        match self {
            Self::Satisfied(value) => Ok(value),
            Self::Exhausted { attempts } => Err(BootError::PollExhausted {
                what: what.to_string(),
                attempts,
            }),
        }
    }
}

/// Invoke `query` up to `max_attempts` times, sleeping `interval` between
/// attempts, short-circuiting the first time `predicate` holds.
///
/// A query error counts as an unsatisfied attempt: the external state may
/// simply not be observable yet. The last error is logged at trace level.
pub async fn poll_until<T, F, Fut, P>(
    what: &str,
    max_attempts: u32,
    interval: Duration,
    query: F,
    predicate: P,
) -> PollOutcome<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    for attempt in 1..=max_attempts {
        match query().await {
            Ok(result) if predicate(&result) => {
                tracing::debug!(what, attempt, "Poll satisfied");
                return PollOutcome::Satisfied(result);
            }
            Ok(_) => {
                tracing::trace!(what, attempt, "Poll predicate not yet satisfied");
            }
            Err(e) => {
                tracing::trace!(what, attempt, error = %e, "Poll query failed, retrying");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::warn!(what, max_attempts, "Poll budget exhausted");
    PollOutcome::Exhausted {
        attempts: max_attempts,
    }
}
