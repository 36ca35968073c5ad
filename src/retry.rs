//! Bounded polling
//!
//! One reusable wait-until loop for every "device should appear shortly"
//! situation: fixed interval, explicit attempt cap, typed timeout fact.
//! Call sites map [`WaitTimeout`] onto their own error variant.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// The condition did not become true within `attempts * interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTimeout {
    /// What was being waited for
    pub what: String,
    /// Attempts made
    pub attempts: u32,
    /// Total time spent waiting
    pub waited: Duration,
}

impl WaitTimeout {
    /// Seconds waited, rounded down
    pub fn waited_secs(&self) -> u64 {
        self.waited.as_secs()
    }
}

/// Poll `predicate` every `interval` until it returns true, at most
/// `max_attempts` times.
///
/// The predicate is checked before the first sleep, so a condition that
/// already holds returns immediately.
pub async fn wait_until<F, Fut>(
    what: &str,
    interval: Duration,
    max_attempts: u32,
    mut predicate: F,
) -> std::result::Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=max_attempts {
        if predicate().await {
            debug!(what, attempt, "condition met");
            return Ok(());
        }
        if attempt < max_attempts {
            sleep(interval).await;
        }
    }
    Err(WaitTimeout {
        what: what.to_string(),
        attempts: max_attempts,
        waited: interval * max_attempts,
    })
}
