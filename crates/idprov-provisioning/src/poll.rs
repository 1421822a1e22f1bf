//! Bounded re-reads with exponential backoff.
//!
//! Used after a credential insert, when store-side triggers may still be
//! creating the profile and role rows.

use std::future::Future;
use std::time::Duration;

use idprov_config::ReconcileConfig;
use tracing::debug;

use crate::error::StoreResult;

/// How long to wait for a row to appear before writing it ourselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Re-reads after the first read
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl PollPolicy {
    pub fn new(attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Read once, never wait.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before each re-read: doubling from `initial_delay`, capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.initial_delay;
        (0..self.attempts).map(move |_| {
            let current = next;
            next = next.saturating_mul(2).min(self.max_delay);
            current
        })
    }

    /// Longest total wait this policy can spend.
    pub fn total_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(50), Duration::from_millis(400))
    }
}

impl From<&ReconcileConfig> for PollPolicy {
    fn from(config: &ReconcileConfig) -> Self {
        Self::new(
            config.poll_attempts,
            Duration::from_millis(config.poll_initial_delay_ms),
            Duration::from_millis(config.poll_max_delay_ms),
        )
    }
}

/// Call `read` until it returns a value or the policy runs out.
///
/// Errors end polling immediately.
pub async fn until_present<T, F, Fut>(policy: &PollPolicy, mut read: F) -> StoreResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<Option<T>>>,
{
    let mut found = read().await?;

    for (attempt, delay) in policy.delays().enumerate() {
        if found.is_some() {
            break;
        }
        debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Row absent, polling");
        tokio::time::sleep(delay).await;
        found = read().await?;
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_delays_double_and_cap() {
        let delays: Vec<u64> = PollPolicy::default()
            .delays()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 400]);
        assert_eq!(PollPolicy::default().total_wait(), Duration::from_millis(1150));
    }

    #[test]
    fn test_none_never_waits() {
        assert_eq!(PollPolicy::none().delays().count(), 0);
        assert_eq!(PollPolicy::none().total_wait(), Duration::ZERO);
    }

    #[test]
    fn test_from_config() {
        let config = ReconcileConfig {
            poll_attempts: 2,
            poll_initial_delay_ms: 10,
            poll_max_delay_ms: 15,
            ..Default::default()
        };
        let policy = PollPolicy::from(&config);
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![10, 15]);
    }

    #[tokio::test]
    async fn test_until_present_stops_when_found() {
        let reads = AtomicU32::new(0);
        let policy = PollPolicy::new(5, Duration::from_millis(1), Duration::from_millis(2));

        let found = until_present(&policy, || {
            let n = reads.fetch_add(1, Ordering::SeqCst);
            async move { Ok(if n >= 2 { Some(n) } else { None }) }
        })
        .await
        .unwrap();

        assert_eq!(found, Some(2));
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_until_present_gives_up() {
        let reads = AtomicU32::new(0);
        let policy = PollPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));

        let found: Option<u32> = until_present(&policy, || {
            reads.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await
        .unwrap();

        assert!(found.is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 4);
    }
}
