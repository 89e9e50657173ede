//! Reconnect loop shared by every long-lived connection.
//!
//! Retries are unbounded: services run unattended and only stop on shutdown.

use std::fmt::Display;
use std::future::Future;

use plclink_common::ReconnectPolicy;

use crate::shutdown::Shutdown;

/// Call `connect` until it succeeds, sleeping between failures as `policy`
/// dictates.
///
/// Returns `None` if shutdown is triggered first.
pub async fn connect_with_retry<T, E, F, Fut>(
    policy: &ReconnectPolicy,
    resource: &str,
    shutdown: &mut Shutdown,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = policy.backoff();

    loop {
        if shutdown.is_triggered() {
            return None;
        }

        let attempt = tokio::select! {
            result = connect() => result,
            _ = shutdown.wait() => return None,
        };

        match attempt {
            Ok(value) => {
                if backoff.attempts() > 0 {
                    tracing::info!(
                        resource,
                        failed_attempts = backoff.attempts(),
                        "Connection established after retries"
                    );
                }
                return Some(value);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    resource,
                    attempt = backoff.attempts(),
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection failed, retrying"
                );
                if shutdown.sleep(delay).await {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_until_success() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        let mut shutdown = Shutdown::never();

        let started = tokio::time::Instant::now();
        let counter = calls.clone();
        let value = connect_with_retry(&policy, "test", &mut shutdown, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("refused") } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(value, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_stops_on_shutdown() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(60));
        let (trigger, mut shutdown) = Shutdown::channel();

        let task = tokio::spawn(async move {
            connect_with_retry(&policy, "test", &mut shutdown, || async {
                Err::<(), _>("down")
            })
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();

        assert_eq!(task.await.unwrap(), None);
    }
}
