//! Caller-side retry of the initial connect.

use std::future::Future;

use mc_client::ReconnectBackoff;

/// Run `connect` until it succeeds, the error is not transient, or the
/// attempt budget in `backoff` is spent. Returns the last error.
pub async fn connect_with_retry<F, Fut>(
    backoff: &ReconnectBackoff,
    mut connect: F,
) -> mc_domain::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = mc_domain::Result<()>>,
{
    let mut attempt: u32 = 0;
    loop {
        let err = match connect().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        attempt += 1;

        if !err.is_transient() || backoff.should_give_up(attempt) {
            tracing::error!(attempts = attempt, error = %err, "giving up on connect");
            return Err(err);
        }

        let delay = backoff.delay_for_attempt(attempt - 1);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "connect failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use mc_domain::Error;

    fn backoff(max_attempts: u32) -> ReconnectBackoff {
        ReconnectBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(&backoff(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Connection("refused".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(&backoff(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Connection("refused".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(&backoff(0), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Configuration("bad url".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
