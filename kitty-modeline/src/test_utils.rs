// Polling assertions for async tests
//
// Render jobs are real processes; tests wait on observable state instead of
// sleeping for a guessed duration.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry `f` every `interval` until it yields `Ok`, panicking after `timeout`
///
/// `desc` names what is being waited for in the panic message.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match f().await {
            Ok(value) => return value,
            Err(e) => e.to_string(),
        };

        if start.elapsed() >= timeout {
            panic!(
                "Timeout waiting for {}\n\
                 Duration: {:?}\n\
                 Attempts: {}\n\
                 Last error: {}",
                desc,
                start.elapsed(),
                attempts,
                last_error
            );
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_first_success() {
        let value = assert_eventually(
            "immediate success",
            Duration::from_secs(1),
            Duration::from_millis(10),
            || async { Ok::<_, &str>(42) },
        )
        .await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);

        let value = assert_eventually(
            "third attempt",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let seen = Arc::clone(&seen);
                async move {
                    let n = seen.fetch_add(1, Ordering::SeqCst);
                    if n >= 2 {
                        Ok(n)
                    } else {
                        Err(format!("attempt {}", n))
                    }
                }
            },
        )
        .await;

        assert_eq!(value, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for never ready")]
    async fn test_panics_after_timeout() {
        assert_eventually(
            "never ready",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { Err::<(), _>("still waiting") },
        )
        .await;
    }
}
