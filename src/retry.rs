//! Re-running fallible work.

/// Run `attempt` up to `max_attempts` times until it succeeds.
///
/// Attempts are numbered from 1. The error of the last attempt is returned.
/// A `max_attempts` of 0 is treated as 1.
pub async fn retry<T, E>(
    max_attempts: u32,
    attempt: impl AsyncFnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    retry_while(max_attempts, attempt, |_| true).await
}

/// Like [`retry`], but stops early once `should_retry` returns `false` for an error.
pub async fn retry_while<T, E>(
    max_attempts: u32,
    mut attempt: impl AsyncFnMut(u32) -> Result<T, E>,
    mut should_retry: impl FnMut(&E) -> bool,
) -> Result<T, E> {
    let max_attempts = max_attempts.max(1);
    let mut current = 1;
    loop {
        match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(err) if current < max_attempts && should_retry(&err) => current += 1,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[tokio::test]
    async fn stops_on_first_success() {
        let seen = RefCell::new(Vec::new());
        let out = retry(5, async |attempt| {
            seen.borrow_mut().push(attempt);
            match attempt {
                3 => Ok(attempt),
                _ => Err("flaky"),
            }
        })
        .await;

        assert_eq!(out, Ok(3));
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn returns_last_error() {
        let mut calls = 0;
        let out: Result<(), String> = retry(3, async |attempt| {
            calls += 1;
            Err(format!("attempt {attempt}"))
        })
        .await;

        assert_eq!(out, Err("attempt 3".to_string()));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn zero_budget_runs_once() {
        let mut calls = 0;
        let out: Result<(), ()> = retry(0, async |_| {
            calls += 1;
            Err(())
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_while_stops_early() {
        let mut calls = 0;
        let out: Result<(), &str> = retry_while(
            10,
            async |attempt| {
                calls += 1;
                match attempt {
                    2 => Err("fatal"),
                    _ => Err("flaky"),
                }
            },
            |err| *err != "fatal",
        )
        .await;

        assert_eq!(out, Err("fatal"));
        assert_eq!(calls, 2);
    }
}
