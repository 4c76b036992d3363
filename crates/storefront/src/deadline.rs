//! Operations with an explicit deadline.
//!
//! A [`Deadline`] wraps a future with a time limit and reports the outcome as
//! a value instead of an error, so each caller chooses exactly one fallback
//! for the timeout case.

use std::future::Future;
use std::time::Duration;

/// A named time limit for one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    label: &'static str,
    limit: Duration,
}

/// Outcome of running a future under a [`Deadline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadlined<T> {
    Completed(T),
    TimedOut,
}

impl Deadline {
    #[must_use]
    pub const fn new(label: &'static str, limit: Duration) -> Self {
        Self { label, limit }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }

    /// Run `fut`, giving up once the limit elapses.
    ///
    /// The future is dropped on timeout. A timeout is logged once.
    pub async fn run<F>(&self, fut: F) -> Deadlined<F::Output>
    where
        F: Future,
    {
        if let Ok(value) = tokio::time::timeout(self.limit, fut).await {
            Deadlined::Completed(value)
        } else {
            tracing::warn!(
                operation = self.label,
                limit_ms = u64::try_from(self.limit.as_millis()).unwrap_or(u64::MAX),
                "operation timed out"
            );
            Deadlined::TimedOut
        }
    }

    /// Run `fut`, returning `fallback` if the limit elapses.
    pub async fn run_or<F>(&self, fut: F, fallback: F::Output) -> F::Output
    where
        F: Future,
    {
        self.run(fut).await.unwrap_or(fallback)
    }
}

impl<T> Deadlined<T> {
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// The completed value, if any.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::TimedOut => None,
        }
    }

    /// The completed value, or `fallback` on timeout.
    pub fn unwrap_or(self, fallback: T) -> T {
        self.completed().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_limit() {
        let deadline = Deadline::new("quick", Duration::from_secs(1));
        let outcome = deadline
            .run(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                7
            })
            .await;
        assert_eq!(outcome, Deadlined::Completed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let deadline = Deadline::new("slow", Duration::from_secs(15));
        let outcome = deadline.run(std::future::pending::<()>()).await;
        assert!(outcome.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_or_uses_fallback() {
        let deadline = Deadline::new("slow", Duration::from_secs(10));
        let value = deadline
            .run_or(
                async {
                    tokio::time::sleep(Duration::from_secs(11)).await;
                    "remote"
                },
                "fallback",
            )
            .await;
        assert_eq!(value, "fallback");
    }
}
