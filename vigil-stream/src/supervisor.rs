//! Fault-tolerant session supervision.
//!
//! Drives ingestion attempts under a "hearts" retry budget. A failed
//! attempt costs one heart and waits out a fixed backoff; an attempt that
//! ran longer than the stability window restores the full budget before
//! the cost is taken, so a long-healthy stream forgives earlier transient
//! failures. Cancellation ends the session immediately regardless of the
//! remaining budget.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil_core::config::SupervisorConfig;
use vigil_core::error::Result;

/// One supervised unit of work: a single ingestion-loop attempt.
#[async_trait]
pub trait SessionDriver: Send {
    async fn run_once(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub hearts: u32,
    pub backoff: Duration,
    pub stability_window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            hearts: 5,
            backoff: Duration::from_secs(5),
            stability_window: Duration::from_secs(30),
        }
    }
}

impl From<&SupervisorConfig> for RetryPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            hearts: config.hearts,
            backoff: config.backoff(),
            stability_window: config.stability_window(),
        }
    }
}

/// Terminal state of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Source exhausted or session cancelled.
    Ended,
    /// Retry budget exhausted; no further automatic restarts.
    GivenUp,
}

/// Run attempts until the session ends, is cancelled, or runs out of
/// hearts.
pub async fn supervise(
    stream_id: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    driver: &mut dyn SessionDriver,
) -> SessionOutcome {
    let mut hearts = policy.hearts;

    loop {
        let attempt_started = Instant::now();

        match driver.run_once().await {
            Ok(()) => {
                info!(stream_id = %stream_id, "stream ended gracefully, stopping");
                return SessionOutcome::Ended;
            }
            Err(e) if e.is_cancellation() || cancel.is_cancelled() => {
                info!(stream_id = %stream_id, "stop signal received, ending session");
                return SessionOutcome::Ended;
            }
            Err(e) => {
                if attempt_started.elapsed() >= policy.stability_window {
                    info!(
                        stream_id = %stream_id,
                        stable_secs = attempt_started.elapsed().as_secs(),
                        "attempt ran stable before failing, restoring full retry budget"
                    );
                    hearts = policy.hearts;
                }

                hearts = hearts.saturating_sub(1);
                if hearts == 0 {
                    error!(
                        stream_id = %stream_id,
                        error = %e,
                        "stream has failed too many times, giving up"
                    );
                    return SessionOutcome::GivenUp;
                }

                warn!(
                    stream_id = %stream_id,
                    error = %e,
                    hearts,
                    "stream attempt failed, restarting"
                );

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(stream_id = %stream_id, "stop signal received during backoff");
                        return SessionOutcome::Ended;
                    }
                    () = tokio::time::sleep(policy.backoff) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_core::error::StreamError;

    /// Scripted driver: each entry is one attempt.
    enum Step {
        Ok,
        Fail,
        /// Run for the given duration, then fail.
        StableFail(Duration),
        /// Run until the token fires, then report cancellation.
        BlockUntilCancelled,
    }

    struct ScriptedDriver {
        steps: std::vec::IntoIter<Step>,
        attempts: u32,
        cancel: CancellationToken,
    }

    impl ScriptedDriver {
        fn new(steps: Vec<Step>, cancel: CancellationToken) -> Self {
            Self {
                steps: steps.into_iter(),
                attempts: 0,
                cancel,
            }
        }
    }

    #[async_trait]
    impl SessionDriver for ScriptedDriver {
        async fn run_once(&mut self) -> Result<()> {
            self.attempts += 1;
            match self.steps.next() {
                None | Some(Step::Ok) => Ok(()),
                Some(Step::Fail) => Err(StreamError::ReadTimeout),
                Some(Step::StableFail(duration)) => {
                    tokio::time::sleep(duration).await;
                    Err(StreamError::SourceRead("connection reset".to_string()))
                }
                Some(Step::BlockUntilCancelled) => {
                    self.cancel.cancelled().await;
                    Err(StreamError::Cancelled)
                }
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            hearts: 5,
            backoff: Duration::from_millis(50),
            stability_window: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_end_stops_without_retry() {
        let cancel = CancellationToken::new();
        let mut driver = ScriptedDriver::new(vec![Step::Ok], cancel.clone());

        let outcome = supervise("cam-1", &fast_policy(), &cancel, &mut driver).await;
        assert_eq!(outcome, SessionOutcome::Ended);
        assert_eq!(driver.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_straight_failures_give_up() {
        let cancel = CancellationToken::new();
        let mut driver = ScriptedDriver::new(
            vec![Step::Fail, Step::Fail, Step::Fail, Step::Fail, Step::Fail, Step::Ok],
            cancel.clone(),
        );

        let outcome = supervise("cam-1", &fast_policy(), &cancel, &mut driver).await;
        assert_eq!(outcome, SessionOutcome::GivenUp);
        // the sixth (would-succeed) attempt never runs
        assert_eq!(driver.attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_recover() {
        let cancel = CancellationToken::new();
        let mut driver = ScriptedDriver::new(
            vec![Step::Fail, Step::Fail, Step::Ok],
            cancel.clone(),
        );

        let outcome = supervise("cam-1", &fast_policy(), &cancel, &mut driver).await;
        assert_eq!(outcome, SessionOutcome::Ended);
        assert_eq!(driver.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stability_window_restores_budget() {
        let cancel = CancellationToken::new();
        // One quick failure, then a 31s-stable attempt that fails, then
        // three more quick failures: the stable attempt reset the budget,
        // so hearts never reach zero.
        let mut driver = ScriptedDriver::new(
            vec![
                Step::Fail,
                Step::StableFail(Duration::from_secs(31)),
                Step::Fail,
                Step::Fail,
                Step::Fail,
                Step::Ok,
            ],
            cancel.clone(),
        );

        let outcome = supervise("cam-1", &fast_policy(), &cancel, &mut driver).await;
        assert_eq!(outcome, SessionOutcome::Ended);
        assert_eq!(driver.attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_attempts_do_not_restore_budget() {
        let cancel = CancellationToken::new();
        // A 5s attempt is well under the 30s window: five failures in a
        // row still exhaust the budget.
        let mut driver = ScriptedDriver::new(
            vec![
                Step::Fail,
                Step::StableFail(Duration::from_secs(5)),
                Step::Fail,
                Step::Fail,
                Step::Fail,
                Step::Ok,
            ],
            cancel.clone(),
        );

        let outcome = supervise("cam-1", &fast_policy(), &cancel, &mut driver).await;
        assert_eq!(outcome, SessionOutcome::GivenUp);
        assert_eq!(driver.attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_with_budget_remaining() {
        let cancel = CancellationToken::new();
        let driver = ScriptedDriver::new(vec![Step::BlockUntilCancelled], cancel.clone());

        let cancel2 = cancel.clone();
        let supervisor = tokio::spawn(async move {
            let mut d = driver;
            let outcome = supervise("cam-1", &fast_policy(), &cancel2, &mut d).await;
            (outcome, d.attempts)
        });

        cancel.cancel();
        let (outcome, attempts) = supervisor.await.expect("join");
        assert_eq!(outcome, SessionOutcome::Ended);
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_ends_session() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            backoff: Duration::from_secs(3600),
            ..fast_policy()
        };
        let driver = ScriptedDriver::new(vec![Step::Fail, Step::Ok], cancel.clone());

        let cancel2 = cancel.clone();
        let supervisor = tokio::spawn(async move {
            let mut d = driver;
            supervise("cam-1", &policy, &cancel2, &mut d).await
        });

        // Let the first attempt fail and the backoff begin, then cancel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let outcome = supervisor.await.expect("join");
        assert_eq!(outcome, SessionOutcome::Ended);
    }
}
