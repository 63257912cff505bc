//! Cancellable, deadline-bounded packet reads.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vigil_core::error::Result;
use vigil_core::media::{MediaPacket, MediaSource};

/// Outcome of one bounded read. Read faults from the source itself
/// propagate as errors, everything else is a tagged outcome so callers
/// never have to guess which future won the race.
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(MediaPacket),
    /// Source exhausted.
    Ended,
    /// No packet arrived inside the deadline.
    TimedOut,
    /// The session's cancellation token fired.
    Cancelled,
}

/// Wait for the next source packet, bounded by `timeout` and racing the
/// session's cancellation token. Cancellation is checked first.
pub async fn next_packet(
    source: &mut dyn MediaSource,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<ReadOutcome> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(ReadOutcome::Cancelled),
        res = tokio::time::timeout(timeout, source.read()) => match res {
            Err(_) => Ok(ReadOutcome::TimedOut),
            Ok(Ok(Some(packet))) => Ok(ReadOutcome::Packet(packet)),
            Ok(Ok(None)) => Ok(ReadOutcome::Ended),
            Ok(Err(e)) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{video_packet, PendingSource, ScriptedSource};

    #[tokio::test]
    async fn test_yields_packet() {
        let mut source = ScriptedSource::with_packets(vec![video_packet(0, 0)]);
        let cancel = CancellationToken::new();
        let outcome = next_packet(&mut source, &cancel, Duration::from_secs(1))
            .await
            .expect("read");
        assert!(matches!(outcome, ReadOutcome::Packet(_)));
    }

    #[tokio::test]
    async fn test_exhausted_source_reports_ended() {
        let mut source = ScriptedSource::empty();
        let cancel = CancellationToken::new();
        let outcome = next_packet(&mut source, &cancel, Duration::from_secs(1))
            .await
            .expect("read");
        assert!(matches!(outcome, ReadOutcome::Ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_times_out() {
        let mut source = PendingSource::default();
        let cancel = CancellationToken::new();
        let outcome = next_packet(&mut source, &cancel, Duration::from_secs(10))
            .await
            .expect("read");
        assert!(matches!(outcome, ReadOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_read() {
        let mut source = PendingSource::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = next_packet(&mut source, &cancel, Duration::from_secs(10))
            .await
            .expect("read");
        assert!(matches!(outcome, ReadOutcome::Cancelled));
    }
}
