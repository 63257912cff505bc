//! Control-plane dispatch: start/stop commands and moment-state updates,
//! one supervised session task per stream id.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_core::config::Config;
use vigil_core::media::MediaEngine;
use vigil_core::message::{ControlMessage, WorkerMessage};
use vigil_core::stats::StatsRegistry;

use crate::ingest::{IngestContext, IngestSettings, StreamSession};
use crate::moment_state::{MomentState, MomentStateRegistry};
use crate::supervisor::{supervise, RetryPolicy, SessionOutcome};

struct SessionEntry {
    cancel: CancellationToken,
    /// Fencing token so a finished task only removes its own entry, never
    /// a replacement started under the same id.
    generation: u64,
}

/// Owns all active stream sessions of this worker.
pub struct StreamManager {
    engine: Arc<dyn MediaEngine>,
    output: mpsc::Sender<WorkerMessage>,
    stats: Arc<StatsRegistry>,
    sessions: Arc<DashMap<String, SessionEntry>>,
    moment_state: Arc<MomentStateRegistry>,
    settings: IngestSettings,
    policy: RetryPolicy,
    generation: AtomicU64,
}

impl StreamManager {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        output: mpsc::Sender<WorkerMessage>,
        stats: Arc<StatsRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            output,
            stats,
            sessions: Arc::new(DashMap::new()),
            moment_state: Arc::new(MomentStateRegistry::new()),
            settings: IngestSettings::from_config(config),
            policy: RetryPolicy::from(&config.supervisor),
            generation: AtomicU64::new(0),
        }
    }

    /// Route one inbound control message.
    pub fn dispatch(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::StartStream {
                id,
                uri,
                save_location,
                should_record_moments,
                is_ephemeral,
                init_seek_secs,
            } => {
                self.start_stream(StreamSession {
                    id,
                    source_uri: uri,
                    is_ephemeral,
                    save_location,
                    init_seek_secs,
                }, should_record_moments);
            }
            ControlMessage::StopStream { id } => self.stop_stream(&id),
            ControlMessage::SetMomentState {
                media_id,
                should_write_moment,
                current_moment_id,
                discard_previous_maybe_moment,
            } => {
                self.set_moment_state(
                    &media_id,
                    should_write_moment,
                    current_moment_id,
                    discard_previous_maybe_moment.unwrap_or(false),
                );
            }
        }
    }

    /// Start (or replace) the session for a stream id.
    pub fn start_stream(&self, session: StreamSession, should_record_moments: Option<bool>) {
        let id = session.id.clone();
        info!(stream_id = %id, uri = %session.source_uri, "starting media stream");

        // A session may already be live under this id; replace it rather
        // than leaking a second ingestion task.
        if let Some((_, previous)) = self.sessions.remove(&id) {
            warn!(stream_id = %id, "replacing already-running session");
            previous.cancel.cancel();
        }

        let moment_state = self.moment_state.insert(
            &id,
            MomentState {
                should_write_moment: should_record_moments.unwrap_or(true),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                cancel: cancel.clone(),
                generation,
            },
        );

        let mut ctx = IngestContext {
            session,
            engine: Arc::clone(&self.engine),
            moment_state,
            output: self.output.clone(),
            cancel: cancel.clone(),
            settings: self.settings.clone(),
        };
        let policy = self.policy.clone();
        let sessions = Arc::clone(&self.sessions);

        tokio::spawn(async move {
            let outcome = supervise(&id, &policy, &cancel, &mut ctx).await;
            if outcome == SessionOutcome::GivenUp {
                warn!(stream_id = %id, "session gave up, awaiting operator restart");
            }
            sessions.remove_if(&id, |_, entry| entry.generation == generation);
        });
    }

    /// Stop a session and clear its per-stream state.
    pub fn stop_stream(&self, id: &str) {
        info!(stream_id = %id, "stopping stream");
        if let Some((_, entry)) = self.sessions.remove(id) {
            entry.cancel.cancel();
        }
        self.moment_state.remove(id);
        self.stats.clear(id);
    }

    pub fn set_moment_state(
        &self,
        media_id: &str,
        should_write_moment: bool,
        current_moment_id: Option<String>,
        discard_previous_maybe_moment: bool,
    ) {
        info!(
            media_id = %media_id,
            should_write_moment,
            moment_id = ?current_moment_id,
            discard_previous_maybe_moment,
            "setting moment state"
        );
        self.moment_state.set(
            media_id,
            MomentState {
                should_write_moment,
                current_moment_id,
                discard_previous_maybe_moment,
            },
        );
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn moment_state(&self) -> &MomentStateRegistry {
        &self.moment_state
    }
}
