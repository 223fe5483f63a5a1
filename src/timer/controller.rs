use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    ledger::{CompletedWork, CompletionLedger, CompletionSink, LedgerError, LogOutcome, WorkLogStore},
    models::{DayContext, PersistedSnapshot, Segment, SequencerSnapshot},
    notify::{Notifier, TransitionEvent},
    persistence::{evaluate_resume, ResumeChoice, ResumeDecision, ResumeOffer, SnapshotStore},
    settings::SessionPreferences,
    sync::{RemoteChange, RemoteSessionMirror, RemoteSessionRecord, RemoteSessionStore},
};

use super::{
    events::{SessionEvent, ANOMALY_MESSAGE},
    state::{SegmentSequencer, SequencerEffect, SessionMsg},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_TICK_MS: u64 = 1_000;
const DEFAULT_REMOTE_WRITE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub tick_interval: Duration,
    pub remote_write_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            remote_write_timeout: Duration::from_secs(DEFAULT_REMOTE_WRITE_TIMEOUT_SECS),
        }
    }
}

impl OrchestratorOptions {
    /// `FOCUSRAMP_TICK_MS` shortens the tick for demos; a timer second is
    /// still one tick.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var("FOCUSRAMP_TICK_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => options.tick_interval = Duration::from_millis(ms),
                _ => warn!("Ignoring invalid FOCUSRAMP_TICK_MS value '{raw}'"),
            }
        }
        options
    }
}

pub struct SessionConfig {
    pub context: DayContext,
    pub segments: Vec<Segment>,
    pub preferences: SessionPreferences,
    pub device_id: String,
    pub options: OrchestratorOptions,
}

/// Store handles and collaborators for one session.
#[derive(Clone)]
pub struct SessionDeps {
    pub clock: Arc<dyn Clock>,
    pub work_logs: Arc<dyn WorkLogStore>,
    pub completions: Arc<dyn CompletionSink>,
    pub remote: Arc<dyn RemoteSessionStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub notifier: Arc<dyn Notifier>,
}

struct Core {
    sequencer: SegmentSequencer,
    ledger: CompletionLedger,
    mirror: RemoteSessionMirror,
    /// When the current segment first ran; survives pauses.
    segment_started_at: Option<DateTime<Utc>>,
    pending_resume: Option<ResumeOffer>,
    closed: bool,
}

struct Inner {
    context: DayContext,
    clock: Arc<dyn Clock>,
    snapshots: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    remote: Arc<dyn RemoteSessionStore>,
    options: OrchestratorOptions,
    write_in_flight: Arc<AtomicBool>,
    core: Mutex<Core>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

/// Runs one training day's session. Ticks, user actions and remote pushes
/// all go through the same lock, so they never interleave.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Restores or starts the day's session. Returns the resume offer when a
    /// usable local snapshot was found; the sequencer then sits paused until
    /// [`SessionOrchestrator::resolve_resume`] or a control action.
    pub async fn open(config: SessionConfig, deps: SessionDeps) -> Result<(Self, Option<ResumeOffer>)> {
        let SessionConfig {
            context,
            segments,
            preferences,
            device_id,
            options,
        } = config;

        if segments.is_empty() {
            bail!("day {} has no segments", context.day_id);
        }
        let segment_count = segments.len();

        let now = deps.clock.now();
        let persisted = deps.snapshots.load(&context.user_id);
        let decision = evaluate_resume(persisted, &context, &segments, now);

        let (sequencer, segment_started_at, offer) = match decision {
            ResumeDecision::Offer {
                offer,
                snapshot,
                segment_started_at,
            } => {
                info!(
                    "Offering resume of {} at segment {} with {}s left",
                    context.day_id, offer.segment_index, offer.seconds_remaining
                );
                let sequencer = SegmentSequencer::hydrate(segments.clone(), snapshot, preferences.auto_start_next);
                (sequencer, segment_started_at, Some(offer))
            }
            ResumeDecision::Fresh { discarded } => {
                if discarded {
                    if let Err(err) = deps.snapshots.clear(&context.user_id) {
                        warn!("Failed to clear stale session snapshot: {err:#}");
                    }
                }
                let sequencer = SegmentSequencer::new(segments.clone(), preferences.auto_start_next);
                (sequencer, None, None)
            }
        };

        let ledger = CompletionLedger::seed(
            context.clone(),
            &segments,
            deps.work_logs.clone(),
            deps.completions.clone(),
        )
        .await;

        let mirror = RemoteSessionMirror::new(
            deps.remote.clone(),
            context.clone(),
            device_id,
            options.remote_write_timeout,
        );
        let write_in_flight = mirror.write_in_flight_flag();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Self {
            inner: Arc::new(Inner {
                context,
                clock: deps.clock,
                snapshots: deps.snapshots,
                notifier: deps.notifier,
                remote: deps.remote,
                options,
                write_in_flight,
                core: Mutex::new(Core {
                    sequencer,
                    ledger,
                    mirror,
                    segment_started_at,
                    pending_resume: offer.clone(),
                    closed: false,
                }),
                events,
                cancel: CancellationToken::new(),
            }),
        };

        // A local resume offer takes precedence over whatever another device
        // last wrote; otherwise pick up the shared record once.
        if offer.is_none() {
            let current = {
                let core = orchestrator.inner.core.lock().await;
                core.mirror.fetch_current().await
            };
            if let Some(record) = current {
                orchestrator.apply_remote(&record).await;
            }
        }

        info!(
            "Opened session for {} day {} ({} segments)",
            orchestrator.inner.context.user_id,
            orchestrator.inner.context.day_id,
            segment_count
        );

        Ok((orchestrator, offer))
    }

    pub fn context(&self) -> &DayContext {
        &self.inner.context
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> SequencerSnapshot {
        self.inner.core.lock().await.sequencer.snapshot().clone()
    }

    pub async fn pending_resume(&self) -> Option<ResumeOffer> {
        self.inner.core.lock().await.pending_resume.clone()
    }

    pub async fn set_auto_start_next(&self, auto_start_next: bool) {
        self.inner
            .core
            .lock()
            .await
            .sequencer
            .set_auto_start_next(auto_start_next);
    }

    pub async fn start(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Start).await
    }

    pub async fn pause(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Pause).await
    }

    pub async fn resume(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Resume).await
    }

    pub async fn skip(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Skip).await
    }

    pub async fn reset(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Reset).await
    }

    pub async fn tick(&self) -> Result<SequencerSnapshot> {
        self.dispatch(SessionMsg::Tick).await
    }

    pub async fn dispatch(&self, msg: SessionMsg) -> Result<SequencerSnapshot> {
        let mut guard = self.inner.core.lock().await;
        if guard.closed {
            bail!("session for day {} is closed", self.inner.context.day_id);
        }
        Ok(self.process(&mut guard, msg).await)
    }

    /// Settles a pending resume offer. `Resume` keeps the hydrated, paused
    /// state; `Restart` drops it and starts the day over.
    pub async fn resolve_resume(&self, choice: ResumeChoice) -> Result<SequencerSnapshot> {
        let mut guard = self.inner.core.lock().await;
        if guard.closed {
            bail!("session for day {} is closed", self.inner.context.day_id);
        }

        if guard.pending_resume.take().is_none() {
            debug!("No resume offer pending for {}", self.inner.context.day_id);
            return Ok(guard.sequencer.snapshot().clone());
        }

        match choice {
            ResumeChoice::Resume => {
                info!("Resuming day {} from local snapshot", self.inner.context.day_id);
                let snapshot = guard.sequencer.snapshot().clone();
                self.save_snapshot(&snapshot, guard.segment_started_at);
                let _ = self.inner.events.send(SessionEvent::StateChanged {
                    snapshot: snapshot.clone(),
                });
                Ok(snapshot)
            }
            ResumeChoice::Restart => {
                info!("Restarting day {} from the first segment", self.inner.context.day_id);
                Ok(self.process(&mut guard, SessionMsg::Reset).await)
            }
        }
    }

    /// Read path for pushed records. Returns the new snapshot when the record
    /// was applied.
    pub async fn apply_remote(&self, record: &RemoteSessionRecord) -> Option<SequencerSnapshot> {
        if self.inner.write_in_flight.load(Ordering::SeqCst) {
            debug!("Dropping remote update while a local write is in flight");
            return None;
        }

        let mut guard = self.inner.core.lock().await;
        if guard.closed {
            return None;
        }

        let now = self.inner.clock.now();
        let patch = match guard.mirror.accept(record, guard.sequencer.segments(), now) {
            Ok(patch) => patch,
            Err(reason) => {
                debug!(
                    "Ignoring remote session update from {}: {reason}",
                    record.state.device_id
                );
                return None;
            }
        };

        info!(
            "Applying remote session update from {} (segment {}, {})",
            record.state.device_id,
            record.state.segment_index,
            record.state.status.as_str()
        );
        Some(self.process(&mut guard, SessionMsg::ExternalUpdate(patch)).await)
    }

    /// Drives `Tick` until the session is closed.
    pub fn spawn_ticker(&self) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        let tick_interval = self.inner.options.tick_interval;

        tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if this.tick().await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Ticker for day {} stopped", this.inner.context.day_id);
        })
    }

    /// Feeds pushed records from the remote store into the read path.
    pub fn spawn_subscription(&self) -> JoinHandle<()> {
        let this = self.clone();
        let cancel = self.inner.cancel.clone();
        let mut changes = self.inner.remote.subscribe(&self.inner.context.user_id);

        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.recv() => change,
                };

                match change {
                    Ok(RemoteChange::Upserted(record)) => {
                        this.apply_remote(&record).await;
                    }
                    Ok(RemoteChange::Deleted { user_id }) => {
                        debug!("Remote session record for {user_id} deleted");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Remote session subscription lagged by {skipped} update(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Remote subscription for day {} stopped", this.inner.context.day_id);
        })
    }

    /// Tears the session down without touching persisted or remote state,
    /// so a later open on this or another device can pick it up.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let mut core = self.inner.core.lock().await;
        core.closed = true;
        core.mirror.retire();
        info!("Closed session for day {}", self.inner.context.day_id);
    }

    async fn process(&self, core: &mut Core, msg: SessionMsg) -> SequencerSnapshot {
        let now = self.inner.clock.now();
        let before = core.sequencer.snapshot().clone();
        let started_before = core.segment_started_at;
        let is_reset = matches!(msg, SessionMsg::Reset);
        let is_external = matches!(msg, SessionMsg::ExternalUpdate(_));
        let is_control = msg.is_control_action();

        if is_control && core.pending_resume.take().is_some() {
            debug!("Resume offer settled by a control action");
        }

        let effects = core.sequencer.apply(msg);
        let mut events = Vec::new();
        for effect in effects {
            match effect {
                SequencerEffect::SegmentCompleted { index, segment } => {
                    self.complete_segment(core, index, segment, now, &mut events).await;
                }
                SequencerEffect::SegmentSkipped { index } => {
                    debug!("Segment {index} skipped");
                }
                SequencerEffect::Advanced { from, to } => {
                    debug!("Advanced from segment {from} to {to}");
                }
                SequencerEffect::Finished => {
                    info!("Day {} finished", self.inner.context.day_id);
                    events.push(SessionEvent::Finished);
                }
            }
        }

        let after = core.sequencer.snapshot().clone();
        let index_changed = after.current_index != before.current_index;
        let just_finished = after.is_finished && !before.is_finished;

        if is_reset || index_changed || after.is_finished {
            core.segment_started_at = None;
        }
        if after.is_running && core.segment_started_at.is_none() {
            core.segment_started_at = Some(reconstructed_start(&core.sequencer, now));
        }

        if is_reset || after.is_finished {
            if let Err(err) = self.inner.snapshots.clear(&self.inner.context.user_id) {
                warn!("Failed to clear session snapshot: {err:#}");
            }
        } else if after != before || core.segment_started_at != started_before {
            self.save_snapshot(&after, core.segment_started_at);
        }

        if is_reset {
            core.mirror.reopen();
            if let Err(err) = core.mirror.clear(now).await {
                warn!("Failed to delete remote session after reset: {err:#}");
            }
        } else if just_finished {
            if let Err(err) = core.mirror.clear(now).await {
                warn!("Failed to delete remote session after finish: {err:#}");
            }
            core.mirror.retire();
        } else if !is_external && (is_control || index_changed) {
            if let Some(segment) = core.sequencer.current_segment().copied() {
                if let Err(err) = core.mirror.publish(&segment, &after, now).await {
                    warn!("Remote session write failed: {err:#}");
                }
            }
        }

        if after != before {
            events.push(SessionEvent::StateChanged {
                snapshot: after.clone(),
            });
        }
        for event in events {
            // No subscribers is fine.
            let _ = self.inner.events.send(event);
        }

        after
    }

    async fn complete_segment(
        &self,
        core: &mut Core,
        index: usize,
        segment: Segment,
        now: DateTime<Utc>,
        events: &mut Vec<SessionEvent>,
    ) {
        let transition = TransitionEvent {
            segment_index: index,
            segment_type: segment.kind,
            is_last_segment: core.sequencer.is_last_index(index),
        };
        self.inner.notifier.segment_transition(&transition);
        events.push(SessionEvent::SegmentTransition(transition));

        if !segment.is_work() {
            return;
        }

        let started_at = core
            .segment_started_at
            .unwrap_or_else(|| now - chrono::Duration::seconds(i64::from(segment.planned_seconds())));
        let work = CompletedWork {
            index,
            segment,
            started_at,
            ended_at: now,
        };

        match core.ledger.log_segment(work).await {
            Ok(LogOutcome::Logged {
                actual_seconds,
                day_completed,
                plan_completed,
            }) => {
                core.sequencer.apply(SessionMsg::CompletionLogged(index));
                info!("Logged segment {index} with {actual_seconds}s of work");
                events.push(SessionEvent::SegmentLogged {
                    segment_index: index,
                    actual_seconds,
                });
                if day_completed {
                    events.push(SessionEvent::DayCompleted);
                }
                if plan_completed {
                    events.push(SessionEvent::PlanCompleted);
                }
            }
            Ok(LogOutcome::AlreadyLogged) => {
                core.sequencer.apply(SessionMsg::CompletionLogged(index));
                debug!("Segment {index} was already logged");
            }
            Err(err @ LedgerError::Anomaly { .. }) => {
                warn!("{err}");
                events.push(SessionEvent::LoggingAnomaly {
                    segment_index: index,
                    message: ANOMALY_MESSAGE.to_string(),
                });
            }
            Err(err @ LedgerError::Store { .. }) => {
                error!("{err}");
                events.push(SessionEvent::LoggingFailed {
                    segment_index: index,
                    message: err.to_string(),
                });
            }
        }
    }

    fn save_snapshot(&self, snapshot: &SequencerSnapshot, segment_started_at: Option<DateTime<Utc>>) {
        let persisted = PersistedSnapshot::capture(
            &self.inner.context,
            snapshot,
            segment_started_at,
            self.inner.clock.now(),
        );
        if let Err(err) = self.inner.snapshots.save(&persisted) {
            warn!("Failed to save session snapshot: {err:#}");
        }
    }
}

/// Start instant implied by how much of the current segment has run.
fn reconstructed_start(sequencer: &SegmentSequencer, now: DateTime<Utc>) -> DateTime<Utc> {
    let elapsed = sequencer
        .current_segment()
        .map(|segment| segment.planned_seconds().saturating_sub(sequencer.snapshot().seconds_remaining))
        .unwrap_or(0);
    now - chrono::Duration::seconds(i64::from(elapsed))
}
