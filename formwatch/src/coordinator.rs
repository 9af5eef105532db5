//! Runs both polling channels against one shared alarm per slot.
//!
//! Each channel owns a [`StatusPoller`] and a local [`AlarmStateMachine`].
//! When a channel's local machine wants to raise the alarm, or sees the
//! episode resolve, it notifies the coordinator, which applies the event
//! to the shared machine under a single lock and converges every
//! channel's local copy to the shared state. Side effects happen only on
//! shared transitions, so two channels seeing the same open form produce
//! one alarm.
//!
//! Events carry timestamps. A trigger older than the last resolution, or
//! a resolution or acknowledgment older than the current trigger, is
//! stale and ignored.
//!
//! An acknowledgment is persisted with its time, so a restart during the
//! same episode stays quiet. It is honored only within
//! [`ACK_RESUME_WINDOW`]; an older one belongs to an earlier episode.
//!
//! Lock order: pollers, then ledger. Poller callbacks take only the
//! ledger.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::alarm::{AlarmAction, AlarmState, AlarmStateMachine, Step};
use crate::api_client::types::{ChannelStatus, MonitorState};
use crate::error::{Error, Result};
use crate::outputs::AlarmOutputs;
use crate::poller::{PollerStart, StatusPoller, Stopped};
use crate::session::{Channel, MonitoringSession};
use crate::slot;
use crate::status::{PollOutcome, PollResult, StatusSource};
use crate::store::{KeyValueStore, SELECTED_SLOT_KEY, ack_key};
use crate::tracing::prelude::*;

/// How long a persisted acknowledgment can resume an episode after a
/// restart. Longer than any slot window, shorter than the gap between two
/// episodes of the same slot.
pub const ACK_RESUME_WINDOW: time::Duration = time::Duration::hours(2);

#[derive(Debug, Default)]
struct Lane {
    machine: AlarmStateMachine,
    session: Option<MonitoringSession>,
}

/// Everything known about the slot currently monitored.
#[derive(Debug)]
struct ActiveSlot {
    slot_id: String,
    shared: AlarmStateMachine,
    lanes: [Lane; 2],
    triggered_at: Option<OffsetDateTime>,
    resolved_at: Option<OffsetDateTime>,
    /// The current episode was acknowledged before a restart.
    resume_acknowledged: bool,
    episodes: u64,
    last_display: Option<PollOutcome>,
}

impl ActiveSlot {
    fn new(slot_id: &str, resume_acknowledged: bool) -> Self {
        let mut shared = AlarmStateMachine::new();
        shared.start();
        Self {
            slot_id: slot_id.to_string(),
            shared,
            lanes: Default::default(),
            triggered_at: None,
            resolved_at: None,
            resume_acknowledged,
            episodes: 0,
            last_display: None,
        }
    }

    fn converge_lanes(&mut self) {
        let target = self.shared.state();
        for lane in self.lanes.iter_mut().filter(|lane| lane.session.is_some()) {
            lane.machine.converge(target);
        }
    }

    fn is_idle(&self) -> bool {
        self.lanes.iter().all(|lane| lane.session.is_none())
    }
}

#[derive(Debug, Default)]
struct Ledger {
    active: Option<ActiveSlot>,
}

struct Inner {
    pollers: Mutex<[StatusPoller; 2]>,
    ledger: Mutex<Ledger>,
    outputs: AlarmOutputs,
    store: Arc<dyn KeyValueStore>,
    poll_interval: Duration,
    generation: AtomicU64,
}

pub struct ChannelCoordinator {
    inner: Arc<Inner>,
}

impl ChannelCoordinator {
    pub fn new(
        source: Arc<dyn StatusSource>,
        outputs: AlarmOutputs,
        store: Arc<dyn KeyValueStore>,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        let pollers = Channel::ALL.map(|channel| StatusPoller::new(channel, source.clone(), request_timeout));
        Self {
            inner: Arc::new(Inner {
                pollers: Mutex::new(pollers),
                ledger: Mutex::new(Ledger::default()),
                outputs,
                store,
                poll_interval,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Slot currently monitored by any channel.
    pub fn active_slot(&self) -> Option<String> {
        self.inner
            .ledger
            .lock()
            .active
            .as_ref()
            .map(|active| active.slot_id.clone())
    }

    /// Start polling `slot_id` on `channel`.
    ///
    /// Starting a channel that already polls this slot is a no-op. The
    /// selection is persisted so the daemon resumes it after a restart.
    pub fn start_channel(&self, channel: Channel, slot_id: &str) -> Result<PollerStart> {
        let slot = slot::find(slot_id).ok_or_else(|| Error::UnknownSlot(slot_id.to_string()))?;

        let mut pollers = self.inner.pollers.lock();
        let mut ledger = self.inner.ledger.lock();

        if let Some(active) = &ledger.active {
            if active.slot_id != slot.id {
                return Err(Error::AlreadyMonitoringDifferentSlot {
                    active: active.slot_id.clone(),
                    requested: slot.id.to_string(),
                });
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let started = pollers[channel.index()].start(slot.id, self.inner.poll_interval, move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_poll_result(channel, generation, result);
            }
        })?;
        if started == PollerStart::AlreadyRunning {
            return Ok(started);
        }

        let active = match &mut ledger.active {
            Some(active) => active,
            none => {
                if let Err(e) = self.inner.store.set(SELECTED_SLOT_KEY, slot.id) {
                    warn!(error = %e, "Failed to persist selected slot");
                }
                let resume_acknowledged = self.inner.resumes_acknowledged(slot.id, OffsetDateTime::now_utc());
                info!(
                    slot = %slot.id,
                    description = %slot.describe(),
                    resume_acknowledged,
                    "Monitoring started"
                );
                none.insert(ActiveSlot::new(slot.id, resume_acknowledged))
            }
        };

        let lane = &mut active.lanes[channel.index()];
        lane.machine = AlarmStateMachine::new();
        lane.machine.start();
        lane.machine.converge(active.shared.state());
        lane.session = Some(MonitoringSession::new(
            slot.id,
            channel,
            self.inner.poll_interval,
            generation,
        ));
        info!(slot = %slot.id, %channel, generation, "Channel started");

        Ok(started)
    }

    /// Stop polling on `channel`. Idempotent.
    ///
    /// When the last channel stops, the slot's alarm returns to idle and
    /// an active alarm is silenced.
    pub fn stop_channel(&self, channel: Channel) -> Stopped {
        let mut pollers = self.inner.pollers.lock();
        let stopped = pollers[channel.index()].stop();

        let mut ledger = self.inner.ledger.lock();
        if let Some(active) = ledger.active.as_mut() {
            let lane = &mut active.lanes[channel.index()];
            if lane.session.take().is_some() {
                lane.machine.stop();
                info!(slot = %active.slot_id, %channel, "Channel stopped");
            }

            if active.is_idle() {
                let step = active.shared.stop();
                if step.action == Some(AlarmAction::Silence) {
                    self.inner.outputs.silence();
                }
                info!(slot = %active.slot_id, from = %step.from, "Monitoring stopped");
                ledger.active = None;
            }
        }

        stopped
    }

    /// Stop every channel, wait for in-flight polls, and forget the
    /// selected slot.
    pub async fn stop_monitoring(&self) {
        let slot_id = self.active_slot().or_else(|| {
            self.inner.store.get(SELECTED_SLOT_KEY).ok().flatten()
        });

        self.stop_all().await;

        let mut keys = vec![SELECTED_SLOT_KEY.to_string()];
        keys.extend(slot_id.as_deref().map(ack_key));
        for key in keys {
            if let Err(e) = self.inner.store.remove(&key) {
                warn!(key, error = %e, "Failed to clear persisted monitoring state");
            }
        }
    }

    /// Stop every channel and wait, keeping the persisted selection so the
    /// next run resumes it.
    pub async fn shutdown(&self) {
        self.stop_all().await;
    }

    async fn stop_all(&self) {
        let stopped = Channel::ALL.map(|channel| self.stop_channel(channel));
        for stopped in stopped {
            stopped.wait().await;
        }
    }

    /// User acknowledgment from `channel` for the active slot.
    pub fn acknowledge(&self, channel: Channel) -> bool {
        match self.active_slot() {
            Some(slot_id) => self.notify_acknowledge(&slot_id, channel, OffsetDateTime::now_utc()),
            None => {
                debug!(%channel, "Acknowledge with nothing monitored");
                false
            }
        }
    }

    /// A channel transitioned into `Triggered` for `slot_id` at `at`.
    ///
    /// Returns true if the alarm was raised (or the episode resumed as
    /// acknowledged). Repeated or stale triggers are no-ops.
    pub fn notify_trigger(&self, slot_id: &str, channel: Channel, at: OffsetDateTime) -> bool {
        self.inner
            .with_slot(slot_id, |active| self.inner.apply_trigger(active, channel, at))
    }

    /// A channel acknowledged the alarm for `slot_id` at `at`.
    pub fn notify_acknowledge(&self, slot_id: &str, channel: Channel, at: OffsetDateTime) -> bool {
        self.inner
            .with_slot(slot_id, |active| self.inner.apply_acknowledge(active, channel, at))
    }

    /// A channel saw the episode for `slot_id` resolve at `at`.
    pub fn notify_resolved(&self, slot_id: &str, channel: Channel, at: OffsetDateTime) -> bool {
        self.inner
            .with_slot(slot_id, |active| self.inner.apply_resolved(active, channel, at))
    }

    pub fn snapshot(&self) -> MonitorState {
        let ledger = self.inner.ledger.lock();
        let Some(active) = &ledger.active else {
            return MonitorState {
                channels: Channel::ALL.map(idle_channel).to_vec(),
                ..Default::default()
            };
        };

        let channels = Channel::ALL
            .iter()
            .map(|&channel| {
                let lane = &active.lanes[channel.index()];
                match &lane.session {
                    Some(session) => ChannelStatus {
                        channel,
                        running: true,
                        state: lane.machine.state(),
                        last_outcome: session.last_status,
                        last_message: session.last_message.clone(),
                        polls: session.polls,
                        consecutive_errors: session.consecutive_errors,
                        started_at: Some(session.started_at.unix_timestamp()),
                    },
                    None => idle_channel(channel),
                }
            })
            .collect();

        MonitorState {
            slot: Some(active.slot_id.clone()),
            slot_description: slot::find(&active.slot_id).map(|slot| slot.describe()),
            alarm: active.shared.state(),
            display: active.last_display,
            episodes: active.episodes,
            channels,
        }
    }
}

fn idle_channel(channel: Channel) -> ChannelStatus {
    ChannelStatus {
        channel,
        running: false,
        state: AlarmState::Idle,
        last_outcome: None,
        last_message: None,
        polls: 0,
        consecutive_errors: 0,
        started_at: None,
    }
}

impl Inner {
    /// Whether a persisted acknowledgment for `slot_id` still covers the
    /// episode in progress at `now`. Expired or unreadable ones are removed.
    fn resumes_acknowledged(&self, slot_id: &str, now: OffsetDateTime) -> bool {
        let key = ack_key(slot_id);
        let value = match self.store.get(&key) {
            Ok(Some(value)) => value,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to read acknowledgment");
                return false;
            }
        };

        let acknowledged_at = value
            .parse::<i64>()
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());
        match acknowledged_at {
            Some(at) if at <= now && now - at <= ACK_RESUME_WINDOW => true,
            _ => {
                info!(slot = %slot_id, value = %value, "Discarding acknowledgment from an earlier episode");
                if let Err(e) = self.store.remove(&key) {
                    warn!(error = %e, "Failed to clear acknowledgment");
                }
                false
            }
        }
    }

    fn with_slot(&self, slot_id: &str, apply: impl FnOnce(&mut ActiveSlot) -> bool) -> bool {
        let mut ledger = self.ledger.lock();
        match ledger.active.as_mut() {
            Some(active) if active.slot_id == slot_id => {
                let applied = apply(active);
                active.converge_lanes();
                applied
            }
            _ => {
                debug!(slot = %slot_id, "Ignoring event for slot not monitored");
                false
            }
        }
    }

    fn on_poll_result(&self, channel: Channel, generation: u64, result: PollResult) {
        let mut ledger = self.ledger.lock();
        let Some(active) = ledger.active.as_mut() else {
            debug!(%channel, slot = %result.slot_id, "Discarding result, nothing monitored");
            return;
        };
        if active.slot_id != result.slot_id {
            debug!(%channel, slot = %result.slot_id, "Discarding result for old slot");
            return;
        }

        let lane = &mut active.lanes[channel.index()];
        match lane.session.as_mut() {
            Some(session) if session.generation == generation => session.record(&result),
            _ => {
                debug!(%channel, generation, "Discarding result from stale session");
                return;
            }
        }

        let local: Step = lane.machine.observe(result.outcome);
        if local.action == Some(AlarmAction::Raise) {
            self.apply_trigger(active, channel, result.timestamp);
        } else if result.outcome.resolves_episode() {
            self.apply_resolved(active, channel, result.timestamp);
        }
        active.converge_lanes();

        self.update_display(active, &result);
    }

    fn apply_trigger(&self, active: &mut ActiveSlot, channel: Channel, at: OffsetDateTime) -> bool {
        if active.resolved_at.is_some_and(|resolved| at < resolved) {
            debug!(slot = %active.slot_id, %channel, "Ignoring stale trigger");
            return false;
        }

        if active.resume_acknowledged && active.shared.state() == AlarmState::Monitoring {
            active.resume_acknowledged = false;
            active.shared.converge(AlarmState::Acknowledged);
            active.triggered_at = Some(at);
            info!(
                slot = %active.slot_id,
                %channel,
                "Form open, episode already acknowledged"
            );
            return true;
        }

        let step = active.shared.observe(PollOutcome::Open);
        if step.action != Some(AlarmAction::Raise) {
            debug!(slot = %active.slot_id, %channel, state = %step.to, "Trigger already handled");
            return false;
        }

        active.triggered_at = Some(at);
        active.episodes += 1;
        info!(
            slot = %active.slot_id,
            %channel,
            episode = active.episodes,
            from = %step.from,
            to = %step.to,
            "Form open, raising alarm"
        );
        self.outputs.raise(&active.slot_id);
        true
    }

    fn apply_acknowledge(&self, active: &mut ActiveSlot, channel: Channel, at: OffsetDateTime) -> bool {
        if active.shared.state() != AlarmState::Triggered {
            debug!(
                slot = %active.slot_id,
                %channel,
                state = %active.shared.state(),
                "Nothing to acknowledge"
            );
            return false;
        }
        if active.triggered_at.is_some_and(|triggered| at < triggered) {
            debug!(slot = %active.slot_id, %channel, "Ignoring stale acknowledgment");
            return false;
        }

        let step = active.shared.acknowledge();
        if step.action == Some(AlarmAction::Silence) {
            self.outputs.silence();
        }
        let acknowledged_at = OffsetDateTime::now_utc().unix_timestamp().to_string();
        if let Err(e) = self.store.set(&ack_key(&active.slot_id), &acknowledged_at) {
            warn!(error = %e, "Failed to persist acknowledgment");
        }
        info!(slot = %active.slot_id, %channel, from = %step.from, to = %step.to, "Alarm acknowledged");
        true
    }

    fn apply_resolved(&self, active: &mut ActiveSlot, channel: Channel, at: OffsetDateTime) -> bool {
        if active.triggered_at.is_some_and(|triggered| at < triggered) {
            debug!(slot = %active.slot_id, %channel, "Ignoring stale resolution");
            return false;
        }

        if active.resolved_at.is_none_or(|resolved| resolved < at) {
            active.resolved_at = Some(at);
        }

        let was_resuming = std::mem::take(&mut active.resume_acknowledged);
        let step = active.shared.observe(PollOutcome::Closed);
        if step.action == Some(AlarmAction::Silence) {
            self.outputs.silence();
        }

        if step.changed() || was_resuming {
            if let Err(e) = self.store.remove(&ack_key(&active.slot_id)) {
                warn!(error = %e, "Failed to clear acknowledgment flag");
            }
        }
        if step.changed() {
            info!(slot = %active.slot_id, %channel, from = %step.from, to = %step.to, "Episode resolved, re-armed");
        }
        step.changed()
    }

    /// Show a transient status when the displayed status changes. Both
    /// channels feed the same display, so agreeing results show once.
    fn update_display(&self, active: &mut ActiveSlot, result: &PollResult) {
        if active.last_display == Some(result.outcome) {
            return;
        }
        active.last_display = Some(result.outcome);

        let title = match result.outcome {
            PollOutcome::Open => "Form open",
            PollOutcome::Closed => "Form closed",
            PollOutcome::OutsideSlot => "Outside slot",
            PollOutcome::Error => "Status check failed",
            PollOutcome::Unknown => "Status unknown",
        };
        let when = slot::find(&active.slot_id)
            .map(|slot| slot.describe())
            .unwrap_or_else(|| active.slot_id.clone());
        let body = match &result.message {
            Some(message) => format!("{when}: {message}"),
            None => when,
        };
        self.outputs.status(title, &body);
    }
}
