//! Periodic status polling for one channel.
//!
//! A [`StatusPoller`] owns at most one polling task. The task issues a
//! request immediately and then once per interval, each bounded by a
//! timeout shorter than the interval, and hands every result to the
//! caller's callback. A failed or timed-out request still produces a
//! result (classified as `Error`), so the callback sees exactly one
//! result per tick.
//!
//! Stopping cancels the wait for the next tick but lets an in-flight
//! request finish; its result is dropped. Until that request has
//! finished, the poller refuses to start again, so a late result for an
//! old slot can never reach a new session.

use std::sync::Arc;
use std::time::Duration;

use ::time::OffsetDateTime;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::session::Channel;
use crate::status::{FetchError, PollResult, StatusSource};
use crate::tracing::prelude::*;

/// Fraction of the poll interval a single request may take at most.
const MAX_REQUEST_SHARE_OF_INTERVAL: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerStart {
    /// A new polling task was spawned.
    Started,
    /// The poller was already running for the requested slot.
    AlreadyRunning,
}

/// Completion of a stopped poller's task.
#[must_use]
#[derive(Debug)]
pub struct Stopped(Option<CancellationToken>);

impl Stopped {
    /// True once the task has exited (or if there never was one).
    pub fn is_confirmed(&self) -> bool {
        self.0.as_ref().is_none_or(CancellationToken::is_cancelled)
    }

    /// Wait until the task has exited.
    pub async fn wait(self) {
        if let Some(done) = self.0 {
            done.cancelled().await;
        }
    }
}

struct Run {
    slot_id: String,
    stop: CancellationToken,
    /// Cancelled by the task itself when it exits.
    done: CancellationToken,
}

pub struct StatusPoller {
    channel: Channel,
    source: Arc<dyn StatusSource>,
    request_timeout: Duration,
    running: Option<Run>,
    draining: Option<Run>,
}

impl StatusPoller {
    pub fn new(channel: Channel, source: Arc<dyn StatusSource>, request_timeout: Duration) -> Self {
        Self {
            channel,
            source,
            request_timeout,
            running: None,
            draining: None,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Slot currently being polled, if running.
    pub fn slot_id(&self) -> Option<&str> {
        self.running.as_ref().map(|run| run.slot_id.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start polling `slot_id` every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInterval`] for a zero interval.
    /// - [`Error::AlreadyMonitoringDifferentSlot`] if running for another
    ///   slot.
    /// - [`Error::CancellationPending`] if a previous run was stopped but
    ///   its last request has not finished yet.
    pub fn start<F>(&mut self, slot_id: &str, interval: Duration, on_result: F) -> Result<PollerStart>
    where
        F: Fn(PollResult) + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(Error::InvalidInterval);
        }

        if let Some(run) = &self.running {
            if run.slot_id == slot_id {
                return Ok(PollerStart::AlreadyRunning);
            }
            return Err(Error::AlreadyMonitoringDifferentSlot {
                active: run.slot_id.clone(),
                requested: slot_id.to_string(),
            });
        }

        if let Some(run) = &self.draining {
            if !run.done.is_cancelled() {
                return Err(Error::CancellationPending(run.slot_id.clone()));
            }
            self.draining = None;
        }

        let run = Run {
            slot_id: slot_id.to_string(),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        };

        let task = PollLoop {
            channel: self.channel,
            source: self.source.clone(),
            slot_id: run.slot_id.clone(),
            interval,
            timeout: request_timeout_for(self.request_timeout, interval),
            stop: run.stop.clone(),
            done: run.done.clone(),
        };

        info!(
            channel = %self.channel,
            slot = %slot_id,
            interval_s = interval.as_secs_f32(),
            timeout_s = task.timeout.as_secs_f32(),
            "Poller started"
        );
        tokio::spawn(task.run(on_result));

        self.running = Some(run);
        Ok(PollerStart::Started)
    }

    /// Stop polling. Idempotent.
    ///
    /// The returned [`Stopped`] resolves once the task has exited, which
    /// may be after an in-flight request completes.
    pub fn stop(&mut self) -> Stopped {
        if let Some(run) = self.running.take() {
            run.stop.cancel();
            info!(channel = %self.channel, slot = %run.slot_id, "Poller stopped");
            self.draining = Some(run);
        }

        Stopped(self.draining.as_ref().map(|run| run.done.clone()))
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(run) = &self.running {
            run.stop.cancel();
        }
    }
}

/// Request deadline for a given interval: the configured timeout, but
/// always strictly shorter than the interval.
fn request_timeout_for(configured: Duration, interval: Duration) -> Duration {
    let ceiling = interval.mul_f64(MAX_REQUEST_SHARE_OF_INTERVAL);
    if configured.is_zero() {
        ceiling
    } else {
        configured.min(ceiling)
    }
}

/// Perform one status request and classify it.
///
/// Never fails: timeouts and transport errors become an `Error` result.
/// The result is stamped with the time the request was sent.
pub async fn poll_once(source: &dyn StatusSource, slot_id: &str, timeout: Duration) -> PollResult {
    let sent_at = OffsetDateTime::now_utc();
    let response = match time::timeout(timeout, source.fetch(slot_id)).await {
        Ok(response) => response,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };
    PollResult::from_response(slot_id, sent_at, response)
}

struct PollLoop {
    channel: Channel,
    source: Arc<dyn StatusSource>,
    slot_id: String,
    interval: Duration,
    timeout: Duration,
    stop: CancellationToken,
    done: CancellationToken,
}

impl PollLoop {
    async fn run<F>(self, on_result: F)
    where
        F: Fn(PollResult) + Send + Sync + 'static,
    {
        let _done = self.done.drop_guard();

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = poll_once(self.source.as_ref(), &self.slot_id, self.timeout).await;

            if self.stop.is_cancelled() {
                debug!(
                    channel = %self.channel,
                    slot = %self.slot_id,
                    outcome = %result.outcome,
                    "Discarding result from stopped poller"
                );
                break;
            }

            debug!(
                channel = %self.channel,
                slot = %self.slot_id,
                outcome = %result.outcome,
                code = ?result.raw_status_code,
                "Poll complete"
            );
            on_result(result);
        }

        trace!(channel = %self.channel, slot = %self.slot_id, "Poll loop exited");
    }
}
