//! Polling channels and their monitoring sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::status::{PollOutcome, PollResult};

/// One of the two independent execution contexts that poll the status
/// endpoint.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    /// Runs while a user-facing client is attached.
    Interactive,
    /// Runs detached for as long as the daemon is monitoring.
    Background,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Interactive, Channel::Background];

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Interactive => 0,
            Channel::Background => 1,
        }
    }
}

/// A channel's ongoing monitoring of one slot.
///
/// `generation` is unique per session; results tagged with an older
/// generation belong to a stopped session and are discarded.
#[derive(Debug, Clone)]
pub struct MonitoringSession {
    pub slot_id: String,
    pub channel: Channel,
    pub poll_interval: Duration,
    pub last_status: Option<PollOutcome>,
    pub last_message: Option<String>,
    pub started_at: OffsetDateTime,
    pub generation: u64,
    pub polls: u64,
    pub consecutive_errors: u64,
}

impl MonitoringSession {
    pub fn new(slot_id: &str, channel: Channel, poll_interval: Duration, generation: u64) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            channel,
            poll_interval,
            last_status: None,
            last_message: None,
            started_at: OffsetDateTime::now_utc(),
            generation,
            polls: 0,
            consecutive_errors: 0,
        }
    }

    /// Account for one poll result.
    pub fn record(&mut self, result: &PollResult) {
        self.polls += 1;
        self.last_status = Some(result.outcome);
        self.last_message = result.message.clone();
        if result.outcome == PollOutcome::Error {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_round_trip_through_strings() {
        assert_eq!(Channel::Interactive.to_string(), "interactive");
        assert_eq!("background".parse::<Channel>().unwrap(), Channel::Background);
        assert!("foreground".parse::<Channel>().is_err());
    }

    #[test]
    fn record_tracks_error_streaks() {
        let mut session = MonitoringSession::new("tue_930", Channel::Background, Duration::from_secs(30), 1);
        let now = OffsetDateTime::now_utc();

        session.record(&PollResult::new("tue_930", PollOutcome::Error, now));
        session.record(&PollResult::new("tue_930", PollOutcome::Error, now));
        assert_eq!(session.consecutive_errors, 2);

        session.record(&PollResult::new("tue_930", PollOutcome::Closed, now));
        assert_eq!(session.consecutive_errors, 0);
        assert_eq!(session.polls, 3);
        assert_eq!(session.last_status, Some(PollOutcome::Closed));
    }
}
