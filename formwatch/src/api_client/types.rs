//! API data transfer objects.
//!
//! These types define the API contract shared between the daemon and
//! clients. Timestamps are Unix seconds.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::alarm::AlarmState;
use crate::session::Channel;
use crate::status::PollOutcome;

/// Monitor snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct MonitorState {
    /// Slot being monitored, if any.
    pub slot: Option<String>,
    pub slot_description: Option<String>,
    /// Alarm state shared by all channels.
    pub alarm: AlarmState,
    /// Last displayed form status.
    pub display: Option<PollOutcome>,
    /// Alarms raised since monitoring of this slot started.
    pub episodes: u64,
    pub channels: Vec<ChannelStatus>,
}

/// One polling channel.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub running: bool,
    pub state: AlarmState,
    pub last_outcome: Option<PollOutcome>,
    pub last_message: Option<String>,
    pub polls: u64,
    pub consecutive_errors: u64,
    pub started_at: Option<i64>,
}

/// A monitorable time slot.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct SlotInfo {
    pub id: String,
    pub day: String,
    pub label: String,
}

/// Body of `POST /monitor/start`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct StartRequest {
    pub slot: String,
    /// Channels to start; both when omitted.
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
}

/// Body of `POST /monitor/acknowledge`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct AcknowledgeRequest {
    /// Channel the acknowledgment came from; interactive when omitted.
    #[serde(default)]
    pub channel: Option<Channel>,
}

/// Alarm sound configuration.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct SoundState {
    /// True if a custom sound is imported and usable.
    pub custom: bool,
    pub name: Option<String>,
    /// Daemon-owned copy of the custom sound.
    pub path: Option<String>,
}

/// Body of `PUT /sound`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct SetSoundRequest {
    /// File to import, as seen by the daemon.
    pub path: String,
    #[serde(default)]
    pub name: String,
}

/// Error body for rejected requests.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
