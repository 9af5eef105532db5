//! Form-status responses and their classification.
//!
//! Everything the status endpoint can return, including transport and
//! protocol failures, is folded into a closed [`PollOutcome`] here so the
//! alarm logic downstream can be exhaustive over a fixed set.

mod source;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

pub use source::{HttpStatusSource, StatusSource};

/// Semantic result of one poll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PollOutcome {
    /// The form is accepting responses.
    Open,
    /// The form loaded but is not accepting responses.
    Closed,
    /// The slot's time window is not active; the form was not checked.
    OutsideSlot,
    /// The request failed or the service reported an error.
    Error,
    /// The response could not be interpreted.
    Unknown,
}

impl PollOutcome {
    /// Outcomes that end an open episode.
    pub fn resolves_episode(self) -> bool {
        matches!(self, PollOutcome::Closed | PollOutcome::OutsideSlot)
    }
}

/// Fields of a status response as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStatus {
    pub status: Option<String>,
    pub is_open: Option<bool>,
    pub http_code: u16,
    pub message: Option<String>,
}

/// Why a status request produced no usable response.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Protocol(String),
}

/// Map a status response (or the failure to get one) to an outcome.
///
/// Rules apply in order; the first match wins:
///
/// 1. Transport failure or non-2xx code: `Error`
/// 2. `status == "outside_slot"`: `OutsideSlot`
/// 3. `status == "open"` and `is_open == true`: `Open`
/// 4. `status == "closed"`: `Closed`
/// 5. `status == "error"`: `Error`
/// 6. anything else: `Unknown`
pub fn classify(response: &Result<RawStatus, FetchError>) -> PollOutcome {
    let raw = match response {
        Ok(raw) => raw,
        Err(_) => return PollOutcome::Error,
    };

    if !(200..300).contains(&raw.http_code) {
        return PollOutcome::Error;
    }

    match (raw.status.as_deref(), raw.is_open) {
        (Some("outside_slot"), _) => PollOutcome::OutsideSlot,
        (Some("open"), Some(true)) => PollOutcome::Open,
        (Some("closed"), _) => PollOutcome::Closed,
        (Some("error"), _) => PollOutcome::Error,
        _ => PollOutcome::Unknown,
    }
}

/// Outcome of one poll, produced fresh per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub slot_id: String,
    pub outcome: PollOutcome,
    /// HTTP status code, if a response arrived at all.
    pub raw_status_code: Option<u16>,
    /// Service-provided message, or the failure description.
    pub message: Option<String>,
    /// When the request was sent. Staleness is judged by this, so a slow
    /// request never outranks a quicker one sent after it.
    pub timestamp: OffsetDateTime,
}

impl PollResult {
    /// Classify the response to a request sent at `sent_at`.
    pub fn from_response(
        slot_id: &str,
        sent_at: OffsetDateTime,
        response: Result<RawStatus, FetchError>,
    ) -> Self {
        let outcome = classify(&response);
        let (raw_status_code, message) = match response {
            Ok(raw) => (Some(raw.http_code), raw.message),
            Err(e) => (None, Some(e.to_string())),
        };

        Self {
            slot_id: slot_id.to_string(),
            outcome,
            raw_status_code,
            message,
            timestamp: sent_at,
        }
    }

    /// Build a result directly. Used by tests and replay tooling.
    pub fn new(slot_id: &str, outcome: PollOutcome, timestamp: OffsetDateTime) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            outcome,
            raw_status_code: None,
            message: None,
            timestamp,
        }
    }
}
