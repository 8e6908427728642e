//! Session continuity for viewer activity pings.

use chrono::{Duration, NaiveDateTime};

use super::{TrackingError, TrackingResult};

pub const SESSION_IDLE_TIMEOUT_MINUTES: i64 = 30;
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// What the store remembers about the previous ping for a (distribution, viewer) pair.
#[derive(Debug, Clone, Copy)]
pub struct SessionMarker<'a> {
    pub last_session_id: Option<&'a str>,
    pub last_seen_at: NaiveDateTime,
}

pub trait SessionResolver: Send + Sync + 'static {
    /// Returns true when the ping starts a new viewing session.
    fn is_new_session(
        &self,
        prior: Option<SessionMarker<'_>>,
        session_id: Option<&str>,
        now: NaiveDateTime,
    ) -> bool;
}

/// Trusts client session ids when present and falls back to an idle-gap
/// heuristic for clients that cannot keep one across reloads.
#[derive(Debug, Clone)]
pub struct IdleGapSessionResolver {
    idle_timeout: Duration,
}

impl IdleGapSessionResolver {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }
}

impl Default for IdleGapSessionResolver {
    fn default() -> Self {
        Self::new(Duration::minutes(SESSION_IDLE_TIMEOUT_MINUTES))
    }
}

impl SessionResolver for IdleGapSessionResolver {
    fn is_new_session(
        &self,
        prior: Option<SessionMarker<'_>>,
        session_id: Option<&str>,
        now: NaiveDateTime,
    ) -> bool {
        let Some(prior) = prior else {
            return true;
        };

        match session_id {
            Some(id) => prior.last_session_id != Some(id),
            None => now - prior.last_seen_at > self.idle_timeout,
        }
    }
}

pub fn normalize_session_id(raw: Option<&str>) -> TrackingResult<Option<String>> {
    let Some(trimmed) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    if trimmed.len() > MAX_SESSION_ID_LENGTH {
        return Err(TrackingError::validation(format!(
            "session_id must be at most {MAX_SESSION_ID_LENGTH} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(TrackingError::validation(
            "session_id must not contain control characters",
        ));
    }

    Ok(Some(trimmed.to_string()))
}
