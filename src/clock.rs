//! Provider time handling.
//!
//! The provider publishes data keyed by a fourteen digit local timestamp
//! (`YYYYMMDDHHmmss`). The monitor anchors a [`SimulatedClock`] to the
//! provider's own "latest" time and advances it one second per tick, so the
//! requested keys never run ahead of what the provider has published.

use chrono::{Duration, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const KEY_FORMAT: &str = "%Y%m%d%H%M%S";
const DISPLAY_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Formats accepted for the provider's `latest_time` field.
const PROVIDER_FORMATS: [&str; 3] = ["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeKeyError {
    #[error("time key must be exactly 14 digits (YYYYMMDDHHmmss), got {0:?}")]
    Format(String),
    #[error("time key {0:?} is not a valid date")]
    Date(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("simulated clock has not been synced")]
    NotSynced,
    #[error("simulated clock overflowed")]
    Overflow,
}

/// A validated `YYYYMMDDHHmmss` lookup key and the instant it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeKey {
    raw: String,
    time: NaiveDateTime,
}

impl TimeKey {
    pub fn from_datetime(time: &NaiveDateTime) -> Self {
        TimeKey {
            raw: time.format(KEY_FORMAT).to_string(),
            time: *time,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, TimeKeyError> {
        if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeKeyError::Format(raw.to_string()));
        }
        let time = NaiveDateTime::parse_from_str(raw, KEY_FORMAT)
            .map_err(|_| TimeKeyError::Date(raw.to_string()))?;
        Ok(TimeKey { raw: raw.to_string(), time })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `YYYYMMDD`, the provider's per-day image directory.
    pub fn date_dir(&self) -> &str {
        &self.raw[..8]
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.time
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for TimeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

pub fn format_display(time: &NaiveDateTime) -> String {
    time.format(DISPLAY_FORMAT).to_string()
}

/// Parse the provider's `latest_time` string.
pub fn parse_provider_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    PROVIDER_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now: Option<NaiveDateTime>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(&mut self, authoritative: NaiveDateTime) {
        self.now = Some(authoritative);
    }

    /// Move forward exactly one simulated second and return the new time.
    pub fn advance(&mut self) -> Result<NaiveDateTime, ClockError> {
        let now = self.now.ok_or(ClockError::NotSynced)?;
        let next = now
            .checked_add_signed(Duration::seconds(1))
            .ok_or(ClockError::Overflow)?;
        self.now = Some(next);
        Ok(next)
    }

    pub fn now(&self) -> Option<NaiveDateTime> {
        self.now
    }

    pub fn key(&self) -> Result<TimeKey, ClockError> {
        self.now
            .as_ref()
            .map(TimeKey::from_datetime)
            .ok_or(ClockError::NotSynced)
    }

    pub fn display(&self) -> String {
        self.now.as_ref().map(format_display).unwrap_or_default()
    }
}
