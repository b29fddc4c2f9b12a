use std::fmt;

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A streamer's planned stream, entered by hand or loaded from Twitch / Google Calendar.
///
/// `twitch_segment_id` and `google_calendar_event_id` are only ever written by the
/// synchronizers so repeated passes update the same row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduledStream {
    pub id: String,
    pub streamer_id: String,
    pub title: String,
    #[sqlx(rename = "start_time")]
    pub start: NaiveDateTime,
    #[sqlx(rename = "end_time")]
    pub end: NaiveDateTime,
    pub category: Option<String>,
    pub weekly: bool,
    pub twitch_segment_id: Option<String>,
    pub google_calendar_event_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Fields an admin may set on a scheduled stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScheduledStream {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub category: Option<String>,
    #[serde(default)]
    pub weekly: bool,
}

impl ScheduledStream {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the stream is happening right now.
    pub fn now(&self) -> bool {
        self.is_happening_at(Utc::now().naive_utc())
    }

    /// Both bounds are exclusive.
    pub fn is_happening_at(&self, instant: NaiveDateTime) -> bool {
        self.start < instant && instant < self.end
    }
}

/// Renders as `title (streamer, start → end)` given the owning streamer's name.
pub struct ScheduledStreamLabel<'a> {
    pub stream: &'a ScheduledStream,
    pub streamer: &'a str,
}

impl fmt::Display for ScheduledStreamLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} → {})",
            self.stream.title, self.streamer, self.stream.start, self.stream.end
        )
    }
}
