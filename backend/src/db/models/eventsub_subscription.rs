use std::fmt;

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubscriptionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubSubscription {
    pub id: String,
    pub streamer_id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    /// Subscription id assigned by Twitch.
    pub uuid: String,
    /// Shared secret Twitch signs notifications for this subscription with.
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: SubscriptionStatus,
    /// When the last request from Twitch for this subscription was received.
    pub last_seen: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventSubSubscription {
    pub subscription_type: String,
    pub uuid: String,
    pub secret: String,
    pub status: SubscriptionStatus,
}

impl EventSubSubscription {
    /// Time elapsed since Twitch last reached us; `None` if it never did.
    pub fn last_seen_since(&self) -> Option<Duration> {
        self.last_seen_since_at(Utc::now().naive_utc())
    }

    pub fn last_seen_since_at(&self, now: NaiveDateTime) -> Option<Duration> {
        self.last_seen.map(|seen| now - seen)
    }
}

impl fmt::Display for EventSubSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventSub subscription {}", self.subscription_type)
    }
}
