use serde::{Deserialize, Serialize};

/// State of an EventSub subscription as far as this service knows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Unsubscribed,
    Pending,
    Subscribed,
}

impl SubscriptionStatus {
    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unsubscribed" => Some(SubscriptionStatus::Unsubscribed),
            "pending" => Some(SubscriptionStatus::Pending),
            "subscribed" => Some(SubscriptionStatus::Subscribed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Unsubscribed => "unsubscribed",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Subscribed => "subscribed",
        }
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid subscription status: {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unsubscribed() {
        assert_eq!(SubscriptionStatus::default(), SubscriptionStatus::Unsubscribed);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            SubscriptionStatus::from_str("Pending"),
            Some(SubscriptionStatus::Pending)
        );
        assert_eq!(SubscriptionStatus::from_str("enabled"), None);
        assert!(SubscriptionStatus::try_from("revoked").is_err());
    }

    #[test]
    fn as_str_fits_status_column() {
        for status in [
            SubscriptionStatus::Unsubscribed,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Subscribed,
        ] {
            assert!(status.as_str().len() <= 12);
            assert_eq!(SubscriptionStatus::from_str(status.as_str()), Some(status));
        }
    }
}
