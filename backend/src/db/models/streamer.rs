use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A streamer, member of PogScience.
///
/// The `live*` fields are a snapshot maintained by the Twitch synchronizers and
/// the EventSub webhook; they are never edited by hand. Image fields hold paths
/// relative to the media root.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Streamer {
    pub id: String,
    pub user_id: Option<String>,

    pub name: String,
    pub twitch_login: String,
    pub twitch_id: i64,
    pub description: String,
    pub long_description: String,
    pub profile_image: Option<String>,
    pub background_image: Option<String>,

    pub live: bool,
    pub live_title: Option<String>,
    pub live_game_name: Option<String>,
    pub live_preview: Option<String>,
    pub live_spectators: Option<i64>,

    pub colours: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamer {
    pub name: String,
    pub twitch_login: String,
    pub twitch_id: i64,
    pub description: String,
    pub long_description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStreamer {
    pub long_description: Option<String>,
    /// `Some(None)` unlinks the internal account.
    #[serde(default, with = "double_option")]
    pub user_id: Option<Option<String>>,
    pub colours: Option<Vec<Colour>>,
}

/// An RGB colour with components in `[0, 1]`.
pub type Colour = [f32; 3];

/// Number of colours a streamer palette holds.
pub const PALETTE_SIZE: usize = 3;

impl Streamer {
    pub fn twitch_url(&self) -> String {
        format!("https://twitch.tv/{}", self.twitch_login)
    }

    /// Parses the stored palette. Malformed values yield an empty palette.
    pub fn colours(&self) -> Vec<Colour> {
        self.colours
            .as_deref()
            .and_then(parse_colours)
            .unwrap_or_default()
    }

    pub fn set_colours(&mut self, colours: &[Colour]) {
        self.colours = if colours.is_empty() {
            None
        } else {
            Some(format_colours(colours))
        };
    }
}

impl fmt::Display for Streamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn parse_colours(raw: &str) -> Option<Vec<Colour>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }

    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<f32>().ok())
        .collect::<Option<Vec<_>>>()?;

    if values.len() % 3 != 0 || values.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return None;
    }

    Some(values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

// Three digits per component keeps a full palette within the 71-char column.
fn format_colours(colours: &[Colour]) -> String {
    colours
        .iter()
        .take(PALETTE_SIZE)
        .flat_map(|c| c.iter())
        .map(|v| format!("{:.3}", v.clamp(0.0, 1.0)))
        .collect::<Vec<_>>()
        .join(",")
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
