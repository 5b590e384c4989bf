use std::fmt;

use serde::{Deserialize, Serialize};

/// A catalog track, identified only by its canonical URI.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Track(String);

/// Playlist order. Two sequences compare by track identity only.
pub type TrackSequence = Vec<Track>;

impl Track {
    /// Wrap an already canonical URI. Parsing user input goes through
    /// [`crate::session::RemoteSession::parse_track`] instead.
    pub fn from_canonical(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn uri(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Track {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
