use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::session::link::{Link, LinkKind};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("read catalog: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

/// The account and playlists an in-memory session serves.
#[derive(Clone, Debug, Deserialize)]
pub struct Catalog {
    pub username: String,
    #[serde(default = "default_load_delay_ms")]
    pub load_delay_ms: u64,
    #[serde(default = "default_sync_delay_ms")]
    pub sync_delay_ms: u64,
    #[serde(default)]
    pub playlists: Vec<PlaylistEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaylistEntry {
    pub uri: String,
    pub title: String,
    pub owner: String,
    #[serde(default)]
    pub collaborative: bool,
    #[serde(default)]
    pub tracks: Vec<String>,
}

fn default_load_delay_ms() -> u64 {
    250
}

fn default_sync_delay_ms() -> u64 {
    500
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, CatalogError> {
        let mut catalog: Catalog = serde_yaml::from_str(content)?;
        catalog.normalise()?;
        Ok(catalog)
    }

    pub fn find_by_uri(&self, uri: &str) -> Option<&PlaylistEntry> {
        self.playlists.iter().find(|p| p.uri == uri)
    }

    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    /// Rewrite every link to its canonical URI and reject anything that is
    /// not a playlist / track where one is expected.
    fn normalise(&mut self) -> Result<(), CatalogError> {
        if self.username.trim().is_empty() {
            return Err(CatalogError::Invalid("username must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for playlist in &mut self.playlists {
            playlist.uri = canonical(&playlist.uri, LinkKind::Playlist)?;
            if !seen.insert(playlist.uri.clone()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate playlist {}",
                    playlist.uri
                )));
            }
            for track in &mut playlist.tracks {
                *track = canonical(track, LinkKind::Track)?;
            }
        }
        Ok(())
    }
}

fn canonical(input: &str, expected: LinkKind) -> Result<String, CatalogError> {
    let link = Link::parse(input).map_err(|e| CatalogError::Invalid(e.to_string()))?;
    if link.kind() != expected {
        return Err(CatalogError::Invalid(format!(
            "expected a {expected:?} link, got {input}"
        )));
    }
    Ok(link.to_string())
}
