//! Contract between the core and the remote playlist session.
//!
//! The remote side reports completion of long-running work only through
//! notifications that are drained on the event loop via
//! [`RemoteSession::process_events`]. Everything here is driven from that
//! single loop, so implementations need no interior locking.

pub mod link;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

use crate::track::{Track, TrackSequence};

/// Reference to a remote playlist. Clones share the same reference; the
/// playlist stays referenced for as long as any request holds a clone.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PlaylistHandle(Arc<str>);

impl PlaylistHandle {
    pub fn new(uri: &str) -> Self {
        Self(Arc::from(uri))
    }

    pub fn uri(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PlaylistHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaylistHandle({})", self.0)
    }
}

impl fmt::Display for PlaylistHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which remote lifecycle signal a listener waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The playlist finished loading.
    Loaded,
    /// A submitted mutation has been fully reflected remotely.
    MutationSettled,
}

/// Identifies one subscribed listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistEvent {
    /// Load state or metadata changed. Delivered to `Trigger::Loaded` listeners.
    StateChanged,
    /// A remote update started (`done == false`) or finished. Delivered to
    /// `Trigger::MutationSettled` listeners.
    UpdateInProgress { done: bool },
}

impl PlaylistEvent {
    pub fn trigger(self) -> Trigger {
        match self {
            PlaylistEvent::StateChanged => Trigger::Loaded,
            PlaylistEvent::UpdateInProgress { .. } => Trigger::MutationSettled,
        }
    }
}

/// An event addressed to one subscribed listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub listener: ListenerId,
    pub playlist: PlaylistHandle,
    pub event: PlaylistEvent,
}

/// Result of one `process_events` call.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub notifications: Vec<Notification>,
    /// When to call again. Zero means "immediately, there is more work".
    pub next_timeout: Duration,
}

/// Materialised playlist state, as served to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlaylistSnapshot {
    pub uri: String,
    pub title: String,
    #[serde(rename = "creator")]
    pub owner_name: String,
    pub collaborative: bool,
    pub tracks: TrackSequence,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Link not found")]
    InvalidLink,
    #[error("Not a playlist link")]
    NotAPlaylist,
    #[error("Playlist not found")]
    NotFound,
}

/// Immediate rejection of a remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Index out of range")]
    IndexOutOfRange,
    #[error("Invalid indata")]
    InvalidIndata,
    #[error("Resource not loaded yet")]
    IsLoading,
    #[error("Playlist is full")]
    PlaylistFull,
    #[error("Session logged out")]
    LoggedOut,
}

/// Wakes the event loop from the remote session's worker context.
#[derive(Clone, Debug, Default)]
pub struct MainLoopNotifier(Arc<Notify>);

impl MainLoopNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await
    }
}

/// Everything the core needs from the remote session.
///
/// Listeners are identified by [`ListenerId`]; a subscribed listener receives
/// every event matching its trigger until it is unsubscribed.
pub trait RemoteSession: Send {
    fn resolve_playlist(&mut self, uri: &str) -> Result<PlaylistHandle, ResolveError>;

    fn is_loaded(&self, playlist: &PlaylistHandle) -> bool;

    fn has_pending_changes(&self, playlist: &PlaylistHandle) -> bool;

    fn subscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId);

    fn unsubscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId);

    /// Current state of a loaded playlist, including changes not yet settled.
    fn snapshot(&self, playlist: &PlaylistHandle) -> PlaylistSnapshot;

    /// Current track count, including changes not yet settled.
    fn track_count(&self, playlist: &PlaylistHandle) -> usize;

    fn insert_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        tracks: &[Track],
        index: usize,
    ) -> Result<(), RemoteError>;

    fn remove_tracks(&mut self, playlist: &PlaylistHandle, indices: &[usize])
        -> Result<(), RemoteError>;

    /// Parse a user-supplied reference into a track, `None` if it is not a
    /// valid track link.
    fn parse_track(&self, reference: &str) -> Option<Track>;

    /// Run due background work and collect notifications for subscribers.
    fn process_events(&mut self) -> ProcessOutcome;

    fn logout(&mut self);
}
