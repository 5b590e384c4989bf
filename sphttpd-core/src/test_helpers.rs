//! Shared fixtures for core tests.

use crate::catalog::{Catalog, PlaylistEntry};
use crate::session::{
    ListenerId, PlaylistHandle, PlaylistSnapshot, ProcessOutcome, RemoteError, RemoteSession,
    ResolveError, Trigger,
};
use crate::track::Track;

/// Track URI with a 22 character id derived from `name`.
pub fn track(name: &str) -> Track {
    Track::from_canonical(format!("spotify:track:{name:0>22}"))
}

pub fn tracks(names: &[&str]) -> Vec<Track> {
    names.iter().map(|n| track(n)).collect()
}

pub fn playlist_uri(name: &str, owner: &str) -> String {
    format!("spotify:user:{owner}:playlist:{name:0>22}")
}

/// Account `liesen` with:
/// - `mine`: owned, tracks t1 t2
/// - `theirs`: owned by bob, track t1
/// - `shared`: owned by bob, collaborative, empty
pub fn sample_catalog() -> Catalog {
    let entry = |name: &str, owner: &str, collaborative: bool, names: &[&str]| PlaylistEntry {
        uri: playlist_uri(name, owner),
        title: name.to_string(),
        owner: owner.to_string(),
        collaborative,
        tracks: tracks(names).iter().map(|t| t.uri().to_string()).collect(),
    };

    Catalog {
        username: "liesen".to_string(),
        load_delay_ms: 100,
        sync_delay_ms: 200,
        playlists: vec![
            entry("mine", "liesen", false, &["t1", "t2"]),
            entry("theirs", "bob", false, &["t1"]),
            entry("shared", "bob", true, &[]),
        ],
    }
}

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true)
        .try_init();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Resolve(String),
    Subscribe(Trigger, ListenerId),
    Unsubscribe(Trigger, ListenerId),
    InsertTracks { count: usize, index: usize },
    RemoveTracks { indices: Vec<usize> },
}

/// Spy wrapper recording every state-changing call made on the session.
pub struct RecordingSession<S> {
    inner: S,
    calls: Vec<Call>,
    mutations: usize,
    reject_mutation: Option<(usize, RemoteError)>,
}

impl<S: RemoteSession> RecordingSession<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Vec::new(),
            mutations: 0,
            reject_mutation: None,
        }
    }

    /// Reject the `nth` mutation call (1-based, counted from now) with `err`
    /// without forwarding it to the inner session.
    pub fn reject_mutation(&mut self, nth: usize, err: RemoteError) {
        self.mutations = 0;
        self.reject_mutation = Some((nth, err));
    }

    fn injected_rejection(&mut self) -> Result<(), RemoteError> {
        self.mutations += 1;
        match &self.reject_mutation {
            Some((nth, err)) if *nth == self.mutations => Err(err.clone()),
            _ => Ok(()),
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn mutation_calls(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::InsertTracks { .. } | Call::RemoveTracks { .. }))
            .collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: RemoteSession> RemoteSession for RecordingSession<S> {
    fn resolve_playlist(&mut self, uri: &str) -> Result<PlaylistHandle, ResolveError> {
        self.calls.push(Call::Resolve(uri.to_string()));
        self.inner.resolve_playlist(uri)
    }

    fn is_loaded(&self, playlist: &PlaylistHandle) -> bool {
        self.inner.is_loaded(playlist)
    }

    fn has_pending_changes(&self, playlist: &PlaylistHandle) -> bool {
        self.inner.has_pending_changes(playlist)
    }

    fn subscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId) {
        self.calls.push(Call::Subscribe(trigger, listener));
        self.inner.subscribe(playlist, trigger, listener)
    }

    fn unsubscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId) {
        self.calls.push(Call::Unsubscribe(trigger, listener));
        self.inner.unsubscribe(playlist, trigger, listener)
    }

    fn snapshot(&self, playlist: &PlaylistHandle) -> PlaylistSnapshot {
        self.inner.snapshot(playlist)
    }

    fn track_count(&self, playlist: &PlaylistHandle) -> usize {
        self.inner.track_count(playlist)
    }

    fn insert_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        tracks: &[Track],
        index: usize,
    ) -> Result<(), RemoteError> {
        self.calls.push(Call::InsertTracks {
            count: tracks.len(),
            index,
        });
        self.injected_rejection()?;
        self.inner.insert_tracks(playlist, tracks, index)
    }

    fn remove_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        indices: &[usize],
    ) -> Result<(), RemoteError> {
        self.calls.push(Call::RemoveTracks {
            indices: indices.to_vec(),
        });
        self.injected_rejection()?;
        self.inner.remove_tracks(playlist, indices)
    }

    fn parse_track(&self, reference: &str) -> Option<Track> {
        self.inner.parse_track(reference)
    }

    fn process_events(&mut self) -> ProcessOutcome {
        self.inner.process_events()
    }

    fn logout(&mut self) {
        self.inner.logout()
    }
}
