//! In-process remote session backed by a [`Catalog`].
//!
//! Loads and mutation syncs are simulated as background jobs that complete
//! after the catalog's configured delays. Mutations are visible locally as
//! soon as they are accepted, like a real client-side playlist cache; the
//! playlist reports pending changes until every sync job has completed.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::link::{Link, LinkKind};
use super::{
    ListenerId, MainLoopNotifier, Notification, PlaylistEvent, PlaylistHandle, PlaylistSnapshot,
    ProcessOutcome, RemoteError, RemoteSession, ResolveError, Trigger,
};
use crate::catalog::Catalog;
use crate::track::Track;

/// Upper bound on playlist length accepted by the remote side.
pub const MAX_PLAYLIST_TRACKS: usize = 10_000;

/// Delay reported to the loop when no job is scheduled.
const IDLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

struct RemotePlaylist {
    title: String,
    owner: String,
    collaborative: bool,
    tracks: Vec<Track>,
    state: LoadState,
    pending_syncs: usize,
}

struct Subscription {
    playlist: PlaylistHandle,
    trigger: Trigger,
    listener: ListenerId,
}

enum Job {
    Load(PlaylistHandle),
    Settle(PlaylistHandle),
}

pub struct MemorySession {
    username: String,
    playlists: HashMap<String, RemotePlaylist>,
    subscriptions: Vec<Subscription>,
    jobs: BTreeMap<(Instant, u64), Job>,
    next_job: u64,
    outbox: VecDeque<Notification>,
    load_delay: Duration,
    sync_delay: Duration,
    notifier: MainLoopNotifier,
    logged_in: bool,
}

impl MemorySession {
    pub fn new(catalog: &Catalog, notifier: MainLoopNotifier) -> Self {
        let playlists = catalog
            .playlists
            .iter()
            .map(|entry| {
                let playlist = RemotePlaylist {
                    title: entry.title.clone(),
                    owner: entry.owner.clone(),
                    collaborative: entry.collaborative,
                    tracks: entry.tracks.iter().map(Track::from_canonical).collect(),
                    state: LoadState::Unloaded,
                    pending_syncs: 0,
                };
                (entry.uri.clone(), playlist)
            })
            .collect();

        info!(
            "session logged in as {} ({} playlists)",
            catalog.username,
            catalog.playlists.len()
        );

        Self {
            username: catalog.username.clone(),
            playlists,
            subscriptions: Vec::new(),
            jobs: BTreeMap::new(),
            next_job: 0,
            outbox: VecDeque::new(),
            load_delay: catalog.load_delay(),
            sync_delay: catalog.sync_delay(),
            notifier,
            logged_in: true,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Number of listeners currently subscribed, across all playlists.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn schedule(&mut self, delay: Duration, job: Job) {
        let key = (Instant::now() + delay, self.next_job);
        self.next_job += 1;
        self.jobs.insert(key, job);
        self.notifier.notify();
    }

    fn broadcast(&mut self, playlist: &PlaylistHandle, event: PlaylistEvent) {
        let trigger = event.trigger();
        for sub in &self.subscriptions {
            if sub.trigger == trigger && sub.playlist == *playlist {
                self.outbox.push_back(Notification {
                    listener: sub.listener,
                    playlist: sub.playlist.clone(),
                    event,
                });
            }
        }
        if !self.outbox.is_empty() {
            self.notifier.notify();
        }
    }

    /// Checks shared by every mutation: session alive, playlist loaded,
    /// account allowed to write.
    fn writable(&mut self, playlist: &PlaylistHandle) -> Result<&mut RemotePlaylist, RemoteError> {
        if !self.logged_in {
            return Err(RemoteError::LoggedOut);
        }
        let username = &self.username;
        let remote = self
            .playlists
            .get_mut(playlist.uri())
            .ok_or(RemoteError::InvalidIndata)?;
        if remote.state != LoadState::Loaded {
            return Err(RemoteError::IsLoading);
        }
        if remote.owner != *username && !remote.collaborative {
            return Err(RemoteError::PermissionDenied);
        }
        Ok(remote)
    }

    fn mark_pending(&mut self, playlist: &PlaylistHandle) {
        if let Some(remote) = self.playlists.get_mut(playlist.uri()) {
            remote.pending_syncs += 1;
        }
        self.broadcast(playlist, PlaylistEvent::UpdateInProgress { done: false });
        self.schedule(self.sync_delay, Job::Settle(playlist.clone()));
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::Load(playlist) => {
                if let Some(remote) = self.playlists.get_mut(playlist.uri()) {
                    remote.state = LoadState::Loaded;
                    debug!("playlist {playlist} loaded ({} tracks)", remote.tracks.len());
                }
                self.broadcast(&playlist, PlaylistEvent::StateChanged);
            }
            Job::Settle(playlist) => {
                let settled = match self.playlists.get_mut(playlist.uri()) {
                    Some(remote) => {
                        remote.pending_syncs = remote.pending_syncs.saturating_sub(1);
                        remote.pending_syncs == 0
                    }
                    None => false,
                };
                if settled {
                    debug!("playlist {playlist} changes settled");
                    self.broadcast(&playlist, PlaylistEvent::UpdateInProgress { done: true });
                }
            }
        }
    }
}

impl RemoteSession for MemorySession {
    fn resolve_playlist(&mut self, uri: &str) -> Result<PlaylistHandle, ResolveError> {
        let link = Link::parse(uri).map_err(|_| ResolveError::InvalidLink)?;
        if link.kind() != LinkKind::Playlist {
            return Err(ResolveError::NotAPlaylist);
        }
        let canonical = link.to_string();

        if !self.logged_in {
            return Err(ResolveError::NotFound);
        }
        let remote = self
            .playlists
            .get_mut(&canonical)
            .ok_or(ResolveError::NotFound)?;

        let handle = PlaylistHandle::new(&canonical);
        if remote.state == LoadState::Unloaded {
            remote.state = LoadState::Loading;
            trace!("loading playlist {handle}");
            self.schedule(self.load_delay, Job::Load(handle.clone()));
        }
        Ok(handle)
    }

    fn is_loaded(&self, playlist: &PlaylistHandle) -> bool {
        self.playlists
            .get(playlist.uri())
            .is_some_and(|p| p.state == LoadState::Loaded)
    }

    fn has_pending_changes(&self, playlist: &PlaylistHandle) -> bool {
        self.playlists
            .get(playlist.uri())
            .is_some_and(|p| p.pending_syncs > 0)
    }

    fn subscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId) {
        self.subscriptions.push(Subscription {
            playlist: playlist.clone(),
            trigger,
            listener,
        });
    }

    fn unsubscribe(&mut self, playlist: &PlaylistHandle, trigger: Trigger, listener: ListenerId) {
        self.subscriptions.retain(|sub| {
            !(sub.listener == listener && sub.trigger == trigger && sub.playlist == *playlist)
        });
        // Events already queued for this listener must not be delivered.
        self.outbox.retain(|n| n.listener != listener);
    }

    fn snapshot(&self, playlist: &PlaylistHandle) -> PlaylistSnapshot {
        match self.playlists.get(playlist.uri()) {
            Some(remote) => PlaylistSnapshot {
                uri: playlist.uri().to_string(),
                title: remote.title.clone(),
                owner_name: remote.owner.clone(),
                collaborative: remote.collaborative,
                tracks: remote.tracks.clone(),
            },
            None => PlaylistSnapshot {
                uri: playlist.uri().to_string(),
                title: String::new(),
                owner_name: String::new(),
                collaborative: false,
                tracks: Vec::new(),
            },
        }
    }

    fn track_count(&self, playlist: &PlaylistHandle) -> usize {
        self.playlists
            .get(playlist.uri())
            .map_or(0, |p| p.tracks.len())
    }

    fn insert_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        tracks: &[Track],
        index: usize,
    ) -> Result<(), RemoteError> {
        let remote = self.writable(playlist)?;
        if tracks.is_empty() {
            return Err(RemoteError::InvalidIndata);
        }
        if index > remote.tracks.len() {
            return Err(RemoteError::IndexOutOfRange);
        }
        if remote.tracks.len() + tracks.len() > MAX_PLAYLIST_TRACKS {
            return Err(RemoteError::PlaylistFull);
        }
        remote.tracks.splice(index..index, tracks.iter().cloned());
        trace!("inserted {} tracks into {playlist} at {index}", tracks.len());

        self.mark_pending(playlist);
        Ok(())
    }

    fn remove_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        indices: &[usize],
    ) -> Result<(), RemoteError> {
        let remote = self.writable(playlist)?;
        if indices.is_empty() {
            return Err(RemoteError::InvalidIndata);
        }
        if indices.iter().any(|&i| i >= remote.tracks.len()) {
            return Err(RemoteError::IndexOutOfRange);
        }
        let unique: HashSet<usize> = indices.iter().copied().collect();
        if unique.len() != indices.len() {
            return Err(RemoteError::InvalidIndata);
        }

        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        for index in sorted {
            remote.tracks.remove(index);
        }
        trace!("removed {} tracks from {playlist}", indices.len());

        self.mark_pending(playlist);
        Ok(())
    }

    fn parse_track(&self, reference: &str) -> Option<Track> {
        match Link::parse(reference) {
            Ok(link) if link.kind() == LinkKind::Track => {
                Some(Track::from_canonical(link.to_string()))
            }
            _ => None,
        }
    }

    fn process_events(&mut self) -> ProcessOutcome {
        let mut outcome = ProcessOutcome {
            notifications: Vec::new(),
            next_timeout: IDLE_TIMEOUT,
        };
        if !self.logged_in {
            return outcome;
        }

        let now = Instant::now();
        let due = self
            .jobs
            .first_key_value()
            .is_some_and(|((at, _), _)| *at <= now);
        if due {
            if let Some((_, job)) = self.jobs.pop_first() {
                self.run_job(job);
            }
        }

        outcome.notifications.extend(self.outbox.drain(..));

        outcome.next_timeout = match self.jobs.first_key_value() {
            Some(((at, _), _)) if *at <= now => Duration::ZERO,
            Some(((at, _), _)) => (*at - now).min(IDLE_TIMEOUT),
            None => IDLE_TIMEOUT,
        };
        outcome
    }

    fn logout(&mut self) {
        if !self.logged_in {
            return;
        }
        info!("session logging out");
        self.logged_in = false;
        self.jobs.clear();
        self.outbox.clear();
        self.subscriptions.clear();
    }
}
