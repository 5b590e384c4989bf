//! Replay an [`EditScript`] against a live remote playlist.
//!
//! Edits are submitted in script order without waiting for each to settle.
//! Script positions are in the source's index space; every call is shifted
//! by the net number of tracks inserted minus removed so far, so positions
//! always match the remote sequence as it stands when the call is made.

use thiserror::Error;
use tracing::{trace, warn};

use crate::diff::{Edit, EditScript};
use crate::session::{PlaylistHandle, RemoteError, RemoteSession};
use crate::track::Track;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source}")]
pub struct MutationError {
    #[source]
    pub source: RemoteError,
    /// Calls accepted before the failing one. They are not rolled back.
    pub submitted: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub calls: usize,
    pub inserted: usize,
    pub removed: usize,
}

/// Submit the remote calls for `script`.
///
/// Stops at the first rejected call. `desired` is only used to check the
/// outcome: a mismatch is logged, since the remote side is authoritative and
/// may have merged concurrent changes.
pub fn apply<S: RemoteSession + ?Sized>(
    script: &EditScript,
    playlist: &PlaylistHandle,
    session: &mut S,
    desired: &[Track],
) -> Result<ApplyReport, MutationError> {
    let mut report = ApplyReport::default();
    let mut shift: isize = 0;

    for edit in script.edits() {
        match edit {
            Edit::Retain { .. } => {}
            Edit::Delete { start, len } => {
                let from = live_index(*start, shift);
                let indices: Vec<usize> = (from..from + len).collect();
                trace!(
                    "remove {len} at {from} from {playlist} ({} tracks)",
                    session.track_count(playlist)
                );
                session
                    .remove_tracks(playlist, &indices)
                    .map_err(|source| MutationError {
                        source,
                        submitted: report.calls,
                    })?;
                report.calls += 1;
                report.removed += len;
                shift -= *len as isize;
            }
            Edit::Insert { at, tracks } => {
                let index = live_index(*at, shift);
                trace!(
                    "insert {} at {index} into {playlist} ({} tracks)",
                    tracks.len(),
                    session.track_count(playlist)
                );
                session
                    .insert_tracks(playlist, tracks, index)
                    .map_err(|source| MutationError {
                        source,
                        submitted: report.calls,
                    })?;
                report.calls += 1;
                report.inserted += tracks.len();
                shift += tracks.len() as isize;
            }
        }
    }

    let outcome = session.snapshot(playlist).tracks;
    if outcome != desired {
        warn!(
            "playlist {playlist} diverged after patch: {} tracks, expected {}",
            outcome.len(),
            desired.len()
        );
    }

    Ok(report)
}

fn live_index(position: usize, shift: isize) -> usize {
    position.saturating_add_signed(shift)
}
