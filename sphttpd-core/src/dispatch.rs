//! Per-request state machine.
//!
//! A request is routed and validated, its playlist resolved, and then either
//! executed straight away or parked in the [`CompletionBridge`] until the
//! playlist has loaded. Mutations park the request a second time until the
//! remote side reports the change settled; the reply is then the freshly
//! read playlist.

use std::collections::HashMap;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::apply::apply;
use crate::bridge::CompletionBridge;
use crate::diff::diff;
use crate::session::{
    Notification, PlaylistHandle, RemoteError, RemoteSession, ResolveError, Trigger,
};
use crate::track::Track;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Put,
    Post,
    Other(String),
}

/// Parsed inbound request, as handed over by the HTTP layer.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: RequestMethod,
    /// Percent-decoded, non-empty path segments.
    pub path_segments: Vec<String>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    NotImplemented,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::NotImplemented => 501,
            Status::ServiceUnavailable => 503,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: Status,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: Status::Ok,
            body,
        }
    }

    pub fn error(err: &RequestError) -> Self {
        Self {
            status: err.status(),
            body: json!({ "message": err.to_string() }),
        }
    }

    /// The `message` field of an error reply.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{0}")]
    MalformedRequest(String),
    #[error("No valid tracks")]
    NoValidInput,
    #[error("{0}")]
    RemoteRejection(RemoteError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Not Implemented")]
    Unimplemented,
    #[error("Session logged out")]
    ShuttingDown,
}

impl RequestError {
    fn malformed(message: &str) -> Self {
        RequestError::MalformedRequest(message.to_string())
    }

    pub fn status(&self) -> Status {
        match self {
            RequestError::MalformedRequest(_)
            | RequestError::NoValidInput
            | RequestError::RemoteRejection(_) => Status::BadRequest,
            RequestError::Resolve(ResolveError::NotAPlaylist) => Status::BadRequest,
            RequestError::Resolve(ResolveError::InvalidLink | ResolveError::NotFound) => {
                Status::NotFound
            }
            RequestError::Unimplemented => Status::NotImplemented,
            RequestError::ShuttingDown => Status::ServiceUnavailable,
        }
    }
}

/// The pending reply of one request. Consumed by the single reply it sends.
#[derive(Debug)]
pub struct Responder {
    request_id: u64,
    tx: oneshot::Sender<Reply>,
}

impl Responder {
    pub fn channel(request_id: u64) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { request_id, tx }, rx)
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn send(self, reply: Reply) {
        trace!("request {} answered {}", self.request_id, reply.status.code());
        if self.tx.send(reply).is_err() {
            debug!("request {}: client went away, reply discarded", self.request_id);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    ReadPlaylist,
    ReadCollaborative,
    /// `items` is the raw JSON array; entries are parsed once the playlist
    /// is available.
    AddTracks { index: usize, items: Vec<Value> },
    RemoveTracks { index: usize, count: usize },
    Patch { items: Vec<Value> },
}

/// What to do once a parked request fires.
#[derive(Debug)]
enum Step {
    Execute(Operation),
    RespondWithPlaylist,
}

#[derive(Debug)]
struct Deferred {
    responder: Responder,
    step: Step,
}

enum Effect {
    Snapshot,
    Collaborative(bool),
    Mutated,
}

pub struct Dispatcher<S> {
    session: S,
    bridge: CompletionBridge<Deferred>,
}

impl<S: RemoteSession> Dispatcher<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            bridge: CompletionBridge::new(),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    /// Requests currently parked on a remote event.
    pub fn pending_requests(&self) -> usize {
        self.bridge.len()
    }

    pub fn handle(&mut self, request: RequestContext, responder: Responder) {
        let (uri, operation) = match route(&request) {
            Ok(routed) => routed,
            Err(err) => return reply_error(responder, err),
        };
        debug!(
            "request {} routed to {operation:?} on {uri}",
            responder.request_id()
        );

        let playlist = match self.session.resolve_playlist(&uri) {
            Ok(playlist) => playlist,
            Err(err) => return reply_error(responder, err.into()),
        };

        if self.session.is_loaded(&playlist) {
            self.execute(playlist, operation, responder);
        } else {
            self.bridge.await_event(
                &mut self.session,
                playlist,
                Trigger::Loaded,
                Deferred {
                    responder,
                    step: Step::Execute(operation),
                },
            );
        }
    }

    /// Route one remote notification, resuming the request it completes.
    pub fn deliver(&mut self, notification: &Notification) {
        let Some(fired) = self.bridge.deliver(&mut self.session, notification) else {
            return;
        };
        let Deferred { responder, step } = fired.payload;
        match step {
            Step::Execute(operation) => self.execute(fired.playlist, operation, responder),
            Step::RespondWithPlaylist => self.reply_playlist(&fired.playlist, responder),
        }
    }

    /// Let the session run due work until it reports a non-zero delay,
    /// delivering every notification on the way. Returns that delay.
    pub fn drain_events(&mut self) -> std::time::Duration {
        let mut rounds = 0usize;
        loop {
            let outcome = self.session.process_events();
            rounds += 1;
            for notification in &outcome.notifications {
                self.deliver(notification);
            }
            if !outcome.next_timeout.is_zero() {
                trace!(
                    "drained session in {rounds} rounds, next in {:?}",
                    outcome.next_timeout
                );
                return outcome.next_timeout;
            }
        }
    }

    /// Answer every parked request and log the session out.
    pub fn shutdown(&mut self) {
        let parked = self.bridge.drain(&mut self.session);
        if !parked.is_empty() {
            warn!("answering {} parked requests before logout", parked.len());
        }
        for fired in parked {
            reply_error(fired.payload.responder, RequestError::ShuttingDown);
        }
        self.session.logout();
    }

    fn execute(&mut self, playlist: PlaylistHandle, operation: Operation, responder: Responder) {
        let effect = match operation {
            Operation::ReadPlaylist => Ok(Effect::Snapshot),
            Operation::ReadCollaborative => Ok(Effect::Collaborative(
                self.session.snapshot(&playlist).collaborative,
            )),
            Operation::AddTracks { index, items } => self.add_tracks(&playlist, index, &items),
            Operation::RemoveTracks { index, count } => {
                self.remove_tracks(&playlist, index, count)
            }
            Operation::Patch { items } => self.patch(&playlist, &items),
        };

        match effect {
            Ok(Effect::Snapshot) => self.reply_playlist(&playlist, responder),
            Ok(Effect::Collaborative(collaborative)) => {
                responder.send(Reply::ok(json!({ "collaborative": collaborative })))
            }
            Ok(Effect::Mutated) => self.settle(playlist, responder),
            Err(err) => reply_error(responder, err),
        }
    }

    fn add_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        index: usize,
        items: &[Value],
    ) -> Result<Effect, RequestError> {
        if items.is_empty() {
            return Ok(Effect::Snapshot);
        }
        let tracks = self.parse_tracks(items)?;
        self.session
            .insert_tracks(playlist, &tracks, index)
            .map_err(|err| rejected(playlist, err))?;
        Ok(Effect::Mutated)
    }

    fn remove_tracks(
        &mut self,
        playlist: &PlaylistHandle,
        index: usize,
        count: usize,
    ) -> Result<Effect, RequestError> {
        if index.saturating_add(count) > self.session.track_count(playlist) {
            return Err(rejected(playlist, RemoteError::IndexOutOfRange));
        }
        let indices: Vec<usize> = (index..index + count).collect();
        self.session
            .remove_tracks(playlist, &indices)
            .map_err(|err| rejected(playlist, err))?;
        Ok(Effect::Mutated)
    }

    fn patch(
        &mut self,
        playlist: &PlaylistHandle,
        items: &[Value],
    ) -> Result<Effect, RequestError> {
        if items.is_empty() {
            return Ok(Effect::Snapshot);
        }
        let desired = self.parse_tracks(items)?;
        let current = self.session.snapshot(playlist).tracks;

        let script = diff(&current, &desired);
        if script.is_identity() {
            debug!("patch on {playlist} is a no-op");
            return Ok(Effect::Snapshot);
        }
        let (removed, inserted) = script.change_counts();
        debug!("patch on {playlist}: -{removed} +{inserted}\n{script}");

        let report = apply(&script, playlist, &mut self.session, &desired).map_err(|err| {
            warn!(
                "patch on {playlist} stopped after {} calls: {}",
                err.submitted, err.source
            );
            RequestError::RemoteRejection(err.source)
        })?;
        trace!("patch on {playlist} submitted {} calls", report.calls);
        Ok(Effect::Mutated)
    }

    /// Non-string entries and references that are not track links are skipped.
    fn parse_tracks(&self, items: &[Value]) -> Result<Vec<Track>, RequestError> {
        let tracks: Vec<Track> = items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|reference| self.session.parse_track(reference))
            .collect();
        if tracks.is_empty() {
            return Err(RequestError::NoValidInput);
        }
        Ok(tracks)
    }

    /// Reply now if the mutation is already observable, otherwise park the
    /// request until the remote side settles it.
    fn settle(&mut self, playlist: PlaylistHandle, responder: Responder) {
        if !self.session.has_pending_changes(&playlist) {
            return self.reply_playlist(&playlist, responder);
        }
        self.bridge.await_event(
            &mut self.session,
            playlist,
            Trigger::MutationSettled,
            Deferred {
                responder,
                step: Step::RespondWithPlaylist,
            },
        );
    }

    fn reply_playlist(&self, playlist: &PlaylistHandle, responder: Responder) {
        let snapshot = self.session.snapshot(playlist);
        responder.send(Reply::ok(json!(snapshot)));
    }
}

fn reply_error(responder: Responder, err: RequestError) {
    debug!("request {} failed: {err}", responder.request_id());
    responder.send(Reply::error(&err));
}

fn rejected(playlist: &PlaylistHandle, err: RemoteError) -> RequestError {
    warn!("remote rejected change to {playlist}: {err}");
    RequestError::RemoteRejection(err)
}

/// Pick the playlist and operation, validating every query parameter and
/// the body before anything reaches the remote session.
pub fn route(request: &RequestContext) -> Result<(String, Operation), RequestError> {
    let mutating = match request.method {
        RequestMethod::Get => false,
        RequestMethod::Put | RequestMethod::Post => true,
        RequestMethod::Other(_) => return Err(RequestError::Unimplemented),
    };

    let segments: Vec<&str> = request.path_segments.iter().map(String::as_str).collect();
    let rest = match segments.as_slice() {
        ["playlist", rest @ ..] => rest,
        _ => return Err(RequestError::malformed("Bad Request")),
    };

    let (uri, action) = match rest {
        [] if mutating => return Err(RequestError::Unimplemented),
        [] => return Err(RequestError::malformed("Bad Request")),
        [uri] => (*uri, None),
        [uri, action] => (*uri, Some(*action)),
        _ => return Err(RequestError::Unimplemented),
    };

    let operation = match (mutating, action) {
        (false, None) => Operation::ReadPlaylist,
        (false, Some("collaborative")) => Operation::ReadCollaborative,
        (true, Some("add")) => Operation::AddTracks {
            index: query_index(&request.query)?,
            items: track_list(&request.body)?,
        },
        (true, Some("remove")) => Operation::RemoveTracks {
            index: query_index(&request.query)?,
            count: query_count(&request.query)?,
        },
        (true, Some("patch")) => Operation::Patch {
            items: track_list(&request.body)?,
        },
        _ => return Err(RequestError::Unimplemented),
    };

    Ok((uri.to_string(), operation))
}

fn query_index(query: &HashMap<String, String>) -> Result<usize, RequestError> {
    query
        .get("index")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| RequestError::malformed("Bad parameter: index must be numeric"))
}

fn query_count(query: &HashMap<String, String>) -> Result<usize, RequestError> {
    query
        .get("count")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|count| *count >= 1)
        .ok_or_else(|| {
            RequestError::malformed("Bad parameter: count must be numeric and positive")
        })
}

fn track_list(body: &[u8]) -> Result<Vec<Value>, RequestError> {
    if body.is_empty() {
        return Err(RequestError::malformed("No body"));
    }
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| RequestError::MalformedRequest(e.to_string()))?;
    match json {
        Value::Array(items) => Ok(items),
        _ => Err(RequestError::malformed("Not valid JSON array")),
    }
}
