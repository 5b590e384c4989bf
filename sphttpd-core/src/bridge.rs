//! One-shot adapter from remote playlist notifications to deferred work.
//!
//! A registration subscribes a fresh listener on the remote session and owns
//! the caller's payload. When a notification satisfies the registration's
//! trigger, the bridge unsubscribes the listener and removes the entry
//! before handing the payload back, so the caller may re-register on the
//! same playlist while handling it and the old listener can never fire
//! again.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::session::{
    ListenerId, Notification, PlaylistEvent, PlaylistHandle, RemoteSession, Trigger,
};

struct Registration<C> {
    playlist: PlaylistHandle,
    trigger: Trigger,
    payload: C,
}

/// Receipt for an outstanding registration. Cancelling consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingCompletion {
    listener: ListenerId,
}

impl PendingCompletion {
    pub fn listener(&self) -> ListenerId {
        self.listener
    }
}

/// A registration whose trigger fired. The bridge no longer references it.
#[derive(Debug)]
pub struct Fired<C> {
    pub listener: ListenerId,
    pub playlist: PlaylistHandle,
    pub trigger: Trigger,
    pub payload: C,
}

pub struct CompletionBridge<C> {
    next_listener: u64,
    pending: HashMap<ListenerId, Registration<C>>,
}

impl<C> Default for CompletionBridge<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CompletionBridge<C> {
    pub fn new() -> Self {
        Self {
            next_listener: 1,
            pending: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Park `payload` until `trigger` holds for `playlist`.
    ///
    /// Never fires synchronously: a playlist that is already loaded will
    /// not produce a load notification, so callers check state first.
    pub fn await_event<S: RemoteSession + ?Sized>(
        &mut self,
        session: &mut S,
        playlist: PlaylistHandle,
        trigger: Trigger,
        payload: C,
    ) -> PendingCompletion {
        let listener = ListenerId(self.next_listener);
        self.next_listener += 1;

        session.subscribe(&playlist, trigger, listener);
        debug!("listener {listener} waiting for {trigger:?} on {playlist}");

        let previous = self.pending.insert(
            listener,
            Registration {
                playlist,
                trigger,
                payload,
            },
        );
        debug_assert!(previous.is_none(), "listener ids are never reused");

        PendingCompletion { listener }
    }

    /// Withdraw a registration that has not fired yet, returning its payload.
    pub fn cancel<S: RemoteSession + ?Sized>(
        &mut self,
        session: &mut S,
        pending: PendingCompletion,
    ) -> Option<C> {
        let registration = self.pending.remove(&pending.listener)?;
        session.unsubscribe(&registration.playlist, registration.trigger, pending.listener);
        debug!(
            "listener {} cancelled on {}",
            pending.listener, registration.playlist
        );
        Some(registration.payload)
    }

    /// Route one notification. Returns the registration if this event
    /// completes it; by then it is unsubscribed and forgotten.
    pub fn deliver<S: RemoteSession + ?Sized>(
        &mut self,
        session: &mut S,
        notification: &Notification,
    ) -> Option<Fired<C>> {
        let Some(registration) = self.pending.get(&notification.listener) else {
            trace!(
                "dropping {:?} for unknown listener {}",
                notification.event,
                notification.listener
            );
            return None;
        };

        if registration.trigger != notification.event.trigger()
            || !satisfied(session, &registration.playlist, notification.event)
        {
            return None;
        }

        let registration = self.pending.remove(&notification.listener)?;
        session.unsubscribe(
            &registration.playlist,
            registration.trigger,
            notification.listener,
        );
        debug!(
            "listener {} fired for {:?} on {}",
            notification.listener, registration.trigger, registration.playlist
        );

        Some(Fired {
            listener: notification.listener,
            playlist: registration.playlist,
            trigger: registration.trigger,
            payload: registration.payload,
        })
    }

    /// Unsubscribe and return every outstanding registration, oldest first.
    pub fn drain<S: RemoteSession + ?Sized>(&mut self, session: &mut S) -> Vec<Fired<C>> {
        let mut listeners: Vec<ListenerId> = self.pending.keys().copied().collect();
        listeners.sort_unstable();

        listeners
            .into_iter()
            .filter_map(|listener| {
                let registration = self.pending.remove(&listener)?;
                session.unsubscribe(&registration.playlist, registration.trigger, listener);
                Some(Fired {
                    listener,
                    playlist: registration.playlist,
                    trigger: registration.trigger,
                    payload: registration.payload,
                })
            })
            .collect()
    }
}

fn satisfied<S: RemoteSession + ?Sized>(
    session: &S,
    playlist: &PlaylistHandle,
    event: PlaylistEvent,
) -> bool {
    match event {
        PlaylistEvent::StateChanged => session.is_loaded(playlist),
        PlaylistEvent::UpdateInProgress { done } => done,
    }
}
