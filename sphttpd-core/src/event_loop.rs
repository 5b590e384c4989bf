//! The single task that owns the remote session.
//!
//! HTTP handlers never touch the session. They send a [`Command`] through a
//! [`SessionHandle`] and await the reply on a oneshot channel; the loop
//! interleaves those commands with the session's own background work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::dispatch::{Dispatcher, Reply, RequestContext, Responder};
use crate::session::{MainLoopNotifier, RemoteSession};

/// Requests buffered before senders wait on the loop.
const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
pub struct Command {
    pub request: RequestContext,
    pub responder: Responder,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("session event loop is not running")]
pub struct LoopClosed;

/// Cloneable entry point into the event loop.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    next_request: Arc<AtomicU64>,
}

impl SessionHandle {
    pub async fn execute(&self, request: RequestContext) -> Result<Reply, LoopClosed> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (responder, reply) = Responder::channel(request_id);
        self.commands
            .send(Command { request, responder })
            .await
            .map_err(|_| LoopClosed)?;
        reply.await.map_err(|_| LoopClosed)
    }
}

pub struct EventLoop<S> {
    dispatcher: Dispatcher<S>,
    notifier: MainLoopNotifier,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl<S: RemoteSession> EventLoop<S> {
    /// `notifier` must be the one the session wakes when it has work.
    pub fn new(
        session: S,
        notifier: MainLoopNotifier,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let event_loop = Self {
            dispatcher: Dispatcher::new(session),
            notifier,
            commands: rx,
            shutdown,
        };
        let handle = SessionHandle {
            commands: tx,
            next_request: Arc::new(AtomicU64::new(1)),
        };
        (event_loop, handle)
    }

    /// Run until shutdown is signalled or every handle is dropped. Parked
    /// requests are answered and the session logged out before returning it.
    pub async fn run(mut self) -> S {
        info!("session event loop started");
        let mut wake_at = Instant::now();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command { request, responder }) => {
                        self.dispatcher.handle(request, responder);
                    }
                    None => {
                        info!("all session handles dropped");
                        break;
                    }
                },
                _ = self.notifier.notified() => {
                    wake_at = Instant::now() + self.dispatcher.drain_events();
                }
                _ = sleep_until(wake_at) => {
                    wake_at = Instant::now() + self.dispatcher.drain_events();
                }
                _ = self.shutdown.changed() => {
                    info!("session event loop shutting down");
                    break;
                }
            }
        }

        self.commands.close();
        while let Ok(Command { responder, .. }) = self.commands.try_recv() {
            debug!("request {} arrived during shutdown", responder.request_id());
            drop(responder);
        }
        self.dispatcher.shutdown();
        self.dispatcher.into_session()
    }
}
