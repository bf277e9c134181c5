//! Publish session state and the events it reports
//!
//! Every transition of a session goes through [`SessionState::transition`],
//! which is the single serialization point shared by the caller-facing API
//! and the background transport driver.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use str0m::IceConnectionState;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Lifecycle of one publish session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Peer connection created, no tracks yet.
    New,
    /// At least one track registered, not negotiated.
    TracksAdded,
    /// Offer created, signaling exchange in flight (or failed).
    Negotiating,
    /// Remote answer applied; media flows once the transport is up.
    Connected,
    /// The transport reported a disconnection.
    Disconnected,
    /// The transport failed.
    Failed,
    /// Resources released.
    Closed,
}

impl ConnectionState {
    /// States from which the session can never publish again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, TracksAdded) | (New, Negotiating) => true,
            (TracksAdded, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Negotiating | Connected, Disconnected | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// ICE agent state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
}

impl From<IceConnectionState> for IceState {
    fn from(state: IceConnectionState) -> Self {
        match state {
            IceConnectionState::New => IceState::New,
            IceConnectionState::Checking => IceState::Checking,
            IceConnectionState::Connected => IceState::Connected,
            IceConnectionState::Completed => IceState::Completed,
            IceConnectionState::Disconnected => IceState::Disconnected,
        }
    }
}

/// Advisory notifications for logging and presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },
    IceStateChanged {
        state: IceState,
        at: DateTime<Utc>,
    },
    /// ICE and DTLS are up, media is being written.
    PeerConnected { at: DateTime<Utc> },
    /// A published track stopped producing samples.
    TrackEnded { track_id: String, at: DateTime<Utc> },
}

impl SessionEvent {
    pub fn ice(state: IceState) -> Self {
        SessionEvent::IceStateChanged {
            state,
            at: Utc::now(),
        }
    }

    pub fn peer_connected() -> Self {
        SessionEvent::PeerConnected { at: Utc::now() }
    }

    pub fn track_ended(track_id: &str) -> Self {
        SessionEvent::TrackEnded {
            track_id: track_id.to_owned(),
            at: Utc::now(),
        }
    }
}

/// Shared state cell of one session.
#[derive(Debug)]
pub struct SessionState {
    current: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> SessionState {
        let (current, _) = watch::channel(ConnectionState::New);
        SessionState { current, events }
    }

    pub fn current(&self) -> ConnectionState {
        *self.current.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.current.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Moves to `next` if that is legal from the current state.
    ///
    /// Returns the previous state when the transition happened. Illegal
    /// transitions (including re-entering the current state) are ignored.
    pub fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let mut previous = None;
        self.current.send_if_modified(|state| {
            if !state.can_transition_to(next) {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });

        match previous {
            Some(from) => {
                info!("Session state: {} -> {}", from, next);
                self.emit(SessionEvent::StateChanged {
                    from,
                    to: next,
                    at: Utc::now(),
                });
            }
            None => debug!("Ignoring transition to {} from {}", next, self.current()),
        }

        previous
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine, events are advisory.
        let _ = self.events.send(event);
    }
}
