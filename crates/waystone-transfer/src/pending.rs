//! Origin-side table of teleport requests awaiting a `TELEPORT_RESPONSE`.
//!
//! Each user has at most one request in [`PendingState::Awaiting`]. A newer
//! request marks the older one [`PendingState::Superseded`]; superseded
//! entries stay in the table until their response arrives or they expire so
//! that late responses can be recognised and dropped.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;
use waystone_world::{CorrelationId, ServerName, TeleportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Awaiting,
    Superseded,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: TeleportRequest,
    pub expires_at: Instant,
    pub state: PendingState,
}

/// What happened when a response was matched against the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The request was live; it has been removed and belongs to the caller.
    Matched(TeleportRequest),
    /// A newer request for the same user replaced this one.
    Superseded,
    /// Never issued here, already resolved, or expired.
    Unknown,
}

#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<CorrelationId, PendingRequest>,
    /// Latest request per user.
    by_user: DashMap<Uuid, CorrelationId>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request` until `timeout` elapses. Returns the ID of the request
    /// it superseded, if the user had one in flight.
    pub fn insert(&self, request: TeleportRequest, timeout: Duration) -> Option<CorrelationId> {
        self.insert_at(request, Instant::now() + timeout)
    }

    pub fn insert_at(&self, request: TeleportRequest, expires_at: Instant) -> Option<CorrelationId> {
        let id = request.id;
        let previous = self
            .by_user
            .insert(request.user.uuid, id)
            .filter(|prev| *prev != id);

        let superseded = previous.filter(|prev| {
            self.entries
                .get_mut(prev)
                .map(|mut entry| {
                    let was_awaiting = entry.state == PendingState::Awaiting;
                    entry.state = PendingState::Superseded;
                    was_awaiting
                })
                .unwrap_or(false)
        });

        self.entries.insert(
            id,
            PendingRequest {
                request,
                expires_at,
                state: PendingState::Awaiting,
            },
        );
        superseded
    }

    /// Match a response. The first response for an ID wins; any later one is
    /// [`Resolution::Unknown`].
    pub fn resolve(&self, id: CorrelationId) -> Resolution {
        match self.entries.remove(&id) {
            Some((_, entry)) => match entry.state {
                PendingState::Awaiting => {
                    self.by_user
                        .remove_if(&entry.request.user.uuid, |_, current| *current == id);
                    Resolution::Matched(entry.request)
                }
                PendingState::Superseded => Resolution::Superseded,
            },
            None => Resolution::Unknown,
        }
    }

    /// Remove every entry expired at `now`. Returns the requests that were
    /// still awaiting a response; superseded ones vanish silently.
    pub fn expire(&self, now: Instant) -> Vec<TeleportRequest> {
        let due: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut timed_out = Vec::new();
        for id in due {
            if let Some((_, entry)) = self.entries.remove_if(&id, |_, e| e.expires_at <= now) {
                self.by_user
                    .remove_if(&entry.request.user.uuid, |_, current| *current == id);
                if entry.state == PendingState::Awaiting {
                    timed_out.push(entry.request);
                }
            }
        }
        timed_out
    }

    /// Drop the user's in-flight request without reporting it.
    pub fn cancel_user(&self, user: Uuid) -> Option<CorrelationId> {
        let (_, id) = self.by_user.remove(&user)?;
        self.entries.remove(&id).map(|_| id)
    }

    /// Mark the user's in-flight request superseded without issuing a new
    /// one, so its response is dropped when it arrives.
    pub fn supersede_user(&self, user: Uuid) -> Option<CorrelationId> {
        let (_, id) = self.by_user.remove(&user)?;
        let mut entry = self.entries.get_mut(&id)?;
        let was_awaiting = entry.state == PendingState::Awaiting;
        entry.state = PendingState::Superseded;
        was_awaiting.then_some(id)
    }

    /// The server a tracked request was sent to.
    pub fn destination(&self, id: CorrelationId) -> Option<ServerName> {
        self.entries
            .get(&id)
            .map(|entry| entry.request.destination.clone())
    }

    pub fn state(&self, id: CorrelationId) -> Option<PendingState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    /// The user's awaiting request, if any.
    pub fn in_flight(&self, user: Uuid) -> Option<CorrelationId> {
        let id = *self.by_user.get(&user)?;
        (self.state(id) == Some(PendingState::Awaiting)).then_some(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
