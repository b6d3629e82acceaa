//! Request lifecycle on both ends of a cross-server teleport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;
use waystone_config::Config;
use waystone_net::{
    Broker, Envelope, MessageRouter, MessageTag, Payload, PlayerListSync, PositionUpdate,
    Recipient, ResponseOutcome, TeleportResponse,
};
use waystone_safety::RandomTeleportEngine;
use waystone_world::{
    CorrelationId, Position, ServerName, TeleportKind, TeleportRequest, TeleportTarget, User,
};

use crate::error::TransferError;
use crate::pending::{PendingTable, Resolution};
use crate::player_list::PlayerListRegistry;
use crate::policy::{AccessPolicy, LocalPlayers};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Timing and identity the resolver needs from the configuration.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Whether requests may leave this server.
    pub enabled: bool,
    pub request_timeout: Duration,
    /// How long a destination keeps a reserved arrival.
    pub arrival_timeout: Duration,
    /// World used for random targets that name none.
    pub default_world: String,
}

impl TransferSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.cross_server.enabled,
            request_timeout: config.cross_server.request_timeout(),
            arrival_timeout: config.cross_server.arrival_timeout(),
            default_world: config.server.default_world.clone(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug)]
pub enum TeleportOutcome {
    Completed(Position),
    Failed(TransferError),
}

/// A finished transaction, handed to the game thread.
#[derive(Debug)]
pub struct Completion {
    pub user: User,
    pub request_id: CorrelationId,
    pub kind: TeleportKind,
    pub outcome: TeleportOutcome,
}

/// What `request_teleport` decided without waiting.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestTicket {
    /// The destination is on this server.
    Resolved(Position),
    /// Sent to a peer; the result arrives as a [`Completion`].
    Pending(CorrelationId),
}

/// Receiving end of the completion channel. Drained once per game tick.
pub struct CompletionQueue {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionQueue {
    pub fn drain(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            completions.push(completion);
        }
        completions
    }

    pub async fn recv(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }
}

/// A position reserved for a player who is on their way here.
#[derive(Debug, Clone)]
struct Arrival {
    request_id: CorrelationId,
    position: Position,
    expires_at: Instant,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Coordinates teleports between this server and its peers.
pub struct TransactionResolver {
    server: ServerName,
    settings: TransferSettings,
    broker: Arc<dyn Broker>,
    engine: Arc<RandomTeleportEngine>,
    local: Arc<dyn LocalPlayers>,
    policy: Arc<dyn AccessPolicy>,
    pending: PendingTable,
    players: PlayerListRegistry,
    arrivals: DashMap<Uuid, Arrival>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl TransactionResolver {
    pub fn new(
        settings: TransferSettings,
        broker: Arc<dyn Broker>,
        engine: Arc<RandomTeleportEngine>,
        local: Arc<dyn LocalPlayers>,
        policy: Arc<dyn AccessPolicy>,
    ) -> (Self, CompletionQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            server: broker.local_server().clone(),
            settings,
            broker,
            engine,
            local,
            policy,
            pending: PendingTable::new(),
            players: PlayerListRegistry::new(),
            arrivals: DashMap::new(),
            completions: tx,
        };
        (resolver, CompletionQueue { rx })
    }

    pub fn server(&self) -> &ServerName {
        &self.server
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn players(&self) -> &PlayerListRegistry {
        &self.players
    }

    pub fn engine(&self) -> &Arc<RandomTeleportEngine> {
        &self.engine
    }

    /// Wire every broker payload this resolver understands into `router`.
    pub fn register_handlers(self: &Arc<Self>, router: &mut MessageRouter) {
        let this = Arc::clone(self);
        router.register(MessageTag::PlayerListSync, move |e: Envelope| {
            this.on_player_list_sync(e)
        });
        let this = Arc::clone(self);
        router.register(MessageTag::PlayerListRequest, move |e: Envelope| {
            this.on_player_list_request(e)
        });
        let this = Arc::clone(self);
        router.register(MessageTag::TeleportRequest, move |e: Envelope| {
            this.on_teleport_request(e)
        });
        let this = Arc::clone(self);
        router.register(MessageTag::TeleportResponse, move |e: Envelope| {
            this.on_teleport_response(e)
        });
        let this = Arc::clone(self);
        router.register(MessageTag::PositionUpdate, move |e: Envelope| {
            this.on_position_update(e)
        });
    }

    // -----------------------------------------------------------------------
    // Origin side
    // -----------------------------------------------------------------------

    /// Start a teleport for `user`.
    ///
    /// Local destinations resolve immediately. Remote ones are sent to the
    /// destination server. Either way, any earlier in-flight request of the
    /// same user is superseded and never completes.
    pub fn request_teleport(
        &self,
        user: &User,
        target: TeleportTarget,
        kind: TeleportKind,
    ) -> Result<RequestTicket, TransferError> {
        if !self.policy.may_teleport(user, &target, kind) {
            return Err(TransferError::PermissionDenied);
        }

        let destination = match &target {
            TeleportTarget::Position(position) => position.server.clone(),
            TeleportTarget::Random { server, .. } => server.clone(),
            TeleportTarget::Player(name) => {
                if self.local.find(name).is_some() {
                    self.server.clone()
                } else {
                    self.players
                        .locate(name)
                        .ok_or_else(|| TransferError::TargetUserNotFound(name.clone()))?
                }
            }
        };

        if destination == self.server {
            let position = self.resolve_here(&target)?;
            if let Some(previous) = self.pending.supersede_user(user.uuid) {
                tracing::debug!(user = %user, %previous, "Request superseded by a local teleport");
            }
            return Ok(RequestTicket::Resolved(position));
        }
        if !self.settings.enabled || !self.broker.knows(&destination) {
            return Err(TransferError::DestinationUnreachable(destination));
        }

        let request = TeleportRequest {
            id: CorrelationId::new(),
            user: user.clone(),
            origin: self.server.clone(),
            destination: destination.clone(),
            target,
            kind,
            timeout_ms: u64::try_from(self.settings.request_timeout.as_millis())
                .unwrap_or(u64::MAX),
        };
        let id = request.id;

        if let Some(previous) = self
            .pending
            .insert(request.clone(), self.settings.request_timeout)
        {
            tracing::debug!(user = %user, %previous, replacement = %id, "Request superseded");
        }

        let envelope = Envelope {
            correlation_id: id,
            origin: self.server.clone(),
            recipient: Recipient::Server(destination.clone()),
            payload: Payload::TeleportRequest(request),
        };
        if let Err(e) = self.broker.send(envelope) {
            tracing::warn!(user = %user, %destination, "Failed to send teleport request: {e}");
            self.pending.resolve(id);
            return Err(e.into());
        }

        tracing::debug!(user = %user, %destination, request = %id, "Teleport request sent");
        Ok(RequestTicket::Pending(id))
    }

    fn resolve_here(&self, target: &TeleportTarget) -> Result<Position, TransferError> {
        match target {
            TeleportTarget::Position(position) => {
                if self.engine.resolver().world().world_info(&position.world).is_none() {
                    return Err(TransferError::WorldNotFound(position.world.clone()));
                }
                Ok(position.clone())
            }
            TeleportTarget::Player(name) => self
                .local
                .find(name)
                .map(|(_, position)| position)
                .ok_or_else(|| TransferError::TargetUserNotFound(name.clone())),
            TeleportTarget::Random { world, .. } => {
                let world = world.as_deref().unwrap_or(self.settings.default_world.as_str());
                Ok(self.engine.random_destination(&self.server, world)?)
            }
        }
    }

    pub fn on_teleport_response(&self, envelope: Envelope) {
        let Payload::TeleportResponse(response) = envelope.payload else {
            return;
        };
        let id = envelope.correlation_id;
        if self
            .pending
            .destination(id)
            .is_some_and(|destination| destination != envelope.origin)
        {
            tracing::debug!(request = %id, from = %envelope.origin, "Dropping response from a server the request was not sent to");
            return;
        }
        match self.pending.resolve(id) {
            Resolution::Matched(request) => {
                let outcome = match response.outcome {
                    ResponseOutcome::Success(position) => TeleportOutcome::Completed(position),
                    ResponseOutcome::Failure(reason) => {
                        TeleportOutcome::Failed(TransferError::from_failure(reason, &request))
                    }
                };
                tracing::debug!(request = %id, from = %envelope.origin, "Teleport response matched");
                self.complete(request.user, id, request.kind, outcome);
            }
            Resolution::Superseded => {
                tracing::debug!(request = %id, "Dropping response: {}", TransferError::RequestSuperseded(id));
            }
            Resolution::Unknown => {
                tracing::debug!(request = %id, from = %envelope.origin, "Dropping response to unknown or expired request");
            }
        }
    }

    /// Expire stale requests and arrivals. Each timed-out request produces
    /// exactly one `RequestTimedOut` completion. Returns how many timed out.
    pub fn expire_requests(&self, now: Instant) -> usize {
        let timed_out = self.pending.expire(now);
        let count = timed_out.len();
        for request in timed_out {
            tracing::debug!(user = %request.user, request = %request.id, destination = %request.destination, "Teleport request timed out");
            self.complete(
                request.user,
                request.id,
                request.kind,
                TeleportOutcome::Failed(TransferError::RequestTimedOut(request.id)),
            );
        }
        self.arrivals.retain(|_, arrival| arrival.expires_at > now);
        count
    }

    /// Drop the user's in-flight request without reporting it.
    pub fn on_logout(&self, user: &User) {
        if let Some(id) = self.pending.cancel_user(user.uuid) {
            tracing::debug!(user = %user, request = %id, "Request cancelled on logout");
        }
    }

    fn complete(&self, user: User, request_id: CorrelationId, kind: TeleportKind, outcome: TeleportOutcome) {
        let completion = Completion {
            user,
            request_id,
            kind,
            outcome,
        };
        if self.completions.send(completion).is_err() {
            tracing::debug!(request = %request_id, "Completion queue closed");
        }
    }

    // -----------------------------------------------------------------------
    // Destination side
    // -----------------------------------------------------------------------

    pub fn on_teleport_request(&self, envelope: Envelope) {
        let Payload::TeleportRequest(request) = envelope.payload else {
            return;
        };

        let outcome = match self.reserved_arrival(&request) {
            Some(position) => {
                tracing::debug!(user = %request.user, request = %request.id, "Repeated teleport request, answering with the reserved arrival");
                ResponseOutcome::Success(position)
            }
            None => self.reserve_arrival(&request),
        };

        let reply = Envelope {
            correlation_id: request.id,
            origin: self.server.clone(),
            recipient: Recipient::Server(request.origin.clone()),
            payload: Payload::TeleportResponse(TeleportResponse { outcome }),
        };
        if let Err(e) = self.broker.send(reply) {
            tracing::warn!(to = %request.origin, request = %request.id, "Failed to send teleport response: {e}");
        }
    }

    /// The position already reserved for this exact request, if still valid.
    fn reserved_arrival(&self, request: &TeleportRequest) -> Option<Position> {
        let arrival = self.arrivals.get(&request.user.uuid)?;
        (arrival.request_id == request.id && arrival.expires_at > Instant::now())
            .then(|| arrival.position.clone())
    }

    fn reserve_arrival(&self, request: &TeleportRequest) -> ResponseOutcome {
        match self.resolve_incoming(request) {
            Ok(position) => {
                self.arrivals.insert(
                    request.user.uuid,
                    Arrival {
                        request_id: request.id,
                        position: position.clone(),
                        expires_at: Instant::now() + self.settings.arrival_timeout,
                    },
                );
                tracing::debug!(user = %request.user, from = %request.origin, "Arrival reserved at {position}");
                ResponseOutcome::Success(position)
            }
            Err(e) => {
                tracing::debug!(user = %request.user, from = %request.origin, "Refusing teleport request: {e}");
                ResponseOutcome::Failure(e.failure_reason())
            }
        }
    }

    fn resolve_incoming(&self, request: &TeleportRequest) -> Result<Position, TransferError> {
        if !self.policy.may_receive(request) {
            return Err(TransferError::PermissionDenied);
        }
        self.resolve_here(&request.target)
    }

    /// The user logged in here. Consumes their reserved arrival, if still
    /// valid, and announces their new location to every peer.
    pub fn on_join(&self, user: &User) -> Option<Position> {
        let (_, arrival) = self.arrivals.remove(&user.uuid)?;
        if arrival.expires_at <= Instant::now() {
            tracing::debug!(user = %user, request = %arrival.request_id, "Arrival expired before join");
            return None;
        }

        let update = Envelope::broadcast(
            self.server.clone(),
            Payload::PositionUpdate(PositionUpdate {
                username: user.username.clone(),
                server: self.server.clone(),
            }),
        );
        if let Err(e) = self.broker.send(update) {
            tracing::warn!(user = %user, "Failed to broadcast position update: {e}");
        }
        tracing::info!(user = %user, request = %arrival.request_id, "Cross-server arrival at {}", arrival.position);
        Some(arrival.position)
    }

    pub fn has_arrival(&self, user: Uuid) -> bool {
        self.arrivals.contains_key(&user)
    }

    // -----------------------------------------------------------------------
    // Player lists
    // -----------------------------------------------------------------------

    pub fn on_player_list_sync(&self, envelope: Envelope) {
        if let Payload::PlayerListSync(sync) = envelope.payload {
            self.players.apply_sync(&envelope.origin, sync.players);
        }
    }

    pub fn on_player_list_request(&self, envelope: Envelope) {
        let reply = Envelope::new(
            self.server.clone(),
            Recipient::Server(envelope.origin.clone()),
            self.player_list_payload(),
        );
        if let Err(e) = self.broker.send(reply) {
            tracing::debug!(to = %envelope.origin, "Failed to answer player list request: {e}");
        }
    }

    pub fn on_position_update(&self, envelope: Envelope) {
        if let Payload::PositionUpdate(update) = envelope.payload {
            self.players.record_position(&update.username, &update.server);
        }
    }

    fn player_list_payload(&self) -> Payload {
        Payload::PlayerListSync(PlayerListSync {
            players: self.local.usernames(false),
        })
    }

    /// Send this server's visible players to every peer.
    pub fn broadcast_player_list(&self) {
        let envelope = Envelope::broadcast(self.server.clone(), self.player_list_payload());
        if let Err(e) = self.broker.send(envelope) {
            tracing::debug!("Failed to broadcast player list: {e}");
        }
    }

    /// Drop player lists of servers the broker no longer lists as peers, so
    /// their players stop resolving as teleport targets.
    pub fn forget_lost_peers(&self) -> usize {
        let peers = self.broker.peers();
        let mut forgotten = 0;
        for server in self.players.known_servers() {
            if !peers.contains(&server) {
                tracing::debug!(%server, "Forgetting player list of departed peer");
                self.players.remove_server(&server);
                forgotten += 1;
            }
        }
        forgotten
    }

    /// Ask every peer for its player list.
    pub fn request_player_lists(&self) {
        let envelope = Envelope::broadcast(self.server.clone(), Payload::PlayerListRequest);
        if let Err(e) = self.broker.send(envelope) {
            tracing::debug!("Failed to request player lists: {e}");
        }
    }

    /// Every player on the network, sorted and distinct.
    pub fn network_player_list(&self, include_vanished: bool) -> Vec<String> {
        self.players
            .network_list(&self.local.usernames(include_vanished))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllowAll;
    use std::sync::Mutex;
    use waystone_config::SafetyConfig;
    use waystone_net::{LocalHub, process_incoming_messages};
    use waystone_safety::SafetyResolver;
    use waystone_world::{MemoryWorld, WorldQuery};

    #[derive(Default)]
    struct Roster {
        players: Mutex<Vec<(User, Position, bool)>>,
    }

    impl LocalPlayers for Roster {
        fn find(&self, name: &str) -> Option<(User, Position)> {
            self.players
                .lock()
                .unwrap()
                .iter()
                .find(|(user, _, _)| user.username.eq_ignore_ascii_case(name))
                .map(|(user, position, _)| (user.clone(), position.clone()))
        }

        fn usernames(&self, include_vanished: bool) -> Vec<String> {
            self.players
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, _, vanished)| include_vanished || !vanished)
                .map(|(user, _, _)| user.username.clone())
                .collect()
        }
    }

    struct DenyAll;

    impl AccessPolicy for DenyAll {
        fn may_teleport(&self, _: &User, _: &TeleportTarget, _: TeleportKind) -> bool {
            false
        }
    }

    fn engine() -> Arc<RandomTeleportEngine> {
        let world: Arc<dyn WorldQuery> = Arc::new(MemoryWorld::flat("world", 0, 256, 64));
        let resolver = Arc::new(SafetyResolver::new(world, &SafetyConfig::default()));
        Arc::new(RandomTeleportEngine::new(resolver, Default::default()))
    }

    fn settings() -> TransferSettings {
        TransferSettings {
            enabled: true,
            ..Default::default()
        }
    }

    fn alice() -> User {
        User::new(Uuid::new_v4(), "alice")
    }

    fn single(policy: Arc<dyn AccessPolicy>) -> (TransactionResolver, CompletionQueue, Arc<Roster>) {
        let hub = LocalHub::new();
        let (broker, _rx) = hub.connect(ServerName::from("a"), 16);
        let roster = Arc::new(Roster::default());
        let (resolver, queue) =
            TransactionResolver::new(settings(), Arc::new(broker), engine(), roster.clone(), policy);
        (resolver, queue, roster)
    }

    #[test]
    fn test_local_position_resolves_immediately() {
        let (resolver, mut queue, _) = single(Arc::new(AllowAll));
        let target = Position::new(ServerName::from("a"), "world", 0.5, 65.0, 0.5);
        let ticket = resolver
            .request_teleport(&alice(), TeleportTarget::Position(target.clone()), TeleportKind::Normal)
            .unwrap();
        assert_eq!(ticket, RequestTicket::Resolved(target));
        assert!(resolver.pending().is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_local_random_uses_engine() {
        let (resolver, _queue, _) = single(Arc::new(AllowAll));
        let ticket = resolver
            .request_teleport(
                &alice(),
                TeleportTarget::Random {
                    server: ServerName::from("a"),
                    world: None,
                },
                TeleportKind::Random,
            )
            .unwrap();
        let RequestTicket::Resolved(position) = ticket else {
            panic!("expected local resolution");
        };
        assert_eq!(position.y, 65.0);
        assert_eq!(position.world, "world");
    }

    #[test]
    fn test_local_player_target() {
        let (resolver, _queue, roster) = single(Arc::new(AllowAll));
        let bob_pos = Position::new(ServerName::from("a"), "world", 7.5, 65.0, 7.5);
        roster.players.lock().unwrap().push((
            User::new(Uuid::new_v4(), "bob"),
            bob_pos.clone(),
            false,
        ));
        let ticket = resolver
            .request_teleport(&alice(), TeleportTarget::Player("Bob".to_string()), TeleportKind::PlayerToPlayer)
            .unwrap();
        assert_eq!(ticket, RequestTicket::Resolved(bob_pos));
    }

    #[test]
    fn test_validation_fails_fast() {
        let (resolver, _queue, _) = single(Arc::new(AllowAll));
        let user = alice();

        let err = resolver
            .request_teleport(&user, TeleportTarget::Player("ghost".to_string()), TeleportKind::PlayerToPlayer)
            .unwrap_err();
        assert!(matches!(err, TransferError::TargetUserNotFound(name) if name == "ghost"));

        let remote = Position::new(ServerName::from("z"), "world", 0.5, 65.0, 0.5);
        let err = resolver
            .request_teleport(&user, TeleportTarget::Position(remote), TeleportKind::Normal)
            .unwrap_err();
        assert!(matches!(err, TransferError::DestinationUnreachable(s) if s.as_str() == "z"));
        assert!(resolver.pending().is_empty());

        let (denied, _queue, _) = single(Arc::new(DenyAll));
        let err = denied
            .request_teleport(
                &user,
                TeleportTarget::Random {
                    server: ServerName::from("a"),
                    world: None,
                },
                TeleportKind::Random,
            )
            .unwrap_err();
        assert!(matches!(err, TransferError::PermissionDenied));
    }

    #[test]
    fn test_unknown_local_world() {
        let (resolver, _queue, _) = single(Arc::new(AllowAll));
        let target = Position::new(ServerName::from("a"), "nowhere", 0.5, 65.0, 0.5);
        let err = resolver
            .request_teleport(&alice(), TeleportTarget::Position(target), TeleportKind::Normal)
            .unwrap_err();
        assert!(matches!(err, TransferError::WorldNotFound(w) if w == "nowhere"));
    }

    #[test]
    fn test_player_list_request_answered() {
        let hub = LocalHub::new();
        let (a_broker, mut a_rx) = hub.connect(ServerName::from("a"), 16);
        let (b_broker, mut b_rx) = hub.connect(ServerName::from("b"), 16);

        let roster_a = Arc::new(Roster::default());
        roster_a.players.lock().unwrap().extend([
            (alice(), Position::new(ServerName::from("a"), "world", 0.0, 65.0, 0.0), false),
            (
                User::new(Uuid::new_v4(), "mod"),
                Position::new(ServerName::from("a"), "world", 0.0, 65.0, 0.0),
                true,
            ),
        ]);
        let (a, _qa) = TransactionResolver::new(settings(), Arc::new(a_broker), engine(), roster_a, Arc::new(AllowAll));
        let (b, _qb) = TransactionResolver::new(
            settings(),
            Arc::new(b_broker),
            engine(),
            Arc::new(Roster::default()),
            Arc::new(AllowAll),
        );
        let a = Arc::new(a);
        let b = Arc::new(b);
        let mut a_router = MessageRouter::new();
        let mut b_router = MessageRouter::new();
        a.register_handlers(&mut a_router);
        b.register_handlers(&mut b_router);

        b.request_player_lists();
        assert_eq!(process_incoming_messages(&mut a_rx, &a_router), 1);
        assert_eq!(process_incoming_messages(&mut b_rx, &b_router), 1);

        assert_eq!(b.players().players_on(&ServerName::from("a")), vec!["alice".to_string()]);
        assert_eq!(b.network_player_list(false), vec!["alice".to_string()]);
        assert_eq!(a.network_player_list(true), vec!["alice".to_string(), "mod".to_string()]);
    }
}
