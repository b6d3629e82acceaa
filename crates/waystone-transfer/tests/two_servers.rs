//! Two resolvers wired through an in-process hub.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;
use waystone_config::{RtpConfig, SafetyConfig};
use waystone_net::{
    Envelope, LocalHub, MessageRouter, Payload, Recipient, ResponseOutcome, TeleportResponse,
    process_incoming_messages,
};
use waystone_safety::{RandomTeleportEngine, SafetyResolver};
use waystone_transfer::{
    AllowAll, Completion, CompletionQueue, LocalPlayers, RequestTicket, TeleportOutcome,
    TransactionResolver, TransferError, TransferSettings,
};
use waystone_world::{
    MemoryWorld, Position, ServerName, TeleportKind, TeleportTarget, User, WorldQuery,
};

#[derive(Default)]
struct Roster {
    players: Mutex<Vec<(User, Position)>>,
}

impl Roster {
    fn add(&self, user: User, position: Position) {
        self.players.lock().unwrap().push((user, position));
    }
}

impl LocalPlayers for Roster {
    fn find(&self, name: &str) -> Option<(User, Position)> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .find(|(user, _)| user.username.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn usernames(&self, _include_vanished: bool) -> Vec<String> {
        self.players
            .lock()
            .unwrap()
            .iter()
            .map(|(user, _)| user.username.clone())
            .collect()
    }
}

struct Node {
    resolver: Arc<TransactionResolver>,
    router: MessageRouter,
    inbox: mpsc::Receiver<Envelope>,
    completions: CompletionQueue,
    roster: Arc<Roster>,
}

impl Node {
    fn new(hub: &Arc<LocalHub>, name: &str) -> Self {
        let (broker, inbox) = hub.connect(ServerName::from(name), 64);
        let world: Arc<dyn WorldQuery> = Arc::new(MemoryWorld::flat("world", 0, 256, 64));
        let safety = Arc::new(SafetyResolver::new(world, &SafetyConfig::default()));
        let engine = Arc::new(RandomTeleportEngine::new(safety, RtpConfig::default()));
        let roster = Arc::new(Roster::default());
        let settings = TransferSettings {
            enabled: true,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (resolver, completions) = TransactionResolver::new(
            settings,
            Arc::new(broker),
            engine,
            roster.clone(),
            Arc::new(AllowAll),
        );
        let resolver = Arc::new(resolver);
        let mut router = MessageRouter::new();
        resolver.register_handlers(&mut router);
        Self {
            resolver,
            router,
            inbox,
            completions,
            roster,
        }
    }

    fn pump(&mut self) -> usize {
        process_incoming_messages(&mut self.inbox, &self.router)
    }

    fn completions(&mut self) -> Vec<Completion> {
        self.completions.drain()
    }
}

fn pair() -> (Node, Node) {
    let hub = LocalHub::new();
    (Node::new(&hub, "a"), Node::new(&hub, "b"))
}

fn alice() -> User {
    User::new(Uuid::new_v4(), "alice")
}

fn spot_on_b() -> Position {
    Position::new(ServerName::from("b"), "world", 10.5, 65.0, -3.5)
}

fn pending_id(ticket: RequestTicket) -> waystone_world::CorrelationId {
    match ticket {
        RequestTicket::Pending(id) => id,
        RequestTicket::Resolved(position) => panic!("resolved locally at {position}"),
    }
}

#[test]
fn test_remote_position_completes_once() {
    let (mut a, mut b) = pair();
    let user = alice();

    let id = pending_id(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
            .unwrap(),
    );
    assert_eq!(a.resolver.pending().in_flight(user.uuid), Some(id));

    assert_eq!(b.pump(), 1);
    assert!(b.resolver.has_arrival(user.uuid));
    assert_eq!(a.pump(), 1);

    let done = a.completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].request_id, id);
    assert_eq!(done[0].user, user);
    assert!(matches!(&done[0].outcome, TeleportOutcome::Completed(p) if *p == spot_on_b()));
    assert!(a.resolver.pending().is_empty());

    // A replayed response finds nothing to resolve.
    a.resolver.on_teleport_response(Envelope {
        correlation_id: id,
        origin: ServerName::from("b"),
        recipient: Recipient::Server(ServerName::from("a")),
        payload: Payload::TeleportResponse(TeleportResponse {
            outcome: ResponseOutcome::Success(spot_on_b()),
        }),
    });
    assert!(a.completions().is_empty());
}

#[test]
fn test_timeout_reports_once_and_late_response_is_ignored() {
    let (mut a, mut b) = pair();
    let user = alice();

    let id = pending_id(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
            .unwrap(),
    );

    assert_eq!(a.resolver.expire_requests(Instant::now()), 0);
    assert_eq!(
        a.resolver.expire_requests(Instant::now() + Duration::from_secs(6)),
        1
    );
    let done = a.completions();
    assert_eq!(done.len(), 1);
    assert!(matches!(&done[0].outcome, TeleportOutcome::Failed(TransferError::RequestTimedOut(t)) if *t == id));

    assert_eq!(
        a.resolver.expire_requests(Instant::now() + Duration::from_secs(12)),
        0
    );

    // The destination answers after the deadline.
    assert_eq!(b.pump(), 1);
    assert_eq!(a.pump(), 1);
    assert!(a.completions().is_empty());
}

#[test]
fn test_newer_request_supersedes_older() {
    let (mut a, mut b) = pair();
    let user = alice();

    let first = pending_id(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
            .unwrap(),
    );
    let second_spot = Position::new(ServerName::from("b"), "world", -20.5, 65.0, 4.5);
    let second = pending_id(
        a.resolver
            .request_teleport(
                &user,
                TeleportTarget::Position(second_spot.clone()),
                TeleportKind::Normal,
            )
            .unwrap(),
    );

    // The replaced request is dropped without a completion.
    assert!(a.completions().is_empty());
    assert_eq!(a.resolver.pending().in_flight(user.uuid), Some(second));
    assert_ne!(first, second);

    assert_eq!(b.pump(), 2);
    assert_eq!(a.pump(), 2);

    let done = a.completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].request_id, second);
    assert!(matches!(&done[0].outcome, TeleportOutcome::Completed(p) if *p == second_spot));
    assert!(a.resolver.pending().is_empty());
}

#[test]
fn test_local_teleport_supersedes_remote_request() {
    let (mut a, mut b) = pair();
    let user = alice();

    let remote = pending_id(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
            .unwrap(),
    );
    let here = Position::new(ServerName::from("a"), "world", 1.5, 65.0, 1.5);
    assert_eq!(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(here.clone()), TeleportKind::Normal)
            .unwrap(),
        RequestTicket::Resolved(here)
    );
    assert_eq!(a.resolver.pending().in_flight(user.uuid), None);

    assert_eq!(b.pump(), 1);
    assert_eq!(a.pump(), 1);
    assert!(a.completions().is_empty());
    assert!(a.resolver.pending().state(remote).is_none());
}

#[test]
fn test_repeated_request_keeps_reserved_arrival() {
    let (mut a, mut b) = pair();
    let user = alice();

    a.resolver
        .request_teleport(
            &user,
            TeleportTarget::Random {
                server: ServerName::from("b"),
                world: None,
            },
            TeleportKind::Random,
        )
        .unwrap();
    let request = b.inbox.try_recv().unwrap();
    b.resolver.on_teleport_request(request.clone());
    b.resolver.on_teleport_request(request);

    assert_eq!(a.pump(), 2);
    let done = a.completions();
    assert_eq!(done.len(), 1);
    let TeleportOutcome::Completed(told) = &done[0].outcome else {
        panic!("random teleport failed: {:?}", done[0].outcome);
    };
    assert_eq!(b.resolver.on_join(&user).as_ref(), Some(told));
}

#[test]
fn test_response_from_wrong_server_is_ignored() {
    let (mut a, mut b) = pair();
    let user = alice();

    let id = pending_id(
        a.resolver
            .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
            .unwrap(),
    );
    a.resolver.on_teleport_response(Envelope {
        correlation_id: id,
        origin: ServerName::from("c"),
        recipient: Recipient::Server(ServerName::from("a")),
        payload: Payload::TeleportResponse(TeleportResponse {
            outcome: ResponseOutcome::Success(Position::new(
                ServerName::from("c"),
                "world",
                0.5,
                65.0,
                0.5,
            )),
        }),
    });
    assert!(a.completions().is_empty());
    assert_eq!(a.resolver.pending().in_flight(user.uuid), Some(id));

    b.pump();
    a.pump();
    let done = a.completions();
    assert_eq!(done.len(), 1);
    assert!(matches!(&done[0].outcome, TeleportOutcome::Completed(p) if *p == spot_on_b()));
}

#[test]
fn test_departed_peer_players_are_forgotten() {
    let hub = LocalHub::new();
    let mut a = Node::new(&hub, "a");
    let b = Node::new(&hub, "b");
    b.roster.add(User::new(Uuid::new_v4(), "bob"), spot_on_b());
    b.resolver.broadcast_player_list();
    a.pump();
    assert_eq!(a.resolver.players().locate("bob"), Some(ServerName::from("b")));

    assert_eq!(a.resolver.forget_lost_peers(), 0);
    hub.disconnect(&ServerName::from("b"));
    assert_eq!(a.resolver.forget_lost_peers(), 1);

    assert_eq!(a.resolver.players().locate("bob"), None);
    assert!(matches!(
        a.resolver.request_teleport(
            &alice(),
            TeleportTarget::Player("bob".to_string()),
            TeleportKind::PlayerToPlayer,
        ),
        Err(TransferError::TargetUserNotFound(name)) if name == "bob"
    ));
}

#[test]
fn test_player_list_sync_replaces_previous() {
    let (mut a, b) = pair();

    b.roster.add(alice(), spot_on_b());
    b.resolver.broadcast_player_list();
    a.pump();
    assert_eq!(a.resolver.network_player_list(false), vec!["alice".to_string()]);

    b.roster.players.lock().unwrap().clear();
    b.roster.add(User::new(Uuid::new_v4(), "bob"), spot_on_b());
    b.resolver.broadcast_player_list();
    a.pump();

    let b_name = ServerName::from("b");
    assert_eq!(a.resolver.players().players_on(&b_name), vec!["bob".to_string()]);
    assert_eq!(a.resolver.players().locate("alice"), None);
}

#[test]
fn test_teleport_to_remote_player_and_arrival() {
    let (mut a, mut b) = pair();
    let user = alice();
    let bob_spot = Position::new(ServerName::from("b"), "world", 3.5, 65.0, 3.5);
    b.roster.add(User::new(Uuid::new_v4(), "bob"), bob_spot.clone());
    b.resolver.broadcast_player_list();
    a.pump();

    let id = pending_id(
        a.resolver
            .request_teleport(
                &user,
                TeleportTarget::Player("Bob".to_string()),
                TeleportKind::PlayerToPlayer,
            )
            .unwrap(),
    );
    b.pump();
    a.pump();

    let done = a.completions();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].request_id, id);
    assert!(matches!(&done[0].outcome, TeleportOutcome::Completed(p) if *p == bob_spot));

    assert_eq!(b.resolver.on_join(&user), Some(bob_spot));
    assert_eq!(b.resolver.on_join(&user), None);
    a.pump();
    assert_eq!(
        a.resolver.players().locate("alice"),
        Some(ServerName::from("b"))
    );
}

#[test]
fn test_remote_random_teleport() {
    let (mut a, mut b) = pair();
    let user = alice();

    pending_id(
        a.resolver
            .request_teleport(
                &user,
                TeleportTarget::Random {
                    server: ServerName::from("b"),
                    world: None,
                },
                TeleportKind::Random,
            )
            .unwrap(),
    );
    b.pump();
    a.pump();

    let done = a.completions();
    assert_eq!(done.len(), 1);
    let TeleportOutcome::Completed(position) = &done[0].outcome else {
        panic!("random teleport failed: {:?}", done[0].outcome);
    };
    assert_eq!(position.server, ServerName::from("b"));
    assert_eq!(position.y, 65.0);
}

#[test]
fn test_remote_failures_come_back_typed() {
    let (mut a, mut b) = pair();
    let user = alice();

    a.resolver
        .request_teleport(
            &user,
            TeleportTarget::Position(Position::new(
                ServerName::from("b"),
                "nowhere",
                0.5,
                65.0,
                0.5,
            )),
            TeleportKind::Normal,
        )
        .unwrap();
    b.pump();
    a.pump();
    let done = a.completions();
    assert!(matches!(
        &done[0].outcome,
        TeleportOutcome::Failed(TransferError::WorldNotFound(w)) if w == "nowhere"
    ));

    a.resolver
        .request_teleport(
            &user,
            TeleportTarget::Random {
                server: ServerName::from("b"),
                world: Some("world_nether".to_string()),
            },
            TeleportKind::Random,
        )
        .unwrap();
    b.pump();
    a.pump();
    let done = a.completions();
    assert!(matches!(
        &done[0].outcome,
        TeleportOutcome::Failed(TransferError::Rejected { server }) if server.as_str() == "b"
    ));
    assert!(!b.resolver.has_arrival(user.uuid));
}

#[test]
fn test_logout_cancels_silently() {
    let (mut a, mut b) = pair();
    let user = alice();
    a.resolver
        .request_teleport(&user, TeleportTarget::Position(spot_on_b()), TeleportKind::Normal)
        .unwrap();
    a.resolver.on_logout(&user);
    assert!(a.resolver.pending().is_empty());

    b.pump();
    a.pump();
    assert_eq!(
        a.resolver.expire_requests(Instant::now() + Duration::from_secs(6)),
        0
    );
    assert!(a.completions().is_empty());
}
