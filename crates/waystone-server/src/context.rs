//! The process-scoped Waystone context.
//!
//! [`Waystone`] owns every registry a server needs (online users, hooks,
//! warmups, invulnerability timers) together with the teleport machinery,
//! and exposes the player-facing operations: homes, warps, spawn, `/back`,
//! random teleport and teleport-to-player. Remote results come back through
//! [`Waystone::tick`], which the game loop calls regularly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use uuid::Uuid;
use waystone_config::Config;
use waystone_net::{Broker, Envelope, MessageRouter};
use waystone_safety::{RandomTeleportEngine, SafetyResolver};
use waystone_transfer::{
    Completion, CompletionQueue, RequestTicket, TeleportOutcome, TransactionResolver,
    TransferSettings,
};
use waystone_world::{
    Home, OnlineUser, Position, SavedPositionKind, SavedUser, ServerName, Store, TeleportKind,
    TeleportTarget, User, Warp, WorldQuery,
};

use crate::error::ContextError;
use crate::hooks::HookRegistry;
use crate::online::OnlineUsers;
use crate::policy::PlayerPreferences;

pub struct Waystone {
    config: Config,
    store: Arc<dyn Store>,
    world: Arc<dyn WorldQuery>,
    safety: Arc<SafetyResolver>,
    resolver: Arc<TransactionResolver>,
    completions: CompletionQueue,
    router: MessageRouter,
    online: Arc<OnlineUsers>,
    hooks: HookRegistry,
    warmups: DashSet<Uuid>,
    /// User → end of their post-teleport invulnerability.
    invulnerable: DashMap<Uuid, Instant>,
    started: bool,
}

impl Waystone {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        world: Arc<dyn WorldQuery>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let safety = Arc::new(SafetyResolver::new(Arc::clone(&world), &config.safety));
        let engine = Arc::new(RandomTeleportEngine::new(
            Arc::clone(&safety),
            config.rtp.clone(),
        ));
        let online = Arc::new(OnlineUsers::new());
        let policy = Arc::new(PlayerPreferences::new(
            Arc::clone(&store),
            Arc::clone(&online),
        ));
        let (resolver, completions) = TransactionResolver::new(
            TransferSettings::from_config(&config),
            broker,
            engine,
            online.clone(),
            policy,
        );

        Self {
            config,
            store,
            world,
            safety,
            resolver: Arc::new(resolver),
            completions,
            router: MessageRouter::new(),
            online,
            hooks: HookRegistry::new(),
            warmups: DashSet::new(),
            invulnerable: DashMap::new(),
            started: false,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Run the named start-up steps in order. Calling `start` twice is a no-op.
    pub fn start(&mut self) -> Result<(), ContextError> {
        if self.started {
            return Ok(());
        }
        let started = Instant::now();
        tracing::info!(server = %self.server(), "Starting Waystone");

        self.initialize("message routing", |ws| {
            ws.resolver.register_handlers(&mut ws.router);
            Ok(())
        })?;
        self.initialize("map markers", |ws| ws.refresh_map_markers())?;
        self.initialize("network player lists", |ws| {
            if ws.config.is_networked() {
                ws.resolver.request_player_lists();
                ws.resolver.broadcast_player_list();
            }
            Ok(())
        })?;

        self.started = true;
        tracing::info!(
            server = %self.server(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Waystone started"
        );
        Ok(())
    }

    /// Run one start-up step, logging its outcome.
    pub fn initialize<F>(&mut self, name: &'static str, step: F) -> Result<(), ContextError>
    where
        F: FnOnce(&mut Self) -> Result<(), ContextError>,
    {
        let started = Instant::now();
        tracing::info!("Initializing {name}");
        match step(self) {
            Ok(()) => {
                tracing::debug!(
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Initialized {name}"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to initialize {name}: {e}");
                Err(ContextError::Initialize {
                    step: name,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Cancel in-flight requests, record logout positions and drop every
    /// registry entry.
    pub fn shutdown(&mut self) {
        if !self.started {
            return;
        }
        for user in self.online.users() {
            if let Err(e) = self.on_quit(user.uuid) {
                tracing::warn!(user = %user, "Failed to save user on shutdown: {e}");
            }
        }
        if let Some(map) = self.hooks.map() {
            map.clear_homes();
            map.clear_warps();
        }
        self.hooks.clear();
        self.warmups.clear();
        self.invulnerable.clear();
        self.router = MessageRouter::new();
        self.started = false;
        tracing::info!(server = %self.server(), "Waystone stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn server(&self) -> &ServerName {
        self.resolver.server()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<TransactionResolver> {
        &self.resolver
    }

    pub fn online(&self) -> &Arc<OnlineUsers> {
        &self.online
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    // -----------------------------------------------------------------------
    // Broker and game loop
    // -----------------------------------------------------------------------

    /// Hand an inbound envelope to its handler.
    pub fn route(&self, envelope: Envelope) -> bool {
        self.router.route(envelope)
    }

    /// Expire stale requests and timers, then apply every queued completion.
    /// Returns how many completions were applied.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.resolver.expire_requests(now);
        self.invulnerable.retain(|_, until| *until > now);

        let completions = self.drain_completions();
        let applied = completions.len();
        for completion in completions {
            self.apply(completion);
        }
        applied
    }

    pub fn drain_completions(&mut self) -> Vec<Completion> {
        self.completions.drain()
    }

    /// Apply a finished remote teleport to the player.
    pub fn apply(&self, completion: Completion) {
        let Completion {
            user,
            request_id,
            kind,
            outcome,
        } = completion;
        match outcome {
            TeleportOutcome::Completed(position) if position.is_on(self.server()) => {
                self.move_local(&user, position, kind);
            }
            TeleportOutcome::Completed(position) => self.hand_off(&user, position, kind),
            TeleportOutcome::Failed(e) => {
                tracing::debug!(user = %user, request = %request_id, "Teleport failed: {e}");
                self.notify(user.uuid, &format!("Teleport failed: {e}"));
                if let Some(analytics) = self.hooks.analytics() {
                    analytics.record_teleport(&user, kind, false);
                }
            }
        }
    }

    /// Announce local players and drop lists of peers that went away.
    pub fn broadcast_player_list(&self) {
        if self.config.is_networked() {
            self.resolver.forget_lost_peers();
            self.resolver.broadcast_player_list();
        }
    }

    pub fn network_player_list(&self, include_vanished: bool) -> Vec<String> {
        self.resolver.network_player_list(include_vanished)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Register a connecting player. Returns where they should be placed:
    /// their reserved cross-server arrival if one is waiting, else `position`.
    pub fn on_join(&self, online: OnlineUser, position: Position) -> Result<Position, ContextError> {
        let user = online.user.clone();
        self.store.ensure_user(&user)?;

        let position = match self.resolver.on_join(&user) {
            Some(arrival) => {
                self.mark_invulnerable(user.uuid);
                arrival
            }
            None => position,
        };
        self.online.add(online, position.clone());

        let server = self.server().clone();
        self.edit_user_data(user.uuid, |saved| saved.last_server = Some(server.clone()))?;
        self.broadcast_player_list();
        tracing::info!(user = %user, "Joined at {position}");
        Ok(position)
    }

    pub fn on_quit(&self, uuid: Uuid) -> Result<(), ContextError> {
        let Some((online, position)) = self.online.remove(uuid) else {
            return Ok(());
        };
        self.resolver.on_logout(&online.user);
        self.warmups.remove(&uuid);
        self.invulnerable.remove(&uuid);
        self.store
            .set_saved_position(uuid, SavedPositionKind::Offline, position)?;
        self.broadcast_player_list();
        tracing::info!(user = %online.user, "Quit");
        Ok(())
    }

    /// Apply `mutation` to the saved user and persist it.
    pub fn edit_user_data<F>(&self, uuid: Uuid, mut mutation: F) -> Result<SavedUser, ContextError>
    where
        F: FnMut(&mut SavedUser),
    {
        Ok(self.store.update_user_data(uuid, &mut mutation)?)
    }

    // -----------------------------------------------------------------------
    // Warmups and invulnerability
    // -----------------------------------------------------------------------

    pub fn warmup_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.general.teleport_warmup_secs))
    }

    /// Returns `false` if the user is already warming up.
    pub fn begin_warmup(&self, uuid: Uuid) -> bool {
        self.warmups.insert(uuid)
    }

    /// The player moved or took damage. Returns `true` if a warmup was cancelled.
    pub fn cancel_warmup(&self, uuid: Uuid) -> bool {
        let cancelled = self.warmups.remove(&uuid).is_some();
        if cancelled {
            self.notify(uuid, "Teleport cancelled.");
        }
        cancelled
    }

    /// The warmup elapsed. Returns `true` if it was not cancelled meanwhile.
    pub fn finish_warmup(&self, uuid: Uuid) -> bool {
        self.warmups.remove(&uuid).is_some()
    }

    pub fn is_warming_up(&self, uuid: Uuid) -> bool {
        self.warmups.contains(&uuid)
    }

    pub fn is_invulnerable(&self, uuid: Uuid) -> bool {
        self.invulnerable
            .get(&uuid)
            .is_some_and(|until| *until > Instant::now())
    }

    fn mark_invulnerable(&self, uuid: Uuid) {
        let secs = self.config.general.invulnerability_secs;
        if secs > 0 {
            self.invulnerable
                .insert(uuid, Instant::now() + Duration::from_secs(u64::from(secs)));
        }
    }

    // -----------------------------------------------------------------------
    // Spawn, homes and warps
    // -----------------------------------------------------------------------

    /// The network spawn warp when global spawn is on and the warp exists,
    /// otherwise this server's default world spawn.
    pub fn spawn(&self) -> Result<Position, ContextError> {
        let global = &self.config.cross_server.global_spawn;
        if self.config.cross_server.enabled && global.enabled {
            match self.store.warp(&global.warp_name)? {
                Some(warp) => return Ok(warp.position),
                None => tracing::warn!(
                    warp = %global.warp_name,
                    "Global spawn warp missing, using local spawn"
                ),
            }
        }
        let world = &self.config.server.default_world;
        self.world
            .world_info(world)
            .map(|info| info.spawn(self.server()))
            .ok_or_else(|| ContextError::WorldNotFound(world.clone()))
    }

    /// Create or move a home. Positions on this server are snapped to safe
    /// ground first.
    pub fn set_home(
        &self,
        owner: &User,
        name: &str,
        position: Position,
        public: bool,
    ) -> Result<Home, ContextError> {
        let saved = self.store.ensure_user(owner)?;
        let existing = self.store.home(owner.uuid, name)?;

        if existing.is_none() {
            let max = saved.home_slots.unwrap_or(self.config.general.max_homes);
            let count = u32::try_from(self.store.homes(owner.uuid)?.len()).unwrap_or(u32::MAX);
            if count >= max {
                return Err(ContextError::HomeLimitReached { max });
            }
        }

        let position = self.placement(position)?;
        let home = match &existing {
            Some(previous) => Home {
                position,
                public,
                ..previous.clone()
            },
            None => Home {
                public,
                ..Home::new(owner.clone(), name, position)
            },
        };
        self.store.save_home(home.clone())?;

        if let Some(map) = self.hooks.map() {
            if home.public {
                map.update_home(&home);
            } else if let Some(previous) = existing.filter(|h| h.public) {
                map.remove_home(&previous);
            }
        }
        tracing::debug!(owner = %owner, home = %home.name, "Home saved at {}", home.position);
        Ok(home)
    }

    /// Returns `false` if the owner has no such home.
    pub fn delete_home(&self, owner: Uuid, name: &str) -> Result<bool, ContextError> {
        let Some(home) = self.store.home(owner, name)? else {
            return Ok(false);
        };
        let removed = self.store.delete_home(owner, name)?;
        if removed
            && home.public
            && let Some(map) = self.hooks.map()
        {
            map.remove_home(&home);
        }
        Ok(removed)
    }

    pub fn save_warp(&self, name: &str, position: Position) -> Result<Warp, ContextError> {
        let position = self.placement(position)?;
        let warp = match self.store.warp(name)? {
            Some(previous) => Warp {
                position,
                ..previous
            },
            None => Warp::new(name, position),
        };
        self.store.save_warp(warp.clone())?;
        if let Some(map) = self.hooks.map() {
            map.update_warp(&warp);
        }
        Ok(warp)
    }

    pub fn delete_warp(&self, name: &str) -> Result<bool, ContextError> {
        let Some(warp) = self.store.warp(name)? else {
            return Ok(false);
        };
        let removed = self.store.delete_warp(name)?;
        if removed && let Some(map) = self.hooks.map() {
            map.remove_warp(&warp);
        }
        Ok(removed)
    }

    fn placement(&self, position: Position) -> Result<Position, ContextError> {
        if !position.is_on(self.server()) {
            return Ok(position);
        }
        self.safety
            .find_safe_ground(&position, self.config.safety.placement_search_radius)
            .ok_or(ContextError::NoSafeLocation)
    }

    /// Push every public home and warp to the map hook.
    fn refresh_map_markers(&self) -> Result<(), ContextError> {
        let Some(map) = self.hooks.map() else {
            return Ok(());
        };
        map.clear_homes();
        map.clear_warps();
        for home in self.store.public_homes()? {
            map.update_home(&home);
        }
        for warp in self.store.warps()? {
            map.update_warp(&warp);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Teleports
    // -----------------------------------------------------------------------

    /// Teleport `user` to a home of `owner`. Other players' homes must be public.
    pub fn teleport_home(
        &self,
        user: &User,
        owner: Uuid,
        name: &str,
    ) -> Result<RequestTicket, ContextError> {
        let home = self
            .store
            .home(owner, name)?
            .ok_or_else(|| ContextError::HomeNotFound(name.to_string()))?;
        if home.owner.uuid != user.uuid && !home.public {
            return Err(ContextError::PermissionDenied);
        }
        self.dispatch(user, TeleportTarget::Position(home.position), TeleportKind::Normal)
    }

    pub fn teleport_warp(&self, user: &User, name: &str) -> Result<RequestTicket, ContextError> {
        let warp = self
            .store
            .warp(name)?
            .ok_or_else(|| ContextError::WarpNotFound(name.to_string()))?;
        self.dispatch(user, TeleportTarget::Position(warp.position), TeleportKind::Normal)
    }

    pub fn teleport_spawn(&self, user: &User) -> Result<RequestTicket, ContextError> {
        let spawn = self.spawn()?;
        self.dispatch(user, TeleportTarget::Position(spawn), TeleportKind::Normal)
    }

    /// Return to the position saved before the last teleport.
    pub fn teleport_back(&self, user: &User) -> Result<RequestTicket, ContextError> {
        let last = self
            .store
            .saved_position(user.uuid, SavedPositionKind::Last)?
            .ok_or(ContextError::NoBackLocation)?;
        self.dispatch(user, TeleportTarget::Position(last), TeleportKind::Back)
    }

    /// Random teleport on `server` (default: this one) in `world` (default:
    /// that server's default world).
    pub fn teleport_random(
        &self,
        user: &User,
        server: Option<ServerName>,
        world: Option<String>,
    ) -> Result<RequestTicket, ContextError> {
        let server = server.unwrap_or_else(|| self.server().clone());
        self.dispatch(user, TeleportTarget::Random { server, world }, TeleportKind::Random)
    }

    pub fn teleport_to_player(&self, user: &User, name: &str) -> Result<RequestTicket, ContextError> {
        if name.eq_ignore_ascii_case(&user.username) {
            return Err(ContextError::PermissionDenied);
        }
        self.dispatch(
            user,
            TeleportTarget::Player(name.to_string()),
            TeleportKind::PlayerToPlayer,
        )
    }

    fn dispatch(
        &self,
        user: &User,
        target: TeleportTarget,
        kind: TeleportKind,
    ) -> Result<RequestTicket, ContextError> {
        if self.online.get(user.uuid).is_none() {
            return Err(ContextError::NotOnline(user.uuid));
        }
        let ticket = self.resolver.request_teleport(user, target, kind)?;
        if let RequestTicket::Resolved(position) = &ticket {
            self.move_local(user, position.clone(), kind);
        }
        Ok(ticket)
    }

    fn move_local(&self, user: &User, position: Position, kind: TeleportKind) {
        let Some(previous) = self.online.position(user.uuid) else {
            tracing::debug!(user = %user, "Teleport target left before completion");
            return;
        };
        if let Err(e) = self
            .store
            .set_saved_position(user.uuid, SavedPositionKind::Last, previous)
        {
            tracing::warn!(user = %user, "Failed to save back location: {e}");
        }
        self.online.set_position(user.uuid, position.clone());
        self.mark_invulnerable(user.uuid);
        self.notify(user.uuid, &format!("Teleported to {position}."));
        if let Some(analytics) = self.hooks.analytics() {
            analytics.record_teleport(user, kind, true);
        }
        tracing::debug!(user = %user, ?kind, "Teleported to {position}");
    }

    /// The destination accepted; the player now has to switch servers.
    fn hand_off(&self, user: &User, position: Position, kind: TeleportKind) {
        if let Some(previous) = self.online.position(user.uuid)
            && let Err(e) = self
                .store
                .set_saved_position(user.uuid, SavedPositionKind::Last, previous)
        {
            tracing::warn!(user = %user, "Failed to save back location: {e}");
        }
        self.notify(user.uuid, &format!("Sending you to {}.", position.server));
        if let Some(analytics) = self.hooks.analytics() {
            analytics.record_teleport(user, kind, true);
        }
        tracing::info!(user = %user, ?kind, to = %position.server, "Handing off to {position}");
    }

    fn notify(&self, uuid: Uuid, message: &str) {
        if let Some(online) = self.online.get(uuid) {
            online.audience.send_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{Hook, MapHook};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use waystone_net::{LocalHub, Payload, Recipient, ResponseOutcome, TeleportResponse};
    use waystone_transfer::TransferError;
    use waystone_world::{Audience, MemoryStore, MemoryWorld, SessionHandle};

    #[derive(Default)]
    struct Inbox(Mutex<Vec<String>>);

    impl Audience for Inbox {
        fn send_message(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[derive(Default)]
    struct Markers {
        homes: Mutex<Vec<String>>,
        warps: Mutex<Vec<String>>,
    }

    impl MapHook for Markers {
        fn update_home(&self, home: &Home) {
            let mut homes = self.homes.lock().unwrap();
            homes.retain(|h| h != &home.name);
            homes.push(home.name.clone());
        }
        fn remove_home(&self, home: &Home) {
            self.homes.lock().unwrap().retain(|h| h != &home.name);
        }
        fn clear_homes(&self) {
            self.homes.lock().unwrap().clear();
        }
        fn update_warp(&self, warp: &Warp) {
            let mut warps = self.warps.lock().unwrap();
            warps.retain(|w| w != &warp.name);
            warps.push(warp.name.clone());
        }
        fn remove_warp(&self, warp: &Warp) {
            self.warps.lock().unwrap().retain(|w| w != &warp.name);
        }
        fn clear_warps(&self) {
            self.warps.lock().unwrap().clear();
        }
    }

    fn context(config: Config) -> Waystone {
        let hub = LocalHub::new();
        let (broker, _rx) = hub.connect(ServerName::from(config.server.name.as_str()), 16);
        let world: Arc<dyn WorldQuery> = Arc::new(MemoryWorld::flat("world", 0, 256, 64));
        let mut ws = Waystone::new(config, Arc::new(MemoryStore::new()), world, Arc::new(broker));
        ws.start().unwrap();
        ws
    }

    /// A context on `server` with peer `b` attached to the same hub.
    fn networked() -> (Waystone, mpsc::Receiver<Envelope>) {
        let mut config = Config::default();
        config.cross_server.enabled = true;
        let hub = LocalHub::new();
        let (broker, _rx) = hub.connect(ServerName::from(config.server.name.as_str()), 16);
        let (_, peer_rx) = hub.connect(ServerName::from("b"), 16);
        let world: Arc<dyn WorldQuery> = Arc::new(MemoryWorld::flat("world", 0, 256, 64));
        let mut ws = Waystone::new(config, Arc::new(MemoryStore::new()), world, Arc::new(broker));
        ws.start().unwrap();
        (ws, peer_rx)
    }

    fn here(x: f64, y: f64, z: f64) -> Position {
        Position::new(ServerName::from("server"), "world", x, y, z)
    }

    fn join(ws: &Waystone, name: &str) -> (User, Arc<Inbox>) {
        let inbox = Arc::new(Inbox::default());
        let user = User::new(Uuid::new_v4(), name);
        ws.on_join(
            OnlineUser {
                user: user.clone(),
                session: SessionHandle(1),
                vanished: false,
                audience: inbox.clone(),
            },
            here(0.5, 65.0, 0.5),
        )
        .unwrap();
        (user, inbox)
    }

    #[test]
    fn test_spawn_falls_back_to_world_spawn() {
        let mut config = Config::default();
        config.cross_server.enabled = true;
        config.cross_server.global_spawn.enabled = true;
        let ws = context(config);
        assert_eq!(ws.spawn().unwrap(), here(0.5, 65.0, 0.5));

        let hub_spawn = Position::new(ServerName::from("hub"), "world", 10.5, 70.0, 10.5);
        ws.store().save_warp(Warp::new("spawn", hub_spawn.clone())).unwrap();
        assert_eq!(ws.spawn().unwrap(), hub_spawn);
    }

    #[test]
    fn test_set_home_snaps_to_ground_and_limits() {
        let mut config = Config::default();
        config.general.max_homes = 1;
        let ws = context(config);
        let (alice, _) = join(&ws, "alice");

        let home = ws.set_home(&alice, "base", here(4.5, 72.0, 4.5), false).unwrap();
        assert_eq!(home.position.y, 65.0);

        let err = ws.set_home(&alice, "other", here(1.5, 65.0, 1.5), false).unwrap_err();
        assert!(matches!(err, ContextError::HomeLimitReached { max: 1 }));

        // Moving an existing home is not a new slot.
        let moved = ws.set_home(&alice, "BASE", here(8.5, 65.0, 8.5), false).unwrap();
        assert_eq!(moved.uuid, home.uuid);

        ws.edit_user_data(alice.uuid, |saved| saved.home_slots = Some(2)).unwrap();
        assert!(ws.set_home(&alice, "other", here(1.5, 65.0, 1.5), false).is_ok());
    }

    #[test]
    fn test_map_hook_sees_public_homes_only() {
        let ws = context(Config::default());
        let markers = Arc::new(Markers::default());
        ws.hooks().register(Hook::Map(markers.clone()));
        let (alice, _) = join(&ws, "alice");

        ws.set_home(&alice, "secret", here(2.5, 65.0, 2.5), false).unwrap();
        ws.set_home(&alice, "shop", here(3.5, 65.0, 3.5), true).unwrap();
        assert_eq!(*markers.homes.lock().unwrap(), vec!["shop".to_string()]);

        ws.set_home(&alice, "shop", here(3.5, 65.0, 3.5), false).unwrap();
        assert!(markers.homes.lock().unwrap().is_empty());

        ws.save_warp("market", here(5.5, 65.0, 5.5)).unwrap();
        assert_eq!(*markers.warps.lock().unwrap(), vec!["market".to_string()]);
        assert!(ws.delete_warp("market").unwrap());
        assert!(markers.warps.lock().unwrap().is_empty());
        assert!(!ws.delete_warp("market").unwrap());
    }

    #[test]
    fn test_local_home_teleport_and_back() {
        let ws = context(Config::default());
        let (alice, inbox) = join(&ws, "alice");
        ws.set_home(&alice, "base", here(20.5, 65.0, 20.5), false).unwrap();

        let ticket = ws.teleport_home(&alice, alice.uuid, "base").unwrap();
        assert_eq!(ticket, RequestTicket::Resolved(here(20.5, 65.0, 20.5)));
        assert_eq!(ws.online().position(alice.uuid), Some(here(20.5, 65.0, 20.5)));
        assert!(ws.is_invulnerable(alice.uuid));
        assert_eq!(inbox.0.lock().unwrap().len(), 1);

        ws.teleport_back(&alice).unwrap();
        assert_eq!(ws.online().position(alice.uuid), Some(here(0.5, 65.0, 0.5)));
    }

    #[test]
    fn test_private_home_of_other_player_denied() {
        let ws = context(Config::default());
        let (alice, _) = join(&ws, "alice");
        let (bob, _) = join(&ws, "bob");
        ws.set_home(&alice, "base", here(20.5, 65.0, 20.5), false).unwrap();

        let err = ws.teleport_home(&bob, alice.uuid, "base").unwrap_err();
        assert!(matches!(err, ContextError::PermissionDenied));
        let err = ws.teleport_home(&bob, alice.uuid, "nope").unwrap_err();
        assert!(matches!(err, ContextError::HomeNotFound(_)));
    }

    #[test]
    fn test_ignoring_requests_blocks_teleport_to_player() {
        let ws = context(Config::default());
        let (alice, _) = join(&ws, "alice");
        let (bob, _) = join(&ws, "bob");

        ws.teleport_to_player(&alice, "bo").unwrap();
        assert_eq!(ws.online().position(alice.uuid), ws.online().position(bob.uuid));

        ws.edit_user_data(bob.uuid, |saved| saved.ignoring_requests = true).unwrap();
        let err = ws.teleport_to_player(&alice, "bob").unwrap_err();
        assert!(matches!(err, ContextError::Transfer(TransferError::PermissionDenied)));
    }

    #[test]
    fn test_random_teleport_locally() {
        let ws = context(Config::default());
        let (alice, _) = join(&ws, "alice");
        let RequestTicket::Resolved(position) = ws.teleport_random(&alice, None, None).unwrap()
        else {
            panic!("expected a local destination");
        };
        assert_eq!(position.y, 65.0);
        let err = ws
            .teleport_random(&alice, None, Some("world_nether".to_string()))
            .unwrap_err();
        assert!(matches!(err, ContextError::Transfer(TransferError::Engine(_))));
    }

    #[test]
    fn test_replaced_remote_request_is_not_reported() {
        let (mut ws, mut peer_rx) = networked();
        let (alice, inbox) = join(&ws, "alice");
        let b = Some(ServerName::from("b"));

        let first = ws.teleport_random(&alice, b.clone(), None).unwrap();
        let second = ws.teleport_random(&alice, b, None).unwrap();
        assert_ne!(first, second);
        assert_eq!(ws.tick(Instant::now()), 0);
        assert!(inbox.0.lock().unwrap().is_empty());

        let mut sent = 0;
        while peer_rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 2);
    }

    #[test]
    fn test_local_teleport_replaces_remote_request() {
        let (mut ws, _peer_rx) = networked();
        let (alice, inbox) = join(&ws, "alice");

        let RequestTicket::Pending(remote) = ws
            .teleport_random(&alice, Some(ServerName::from("b")), None)
            .unwrap()
        else {
            panic!("expected a remote request");
        };
        assert!(matches!(ws.teleport_spawn(&alice).unwrap(), RequestTicket::Resolved(_)));
        assert_eq!(ws.resolver().pending().in_flight(alice.uuid), None);

        ws.route(Envelope {
            correlation_id: remote,
            origin: ServerName::from("b"),
            recipient: Recipient::Server(ServerName::from("server")),
            payload: Payload::TeleportResponse(TeleportResponse {
                outcome: ResponseOutcome::Success(Position::new(
                    ServerName::from("b"),
                    "world",
                    10.5,
                    65.0,
                    -3.5,
                )),
            }),
        });
        assert_eq!(ws.tick(Instant::now()), 0);
        assert_eq!(
            *inbox.0.lock().unwrap(),
            vec!["Teleported to server:world (0.5, 65.0, 0.5).".to_string()]
        );
    }

    #[test]
    fn test_warmups() {
        let ws = context(Config::default());
        let (alice, inbox) = join(&ws, "alice");
        assert_eq!(ws.warmup_duration(), Duration::from_secs(5));

        assert!(ws.begin_warmup(alice.uuid));
        assert!(!ws.begin_warmup(alice.uuid));
        assert!(ws.cancel_warmup(alice.uuid));
        assert!(!ws.finish_warmup(alice.uuid));
        assert_eq!(*inbox.0.lock().unwrap(), vec!["Teleport cancelled.".to_string()]);

        assert!(ws.begin_warmup(alice.uuid));
        assert!(ws.finish_warmup(alice.uuid));
        assert!(!ws.is_warming_up(alice.uuid));
    }

    #[test]
    fn test_quit_saves_offline_position() {
        let mut ws = context(Config::default());
        let (alice, _) = join(&ws, "alice");
        ws.on_quit(alice.uuid).unwrap();
        assert!(ws.online().is_empty());
        assert_eq!(
            ws.store()
                .saved_position(alice.uuid, SavedPositionKind::Offline)
                .unwrap(),
            Some(here(0.5, 65.0, 0.5))
        );
        assert!(matches!(
            ws.teleport_spawn(&alice),
            Err(ContextError::NotOnline(_))
        ));

        ws.shutdown();
        assert!(!ws.is_started());
    }
}
