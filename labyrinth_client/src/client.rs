//! Client implementation.
//!
//! The client runs one cooperative loop. It:
//! - Loads the prefab assets behind a completion barrier
//! - Joins the room once the barrier fires and builds the level
//! - Applies inbound session events one at a time between ticks
//! - Ticks at a fixed rate: input, movement, solve areas, position send, present
//!
//! Background work (asset fetches, socket reads and writes) only reaches the
//! loop as channel messages, so entity state is never touched concurrently.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use labyrinth_shared::{config::ClientConfig, level::LevelConfig, math::Vec3};

use crate::{
    assets::{standard_manifest, AssetLoadCoordinator, AssetSource, PrefabId, PrefabLibrary},
    input::{InputButtons, InputFrame, InputSource},
    interaction::{InteractionStateMachine, InteractionUi, Transition},
    registry::{EntityRegistry, RegistryChange, RegistryEvent},
    scene::{SceneBackend, SceneKey, SceneKind},
    session::{SendOutcome, SessionRouter, SessionTransport, SessionUpdate},
    zones::{BoxZoneDetector, ZoneDetector, SOLVE_AREA_HALF_EXTENTS},
};

/// Client lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// Asset tasks outstanding.
    Loading,
    /// Assets ready, room not joined yet.
    Connecting,
    /// Level built, ticking.
    Running,
    /// Session over.
    Stopped,
}

/// High-level game client.
pub struct GameClient<S, U> {
    pub cfg: ClientConfig,
    pub phase: ClientPhase,

    assets: AssetLoadCoordinator,
    /// Receives the prefab library when the asset barrier fires.
    barrier: Option<oneshot::Receiver<PrefabLibrary>>,
    prefabs: Option<PrefabLibrary>,
    router: SessionRouter,
    registry: EntityRegistry,
    interaction: InteractionStateMachine,
    zones: BoxZoneDetector,

    scene: S,
    ui: U,

    tick: u64,
    sends_dropped: u64,
}

impl<S: SceneBackend, U: InteractionUi> GameClient<S, U> {
    pub fn new(cfg: ClientConfig, source: Arc<dyn AssetSource>, scene: S, ui: U) -> Self {
        let router = SessionRouter::new(
            cfg.outbound_queue,
            Duration::from_millis(cfg.connect_timeout_ms),
        );
        let registry = EntityRegistry::new(cfg.player_height);
        Self {
            assets: AssetLoadCoordinator::new(source, ""),
            barrier: None,
            prefabs: None,
            router,
            registry,
            interaction: InteractionStateMachine::new(),
            zones: BoxZoneDetector::new(),
            scene,
            ui,
            tick: 0,
            sends_dropped: 0,
            phase: ClientPhase::Loading,
            cfg,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn interaction(&self) -> &InteractionStateMachine {
        &self.interaction
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Issues the six prefab load tasks.
    pub fn issue_standard_assets(&mut self) -> anyhow::Result<()> {
        for (id, asset) in standard_manifest() {
            self.assets.issue(id, asset)?;
        }
        let (tx, rx) = oneshot::channel();
        self.assets.on_all_complete(move |prefabs| {
            info!(prefabs = prefabs.len(), "Asset barrier released");
            let _ = tx.send(prefabs.clone());
        });
        self.barrier = Some(rx);
        Ok(())
    }

    /// Starts loading and waits for the barrier. Any failed task is fatal.
    pub async fn load_assets(&mut self) -> anyhow::Result<()> {
        if self.phase != ClientPhase::Loading {
            bail!("assets already loaded");
        }
        let Some(barrier) = self.barrier.take() else {
            bail!("no asset tasks issued");
        };
        self.assets.start()?;
        self.assets
            .run_to_completion()
            .await
            .context("load assets")?;
        // Only the barrier callback hands the prefabs over.
        let prefabs = barrier.await.context("asset barrier did not fire")?;
        self.prefabs = Some(prefabs);
        self.phase = ClientPhase::Connecting;
        Ok(())
    }

    /// Joins the configured room and builds the level it hands back.
    pub async fn connect(&mut self, transport: &dyn SessionTransport) -> anyhow::Result<()> {
        if self.phase != ClientPhase::Connecting {
            bail!("cannot connect while {:?}", self.phase);
        }
        let welcome = self
            .router
            .connect(transport, &self.cfg.player_name, &self.cfg.room_name)
            .await?;
        if let Err(e) = self.init_level(&welcome.level, &welcome.handle.session_id) {
            warn!(error = %format!("{e:#}"), "Level init failed, leaving room");
            self.router.leave();
            return Err(e);
        }
        Ok(())
    }

    /// Builds corridors, lights, pickups and the local player.
    ///
    /// Everything that can fail is checked before the scene or registry is
    /// touched, so an error leaves both empty.
    pub fn init_level(&mut self, level: &LevelConfig, session_id: &str) -> anyhow::Result<()> {
        let Some(prefabs) = self.prefabs.as_ref() else {
            bail!("level init before assets are loaded");
        };
        if self.phase != ClientPhase::Connecting {
            bail!("level init while {:?}", self.phase);
        }
        level.validate().context("invalid level")?;
        let corridor_prefabs = level
            .corridors
            .iter()
            .map(|c| prefabs.require(PrefabId::for_corridor(c.kind)))
            .collect::<Result<Vec<_>, _>>()?;
        let pickup_prefab = prefabs.require(PrefabId::Pickup)?;
        let player_prefab = prefabs.require(PrefabId::Player)?;

        for (i, (corridor, prefab)) in level.corridors.iter().zip(corridor_prefabs).enumerate() {
            self.scene.spawn(
                SceneKey::new(SceneKind::Corridor, &format!("corridor-{i}")),
                prefab,
                corridor.position,
            );
        }
        for light in &level.lights {
            self.scene.place_light(light);
        }

        self.registry
            .init_pickups(&level.pickups)
            .context("init pickups")?;
        for pickup in self.registry.pickups() {
            self.scene.spawn(
                SceneKey::new(SceneKind::Pickup, &pickup.id),
                pickup_prefab,
                pickup.position,
            );
        }

        let player = self
            .registry
            .create_player(session_id, level.spawn_point)
            .context("create player")?;
        self.scene.spawn(
            SceneKey::new(SceneKind::Player, &player.id),
            player_prefab,
            player.position,
        );

        self.zones = BoxZoneDetector::from_registry(&self.registry, SOLVE_AREA_HALF_EXTENTS);
        self.phase = ClientPhase::Running;
        info!(
            corridors = level.corridors.len(),
            lights = level.lights.len(),
            pickups = self.registry.pickup_count(),
            spawn = %level.spawn_point,
            "Level initialized"
        );
        Ok(())
    }

    /// Applies one inbound session event and mirrors it into the scene.
    pub fn apply_session_event(&mut self, event: RegistryEvent) -> RegistryChange {
        let change = self.registry.apply(event);
        match &change {
            RegistryChange::PlayerMoved { position } => {
                if let Some(player) = self.registry.player() {
                    let key = SceneKey::new(SceneKind::Player, &player.id);
                    self.scene.set_position(&key, *position);
                }
            }
            RegistryChange::RivalJoined { id, .. } => {
                if let (Some(rival), Some(prefab)) = (
                    self.registry.rival(id),
                    self.prefabs.as_ref().and_then(|p| p.get(PrefabId::Player)),
                ) {
                    self.scene
                        .spawn(SceneKey::new(SceneKind::Rival, id), prefab, rival.position);
                }
            }
            RegistryChange::RivalMoved { id } => {
                if let Some(rival) = self.registry.rival(id) {
                    self.scene
                        .set_position(&SceneKey::new(SceneKind::Rival, id), rival.position);
                }
            }
            RegistryChange::RivalLeft { id } => {
                self.scene.despawn(&SceneKey::new(SceneKind::Rival, id));
            }
            RegistryChange::Ignored(reason) => {
                debug!(?reason, "Session event ignored");
            }
        }
        change
    }

    /// Handles one update from the router.
    pub fn handle_session_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Event(event) => {
                self.apply_session_event(event);
            }
            SessionUpdate::Ignored => {}
            SessionUpdate::Closed(err) => {
                warn!(error = %err, "Session ended");
                self.phase = ClientPhase::Stopped;
            }
        }
    }

    /// Waits for the next inbound session update.
    pub async fn next_session_update(&mut self) -> SessionUpdate {
        self.router.next_update().await
    }

    /// Applies everything already queued by the session.
    pub fn pump_session(&mut self) -> usize {
        let updates = self.router.drain_inbound();
        let n = updates.len();
        for update in updates {
            self.handle_session_update(update);
        }
        n
    }

    /// Advances one frame. Does nothing unless the client is running.
    pub fn tick(&mut self, input: InputFrame) -> anyhow::Result<()> {
        if self.phase != ClientPhase::Running {
            return Ok(());
        }
        let Some(player) = self.registry.player() else {
            bail!("running without a local player");
        };
        let (player_id, current) = (player.id.clone(), player.position);

        if input.released.contains(InputButtons::QUIT) {
            info!("Quit requested");
            self.router.leave();
            self.phase = ClientPhase::Stopped;
            return Ok(());
        }

        let dt = self.cfg.tick_interval().as_secs_f32();
        let step = input.wish.with_y(0.0).scale(self.cfg.move_speed * dt);
        let position = current.add(step);
        self.registry.move_player(position);

        for event in self.zones.detect(position) {
            let transition = self
                .interaction
                .on_zone_event(event, &self.registry, &mut self.ui);
            if transition != Transition::Ignored {
                self.registry
                    .set_solving_target(self.interaction.state().active_zone());
            }
        }
        if input.released.contains(InputButtons::TASK) {
            self.interaction.task_start(&mut self.ui);
        }

        if self.router.send_player_position(position) == SendOutcome::Dropped {
            self.sends_dropped += 1;
            debug!(tick = self.tick, "Position send dropped");
        }

        self.scene
            .set_position(&SceneKey::new(SceneKind::Player, &player_id), position);
        self.scene.present();
        self.tick += 1;
        Ok(())
    }

    /// Human-readable status lines.
    pub fn status(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.push(format!("Phase: {:?}", self.phase));
        match self.router.handle() {
            Some(h) => out.push(format!("Session: {} ({:?})", h.session_id, h.state)),
            None => out.push("Session: none".to_string()),
        }
        out.push(format!("Tick: {}", self.tick));
        if let Some(p) = self.registry.player() {
            out.push(format!("Position: {}", p.position));
        }
        out.push(format!("Rivals: {}", self.registry.rival_count()));
        out.push(format!("Pickups: {}", self.registry.pickup_count()));
        out.push(format!(
            "Zone: {:?} ({:?})",
            self.interaction.state().active_zone(),
            self.interaction.phase()
        ));
        out.push(format!("Dropped sends: {}", self.sends_dropped));
        out
    }

    /// Current local player position, once the level is up.
    pub fn player_position(&self) -> Option<Vec3> {
        self.registry.player().map(|p| p.position)
    }

    /// Full lifecycle: load, join, then tick until quit or disconnect.
    pub async fn run(
        &mut self,
        transport: &dyn SessionTransport,
        input: &mut dyn InputSource,
    ) -> anyhow::Result<()> {
        self.issue_standard_assets()?;
        self.load_assets().await?;
        self.connect(transport).await?;

        let mut interval = tokio::time::interval(self.cfg.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while self.phase == ClientPhase::Running {
            tokio::select! {
                _ = interval.tick() => {
                    // Whatever arrived since the last frame lands before it.
                    self.pump_session();
                    let frame = input.sample();
                    if let Err(e) = self.tick(frame) {
                        warn!(error = %e, "Tick error");
                    }
                    if self.tick % 600 == 0 {
                        debug!(status = ?self.status(), "Client status");
                    }
                }
                update = self.router.next_update() => {
                    self.handle_session_update(update);
                }
            }
        }
        info!(ticks = self.tick, "Client loop finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use labyrinth_shared::level::PickupConfig;
    use labyrinth_shared::net::{ClientMsg, ServerMsg};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        assets::MemoryAssetSource,
        input::IdleInput,
        interaction::Phase,
        interaction::TracingUi,
        scene::HeadlessScene,
        session::{ConnectionState, RoomLink},
    };

    struct FakeRoom {
        to_client: mpsc::Sender<ServerMsg>,
        from_client: mpsc::Receiver<ClientMsg>,
    }

    /// Hands out one prepared room link.
    struct FakeTransport(Mutex<Option<RoomLink>>);

    #[async_trait]
    impl SessionTransport for FakeTransport {
        async fn join(&self, _room: &str, _name: &str, _cap: usize) -> anyhow::Result<RoomLink> {
            self.0.lock().unwrap().take().context("link already taken")
        }
    }

    fn fake_room(level: LevelConfig) -> (FakeTransport, FakeRoom) {
        let (to_client, inbound) = mpsc::channel(16);
        let (outbound, from_client) = mpsc::channel(16);
        let link = RoomLink {
            session_id: "me".to_string(),
            level,
            inbound,
            outbound,
        };
        (
            FakeTransport(Mutex::new(Some(link))),
            FakeRoom {
                to_client,
                from_client,
            },
        )
    }

    fn fast_client() -> GameClient<HeadlessScene, TracingUi> {
        let cfg = ClientConfig {
            tick_hz: 100,
            ..ClientConfig::default()
        };
        GameClient::new(
            cfg,
            Arc::new(MemoryAssetSource::standard()),
            HeadlessScene::default(),
            TracingUi,
        )
    }

    fn level() -> LevelConfig {
        LevelConfig {
            corridors: LevelConfig::sample().corridors,
            lights: LevelConfig::sample().lights,
            pickups: vec![
                PickupConfig {
                    id: "p1".to_string(),
                    position: Vec3::new(3.5, 0.0, 0.0),
                },
                PickupConfig {
                    id: "p2".to_string(),
                    position: Vec3::new(-20.0, 0.0, 5.0),
                },
            ],
            spawn_point: Vec3::new(0.0, 1.0, 0.0),
        }
    }

    async fn loaded_client() -> GameClient<HeadlessScene, TracingUi> {
        let cfg = ClientConfig {
            tick_hz: 10,
            move_speed: 10.0,
            ..ClientConfig::default()
        };
        let mut client = GameClient::new(
            cfg,
            Arc::new(MemoryAssetSource::standard()),
            HeadlessScene::default(),
            TracingUi,
        );
        client.issue_standard_assets().unwrap();
        client.load_assets().await.unwrap();
        client
    }

    #[tokio::test]
    async fn level_init_populates_registry_and_scene() {
        let mut client = loaded_client().await;
        assert_eq!(client.phase, ClientPhase::Connecting);
        client.init_level(&level(), "me").unwrap();

        let reg = client.registry();
        let player = reg.player().unwrap();
        assert_eq!(player.id, "me");
        assert_eq!(player.position, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(reg.pickup_count(), 2);
        assert_eq!(reg.pickup("p2").unwrap().position, Vec3::new(-20.0, 0.0, 5.0));
        assert_eq!(reg.rival_count(), 0);

        assert_eq!(client.scene().count(SceneKind::Corridor), 4);
        assert_eq!(client.scene().count(SceneKind::Pickup), 2);
        assert_eq!(client.scene().count(SceneKind::Player), 1);
        assert_eq!(client.scene().lights(), 2);
        assert_eq!(client.phase, ClientPhase::Running);
    }

    #[tokio::test]
    async fn failed_assets_never_reach_connecting() {
        let cfg = ClientConfig::default();
        let source = MemoryAssetSource::standard().with_failure("corridorT.json");
        let mut client = GameClient::new(cfg, Arc::new(source), HeadlessScene::default(), TracingUi);
        client.issue_standard_assets().unwrap();
        assert!(client.load_assets().await.is_err());
        assert_eq!(client.phase, ClientPhase::Loading);
        assert!(client.init_level(&level(), "me").is_err());
    }

    #[tokio::test]
    async fn tick_is_inert_before_running() {
        let mut client = loaded_client().await;
        client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(client.tick_count(), 0);
        assert_eq!(client.scene().frames(), 0);
    }

    #[tokio::test]
    async fn walking_into_pickup_area_enters_zone() {
        let mut client = loaded_client().await;
        client.init_level(&level(), "me").unwrap();

        // 10 units/s at 10 Hz: one unit per tick along +x.
        client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(client.interaction().phase(), Phase::Idle);
        client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(client.interaction().phase(), Phase::InZone);
        assert_eq!(
            client.registry().player().unwrap().solving_target.as_deref(),
            Some("p1")
        );

        client.tick(InputFrame::release(InputButtons::TASK)).unwrap();
        assert_eq!(client.interaction().phase(), Phase::Solving);

        for _ in 0..6 {
            client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        }
        assert_eq!(client.interaction().phase(), Phase::Idle);
        assert!(client.registry().player().unwrap().solving_target.is_none());
        assert_eq!(client.scene().frames(), 9);
    }

    #[tokio::test]
    async fn session_events_mirror_into_scene() {
        let mut client = loaded_client().await;
        client.init_level(&level(), "me").unwrap();

        client.apply_session_event(RegistryEvent::Joined {
            id: "rival".into(),
            position: Vec3::new(4.0, 0.0, 4.0),
        });
        let key = SceneKey::new(SceneKind::Rival, "rival");
        assert_eq!(client.scene().position(&key), Some(Vec3::new(4.0, 0.0, 4.0)));

        client.apply_session_event(RegistryEvent::Moved {
            id: "rival".into(),
            position: Vec3::new(5.0, 0.0, 4.0),
        });
        assert_eq!(client.scene().position(&key), Some(Vec3::new(5.0, 0.0, 4.0)));

        client.apply_session_event(RegistryEvent::Left { id: "rival".into() });
        assert_eq!(client.scene().position(&key), None);
        assert_eq!(client.registry().rival_count(), 0);
    }

    #[tokio::test]
    async fn quit_input_stops_the_client() {
        let mut client = loaded_client().await;
        client.init_level(&level(), "me").unwrap();
        client.tick(InputFrame::release(InputButtons::QUIT)).unwrap();
        assert_eq!(client.phase, ClientPhase::Stopped);
        assert!(!client.router().is_open());
    }

    #[tokio::test]
    async fn loading_without_issued_tasks_is_refused() {
        let mut client = fast_client();
        assert!(client.load_assets().await.is_err());
        assert_eq!(client.phase, ClientPhase::Loading);
    }

    #[tokio::test]
    async fn invalid_level_leaves_room_and_builds_nothing() {
        let mut bad = level();
        bad.pickups[1].id = "p1".to_string();
        let (transport, mut room) = fake_room(bad);

        let mut client = loaded_client().await;
        let err = client.connect(&transport).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid level"), "{err:#}");

        assert_eq!(client.phase, ClientPhase::Connecting);
        assert_eq!(client.router().state(), Some(ConnectionState::Closed));
        assert_eq!(room.from_client.recv().await, Some(ClientMsg::Leave));
        assert_eq!(client.scene().count(SceneKind::Corridor), 0);
        assert_eq!(client.scene().lights(), 0);
        assert_eq!(client.registry().pickup_count(), 0);
        assert!(client.registry().player().is_none());
    }

    #[tokio::test]
    async fn failed_send_stops_the_client() {
        let (transport, room) = fake_room(level());
        let mut client = loaded_client().await;
        client.connect(&transport).await.unwrap();
        drop(room.from_client);

        client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        assert_eq!(client.phase, ClientPhase::Running);
        assert_eq!(client.pump_session(), 1);
        assert_eq!(client.phase, ClientPhase::Stopped);
        assert_eq!(client.router().state(), Some(ConnectionState::Closed));
    }

    #[tokio::test]
    async fn run_ends_when_room_goes_away() {
        let (transport, room) = fake_room(level());
        let FakeRoom {
            to_client,
            from_client: _from_client,
        } = room;
        drop(to_client);

        let mut client = fast_client();
        tokio::time::timeout(Duration::from_secs(2), client.run(&transport, &mut IdleInput))
            .await
            .expect("run must return")
            .unwrap();
        assert_eq!(client.phase, ClientPhase::Stopped);
        assert_eq!(client.router().state(), Some(ConnectionState::Closed));
    }

    #[tokio::test]
    async fn run_ends_on_rejection() {
        let (transport, room) = fake_room(level());
        room.to_client
            .send(ServerMsg::Rejected {
                reason: "kicked".to_string(),
            })
            .await
            .unwrap();

        let mut client = fast_client();
        tokio::time::timeout(Duration::from_secs(2), client.run(&transport, &mut IdleInput))
            .await
            .expect("run must return")
            .unwrap();
        assert_eq!(client.phase, ClientPhase::Stopped);
        drop(room);
    }

    #[tokio::test]
    async fn run_ends_when_sends_fail() {
        let (transport, room) = fake_room(level());
        let FakeRoom {
            to_client: _to_client,
            from_client,
        } = room;
        drop(from_client);

        let mut client = fast_client();
        tokio::time::timeout(Duration::from_secs(2), client.run(&transport, &mut IdleInput))
            .await
            .expect("run must return")
            .unwrap();
        assert_eq!(client.phase, ClientPhase::Stopped);
        assert!(client.tick_count() >= 1);
    }
}
