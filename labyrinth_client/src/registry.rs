//! Entity registry.
//!
//! Owns every entity the client knows about: the local player, remote rivals
//! and level pickups. Ids are unique within a kind and kept in ordered maps
//! so iteration (and therefore scene sync and logging) is stable.
//!
//! Session traffic reaches the registry as [`RegistryEvent`]s. Each event is
//! applied atomically and reports what it changed as a [`RegistryChange`].

use std::collections::BTreeMap;

use tracing::{debug, info};

use labyrinth_shared::{level::PickupConfig, math::Vec3};

/// Entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    LocalPlayer,
    Rival,
    Pickup,
}

/// The player controlled by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    /// Session id assigned by the room.
    pub id: String,
    pub position: Vec3,
    /// Pickup whose solve area the player currently stands in.
    pub solving_target: Option<String>,
}

/// Another player in the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Rival {
    pub id: String,
    pub position: Vec3,
}

/// Interactive level object. Fixed in place for the whole session.
#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub id: String,
    pub position: Vec3,
}

/// Borrowed view of any entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityRef<'a> {
    Player(&'a LocalPlayer),
    Rival(&'a Rival),
    Pickup(&'a Pickup),
}

impl EntityRef<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Player(_) => EntityKind::LocalPlayer,
            EntityRef::Rival(_) => EntityKind::Rival,
            EntityRef::Pickup(_) => EntityKind::Pickup,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRef::Player(p) => &p.id,
            EntityRef::Rival(r) => &r.id,
            EntityRef::Pickup(p) => &p.id,
        }
    }

    pub fn position(&self) -> Vec3 {
        match self {
            EntityRef::Player(p) => p.position,
            EntityRef::Rival(r) => r.position,
            EntityRef::Pickup(p) => p.position,
        }
    }
}

/// Inbound session event, already decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Joined { id: String, position: Vec3 },
    Moved { id: String, position: Vec3 },
    Left { id: String },
}

/// Why an event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Removal of an id we never saw, or saw removed already.
    UnknownRemoval,
    /// The room echoed a leave for our own id.
    LocalLeave,
    /// Event arrived before the local player exists.
    NoLocalPlayer,
}

/// Outcome of applying one [`RegistryEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    PlayerMoved { position: Vec3 },
    /// `implicit` is set when the first sight of the rival was a move.
    RivalJoined { id: String, implicit: bool },
    RivalMoved { id: String },
    RivalLeft { id: String },
    Ignored(IgnoreReason),
}

/// Registry setup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("pickups were already initialized")]
    PickupsInitialized,
    #[error("duplicate pickup id {0}")]
    DuplicatePickup(String),
    #[error("local player already exists as {0}")]
    PlayerExists(String),
}

/// Authoritative local record of all entities.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    player: Option<LocalPlayer>,
    rivals: BTreeMap<String, Rival>,
    pickups: BTreeMap<String, Pickup>,
    pickups_initialized: bool,
    player_height: f32,
}

impl EntityRegistry {
    /// `player_height` replaces the vertical component of server-echoed local positions.
    pub fn new(player_height: f32) -> Self {
        Self {
            player_height,
            ..Self::default()
        }
    }

    /// Creates the local player under its session id.
    pub fn create_player(&mut self, session_id: &str, spawn: Vec3) -> Result<&LocalPlayer, RegistryError> {
        if let Some(existing) = &self.player {
            return Err(RegistryError::PlayerExists(existing.id.clone()));
        }
        info!(session_id = %session_id, position = %spawn, "Local player created");
        Ok(&*self.player.insert(LocalPlayer {
            id: session_id.to_string(),
            position: spawn,
            solving_target: None,
        }))
    }

    pub fn player(&self) -> Option<&LocalPlayer> {
        self.player.as_ref()
    }

    /// Sets the local player's position from local movement.
    pub fn move_player(&mut self, position: Vec3) -> bool {
        match self.player.as_mut() {
            Some(p) => {
                p.position = position;
                true
            }
            None => false,
        }
    }

    pub fn set_solving_target(&mut self, target: Option<&str>) {
        if let Some(p) = self.player.as_mut() {
            p.solving_target = target.map(str::to_string);
        }
    }

    /// Loads the pickup set. Membership is fixed after this call.
    pub fn init_pickups(&mut self, pickups: &[PickupConfig]) -> Result<(), RegistryError> {
        if self.pickups_initialized {
            return Err(RegistryError::PickupsInitialized);
        }
        let mut staged = BTreeMap::new();
        for cfg in pickups {
            let pickup = Pickup {
                id: cfg.id.clone(),
                position: cfg.position,
            };
            if staged.insert(cfg.id.clone(), pickup).is_some() {
                return Err(RegistryError::DuplicatePickup(cfg.id.clone()));
            }
        }
        self.pickups = staged;
        self.pickups_initialized = true;
        debug!(count = self.pickups.len(), "Pickups initialized");
        Ok(())
    }

    /// Creates the rival or moves it. Returns `true` when it was created.
    pub fn upsert_rival(&mut self, id: &str, position: Vec3) -> bool {
        match self.rivals.get_mut(id) {
            Some(rival) => {
                rival.position = position;
                false
            }
            None => {
                self.rivals.insert(
                    id.to_string(),
                    Rival {
                        id: id.to_string(),
                        position,
                    },
                );
                true
            }
        }
    }

    /// Removes a rival. Unknown ids are fine and return `false`.
    pub fn remove_rival(&mut self, id: &str) -> bool {
        self.rivals.remove(id).is_some()
    }

    /// Looks an id up across kinds: local player first, then rivals, then pickups.
    pub fn by_id(&self, id: &str) -> Option<EntityRef<'_>> {
        if let Some(p) = self.player.as_ref().filter(|p| p.id == id) {
            return Some(EntityRef::Player(p));
        }
        if let Some(r) = self.rivals.get(id) {
            return Some(EntityRef::Rival(r));
        }
        self.pickups.get(id).map(EntityRef::Pickup)
    }

    pub fn rival(&self, id: &str) -> Option<&Rival> {
        self.rivals.get(id)
    }

    pub fn pickup(&self, id: &str) -> Option<&Pickup> {
        self.pickups.get(id)
    }

    pub fn rivals(&self) -> impl Iterator<Item = &Rival> {
        self.rivals.values()
    }

    pub fn pickups(&self) -> impl Iterator<Item = &Pickup> {
        self.pickups.values()
    }

    pub fn rival_count(&self) -> usize {
        self.rivals.len()
    }

    pub fn pickup_count(&self) -> usize {
        self.pickups.len()
    }

    fn is_local(&self, id: &str) -> bool {
        self.player.as_ref().is_some_and(|p| p.id == id)
    }

    /// Applies one session event.
    ///
    /// Events naming the local session id only ever touch the local player.
    pub fn apply(&mut self, event: RegistryEvent) -> RegistryChange {
        if self.player.is_none() {
            debug!(?event, "Session event before local player exists");
            return RegistryChange::Ignored(IgnoreReason::NoLocalPlayer);
        }

        match event {
            RegistryEvent::Joined { id, position } | RegistryEvent::Moved { id, position }
                if self.is_local(&id) =>
            {
                let position = position.with_y(self.player_height);
                self.move_player(position);
                RegistryChange::PlayerMoved { position }
            }
            RegistryEvent::Left { id } if self.is_local(&id) => {
                debug!(id = %id, "Ignoring leave for local player");
                RegistryChange::Ignored(IgnoreReason::LocalLeave)
            }
            RegistryEvent::Joined { id, position } => {
                if self.upsert_rival(&id, position) {
                    info!(id = %id, position = %position, "Rival joined");
                    RegistryChange::RivalJoined { id, implicit: false }
                } else {
                    debug!(id = %id, "Repeated join for known rival");
                    RegistryChange::RivalMoved { id }
                }
            }
            RegistryEvent::Moved { id, position } => {
                if self.upsert_rival(&id, position) {
                    info!(id = %id, position = %position, "Rival first seen moving");
                    RegistryChange::RivalJoined { id, implicit: true }
                } else {
                    RegistryChange::RivalMoved { id }
                }
            }
            RegistryEvent::Left { id } => {
                if self.remove_rival(&id) {
                    info!(id = %id, "Rival left");
                    RegistryChange::RivalLeft { id }
                } else {
                    debug!(id = %id, "Leave for unknown rival");
                    RegistryChange::Ignored(IgnoreReason::UnknownRemoval)
                }
            }
        }
    }
}
