//! `labyrinth_client`
//!
//! Client-side runtime:
//! - Asset loading behind a completion barrier
//! - Entity registry mirroring the room's players and the level pickups
//! - Solve-area interaction state and task signalling
//! - Room session routing (inbound events, fire-and-forget position sends)
//! - The per-frame loop tying them together
//!
//! Rendering, UI widgets and physics are collaborators behind traits
//! ([`scene::SceneBackend`], [`interaction::InteractionUi`], [`zones::ZoneDetector`]).

pub mod assets;
pub mod client;
pub mod input;
pub mod interaction;
pub mod registry;
pub mod scene;
pub mod session;
pub mod zones;

pub use client::GameClient;
