//! Scene abstraction.
//!
//! The client never depends on a graphics backend. A renderer implements
//! [`SceneBackend`]: it instances prefabs, moves instances and presents frames.

use std::collections::BTreeMap;

use labyrinth_shared::{level::LightConfig, math::Vec3};

use crate::assets::Prefab;

/// What a scene instance stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SceneKind {
    Corridor,
    Player,
    Rival,
    Pickup,
}

/// Scene instance key. Ids are only unique within a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneKey {
    pub kind: SceneKind,
    pub id: String,
}

impl SceneKey {
    pub fn new(kind: SceneKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

/// A minimal scene API.
pub trait SceneBackend: Send {
    fn spawn(&mut self, key: SceneKey, prefab: &Prefab, position: Vec3);
    fn place_light(&mut self, light: &LightConfig);
    fn set_position(&mut self, key: &SceneKey, position: Vec3);
    fn despawn(&mut self, key: &SceneKey);
    fn present(&mut self);
}

/// Scene that keeps instance positions in memory. Useful headless and in tests.
#[derive(Debug, Default)]
pub struct HeadlessScene {
    instances: BTreeMap<SceneKey, Vec3>,
    lights: usize,
    frames: u64,
}

impl HeadlessScene {
    pub fn position(&self, key: &SceneKey) -> Option<Vec3> {
        self.instances.get(key).copied()
    }

    pub fn count(&self, kind: SceneKind) -> usize {
        self.instances.keys().filter(|k| k.kind == kind).count()
    }

    pub fn lights(&self) -> usize {
        self.lights
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl SceneBackend for HeadlessScene {
    fn spawn(&mut self, key: SceneKey, _prefab: &Prefab, position: Vec3) {
        self.instances.insert(key, position);
    }

    fn place_light(&mut self, _light: &LightConfig) {
        self.lights += 1;
    }

    fn set_position(&mut self, key: &SceneKey, position: Vec3) {
        if let Some(p) = self.instances.get_mut(key) {
            *p = position;
        }
    }

    fn despawn(&mut self, key: &SceneKey) {
        self.instances.remove(key);
    }

    fn present(&mut self) {
        self.frames += 1;
    }
}
