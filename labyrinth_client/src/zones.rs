//! Solve-area detection.
//!
//! The physics side only has to report when the player crosses into or out
//! of a pickup's solve area. [`BoxZoneDetector`] does that headlessly with
//! axis-aligned boxes centred on each pickup.

use std::collections::BTreeSet;

use labyrinth_shared::math::Vec3;

use crate::{interaction::ZoneEvent, registry::EntityRegistry};

/// Default solve-area half extents around a pickup.
pub const SOLVE_AREA_HALF_EXTENTS: Vec3 = Vec3::new(2.0, 3.0, 2.0);

/// Turns actor positions into enter/exit events.
pub trait ZoneDetector: Send {
    fn detect(&mut self, actor: Vec3) -> Vec<ZoneEvent>;
}

#[derive(Debug, Clone)]
struct Zone {
    id: String,
    center: Vec3,
    half: Vec3,
}

impl Zone {
    fn contains(&self, p: Vec3) -> bool {
        let d = p.sub(self.center);
        d.x.abs() <= self.half.x && d.y.abs() <= self.half.y && d.z.abs() <= self.half.z
    }
}

/// Edge-triggered box detector.
#[derive(Debug, Clone, Default)]
pub struct BoxZoneDetector {
    zones: Vec<Zone>,
    inside: BTreeSet<String>,
}

impl BoxZoneDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_zone(&mut self, id: &str, center: Vec3, half_extents: Vec3) {
        self.zones.push(Zone {
            id: id.to_string(),
            center,
            half: half_extents,
        });
    }

    /// One zone per registered pickup.
    pub fn from_registry(registry: &EntityRegistry, half_extents: Vec3) -> Self {
        let mut det = Self::new();
        for pickup in registry.pickups() {
            det.add_zone(&pickup.id, pickup.position, half_extents);
        }
        det
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }
}

impl ZoneDetector for BoxZoneDetector {
    /// Exits are reported before enters so a hop between adjacent zones
    /// leaves the old one first.
    fn detect(&mut self, actor: Vec3) -> Vec<ZoneEvent> {
        let mut exits = Vec::new();
        let mut enters = Vec::new();
        for zone in &self.zones {
            let was_inside = self.inside.contains(&zone.id);
            let is_inside = zone.contains(actor);
            match (was_inside, is_inside) {
                (false, true) => enters.push(zone.id.clone()),
                (true, false) => exits.push(zone.id.clone()),
                _ => {}
            }
        }
        for id in &exits {
            self.inside.remove(id);
        }
        for id in &enters {
            self.inside.insert(id.clone());
        }
        exits
            .into_iter()
            .map(ZoneEvent::Exit)
            .chain(enters.into_iter().map(ZoneEvent::Enter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_each_crossing_once() {
        let mut det = BoxZoneDetector::new();
        det.add_zone("p", Vec3::new(10.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));

        assert!(det.detect(Vec3::ZERO).is_empty());
        assert_eq!(det.detect(Vec3::new(9.5, 0.0, 0.0)), [ZoneEvent::Enter("p".into())]);
        assert!(det.detect(Vec3::new(10.5, 0.5, 0.0)).is_empty());
        assert_eq!(det.detect(Vec3::new(12.0, 0.0, 0.0)), [ZoneEvent::Exit("p".into())]);
        assert!(det.detect(Vec3::new(12.0, 0.0, 0.0)).is_empty());
    }

    #[test]
    fn hop_between_zones_exits_first() {
        let mut det = BoxZoneDetector::new();
        det.add_zone("a", Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0));
        det.add_zone("b", Vec3::new(5.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));

        det.detect(Vec3::ZERO);
        assert_eq!(
            det.detect(Vec3::new(5.0, 0.0, 0.0)),
            [ZoneEvent::Exit("a".into()), ZoneEvent::Enter("b".into())]
        );
    }
}
