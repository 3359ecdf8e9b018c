//! Interaction state machine.
//!
//! Tracks which pickup solve area the local player stands in and whether a
//! task is in progress there:
//!
//! ```text
//! Idle --enter(P)--> InZone(P) --task start--> Solving(P)
//!   ^                   |                         |
//!   +------exit(P)------+----------exit(P)--------+
//! ```
//!
//! Overlapping zones: entered zones form a stack and the most recently
//! entered zone that is still occupied is the active one. Leaving the active
//! zone falls back to the previous occupied zone, or to `Idle`.
//!
//! All side effects go through [`InteractionUi`].

use tracing::{debug, info};

use labyrinth_shared::math::Vec3;

use crate::registry::EntityRegistry;

/// UI collaborator for pickup labels and task progress.
pub trait InteractionUi: Send {
    /// Shows the pickup's label anchored at `anchor`.
    fn attach_label(&mut self, pickup: &str, anchor: Vec3);
    fn detach_label(&mut self, pickup: &str);
    fn task_started(&mut self);
    fn task_removed(&mut self);
}

/// UI that only logs.
#[derive(Debug, Default)]
pub struct TracingUi;

impl InteractionUi for TracingUi {
    fn attach_label(&mut self, pickup: &str, anchor: Vec3) {
        info!(pickup = %pickup, anchor = %anchor, "Label attached");
    }

    fn detach_label(&mut self, pickup: &str) {
        info!(pickup = %pickup, "Label detached");
    }

    fn task_started(&mut self) {
        info!("Task started");
    }

    fn task_removed(&mut self) {
        info!("Task removed");
    }
}

/// Zone crossing reported by the zone detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneEvent {
    Enter(String),
    Exit(String),
}

/// Machine phase, derived from [`InteractionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InZone,
    Solving,
}

/// `task_in_progress` is only ever true while `active_zone` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionState {
    active_zone: Option<String>,
    task_in_progress: bool,
}

impl InteractionState {
    pub fn active_zone(&self) -> Option<&str> {
        self.active_zone.as_deref()
    }

    pub fn task_in_progress(&self) -> bool {
        self.task_in_progress
    }

    pub fn phase(&self) -> Phase {
        match (&self.active_zone, self.task_in_progress) {
            (None, _) => Phase::Idle,
            (Some(_), false) => Phase::InZone,
            (Some(_), true) => Phase::Solving,
        }
    }

    fn set_zone(&mut self, zone: Option<String>) {
        self.active_zone = zone;
        self.task_in_progress = false;
    }
}

/// What an input did to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Entered { zone: String },
    /// Entered `to` while `from` was active.
    Switched { from: String, to: String },
    Started { zone: String },
    /// Left the active zone; `fallback` is the zone now active, if any.
    Exited { zone: String, fallback: Option<String> },
    /// Left an occupied zone that was not active.
    Vacated { zone: String },
    Ignored,
}

/// Per-player interaction state.
#[derive(Debug, Default)]
pub struct InteractionStateMachine {
    state: InteractionState,
    /// Occupied zones in entry order; the last one is active.
    occupied: Vec<String>,
}

impl InteractionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Applies a zone crossing. Zones that are not pickups in `registry` are ignored.
    pub fn on_zone_event(
        &mut self,
        event: ZoneEvent,
        registry: &EntityRegistry,
        ui: &mut dyn InteractionUi,
    ) -> Transition {
        match event {
            ZoneEvent::Enter(zone) => self.enter(zone, registry, ui),
            ZoneEvent::Exit(zone) => self.exit(zone, registry, ui),
        }
    }

    fn enter(&mut self, zone: String, registry: &EntityRegistry, ui: &mut dyn InteractionUi) -> Transition {
        let Some(pickup) = registry.pickup(&zone) else {
            debug!(zone = %zone, "Enter for unknown zone");
            return Transition::Ignored;
        };
        if self.occupied.contains(&zone) {
            return Transition::Ignored;
        }
        let anchor = pickup.position;

        let previous = self.state.active_zone.take();
        if let Some(prev) = &previous {
            ui.detach_label(prev);
            if self.state.task_in_progress {
                ui.task_removed();
            }
        }
        self.occupied.push(zone.clone());
        self.state.set_zone(Some(zone.clone()));
        ui.attach_label(&zone, anchor);
        info!(zone = %zone, "Entered solve area");

        match previous {
            Some(from) => Transition::Switched { from, to: zone },
            None => Transition::Entered { zone },
        }
    }

    fn exit(&mut self, zone: String, registry: &EntityRegistry, ui: &mut dyn InteractionUi) -> Transition {
        let Some(idx) = self.occupied.iter().position(|z| *z == zone) else {
            return Transition::Ignored;
        };
        self.occupied.remove(idx);

        if self.state.active_zone.as_deref() != Some(zone.as_str()) {
            return Transition::Vacated { zone };
        }

        ui.detach_label(&zone);
        ui.task_removed();
        let fallback = self.occupied.last().cloned();
        self.state.set_zone(fallback.clone());
        if let Some(next) = &fallback {
            if let Some(pickup) = registry.pickup(next) {
                ui.attach_label(next, pickup.position);
            }
        }
        info!(zone = %zone, fallback = ?fallback, "Left solve area");
        Transition::Exited { zone, fallback }
    }

    /// Task-start input. Only has an effect while in a zone and not already solving.
    pub fn task_start(&mut self, ui: &mut dyn InteractionUi) -> Transition {
        match (&self.state.active_zone, self.state.task_in_progress) {
            (Some(zone), false) => {
                let zone = zone.clone();
                self.state.task_in_progress = true;
                ui.task_started();
                info!(zone = %zone, "Task in progress");
                Transition::Started { zone }
            }
            _ => Transition::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use labyrinth_shared::level::PickupConfig;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingUi {
        calls: Vec<String>,
    }

    impl InteractionUi for RecordingUi {
        fn attach_label(&mut self, pickup: &str, _anchor: Vec3) {
            self.calls.push(format!("attach:{pickup}"));
        }

        fn detach_label(&mut self, pickup: &str) {
            self.calls.push(format!("detach:{pickup}"));
        }

        fn task_started(&mut self) {
            self.calls.push("started".to_string());
        }

        fn task_removed(&mut self) {
            self.calls.push("removed".to_string());
        }
    }

    fn registry() -> EntityRegistry {
        let mut reg = EntityRegistry::new(2.0);
        reg.init_pickups(&[
            PickupConfig {
                id: "P".to_string(),
                position: Vec3::new(1.0, 0.0, 0.0),
            },
            PickupConfig {
                id: "Q".to_string(),
                position: Vec3::new(2.0, 0.0, 0.0),
            },
        ])
        .unwrap();
        reg
    }

    #[test]
    fn enter_start_exit_start_sequence() {
        let reg = registry();
        let mut ui = RecordingUi::default();
        let mut sm = InteractionStateMachine::new();

        let mut phases = Vec::new();
        sm.on_zone_event(ZoneEvent::Enter("P".into()), &reg, &mut ui);
        phases.push(sm.phase());
        sm.task_start(&mut ui);
        phases.push(sm.phase());
        sm.on_zone_event(ZoneEvent::Exit("P".into()), &reg, &mut ui);
        phases.push(sm.phase());
        assert_eq!(sm.task_start(&mut ui), Transition::Ignored);
        phases.push(sm.phase());

        assert_eq!(phases, [Phase::InZone, Phase::Solving, Phase::Idle, Phase::Idle]);
        assert_eq!(ui.calls, ["attach:P", "started", "detach:P", "removed"]);
        assert!(!sm.state().task_in_progress());
    }

    #[test]
    fn task_start_while_idle_is_ignored() {
        let reg = registry();
        let mut ui = RecordingUi::default();
        let mut sm = InteractionStateMachine::new();
        assert_eq!(sm.task_start(&mut ui), Transition::Ignored);
        assert_eq!(sm.phase(), Phase::Idle);
        assert!(ui.calls.is_empty());

        // Unknown zones never activate.
        sm.on_zone_event(ZoneEvent::Enter("nope".into()), &reg, &mut ui);
        assert_eq!(sm.phase(), Phase::Idle);
    }

    #[test]
    fn repeated_start_does_not_signal_twice() {
        let reg = registry();
        let mut ui = RecordingUi::default();
        let mut sm = InteractionStateMachine::new();
        sm.on_zone_event(ZoneEvent::Enter("P".into()), &reg, &mut ui);
        sm.task_start(&mut ui);
        assert_eq!(sm.task_start(&mut ui), Transition::Ignored);
        assert_eq!(ui.calls.iter().filter(|c| *c == "started").count(), 1);
    }

    #[test]
    fn overlapping_zones_last_entered_wins_and_falls_back() {
        let reg = registry();
        let mut ui = RecordingUi::default();
        let mut sm = InteractionStateMachine::new();

        sm.on_zone_event(ZoneEvent::Enter("P".into()), &reg, &mut ui);
        sm.task_start(&mut ui);
        let t = sm.on_zone_event(ZoneEvent::Enter("Q".into()), &reg, &mut ui);
        assert_eq!(
            t,
            Transition::Switched {
                from: "P".into(),
                to: "Q".into()
            }
        );
        // Switching cancels the running task.
        assert_eq!(sm.phase(), Phase::InZone);
        assert_eq!(sm.state().active_zone(), Some("Q"));

        let t = sm.on_zone_event(ZoneEvent::Exit("Q".into()), &reg, &mut ui);
        assert_eq!(
            t,
            Transition::Exited {
                zone: "Q".into(),
                fallback: Some("P".into())
            }
        );
        assert_eq!(sm.state().active_zone(), Some("P"));

        let t = sm.on_zone_event(ZoneEvent::Exit("P".into()), &reg, &mut ui);
        assert_eq!(
            t,
            Transition::Exited {
                zone: "P".into(),
                fallback: None
            }
        );
        assert_eq!(sm.phase(), Phase::Idle);
        assert_eq!(
            ui.calls,
            [
                "attach:P", "started", "detach:P", "removed", "attach:Q", "detach:Q", "removed",
                "attach:P", "detach:P", "removed",
            ]
        );
    }

    #[test]
    fn leaving_inactive_zone_keeps_active_one() {
        let reg = registry();
        let mut ui = RecordingUi::default();
        let mut sm = InteractionStateMachine::new();
        sm.on_zone_event(ZoneEvent::Enter("P".into()), &reg, &mut ui);
        sm.on_zone_event(ZoneEvent::Enter("Q".into()), &reg, &mut ui);
        sm.task_start(&mut ui);

        let t = sm.on_zone_event(ZoneEvent::Exit("P".into()), &reg, &mut ui);
        assert_eq!(t, Transition::Vacated { zone: "P".into() });
        assert_eq!(sm.phase(), Phase::Solving);

        // Exit for a zone we are not in.
        assert_eq!(
            sm.on_zone_event(ZoneEvent::Exit("P".into()), &reg, &mut ui),
            Transition::Ignored
        );
    }
}
