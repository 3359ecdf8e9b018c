//! Input handling.
//!
//! A frame of input is a movement wish plus the buttons released since the
//! previous frame. Releases, not presses, trigger actions (the task key acts
//! on key-up).

use std::collections::VecDeque;

use labyrinth_shared::math::Vec3;

bitflags::bitflags! {
    /// Buttons released during a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InputButtons: u8 {
        /// Start the task at the current pickup (space).
        const TASK = 1 << 0;
        /// Leave the session.
        const QUIT = 1 << 1;
    }
}

impl Default for InputButtons {
    fn default() -> Self {
        Self::empty()
    }
}

/// User input sampled for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputFrame {
    /// Movement direction in world space; x/z are horizontal.
    pub wish: Vec3,
    pub released: InputButtons,
}

impl InputFrame {
    pub fn moving(wish: Vec3) -> Self {
        Self {
            wish,
            released: InputButtons::empty(),
        }
    }

    pub fn release(buttons: InputButtons) -> Self {
        Self {
            wish: Vec3::ZERO,
            released: buttons,
        }
    }
}

/// Per-frame input provider.
pub trait InputSource: Send {
    fn sample(&mut self) -> InputFrame;
}

/// No input at all.
#[derive(Debug, Default)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn sample(&mut self) -> InputFrame {
        InputFrame::default()
    }
}

/// Replays a fixed list of frames, then idles.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    frames: VecDeque<InputFrame>,
}

impl ScriptedInput {
    pub fn new(frames: impl IntoIterator<Item = InputFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self) -> InputFrame {
        self.frames.pop_front().unwrap_or_default()
    }
}
