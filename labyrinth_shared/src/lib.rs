//! `labyrinth_shared`
//!
//! Types used by both the game client and the room server.
//!
//! Design goals:
//! - Plain data with serde derives; no rendering or physics types leak in.
//! - One wire protocol definition shared by both ends.
//! - No `unsafe`.

pub mod config;
pub mod level;
pub mod math;
pub mod net;

