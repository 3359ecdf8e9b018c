//! `labyrinth_server`
//!
//! Server-side systems:
//! - Room directory (rooms are created on first join)
//! - One task per room owning its members and their last positions
//! - One reader and one writer task per connection
//!
//! Networking model:
//! - TCP, one framed connection per client; join handshake, then moves
//!   upstream and join/move/leave fan-out downstream.

pub mod room;
pub mod server;

pub use server::RoomServer;
