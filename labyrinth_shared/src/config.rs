//! Configuration system.
//!
//! Client and server configuration, loaded from JSON strings or files.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Room server address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Room to join.
    #[serde(default = "default_room_name")]
    pub room_name: String,
    /// Display name sent on join.
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Frame tick rate.
    pub tick_hz: u32,
    /// Directory holding mesh collections.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    /// Height forced onto server-echoed local player positions.
    #[serde(default = "default_player_height")]
    pub player_height: f32,
    /// Local movement speed in units per second.
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    /// How long to wait for the room server to acknowledge a join.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Capacity of the outbound position queue; sends beyond it are dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_room_name() -> String {
    "game".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_player_height() -> f32 {
    2.0
}

fn default_move_speed() -> f32 {
    4.0
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_outbound_queue() -> usize {
    8
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            room_name: default_room_name(),
            player_name: default_player_name(),
            tick_hz: 60,
            assets_dir: default_assets_dir(),
            player_height: default_player_height(),
            move_speed: default_move_speed(),
            connect_timeout_ms: default_connect_timeout_ms(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Duration of one frame tick.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f32(1.0 / self.tick_hz.max(1) as f32)
    }
}

/// Room server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:40000`.
    pub listen_addr: String,
    /// Level file served to joining clients. The built-in level is used when unset.
    #[serde(default)]
    pub level_path: Option<String>,
    /// Maximum players per room.
    #[serde(default = "default_max_players")]
    pub max_players: usize,
}

fn default_max_players() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:40000".to_string(),
            level_path: None,
            max_players: default_max_players(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_fills_defaults() {
        let cfg =
            ClientConfig::from_json_str(r#"{"server_addr":"10.0.0.1:4000","tick_hz":30}"#).unwrap();
        assert_eq!(cfg.room_name, "game");
        assert_eq!(cfg.player_height, 2.0);
        assert_eq!(cfg.outbound_queue, 8);
        assert_eq!(cfg.tick_interval(), std::time::Duration::from_secs_f32(1.0 / 30.0));
    }

    #[test]
    fn server_config_without_level_uses_builtin() {
        let cfg = ServerConfig::from_json_str(r#"{"listen_addr":"0.0.0.0:1"}"#).unwrap();
        assert!(cfg.level_path.is_none());
        assert_eq!(cfg.max_players, 16);
    }
}
