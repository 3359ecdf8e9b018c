//! Standalone room server.
//!
//! Usage:
//!   cargo run -p labyrinth_server -- [--addr 127.0.0.1:40000] [--level level.json] [--max-players 16]
//!
//! Clients join a room by name; rooms are opened on first join.

use std::env;

use anyhow::Context;
use labyrinth_server::RoomServer;
use labyrinth_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--level" if i + 1 < args.len() => {
                cfg.level_path = Some(args[i + 1].clone());
                i += 2;
            }
            "--max-players" if i + 1 < args.len() => {
                cfg.max_players = args[i + 1].parse().unwrap_or(cfg.max_players);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.listen_addr, max_players = cfg.max_players, level = ?cfg.level_path, "Starting server");

    let server = RoomServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    tokio::select! {
        res = server.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
