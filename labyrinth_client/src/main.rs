//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p labyrinth_client -- [--config client.json] [--addr 127.0.0.1:40000]
//!       [--room game] [--name Player] [--assets assets] [--builtin-assets] [--wander]
//!
//! The client loads its prefab assets, joins the room, builds the level and
//! ticks until the session ends. Rendering is headless; label and task
//! signals are logged.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use labyrinth_client::{
    assets::{AssetSource, DirAssetSource, MemoryAssetSource},
    client::GameClient,
    input::{IdleInput, InputFrame, InputSource, ScriptedInput},
    interaction::TracingUi,
    scene::HeadlessScene,
    session::TcpTransport,
};
use labyrinth_shared::{config::ClientConfig, math::Vec3};
use tracing::info;

struct Args {
    cfg: ClientConfig,
    builtin_assets: bool,
    wander: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // A config file, if given, is the base the other flags override.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::load(&args[i + 1])?,
        _ => ClientConfig::default(),
    };
    let mut builtin_assets = false;
    let mut wander = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--room" if i + 1 < args.len() => {
                cfg.room_name = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--assets" if i + 1 < args.len() => {
                cfg.assets_dir = args[i + 1].clone();
                i += 2;
            }
            "--builtin-assets" => {
                builtin_assets = true;
                i += 1;
            }
            "--wander" => {
                wander = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(Args {
        cfg,
        builtin_assets,
        wander,
    })
}

/// Walks a loop through the sample level, pressing the task key along the way.
fn wander_script() -> ScriptedInput {
    let mut frames = Vec::new();
    for _ in 0..150 {
        frames.push(InputFrame::moving(Vec3::new(0.0, 0.0, 1.0)));
    }
    frames.push(InputFrame::release(labyrinth_client::input::InputButtons::TASK));
    for _ in 0..150 {
        frames.push(InputFrame::moving(Vec3::new(0.0, 0.0, -1.0)));
    }
    ScriptedInput::new(frames)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args {
        cfg,
        builtin_assets,
        wander,
    } = parse_args().context("parse args")?;
    info!(server = %cfg.server_addr, room = %cfg.room_name, assets = %cfg.assets_dir, "Starting client");

    let source: Arc<dyn AssetSource> = if builtin_assets {
        Arc::new(MemoryAssetSource::standard())
    } else {
        Arc::new(DirAssetSource::new(&cfg.assets_dir))
    };
    let transport = TcpTransport::parse(&cfg.server_addr)?;
    let mut input: Box<dyn InputSource> = if wander {
        Box::new(wander_script())
    } else {
        Box::new(IdleInput)
    };

    let mut client = GameClient::new(cfg, source, HeadlessScene::default(), TracingUi);
    client.run(&transport, input.as_mut()).await?;

    for line in client.status() {
        println!("{}", line);
    }
    Ok(())
}
