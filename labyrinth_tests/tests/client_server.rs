//! Socket-level tests: a headless client against a live room server.

use std::time::Duration;

use labyrinth_client::client::ClientPhase;
use labyrinth_client::input::{InputButtons, InputFrame, ScriptedInput};
use labyrinth_client::scene::{SceneKey, SceneKind};
use labyrinth_client::session::TcpTransport;
use labyrinth_shared::level::LevelConfig;
use labyrinth_shared::math::Vec3;
use labyrinth_shared::net::ServerMsg;
use labyrinth_tests::{headless_client, init_tracing, pump_until, spawn_server, RawPlayer};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rival_joins_moves_and_leaves() -> anyhow::Result<()> {
    init_tracing();
    let (_directory, cfg) = spawn_server().await?;
    let transport = TcpTransport::parse(&cfg.server_addr)?;

    let mut client = headless_client(cfg.clone());
    client.issue_standard_assets()?;
    client.load_assets().await?;
    client.connect(&transport).await?;
    assert_eq!(client.phase, ClientPhase::Running);

    let spawn = LevelConfig::sample().spawn_point;
    assert_eq!(client.player_position(), Some(spawn));
    assert_eq!(client.registry().pickup_count(), 2);

    // The server echoes our own join; it must not turn into a rival.
    let own_id = client.registry().player().map(|p| p.id.clone());
    pump_until(&mut client, WAIT, |c| {
        c.player_position() == Some(spawn.with_y(c.cfg.player_height))
    })
    .await?;
    assert_eq!(client.registry().rival_count(), 0);

    let mut bob = RawPlayer::join(&cfg.server_addr, &cfg.room_name, "bob").await?;
    assert_ne!(Some(bob.session_id.clone()), own_id);
    let bob_id = bob.session_id.clone();
    pump_until(&mut client, WAIT, |c| c.registry().rival(&bob_id).is_some()).await?;
    assert_eq!(
        client.scene().position(&SceneKey::new(SceneKind::Rival, &bob_id)),
        Some(spawn)
    );

    let target = Vec3::new(4.0, 0.0, -2.0);
    bob.move_to(target).await?;
    pump_until(&mut client, WAIT, |c| {
        c.registry().rival(&bob_id).map(|r| r.position) == Some(target)
    })
    .await?;
    assert_eq!(
        client.scene().position(&SceneKey::new(SceneKind::Rival, &bob_id)),
        Some(target)
    );

    bob.leave().await?;
    pump_until(&mut client, WAIT, |c| c.registry().rival_count() == 0).await?;
    assert_eq!(client.scene().count(SceneKind::Rival), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_players_are_announced_to_newcomer() -> anyhow::Result<()> {
    init_tracing();
    let (_directory, cfg) = spawn_server().await?;

    let alice = RawPlayer::join(&cfg.server_addr, &cfg.room_name, "alice").await?;

    let mut client = headless_client(cfg.clone());
    client.issue_standard_assets()?;
    client.load_assets().await?;
    client.connect(&TcpTransport::parse(&cfg.server_addr)?).await?;

    let alice_id = alice.session_id.clone();
    pump_until(&mut client, WAIT, |c| c.registry().rival(&alice_id).is_some()).await?;
    assert_eq!(client.registry().rival_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_positions_reach_other_players() -> anyhow::Result<()> {
    init_tracing();
    let (_directory, cfg) = spawn_server().await?;

    let mut client = headless_client(cfg.clone());
    client.issue_standard_assets()?;
    client.load_assets().await?;
    client.connect(&TcpTransport::parse(&cfg.server_addr)?).await?;
    let client_id = client
        .router()
        .handle()
        .map(|h| h.session_id)
        .ok_or_else(|| anyhow::anyhow!("no session"))?;

    let mut watcher = RawPlayer::join(&cfg.server_addr, &cfg.room_name, "watcher").await?;
    client.tick(InputFrame::moving(Vec3::new(1.0, 0.0, 0.0)))?;

    let moved = tokio::time::timeout(WAIT, async {
        loop {
            match watcher.recv_within(WAIT).await? {
                Some(ServerMsg::PlayerMoved { id, position }) if id == client_id => {
                    return anyhow::Ok(position)
                }
                Some(_) => continue,
                None => anyhow::bail!("connection went quiet"),
            }
        }
    })
    .await??;
    assert!(moved.x > 0.0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripted_run_ends_with_leave() -> anyhow::Result<()> {
    init_tracing();
    let (directory, mut cfg) = spawn_server().await?;
    cfg.tick_hz = 120;
    let transport = TcpTransport::parse(&cfg.server_addr)?;

    let mut frames: Vec<InputFrame> = (0..20)
        .map(|_| InputFrame::moving(Vec3::new(0.0, 0.0, 1.0)))
        .collect();
    frames.push(InputFrame::release(InputButtons::QUIT));
    let mut input = ScriptedInput::new(frames);

    let mut client = headless_client(cfg.clone());
    tokio::time::timeout(WAIT, client.run(&transport, &mut input)).await??;

    assert_eq!(client.phase, ClientPhase::Stopped);
    assert_eq!(input.remaining(), 0);
    assert!(client.tick_count() >= 20);
    let z = client.player_position().map(|p| p.z).unwrap_or_default();
    assert!(z > 0.0, "player should have walked forward, z = {z}");

    // The server drops the member once the leave arrives.
    tokio::time::timeout(WAIT, async {
        while !directory.members(&cfg.room_name).await?.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::Ok(())
    })
    .await??;
    Ok(())
}
