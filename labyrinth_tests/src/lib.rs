//! Shared harness for the integration tests: a background room server, a
//! headless client, and a raw socket player for driving the other side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use labyrinth_client::assets::MemoryAssetSource;
use labyrinth_client::interaction::TracingUi;
use labyrinth_client::scene::HeadlessScene;
use labyrinth_client::GameClient;
use labyrinth_server::server::{bind_ephemeral, RoomDirectory};
use labyrinth_shared::config::ClientConfig;
use labyrinth_shared::math::Vec3;
use labyrinth_shared::net::{ClientMsg, FramedConn, ServerMsg, PROTOCOL_VERSION};

pub type HeadlessClient = GameClient<HeadlessScene, TracingUi>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Starts a server on an ephemeral port in the background.
pub async fn spawn_server() -> anyhow::Result<(RoomDirectory, ClientConfig)> {
    let (server, cfg) = bind_ephemeral().await?;
    let directory = server.directory().clone();
    tokio::spawn(server.run());
    Ok((directory, cfg))
}

/// A client backed by the in-memory standard assets.
pub fn headless_client(cfg: ClientConfig) -> HeadlessClient {
    GameClient::new(
        cfg,
        Arc::new(MemoryAssetSource::standard()),
        HeadlessScene::default(),
        TracingUi,
    )
}

/// Applies session updates until `done` holds or `limit` runs out.
pub async fn pump_until(
    client: &mut HeadlessClient,
    limit: Duration,
    mut done: impl FnMut(&HeadlessClient) -> bool,
) -> anyhow::Result<()> {
    tokio::time::timeout(limit, async {
        while !done(&*client) {
            let update = client.next_session_update().await;
            client.handle_session_update(update);
        }
    })
    .await
    .context("condition not reached in time")
}

/// A player speaking the wire protocol directly.
pub struct RawPlayer {
    pub session_id: String,
    conn: FramedConn,
}

impl RawPlayer {
    pub async fn join(addr: &str, room: &str, name: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = addr.parse()?;
        let mut conn = FramedConn::connect(addr).await?;
        conn.send(&ClientMsg::JoinRoom {
            protocol: PROTOCOL_VERSION,
            room: room.to_string(),
            name: name.to_string(),
        })
        .await?;
        match conn.recv::<ServerMsg>().await? {
            Some(ServerMsg::Joined { session_id, .. }) => Ok(Self { session_id, conn }),
            other => anyhow::bail!("expected Joined, got {other:?}"),
        }
    }

    pub async fn move_to(&mut self, position: Vec3) -> anyhow::Result<()> {
        self.conn.send(&ClientMsg::Move { position }).await
    }

    pub async fn leave(mut self) -> anyhow::Result<()> {
        self.conn.send(&ClientMsg::Leave).await
    }

    /// Next message, or `None` if nothing arrives within `limit`.
    pub async fn recv_within(&mut self, limit: Duration) -> anyhow::Result<Option<ServerMsg>> {
        match tokio::time::timeout(limit, self.conn.recv::<ServerMsg>()).await {
            Ok(msg) => msg,
            Err(_) => Ok(None),
        }
    }
}
