//! Room server: accepts framed TCP connections, performs the join handshake,
//! and bridges each connection to its room task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use labyrinth_shared::config::{ClientConfig, ServerConfig};
use labyrinth_shared::level::LevelConfig;
use labyrinth_shared::math::Vec3;
use labyrinth_shared::net::{ClientMsg, FrameListener, FramedConn, ServerMsg, PROTOCOL_VERSION};

use crate::room::{Room, RoomCommand};

/// Per-connection outbound queue depth.
const CLIENT_QUEUE: usize = 64;

/// Join attempts before giving up on a room that keeps closing underneath us.
const JOIN_ATTEMPTS: usize = 3;

/// Rooms by name. A room is opened on first join and dropped once its task
/// has ended.
#[derive(Clone)]
pub struct RoomDirectory {
    level: LevelConfig,
    max_players: usize,
    rooms: Arc<Mutex<HashMap<String, mpsc::Sender<RoomCommand>>>>,
}

impl RoomDirectory {
    pub fn new(level: LevelConfig, max_players: usize) -> Self {
        Self {
            level,
            max_players,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Command channel for `name`, opening the room if needed.
    pub fn room(&self, name: &str) -> anyhow::Result<mpsc::Sender<RoomCommand>> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| anyhow!("room directory poisoned"))?;
        rooms.retain(|_, tx| !tx.is_closed());
        if let Some(tx) = rooms.get(name) {
            return Ok(tx.clone());
        }
        let tx = Room::new(name, self.level.clone(), self.max_players).spawn();
        rooms.insert(name.to_string(), tx.clone());
        Ok(tx)
    }

    /// Rooms whose task is still running.
    pub fn room_count(&self) -> usize {
        self.rooms
            .lock()
            .map(|r| r.values().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Members of `name` with their last known positions. Empty for unknown
    /// or closed rooms.
    pub async fn members(&self, name: &str) -> anyhow::Result<Vec<(String, Vec3)>> {
        let tx = {
            let rooms = self
                .rooms
                .lock()
                .map_err(|_| anyhow!("room directory poisoned"))?;
            match rooms.get(name) {
                Some(tx) => tx.clone(),
                None => return Ok(Vec::new()),
            }
        };
        let (reply, rx) = oneshot::channel();
        if tx.send(RoomCommand::Snapshot { reply }).await.is_err() {
            return Ok(Vec::new());
        }
        Ok(rx.await.unwrap_or_default())
    }

    /// Joins `room_name`, reopening the room if it closed between lookup and join.
    async fn join(
        &self,
        room_name: &str,
        name: &str,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> anyhow::Result<(mpsc::Sender<RoomCommand>, Result<String, String>)> {
        for _ in 0..JOIN_ATTEMPTS {
            let room = self.room(room_name)?;
            let (reply, joined) = oneshot::channel();
            let cmd = RoomCommand::Join {
                name: name.to_string(),
                outbox: outbox.clone(),
                reply,
            };
            if room.send(cmd).await.is_err() {
                continue;
            }
            match joined.await {
                Ok(result) => return Ok((room, result)),
                Err(_) => debug!(room = %room_name, "Room closed during join, retrying"),
            }
        }
        Err(anyhow!("room {room_name} unavailable"))
    }
}

pub struct RoomServer {
    cfg: ServerConfig,
    listener: FrameListener,
    directory: RoomDirectory,
}

impl RoomServer {
    /// Binds the listener and loads the level served to joining clients.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let level = match &cfg.level_path {
            Some(path) => LevelConfig::load(path).with_context(|| format!("load level {path}"))?,
            None => LevelConfig::sample(),
        };
        let addr: SocketAddr = cfg
            .listen_addr
            .parse()
            .with_context(|| format!("parse listen addr {}", cfg.listen_addr))?;
        let listener = FrameListener::bind(addr).await?;
        info!(
            corridors = level.corridors.len(),
            pickups = level.pickups.len(),
            "Level ready"
        );
        let directory = RoomDirectory::new(level, cfg.max_players);
        Ok(Self {
            cfg,
            listener,
            directory,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Accepts one connection and hands it to its own task.
    pub async fn accept_one(&self) -> anyhow::Result<SocketAddr> {
        let (conn, peer) = self.listener.accept().await?;
        debug!(%peer, "Connection accepted");
        let directory = self.directory.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(conn, directory).await {
                warn!(%peer, error = %e, "Connection ended with error");
            }
        });
        Ok(peer)
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            self.accept_one().await?;
        }
    }
}

async fn handle_connection(mut conn: FramedConn, directory: RoomDirectory) -> anyhow::Result<()> {
    let Some(first) = conn.recv::<ClientMsg>().await? else {
        return Ok(());
    };
    let (room_name, name) = match first {
        ClientMsg::JoinRoom {
            protocol,
            room,
            name,
        } => {
            if protocol != PROTOCOL_VERSION {
                let reason = format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}");
                conn.send(&ServerMsg::Rejected { reason }).await?;
                return Ok(());
            }
            (room, name)
        }
        other => {
            conn.send(&ServerMsg::Rejected {
                reason: "expected JoinRoom".to_string(),
            })
            .await?;
            return Err(anyhow!("unexpected first message {other:?}"));
        }
    };

    let (outbox, mut outbox_rx) = mpsc::channel::<ServerMsg>(CLIENT_QUEUE);
    let (room, joined) = directory.join(&room_name, &name, outbox).await?;

    let session_id = match joined {
        Ok(id) => id,
        Err(reason) => {
            conn.send(&ServerMsg::Rejected { reason }).await?;
            return Ok(());
        }
    };

    let (mut reader, mut writer) = conn.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if writer.send(&msg).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let result = loop {
        match reader.recv::<ClientMsg>().await {
            Ok(Some(ClientMsg::Move { position })) => {
                let cmd = RoomCommand::Move {
                    session_id: session_id.clone(),
                    position,
                };
                if room.send(cmd).await.is_err() {
                    break Ok(());
                }
            }
            Ok(Some(ClientMsg::Leave)) | Ok(None) => break Ok(()),
            Ok(Some(ClientMsg::JoinRoom { .. })) => {
                debug!(session_id = %session_id, "Duplicate JoinRoom ignored");
            }
            Err(e) => break Err(e),
        }
    };

    let _ = room
        .send(RoomCommand::Leave {
            session_id: session_id.clone(),
        })
        .await;
    // Room drops the outbox on leave, which ends the writer.
    let _ = writer_task.await;
    info!(session_id = %session_id, room = %room_name, "Connection closed");
    result
}

/// Binds on an ephemeral localhost port with the built-in level and returns a
/// client config pointing at it.
pub async fn bind_ephemeral() -> anyhow::Result<(RoomServer, ClientConfig)> {
    let cfg = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let server = RoomServer::bind(cfg).await?;
    let client_cfg = ClientConfig {
        server_addr: server.local_addr()?.to_string(),
        ..ClientConfig::default()
    };
    Ok((server, client_cfg))
}
