//! Session routing.
//!
//! The router owns the room connection. It never touches entities: inbound
//! server messages are translated into [`RegistryEvent`]s for the caller to
//! apply, and outbound traffic is limited to fire-and-forget position sends.
//!
//! Connection lifecycle: absent -> `Connecting` -> `Open` -> `Closed`.
//! `Closed` is terminal; once there, inbound messages are suppressed and
//! sends are dropped.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info, warn};

use labyrinth_shared::{
    level::LevelConfig,
    math::Vec3,
    net::{ClientMsg, FramedConn, ServerMsg, PROTOCOL_VERSION},
};

use crate::registry::RegistryEvent;

/// Inbound queue depth between the socket reader task and the loop.
const INBOUND_QUEUE: usize = 256;

/// Connection state of the room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Identity of the joined session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: String,
    pub state: ConnectionState,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("failed to join room {room}: {reason}")]
    ConnectFailure { room: String, reason: String },
    #[error("session already {0:?}")]
    AlreadyConnected(ConnectionState),
    #[error("session closed: {0}")]
    Disconnected(String),
}

/// A joined room as handed over by a transport.
#[derive(Debug)]
pub struct RoomLink {
    pub session_id: String,
    pub level: LevelConfig,
    pub inbound: mpsc::Receiver<ServerMsg>,
    pub outbound: mpsc::Sender<ClientMsg>,
}

/// Room-based connection provider.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Joins `room`; resolves once the server acknowledged the join.
    async fn join(&self, room: &str, name: &str, outbound_capacity: usize) -> anyhow::Result<RoomLink>;
}

/// Transport over a framed TCP connection to the room server.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn parse(addr: &str) -> anyhow::Result<Self> {
        Ok(Self::new(addr.parse().context("parse server_addr")?))
    }
}

#[async_trait]
impl SessionTransport for TcpTransport {
    async fn join(&self, room: &str, name: &str, outbound_capacity: usize) -> anyhow::Result<RoomLink> {
        info!(server = %self.addr, room = %room, "Connecting to room server");
        let mut conn = FramedConn::connect(self.addr).await?;
        conn.send(&ClientMsg::JoinRoom {
            protocol: PROTOCOL_VERSION,
            room: room.to_string(),
            name: name.to_string(),
        })
        .await?;

        let (session_id, level) = match conn.recv::<ServerMsg>().await? {
            Some(ServerMsg::Joined { session_id, level }) => (session_id, level),
            Some(ServerMsg::Rejected { reason }) => anyhow::bail!("rejected: {reason}"),
            Some(other) => anyhow::bail!("expected Joined, got {other:?}"),
            None => anyhow::bail!("server closed during join"),
        };

        let (mut reader, mut writer) = conn.into_split();
        let (in_tx, in_rx) = mpsc::channel(INBOUND_QUEUE);
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMsg>(outbound_capacity.max(1));

        tokio::spawn(async move {
            loop {
                match reader.recv::<ServerMsg>().await {
                    Ok(Some(msg)) => {
                        if in_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Room server closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Room connection read error");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let leaving = msg == ClientMsg::Leave;
                if let Err(e) = writer.send(&msg).await {
                    debug!(error = %e, "Dropping outbound after write error");
                    break;
                }
                if leaving {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        Ok(RoomLink {
            session_id,
            level,
            inbound: in_rx,
            outbound: out_tx,
        })
    }
}

/// Result of a successful [`SessionRouter::connect`].
#[derive(Debug, Clone)]
pub struct Welcome {
    pub handle: SessionHandle,
    pub level: LevelConfig,
}

/// What the loop gets from the router.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Event(RegistryEvent),
    /// Message with no registry meaning.
    Ignored,
    /// The session just closed. Reported once.
    Closed(SessionError),
}

/// Outcome of a fire-and-forget send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
}

/// Owns the room connection and translates its traffic.
#[derive(Debug)]
pub struct SessionRouter {
    state: Option<ConnectionState>,
    session_id: Option<String>,
    inbound: Option<mpsc::Receiver<ServerMsg>>,
    outbound: Option<mpsc::Sender<ClientMsg>>,
    /// Close noticed outside `next_update`, waiting to be reported.
    unreported_close: Option<SessionError>,
    outbound_capacity: usize,
    connect_timeout: Duration,
}

impl SessionRouter {
    pub fn new(outbound_capacity: usize, connect_timeout: Duration) -> Self {
        Self {
            state: None,
            session_id: None,
            inbound: None,
            outbound: None,
            unreported_close: None,
            outbound_capacity,
            connect_timeout,
        }
    }

    /// Joins a room. Never reaches `Open` on failure.
    pub async fn connect(
        &mut self,
        transport: &dyn SessionTransport,
        owner: &str,
        room_name: &str,
    ) -> Result<Welcome, SessionError> {
        if let Some(state @ (ConnectionState::Connecting | ConnectionState::Open)) = self.state {
            return Err(SessionError::AlreadyConnected(state));
        }
        self.state = Some(ConnectionState::Connecting);
        info!(room = %room_name, owner = %owner, "Joining room");

        let joined = tokio::time::timeout(
            self.connect_timeout,
            transport.join(room_name, owner, self.outbound_capacity),
        )
        .await;
        let link = match joined {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => return Err(self.fail_connect(room_name, format!("{e:#}"))),
            Err(_) => {
                let reason = format!("no answer within {:?}", self.connect_timeout);
                return Err(self.fail_connect(room_name, reason));
            }
        };

        self.state = Some(ConnectionState::Open);
        self.session_id = Some(link.session_id.clone());
        self.inbound = Some(link.inbound);
        self.outbound = Some(link.outbound);
        info!(session_id = %link.session_id, room = %room_name, "Session open");

        Ok(Welcome {
            handle: SessionHandle {
                session_id: link.session_id,
                state: ConnectionState::Open,
            },
            level: link.level,
        })
    }

    fn fail_connect(&mut self, room: &str, reason: String) -> SessionError {
        warn!(room = %room, %reason, "Join failed");
        self.state = Some(ConnectionState::Closed);
        SessionError::ConnectFailure {
            room: room.to_string(),
            reason,
        }
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == Some(ConnectionState::Open)
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        let (state, session_id) = (self.state?, self.session_id.clone()?);
        Some(SessionHandle { session_id, state })
    }

    fn close(&mut self, reason: &str) -> SessionError {
        if self.state != Some(ConnectionState::Closed) {
            info!(reason = %reason, "Session closed");
        }
        self.state = Some(ConnectionState::Closed);
        self.inbound = None;
        self.outbound = None;
        SessionError::Disconnected(reason.to_string())
    }

    fn translate(&mut self, msg: ServerMsg) -> SessionUpdate {
        match msg {
            ServerMsg::PlayerJoined { id, position } => {
                SessionUpdate::Event(RegistryEvent::Joined { id, position })
            }
            ServerMsg::PlayerMoved { id, position } => {
                SessionUpdate::Event(RegistryEvent::Moved { id, position })
            }
            ServerMsg::PlayerLeft { id } => SessionUpdate::Event(RegistryEvent::Left { id }),
            ServerMsg::Rejected { reason } => SessionUpdate::Closed(self.close(&reason)),
            ServerMsg::Joined { session_id, .. } => {
                debug!(session_id = %session_id, "Duplicate join acknowledgement");
                SessionUpdate::Ignored
            }
        }
    }

    /// Waits for the next inbound message. Never resolves once the close has
    /// been reported.
    pub async fn next_update(&mut self) -> SessionUpdate {
        if let Some(err) = self.unreported_close.take() {
            return SessionUpdate::Closed(err);
        }
        let Some(inbound) = self.inbound.as_mut() else {
            return std::future::pending().await;
        };
        match inbound.recv().await {
            Some(msg) => self.translate(msg),
            None => SessionUpdate::Closed(self.close("connection lost")),
        }
    }

    /// Takes whatever is queued without waiting.
    pub fn drain_inbound(&mut self) -> Vec<SessionUpdate> {
        let mut out = Vec::new();
        if let Some(err) = self.unreported_close.take() {
            out.push(SessionUpdate::Closed(err));
        }
        while let Some(inbound) = self.inbound.as_mut() {
            match inbound.try_recv() {
                Ok(msg) => out.push(self.translate(msg)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    out.push(SessionUpdate::Closed(self.close("connection lost")));
                }
            }
        }
        out
    }

    /// Queues the local position. Best effort: no ack, no retry, dropped when
    /// the queue is full or the session is not open.
    pub fn send_player_position(&mut self, position: Vec3) -> SendOutcome {
        let Some(outbound) = self.outbound.as_ref() else {
            return SendOutcome::Dropped;
        };
        match outbound.try_send(ClientMsg::Move { position }) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full, position dropped");
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                let err = self.close("outbound channel closed");
                self.unreported_close = Some(err);
                SendOutcome::Dropped
            }
        }
    }

    /// Leaves the room. Best effort; the session is closed either way.
    pub fn leave(&mut self) {
        if let Some(outbound) = self.outbound.as_ref() {
            if outbound.try_send(ClientMsg::Leave).is_err() {
                debug!("Leave message dropped");
            }
        }
        self.close("left room");
        self.unreported_close = None;
    }
}
