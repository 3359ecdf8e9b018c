//! Room state.
//!
//! A room is owned by a single task fed through an mpsc channel, so member
//! bookkeeping needs no locking. Fan-out to members uses `try_send`: a member
//! whose queue is full misses that message rather than stalling the room.
//! The task ends when the last member leaves; commands still queued at that
//! point are dropped, which callers see as a closed room.

use std::collections::BTreeMap;

use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use labyrinth_shared::{level::LevelConfig, math::Vec3, net::ServerMsg};

/// Length of generated session ids.
pub const SESSION_ID_LEN: usize = 9;

/// Commands accepted by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        name: String,
        outbox: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<String, String>>,
    },
    Move {
        session_id: String,
        position: Vec3,
    },
    Leave {
        session_id: String,
    },
    /// Current members and positions, for status output and tests.
    Snapshot {
        reply: oneshot::Sender<Vec<(String, Vec3)>>,
    },
}

struct Member {
    name: String,
    position: Vec3,
    outbox: mpsc::Sender<ServerMsg>,
}

/// State of one room.
pub struct Room {
    name: String,
    level: LevelConfig,
    max_players: usize,
    members: BTreeMap<String, Member>,
}

fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

impl Room {
    pub fn new(name: &str, level: LevelConfig, max_players: usize) -> Self {
        Self {
            name: name.to_string(),
            level,
            max_players,
            members: BTreeMap::new(),
        }
    }

    /// Spawns the room task and returns its command channel.
    pub fn spawn(self) -> mpsc::Sender<RoomCommand> {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        info!(room = %self.name, "Room opened");
        while let Some(cmd) = rx.recv().await {
            let leave = matches!(cmd, RoomCommand::Leave { .. });
            self.handle(cmd);
            if leave && self.members.is_empty() {
                break;
            }
        }
        info!(room = %self.name, "Room closed");
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                name,
                outbox,
                reply,
            } => {
                let result = self.join(name, outbox);
                let _ = reply.send(result);
            }
            RoomCommand::Move {
                session_id,
                position,
            } => self.moved(&session_id, position),
            RoomCommand::Leave { session_id } => self.leave(&session_id),
            RoomCommand::Snapshot { reply } => {
                let members = self
                    .members
                    .iter()
                    .map(|(id, m)| (id.clone(), m.position))
                    .collect();
                let _ = reply.send(members);
            }
        }
    }

    /// Admits a member. The newcomer's outbox receives, in order: `Joined`,
    /// one `PlayerJoined` per present member, then its own `PlayerJoined`.
    fn join(&mut self, name: String, outbox: mpsc::Sender<ServerMsg>) -> Result<String, String> {
        if self.members.len() >= self.max_players {
            warn!(room = %self.name, name = %name, "Room full");
            return Err(format!("room {} is full", self.name));
        }
        let session_id = loop {
            let id = new_session_id();
            if !self.members.contains_key(&id) {
                break id;
            }
        };

        let welcome = ServerMsg::Joined {
            session_id: session_id.clone(),
            level: self.level.clone(),
        };
        if outbox.try_send(welcome).is_err() {
            return Err("client queue unavailable".to_string());
        }
        for (id, member) in &self.members {
            let _ = outbox.try_send(ServerMsg::PlayerJoined {
                id: id.clone(),
                position: member.position,
            });
        }

        let position = self.level.spawn_point;
        self.members.insert(
            session_id.clone(),
            Member {
                name: name.clone(),
                position,
                outbox,
            },
        );
        self.broadcast(ServerMsg::PlayerJoined {
            id: session_id.clone(),
            position,
        });
        info!(room = %self.name, session_id = %session_id, name = %name, members = self.members.len(), "Player joined");
        Ok(session_id)
    }

    fn moved(&mut self, session_id: &str, position: Vec3) {
        let Some(member) = self.members.get_mut(session_id) else {
            debug!(session_id = %session_id, "Move from unknown session");
            return;
        };
        member.position = position;
        self.broadcast(ServerMsg::PlayerMoved {
            id: session_id.to_string(),
            position,
        });
    }

    fn leave(&mut self, session_id: &str) {
        let Some(member) = self.members.remove(session_id) else {
            return;
        };
        info!(room = %self.name, session_id = %session_id, name = %member.name, "Player left");
        self.broadcast(ServerMsg::PlayerLeft {
            id: session_id.to_string(),
        });
    }

    fn broadcast(&self, msg: ServerMsg) {
        for (id, member) in &self.members {
            if let Err(mpsc::error::TrySendError::Full(_)) = member.outbox.try_send(msg.clone()) {
                debug!(session_id = %id, "Member queue full, message dropped");
            }
        }
    }
}
