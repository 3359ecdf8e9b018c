//! Room protocol and framed transport.
//!
//! Goals:
//! - One TCP connection per client per room.
//! - JSON payloads in length-prefixed frames (u32, big endian).
//! - Connections split into read and write halves so a reader task and a
//!   writer task can run independently.

use std::{io::ErrorKind, net::SocketAddr};

use anyhow::{bail, Context};
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};
use tracing::{debug, warn};

use crate::{level::LevelConfig, math::Vec3};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames above this size are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Client -> server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMsg {
    /// First message on a connection.
    JoinRoom {
        protocol: u32,
        room: String,
        name: String,
    },
    /// Latest local player position. Sent at most once per client tick.
    Move { position: Vec3 },
    /// Graceful leave.
    Leave,
}

/// Server -> client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerMsg {
    /// Join acknowledged. `session_id` identifies this client inside the room.
    Joined {
        session_id: String,
        level: LevelConfig,
    },
    /// A player entered the room (sent for the joining client too).
    PlayerJoined { id: String, position: Vec3 },
    /// Authoritative position of a player.
    PlayerMoved { id: String, position: Vec3 },
    /// A player left the room.
    PlayerLeft { id: String },
    /// Join refused.
    Rejected { reason: String },
}

async fn write_frame<W, T>(w: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed cleanly between frames.
async fn read_frame<R, T>(r: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("tcp read len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        warn!(len, "Oversized frame");
        bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(Some(msg))
}

/// Framed connection over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { half: read }, FrameWriter { half: write })
    }
}

/// Read half of a [`FramedConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`FramedConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.half.shutdown().await.context("tcp shutdown")
    }
}

/// TCP listener producing framed connections.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        debug!(%addr, "Listener bound");
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FramedConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((FramedConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joined_carries_level() -> anyhow::Result<()> {
        let msg = ServerMsg::Joined {
            session_id: "abc".into(),
            level: LevelConfig::sample(),
        };
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, &msg).await?;
        assert_eq!(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize, buf.len() - 4);

        let mut data: &[u8] = &buf;
        let back = read_frame::<_, ServerMsg>(&mut data).await?;
        assert_eq!(back, Some(msg));
        Ok(())
    }

    #[tokio::test]
    async fn clean_close_reads_as_none() -> anyhow::Result<()> {
        let listener = FrameListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;

        let client = tokio::spawn(async move {
            let mut conn = FramedConn::connect(addr).await?;
            conn.send(&ClientMsg::Leave).await?;
            Ok::<_, anyhow::Error>(())
        });

        let (conn, _) = listener.accept().await?;
        let (mut reader, _writer) = conn.into_split();
        assert_eq!(reader.recv::<ClientMsg>().await?, Some(ClientMsg::Leave));
        client.await??;
        assert_eq!(reader.recv::<ClientMsg>().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() -> anyhow::Result<()> {
        let mut data: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let res = read_frame::<_, ClientMsg>(&mut data).await;
        assert!(res.is_err());
        Ok(())
    }
}
