//! Announce a game server to a master server

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

pub use quakemaster_proto as proto;
use quakemaster_proto::game;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("master server closed the connection")]
    Closed,
}

/// A game server's connection to a master server
pub struct Heartbeat {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Heartbeat {
    /// Connect to the master server at `url`, announcing that game clients should connect to
    /// `port`
    pub async fn connect(url: &str, port: u16) -> Result<Self, Error> {
        let (mut socket, _) = connect_async(url).await?;
        // Must be the first frame on the connection
        socket
            .send(Message::Binary(game::port_announcement(port).to_vec()))
            .await?;
        Ok(Self { socket })
    }

    /// Tell the master server we're alive. `tag` identifies the game protocol, e.g.
    /// `QuakeArena-1`.
    pub async fn send(&mut self, tag: &str) -> Result<(), Error> {
        self.socket
            .send(Message::Binary(game::heartbeat(tag)))
            .await?;
        Ok(())
    }

    /// Wait for the master server's `getinfo` challenge and answer it with `info`
    ///
    /// Returns the challenge that was answered.
    pub async fn respond(&mut self, info: &[(&str, &str)]) -> Result<String, Error> {
        while let Some(msg) = self.socket.next().await {
            let frame = match msg? {
                Message::Binary(x) => x,
                Message::Close(_) => break,
                _ => continue,
            };
            let challenge = match proto::decode(&frame).ok().and_then(game::parse_getinfo) {
                Some(x) => x,
                None => continue,
            };
            self.socket
                .send(Message::Binary(game::info_response(challenge, info)))
                .await?;
            return Ok(String::from_utf8_lossy(challenge).into_owned());
        }
        Err(Error::Closed)
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}
