//! Follow a master server's list of live game servers

use std::net::SocketAddrV4;

use futures_util::{SinkExt, StreamExt};
use quakemaster_proto::{self as proto, client::MalformedServers};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("malformed data: {0}")]
    Parse(#[from] MalformedServers),
}

/// A subscription to a master server's server list
pub struct Subscription {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Connect to the master server at `url` (e.g. `ws://master.example.com:27950`) and subscribe.
pub async fn subscribe(url: &str) -> Result<Subscription, Error> {
    let (mut socket, _) = connect_async(url).await?;
    socket.send(Message::Binary(proto::client::subscribe())).await?;
    Ok(Subscription { socket })
}

impl Subscription {
    /// Wait for the next list of servers
    ///
    /// The first list is every server currently known. Each later one holds a single server that
    /// was just registered or refreshed. Servers are never explicitly removed; resubscribe to
    /// get a fresh complete list. Returns `None` once the master closes the connection.
    pub async fn next(&mut self) -> Result<Option<Vec<SocketAddrV4>>, Error> {
        while let Some(msg) = self.socket.next().await {
            let frame = match msg? {
                Message::Binary(x) => x,
                Message::Close(_) => break,
                _ => continue,
            };
            let payload = match proto::decode(&frame) {
                Ok(x) => x,
                Err(_) => continue,
            };
            return Ok(Some(proto::client::parse_servers_response(payload)?));
        }
        Ok(None)
    }

    /// Request a fresh complete list, delivered through [`next`](Self::next)
    pub async fn resubscribe(&mut self) -> Result<(), Error> {
        self.socket
            .send(Message::Binary(proto::client::subscribe()))
            .await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}
