//! WebSocket transport: one WebSocket message per protocol frame

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};
use tracing::{debug, trace};

use crate::{
    connection::Outbox,
    master::Handle,
    resolve::{Endpoint, Forwarded, Negotiation},
};

/// Serve one accepted TCP connection until it closes or fails
pub async fn serve(master: Handle, stream: TcpStream, remote: SocketAddr, trust_proxy: bool) {
    let mut forwarded = Forwarded::default();
    let socket = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        if trust_proxy {
            forwarded = Forwarded::from_headers(req.headers());
        }
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    {
        Ok(x) => x,
        Err(e) => {
            debug!("handshake failed: {}", e);
            return;
        }
    };
    let mut negotiation = Negotiation::new(forwarded.apply(Endpoint::from(remote)));
    debug!(peer = %negotiation.endpoint(), "connected");

    let (outbox, mut outgoing) = Outbox::channel();
    let conn = match master.open(outbox).await {
        Some(x) => x,
        None => return,
    };
    let (mut sink, mut incoming) = socket.split();

    let reader = async {
        while let Some(msg) = incoming.next().await {
            match msg? {
                Message::Binary(frame) => {
                    if let Some(frame) = negotiation.accept(frame) {
                        master.frame(conn, negotiation.endpoint(), frame).await;
                    }
                }
                Message::Close(_) => break,
                // Text is not protocol traffic; pings are answered by tungstenite
                _ => {}
            }
        }
        Ok::<_, tungstenite::Error>(())
    };
    let writer = async {
        while let Some(frame) = outgoing.recv().await {
            sink.send(Message::Binary(frame)).await?;
        }
        Ok::<_, tungstenite::Error>(())
    };
    let result = tokio::select! {
        x = reader => x,
        x = writer => x,
    };
    match result {
        Ok(()) => debug!("closed"),
        Err(e) => debug!("connection lost: {}", e),
    }
    trace!(%conn, "deregistering");
    master.close(conn).await;
}
