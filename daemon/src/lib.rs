//! Master server for out-of-band game server discovery
//!
//! Game servers announce themselves with heartbeats and are listed once they answer a
//! `getinfo` challenge. Browsing clients subscribe to receive the list and its updates.

pub mod challenge;
pub mod config;
pub mod connection;
pub mod master;
pub mod registry;
pub mod resolve;
pub mod subscribers;
pub mod transport;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, Instrument};

pub use config::Config;
pub use master::{Handle, Master};

/// Accept connections on `listener` forever
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);
    let master = Master::spawn(&config);
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                error!("accept: {}", e);
                continue;
            }
        };
        tokio::spawn(
            transport::serve(master.clone(), stream, remote, config.trust_proxy)
                .instrument(info_span!("conn", peer = %remote)),
        );
    }
}
