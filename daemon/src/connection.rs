use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Frames queued per connection before further frames to it are dropped
pub const OUTBOX_CAPACITY: usize = 64;

/// Identity of a transport connection, assigned by the master when the connection opens
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sending half of a connection's outbound frame queue
///
/// The transport owns the connection itself; dropping an `Outbox` never closes it.
#[derive(Debug, Clone)]
pub struct Outbox(mpsc::Sender<Vec<u8>>);

impl Outbox {
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (send, recv) = mpsc::channel(OUTBOX_CAPACITY);
        (Self(send), recv)
    }

    /// Queue `frame` without waiting, dropping it if the queue is full
    pub fn send(&self, frame: Vec<u8>) {
        match self.0.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("outbound queue full, dropping frame"),
            // The transport is shutting down; its close event follows
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
