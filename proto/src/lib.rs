//! Out-of-band protocol spoken between game servers, browsing clients and the master server
//!
//! Every control message is a binary frame: the four byte marker `FF FF FF FF`, an 8-bit text
//! payload, and one trailing NUL.

use thiserror::Error;

pub mod client;
pub mod game;

/// Leading marker of every out-of-band frame
pub const OOB_MARKER: [u8; 4] = [0xFF; 4];

/// Returned by [`decode`] for traffic that doesn't carry the out-of-band marker
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("missing out-of-band marker")]
pub struct NotFramed;

/// Wrap `payload` in an out-of-band frame
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(OOB_MARKER.len() + payload.len() + 1);
    frame.extend_from_slice(&OOB_MARKER);
    frame.extend_from_slice(payload);
    frame.push(0);
    frame
}

/// Extract the payload of an out-of-band frame
///
/// The payload is everything between the marker and the final byte. The final byte is not
/// required to be NUL.
pub fn decode(frame: &[u8]) -> Result<&[u8], NotFramed> {
    let rest = frame.strip_prefix(&OOB_MARKER[..]).ok_or(NotFramed)?;
    Ok(rest.split_last().map_or(rest, |(_, payload)| payload))
}

/// A message received by the master server, classified by prefix
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// A game server announcing itself
    Heartbeat(&'a [u8]),
    /// A game server answering `getinfo`; carries the raw info string
    InfoResponse(&'a [u8]),
    /// A browsing client asking for the server list and future updates
    Subscribe,
    Unrecognized,
}

impl<'a> Message<'a> {
    /// Classify a decoded payload. Prefixes are case sensitive and checked in priority order.
    pub fn parse(payload: &'a [u8]) -> Self {
        if let Some(rest) = payload.strip_prefix(game::HEARTBEAT) {
            Message::Heartbeat(rest)
        } else if let Some(rest) = payload.strip_prefix(game::INFO_RESPONSE) {
            Message::InfoResponse(rest)
        } else if payload.starts_with(client::SUBSCRIBE) {
            Message::Subscribe
        } else {
            Message::Unrecognized
        }
    }
}
