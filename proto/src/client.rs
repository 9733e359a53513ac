//! Protocol for communication between browsing clients and master servers

use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

use crate::encode;

/// Payload sent by a client to receive the server list and subsequent updates
pub const SUBSCRIBE: &[u8] = b"subscribe";
/// Prefix of a server list payload
pub const GETSERVERS_RESPONSE: &[u8] = b"getserversResponse";

/// Encoded size of one server entry, excluding its leading backslash
pub const SERVER_ENTRY_LEN: usize = 6;

/// `subscribe`
pub fn subscribe() -> Vec<u8> {
    encode(SUBSCRIBE)
}

/// Server list payload, unframed
///
/// Each server is a backslash followed by the four address octets and the port, big-endian, as
/// raw bytes.
pub fn servers_response_payload<I>(servers: I) -> Vec<u8>
where
    I: IntoIterator<Item = SocketAddrV4>,
{
    let mut payload = GETSERVERS_RESPONSE.to_vec();
    for server in servers {
        payload.push(b'\\');
        payload.extend_from_slice(&server.ip().octets());
        payload.extend_from_slice(&server.port().to_be_bytes());
    }
    payload
}

/// `getserversResponse` listing `servers`
pub fn servers_response<I>(servers: I) -> Vec<u8>
where
    I: IntoIterator<Item = SocketAddrV4>,
{
    encode(&servers_response_payload(servers))
}

/// A payload that isn't a well-formed `getserversResponse`
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("malformed getserversResponse")]
pub struct MalformedServers;

/// Decode the servers listed by a `getserversResponse` payload
pub fn parse_servers_response(payload: &[u8]) -> Result<Vec<SocketAddrV4>, MalformedServers> {
    let mut rest = payload
        .strip_prefix(GETSERVERS_RESPONSE)
        .ok_or(MalformedServers)?;
    let mut servers = Vec::with_capacity(rest.len() / (SERVER_ENTRY_LEN + 1));
    while !rest.is_empty() {
        // Entries are fixed-size, so address bytes equal to `\` need no escaping
        if rest[0] != b'\\' || rest.len() < SERVER_ENTRY_LEN + 1 {
            return Err(MalformedServers);
        }
        let entry = &rest[1..=SERVER_ENTRY_LEN];
        servers.push(SocketAddrV4::new(
            Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]),
            u16::from_be_bytes([entry[4], entry[5]]),
        ));
        rest = &rest[SERVER_ENTRY_LEN + 1..];
    }
    Ok(servers)
}
