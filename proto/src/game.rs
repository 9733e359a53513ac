//! Protocol for communication between game servers and master servers

use crate::{encode, OOB_MARKER};

/// Prefix of a heartbeat payload
pub const HEARTBEAT: &[u8] = b"heartbeat ";
/// Prefix of an info response payload
pub const INFO_RESPONSE: &[u8] = b"infoResponse\n";
/// Prefix of an info request payload
pub const GETINFO: &[u8] = b"getinfo ";

/// Length of a port announcement frame
pub const PORT_ANNOUNCEMENT_LEN: usize = 10;
const PORT_TAG: &[u8] = b"port";

/// Info string key carrying the echoed challenge
pub const CHALLENGE_KEY: &[u8] = b"challenge";

/// Frame sent by a game server as the very first message on a connection, telling the master
/// which port game clients should connect to
pub fn port_announcement(port: u16) -> [u8; PORT_ANNOUNCEMENT_LEN] {
    let mut frame = [0; PORT_ANNOUNCEMENT_LEN];
    frame[..4].copy_from_slice(&OOB_MARKER);
    frame[4..8].copy_from_slice(PORT_TAG);
    frame[8..].copy_from_slice(&port.to_be_bytes());
    frame
}

/// Recognize a port announcement frame, returning the announced port
pub fn parse_port_announcement(frame: &[u8]) -> Option<u16> {
    if frame.len() != PORT_ANNOUNCEMENT_LEN || frame[..4] != OOB_MARKER || &frame[4..8] != PORT_TAG
    {
        return None;
    }
    Some(u16::from_be_bytes([frame[8], frame[9]]))
}

/// `heartbeat <tag>`
pub fn heartbeat(tag: &str) -> Vec<u8> {
    encode(&[HEARTBEAT, tag.as_bytes()].concat())
}

/// `getinfo <challenge>`
pub fn getinfo(challenge: &str) -> Vec<u8> {
    encode(&[GETINFO, challenge.as_bytes()].concat())
}

/// The challenge carried by a `getinfo` payload
pub fn parse_getinfo(payload: &[u8]) -> Option<&[u8]> {
    payload.strip_prefix(GETINFO)
}

/// `infoResponse` answering `challenge`, followed by `info` as backslash-delimited pairs
pub fn info_response(challenge: &[u8], info: &[(&str, &str)]) -> Vec<u8> {
    let mut payload = INFO_RESPONSE.to_vec();
    payload.push(b'\\');
    payload.extend_from_slice(CHALLENGE_KEY);
    payload.push(b'\\');
    payload.extend_from_slice(challenge);
    for (key, value) in info {
        payload.push(b'\\');
        payload.extend_from_slice(key.as_bytes());
        payload.push(b'\\');
        payload.extend_from_slice(value.as_bytes());
    }
    encode(&payload)
}

/// Key/value attributes reported by a game server
///
/// Parsing never fails. A single leading backslash is skipped, the rest is split on backslashes
/// and consecutive tokens are paired; an unpaired final token is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info<'a> {
    pairs: Vec<(&'a [u8], &'a [u8])>,
}

impl<'a> Info<'a> {
    pub fn parse(text: &'a [u8]) -> Self {
        let text = text.strip_prefix(b"\\").unwrap_or(text);
        let tokens = text.split(|&b| b == b'\\').collect::<Vec<_>>();
        Self {
            pairs: tokens
                .chunks_exact(2)
                .map(|pair| (pair[0], pair[1]))
                .collect(),
        }
    }

    /// Value of the first pair named `key`
    pub fn get(&self, key: &[u8]) -> Option<&'a [u8]> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + '_ {
        self.pairs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
