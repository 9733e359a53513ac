//! Working out which address and port a connection speaks for

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use quakemaster_proto::game;
use tokio_tungstenite::tungstenite::http::HeaderMap;

/// The logical address a connection represents, which may differ from its socket's peer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    /// The address in a form `getserversResponse` can carry
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&SocketAddr::new(self.ip, self.port), f)
    }
}

/// Client address as reported by a reverse proxy
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Forwarded {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

impl Forwarded {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            // The first entry is the originating client; later ones are intermediate proxies
            ip: header(headers, "x-forwarded-for")
                .and_then(|value| value.split(',').next())
                .and_then(|ip| ip.trim().parse().ok()),
            port: header(headers, "x-forwarded-port").and_then(|port| port.trim().parse().ok()),
        }
    }

    /// Override whichever parts of the observed peer address the proxy reported
    pub fn apply(self, observed: Endpoint) -> Endpoint {
        Endpoint {
            ip: self.ip.unwrap_or(observed.ip),
            port: self.port.unwrap_or(observed.port),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    AwaitingFirstFrame,
    Resolved,
}

/// Per-connection address negotiation
///
/// Transports that can't expose a real source port let the game server announce it in the
/// first binary frame. Only that frame is considered.
#[derive(Debug)]
pub struct Negotiation {
    state: State,
    endpoint: Endpoint,
}

impl Negotiation {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            state: State::AwaitingFirstFrame,
            endpoint,
        }
    }

    /// Feed a received binary frame through negotiation
    ///
    /// Returns `None` if the frame was consumed as a port announcement, otherwise hands it back
    /// for protocol handling.
    pub fn accept(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        if self.state == State::Resolved {
            return Some(frame);
        }
        self.state = State::Resolved;
        match game::parse_port_announcement(&frame) {
            Some(port) => {
                self.endpoint.port = port;
                None
            }
            None => Some(frame),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        self.state == State::Resolved
    }
}
