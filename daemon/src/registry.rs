//! Known game servers and their liveness

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::{Duration, Instant},
};

use indexmap::IndexMap;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub address: Ipv4Addr,
    pub port: u16,
    /// When the server last answered `getinfo`
    pub last_update: Instant,
}

impl ServerRecord {
    pub fn key(&self) -> String {
        key(self.address, self.port)
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

fn key(address: Ipv4Addr, port: u16) -> String {
    format!("{}:{}", address, port)
}

/// Outcome of [`Registry::upsert`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Upsert {
    Created(ServerRecord),
    Refreshed(ServerRecord),
}

impl Upsert {
    pub fn record(&self) -> &ServerRecord {
        match self {
            Upsert::Created(record) | Upsert::Refreshed(record) => record,
        }
    }
}

/// Servers keyed by `address:port`, enumerated in registration order
#[derive(Debug, Default)]
pub struct Registry {
    servers: IndexMap<String, ServerRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the server at `address:port` was alive at `now`
    pub fn upsert(&mut self, address: Ipv4Addr, port: u16, now: Instant) -> Upsert {
        let mut created = false;
        let record = self.servers.entry(key(address, port)).or_insert_with(|| {
            created = true;
            ServerRecord {
                address,
                port,
                last_update: now,
            }
        });
        record.last_update = record.last_update.max(now);
        if created {
            Upsert::Created(*record)
        } else {
            Upsert::Refreshed(*record)
        }
    }

    pub fn snapshot(&self) -> impl Iterator<Item = &ServerRecord> + '_ {
        self.servers.values()
    }

    pub fn get(&self, address: Ipv4Addr, port: u16) -> Option<&ServerRecord> {
        self.servers.get(&key(address, port))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Drop every server not heard from for longer than `ttl`, returning them
    pub fn evict_stale(&mut self, now: Instant, ttl: Duration) -> Vec<ServerRecord> {
        let mut evicted = Vec::new();
        self.servers.retain(|_, record| {
            let stale = now.saturating_duration_since(record.last_update) > ttl;
            if stale {
                evicted.push(*record);
            }
            !stale
        });
        evicted
    }
}
