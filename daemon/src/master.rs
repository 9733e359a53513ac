//! The master server's protocol state machine
//!
//! All registry and subscription state lives in one [`Master`], driven by a single task that
//! consumes connection events and eviction ticks in order. Transports reach it through a
//! cloneable [`Handle`].

use std::{
    net::Ipv4Addr,
    time::{Duration, Instant},
};

use quakemaster_proto::{
    self as proto, client,
    game::{self, Info},
    Message,
};
use slab::Slab;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tracing::{debug, info, trace, warn};

use crate::{
    challenge::{self, ChallengePolicy},
    config::Config,
    connection::{ConnectionId, Outbox},
    registry::{Registry, ServerRecord, Upsert},
    resolve::Endpoint,
    subscribers::Subscribers,
};

/// Events buffered between the transports and the master task
const EVENT_QUEUE: usize = 1024;

#[derive(Debug)]
pub enum Event {
    Open {
        outbox: Outbox,
        reply: oneshot::Sender<ConnectionId>,
    },
    Frame {
        conn: ConnectionId,
        endpoint: Endpoint,
        frame: Vec<u8>,
    },
    Close {
        conn: ConnectionId,
    },
}

/// A connection the master can talk to
#[derive(Debug)]
struct Peer {
    outbox: Outbox,
    /// Last challenge sent to this connection and not yet answered
    challenge: Option<String>,
}

pub struct Master {
    peers: Slab<Peer>,
    registry: Registry,
    subscribers: Subscribers,
    ttl: Duration,
    challenge_policy: ChallengePolicy,
}

impl Master {
    pub fn new(config: &Config) -> Self {
        Self {
            peers: Slab::new(),
            registry: Registry::new(),
            subscribers: Subscribers::new(),
            ttl: config.ttl,
            challenge_policy: config.challenge,
        }
    }

    /// Start the master task
    pub fn spawn(config: &Config) -> Handle {
        let (send, recv) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(Self::new(config).run(recv));
        Handle { events: send }
    }

    /// Process events until every [`Handle`] is dropped, sweeping stale servers every `ttl`
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        let mut sweep = time::interval_at(time::Instant::now() + self.ttl, self.ttl);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = sweep.tick() => self.evict_stale(),
            }
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Open { outbox, reply } => {
                let conn = self.open(outbox);
                if reply.send(conn).is_err() {
                    self.close(conn);
                }
            }
            Event::Frame {
                conn,
                endpoint,
                frame,
            } => self.receive(conn, endpoint, &frame),
            Event::Close { conn } => self.close(conn),
        }
    }

    pub fn open(&mut self, outbox: Outbox) -> ConnectionId {
        ConnectionId(self.peers.insert(Peer {
            outbox,
            challenge: None,
        }))
    }

    /// Forget a connection after a transport error or close
    pub fn close(&mut self, conn: ConnectionId) {
        self.subscribers.remove(conn);
        if self.peers.contains(conn.0) {
            self.peers.remove(conn.0);
        }
    }

    /// Handle one binary frame received on `conn`, which speaks for `endpoint`
    pub fn receive(&mut self, conn: ConnectionId, endpoint: Endpoint, frame: &[u8]) {
        let message = match proto::decode(frame) {
            Ok(payload) => Message::parse(payload),
            Err(e) => {
                trace!(peer = %endpoint, "{}", e);
                Message::Unrecognized
            }
        };
        match message {
            Message::Heartbeat(_) => self.on_heartbeat(conn, endpoint),
            Message::InfoResponse(text) => {
                self.on_info_response(conn, endpoint, &Info::parse(text))
            }
            Message::Subscribe => self.on_subscribe(conn, endpoint),
            Message::Unrecognized => self.unsubscribe(conn, endpoint),
        }
    }

    fn on_heartbeat(&mut self, conn: ConnectionId, endpoint: Endpoint) {
        info!(peer = %endpoint, "heartbeat");
        let peer = match self.peers.get_mut(conn.0) {
            Some(x) => x,
            None => return,
        };
        let challenge = challenge::generate(&mut rand::rng());
        info!(peer = %endpoint, challenge = %challenge, "getinfo");
        peer.outbox.send(game::getinfo(&challenge));
        peer.challenge = Some(challenge);
    }

    fn on_info_response(&mut self, conn: ConnectionId, endpoint: Endpoint, info: &Info) {
        info!(peer = %endpoint, fields = info.len(), "infoResponse");
        let outstanding = self
            .peers
            .get_mut(conn.0)
            .and_then(|peer| peer.challenge.take());
        if !self
            .challenge_policy
            .admits(outstanding.as_deref(), info.get(game::CHALLENGE_KEY))
        {
            warn!(peer = %endpoint, "infoResponse doesn't answer our challenge, ignoring");
            return;
        }
        let address = match endpoint.ipv4() {
            Some(x) => x,
            None => {
                warn!(peer = %endpoint, "can't list a server without an IPv4 address");
                return;
            }
        };
        self.register(Instant::now(), address, endpoint.port);
    }

    fn register(&mut self, now: Instant, address: Ipv4Addr, port: u16) {
        let upsert = self.registry.upsert(address, port, now);
        if let Upsert::Created(ref record) = upsert {
            info!(
                server = %record.key(),
                "registered, {} server(s) currently registered",
                self.registry.len()
            );
        }
        let record = upsert.record();
        if !self.subscribers.is_empty() {
            debug!(
                server = %record.key(),
                subscribers = self.subscribers.len(),
                "getserversResponse with 1 server(s)"
            );
        }
        self.subscribers
            .broadcast(&client::servers_response(Some(record.socket_addr())));
    }

    fn on_subscribe(&mut self, conn: ConnectionId, endpoint: Endpoint) {
        let peer = match self.peers.get(conn.0) {
            Some(x) => x,
            None => return,
        };
        if self.subscribers.add(conn, peer.outbox.clone()) {
            info!(peer = %endpoint, "subscribe");
        }
        info!(
            peer = %endpoint,
            "getserversResponse with {} server(s)",
            self.registry.len()
        );
        peer.outbox.send(client::servers_response(
            self.registry.snapshot().map(ServerRecord::socket_addr),
        ));
    }

    fn unsubscribe(&mut self, conn: ConnectionId, endpoint: Endpoint) {
        if self.subscribers.remove(conn) {
            info!(peer = %endpoint, "unsubscribe");
        }
    }

    /// Drop servers that haven't answered a challenge within the TTL
    ///
    /// Subscribers aren't told; the server is simply absent from later snapshots.
    pub fn evict_stale(&mut self) {
        for record in self.registry.evict_stale(Instant::now(), self.ttl) {
            info!(
                server = %record.key(),
                "timed out, {} server(s) currently registered",
                self.registry.len()
            );
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// Connection to the master task
#[derive(Debug, Clone)]
pub struct Handle {
    events: mpsc::Sender<Event>,
}

impl Handle {
    /// Register a new connection; `None` if the master has stopped
    pub async fn open(&self, outbox: Outbox) -> Option<ConnectionId> {
        let (reply, conn) = oneshot::channel();
        self.events.send(Event::Open { outbox, reply }).await.ok()?;
        conn.await.ok()
    }

    pub async fn frame(&self, conn: ConnectionId, endpoint: Endpoint, frame: Vec<u8>) {
        let _ = self
            .events
            .send(Event::Frame {
                conn,
                endpoint,
                frame,
            })
            .await;
    }

    pub async fn close(&self, conn: ConnectionId) {
        let _ = self.events.send(Event::Close { conn }).await;
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv6Addr, SocketAddrV4};

    use quakemaster_proto::{client::parse_servers_response, decode, game::parse_getinfo};

    use super::*;
    use crate::challenge::{MAX_LEN, MIN_LEN};

    struct Conn {
        id: ConnectionId,
        endpoint: Endpoint,
        inbox: mpsc::Receiver<Vec<u8>>,
    }

    impl Conn {
        fn open(master: &mut Master, ip: [u8; 4], port: u16) -> Self {
            let (outbox, inbox) = Outbox::channel();
            Self {
                id: master.open(outbox),
                endpoint: Endpoint {
                    ip: IpAddr::V4(ip.into()),
                    port,
                },
                inbox,
            }
        }

        fn send(&self, master: &mut Master, frame: &[u8]) {
            master.receive(self.id, self.endpoint, frame);
        }

        fn payloads(&mut self) -> Vec<Vec<u8>> {
            let mut payloads = Vec::new();
            while let Ok(frame) = self.inbox.try_recv() {
                payloads.push(decode(&frame).unwrap().to_vec());
            }
            payloads
        }

        fn addr(&self) -> SocketAddrV4 {
            match self.endpoint.ip {
                IpAddr::V4(ip) => SocketAddrV4::new(ip, self.endpoint.port),
                IpAddr::V6(_) => unreachable!(),
            }
        }
    }

    fn master() -> Master {
        Master::new(&Config::default())
    }

    fn strict_master() -> Master {
        Master::new(&Config {
            challenge: ChallengePolicy::Strict,
            ..Config::default()
        })
    }

    /// Heartbeat and answer the resulting challenge
    fn announce(master: &mut Master, server: &mut Conn) {
        server.send(master, &game::heartbeat("QuakeArena-1"));
        let getinfo = server.payloads().pop().unwrap();
        let challenge = parse_getinfo(&getinfo).unwrap().to_vec();
        server.send(
            master,
            &game::info_response(&challenge, &[("gamename", "baseq3")]),
        );
    }

    #[test]
    fn heartbeat_is_challenged_not_registered() {
        let mut master = master();
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        server.send(&mut master, &game::heartbeat("QuakeArena-1"));

        let replies = server.payloads();
        assert_eq!(replies.len(), 1);
        let challenge = parse_getinfo(&replies[0]).expect("getinfo");
        assert!((MIN_LEN..=MAX_LEN).contains(&challenge.len()));
        assert!(challenge
            .iter()
            .all(|c| (33..=126).contains(c) && !b"\\;\"%/".contains(c)));
        assert!(master.registry().is_empty());
    }

    #[test]
    fn end_to_end() {
        let mut master = master();
        let mut browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        assert_eq!(browser.payloads(), vec![b"getserversResponse".to_vec()]);

        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        server.send(&mut master, &game::heartbeat("QuakeArena-1"));
        assert!(parse_getinfo(&server.payloads()[0]).is_some());
        server.send(
            &mut master,
            b"\xff\xff\xff\xffinfoResponse\n\\gamename\\baseq3\0",
        );

        assert_eq!(master.registry().len(), 1);
        assert!(master.registry().get(Ipv4Addr::new(203, 0, 113, 7), 27960).is_some());
        assert_eq!(
            browser.payloads(),
            vec![b"getserversResponse\\\xcb\x00\x71\x07\x6d\x38".to_vec()]
        );
    }

    #[test]
    fn partial_update_fans_out() {
        let mut master = master();
        let mut browsers = (0..4)
            .map(|i| Conn::open(&mut master, [198, 51, 100, i], 50000))
            .collect::<Vec<_>>();
        let mut existing = Conn::open(&mut master, [192, 0, 2, 1], 27960);
        announce(&mut master, &mut existing);
        for browser in &mut browsers {
            browser.send(&mut master, &client::subscribe());
            browser.payloads();
        }
        assert_eq!(master.subscribers().len(), 4);

        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27961);
        announce(&mut master, &mut server);
        for browser in &mut browsers {
            let updates = browser.payloads();
            assert_eq!(updates.len(), 1);
            assert_eq!(parse_servers_response(&updates[0]), Ok(vec![server.addr()]));
        }
    }

    #[test]
    fn refresh_is_broadcast_again() {
        let mut master = master();
        let mut browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        announce(&mut master, &mut server);
        announce(&mut master, &mut server);
        assert_eq!(master.registry().len(), 1);
        let updates = browser.payloads();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[1], updates[2]);
    }

    #[test]
    fn resubscribe_resends_snapshot() {
        let mut master = master();
        let mut a = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        let mut b = Conn::open(&mut master, [203, 0, 113, 8], 27960);
        announce(&mut master, &mut a);
        announce(&mut master, &mut b);

        let mut browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        browser.send(&mut master, &client::subscribe());
        assert_eq!(master.subscribers().len(), 1);

        let snapshots = browser.payloads();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(
            snapshots[0],
            b"getserversResponse\\\xcb\x00\x71\x07\x6d\x38\\\xcb\x00\x71\x08\x6d\x38".to_vec()
        );
    }

    #[test]
    fn subscription_is_per_connection() {
        let mut master = master();
        let mut first = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        let mut second = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        first.send(&mut master, &client::subscribe());
        second.send(&mut master, &client::subscribe());
        assert_eq!(master.subscribers().len(), 2);
        assert_eq!(first.payloads().len(), 1);
        assert_eq!(second.payloads().len(), 1);
    }

    #[test]
    fn garbage_unsubscribes() {
        let mut master = master();
        let mut browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        browser.payloads();

        browser.send(&mut master, b"not out-of-band");
        assert!(!master.subscribers().contains(browser.id));

        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        announce(&mut master, &mut server);
        assert!(browser.payloads().is_empty());

        // Still connected: subscribing again works
        browser.send(&mut master, &client::subscribe());
        assert_eq!(browser.payloads().len(), 1);
    }

    #[test]
    fn unknown_message_unsubscribes() {
        let mut master = master();
        let browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        browser.send(&mut master, &proto::encode(b"getservers 68 empty full"));
        assert!(master.subscribers().is_empty());
        // Idempotent
        browser.send(&mut master, &proto::encode(b"getservers 68 empty full"));
        assert!(master.subscribers().is_empty());
    }

    #[test]
    fn close_unsubscribes() {
        let mut master = master();
        let browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        master.handle(Event::Close { conn: browser.id });
        assert!(master.subscribers().is_empty());
        master.handle(Event::Close { conn: browser.id });
        assert!(master.subscribers().is_empty());
    }

    #[test]
    fn eviction_is_silent() {
        let mut master = Master::new(&Config {
            ttl: Duration::from_millis(1),
            ..Config::default()
        });
        let mut browser = Conn::open(&mut master, [198, 51, 100, 1], 50000);
        browser.send(&mut master, &client::subscribe());
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        announce(&mut master, &mut server);
        browser.payloads();

        std::thread::sleep(Duration::from_millis(5));
        master.evict_stale();
        assert!(master.registry().is_empty());
        assert!(browser.payloads().is_empty());

        browser.send(&mut master, &client::subscribe());
        assert_eq!(browser.payloads(), vec![b"getserversResponse".to_vec()]);
    }

    #[test]
    fn fresh_servers_survive_eviction() {
        let mut master = master();
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        announce(&mut master, &mut server);
        master.evict_stale();
        assert_eq!(master.registry().len(), 1);
    }

    #[test]
    fn strict_mode_requires_echoed_challenge() {
        let mut master = strict_master();
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);

        // Unsolicited
        server.send(&mut master, &game::info_response(b"guess", &[]));
        assert!(master.registry().is_empty());

        server.send(&mut master, &game::heartbeat("QuakeArena-1"));
        server.payloads();
        server.send(&mut master, &game::info_response(b"wrong", &[]));
        assert!(master.registry().is_empty());

        // The challenge was spent by the failed attempt
        announce(&mut master, &mut server);
        assert_eq!(master.registry().len(), 1);
    }

    #[test]
    fn challenge_is_single_use() {
        let mut master = strict_master();
        let mut server = Conn::open(&mut master, [203, 0, 113, 7], 27960);
        server.send(&mut master, &game::heartbeat("QuakeArena-1"));
        let getinfo = server.payloads().pop().unwrap();
        let reply = game::info_response(parse_getinfo(&getinfo).unwrap(), &[]);
        server.send(&mut master, &reply);
        assert_eq!(master.registry().len(), 1);

        let before = master.registry().snapshot().next().unwrap().last_update;
        std::thread::sleep(Duration::from_millis(2));
        server.send(&mut master, &reply);
        let after = master.registry().snapshot().next().unwrap().last_update;
        assert_eq!(before, after);
    }

    #[test]
    fn ipv6_servers_are_not_listed() {
        let mut master = master();
        let (outbox, _inbox) = Outbox::channel();
        let conn = master.open(outbox);
        let endpoint = Endpoint {
            ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
            port: 27960,
        };
        master.receive(conn, endpoint, &game::info_response(b"x", &[]));
        assert!(master.registry().is_empty());
    }

    #[test]
    fn open_reply_dropped_releases_connection() {
        let mut master = master();
        let (outbox, _inbox) = Outbox::channel();
        let (reply, conn) = oneshot::channel();
        drop(conn);
        master.handle(Event::Open { outbox, reply });
        assert!(master.peers.is_empty());
    }
}
