// src/proxy/mod.rs
//! # Proxy handler
//!
//! Owns the client-facing listener and the session registry. Each client
//! address gets one [`Session`] driven by its own task; the task is the only
//! place that session's state is touched, so sessions need no locking while
//! distinct sessions run concurrently.

use crate::error::Result;
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub mod events;
pub mod listener;
pub mod session;

// --- Re-exports ---
pub use events::EventBus;
pub use listener::{Listener, UdpListener};
pub use session::{Session, SessionState};

/// Which peer a byte stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    /// The other end of the pipe.
    pub const fn opposite(self) -> Self {
        match self {
            Origin::Client => Origin::Server,
            Origin::Server => Origin::Client,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Client => write!(f, "client"),
            Origin::Server => write!(f, "server"),
        }
    }
}

/// Receive buffer size; comfortably above any negotiable MTU.
const MAX_UDP_PACKET_SIZE: usize = 2048;

/// Queue depth between the accept loop and a session task.
const SESSION_QUEUE_DEPTH: usize = 256;

/// The man-in-the-middle proxy server.
pub struct ProxyServer {
    /// Client-facing listener, shared by all sessions.
    listener: Arc<UdpListener>,
    /// The real server every session is bridged to.
    upstream: SocketAddr,
    /// Starting MTU handed to new sessions.
    mtu_size: u16,
    events: Arc<EventBus>,
    /// Per-client inbox senders, keyed by client address.
    sessions: Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>,
}

impl ProxyServer {
    /// Binds the client-facing socket.
    pub async fn bind(
        bind_addr: SocketAddr,
        upstream: SocketAddr,
        mtu_size: u16,
        events: EventBus,
    ) -> Result<Self> {
        let listener = Arc::new(UdpListener::bind(bind_addr).await?);
        info!("Proxy bound to {}, bridging to {}", bind_addr, upstream);
        Ok(Self {
            listener,
            upstream,
            mtu_size,
            events: Arc::new(events),
            sessions: Arc::new(DashMap::new()),
        })
    }

    /// Runs the accept loop indefinitely.
    pub async fn run(&self) -> Result<()> {
        let socket = self.listener.socket().clone();
        let mut buf = [0u8; MAX_UDP_PACKET_SIZE];

        loop {
            let (len, src_addr) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive on client listener: {}", e);
                    continue;
                }
            };
            if len == 0 {
                trace!("Ignoring empty packet from {}", src_addr);
                continue;
            }
            let data = Bytes::copy_from_slice(&buf[..len]);

            let existing = self.sessions.get(&src_addr).map(|entry| entry.value().clone());
            match existing {
                Some(inbox) => {
                    if inbox.send(data).await.is_err() {
                        // Session task is gone; drop the stale entry.
                        debug!("Session for {} ended, dropping stale inbox", src_addr);
                        self.sessions.remove(&src_addr);
                    }
                }
                None => {
                    if let Err(e) = self.spawn_session(src_addr, data).await {
                        warn!("Could not open session for {}: {}", src_addr, e);
                    }
                }
            }
        }
    }

    /// Creates the session for a new client address and spawns its task: the
    /// single place this session's state is mutated.
    async fn spawn_session(&self, client_addr: SocketAddr, first: Bytes) -> Result<()> {
        let server_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let server_listener = Arc::new(UdpListener::from_socket(Arc::new(server_socket)));

        let (inbox_tx, mut inbox_rx) = mpsc::channel::<Bytes>(SESSION_QUEUE_DEPTH);
        self.sessions.insert(client_addr, inbox_tx);

        let mut session = Session::new(
            client_addr,
            self.upstream,
            self.mtu_size,
            self.listener.clone(),
            server_listener.clone(),
            self.events.clone(),
        );
        let sessions = self.sessions.clone();
        let upstream = self.upstream;

        tokio::spawn(async move {
            let server_socket = server_listener.socket().clone();
            let mut buf = [0u8; MAX_UDP_PACKET_SIZE];

            if !drive(&mut session, Origin::Client, first).await {
                finish(&mut session, &sessions).await;
                return;
            }

            loop {
                tokio::select! {
                    from_client = inbox_rx.recv() => {
                        match from_client {
                            Some(data) => {
                                if !drive(&mut session, Origin::Client, data).await {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    from_server = server_socket.recv_from(&mut buf) => {
                        match from_server {
                            Ok((len, from)) if from == upstream => {
                                let data = Bytes::copy_from_slice(&buf[..len]);
                                if !drive(&mut session, Origin::Server, data).await {
                                    break;
                                }
                            }
                            Ok((_, from)) => {
                                trace!("[{}] Ignoring stray packet from {}", client_addr, from);
                            }
                            Err(e) => {
                                warn!("[{}] Server socket error: {}", client_addr, e);
                                break;
                            }
                        }
                    }
                }
            }

            finish(&mut session, &sessions).await;
        });

        Ok(())
    }
}

/// Feeds one payload into the session. Returns `false` when the session must
/// be torn down; non-fatal errors only cost the offending datagram.
async fn drive(session: &mut Session, origin: Origin, data: Bytes) -> bool {
    match session.handle_data(origin, data).await {
        Ok(()) => true,
        Err(e) if e.is_fatal() => {
            error!("[{}] Fatal: {}", session.client_addr(), e);
            false
        }
        Err(e) => {
            warn!("[{}] Dropping datagram: {}", session.client_addr(), e);
            true
        }
    }
}

async fn finish(session: &mut Session, sessions: &DashMap<SocketAddr, mpsc::Sender<Bytes>>) {
    session.disconnect().await;
    sessions.remove(&session.client_addr());
}
