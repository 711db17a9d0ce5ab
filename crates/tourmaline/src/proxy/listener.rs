// src/proxy/listener.rs
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Sending capability handed to sessions.
///
/// The proxy runs two of these per session: the client-facing one is shared
/// by every session on the handler's socket, the server-facing one is owned
/// by the session. `send` must be safe to call from concurrent sessions.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn send(&self, data: Bytes, to: SocketAddr) -> io::Result<()>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    /// Stops the listener; subsequent sends fail.
    fn close(&self);
}

/// [`Listener`] over a shared tokio UDP socket.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    closed: AtomicBool,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(Arc::new(socket)))
    }

    pub fn from_socket(socket: Arc<UdpSocket>) -> Self {
        Self { socket, closed: AtomicBool::new(false) }
    }

    /// The underlying socket, for the receive loop.
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }
}

#[async_trait]
impl Listener for UdpListener {
    async fn send(&self, data: Bytes, to: SocketAddr) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
        }
        self.socket.send_to(&data, to).await?;
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_close() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        let listener = UdpListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        listener.send(Bytes::from_static(b"ping"), target).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");

        listener.close();
        let result = listener.send(Bytes::from_static(b"late"), target).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }
}
