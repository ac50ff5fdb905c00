//! Connection establishment.
//!
//! The engine operates on an already-open duplex byte stream; how that stream
//! comes to exist is this seam. [`NetworkProvider`] abstracts active connect
//! and passive bind/accept behind associated types, so the client and server
//! wrappers work identically over real TCP, in-memory duplex pairs in tests,
//! or any other ordered reliable byte stream.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// Creates connections and listeners for a transport.
///
/// Addresses are plain strings; their shape belongs to the implementation
/// (host:port for TCP). Providers are cloned into the client and server
/// wrappers, so implementations should be cheap handles.
#[async_trait]
pub trait NetworkProvider: Clone + Send + Sync + 'static {
    /// Duplex byte stream this provider produces.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Listener accepting streams of the same kind.
    type Listener: NetworkListener<Stream = Self::Stream> + Send + Sync + 'static;

    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Any I/O error from the underlying bind (address in use, permission).
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Open a connection to `addr`.
    ///
    /// # Errors
    ///
    /// Any I/O error from the underlying connect (refused, unreachable).
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Accepts incoming connections for a [`NetworkProvider`].
#[async_trait]
pub trait NetworkListener: Send {
    /// Stream type produced by `accept`.
    type Stream;

    /// Wait for the next incoming connection.
    ///
    /// Returns the stream and the peer's address text.
    ///
    /// # Errors
    ///
    /// Any I/O error from the underlying accept.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// The listener's bound address.
    ///
    /// # Errors
    ///
    /// Any I/O error from querying the socket.
    fn local_addr(&self) -> io::Result<String>;
}

/// [`NetworkProvider`] over real Tokio TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetworkProvider;

impl TcpNetworkProvider {
    /// Create a TCP provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetworkProvider for TcpNetworkProvider {
    type Stream = TcpStream;
    type Listener = TcpNetworkListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpNetworkListener { listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// TCP listener for [`TcpNetworkProvider`].
#[derive(Debug)]
pub struct TcpNetworkListener {
    listener: TcpListener,
}

#[async_trait]
impl NetworkListener for TcpNetworkListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.listener.local_addr().map(|a| a.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn bind_connect_accept_round_trip() {
        let provider = TcpNetworkProvider::new();
        let listener = provider.bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut client, mut server) =
            tokio::join!(async { provider.connect(&addr).await.unwrap() }, async {
                listener.accept().await.unwrap().0
            });

        client.write_all(b"ping").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let provider = TcpNetworkProvider::new();
        // Bind then drop to obtain a port that refuses connections.
        let addr = {
            let listener = provider.bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        assert!(provider.connect(&addr).await.is_err());
    }
}
