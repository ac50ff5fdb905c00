//! Server endpoint: listens and accepts one peer.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use hawser_core::{
    JsonCodec, MessageCodec, NetworkListener, NetworkProvider, TcpNetworkProvider,
};

use crate::connection::{Connection, ConnectionConfig};
use crate::envelope::Tag;
use crate::lifecycle::{self, LifecycleState};

/// Accepting endpoint of a messaging pair.
///
/// [`IpcServer::initialize`] binds the listening socket,
/// [`IpcServer::wait_for_connection`] blocks until a peer attaches or the
/// caller cancels, [`IpcServer::begin_read`] starts the read loop. One server
/// endpoint serves one peer; accept again with a fresh endpoint for the next
/// one and hand live connections to a [`ConnectionRouter`] to track them.
///
/// [`ConnectionRouter`]: crate::router::ConnectionRouter
///
/// # Examples
///
/// ```no_run
/// use hawser::IpcServer;
/// use tokio_util::sync::CancellationToken;
///
/// # #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// # #[derive(serde::Serialize, serde::Deserialize)]
/// # enum Kind { Ping }
/// # async fn run() -> std::io::Result<()> {
/// let server: IpcServer<Kind, _, _> = IpcServer::tcp();
/// server.initialize("127.0.0.1:4600").await?;
/// if server.wait_for_connection(CancellationToken::new()).await {
///     server.begin_read(CancellationToken::new());
/// }
/// # Ok(())
/// # }
/// ```
pub struct IpcServer<T, P, C>
where
    P: NetworkProvider,
{
    provider: P,
    codec: C,
    config: ConnectionConfig,
    inner: Mutex<ServerInner<T, P, C>>,
}

struct ServerInner<T, P: NetworkProvider, C> {
    state: LifecycleState,
    /// Shared so accept can run outside the endpoint lock.
    listener: Option<Arc<P::Listener>>,
    connection: Option<Arc<Connection<T, P::Stream, C>>>,
}

impl<T: Tag> IpcServer<T, TcpNetworkProvider, JsonCodec> {
    /// TCP server with the JSON codec and default configuration.
    pub fn tcp() -> Self {
        Self::new(TcpNetworkProvider, JsonCodec, ConnectionConfig::default())
    }
}

impl<T, P, C> IpcServer<T, P, C>
where
    T: Tag,
    P: NetworkProvider,
    C: MessageCodec,
{
    /// Server over an explicit transport provider and codec.
    pub fn new(provider: P, codec: C, config: ConnectionConfig) -> Self {
        Self {
            provider,
            codec,
            config,
            inner: Mutex::new(ServerInner {
                state: LifecycleState::Uninitialized,
                listener: None,
                connection: None,
            }),
        }
    }

    /// Bind the listening socket at `addr`.
    ///
    /// # Errors
    ///
    /// Returns the bind failure (address in use, permission denied); the
    /// failure is logged and the server stays uninitialized so another
    /// address can be tried.
    ///
    /// # Panics
    ///
    /// Panics when the server has already been initialized.
    pub async fn initialize(&self, addr: &str) -> std::io::Result<()> {
        {
            let inner = self.lock_inner();
            lifecycle::require(inner.state, LifecycleState::Uninitialized, "initialize");
        }

        let listener = match self.provider.bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "bind failed");
                return Err(e);
            }
        };

        let mut inner = self.lock_inner();
        // Concurrent initializers both reach here only by both passing the
        // pre-check; the loser of that race is still misuse.
        lifecycle::require(inner.state, LifecycleState::Uninitialized, "initialize");
        inner.listener = Some(Arc::new(listener));
        inner.state = LifecycleState::Initialized;
        tracing::debug!(addr = %addr, "listening");
        Ok(())
    }

    /// Block until a peer connects, attaching it as this server's
    /// connection.
    ///
    /// Returns `true` once a peer is attached. Cancellation and accept
    /// failure are expected outcomes, not errors: they are logged, the
    /// server stays initialized, and the method returns `false`.
    ///
    /// # Panics
    ///
    /// Panics when the server is not initialized or an accept is already in
    /// flight.
    pub async fn wait_for_connection(&self, cancel: CancellationToken) -> bool {
        let listener = {
            let mut inner = self.lock_inner();
            lifecycle::require(inner.state, LifecycleState::Initialized, "wait_for_connection");
            inner.state = LifecycleState::Connecting;
            Arc::clone(
                inner
                    .listener
                    .as_ref()
                    .expect("initialized server always has a listener"),
            )
        };

        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("wait for connection cancelled");
                None
            }
            result = listener.accept() => match result {
                Ok(accepted) => Some(accepted),
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    None
                }
            },
        };

        let Some((stream, peer)) = accepted else {
            self.revert_to_initialized();
            return false;
        };

        let connection = Connection::new(stream, self.codec.clone(), self.config.clone());
        let mut inner = self.lock_inner();
        if inner.state != LifecycleState::Connecting {
            // close() won the race; the accepted stream just gets dropped.
            tracing::debug!(peer = %peer, "discarding stream, server closed during accept");
            return false;
        }
        inner.connection = Some(connection);
        inner.state = LifecycleState::Connected;
        tracing::debug!(peer = %peer, "peer connected");
        true
    }

    /// Address the listener is actually bound to. Useful after binding port
    /// zero.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    ///
    /// # Panics
    ///
    /// Panics before [`IpcServer::initialize`].
    pub fn local_addr(&self) -> std::io::Result<String> {
        let inner = self.lock_inner();
        match &inner.listener {
            Some(listener) => listener.local_addr(),
            None => panic!("no listener bound yet, the server is {}", inner.state),
        }
    }

    /// Start the background read loop on the attached connection.
    ///
    /// # Panics
    ///
    /// Panics unless a peer is attached and no loop has been started.
    pub fn begin_read(&self, cancel: CancellationToken) {
        let mut inner = self.lock_inner();
        lifecycle::require(inner.state, LifecycleState::Connected, "begin_read");
        inner
            .connection
            .as_ref()
            .expect("connected server always has a connection")
            .begin_read(cancel);
        inner.state = LifecycleState::ReadActive;
    }

    /// The attached connection, for registering callbacks and messaging.
    ///
    /// # Panics
    ///
    /// Panics before a peer has attached.
    pub fn connection(&self) -> Arc<Connection<T, P::Stream, C>> {
        let inner = self.lock_inner();
        match &inner.connection {
            Some(connection) => Arc::clone(connection),
            None => panic!(
                "no connection attached yet, the server is {}",
                inner.state
            ),
        }
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> LifecycleState {
        self.lock_inner().state
    }

    /// Close the server: stop listening and close the attached connection,
    /// if any. Idempotent; the server cannot be reused afterwards.
    pub async fn close(&self) {
        let connection = {
            let mut inner = self.lock_inner();
            if inner.state == LifecycleState::Closed {
                return;
            }
            inner.state = LifecycleState::Closed;
            inner.listener = None;
            inner.connection.take()
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
        tracing::debug!("server closed");
    }

    fn revert_to_initialized(&self) {
        let mut inner = self.lock_inner();
        if inner.state == LifecycleState::Connecting {
            inner.state = LifecycleState::Initialized;
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, ServerInner<T, P, C>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    enum ProbeTag {
        Ping,
    }

    #[tokio::test]
    async fn initialize_binds_and_reports_the_local_addr() {
        let server: IpcServer<ProbeTag, _, _> = IpcServer::tcp();
        server.initialize("127.0.0.1:0").await.unwrap();
        assert_eq!(server.state(), LifecycleState::Initialized);
        let addr = server.local_addr().unwrap();
        assert!(addr.starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    #[should_panic(expected = "initialize requires uninitialized state")]
    async fn double_initialize_fails_fast() {
        let server: IpcServer<ProbeTag, _, _> = IpcServer::tcp();
        server.initialize("127.0.0.1:0").await.unwrap();
        let _ = server.initialize("127.0.0.1:0").await;
    }

    #[tokio::test]
    #[should_panic(expected = "wait_for_connection requires initialized state")]
    async fn wait_before_initialize_fails_fast() {
        let server: IpcServer<ProbeTag, _, _> = IpcServer::tcp();
        let _ = server.wait_for_connection(CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported_and_leaves_the_server_uninitialized() {
        let server: IpcServer<ProbeTag, _, _> = IpcServer::tcp();
        assert!(server.initialize("256.256.256.256:0").await.is_err());
        assert_eq!(server.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn cancelled_wait_returns_false_promptly() {
        let server: IpcServer<ProbeTag, _, _> = IpcServer::tcp();
        server.initialize("127.0.0.1:0").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let attached = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            server.wait_for_connection(cancel),
        )
        .await
        .expect("cancelled wait must return promptly");

        assert!(!attached);
        assert_eq!(server.state(), LifecycleState::Initialized);
    }
}
