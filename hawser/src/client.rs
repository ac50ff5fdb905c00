//! Client endpoint: actively connects to a named server.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hawser_core::{JsonCodec, MessageCodec, NetworkProvider, TcpNetworkProvider};

use crate::connection::{Connection, ConnectionConfig};
use crate::envelope::Tag;
use crate::lifecycle::{self, LifecycleState};

/// Connecting endpoint of a messaging pair.
///
/// Walks the endpoint lifecycle: [`IpcClient::initialize`] records the
/// target, [`IpcClient::connect`] dials it, [`IpcClient::begin_read`] starts
/// the read loop. Once connected, [`IpcClient::connection`] hands out the
/// [`Connection`] carrying the messaging surface (`on`, `send`, `invoke`).
///
/// Calling an operation out of lifecycle order panics; a refused or timed-out
/// connect does not, and leaves the client initialized for another attempt.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use hawser::IpcClient;
///
/// # #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// # #[derive(serde::Serialize, serde::Deserialize)]
/// # enum Kind { Ping }
/// # async fn run() {
/// let client: IpcClient<Kind, _, _> = IpcClient::tcp();
/// client.initialize("127.0.0.1:4600");
/// if client.connect(Duration::from_secs(5)).await {
///     client.begin_read(Default::default());
/// }
/// # }
/// ```
pub struct IpcClient<T, P, C>
where
    P: NetworkProvider,
{
    provider: P,
    codec: C,
    config: ConnectionConfig,
    inner: Mutex<ClientInner<T, P::Stream, C>>,
}

struct ClientInner<T, S, C> {
    state: LifecycleState,
    target: Option<String>,
    connection: Option<Arc<Connection<T, S, C>>>,
}

impl<T: Tag> IpcClient<T, TcpNetworkProvider, JsonCodec> {
    /// TCP client with the JSON codec and default configuration.
    pub fn tcp() -> Self {
        Self::new(TcpNetworkProvider, JsonCodec, ConnectionConfig::default())
    }
}

impl<T, P, C> IpcClient<T, P, C>
where
    T: Tag,
    P: NetworkProvider,
    C: MessageCodec,
{
    /// Client over an explicit transport provider and codec.
    pub fn new(provider: P, codec: C, config: ConnectionConfig) -> Self {
        Self {
            provider,
            codec,
            config,
            inner: Mutex::new(ClientInner {
                state: LifecycleState::Uninitialized,
                target: None,
                connection: None,
            }),
        }
    }

    /// Record the server address this client will dial.
    ///
    /// # Panics
    ///
    /// Panics when the client has already been initialized.
    pub fn initialize(&self, target: impl Into<String>) {
        let mut inner = self.lock_inner();
        lifecycle::require(inner.state, LifecycleState::Uninitialized, "initialize");
        inner.target = Some(target.into());
        inner.state = LifecycleState::Initialized;
    }

    /// Dial the configured target, waiting at most `timeout`.
    ///
    /// Returns `true` once the stream is attached. Refusal and timeout are
    /// expected outcomes, not errors: they are logged, the client stays
    /// initialized, and the method returns `false` so the caller can retry.
    ///
    /// # Panics
    ///
    /// Panics when the client is not initialized, when a connect is already
    /// in flight, or when `timeout` is zero.
    pub async fn connect(&self, timeout: Duration) -> bool {
        assert!(!timeout.is_zero(), "connect timeout must be greater than zero");
        let target = {
            let mut inner = self.lock_inner();
            lifecycle::require(inner.state, LifecycleState::Initialized, "connect");
            inner.state = LifecycleState::Connecting;
            inner
                .target
                .clone()
                .expect("initialized client always has a target")
        };

        match tokio::time::timeout(timeout, self.provider.connect(&target)).await {
            Ok(Ok(stream)) => {
                let connection = Connection::new(stream, self.codec.clone(), self.config.clone());
                let mut inner = self.lock_inner();
                if inner.state != LifecycleState::Connecting {
                    // close() won the race; the fresh stream just gets dropped.
                    tracing::debug!(target = %target, "discarding stream, client closed during connect");
                    return false;
                }
                inner.connection = Some(connection);
                inner.state = LifecycleState::Connected;
                tracing::debug!(target = %target, "connected");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(target = %target, error = %e, "connect failed");
                self.revert_to_initialized();
                false
            }
            Err(_) => {
                tracing::warn!(target = %target, ?timeout, "connect timed out");
                self.revert_to_initialized();
                false
            }
        }
    }

    /// Start the background read loop on the attached connection.
    ///
    /// # Panics
    ///
    /// Panics unless the client is connected and no loop has been started.
    pub fn begin_read(&self, cancel: CancellationToken) {
        let mut inner = self.lock_inner();
        lifecycle::require(inner.state, LifecycleState::Connected, "begin_read");
        inner
            .connection
            .as_ref()
            .expect("connected client always has a connection")
            .begin_read(cancel);
        inner.state = LifecycleState::ReadActive;
    }

    /// The attached connection, for registering callbacks and messaging.
    ///
    /// # Panics
    ///
    /// Panics before a successful [`IpcClient::connect`].
    pub fn connection(&self) -> Arc<Connection<T, P::Stream, C>> {
        let inner = self.lock_inner();
        match &inner.connection {
            Some(connection) => Arc::clone(connection),
            None => panic!(
                "no connection attached yet, the client is {}",
                inner.state
            ),
        }
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> LifecycleState {
        self.lock_inner().state
    }

    /// Close the client and its connection, if any. Idempotent; the client
    /// cannot be reused afterwards.
    pub async fn close(&self) {
        let connection = {
            let mut inner = self.lock_inner();
            if inner.state == LifecycleState::Closed {
                return;
            }
            inner.state = LifecycleState::Closed;
            inner.connection.take()
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
        tracing::debug!("client closed");
    }

    fn revert_to_initialized(&self) {
        let mut inner = self.lock_inner();
        if inner.state == LifecycleState::Connecting {
            inner.state = LifecycleState::Initialized;
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, ClientInner<T, P::Stream, C>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
