//! Named registry of live connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};

use hawser_core::MessageCodec;

use crate::connection::Connection;
use crate::envelope::Tag;

/// Tracks live connections by name and evicts them when their read loops
/// end.
///
/// The router is a consumer of connections, not a factory: endpoints
/// establish connections, then hand them over with [`ConnectionRouter::register`].
/// Registering subscribes to the connection's one-shot reading-ended
/// notification; when the loop exits for any reason the entry removes
/// itself, so lookups never return a connection whose reader is gone.
///
/// Each router is an explicitly constructed, explicitly passed value. Share
/// one by cloning its `Arc`.
pub struct ConnectionRouter<T, S, C> {
    connections: Mutex<HashMap<String, Arc<Connection<T, S, C>>>>,
}

impl<T, S, C> ConnectionRouter<T, S, C>
where
    T: Tag,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: MessageCodec,
{
    /// Empty router. Wrap it in an [`Arc`] to register connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Track `connection` under `name` and arrange its eviction.
    ///
    /// Returns `false` without registering when the name is already in use.
    /// The eviction task holds only a weak reference: dropping the router
    /// never leaks a task that outlives it.
    pub fn register(
        self: &Arc<Self>,
        name: impl Into<String>,
        connection: Arc<Connection<T, S, C>>,
    ) -> bool {
        let name = name.into();
        {
            let mut connections = self.lock_connections();
            if connections.contains_key(&name) {
                tracing::warn!(name = %name, "connection name already in use");
                return false;
            }
            connections.insert(name.clone(), Arc::clone(&connection));
        }

        match connection.reading_ended() {
            Some(ended) => {
                let router = Arc::downgrade(self);
                let registered = name.clone();
                tokio::spawn(async move {
                    // A dropped sender means the connection went away without
                    // its loop ever finishing; that evicts just the same.
                    let _ = ended.await;
                    let Some(router) = router.upgrade() else {
                        return;
                    };
                    if router.unregister(&registered).is_some() {
                        tracing::debug!(name = %registered, "connection evicted");
                    } else {
                        tracing::warn!(name = %registered, "connection not found");
                    }
                });
            }
            None => {
                tracing::warn!(
                    name = %name,
                    "reading-ended notification already claimed, connection will not self-evict"
                );
            }
        }

        tracing::debug!(name = %name, "connection registered");
        true
    }

    /// The connection registered under `name`, if still live.
    pub fn lookup(&self, name: &str) -> Option<Arc<Connection<T, S, C>>> {
        self.lock_connections().get(name).map(Arc::clone)
    }

    /// Remove and return the connection registered under `name`.
    pub fn unregister(&self, name: &str) -> Option<Arc<Connection<T, S, C>>> {
        self.lock_connections().remove(name)
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.lock_connections().len()
    }

    /// Whether no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.lock_connections().is_empty()
    }

    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Arc<Connection<T, S, C>>>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T, S, C> Default for ConnectionRouter<T, S, C>
where
    T: Tag,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: MessageCodec,
{
    fn default() -> Self {
        Self::new()
    }
}
