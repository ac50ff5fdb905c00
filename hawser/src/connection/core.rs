//! Core connection implementation and read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use hawser_core::{CallbackToken, MessageCodec, MessageId, PayloadType};

use crate::callbacks::CallbackRegistry;
use crate::connection::config::ConnectionConfig;
use crate::connection::error::{InvokeError, SendError};
use crate::envelope::{Envelope, Tag};
use crate::wire::{self, WireError};

/// One live messaging connection over an open duplex stream.
///
/// Generic over the application tag type `T`, the stream `S`, and the codec
/// `C`. All methods take `&self` and are safe to call from arbitrary tasks
/// concurrently with the background read loop; internally the write half sits
/// behind a lock, and the registry and pending table each have their own.
///
/// A connection is spent once its read loop ends; create a new one for a new
/// stream.
pub struct Connection<T, S, C> {
    /// Shared with detached write tasks; frames are written whole under this
    /// lock, in lock-queue order.
    writer: Arc<AsyncMutex<WriteHalf<S>>>,
    /// Taken exactly once by [`Connection::begin_read`].
    reader: StdMutex<Option<ReadHalf<S>>>,
    callbacks: CallbackRegistry<T, C>,
    pending: StdMutex<HashMap<MessageId, oneshot::Sender<Envelope<T>>>>,
    codec: C,
    config: ConnectionConfig,
    read_active: AtomicBool,
    reading_ended_tx: StdMutex<Option<oneshot::Sender<()>>>,
    reading_ended_rx: StdMutex<Option<oneshot::Receiver<()>>>,
    /// Local close signal; the read loop observes it like a cancellation.
    shutdown: CancellationToken,
}

impl<T, S, C> Connection<T, S, C>
where
    T: Tag,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: MessageCodec,
{
    /// Wrap an already-open duplex stream.
    ///
    /// The stream is split immediately: the write half goes behind the
    /// connection's write lock, the read half waits for
    /// [`Connection::begin_read`].
    pub fn new(stream: S, codec: C, config: ConnectionConfig) -> Arc<Self> {
        let (read_half, write_half) = split(stream);
        let (ended_tx, ended_rx) = oneshot::channel();
        Arc::new(Self {
            writer: Arc::new(AsyncMutex::new(write_half)),
            reader: StdMutex::new(Some(read_half)),
            callbacks: CallbackRegistry::new(),
            pending: StdMutex::new(HashMap::new()),
            codec,
            config,
            read_active: AtomicBool::new(false),
            reading_ended_tx: StdMutex::new(Some(ended_tx)),
            reading_ended_rx: StdMutex::new(Some(ended_rx)),
            shutdown: CancellationToken::new(),
        })
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a fire-and-forget callback for payloads of type `P` under
    /// `tag`. Additive: existing registrations stay.
    pub fn on<P, F>(&self, tag: T, callback: F) -> CallbackToken
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        self.callbacks.add_action(tag, callback)
    }

    /// Register a request handler for payloads of type `P` under `tag`. Its
    /// awaited result is encoded and written back as the reply.
    pub fn on_invoke<P, R, F, Fut>(&self, tag: T, handler: F) -> CallbackToken
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
    {
        self.callbacks.add_handler(tag, handler)
    }

    /// Register a parameterless request handler under `tag`; it answers
    /// every envelope carrying that tag regardless of payload.
    pub fn on_invoke_any<R, F, Fut>(&self, tag: T, handler: F) -> CallbackToken
    where
        R: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
    {
        self.callbacks.add_handler_any(tag, handler)
    }

    /// Remove every registration under `tag`. Returns how many were removed;
    /// zero when none existed.
    pub fn off(&self, tag: &T) -> usize {
        self.callbacks.remove_all(tag)
    }

    /// Remove the single registration identified by `token` under `tag`.
    /// No-op when absent; returns whether anything was removed.
    pub fn off_one(&self, tag: &T, token: CallbackToken) -> bool {
        self.callbacks.remove_one(tag, token)
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Fire-and-forget: encode `payload`, frame it, and write it within
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// [`SendError::Timeout`] when the write does not complete in time
    /// (including time spent queued behind the write lock), otherwise the
    /// encode or stream failure. Every failure is also logged. A timed-out
    /// write is not retracted; the frame may still reach the peer.
    ///
    /// # Panics
    ///
    /// Panics when `timeout` is zero.
    pub async fn send<P: Serialize>(
        &self,
        tag: T,
        payload: &P,
        timeout: Duration,
    ) -> Result<(), SendError> {
        assert!(!timeout.is_zero(), "send timeout must be greater than zero");

        let result = self.encode_and_write(tag, payload, timeout).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "send failed");
        }
        result
    }

    async fn encode_and_write<P: Serialize>(
        &self,
        tag: T,
        payload: &P,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let content = self.codec.encode(payload)?;
        let envelope = Envelope::with_payload(tag, PayloadType::of::<P>(), content);
        self.write_envelope(&envelope, timeout).await
    }

    /// Request/response: send `payload` and wait for the correlated reply.
    ///
    /// A pending entry keyed by the request id is created before the write
    /// and removed again on every exit path; a reply arriving after timeout
    /// finds no entry and is dropped by the read loop.
    ///
    /// # Errors
    ///
    /// [`InvokeError::Timeout`] when no reply arrives in time,
    /// [`InvokeError::ConnectionClosed`] when the read loop ends while
    /// waiting, [`InvokeError::DuplicateId`] on the defensive id-collision
    /// check (nothing is sent), or the underlying send/decode failure.
    ///
    /// # Panics
    ///
    /// Panics when `timeout` is zero.
    pub async fn invoke<P, R>(&self, tag: T, payload: &P, timeout: Duration) -> Result<R, InvokeError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        assert!(!timeout.is_zero(), "invoke timeout must be greater than zero");

        let content = self.codec.encode(payload).map_err(SendError::from)?;
        let envelope = Envelope::with_payload(tag, PayloadType::of::<P>(), content);
        let id = envelope.id;

        let reply_rx = {
            let mut pending = self.lock_pending();
            if pending.contains_key(&id) {
                tracing::warn!(request = %id, "request id collision; refusing to send");
                return Err(InvokeError::DuplicateId { id });
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(id, tx);
            rx
        };

        if let Err(e) = self.write_envelope(&envelope, timeout).await {
            self.lock_pending().remove(&id);
            tracing::warn!(request = %id, error = %e, "invoke failed to send");
            return Err(e.into());
        }

        let outcome = tokio::time::timeout(timeout, reply_rx).await;
        // The entry is normally consumed by the read loop on resolution;
        // this sweep covers the timeout and closed paths.
        self.lock_pending().remove(&id);

        match outcome {
            Err(_) => {
                tracing::warn!(request = %id, ?timeout, "invoke timed out");
                Err(InvokeError::Timeout { timeout })
            }
            Ok(Err(_)) => {
                tracing::warn!(request = %id, "connection closed while waiting for reply");
                Err(InvokeError::ConnectionClosed)
            }
            Ok(Ok(reply)) => self
                .codec
                .decode(&reply.content)
                .map_err(InvokeError::Decode),
        }
    }

    /// Frame and write one envelope under the write lock, waiting at most
    /// `timeout` for the outcome. Lock wait counts toward the bound.
    ///
    /// The write itself runs detached and is never cancelled: a frame cut
    /// short on timeout would leave the stream misaligned for every later
    /// frame. On timeout the caller stops waiting, but the bytes may still
    /// reach the peer.
    async fn write_envelope(
        &self,
        envelope: &Envelope<T>,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let bytes = self.codec.encode(envelope)?;
        let writer = Arc::clone(&self.writer);
        let max_frame_len = self.config.max_frame_len;
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            let result = wire::write_frame(&mut *writer, &bytes, max_frame_len).await;
            // The caller may have stopped waiting already.
            let _ = done_tx.send(result);
        });

        match tokio::time::timeout(timeout, done_rx).await {
            Err(_) => Err(SendError::Timeout { timeout }),
            Ok(Err(_)) => Err(SendError::Wire(WireError::Io(
                "write task dropped before completing".to_string(),
            ))),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Read loop
    // ------------------------------------------------------------------

    /// Start the background read loop for this connection.
    ///
    /// Exactly one loop may ever run per connection. The loop exits when the
    /// peer closes the stream, `cancel` fires, [`Connection::close`] is
    /// called, or the stream fails; it then fires the one-shot
    /// [`Connection::reading_ended`] notification.
    ///
    /// # Panics
    ///
    /// Panics when a read loop for this connection is already active or has
    /// already run: a second reader must never start.
    pub fn begin_read(self: &Arc<Self>, cancel: CancellationToken) {
        let reader = {
            let mut slot = match self.reader.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slot.take() {
                Some(reader) => reader,
                None => panic!("read loop already started for this connection"),
            }
        };

        self.read_active.store(true, Ordering::SeqCst);
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.read_loop(reader, cancel).await;
        });
    }

    async fn read_loop(self: Arc<Self>, mut reader: ReadHalf<S>, cancel: CancellationToken) {
        tracing::debug!("read loop started");
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("read loop cancelled");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("connection closed locally");
                    break;
                }
                frame = wire::read_frame(&mut reader, self.config.max_frame_len) => frame,
            };

            match frame {
                Ok(bytes) => self.process_frame(&bytes).await,
                Err(WireError::ConnectionClosed) => {
                    tracing::debug!("peer closed the stream");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unrecoverable stream error; stopping read loop");
                    break;
                }
            }
        }
        self.finish_read_loop();
    }

    /// Decode and dispatch one frame. Failures are contained here: a bad
    /// message never stops the loop.
    async fn process_frame(&self, bytes: &[u8]) {
        let envelope: Envelope<T> = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable envelope");
                return;
            }
        };

        if let Some(request_id) = envelope.response_to {
            // A reply is consumed entirely here; the registry never sees it.
            let waiter = self.lock_pending().remove(&request_id);
            match waiter {
                Some(tx) => {
                    // The invoker may have timed out in the meantime; a
                    // failed send here is the same late-reply case.
                    let _ = tx.send(envelope);
                }
                None => {
                    tracing::debug!(request = %request_id, "dropping late reply");
                }
            }
            return;
        }

        let envelope_id = envelope.id;
        let actions = self.callbacks.dispatch_actions(&self.codec, &envelope);
        let replies = self
            .callbacks
            .dispatch_handlers(&self.codec, &envelope, |reply| async move {
                self.write_envelope(&reply, self.config.reply_timeout).await
            })
            .await;
        if actions + replies > 0 {
            tracing::debug!(envelope = %envelope_id, actions, replies, "dispatched");
        }
    }

    fn finish_read_loop(&self) {
        self.read_active.store(false, Ordering::SeqCst);

        // Outstanding invokes can never resolve now; dropping their senders
        // fails them immediately instead of letting them run out their
        // timeouts.
        let abandoned = {
            let mut pending = self.lock_pending();
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            tracing::debug!(count = abandoned, "abandoning pending invokes");
        }

        let ended = {
            let mut slot = match self.reading_ended_tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(tx) = ended {
            // The consumer may have gone away; that is fine.
            let _ = tx.send(());
        }
        tracing::debug!("read loop ended");
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// One-shot notification fired when the read loop exits for any reason.
    ///
    /// There is exactly one: the first caller gets the receiver, later calls
    /// get `None`. The connection registry collaborator awaits it to evict
    /// the connection.
    pub fn reading_ended(&self) -> Option<oneshot::Receiver<()>> {
        match self.reading_ended_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Whether the read loop is currently running.
    pub fn is_reading(&self) -> bool {
        self.read_active.load(Ordering::SeqCst)
    }

    /// Number of invokes currently awaiting replies.
    pub fn pending_invoke_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Close the connection: stop the read loop and shut down the write
    /// side. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut writer = self.writer.lock().await;
        // The stream may already be gone; nothing useful to do about it.
        let _ = writer.shutdown().await;
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<MessageId, oneshot::Sender<Envelope<T>>>> {
        // User code never runs under this lock, so poisoning only means a
        // panic between guarded statements; the map itself is sound.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hawser_core::JsonCodec;
    use serde::Deserialize;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum ProbeTag {
        Ping,
    }

    fn pair() -> (
        Arc<Connection<ProbeTag, tokio::io::DuplexStream, JsonCodec>>,
        Arc<Connection<ProbeTag, tokio::io::DuplexStream, JsonCodec>>,
    ) {
        let (left, right) = tokio::io::duplex(256 * 1024);
        (
            Connection::new(left, JsonCodec, ConnectionConfig::default()),
            Connection::new(right, JsonCodec, ConnectionConfig::default()),
        )
    }

    #[tokio::test]
    async fn send_writes_a_decodable_frame() {
        let (sender, receiver) = pair();
        sender
            .send(ProbeTag::Ping, &"hello".to_string(), Duration::from_secs(1))
            .await
            .unwrap();

        // Read the raw frame off the peer's stream directly.
        let mut reader = receiver.reader.lock().unwrap().take().unwrap();
        let bytes = wire::read_frame(&mut reader, wire::DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();
        let envelope: Envelope<ProbeTag> = JsonCodec.decode(&bytes).unwrap();

        assert_eq!(envelope.message_type, ProbeTag::Ping);
        assert_eq!(envelope.payload_type, Some(PayloadType::of::<String>()));
        assert!(envelope.response_to.is_none());
        let text: String = JsonCodec.decode(&envelope.content).unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn send_on_closed_stream_reports_failure() {
        let (sender, receiver) = pair();
        drop(receiver);

        let mut failed = false;
        // The duplex buffer may absorb a few frames before the closed end
        // is observed; keep writing until the failure surfaces.
        for _ in 0..64 {
            let big = vec![0u8; 128 * 1024];
            if sender
                .send(ProbeTag::Ping, &big, Duration::from_millis(500))
                .await
                .is_err()
            {
                failed = true;
                break;
            }
        }
        assert!(failed, "writes to a closed stream must eventually fail");
    }

    #[tokio::test]
    #[should_panic(expected = "read loop already started")]
    async fn begin_read_twice_fails_fast() {
        let (connection, _peer) = pair();
        connection.begin_read(CancellationToken::new());
        connection.begin_read(CancellationToken::new());
    }

    #[tokio::test]
    #[should_panic(expected = "timeout must be greater than zero")]
    async fn zero_send_timeout_is_misuse() {
        let (connection, _peer) = pair();
        let _ = connection
            .send(ProbeTag::Ping, &1u32, Duration::ZERO)
            .await;
    }

    #[tokio::test]
    async fn invoke_cleans_its_pending_entry_on_timeout() {
        let (connection, peer) = pair();
        connection.begin_read(CancellationToken::new());
        peer.begin_read(CancellationToken::new());
        // No handler registered on the peer: the invoke must time out.

        let started = std::time::Instant::now();
        let result: Result<String, _> = connection
            .invoke(ProbeTag::Ping, &"hello", Duration::from_millis(200))
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(InvokeError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
        assert_eq!(connection.pending_invoke_count(), 0);
    }

    #[tokio::test]
    async fn reading_ended_is_handed_out_once() {
        let (connection, _peer) = pair();
        assert!(connection.reading_ended().is_some());
        assert!(connection.reading_ended().is_none());
    }

    #[tokio::test]
    async fn close_stops_the_read_loop() {
        let (connection, _peer) = pair();
        let ended = connection.reading_ended().unwrap();
        connection.begin_read(CancellationToken::new());
        assert!(connection.is_reading());

        connection.close().await;
        ended.await.unwrap();
        assert!(!connection.is_reading());
    }
}
