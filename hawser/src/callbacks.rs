//! Per-connection callback registry.
//!
//! Registrations are keyed by message-type tag and, within a tag, by
//! payload-type descriptor. Two kinds exist: fire-and-forget actions and
//! request/response handlers. Both are stored type-erased behind closures
//! that decode the payload themselves, so the registry never inspects
//! payload bytes.
//!
//! Dispatch snapshots the matching entries under the registry lock and
//! invokes them after releasing it. A callback may therefore register or
//! remove entries itself, and in-flight dispatch is never disrupted by
//! concurrent (de)registration.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};

use hawser_core::{CallbackToken, CodecError, MessageCodec, PayloadType};

use crate::envelope::{Envelope, Tag};

/// Decodes the payload and runs one fire-and-forget callback.
type ErasedAction<C> = Arc<dyn Fn(&C, &[u8]) -> Result<(), CodecError> + Send + Sync>;

/// Decodes the payload, runs one handler, and encodes its result.
type ErasedHandler<C> =
    Arc<dyn Fn(&C, &[u8]) -> BoxFuture<'static, Result<(PayloadType, Vec<u8>), CodecError>> + Send + Sync>;

struct ActionEntry<C> {
    token: CallbackToken,
    payload_type: PayloadType,
    callback: ErasedAction<C>,
}

struct HandlerEntry<C> {
    token: CallbackToken,
    /// `None` marks the parameterless form, which matches any payload under
    /// its tag and ignores `content`.
    payload_type: Option<PayloadType>,
    handler: ErasedHandler<C>,
}

struct TagBucket<C> {
    actions: Vec<ActionEntry<C>>,
    handlers: Vec<HandlerEntry<C>>,
}

impl<C> TagBucket<C> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            handlers: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.handlers.is_empty()
    }

    fn len(&self) -> usize {
        self.actions.len() + self.handlers.len()
    }
}

/// Store of registered callbacks for one connection.
///
/// Registration is additive: multiple entries under the same key all fire,
/// in registration order. Every registration returns its own
/// [`CallbackToken`] for selective removal.
pub struct CallbackRegistry<T, C> {
    buckets: Mutex<HashMap<T, TagBucket<C>>>,
}

impl<T: Tag, C: MessageCodec> CallbackRegistry<T, C> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fire-and-forget callback for payloads of type `P` under
    /// `tag`.
    pub fn add_action<P, F>(&self, tag: T, callback: F) -> CallbackToken
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        let erased: ErasedAction<C> = Arc::new(move |codec, bytes| {
            let payload: P = codec.decode(bytes)?;
            callback(payload);
            Ok(())
        });
        let token = CallbackToken::random();
        let mut buckets = self.lock_buckets();
        buckets
            .entry(tag)
            .or_insert_with(TagBucket::new)
            .actions
            .push(ActionEntry {
                token,
                payload_type: PayloadType::of::<P>(),
                callback: erased,
            });
        token
    }

    /// Register a request handler for payloads of type `P` under `tag`.
    ///
    /// The handler's awaited result is encoded and sent back as the reply.
    pub fn add_handler<P, R, F, Fut>(&self, tag: T, handler: F) -> CallbackToken
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let erased: ErasedHandler<C> = Arc::new(move |codec, bytes| {
            let payload: Result<P, CodecError> = codec.decode(bytes);
            match payload {
                Err(e) => futures::future::ready(Err(e)).boxed(),
                Ok(payload) => {
                    let fut = handler(payload);
                    let codec = codec.clone();
                    async move {
                        let result = fut.await;
                        let content = codec.encode(&result)?;
                        Ok((PayloadType::of::<R>(), content))
                    }
                    .boxed()
                }
            }
        });
        self.push_handler(tag, Some(PayloadType::of::<P>()), erased)
    }

    /// Register a parameterless handler under `tag`.
    ///
    /// Matches every envelope carrying that tag regardless of payload and
    /// ignores `content`.
    pub fn add_handler_any<R, F, Fut>(&self, tag: T, handler: F) -> CallbackToken
    where
        R: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let erased: ErasedHandler<C> = Arc::new(move |codec, _bytes| {
            let fut = handler();
            let codec = codec.clone();
            async move {
                let result = fut.await;
                let content = codec.encode(&result)?;
                Ok((PayloadType::of::<R>(), content))
            }
            .boxed()
        });
        self.push_handler(tag, None, erased)
    }

    fn push_handler(
        &self,
        tag: T,
        payload_type: Option<PayloadType>,
        handler: ErasedHandler<C>,
    ) -> CallbackToken {
        let token = CallbackToken::random();
        let mut buckets = self.lock_buckets();
        buckets
            .entry(tag)
            .or_insert_with(TagBucket::new)
            .handlers
            .push(HandlerEntry {
                token,
                payload_type,
                handler,
            });
        token
    }

    /// Drop every registration under `tag`. Returns how many were removed;
    /// zero when none existed.
    pub fn remove_all(&self, tag: &T) -> usize {
        let mut buckets = self.lock_buckets();
        buckets.remove(tag).map_or(0, |bucket| bucket.len())
    }

    /// Drop the single registration identified by `token` under `tag`, if
    /// present. Returns whether anything was removed.
    pub fn remove_one(&self, tag: &T, token: CallbackToken) -> bool {
        let mut buckets = self.lock_buckets();
        let Some(bucket) = buckets.get_mut(tag) else {
            return false;
        };

        let removed = if let Some(i) = bucket.actions.iter().position(|e| e.token == token) {
            bucket.actions.remove(i);
            true
        } else if let Some(i) = bucket.handlers.iter().position(|e| e.token == token) {
            bucket.handlers.remove(i);
            true
        } else {
            false
        };

        if bucket.is_empty() {
            buckets.remove(tag);
        }
        removed
    }

    /// Number of registrations currently held under `tag`.
    pub fn count(&self, tag: &T) -> usize {
        self.lock_buckets().get(tag).map_or(0, TagBucket::len)
    }

    /// Run every fire-and-forget callback matching the envelope's key, in
    /// registration order. Returns how many ran.
    ///
    /// Failures are isolated per callback: a decode error or a panic in one
    /// callback is logged and never aborts the remaining callbacks.
    pub fn dispatch_actions(&self, codec: &C, envelope: &Envelope<T>) -> usize {
        let matching: Vec<ErasedAction<C>> = {
            let buckets = self.lock_buckets();
            let Some(bucket) = buckets.get(&envelope.message_type) else {
                return 0;
            };
            bucket
                .actions
                .iter()
                .filter(|e| Some(&e.payload_type) == envelope.payload_type.as_ref())
                .map(|e| Arc::clone(&e.callback))
                .collect()
        };

        let mut ran = 0;
        for callback in matching {
            match catch_unwind(AssertUnwindSafe(|| callback(codec, &envelope.content))) {
                Ok(Ok(())) => ran += 1,
                Ok(Err(e)) => {
                    tracing::warn!(envelope = %envelope.id, error = %e, "callback could not decode payload");
                }
                Err(panic) => {
                    tracing::warn!(
                        envelope = %envelope.id,
                        panic = %panic_message(&panic),
                        "callback panicked"
                    );
                }
            }
        }
        ran
    }

    /// Run every request handler matching the envelope's key, in
    /// registration order, awaiting each before the next. Every successful
    /// result is wrapped in a reply envelope correlated to `envelope.id` and
    /// passed to `reply`. Returns how many replies were produced.
    ///
    /// Failures are isolated per handler: a decode error, an encode error,
    /// or a panic is logged and no reply is sent for that handler; the
    /// remaining handlers still run.
    pub async fn dispatch_handlers<F, Fut, E>(
        &self,
        codec: &C,
        envelope: &Envelope<T>,
        reply: F,
    ) -> usize
    where
        F: Fn(Envelope<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let matching: Vec<ErasedHandler<C>> = {
            let buckets = self.lock_buckets();
            let Some(bucket) = buckets.get(&envelope.message_type) else {
                return 0;
            };
            bucket
                .handlers
                .iter()
                .filter(|e| match &e.payload_type {
                    None => true,
                    Some(registered) => Some(registered) == envelope.payload_type.as_ref(),
                })
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };

        let mut replied = 0;
        for handler in matching {
            let outcome = AssertUnwindSafe(handler(codec, &envelope.content))
                .catch_unwind()
                .await;
            match outcome {
                Err(panic) => {
                    tracing::warn!(
                        envelope = %envelope.id,
                        panic = %panic_message(&panic),
                        "handler panicked; no reply sent"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(envelope = %envelope.id, error = %e, "handler failed; no reply sent");
                }
                Ok(Ok((payload_type, content))) => {
                    let reply_envelope = Envelope::reply_to(envelope, payload_type, content);
                    match reply(reply_envelope).await {
                        Ok(()) => replied += 1,
                        Err(e) => {
                            tracing::warn!(envelope = %envelope.id, error = %e, "failed to write handler reply");
                        }
                    }
                }
            }
        }
        replied
    }

    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, HashMap<T, TagBucket<C>>> {
        // A poisoned lock means a panic while touching the map itself, not
        // inside user callbacks (those run outside the lock); the map is
        // still structurally sound.
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Tag, C: MessageCodec> Default for CallbackRegistry<T, C> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
