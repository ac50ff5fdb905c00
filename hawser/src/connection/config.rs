//! Configuration for connection behavior.

use std::time::Duration;

use crate::wire::DEFAULT_MAX_FRAME_LEN;

/// Tunable limits for one connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Cap on a single frame body, enforced on both send and receive.
    ///
    /// Protects the reader from corrupt length prefixes; must comfortably
    /// exceed the largest payload the application exchanges.
    pub max_frame_len: usize,

    /// Write timeout for replies produced by request handlers.
    ///
    /// Handler replies are written from the read loop, which has no caller
    /// to supply a timeout; this bound keeps a stalled peer from wedging the
    /// loop forever.
    pub reply_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    /// Override the frame-body cap.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Override the handler-reply write timeout.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_generous() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.reply_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builders_override_fields() {
        let config = ConnectionConfig::default()
            .with_max_frame_len(1024)
            .with_reply_timeout(Duration::from_millis(250));
        assert_eq!(config.max_frame_len, 1024);
        assert_eq!(config.reply_timeout, Duration::from_millis(250));
    }
}
