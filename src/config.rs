//! Endpoint/connection configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: usize,
    pub max_message_size: usize,
    /// How long a worker task blocks on a single transport read before
    /// waking up to check for a shutdown request. Defaults to 300ms.
    pub read_poll_interval: Duration,
    /// How long an incomplete message may sit in the reassembly buffer
    /// before it is abandoned. Defaults to 30s.
    pub message_completion_timeout: Duration,
    /// How long `client_open` waits for the handshake to reach Connected
    /// before failing the open. Defaults to 30s.
    pub client_open_timeout: Duration,
    /// How long a connection may sit in `Handshake` without completing it
    /// before it is force-closed. Defaults to 30s.
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
            read_poll_interval: Duration::from_millis(300),
            message_completion_timeout: Duration::from_secs(30),
            client_open_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}
