//! Connection tuning options

use std::time::Duration;

/// Per-connection engine options
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Read deadline, refreshed on every inbound frame or pong
    pub read_timeout: Duration,

    /// Write deadline applied per outbound frame
    pub write_timeout: Duration,

    /// Interval between keepalive pings
    pub ping_interval: Duration,

    /// Maximum accepted inbound frame size in bytes
    pub max_message_size: usize,

    /// Bounded send queue capacity
    pub send_queue_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            max_message_size: 512 * 1024, // 512KB
            send_queue_capacity: 256,
        }
    }
}

impl ConnectionOptions {
    /// Set the read deadline
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the per-frame write deadline
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the maximum inbound frame size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the send queue capacity
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ConnectionOptions::default();

        assert_eq!(options.read_timeout, Duration::from_secs(60));
        assert_eq!(options.write_timeout, Duration::from_secs(10));
        assert_eq!(options.ping_interval, Duration::from_secs(30));
        assert_eq!(options.max_message_size, 512 * 1024);
        assert_eq!(options.send_queue_capacity, 256);
    }

    #[test]
    fn test_builder_chaining() {
        let options = ConnectionOptions::default()
            .read_timeout(Duration::from_secs(5))
            .write_timeout(Duration::from_secs(1))
            .ping_interval(Duration::from_secs(2))
            .max_message_size(1024)
            .send_queue_capacity(8);

        assert_eq!(options.read_timeout, Duration::from_secs(5));
        assert_eq!(options.write_timeout, Duration::from_secs(1));
        assert_eq!(options.ping_interval, Duration::from_secs(2));
        assert_eq!(options.max_message_size, 1024);
        assert_eq!(options.send_queue_capacity, 8);
    }
}
