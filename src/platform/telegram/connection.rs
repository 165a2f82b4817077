// ABOUTME: Reachability tracking for the Telegram transport
// ABOUTME: Poll results and network-level send errors drive the outbound queue's connected state

use courier_core::OutboundQueue;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use teloxide::RequestError;

const FIRST_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(30);

/// Delay before the next poll after `failures` consecutive failed polls
pub fn retry_delay(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    FIRST_RETRY.saturating_mul(1 << doublings).min(MAX_RETRY)
}

/// Errors that mean Telegram could not be reached at all, as opposed to
/// Telegram rejecting the request
pub fn is_unreachable(err: &RequestError) -> bool {
    matches!(err, RequestError::Network(_) | RequestError::Io(_))
}

#[derive(Debug)]
pub struct Connection {
    connected: AtomicBool,
    failed_polls: AtomicU32,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            failed_polls: AtomicU32::new(0),
        }
    }
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn failed_polls(&self) -> u32 {
        self.failed_polls.load(Ordering::Acquire)
    }

    /// A poll succeeded: mark reachable and flush anything held while offline
    pub async fn poll_succeeded(&self, queue: &OutboundQueue) -> usize {
        let failures = self.failed_polls.swap(0, Ordering::AcqRel);
        let was_connected = self.connected.swap(true, Ordering::AcqRel);
        if failures > 0 || !was_connected {
            tracing::info!(platform = "telegram", failures, "Reconnected");
        }
        queue.mark_connected().await
    }

    /// A poll failed: hold outbound messages and return how long to back off
    pub fn poll_failed(&self, queue: &OutboundQueue) -> Duration {
        self.connected.store(false, Ordering::Release);
        queue.mark_disconnected();
        let failures = self.failed_polls.fetch_add(1, Ordering::AcqRel) + 1;
        retry_delay(failures)
    }

    /// Record a failed API call. Returns true when it means Telegram is unreachable,
    /// in which case the transport reports itself disconnected until the next good poll.
    pub fn request_failed(&self, err: &RequestError) -> bool {
        if !is_unreachable(err) {
            return false;
        }
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::warn!(platform = "telegram", error = %err, "Telegram unreachable, holding replies");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use courier_core::Transport;
    use std::sync::{Arc, Mutex};
    use teloxide::ApiError;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn send(&self, _destination: &str, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn owns_destination(&self, _destination: &str) -> bool {
            true
        }
    }

    fn network_error() -> RequestError {
        RequestError::Io(std::io::Error::other("connection reset").into())
    }

    #[test]
    fn test_retry_delay_grows_to_cap() {
        let delays: Vec<u64> = (1..=7).map(|n| retry_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY);
    }

    #[test]
    fn test_io_failures_mark_transport_unreachable() {
        let connection = Connection::default();
        assert!(connection.request_failed(&network_error()));
        assert!(!connection.is_connected());
    }

    #[test]
    fn test_api_rejections_keep_transport_connected() {
        let connection = Connection::default();
        assert!(!connection.request_failed(&RequestError::Api(ApiError::BotBlocked)));
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn test_held_replies_flush_after_poll_recovers() {
        let transport = Arc::new(Recorder::default());
        let queue = OutboundQueue::new(transport.clone());
        let connection = Connection::default();

        assert_eq!(connection.poll_failed(&queue), Duration::from_secs(1));
        assert_eq!(connection.poll_failed(&queue), Duration::from_secs(2));
        queue.send("tg:1", "while offline").await;
        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 1);

        assert_eq!(connection.poll_succeeded(&queue).await, 1);
        assert!(connection.is_connected());
        assert_eq!(connection.failed_polls(), 0);
        assert_eq!(*transport.sent.lock().unwrap(), vec!["while offline"]);
    }
}
