// ABOUTME: Per-transport outbound queue that holds messages while a transport is offline.
// ABOUTME: Enqueue never blocks; draining is FIFO and only one drain runs at a time.

use crate::metrics;
use crate::traits::Transport;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A message waiting for its transport to come back
#[derive(Debug, Clone)]
pub struct OutgoingQueueItem {
    pub destination: String,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

struct DrainState {
    rx: mpsc::UnboundedReceiver<OutgoingQueueItem>,
    /// Items put back after a failed send; always sent before `rx`
    retry: VecDeque<OutgoingQueueItem>,
}

enum DrainStop {
    Empty,
    Offline,
}

/// Outbound delivery for one transport.
///
/// Sends go straight to the transport when it is connected and nothing is
/// waiting; otherwise they are queued and flushed in order once the
/// transport reports itself connected again. Send failures are absorbed
/// here and never reach the caller.
pub struct OutboundQueue {
    transport: Arc<dyn Transport>,
    connected: AtomicBool,
    tx: mpsc::UnboundedSender<OutgoingQueueItem>,
    pending: AtomicUsize,
    drain: Mutex<DrainState>,
}

impl OutboundQueue {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connected: AtomicBool::new(transport.is_connected()),
            transport,
            tx,
            pending: AtomicUsize::new(0),
            drain: Mutex::new(DrainState {
                rx,
                retry: VecDeque::new(),
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of messages not yet delivered
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Both this queue and the transport itself consider the transport usable
    fn reachable(&self) -> bool {
        self.is_connected() && self.transport.is_connected()
    }

    /// Deliver `text` now if possible, otherwise queue it
    pub async fn send(&self, destination: &str, text: &str) {
        if !self.reachable() {
            tracing::debug!(
                transport = %self.transport.name(),
                destination = %destination,
                "Transport offline, queueing message"
            );
            self.enqueue(destination, text);
            return;
        }

        if self.pending() == 0 {
            match self.transport.send(destination, text).await {
                Ok(()) => {
                    self.record_sent();
                }
                Err(e) => {
                    tracing::warn!(
                        transport = %self.transport.name(),
                        destination = %destination,
                        error = %e,
                        "Send failed, queueing message for retry"
                    );
                    self.enqueue(destination, text);
                }
            }
            return;
        }

        // Something is already waiting; queue behind it to keep order
        self.enqueue(destination, text);
        self.flush().await;
    }

    /// Flip to connected and drain anything queued while offline
    pub async fn mark_connected(&self) -> usize {
        let was_connected = self.connected.swap(true, Ordering::AcqRel);
        if !was_connected {
            tracing::info!(
                transport = %self.transport.name(),
                pending = self.pending(),
                "Transport connected"
            );
        }
        self.flush().await
    }

    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                transport = %self.transport.name(),
                pending = self.pending(),
                "Transport disconnected, queueing outbound messages"
            );
        }
    }

    /// Send queued items in order and return how many were delivered.
    ///
    /// Returns 0 without sending anything when another flush is running.
    pub async fn flush(&self) -> usize {
        let mut total = 0;
        loop {
            let Ok(mut state) = self.drain.try_lock() else {
                tracing::debug!(transport = %self.transport.name(), "Drain already in progress");
                return total;
            };
            let (sent, stop) = self.drain_locked(&mut state).await;
            total += sent;
            drop(state);

            // An enqueue can land between our last receive and the unlock
            match stop {
                DrainStop::Empty if self.is_connected() && self.pending() > 0 => {
                    tokio::task::yield_now().await;
                }
                _ => break,
            }
        }
        if total > 0 {
            tracing::info!(transport = %self.transport.name(), sent = total, "Drained outbound queue");
        }
        total
    }

    async fn drain_locked(&self, state: &mut DrainState) -> (usize, DrainStop) {
        let mut sent = 0;
        loop {
            if !self.reachable() {
                return (sent, DrainStop::Offline);
            }
            let item = match state.retry.pop_front() {
                Some(item) => item,
                None => match state.rx.try_recv() {
                    Ok(item) => item,
                    Err(_) => return (sent, DrainStop::Empty),
                },
            };

            match self.transport.send(&item.destination, &item.text).await {
                Ok(()) => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    self.record_sent();
                    sent += 1;
                }
                Err(e) if self.reachable() => {
                    // Still online, so retrying would likely fail the same way
                    tracing::error!(
                        transport = %self.transport.name(),
                        destination = %item.destination,
                        queued_for_ms = (Utc::now() - item.enqueued_at).num_milliseconds(),
                        error = %e,
                        "Dropping queued message after failed send"
                    );
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    metrics::record_dropped(self.transport.name());
                }
                Err(e) => {
                    tracing::warn!(
                        transport = %self.transport.name(),
                        destination = %item.destination,
                        error = %e,
                        "Transport went offline during drain, keeping message"
                    );
                    state.retry.push_front(item);
                    return (sent, DrainStop::Offline);
                }
            }
        }
    }

    fn enqueue(&self, destination: &str, text: &str) {
        let item = OutgoingQueueItem {
            destination: destination.to_string(),
            text: text.to_string(),
            enqueued_at: Utc::now(),
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            // Receiver lives in self, so this only happens mid-teardown
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        metrics::record_queued(self.transport.name());
    }

    fn record_sent(&self) {
        metrics::record_sent(self.transport.name());
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("transport", &self.transport.name())
            .field("connected", &self.is_connected())
            .field("pending", &self.pending())
            .finish()
    }
}
