// ABOUTME: Shared test doubles for courier-core integration tests
// ABOUTME: MockTransport records sends and can fail, disconnect or block on demand
#![allow(dead_code)]

use async_trait::async_trait;
use courier_core::Transport;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Transport that records every message it is asked to send
#[derive(Default)]
pub struct MockTransport {
    prefix: String,
    connected: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<(String, bool)>>,
    /// Number of upcoming sends that fail
    fail_next: AtomicUsize,
    /// Failing sends also flip the transport offline
    disconnect_on_fail: AtomicBool,
    /// While set, sends wait for `release()`
    gated: AtomicBool,
    gate: Notify,
    entered: Notify,
}

impl MockTransport {
    pub fn new(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
            connected: AtomicBool::new(true),
            ..Default::default()
        })
    }

    pub fn offline(prefix: &str) -> Arc<Self> {
        let transport = Self::new(prefix);
        transport.set_connected(false);
        transport
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: usize, disconnect: bool) {
        self.fail_next.store(count, Ordering::SeqCst);
        self.disconnect_on_fail.store(disconnect, Ordering::SeqCst);
    }

    pub fn hold_sends(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let held sends continue
    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
        self.gate.notify_one();
    }

    /// Wait until a send is blocked on the gate
    pub async fn wait_for_held_send(&self) {
        self.entered.notified().await;
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn typing_events(&self) -> Vec<(String, bool)> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, destination: &str, text: &str) -> anyhow::Result<()> {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            if self.disconnect_on_fail.load(Ordering::SeqCst) {
                self.set_connected(false);
            }
            anyhow::bail!("mock send failure");
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_typing(&self, destination: &str, typing: bool) -> anyhow::Result<()> {
        self.typing
            .lock()
            .unwrap()
            .push((destination.to_string(), typing));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn owns_destination(&self, destination: &str) -> bool {
        destination.starts_with(&self.prefix)
    }
}
