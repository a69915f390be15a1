//! Transport abstraction and connection bookkeeping.
//!
//! Every transport exports the same four operations — send, broadcast,
//! close, shutdown — and maintains a map of client id to outbound channel.
//! Outbound delivery is per-client FIFO: each client has one unbounded
//! channel drained by a single writer task, so messages enqueued by the
//! engine and by streaming emitters arrive in enqueue order.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::Message,
};

/// Common contract exported by every transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one message to one client.
    async fn send(&self, client_id: &str, message: Message) -> Result<()>;

    /// Deliver one message to all attached clients.
    ///
    /// Transports without a persistent client channel (plain HTTP) return
    /// [`Error::BroadcastUnsupported`].
    async fn broadcast(&self, message: Message) -> Result<()>;

    /// Terminate one client's connection.
    async fn close(&self, client_id: &str) -> Result<()>;

    /// Terminate all clients and stop the transport.
    async fn shutdown(&self) -> Result<()>;
}

/// Outbound channel for a single client connection.
///
/// Handles are cheap to clone; a clone captured by a streaming emitter task
/// keeps writing into the same FIFO channel as the request engine. Once the
/// connection is closed or evicted, every send fails with
/// [`Error::ConnectionClosed`], which terminates emitters on their next
/// emit attempt.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    client_id: Arc<str>,
    sender: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Wrap an existing sender.
    pub fn new(client_id: impl Into<String>, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            client_id: client_id.into().into(),
            sender,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a handle together with the receiving half of its channel.
    pub fn channel(client_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(client_id, sender), receiver)
    }

    /// The stable client identifier for this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Enqueue one message for delivery to the client.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        self.sender
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Mark the connection closed; subsequent sends fail.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection has been closed or its reader dropped.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

/// Client-id-keyed connection map shared by a transport instance.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    inner: Arc<DashMap<String, ConnectionHandle>>,
}

impl Connections {
    /// Create an empty connection map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous entry for the id.
    ///
    /// A replaced connection is closed so a stale reader task shuts down.
    pub fn insert(&self, handle: ConnectionHandle) {
        if let Some(previous) = self
            .inner
            .insert(handle.client_id().to_string(), handle)
        {
            previous.close();
        }
    }

    /// Look up a connection by client id.
    pub fn get(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.inner.get(client_id).map(|entry| entry.value().clone())
    }

    /// Remove a connection without closing it.
    pub fn remove(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.inner.remove(client_id).map(|(_, handle)| handle)
    }

    /// Number of attached clients.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no clients are attached.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The ids of all attached clients.
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// If exactly one client is attached, return its id.
    pub fn single_client_id(&self) -> Option<String> {
        if self.inner.len() == 1 {
            self.inner.iter().next().map(|entry| entry.key().clone())
        } else {
            None
        }
    }

    /// Send to a single client; unknown ids fail with `ConnectionClosed`.
    pub fn send(&self, client_id: &str, message: Message) -> Result<()> {
        match self.get(client_id) {
            Some(handle) => handle.send(message),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Send to every attached client, evicting any whose channel has
    /// failed. Returns the number of clients reached.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in self.inner.iter() {
            match entry.value().send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(entry.key().clone()),
            }
        }
        for client_id in dead {
            debug!(client_id, "evicting failed connection during broadcast");
            self.close(&client_id);
        }
        delivered
    }

    /// Close and evict one connection.
    pub fn close(&self, client_id: &str) {
        if let Some((_, handle)) = self.inner.remove(client_id) {
            handle.close();
        }
    }

    /// Close and evict every connection.
    pub fn close_all(&self) {
        let ids = self.client_ids();
        for client_id in ids {
            self.close(&client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::schema::Notification;

    use super::*;

    fn note() -> Message {
        Message::Notification(Notification::progress(json!({"step": 1})))
    }

    #[test]
    fn test_send_after_close_fails() {
        let (handle, mut rx) = ConnectionHandle::channel("c1");
        handle.send(note()).unwrap();
        handle.close();
        assert!(matches!(handle.send(note()), Err(Error::ConnectionClosed)));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (handle, rx) = ConnectionHandle::channel("c1");
        drop(rx);
        assert!(matches!(handle.send(note()), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_clone_shares_closed_state() {
        let (handle, _rx) = ConnectionHandle::channel("c1");
        let emitter = handle.clone();
        handle.close();
        assert!(emitter.is_closed());
        assert!(matches!(emitter.send(note()), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_broadcast_evicts_dead_connections() {
        let connections = Connections::new();
        let (alive, mut alive_rx) = ConnectionHandle::channel("alive");
        let (dead, dead_rx) = ConnectionHandle::channel("dead");
        connections.insert(alive);
        connections.insert(dead);
        drop(dead_rx);

        let delivered = connections.broadcast(&note());
        assert_eq!(delivered, 1);
        assert_eq!(connections.len(), 1);
        assert!(alive_rx.try_recv().is_ok());
        assert!(connections.get("dead").is_none());
    }

    #[test]
    fn test_insert_replaces_and_closes_previous() {
        let connections = Connections::new();
        let (first, _rx1) = ConnectionHandle::channel("c1");
        let (second, mut rx2) = ConnectionHandle::channel("c1");
        connections.insert(first.clone());
        connections.insert(second);

        assert!(first.is_closed());
        assert_eq!(connections.len(), 1);
        connections.send("c1", note()).unwrap();
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_single_client_id() {
        let connections = Connections::new();
        assert!(connections.single_client_id().is_none());
        let (only, _rx) = ConnectionHandle::channel("only");
        connections.insert(only);
        assert_eq!(connections.single_client_id().as_deref(), Some("only"));
    }
}
