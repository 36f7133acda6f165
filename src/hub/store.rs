//! Hub actor implementation
//!
//! The hub is a single-writer actor: one worker task owns every
//! registry mutation and consumes from four bounded queues (register,
//! unregister, broadcast, send-to). Public methods are producer
//! endpoints that enqueue without blocking. The registry itself is a
//! concurrent map so `get_client` and `stats` read without touching
//! the worker, but only the worker ever mutates it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::Client;
use super::events::HubEvent;
use super::stats::HubStats;
use crate::error::{Error, Result};

/// Hub queue capacities
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Register queue capacity
    pub register_queue: usize,
    /// Unregister queue capacity
    pub unregister_queue: usize,
    /// Broadcast queue capacity
    pub broadcast_queue: usize,
    /// Targeted-delivery queue capacity
    pub send_queue: usize,
    /// Event stream capacity; lagging subscribers skip
    pub event_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            register_queue: 100,
            unregister_queue: 100,
            broadcast_queue: 1000,
            send_queue: 1000,
            event_capacity: 256,
        }
    }
}

/// Targeted delivery request
struct Delivery {
    client_id: String,
    message: Bytes,
}

/// Registration request carrying the worker's reply channel
struct Registration {
    client: Arc<dyn Client>,
    reply: oneshot::Sender<bool>,
}

/// Receiver ends of the four queues, moved into the worker on start
struct Queues {
    register: mpsc::Receiver<Registration>,
    unregister: mpsc::Receiver<String>,
    broadcast: mpsc::Receiver<Bytes>,
    send_to: mpsc::Receiver<Delivery>,
}

/// Central peer registry and message router
pub struct Hub {
    clients: DashMap<String, Arc<dyn Client>>,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<Bytes>,
    send_to_tx: mpsc::Sender<Delivery>,
    queues: Mutex<Option<Queues>>,
    events: broadcast::Sender<HubEvent>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_failed: AtomicU64,
    started_at: Instant,
}

impl Hub {
    /// Create a hub with default queue capacities
    pub fn new() -> Self {
        Self::with_options(HubOptions::default())
    }

    /// Create a hub with custom queue capacities
    pub fn with_options(options: HubOptions) -> Self {
        let (register_tx, register_rx) = mpsc::channel(options.register_queue);
        let (unregister_tx, unregister_rx) = mpsc::channel(options.unregister_queue);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(options.broadcast_queue);
        let (send_to_tx, send_to_rx) = mpsc::channel(options.send_queue);
        let (events, _) = broadcast::channel(options.event_capacity);

        Self {
            clients: DashMap::new(),
            register_tx,
            unregister_tx,
            broadcast_tx,
            send_to_tx,
            queues: Mutex::new(Some(Queues {
                register: register_rx,
                unregister: unregister_rx,
                broadcast: broadcast_rx,
                send_to: send_to_rx,
            })),
            events,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Spawn the worker; idempotent after the first successful call
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::HubStopped);
        }

        let Some(queues) = self.queues.lock().unwrap().take() else {
            return Ok(()); // already started
        };

        let handle = tokio::spawn(Self::run(Arc::clone(self), queues));
        *self.worker.lock().unwrap() = Some(handle);

        tracing::info!("hub started");
        Ok(())
    }

    /// Stop the worker and close every remaining peer connection
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("stopping hub");
        self.cancel.cancel();

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let clients: Vec<Arc<dyn Client>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.clients.clear();

        for client in clients {
            client.close().await;
        }

        tracing::info!("hub stopped");
        Ok(())
    }

    /// Enqueue a registration
    ///
    /// The enqueue itself never blocks. The returned channel resolves
    /// with the worker's authoritative decision: `true` once the client
    /// is in the registry, `false` when the id was already taken. The
    /// channel errors if the hub stops before the request is processed.
    pub fn register(&self, client: Arc<dyn Client>) -> Result<oneshot::Receiver<bool>> {
        if self.cancel.is_cancelled() {
            return Err(Error::HubStopped);
        }

        let (reply, accepted) = oneshot::channel();
        match self.register_tx.try_send(Registration { client, reply }) {
            Ok(()) => Ok(accepted),
            Err(TrySendError::Full(_)) => Err(Error::HubQueueFull { queue: "register" }),
            Err(TrySendError::Closed(_)) => Err(Error::HubStopped),
        }
    }

    /// Enqueue an unregistration
    pub fn unregister(&self, client_id: impl Into<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::HubStopped);
        }

        match self.unregister_tx.try_send(client_id.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::HubQueueFull { queue: "unregister" }),
            Err(TrySendError::Closed(_)) => Err(Error::HubStopped),
        }
    }

    /// Enqueue a targeted delivery
    pub fn send_to(&self, client_id: impl Into<String>, message: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::HubStopped);
        }

        let delivery = Delivery {
            client_id: client_id.into(),
            message,
        };
        match self.send_to_tx.try_send(delivery) {
            Ok(()) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::HubQueueFull { queue: "send_to" }),
            Err(TrySendError::Closed(_)) => Err(Error::HubStopped),
        }
    }

    /// Enqueue a fanout to every registered peer
    pub fn broadcast(&self, message: Bytes) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::HubStopped);
        }

        match self.broadcast_tx.try_send(message) {
            Ok(()) => {
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::HubQueueFull { queue: "broadcast" }),
            Err(TrySendError::Closed(_)) => Err(Error::HubStopped),
        }
    }

    /// Look up a registered client
    pub fn get_client(&self, client_id: &str) -> Option<Arc<dyn Client>> {
        self.clients
            .get(client_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Snapshot of hub counters
    pub fn stats(&self) -> HubStats {
        HubStats {
            connected_clients: self.clients.len(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Subscribe to hub lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Worker loop: the only place the registry is mutated
    async fn run(hub: Arc<Hub>, mut queues: Queues) {
        loop {
            tokio::select! {
                _ = hub.cancel.cancelled() => break,
                Some(registration) = queues.register.recv() => hub.handle_register(registration),
                Some(client_id) = queues.unregister.recv() => hub.handle_unregister(&client_id).await,
                Some(message) = queues.broadcast.recv() => hub.handle_broadcast(message),
                Some(delivery) = queues.send_to.recv() => hub.handle_send_to(delivery),
            }
        }

        tracing::debug!("hub worker stopped");
    }

    fn handle_register(&self, registration: Registration) {
        let Registration { client, reply } = registration;
        let client_id = client.id().to_string();

        // Duplicate registration is a no-op: exactly one client per id.
        // The reply tells the register handler whether it lost the race.
        if self.clients.contains_key(&client_id) {
            tracing::warn!(client_id = %client_id, "client already registered");
            let _ = reply.send(false);
            return;
        }

        self.clients.insert(client_id.clone(), client);

        tracing::info!(
            client_id = %client_id,
            total_clients = self.clients.len(),
            "client registered"
        );
        let _ = self.events.send(HubEvent::ClientRegistered { client_id });
        let _ = reply.send(true);
    }

    async fn handle_unregister(&self, client_id: &str) {
        let Some((_, client)) = self.clients.remove(client_id) else {
            return;
        };

        client.close().await;

        tracing::info!(
            client_id = %client_id,
            total_clients = self.clients.len(),
            "client unregistered"
        );
        let _ = self.events.send(HubEvent::ClientUnregistered {
            client_id: client_id.to_string(),
        });
    }

    fn handle_send_to(&self, delivery: Delivery) {
        let Delivery { client_id, message } = delivery;

        let Some(client) = self.get_client(&client_id) else {
            tracing::warn!(client_id = %client_id, "client not found, dropping message");
            let _ = self.events.send(HubEvent::MessageDropped { client_id });
            return;
        };

        let bytes = message.len();
        match client.send(message) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .events
                    .send(HubEvent::MessageForwarded { client_id, bytes });
            }
            Err(error) => {
                self.messages_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    client_id = %client_id,
                    error = %error,
                    "failed to send to client"
                );
                let _ = self.events.send(HubEvent::MessageDropped { client_id });
            }
        }
    }

    fn handle_broadcast(&self, message: Bytes) {
        // Snapshot so no shard lock is held while enqueueing.
        let clients: Vec<Arc<dyn Client>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut success_count = 0usize;
        let mut error_count = 0usize;

        for client in clients {
            match client.send(message.clone()) {
                Ok(()) => {
                    success_count += 1;
                    self.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    error_count += 1;
                    self.messages_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        client_id = %client.id(),
                        error = %error,
                        "failed to send to client"
                    );
                }
            }
        }

        tracing::debug!(
            success_count = success_count,
            error_count = error_count,
            "broadcast complete"
        );
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;

    struct MockClient {
        id: String,
        sent: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
        reject_sends: bool,
    }

    impl MockClient {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                reject_sends: false,
            })
        }

        fn rejecting(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                sent: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                reject_sends: true,
            })
        }

        fn sent(&self) -> Vec<Bytes> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Client for MockClient {
        fn id(&self) -> &str {
            &self.id
        }

        fn send(&self, message: Bytes) -> Result<()> {
            if self.reject_sends {
                return Err(Error::SendQueueFull);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<HubEvent>) -> HubEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for hub event")
            .expect("event stream closed")
    }

    fn started_hub() -> Arc<Hub> {
        let hub = Arc::new(Hub::new());
        hub.start().unwrap();
        hub
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        hub.register(MockClient::new("alice")).unwrap();

        assert_eq!(
            next_event(&mut events).await,
            HubEvent::ClientRegistered {
                client_id: "alice".to_string()
            }
        );
        assert!(hub.get_client("alice").is_some());
        assert_eq!(hub.client_count(), 1);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let hub = started_hub();

        let first = MockClient::new("alice");
        let second = MockClient::new("alice");

        let first_ack = hub.register(first).unwrap();
        assert!(first_ack.await.unwrap());

        // The duplicate is dropped and the loser is told so.
        let second_ack = hub.register(second).unwrap();
        assert!(!second_ack.await.unwrap());
        assert_eq!(hub.client_count(), 1);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_registration_ack_errors_when_hub_goes_away() {
        let hub = Arc::new(Hub::new());

        // Worker never started, so the request is never processed; once
        // the hub is gone the queued reply channel is dropped with it.
        let ack = hub.register(MockClient::new("alice")).unwrap();
        hub.stop().await.unwrap();
        drop(hub);

        assert!(ack.await.is_err());
    }

    #[tokio::test]
    async fn test_unregister_closes_client() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let client = MockClient::new("alice");
        hub.register(client.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;

        hub.unregister("alice").unwrap();

        assert_eq!(
            next_event(&mut events).await,
            HubEvent::ClientUnregistered {
                client_id: "alice".to_string()
            }
        );
        assert!(client.is_closed());
        assert_eq!(hub.client_count(), 0);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let hub = started_hub();

        hub.unregister("ghost").unwrap();

        // Nothing to assert beyond "does not disturb other peers".
        let client = MockClient::new("alice");
        let mut events = hub.subscribe();
        hub.register(client).unwrap();
        next_event(&mut events).await;
        assert_eq!(hub.client_count(), 1);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_to_delivers_in_order() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let client = MockClient::new("bob");
        hub.register(client.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;

        hub.send_to("bob", Bytes::from_static(b"one")).unwrap();
        hub.send_to("bob", Bytes::from_static(b"two")).unwrap();

        next_event(&mut events).await;
        next_event(&mut events).await;

        assert_eq!(
            client.sent(),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );

        let stats = hub.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_received, 2);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_to_absent_target_drops() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let bystander = MockClient::new("alice");
        hub.register(bystander.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;

        hub.send_to("carol", Bytes::from_static(b"lost")).unwrap();

        assert_eq!(
            next_event(&mut events).await,
            HubEvent::MessageDropped {
                client_id: "carol".to_string()
            }
        );
        assert!(bystander.sent().is_empty());
        assert_eq!(hub.stats().messages_sent, 0);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_delivery_counts_and_spares_others() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let stuck = MockClient::rejecting("stuck");
        let healthy = MockClient::new("healthy");
        hub.register(stuck).unwrap();
        hub.register(healthy.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        hub.broadcast(Bytes::from_static(b"hello")).unwrap();

        // Broadcast emits no per-recipient events; poll the mock. Once
        // the healthy peer has the frame the whole fanout has run.
        timeout(Duration::from_secs(2), async {
            while healthy.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("broadcast should reach the healthy client");

        hub.send_to("healthy", Bytes::from_static(b"direct")).unwrap();
        loop {
            if let HubEvent::MessageForwarded { client_id, .. } = next_event(&mut events).await {
                assert_eq!(client_id, "healthy");
                break;
            }
        }

        assert_eq!(
            healthy.sent(),
            vec![Bytes::from_static(b"hello"), Bytes::from_static(b"direct")]
        );
        assert_eq!(hub.stats().messages_failed, 1);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let alice = MockClient::new("alice");
        let bob = MockClient::new("bob");
        hub.register(alice.clone() as Arc<dyn Client>).unwrap();
        hub.register(bob.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        hub.broadcast(Bytes::from_static(b"everyone")).unwrap();

        // Broadcast emits no per-recipient events; poll the mocks.
        timeout(Duration::from_secs(2), async {
            while alice.sent().is_empty() || bob.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("broadcast should reach both clients");

        assert_eq!(alice.sent(), vec![Bytes::from_static(b"everyone")]);
        assert_eq!(bob.sent(), vec![Bytes::from_static(b"everyone")]);

        hub.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_all_clients() {
        let hub = started_hub();
        let mut events = hub.subscribe();

        let alice = MockClient::new("alice");
        let bob = MockClient::new("bob");
        hub.register(alice.clone() as Arc<dyn Client>).unwrap();
        hub.register(bob.clone() as Arc<dyn Client>).unwrap();
        next_event(&mut events).await;
        next_event(&mut events).await;

        hub.stop().await.unwrap();

        assert!(alice.is_closed());
        assert!(bob.is_closed());
        assert_eq!(hub.stats().connected_clients, 0);
    }

    #[tokio::test]
    async fn test_operations_after_stop_fail() {
        let hub = started_hub();
        hub.stop().await.unwrap();

        assert!(matches!(
            hub.register(MockClient::new("late")),
            Err(Error::HubStopped)
        ));
        assert!(matches!(hub.unregister("late"), Err(Error::HubStopped)));
        assert!(matches!(
            hub.send_to("late", Bytes::new()),
            Err(Error::HubStopped)
        ));
        assert!(matches!(
            hub.broadcast(Bytes::new()),
            Err(Error::HubStopped)
        ));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let hub = started_hub();
        hub.start().unwrap();
        hub.start().unwrap();

        hub.stop().await.unwrap();
    }
}
