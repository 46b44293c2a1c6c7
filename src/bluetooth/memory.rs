// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-process radio that simulates peers and the platform chooser.
//!
//! Used by the test suite and for dry runs without an adapter. Each
//! [`SimulatedPeer`] scripts how a payment terminal behaves: whether it
//! exposes the service, how many connects fail, and which notifications it
//! pushes back for a written payload.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::ble_constants::{CHARACTERISTIC_UUID, SERVICE_UUID};
use super::{
    GattCharacteristic, GattConnection, GattService, NotificationStream, PeerDescriptor, Radio,
    RequestOptions,
};

/// Maps a written payload to the notifications the peer sends back.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Scripted peer device.
#[derive(Clone)]
pub struct SimulatedPeer {
    pub descriptor: PeerDescriptor,
    pub has_service: bool,
    pub has_characteristic: bool,
    /// Connect attempts that fail before one succeeds.
    pub failing_connects: u32,
    pub response_delay: Option<Duration>,
    responder: Responder,
}

impl SimulatedPeer {
    /// A conformant terminal that approves whatever the client can afford.
    pub fn payment_terminal(id: &str, name: &str) -> Self {
        Self {
            descriptor: PeerDescriptor::new(id, Some(name.to_string()))
                .with_services(vec![SERVICE_UUID])
                .with_rssi(Some(-60)),
            has_service: true,
            has_characteristic: true,
            failing_connects: 0,
            response_delay: None,
            responder: Arc::new(|payload: &[u8]| {
                let text = String::from_utf8_lossy(payload);
                vec![format!("okay {}", text.trim()).into_bytes()]
            }),
        }
    }

    /// Always answer with `notifications`, in order.
    pub fn replying(mut self, notifications: &[&str]) -> Self {
        let notifications: Vec<Vec<u8>> = notifications
            .iter()
            .map(|n| n.as_bytes().to_vec())
            .collect();
        self.responder = Arc::new(move |_| notifications.clone());
        self
    }

    /// Never answer.
    pub fn silent(self) -> Self {
        self.replying(&[])
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    pub fn without_service(mut self) -> Self {
        self.has_service = false;
        self
    }

    pub fn without_characteristic(mut self) -> Self {
        self.has_characteristic = false;
        self
    }

    pub fn failing_connects(mut self, count: u32) -> Self {
        self.failing_connects = count;
        self
    }

    /// Known to the platform from an earlier session but not reachable now.
    /// It is never offered by the chooser and every connect fails.
    pub fn out_of_range(mut self) -> Self {
        self.descriptor.rssi = None;
        self
    }
}

/// Scripted answer of the simulated chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Pick(String),
    Cancel,
}

/// Counters exposed for assertions.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RadioStats {
    pub chooser_invocations: u32,
    pub connect_attempts: u32,
    pub disconnects: u32,
    pub stop_notifications: u32,
    pub writes: Vec<Vec<u8>>,
}

struct PeerState {
    peer: SimulatedPeer,
    failures_left: u32,
}

struct Inner {
    available: AtomicBool,
    peers: Mutex<Vec<PeerState>>,
    authorized: Mutex<HashSet<String>>,
    selections: Mutex<VecDeque<Selection>>,
    last_request: Mutex<Option<RequestOptions>>,
    listener: Mutex<Option<async_channel::Sender<Vec<u8>>>>,
    stats: Mutex<RadioStats>,
}

impl Inner {
    fn peer(&self, id: &str) -> Option<SimulatedPeer> {
        self.peers
            .lock()
            .iter()
            .find(|p| p.peer.descriptor.id == id)
            .map(|p| p.peer.clone())
    }

    fn deliver(&self, value: Vec<u8>) -> bool {
        let listener = self.listener.lock();
        match listener.as_ref() {
            Some(tx) => tx.try_send(value).is_ok(),
            None => false,
        }
    }
}

/// Simulated radio.
#[derive(Clone)]
pub struct MemoryRadio {
    inner: Arc<Inner>,
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                available: AtomicBool::new(true),
                peers: Mutex::new(Vec::new()),
                authorized: Mutex::new(HashSet::new()),
                selections: Mutex::new(VecDeque::new()),
                last_request: Mutex::new(None),
                listener: Mutex::new(None),
                stats: Mutex::new(RadioStats::default()),
            }),
        }
    }

    pub fn add_peer(&self, peer: SimulatedPeer) {
        let failures_left = peer.failing_connects;
        self.inner.peers.lock().push(PeerState {
            peer,
            failures_left,
        });
    }

    /// Mark `id` as authorized in an earlier session.
    pub fn authorize(&self, id: &str) {
        self.inner.authorized.lock().insert(id.to_string());
    }

    /// Queue the chooser's next answer. With an empty queue the chooser
    /// picks the first matching peer.
    pub fn queue_selection(&self, selection: Selection) {
        self.inner.selections.lock().push_back(selection);
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn stats(&self) -> RadioStats {
        self.inner.stats.lock().clone()
    }

    pub fn last_request(&self) -> Option<RequestOptions> {
        self.inner.last_request.lock().clone()
    }

    /// Whether a notification listener is still receiving.
    pub fn listener_attached(&self) -> bool {
        self.inner
            .listener
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Push a notification as the connected peer. Returns whether a listener
    /// accepted it.
    pub fn notify(&self, value: &str) -> bool {
        self.inner.deliver(value.as_bytes().to_vec())
    }

    /// Drop the link under an in-flight exchange.
    pub fn sever(&self) {
        self.inner.listener.lock().take();
    }
}

#[async_trait]
impl Radio for MemoryRadio {
    async fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    async fn authorized_devices(&self) -> Result<Vec<PeerDescriptor>> {
        let authorized = self.inner.authorized.lock();
        Ok(self
            .inner
            .peers
            .lock()
            .iter()
            .filter(|p| authorized.contains(&p.peer.descriptor.id))
            .map(|p| p.peer.descriptor.clone())
            .collect())
    }

    async fn request_device(&self, options: &RequestOptions) -> Result<Option<PeerDescriptor>> {
        self.inner.stats.lock().chooser_invocations += 1;
        *self.inner.last_request.lock() = Some(options.clone());

        let candidates: Vec<PeerDescriptor> = self
            .inner
            .peers
            .lock()
            .iter()
            .map(|p| p.peer.descriptor.clone())
            .filter(|d| options.is_candidate(d))
            .collect();

        let chosen = match self.inner.selections.lock().pop_front() {
            Some(Selection::Cancel) => None,
            Some(Selection::Pick(id)) => candidates.into_iter().find(|d| d.id == id),
            None => candidates.into_iter().next(),
        };

        if let Some(peer) = &chosen {
            debug!("Simulated chooser picked {}", peer.id);
            self.authorize(&peer.id);
        }
        Ok(chosen)
    }

    async fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn GattConnection>> {
        self.inner.stats.lock().connect_attempts += 1;

        let mut peers = self.inner.peers.lock();
        let state = peers
            .iter_mut()
            .find(|p| p.peer.descriptor.id == peer.id)
            .filter(|p| p.peer.descriptor.in_range())
            .ok_or_else(|| anyhow!("device {} is out of range", peer.id))?;

        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(anyhow!("device {} did not accept the connection", peer.id));
        }

        Ok(Box::new(MemoryConnection {
            inner: self.inner.clone(),
            peer_id: peer.id.clone(),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    peer_id: String,
}

#[async_trait]
impl GattConnection for MemoryConnection {
    async fn primary_service(&self, uuid: Uuid) -> Result<Option<Box<dyn GattService>>> {
        let peer = self
            .inner
            .peer(&self.peer_id)
            .ok_or_else(|| anyhow!("device {} vanished", self.peer_id))?;
        if uuid != SERVICE_UUID || !peer.has_service {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryService {
            inner: self.inner.clone(),
            peer,
        })))
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.stats.lock().disconnects += 1;
        Ok(())
    }
}

struct MemoryService {
    inner: Arc<Inner>,
    peer: SimulatedPeer,
}

#[async_trait]
impl GattService for MemoryService {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Box<dyn GattCharacteristic>>> {
        if uuid != CHARACTERISTIC_UUID || !self.peer.has_characteristic {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryCharacteristic {
            inner: self.inner.clone(),
            peer: self.peer.clone(),
        })))
    }
}

struct MemoryCharacteristic {
    inner: Arc<Inner>,
    peer: SimulatedPeer,
}

#[async_trait]
impl GattCharacteristic for MemoryCharacteristic {
    async fn start_notifications(&self) -> Result<NotificationStream> {
        let (tx, rx) = async_channel::unbounded();
        *self.inner.listener.lock() = Some(tx);
        Ok(Box::pin(rx))
    }

    async fn stop_notifications(&self) -> Result<()> {
        self.inner.stats.lock().stop_notifications += 1;
        self.inner.listener.lock().take();
        Ok(())
    }

    async fn write_value(&self, value: &[u8]) -> Result<()> {
        self.inner.stats.lock().writes.push(value.to_vec());

        let responses = (self.peer.responder)(value);
        match self.peer.response_delay {
            None => {
                for response in responses {
                    self.inner.deliver(response);
                }
            }
            Some(delay) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for response in responses {
                        inner.deliver(response);
                    }
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_chooser_script() -> Result<()> {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Till-1"));
        radio.add_peer(SimulatedPeer::payment_terminal("BB", "Till-2"));
        let options = RequestOptions::for_payment_service("");

        radio.queue_selection(Selection::Pick("BB".into()));
        radio.queue_selection(Selection::Cancel);

        assert_eq!(radio.request_device(&options).await?.map(|p| p.id), Some("BB".into()));
        assert_eq!(radio.request_device(&options).await?, None);
        assert_eq!(radio.request_device(&options).await?.map(|p| p.id), Some("AA".into()));
        assert_eq!(radio.stats().chooser_invocations, 3);

        let authorized: Vec<String> = radio
            .authorized_devices()
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(authorized.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_connects() -> Result<()> {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Till-1").failing_connects(1));
        let peer = PeerDescriptor::new("AA", None);

        assert!(radio.connect(&peer).await.is_err());
        assert!(radio.connect(&peer).await.is_ok());
        assert!(radio.connect(&PeerDescriptor::new("ZZ", None)).await.is_err());
        assert_eq!(radio.stats().connect_attempts, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_peer() -> Result<()> {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Till-1").out_of_range());
        radio.add_peer(SimulatedPeer::payment_terminal("BB", "Till-2"));
        radio.authorize("AA");

        let options = RequestOptions::for_payment_service("");
        assert_eq!(radio.request_device(&options).await?.map(|p| p.id), Some("BB".into()));
        assert_eq!(radio.authorized_devices().await?[0].id, "AA");
        assert!(radio.connect(&PeerDescriptor::new("AA", None)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_echoes_payload() -> Result<()> {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Till-1"));

        let connection = radio.connect(&PeerDescriptor::new("AA", None)).await?;
        let service = connection
            .primary_service(SERVICE_UUID)
            .await?
            .ok_or_else(|| anyhow!("service missing"))?;
        let characteristic = service
            .characteristic(CHARACTERISTIC_UUID)
            .await?
            .ok_or_else(|| anyhow!("characteristic missing"))?;

        let mut notifications = characteristic.start_notifications().await?;
        characteristic.write_value(b"false").await?;
        assert_eq!(notifications.next().await, Some(b"okay false".to_vec()));
        assert!(radio.listener_attached());

        drop(notifications);
        assert!(!radio.listener_attached());
        Ok(())
    }
}
