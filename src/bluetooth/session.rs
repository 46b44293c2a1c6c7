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

//! GATT session lifecycle for one transaction.

use tracing::{debug, info, warn};

use super::ble_constants::{config, CHARACTERISTIC_UUID, SERVICE_UUID};
use super::{DeviceLocator, GattCharacteristic, GattConnection, PeerDescriptor, TransactionRequest};
use crate::error::HandshakeError;

/// A connected peer with the handshake characteristic resolved.
///
/// Call [`ConnectedSession::close`] when done. A session dropped while still
/// connected schedules a best-effort disconnect on the current runtime.
pub struct ConnectedSession {
    peer: PeerDescriptor,
    connection: Option<Box<dyn GattConnection>>,
    characteristic: Option<Box<dyn GattCharacteristic>>,
    connect_attempts: u32,
}

impl ConnectedSession {
    pub fn peer(&self) -> &PeerDescriptor {
        &self.peer
    }

    /// Connect attempts it took to open this session.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// The handshake characteristic, `None` once closed.
    pub fn characteristic(&self) -> Option<&dyn GattCharacteristic> {
        self.characteristic.as_deref()
    }

    /// Stop notifications, then disconnect. Failures are logged, never
    /// returned, and closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(characteristic) = self.characteristic.take() {
            if let Err(e) = characteristic.stop_notifications().await {
                warn!("Failed to stop notifications on {}: {:#}", self.peer.id, e);
            }
        }

        if let Some(connection) = self.connection.take() {
            match connection.disconnect().await {
                Ok(()) => info!("Disconnected from {}", self.peer.id),
                Err(e) => warn!("Failed to disconnect from {}: {:#}", self.peer.id, e),
            }
        }
    }
}

impl Drop for ConnectedSession {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        self.characteristic.take();

        let peer_id = self.peer.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session for {} dropped while open, disconnecting", peer_id);
                handle.spawn(async move {
                    if let Err(e) = connection.disconnect().await {
                        warn!("Failed to disconnect from {}: {:#}", peer_id, e);
                    }
                });
            }
            Err(_) => warn!("Session for {} dropped outside a runtime", peer_id),
        }
    }
}

/// Opens sessions, recovering once from a stale remembered device.
#[derive(Clone)]
pub struct SessionChannel {
    locator: DeviceLocator,
}

impl SessionChannel {
    pub fn new(locator: DeviceLocator) -> Self {
        Self { locator }
    }

    /// Connect to `peer` and resolve the handshake characteristic.
    ///
    /// If connecting fails the binding is treated as stale: it is cleared,
    /// the chooser runs once more and the new selection gets one further
    /// connect attempt.
    pub async fn open(
        &self,
        request: &TransactionRequest,
        peer: PeerDescriptor,
    ) -> Result<ConnectedSession, HandshakeError> {
        let mut peer = peer;
        let mut attempts = 0;

        let connection = loop {
            attempts += 1;
            info!(
                "Connecting to {} ({}), attempt {}",
                peer.display_name(),
                peer.id,
                attempts
            );
            let connected = self.locator.radio().connect(&peer).await;
            match connected {
                Ok(connection) => break connection,
                Err(e) if attempts < config::MAX_CONNECT_ATTEMPTS => {
                    warn!(
                        "Connect to {} failed ({:#}), asking for the device again",
                        peer.id, e
                    );
                    self.locator.forget(request);
                    peer = self.locator.select(request).await?;
                }
                Err(e) => {
                    return Err(HandshakeError::ConnectFailed {
                        attempts,
                        reason: format!("{:#}", e),
                    })
                }
            }
        };

        let mut session = ConnectedSession {
            peer,
            connection: Some(connection),
            characteristic: None,
            connect_attempts: attempts,
        };

        match Self::resolve_characteristic(&session).await {
            Ok(characteristic) => {
                session.characteristic = Some(characteristic);
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Release everything `session` holds.
    pub async fn close(&self, session: &mut ConnectedSession) {
        session.close().await;
    }

    async fn resolve_characteristic(
        session: &ConnectedSession,
    ) -> Result<Box<dyn GattCharacteristic>, HandshakeError> {
        let connection = session.connection.as_ref().ok_or_else(|| {
            HandshakeError::ConnectionLost("session is already closed".to_string())
        })?;

        let service = connection
            .primary_service(SERVICE_UUID)
            .await?
            .ok_or(HandshakeError::ServiceNotFound(SERVICE_UUID))?;

        let characteristic = service
            .characteristic(CHARACTERISTIC_UUID)
            .await?
            .ok_or(HandshakeError::CharacteristicNotFound(CHARACTERISTIC_UUID))?;

        debug!("Resolved handshake characteristic on {}", session.peer.id);
        Ok(characteristic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::{MemoryRadio, Selection, SimulatedPeer};
    use crate::storage::{BindingStore, MemoryBindingStore};
    use std::sync::Arc;

    fn channel(radio: &MemoryRadio, bindings: &Arc<MemoryBindingStore>) -> SessionChannel {
        SessionChannel::new(DeviceLocator::new(
            Arc::new(radio.clone()),
            bindings.clone(),
        ))
    }

    fn alice() -> TransactionRequest {
        TransactionRequest::new("Alice", true).with_remember_key("tok1")
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        let bindings = Arc::new(MemoryBindingStore::new());
        let channel = channel(&radio, &bindings);

        let mut session = channel
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .unwrap();
        assert!(session.is_open());
        assert!(session.characteristic().is_some());
        assert_eq!(session.connect_attempts(), 1);

        channel.close(&mut session).await;
        channel.close(&mut session).await;

        assert!(!session.is_open());
        assert_eq!(radio.stats().disconnects, 1);
        assert_eq!(radio.stats().stop_notifications, 1);
        assert_eq!(radio.stats().chooser_invocations, 0);
    }

    #[tokio::test]
    async fn test_stale_binding_recovers_with_one_retry() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").failing_connects(1));
        radio.add_peer(SimulatedPeer::payment_terminal("BB", "Alice"));
        radio.queue_selection(Selection::Pick("BB".into()));
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "AA");

        let session = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .unwrap();

        assert_eq!(session.peer().id, "BB");
        assert_eq!(session.connect_attempts(), 2);
        assert_eq!(radio.stats().connect_attempts, 2);
        assert_eq!(radio.stats().chooser_invocations, 1);
        assert_eq!(bindings.get("tok1").as_deref(), Some("BB"));
    }

    #[tokio::test]
    async fn test_second_connect_failure_is_terminal() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").failing_connects(5));
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "AA");

        let err = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, HandshakeError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(radio.stats().connect_attempts, 2);
        assert_eq!(radio.stats().chooser_invocations, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_recovery() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").failing_connects(1));
        radio.queue_selection(Selection::Cancel);
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "AA");

        let err = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, HandshakeError::SelectionCancelled));
        assert_eq!(radio.stats().connect_attempts, 1);
        assert_eq!(bindings.get("tok1"), None);
    }

    #[tokio::test]
    async fn test_missing_service() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").without_service());
        let bindings = Arc::new(MemoryBindingStore::new());

        let err = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, HandshakeError::ServiceNotFound(u) if u == SERVICE_UUID));
        assert_eq!(radio.stats().disconnects, 1);
    }

    #[tokio::test]
    async fn test_missing_characteristic() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").without_characteristic());
        let bindings = Arc::new(MemoryBindingStore::new());

        let err = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, HandshakeError::CharacteristicNotFound(u) if u == CHARACTERISTIC_UUID));
        assert_eq!(radio.stats().disconnects, 1);
    }

    #[tokio::test]
    async fn test_dropped_session_disconnects() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        let bindings = Arc::new(MemoryBindingStore::new());

        let session = channel(&radio, &bindings)
            .open(&alice(), PeerDescriptor::new("AA", None))
            .await
            .unwrap();
        drop(session);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(radio.stats().disconnects, 1);
    }
}
