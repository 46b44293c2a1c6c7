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

//! Resolve which peer to talk to for a transaction.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PeerDescriptor, Radio, RequestOptions, TransactionRequest};
use crate::error::HandshakeError;
use crate::storage::BindingStore;

/// Finds the peer for a request, preferring a remembered device over the
/// chooser.
#[derive(Clone)]
pub struct DeviceLocator {
    radio: Arc<dyn Radio>,
    bindings: Arc<dyn BindingStore>,
}

impl DeviceLocator {
    pub fn new(radio: Arc<dyn Radio>, bindings: Arc<dyn BindingStore>) -> Self {
        Self { radio, bindings }
    }

    pub fn radio(&self) -> &Arc<dyn Radio> {
        &self.radio
    }

    /// Remembered device if the platform still knows it, otherwise ask the
    /// user. Cancelling the chooser is returned as
    /// [`HandshakeError::SelectionCancelled`].
    pub async fn resolve(
        &self,
        request: &TransactionRequest,
    ) -> Result<PeerDescriptor, HandshakeError> {
        let key = request.binding_key();

        if let Some(saved_id) = self.bindings.get(key) {
            debug!("Remembered device for '{}': {}", key, saved_id);
            match self.radio.authorized_devices().await {
                Ok(known) => {
                    if let Some(peer) = find_known(known, &saved_id, &request.device_name) {
                        info!(
                            "Reusing remembered device {} ({})",
                            peer.display_name(),
                            peer.id
                        );
                        return Ok(peer);
                    }
                    debug!("Remembered device {} is no longer authorized", saved_id);
                }
                Err(e) => warn!("Could not list authorized devices: {:#}", e),
            }
        }

        self.select(request).await
    }

    /// Show the chooser and remember the selected device.
    pub async fn select(
        &self,
        request: &TransactionRequest,
    ) -> Result<PeerDescriptor, HandshakeError> {
        let options = RequestOptions::for_payment_service(&request.device_name);
        let peer = self
            .radio
            .request_device(&options)
            .await?
            .ok_or(HandshakeError::SelectionCancelled)?;

        info!("Selected device {} ({})", peer.display_name(), peer.id);
        self.bindings.set(request.binding_key(), &peer.id);
        Ok(peer)
    }

    /// Drop a binding that no longer connects.
    pub fn forget(&self, request: &TransactionRequest) {
        self.bindings.clear(request.binding_key());
    }
}

/// Exact id match first, then a case-insensitive name match.
fn find_known(
    known: Vec<PeerDescriptor>,
    saved_id: &str,
    device_name: &str,
) -> Option<PeerDescriptor> {
    if let Some(peer) = known.iter().find(|d| d.id == saved_id) {
        return Some(peer.clone());
    }
    if device_name.is_empty() {
        return None;
    }
    let wanted = device_name.to_lowercase();
    known
        .into_iter()
        .find(|d| d.name.as_deref().unwrap_or_default().to_lowercase() == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::{MemoryRadio, Selection, SimulatedPeer};
    use crate::storage::MemoryBindingStore;

    fn locator(radio: &MemoryRadio, bindings: &Arc<MemoryBindingStore>) -> DeviceLocator {
        DeviceLocator::new(Arc::new(radio.clone()), bindings.clone())
    }

    #[tokio::test]
    async fn test_first_use_shows_chooser_and_remembers() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        let bindings = Arc::new(MemoryBindingStore::new());

        let request = TransactionRequest::new("Alice", true).with_remember_key("tok1");
        let peer = locator(&radio, &bindings).resolve(&request).await.unwrap();

        assert_eq!(peer.id, "AA");
        assert_eq!(radio.stats().chooser_invocations, 1);
        assert_eq!(bindings.get("tok1").as_deref(), Some("AA"));

        let options = radio.last_request().unwrap();
        assert_eq!(options.filters[0].name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_remembered_device_skips_chooser() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        radio.authorize("AA");
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "AA");

        let request = TransactionRequest::new("Alice", true).with_remember_key("tok1");
        let peer = locator(&radio, &bindings).resolve(&request).await.unwrap();

        assert_eq!(peer.id, "AA");
        assert_eq!(radio.stats().chooser_invocations, 0);
    }

    #[tokio::test]
    async fn test_remembered_name_match_is_case_insensitive() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("BB", "ALICE"));
        radio.authorize("BB");
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("Alice", "rotated-id");

        let request = TransactionRequest::new("alice", true).with_remember_key("Alice");
        let peer = locator(&radio, &bindings).resolve(&request).await.unwrap();

        assert_eq!(peer.id, "BB");
        assert_eq!(radio.stats().chooser_invocations, 0);
    }

    #[tokio::test]
    async fn test_unknown_binding_falls_back_to_chooser() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("CC", "Bob"));
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "gone");

        let request = TransactionRequest::new("Bob", true).with_remember_key("tok1");
        let peer = locator(&radio, &bindings).resolve(&request).await.unwrap();

        assert_eq!(peer.id, "CC");
        assert_eq!(radio.stats().chooser_invocations, 1);
        assert_eq!(bindings.get("tok1").as_deref(), Some("CC"));
    }

    #[tokio::test]
    async fn test_cancel_leaves_binding_untouched() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        radio.queue_selection(Selection::Cancel);
        let bindings = Arc::new(MemoryBindingStore::new());
        bindings.set("tok1", "old");

        let request = TransactionRequest::new("Alice", true).with_remember_key("tok1");
        let err = locator(&radio, &bindings).resolve(&request).await.unwrap_err();

        assert!(matches!(err, HandshakeError::SelectionCancelled));
        assert_eq!(bindings.get("tok1").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_no_name_means_service_only_filter() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Anything"));
        let bindings = Arc::new(MemoryBindingStore::new());

        let request = TransactionRequest::new("", true);
        let peer = locator(&radio, &bindings).resolve(&request).await.unwrap();

        assert_eq!(peer.id, "AA");
        assert_eq!(radio.last_request().unwrap().filters[0].name, None);
        assert!(bindings.is_empty());
    }
}
