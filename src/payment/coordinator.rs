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

//! Entry point for the UI: QR text + balance in, outcome record out.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{QrPayload, Wallet};
use crate::bluetooth::{
    DeviceLocator, HandshakeProtocol, HandshakeResponse, Radio, SessionChannel,
    TransactionRequest,
};
use crate::error::HandshakeError;
use crate::events::{EventSink, TransactionEvent};
use crate::storage::BindingStore;

/// Result of one payment attempt, rendered by the UI as a receipt.
///
/// Every path produces this same shape; `success` is only true when the peer
/// explicitly accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub success: bool,
    pub amount: f64,
    pub name: String,
    pub txn_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Failure label, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionOutcome {
    fn new(success: bool, amount: f64, name: &str, error: Option<String>) -> Self {
        Self {
            success,
            amount,
            name: name.to_string(),
            txn_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            error,
        }
    }
}

/// Label for a well-formed response that declined the transaction.
pub const PEER_REJECTED: &str = "peer_rejected";

/// Drives locate -> connect -> exchange -> close for one payment offer.
pub struct TransactionCoordinator {
    radio: Arc<dyn Radio>,
    locator: DeviceLocator,
    channel: SessionChannel,
    protocol: HandshakeProtocol,
    events: EventSink,
}

impl TransactionCoordinator {
    pub fn new(radio: Arc<dyn Radio>, bindings: Arc<dyn BindingStore>) -> Self {
        let locator = DeviceLocator::new(radio.clone(), bindings);
        Self {
            radio,
            channel: SessionChannel::new(locator.clone()),
            locator,
            protocol: HandshakeProtocol::default(),
            events: EventSink::default(),
        }
    }

    /// Override how long to wait for the peer's answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.protocol = HandshakeProtocol::new(timeout);
        self
    }

    /// Report progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TransactionEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Evaluate a scanned offer against `current_balance`.
    ///
    /// Never fails: every error becomes an unsuccessful outcome. Debiting the
    /// balance on success is left to the caller.
    pub async fn evaluate(&self, qr_payload: &str, current_balance: f64) -> TransactionOutcome {
        let outcome = match QrPayload::parse(qr_payload) {
            Ok(payload) => {
                let transaction_possible = Wallet::new(current_balance).can_afford(payload.amount);
                info!(
                    "Offer from '{}' for {} (balance {}, possible: {})",
                    payload.name, payload.amount, current_balance, transaction_possible
                );
                match self.confirm(&payload, transaction_possible).await {
                    Ok(response) if response.accepted => {
                        TransactionOutcome::new(true, payload.amount, &payload.name, None)
                    }
                    Ok(_) => TransactionOutcome::new(
                        false,
                        payload.amount,
                        &payload.name,
                        Some(PEER_REJECTED.to_string()),
                    ),
                    Err(e) => self.failed(payload.amount, &payload.name, &e),
                }
            }
            Err(e) => self.failed(0.0, "", &e),
        };

        self.events.emit(TransactionEvent::Finished(outcome.clone()));
        outcome
    }

    fn failed(&self, amount: f64, name: &str, err: &HandshakeError) -> TransactionOutcome {
        warn!("Transaction failed: {}", err);
        self.events.emit(TransactionEvent::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        TransactionOutcome::new(false, amount, name, Some(err.kind().to_string()))
    }

    async fn confirm(
        &self,
        payload: &QrPayload,
        transaction_possible: bool,
    ) -> Result<HandshakeResponse, HandshakeError> {
        if !payload.ble {
            return Err(HandshakeError::CapabilityUnavailable(
                "offer does not support BLE confirmation".to_string(),
            ));
        }
        if !self.radio.is_available().await {
            return Err(HandshakeError::CapabilityUnavailable(
                "no usable Bluetooth adapter".to_string(),
            ));
        }

        let request = TransactionRequest::new(payload.name.clone(), transaction_possible)
            .with_remember_key(payload.remember_key());

        let peer = self.locator.resolve(&request).await?;
        self.events.emit(TransactionEvent::DeviceResolved {
            device_id: peer.id.clone(),
            device_name: peer.name.clone(),
        });

        let mut session = self.channel.open(&request, peer).await?;
        self.events.emit(TransactionEvent::Connected {
            device_id: session.peer().id.clone(),
        });

        self.events.emit(TransactionEvent::RequestSent {
            transaction_possible,
        });
        let result = self.protocol.exchange(&mut session, transaction_possible).await;
        self.channel.close(&mut session).await;

        if let Ok(response) = &result {
            self.events.emit(TransactionEvent::ResponseReceived {
                accepted: response.accepted,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::memory::{MemoryRadio, Selection, SimulatedPeer};
    use crate::storage::MemoryBindingStore;

    const ALICE: &str = r#"{"name":"Alice","token":"tok1","totalamt":250,"BLE":true}"#;

    fn coordinator(radio: &MemoryRadio) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(radio.clone()), Arc::new(MemoryBindingStore::new()))
            .with_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_accepted() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));

        let outcome = coordinator(&radio).evaluate(ALICE, 1000.0).await;

        assert!(outcome.success);
        assert_eq!(outcome.amount, 250.0);
        assert_eq!(outcome.name, "Alice");
        assert_eq!(outcome.error, None);
        assert!(!outcome.txn_id.is_empty());
        assert!(outcome.timestamp > 0);
        assert_eq!(radio.stats().writes, vec![b"true".to_vec()]);
        assert_eq!(radio.stats().disconnects, 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_sent_to_peer() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));

        let outcome = coordinator(&radio).evaluate(ALICE, 100.0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(PEER_REJECTED));
        assert_eq!(radio.stats().writes, vec![b"false".to_vec()]);
    }

    #[tokio::test]
    async fn test_peer_can_override_local_affordability() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").replying(&["okay false"]));

        let outcome = coordinator(&radio).evaluate(ALICE, 1000.0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.amount, 250.0);
    }

    #[tokio::test]
    async fn test_timeout_closes_session() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice").silent());

        let outcome = coordinator(&radio).evaluate(ALICE, 1000.0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("handshake_timeout"));
        assert_eq!(radio.stats().disconnects, 1);
        assert!(!radio.listener_attached());
    }

    #[tokio::test]
    async fn test_cancelled_chooser() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        radio.queue_selection(Selection::Cancel);

        let outcome = coordinator(&radio).evaluate(ALICE, 1000.0).await;

        assert!(!outcome.success);
        assert_eq!(outcome.name, "Alice");
        assert_eq!(outcome.error.as_deref(), Some("selection_cancelled"));
        assert_eq!(radio.stats().connect_attempts, 0);
    }

    #[tokio::test]
    async fn test_ble_not_advertised() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));

        let outcome = coordinator(&radio)
            .evaluate(r#"{"name":"Alice","totalamt":250,"BLE":false}"#, 1000.0)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.amount, 250.0);
        assert_eq!(outcome.error.as_deref(), Some("capability_unavailable"));
        assert_eq!(radio.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_radio_unavailable() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        radio.set_available(false);

        let outcome = coordinator(&radio).evaluate(ALICE, 1000.0).await;

        assert!(!outcome.success);
        assert_eq!(radio.stats().chooser_invocations, 0);
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = coordinator(&radio).with_events(tx).evaluate(ALICE, 1000.0).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], TransactionEvent::DeviceResolved { .. }));
        assert!(matches!(events[1], TransactionEvent::Connected { .. }));
        assert!(matches!(
            events[2],
            TransactionEvent::RequestSent {
                transaction_possible: true
            }
        ));
        assert!(matches!(
            events[3],
            TransactionEvent::ResponseReceived { accepted: true }
        ));
        assert_eq!(events[4], TransactionEvent::Finished(outcome));
    }

    #[tokio::test]
    async fn test_negative_amount_reaches_peer() {
        let radio = MemoryRadio::new();
        radio.add_peer(SimulatedPeer::payment_terminal("AA", "Alice"));

        let outcome = coordinator(&radio)
            .evaluate(
                r#"{"name":"Alice","token":"t","totalamt":-5,"BLE":true}"#,
                1000.0,
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.amount, -5.0);
        assert_eq!(outcome.name, "Alice");
        assert_eq!(radio.stats().chooser_invocations, 1);
        assert_eq!(radio.stats().connect_attempts, 1);
        assert_eq!(radio.stats().writes, vec![b"true".to_vec()]);
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = TransactionOutcome::new(true, 250.0, "Alice", None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["amount"], 250.0);
        assert!(json.get("txnId").is_some());
        assert!(json.get("error").is_none());
    }
}
