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

//! Transaction progress events for the UI.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::payment::TransactionOutcome;

/// Progress of one `evaluate` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    /// Peer chosen for the handshake.
    DeviceResolved {
        device_id: String,
        device_name: Option<String>,
    },
    /// GATT session open.
    Connected { device_id: String },
    /// Request about to be written.
    RequestSent { transaction_possible: bool },
    /// Peer answered.
    ResponseReceived { accepted: bool },
    /// The attempt failed before a verdict.
    Failed { kind: String, message: String },
    /// Final outcome.
    Finished(TransactionOutcome),
}

/// Sending half used by the coordinator. A closed or absent receiver is
/// never an error.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransactionEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TransactionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: TransactionEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

/// Logs events as they arrive.
#[derive(Debug, Default)]
pub struct EventLogger {
    processed: usize,
}

impl EventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events handled so far.
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: &TransactionEvent) {
        self.processed += 1;
        match event {
            TransactionEvent::DeviceResolved {
                device_id,
                device_name,
            } => {
                info!(
                    "Using device: {} ({})",
                    device_name.as_deref().unwrap_or("Unknown"),
                    device_id
                );
            }
            TransactionEvent::Connected { device_id } => {
                info!("Device connected: {}", device_id);
            }
            TransactionEvent::RequestSent {
                transaction_possible,
            } => {
                debug!("Request sent, transaction possible: {}", transaction_possible);
            }
            TransactionEvent::ResponseReceived { accepted } => {
                info!("Peer {} the transaction", if *accepted { "accepted" } else { "rejected" });
            }
            TransactionEvent::Failed { kind, message } => {
                warn!("Transaction failed ({}): {}", kind, message);
            }
            TransactionEvent::Finished(outcome) => {
                info!(
                    "Transaction {} finished: success={} amount={}",
                    outcome.txn_id, outcome.success, outcome.amount
                );
            }
        }
    }

    /// Drain `rx` until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<TransactionEvent>) -> Self {
        while let Some(event) = rx.recv().await {
            self.process_event(&event);
        }
        self
    }
}
