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

//! One request/response exchange over the handshake characteristic.
//!
//! The listener is armed before the payload is written, so a fast peer cannot
//! answer into the void. The wait for the answer races a timer; whichever
//! loses is dropped, and notifications are stopped on every exit path.

use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ble_constants::{config, PAYLOAD_FALSE, PAYLOAD_TRUE, RESPONSE_PREFIX};
use super::session::ConnectedSession;
use super::{GattCharacteristic, NotificationStream};
use crate::error::HandshakeError;

/// Terminal answer from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Decoded, trimmed notification text.
    pub text: String,
    pub accepted: bool,
}

impl HandshakeResponse {
    /// Parse a notification value.
    ///
    /// Only `okay <true|false>` (any case, any whitespace run) is terminal;
    /// everything else, including invalid UTF-8, yields `None`.
    pub fn parse(value: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(value).ok()?.trim();
        let lower = text.to_ascii_lowercase();
        let rest = lower.strip_prefix(RESPONSE_PREFIX)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let accepted = match rest.trim_start() {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        Some(Self {
            text: text.to_string(),
            accepted,
        })
    }
}

/// Request payload for the peer.
pub fn encode_request(transaction_possible: bool) -> &'static str {
    if transaction_possible {
        PAYLOAD_TRUE
    } else {
        PAYLOAD_FALSE
    }
}

/// Progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    NotificationsArmed,
    PayloadSent,
    ResponseReceived,
    TimedOut,
    TornDown,
}

fn transition(state: &mut ExchangeState, next: ExchangeState) {
    debug!("Handshake {:?} -> {:?}", state, next);
    *state = next;
}

/// Drives the write-then-await-notification exchange.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeProtocol {
    timeout: Duration,
}

impl Default for HandshakeProtocol {
    fn default() -> Self {
        Self::new(config::DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl HandshakeProtocol {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `transaction_possible` and wait for the peer's verdict.
    ///
    /// At most one response is consumed. Non-matching notifications are
    /// ignored until the timeout fires. The session is borrowed mutably so
    /// only one exchange can be in flight on it.
    pub async fn exchange(
        &self,
        session: &mut ConnectedSession,
        transaction_possible: bool,
    ) -> Result<HandshakeResponse, HandshakeError> {
        let characteristic = session.characteristic().ok_or_else(|| {
            HandshakeError::ConnectionLost("session is already closed".to_string())
        })?;

        let mut state = ExchangeState::Idle;
        let result = self
            .run(characteristic, transaction_possible, &mut state)
            .await;

        if let Err(e) = characteristic.stop_notifications().await {
            warn!("Failed to stop notifications: {:#}", e);
        }
        transition(&mut state, ExchangeState::TornDown);

        result
    }

    async fn run(
        &self,
        characteristic: &dyn GattCharacteristic,
        transaction_possible: bool,
        state: &mut ExchangeState,
    ) -> Result<HandshakeResponse, HandshakeError> {
        let mut notifications = characteristic.start_notifications().await?;
        transition(state, ExchangeState::NotificationsArmed);

        let payload = encode_request(transaction_possible);
        debug!(
            "Writing handshake payload '{}' ({})",
            payload,
            hex::encode(payload)
        );
        characteristic.write_value(payload.as_bytes()).await?;
        transition(state, ExchangeState::PayloadSent);

        let waited = tokio::time::timeout(self.timeout, next_response(&mut notifications)).await;
        drop(notifications);

        match waited {
            Ok(Some(response)) => {
                transition(state, ExchangeState::ResponseReceived);
                info!("Peer answered '{}'", response.text);
                Ok(response)
            }
            Ok(None) => Err(HandshakeError::ConnectionLost(
                "notification stream ended".to_string(),
            )),
            Err(_) => {
                transition(state, ExchangeState::TimedOut);
                warn!("No handshake response within {:?}", self.timeout);
                Err(HandshakeError::HandshakeTimeout(self.timeout))
            }
        }
    }
}

async fn next_response(notifications: &mut NotificationStream) -> Option<HandshakeResponse> {
    while let Some(value) = notifications.next().await {
        match HandshakeResponse::parse(&value) {
            Some(response) => return Some(response),
            None => debug!("Ignoring notification ({})", hex::encode(&value)),
        }
    }
    None
}
