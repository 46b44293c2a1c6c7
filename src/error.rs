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

//! Failure taxonomy for one payment handshake.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can end a transaction attempt.
///
/// None of these escape [`TransactionCoordinator::evaluate`]; they are folded
/// into a failed [`TransactionOutcome`] at that boundary.
///
/// [`TransactionCoordinator::evaluate`]: crate::payment::TransactionCoordinator::evaluate
/// [`TransactionOutcome`]: crate::payment::TransactionOutcome
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("invalid payment payload: {0}")]
    Parse(String),

    #[error("bluetooth unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("device selection cancelled")]
    SelectionCancelled,

    #[error("connect failed after {attempts} attempt(s): {reason}")]
    ConnectFailed { attempts: u32, reason: String },

    #[error("service {0} not found on peer")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found on peer")]
    CharacteristicNotFound(Uuid),

    #[error("no response from peer within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl HandshakeError {
    /// Stable label for receipts and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeError::Parse(_) => "parse_error",
            HandshakeError::CapabilityUnavailable(_) => "capability_unavailable",
            HandshakeError::SelectionCancelled => "selection_cancelled",
            HandshakeError::ConnectFailed { .. } => "connect_failed",
            HandshakeError::ServiceNotFound(_) => "service_not_found",
            HandshakeError::CharacteristicNotFound(_) => "characteristic_not_found",
            HandshakeError::HandshakeTimeout(_) => "handshake_timeout",
            HandshakeError::ConnectionLost(_) => "connection_lost",
            HandshakeError::Transport(_) => "transport_error",
        }
    }
}

impl From<serde_json::Error> for HandshakeError {
    fn from(err: serde_json::Error) -> Self {
        HandshakeError::Parse(err.to_string())
    }
}
