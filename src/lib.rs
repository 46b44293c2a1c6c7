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

//! Point-of-sale client that confirms QR payment offers with a nearby peer
//! over BLE.
//!
//! A scanned offer and the local balance go into
//! [`TransactionCoordinator::evaluate`], which finds the peer (remembered or
//! chosen by the user), writes whether the balance covers the amount, and
//! waits for the peer's `okay true|false` notification. The result is always
//! a [`TransactionOutcome`]; the caller applies the debit on success.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod payment;
pub mod storage;

pub use config::Config;
pub use error::HandshakeError;
pub use payment::{QrPayload, TransactionCoordinator, TransactionOutcome, Wallet};
