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

//! BLE UUIDs and wire literals shared with the peer device.

use std::time::Duration;
use uuid::{uuid, Uuid};

/// Payment confirmation service UUID.
pub const SERVICE_UUID: Uuid = uuid!("0000abcd-0000-1000-8000-00805f9b34fb");

/// Handshake characteristic UUID (WRITE + NOTIFY).
pub const CHARACTERISTIC_UUID: Uuid = uuid!("0000cdef-0000-1000-8000-00805f9b34fb");

/// Prefix of a terminal peer response, compared case-insensitively.
pub const RESPONSE_PREFIX: &str = "okay";

/// Request payload when the local balance covers the amount.
pub const PAYLOAD_TRUE: &str = "true";

/// Request payload when it does not.
pub const PAYLOAD_FALSE: &str = "false";

pub mod config {
    use super::Duration;

    /// How long to wait for the peer's notification.
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(10_000);

    /// How long discovery runs before the chooser is shown.
    pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Initial connect plus one retry after re-selection.
    pub const MAX_CONNECT_ATTEMPTS: u32 = 2;
}
