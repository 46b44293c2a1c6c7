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

//! BLE central side of the payment handshake.
//!
//! The handshake layers ([`DeviceLocator`], [`SessionChannel`],
//! [`HandshakeProtocol`]) only talk to the radio through the traits in this
//! module. [`bluez::BluezRadio`] drives a real BlueZ adapter,
//! [`memory::MemoryRadio`] simulates one in-process.

pub mod ble_constants;
pub mod bluez;
pub mod chooser;
pub mod handshake;
pub mod locator;
pub mod memory;
pub mod session;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

pub use chooser::{DeviceChooser, FirstMatch, TerminalPrompt};
pub use handshake::{HandshakeProtocol, HandshakeResponse};
pub use locator::DeviceLocator;
pub use session::{ConnectedSession, SessionChannel};

/// Stream of raw characteristic values pushed by the peer.
///
/// Dropping the stream detaches the listener.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// A discoverable peer as reported by the radio.
///
/// Only `id` may outlive the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub id: String,
    pub name: Option<String>,
    /// Service UUIDs seen in the advertisement.
    pub services: Vec<Uuid>,
    /// Signal strength from the current scan. `None` for entries the
    /// platform only remembers from earlier sessions.
    pub rssi: Option<i16>,
}

impl PeerDescriptor {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            services: Vec::new(),
            rssi: None,
        }
    }

    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    /// Whether the peer was heard during the current scan.
    pub fn in_range(&self) -> bool {
        self.rssi.is_some()
    }

    /// Name for log lines.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// One entry of a discovery filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub services: Vec<Uuid>,
    pub name: Option<String>,
}

impl DeviceFilter {
    fn matches(&self, peer: &PeerDescriptor) -> bool {
        let services_ok = self.services.iter().all(|s| peer.services.contains(s));
        let name_ok = match &self.name {
            Some(name) => peer.name.as_deref() == Some(name.as_str()),
            None => true,
        };
        services_ok && name_ok
    }
}

/// Options passed to user-mediated device selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub filters: Vec<DeviceFilter>,
    pub optional_services: Vec<Uuid>,
}

impl RequestOptions {
    /// Narrowest chooser filter for the payment service.
    ///
    /// The name filter is only added when a non-blank name is known.
    pub fn for_payment_service(device_name: &str) -> Self {
        let name = device_name.trim();
        let name = (!name.is_empty()).then(|| device_name.to_string());
        Self {
            filters: vec![DeviceFilter {
                services: vec![ble_constants::SERVICE_UUID],
                name,
            }],
            optional_services: vec![ble_constants::SERVICE_UUID],
        }
    }

    /// A peer matches when any filter accepts it.
    pub fn matches(&self, peer: &PeerDescriptor) -> bool {
        self.filters.iter().any(|f| f.matches(peer))
    }

    /// Whether `peer` may be offered to the chooser: heard in this scan and
    /// accepted by a filter. Cached entries that are out of range are not.
    pub fn is_candidate(&self, peer: &PeerDescriptor) -> bool {
        peer.in_range() && self.matches(peer)
    }

    /// All service UUIDs named by the filters.
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .filters
            .iter()
            .flat_map(|f| f.services.iter().copied())
            .collect();
        uuids.sort();
        uuids.dedup();
        uuids
    }
}

/// Input to one handshake attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub device_name: String,
    pub transaction_possible: bool,
    pub remember_key: String,
}

impl TransactionRequest {
    pub fn new(device_name: impl Into<String>, transaction_possible: bool) -> Self {
        let device_name = device_name.into();
        Self {
            remember_key: device_name.clone(),
            device_name,
            transaction_possible,
        }
    }

    /// Use `key` for the binding when it is not empty.
    pub fn with_remember_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.remember_key = key;
        }
        self
    }

    /// Key under which the selected device is remembered.
    pub fn binding_key(&self) -> &str {
        if self.remember_key.is_empty() {
            &self.device_name
        } else {
            &self.remember_key
        }
    }
}

/// Platform radio able to find and connect to peers.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Whether BLE can be used at all in this runtime.
    async fn is_available(&self) -> bool;

    /// Peers the user authorized in earlier sessions.
    async fn authorized_devices(&self) -> Result<Vec<PeerDescriptor>>;

    /// User-mediated selection. `None` means the user cancelled.
    async fn request_device(&self, options: &RequestOptions) -> Result<Option<PeerDescriptor>>;

    /// Open a GATT connection to `peer`.
    async fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn GattConnection>>;
}

/// An established GATT connection.
#[async_trait]
pub trait GattConnection: Send + Sync {
    async fn primary_service(&self, uuid: Uuid) -> Result<Option<Box<dyn GattService>>>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait GattService: Send + Sync {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Box<dyn GattCharacteristic>>>;
}

#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    async fn start_notifications(&self) -> Result<NotificationStream>;

    async fn stop_notifications(&self) -> Result<()>;

    async fn write_value(&self, value: &[u8]) -> Result<()>;
}
