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

//! BlueZ-backed radio using `bluer`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, Service};
use bluer::{Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chooser::DeviceChooser;
use super::{
    GattCharacteristic, GattConnection, GattService, NotificationStream, PeerDescriptor, Radio,
    RequestOptions,
};

/// How long to wait for BlueZ to resolve services after connecting.
const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);

/// Radio on a local BlueZ adapter.
pub struct BluezRadio {
    _session: Session,
    adapter: Adapter,
    discovery_timeout: Duration,
    chooser: Box<dyn DeviceChooser>,
}

impl BluezRadio {
    /// Open the named adapter, or the default one.
    pub async fn new(
        adapter_name: Option<&str>,
        discovery_timeout: Duration,
        chooser: Box<dyn DeviceChooser>,
    ) -> Result<Self> {
        info!("Initializing BLE central...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self {
            _session: session,
            adapter,
            discovery_timeout,
            chooser,
        })
    }

    async fn describe(&self, address: Address) -> Result<PeerDescriptor> {
        let device = self.adapter.device(address)?;
        let name = device.name().await?;
        let services = device
            .uuids()
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let rssi = device.rssi().await?;
        Ok(PeerDescriptor::new(address.to_string(), name)
            .with_services(services)
            .with_rssi(rssi))
    }

    async fn authorized_peer(&self, address: Address) -> Result<Option<PeerDescriptor>> {
        let device = self.adapter.device(address)?;
        if device.is_paired().await? || device.is_trusted().await? {
            Ok(Some(self.describe(address).await?))
        } else {
            Ok(None)
        }
    }

    fn device(&self, peer: &PeerDescriptor) -> Result<Device> {
        let address: Address = peer
            .id
            .parse()
            .map_err(|_| anyhow!("Invalid device address {}", peer.id))?;
        Ok(self.adapter.device(address)?)
    }

    /// Run discovery and collect peers accepted by `options`.
    ///
    /// BlueZ replays cached devices as `DeviceAdded` when discovery starts,
    /// including ones that are out of range. Only devices with an RSSI from
    /// this scan are offered, checked once the scan window closes so cached
    /// devices heard later in the window still count.
    async fn discover(&self, options: &RequestOptions) -> Result<Vec<PeerDescriptor>> {
        let filter = DiscoveryFilter {
            uuids: options.service_uuids().into_iter().collect::<HashSet<Uuid>>(),
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        self.adapter.set_discovery_filter(filter).await?;

        info!("Scanning for {:?}", self.discovery_timeout);
        let events = self.adapter.discover_devices().await?;
        tokio::pin!(events);
        let deadline = tokio::time::sleep(self.discovery_timeout);
        tokio::pin!(deadline);

        let mut seen: Vec<Address> = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if !seen.contains(&address) {
                            seen.push(address);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        // Still discovering while `events` is alive, so RSSI is current.
        let mut candidates: Vec<PeerDescriptor> = Vec::new();
        for address in seen {
            match self.describe(address).await {
                Ok(peer) if options.is_candidate(&peer) => {
                    debug!("Candidate {} ({})", peer.display_name(), peer.id);
                    candidates.push(peer);
                }
                Ok(peer) => debug!("Skipping {} ({})", peer.display_name(), peer.id),
                Err(e) => debug!("Failed to query device {}: {}", address, e),
            }
        }

        Ok(candidates)
    }
}

#[async_trait]
impl Radio for BluezRadio {
    async fn is_available(&self) -> bool {
        match self.adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Bluetooth adapter unavailable: {}", e);
                false
            }
        }
    }

    async fn authorized_devices(&self) -> Result<Vec<PeerDescriptor>> {
        let mut lookups = Vec::new();
        for address in self.adapter.device_addresses().await? {
            lookups.push((address, self.authorized_peer(address).await));
        }
        let peers = collect_authorized(lookups);
        debug!("{} authorized device(s) known to BlueZ", peers.len());
        Ok(peers)
    }

    async fn request_device(&self, options: &RequestOptions) -> Result<Option<PeerDescriptor>> {
        let candidates = self.discover(options).await?;
        if candidates.is_empty() {
            info!("No matching devices found");
            return Ok(None);
        }

        let Some(peer) = self
            .chooser
            .choose(&candidates)
            .await
            .and_then(|i| candidates.get(i).cloned())
        else {
            info!("Device selection cancelled");
            return Ok(None);
        };

        // Trusted devices show up in authorized_devices next session.
        if let Err(e) = self.device(&peer)?.set_trusted(true).await {
            warn!("Failed to mark {} as trusted: {}", peer.id, e);
        }
        Ok(Some(peer))
    }

    async fn connect(&self, peer: &PeerDescriptor) -> Result<Box<dyn GattConnection>> {
        let device = self.device(peer)?;

        if !device.is_connected().await? {
            device.connect().await?;
            info!("Connected to {}", peer.id);
        } else {
            debug!("Already connected to {}", peer.id);
        }

        Ok(Box::new(BluezConnection { device }))
    }
}

/// Keep the authorized peers, skipping devices whose properties could not
/// be read.
fn collect_authorized(
    lookups: Vec<(Address, Result<Option<PeerDescriptor>>)>,
) -> Vec<PeerDescriptor> {
    lookups
        .into_iter()
        .filter_map(|(address, lookup)| match lookup {
            Ok(peer) => peer,
            Err(e) => {
                debug!("Failed to query device {}: {}", address, e);
                None
            }
        })
        .collect()
}

/// Stand-in when no BlueZ adapter could be opened.
///
/// Reports itself unavailable so transactions fail fast without touching
/// the radio.
#[derive(Debug, Clone)]
pub struct OfflineRadio {
    reason: String,
}

impl OfflineRadio {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Radio for OfflineRadio {
    async fn is_available(&self) -> bool {
        false
    }

    async fn authorized_devices(&self) -> Result<Vec<PeerDescriptor>> {
        Err(anyhow!("bluetooth offline: {}", self.reason))
    }

    async fn request_device(&self, _options: &RequestOptions) -> Result<Option<PeerDescriptor>> {
        Err(anyhow!("bluetooth offline: {}", self.reason))
    }

    async fn connect(&self, _peer: &PeerDescriptor) -> Result<Box<dyn GattConnection>> {
        Err(anyhow!("bluetooth offline: {}", self.reason))
    }
}

struct BluezConnection {
    device: Device,
}

impl BluezConnection {
    async fn wait_services_resolved(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        while !self.device.is_services_resolved().await? {
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "services of {} not resolved within {:?}",
                    self.device.address(),
                    SERVICES_RESOLVE_TIMEOUT
                ));
            }
            tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl GattConnection for BluezConnection {
    async fn primary_service(&self, uuid: Uuid) -> Result<Option<Box<dyn GattService>>> {
        self.wait_services_resolved().await?;
        for service in self.device.services().await? {
            if service.uuid().await? == uuid && service.primary().await? {
                return Ok(Some(Box::new(BluezService { service })));
            }
        }
        Ok(None)
    }

    async fn disconnect(&self) -> Result<()> {
        self.device.disconnect().await?;
        Ok(())
    }
}

struct BluezService {
    service: Service,
}

#[async_trait]
impl GattService for BluezService {
    async fn characteristic(&self, uuid: Uuid) -> Result<Option<Box<dyn GattCharacteristic>>> {
        for characteristic in self.service.characteristics().await? {
            if characteristic.uuid().await? == uuid {
                return Ok(Some(Box::new(BluezCharacteristic { characteristic })));
            }
        }
        Ok(None)
    }
}

struct BluezCharacteristic {
    characteristic: Characteristic,
}

#[async_trait]
impl GattCharacteristic for BluezCharacteristic {
    async fn start_notifications(&self) -> Result<NotificationStream> {
        let stream = self.characteristic.notify().await?;
        Ok(Box::pin(stream))
    }

    async fn stop_notifications(&self) -> Result<()> {
        // BlueZ ends the subscription once the notify stream is dropped.
        debug!("Notification stream released");
        Ok(())
    }

    async fn write_value(&self, value: &[u8]) -> Result<()> {
        self.characteristic.write(value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_device_is_skipped() {
        let a = Address::new([0xAA, 0, 0, 0, 0, 1]);
        let b = Address::new([0xAA, 0, 0, 0, 0, 2]);
        let c = Address::new([0xAA, 0, 0, 0, 0, 3]);
        let peers = collect_authorized(vec![
            (a, Err(anyhow!("org.bluez.Error.Failed"))),
            (b, Ok(Some(PeerDescriptor::new(b.to_string(), Some("Till-1".into()))))),
            (c, Ok(None)),
        ]);

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, b.to_string());
    }

    #[tokio::test]
    async fn test_offline_radio() {
        let radio = OfflineRadio::new("no adapter");
        assert!(!radio.is_available().await);
        assert!(radio.authorized_devices().await.is_err());
        let err = radio
            .connect(&PeerDescriptor::new("AA:BB:CC:DD:EE:FF", None))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no adapter"));
    }
}
