use crate::transport::{DfuLink, DfuLinkManager, Notification, NotificationStream};

use anyhow::{Context, Result, anyhow};
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::Adapter;
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use indicatif::ProgressBar;
use std::str::FromStr;
use tracing::debug;

pub struct DfuLinkManagerBtleplug {
    adapter: Adapter,
}

impl DfuLinkManagerBtleplug {
    pub async fn new() -> Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapters = manager.adapters().await?;
        if let Some(adapter) = adapters.into_iter().next() {
            Ok(DfuLinkManagerBtleplug { adapter })
        } else {
            Err(anyhow!("No Bluetooth adapter found"))
        }
    }

    async fn find_peripheral<P>(&self, predicate: P) -> Result<Peripheral>
    where
        P: Fn(&PeripheralProperties) -> bool,
    {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let mut events = self.adapter.events().await?;
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDiscovered(id) = event {
                let peripheral = self.adapter.peripheral(&id).await?;
                if let Some(properties) = peripheral.properties().await? {
                    if predicate(&properties) {
                        self.adapter.stop_scan().await?;
                        return Ok(peripheral);
                    }
                }
            }
        }
        Err(anyhow!("Scanning stopped unexpectedly"))
    }

    fn format_peripheral_properties(properties: &PeripheralProperties) -> String {
        let name = properties.local_name.as_deref().unwrap_or("None");
        let rssi = properties.rssi.unwrap_or(-99);
        format!("rssi: {}, address: {}, name: {}", rssi, properties.address, name)
    }

    #[cfg(target_os = "macos")]
    async fn find_peripheral_by_address(&self, _addr: &BDAddr, _pb: &ProgressBar) -> Result<Peripheral> {
        Err(anyhow!("BLE MAC addresses are not supported on macOS"))
    }

    #[cfg(not(target_os = "macos"))]
    async fn find_peripheral_by_address(&self, addr: &BDAddr, pb: &ProgressBar) -> Result<Peripheral> {
        self.find_peripheral(|props| {
            pb.set_message(Self::format_peripheral_properties(props));
            props.address_type.is_some() && props.address == *addr
        })
        .await
    }

    async fn find_peripheral_by_name(&self, name: &str, pb: &ProgressBar) -> Result<Peripheral> {
        self.find_peripheral(|props| {
            pb.set_message(Self::format_peripheral_properties(props));
            props.local_name.as_deref() == Some(name)
        })
        .await
    }
}

impl DfuLinkManager for DfuLinkManagerBtleplug {
    type Link = DfuLinkBtleplug;

    async fn connect(&self, target: &str) -> Result<Self::Link> {
        let peripheral;
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(std::time::Duration::from_millis(64));
        if let Ok(addr) = BDAddr::from_str(target) {
            pb.println(format!("Searching for `{}` by address...", target));
            peripheral = self.find_peripheral_by_address(&addr, &pb).await?;
        } else {
            pb.println(format!("Searching for `{}` by name...", target));
            peripheral = self.find_peripheral_by_name(target, &pb).await?;
        }

        peripheral.connect().await.context("Failed to establish a connection")?;
        peripheral.discover_services().await.context("Service discovery failed")?;
        debug!(address = %peripheral.address(), "connected");

        pb.finish();
        Ok(DfuLinkBtleplug { peripheral })
    }
}

pub struct DfuLinkBtleplug {
    peripheral: Peripheral,
}

impl DfuLinkBtleplug {
    fn characteristic(&self, uuid: uuid::Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|char| char.uuid == uuid)
            .ok_or_else(|| anyhow!("characteristic {} not found", uuid))
    }
}

impl DfuLink for DfuLinkBtleplug {
    async fn write(&self, char: uuid::Uuid, bytes: &[u8], with_response: bool) -> Result<()> {
        let char = self.characteristic(char)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        // TODO: fix this once btleplug supports MTU discovery
        // default nRF DFU MTU is 244
        const MTU: usize = 244;
        for chunk in bytes.chunks(MTU) {
            self.peripheral.write(&char, chunk, write_type).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, char: uuid::Uuid) -> Result<()> {
        let char = self.characteristic(char)?;
        self.peripheral.subscribe(&char).await?;
        Ok(())
    }

    async fn unsubscribe(&self, char: uuid::Uuid) -> Result<()> {
        let char = self.characteristic(char)?;
        self.peripheral.unsubscribe(&char).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let notifications = self.peripheral.notifications().await?;
        Ok(notifications
            .map(|ntf| Notification {
                channel: ntf.uuid,
                value: ntf.value,
            })
            .boxed())
    }
}
