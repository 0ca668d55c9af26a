//! BlueZ-backed radio for Linux hosts.

use std::collections::{HashMap, HashSet};

use bluer::{Adapter, AdapterEvent, Address, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bluetooth::scanner::{Radio, RadioEvent};
use crate::models::{AdvertisementRecord, MacAddress};

pub struct BluezRadio {
    adapter: Adapter,
    events: mpsc::Sender<RadioEvent>,
    task: Option<JoinHandle<()>>,
}

impl BluezRadio {
    /// Open the default adapter and power it on.
    pub async fn new(events: mpsc::Sender<RadioEvent>) -> bluer::Result<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("Bluetooth adapter {} ready", adapter.name());
        Ok(Self {
            adapter,
            events,
            task: None,
        })
    }
}

impl Radio for BluezRadio {
    fn start_scan(&mut self, duration: Duration, active: bool) -> bool {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("Scan already running");
            return false;
        }
        // BlueZ always scans actively while discovering; the flag is informational
        debug!("Starting {} scan for {:?}", if active { "active" } else { "passive" }, duration);
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.task = Some(tokio::spawn(async move {
            let outcome = match run_scan(&adapter, &events, duration).await {
                Ok(()) => RadioEvent::ScanComplete,
                Err(e) => {
                    error!("BLE scan failed: {}", e);
                    RadioEvent::ScanFailed
                }
            };
            let _ = events.send(outcome).await;
        }));
        true
    }

    fn stop_scan(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        self.stop_scan();
    }
}

async fn run_scan(
    adapter: &Adapter,
    events: &mpsc::Sender<RadioEvent>,
    duration: Duration,
) -> bluer::Result<()> {
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        // Report every advertisement, not just the first per device
        duplicate_data: true,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let mut seen = HashSet::new();
    let mut stream = Box::pin(adapter.discover_devices().await?);
    let deadline = sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = stream.next() => match event {
                Some(AdapterEvent::DeviceAdded(addr)) => {
                    seen.insert(addr);
                    forward(adapter, events, addr).await;
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    drop(stream);

    // Devices keep advertising after they were added; pick up their latest data
    for addr in seen {
        forward(adapter, events, addr).await;
    }
    Ok(())
}

async fn forward(adapter: &Adapter, events: &mpsc::Sender<RadioEvent>, addr: Address) {
    let device = match adapter.device(addr) {
        Ok(device) => device,
        Err(_) => return,
    };
    let record = advertisement_record(&device).await;
    if record.manufacturer_data.is_empty() && record.service_data.is_empty() {
        return;
    }
    if events.send(RadioEvent::Discovered(record)).await.is_err() {
        debug!("Radio queue closed, dropping {}", addr);
    }
}

/// Snapshot a device's advertised data as a record.
async fn advertisement_record(device: &Device) -> AdvertisementRecord {
    let manufacturer_data = match device.manufacturer_data().await {
        Ok(data) => data.unwrap_or_default(),
        Err(e) => {
            debug!("Failed to get manufacturer data for {}: {}", device.address(), e);
            HashMap::new()
        }
    };
    let service_uuids = device.uuids().await.ok().flatten().unwrap_or_default();
    let service_data = device.service_data().await.ok().flatten().unwrap_or_default();
    AdvertisementRecord::from_properties(
        MacAddress(device.address().0),
        manufacturer_data,
        service_uuids,
        service_data,
    )
}
