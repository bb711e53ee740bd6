use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{RelayError, Result},
    protocol::{frame_chunks, FrameAssembler},
    transport::HostChannel,
    types::ChannelKind,
    RELAY_RX_CHAR_UUID, RELAY_SERVICE_UUID, RELAY_TX_CHAR_UUID,
};

/// Upper bound for one reassembled inbound frame
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// BLE connection parameters
#[derive(Debug, Clone)]
pub struct BleParams {
    /// How long to scan before picking a peer
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Largest write accepted by the peer
    pub mtu: usize,
    /// Only accept peers whose advertised name contains this string
    pub name_filter: Option<String>,
}

impl Default for BleParams {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            mtu: 20,
            name_filter: None,
        }
    }
}

/// Whether the BLE link is up, shared with the notification task
#[derive(Debug, Clone)]
struct LinkState(Arc<AtomicBool>);

impl LinkState {
    fn up() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn lost(&self) {
        if self.0.swap(false, Ordering::AcqRel) {
            info!("BLE link lost");
        }
    }
}

/// Marks the link down when the notification task ends, however it ends
struct LinkGuard(LinkState);

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.0.lost();
    }
}

fn ble_unavailable() -> RelayError {
    RelayError::TransportUnavailable {
        transport: ChannelKind::Ble.label(),
    }
}

/// Raw buffer BLE channel to a peer exposing the relay UART service
pub struct BleChannel {
    peripheral: Peripheral,
    rx_char: Characteristic,
    mtu: usize,
    link: LinkState,
    inbound: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl BleChannel {
    /// Scan for and connect to the first peer advertising the relay service
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransportUnavailable`] if there is no adapter or
    /// no matching peer, [`RelayError::Timeout`] if connecting stalls, or
    /// [`RelayError::Ble`] for other Bluetooth failures.
    pub async fn connect(params: &BleParams) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters.into_iter().next().ok_or_else(ble_unavailable)?;

        let service_uuid = parse_uuid(RELAY_SERVICE_UUID)?;
        info!("Scanning for relay peers...");
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;
        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;
        central.stop_scan().await?;

        let mut chosen = None;
        for peripheral in central.peripherals().await? {
            if Self::is_relay_peer(&peripheral, params).await {
                chosen = Some(peripheral);
                break;
            }
        }
        let peripheral = chosen.ok_or_else(ble_unavailable)?;

        timeout(
            Duration::from_millis(params.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| RelayError::Timeout {
            timeout_ms: params.connect_timeout_ms,
        })??;
        peripheral.discover_services().await?;

        let tx_uuid = parse_uuid(RELAY_TX_CHAR_UUID)?;
        let rx_uuid = parse_uuid(RELAY_RX_CHAR_UUID)?;
        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid, name: &str| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| RelayError::ParseError(format!("{name} characteristic not found")))
        };
        let tx_char = find(tx_uuid, "TX")?;
        let rx_char = find(rx_uuid, "RX")?;

        peripheral.subscribe(&tx_char).await?;

        let link = LinkState::up();
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(pump_notifications(
            peripheral.clone(),
            tx_char,
            sender,
            LinkGuard(link.clone()),
        ));

        info!("Connected to relay peer {}", peripheral.address());
        Ok(Self {
            peripheral,
            rx_char,
            mtu: params.mtu,
            link,
            inbound: Some(receiver),
        })
    }

    /// Disconnect from the peer
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.link.lost();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_relay_peer(peripheral: &Peripheral, params: &BleParams) -> bool {
        let Ok(Some(properties)) = peripheral.properties().await else {
            return false;
        };
        match &params.name_filter {
            Some(filter) => properties
                .local_name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&filter.to_lowercase())),
            None => true,
        }
    }
}

#[async_trait]
impl HostChannel for BleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Ble
    }

    fn is_available(&self) -> bool {
        self.link.is_up()
    }

    async fn write(&self, buf: Bytes) -> Result<()> {
        if !self.link.is_up() || !self.peripheral.is_connected().await.unwrap_or(false) {
            self.link.lost();
            return Err(ble_unavailable());
        }

        for chunk in frame_chunks(&buf, self.mtu) {
            debug!("BLE write {:02X?}", &chunk[..]);
            self.peripheral
                .write(&self.rx_char, &chunk, WriteType::WithoutResponse)
                .await?;
        }
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inbound.take()
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| RelayError::ParseError(format!("invalid UUID {raw}: {e}")))
}

/// Reassemble TX notifications into frames and forward them in order
async fn pump_notifications(
    peripheral: Peripheral,
    tx_char: Characteristic,
    sender: mpsc::UnboundedSender<Bytes>,
    _link: LinkGuard,
) {
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Cannot listen for notifications: {}", e);
            return;
        }
    };

    let mut assembler = FrameAssembler::with_limit(MAX_FRAME_BYTES);
    while let Some(notification) = notifications.next().await {
        if notification.uuid != tx_char.uuid {
            continue;
        }
        for frame in assembler.push(&notification.value) {
            if sender.send(frame).is_err() {
                return;
            }
        }
    }
    debug!("Notification stream ended");
}
