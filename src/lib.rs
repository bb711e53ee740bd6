#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # glucolink
//!
//! Message relay between a smartwatch glucose app and its phone-side
//! companion, which fetches readings from a Nightscout server.
//!
//! The watch never talks HTTP. Each screen builds a small JSON envelope
//! (`FETCH_DATA`, `UPDATE_SETTINGS`, `VERIFY_URL`, `GET_SECRET`), hands it to
//! the host's messaging primitive and renders whatever response comes back.
//! The companion receives the envelope, performs the Nightscout call and
//! answers with a `{ "type": "response", "data": { ... } }` envelope.
//!
//! ## Pieces
//!
//! - **Envelopes**: [`MessageEnvelope::request`] builds a request; every
//!   request sent by a controller carries a monotonic `requestId` which the
//!   companion echoes back.
//! - **Transport**: [`TransportAdapter`] wraps a [`HostChannel`], either a
//!   raw BLE buffer channel or a socket-like peer messaging API, behind
//!   `send` / `on_message`.
//! - **Screens**: [`ScreenController`] runs `Idle -> Loading -> {Success,
//!   Error}` against an injected [`WidgetSurface`] and transport.
//! - **Companion**: [`Companion`] answers envelopes using
//!   [`NightscoutClient`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use glucolink::{
//!     ChannelKind, Companion, CompanionConfig, LogSurface, LoopbackChannel, Screen,
//!     ScreenConfig, ScreenController, TransportAdapter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (watch, phone) = LoopbackChannel::pair(ChannelKind::PeerSocket);
//!
//!     let companion = Companion::new(CompanionConfig {
//!         nightscout_url: Some("https://my-site.example".to_string()),
//!         ..Default::default()
//!     })?;
//!     tokio::spawn(companion.serve(TransportAdapter::new(phone)));
//!
//!     let mut screen = ScreenController::new(
//!         Screen::glucose(),
//!         LogSurface::new("glucose"),
//!         TransportAdapter::new(watch),
//!         ScreenConfig::default(),
//!     );
//!     screen.trigger(None).await;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy host channel
#[cfg(feature = "ble")]
pub mod ble;
/// Phone-side Nightscout companion
pub mod companion;
/// Configuration for screens and companion
pub mod config;
/// Per-screen request/response controller
pub mod controller;
/// Error types and handling
pub mod error;
/// Envelope structures, buffers and framing
pub mod protocol;
/// Host channel abstraction and transport adapter
pub mod transport;
/// Type definitions and data structures
pub mod types;
/// UI capability consumed by screen controllers
pub mod ui;

#[cfg(feature = "ble")]
pub use ble::{BleChannel, BleParams};
pub use companion::{Companion, NightscoutClient};
pub use config::{CompanionConfig, ScreenConfig};
pub use controller::{Screen, ScreenController, UiAction};
pub use error::{RelayError, Result};
pub use protocol::{
    buf2str, str2buf, MessageEnvelope, MessageType, RequestIds, ResponseData, ResponseEnvelope,
};
pub use transport::{HostChannel, Inbound, LoopbackChannel, TransportAdapter};
pub use types::{
    ButtonStyle, ChannelKind, Direction, GlucoseEntry, ScreenState, ServerStatus, StatusColor,
};
pub use ui::{LogSurface, WidgetSurface};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entries fetched by `FETCH_DATA` unless configured otherwise
pub const DEFAULT_ENTRY_COUNT: u32 = 10;

/// Largest entry count the companion will request
pub const MAX_ENTRY_COUNT: u32 = 1_000;

/// Token characters shown on the watch before the ellipsis
pub const TOKEN_DISPLAY_CHARS: usize = 20;

/// Nightscout status endpoint, used to verify a site URL
pub const NIGHTSCOUT_STATUS_PATH: &str = "/api/v1/status";

/// Nightscout glucose entries endpoint
pub const NIGHTSCOUT_ENTRIES_PATH: &str = "/api/v1/entries.json";

/// Relay UART service advertised by the BLE peer (Nordic UART Service layout)
pub const RELAY_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";

/// Characteristic the peer notifies on (peer to us)
pub const RELAY_TX_CHAR_UUID: &str = "6E400003-B5A3-F393-E0A9-E50E24DCCA9E";

/// Characteristic we write to (us to peer)
pub const RELAY_RX_CHAR_UUID: &str = "6E400002-B5A3-F393-E0A9-E50E24DCCA9E";
