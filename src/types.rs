use serde::{Deserialize, Serialize};
use std::fmt;

/// Nightscout trend direction of a sensor glucose value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum Direction {
    /// Rising fast
    DoubleUp,
    /// Rising
    SingleUp,
    /// Rising slowly
    FortyFiveUp,
    /// Stable
    Flat,
    /// Falling slowly
    FortyFiveDown,
    /// Falling
    SingleDown,
    /// Falling fast
    DoubleDown,
    /// Trend could not be computed
    #[serde(rename = "NOT COMPUTABLE")]
    NotComputable,
    /// Rate of change out of range
    #[serde(rename = "RATE OUT OF RANGE")]
    RateOutOfRange,
    /// Anything else reported by the server
    Unknown,
}

impl From<String> for Direction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "DoubleUp" => Self::DoubleUp,
            "SingleUp" => Self::SingleUp,
            "FortyFiveUp" => Self::FortyFiveUp,
            "Flat" => Self::Flat,
            "FortyFiveDown" => Self::FortyFiveDown,
            "SingleDown" => Self::SingleDown,
            "DoubleDown" => Self::DoubleDown,
            "NOT COMPUTABLE" => Self::NotComputable,
            "RATE OUT OF RANGE" => Self::RateOutOfRange,
            _ => Self::Unknown,
        }
    }
}

impl Direction {
    /// Arrow shown next to the glucose value
    #[must_use]
    pub const fn arrow(self) -> &'static str {
        match self {
            Self::DoubleUp => "⇈",
            Self::SingleUp => "↑",
            Self::FortyFiveUp => "↗",
            Self::Flat => "→",
            Self::FortyFiveDown => "↘",
            Self::SingleDown => "↓",
            Self::DoubleDown => "⇊",
            Self::NotComputable => "-",
            Self::RateOutOfRange => "⇕",
            Self::Unknown => "?",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arrow())
    }
}

/// A single sensor glucose record as served by `/api/v1/entries.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseEntry {
    /// Sensor glucose value in mg/dL
    pub sgv: i32,
    /// Epoch milliseconds of the reading
    pub date: i64,
    /// ISO 8601 timestamp of the reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_string: Option<String>,
    /// Trend direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Record type, normally `sgv`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Uploading device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl GlucoseEntry {
    /// Create an entry with only value and timestamp
    #[must_use]
    pub const fn new(sgv: i32, date: i64) -> Self {
        Self {
            sgv,
            date,
            date_string: None,
            direction: None,
            kind: None,
            device: None,
        }
    }

    /// Set the trend direction
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// Subset of the Nightscout `/api/v1/status` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Reported status, `ok` on a healthy server
    #[serde(default)]
    pub status: Option<String>,
    /// Site name
    #[serde(default)]
    pub name: Option<String>,
    /// Server version
    #[serde(default)]
    pub version: Option<String>,
    /// Whether the REST API is enabled
    #[serde(default)]
    pub api_enabled: Option<bool>,
}

/// Color of the status text on a screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    /// Request in flight
    Pending,
    /// Last request succeeded
    Success,
    /// Last request failed
    Failure,
}

impl StatusColor {
    /// RGB value used by the watch UI
    #[must_use]
    pub const fn rgb(self) -> u32 {
        match self {
            Self::Pending => 0x0088_8888,
            Self::Success => 0x0000_ff00,
            Self::Failure => 0x00ff_0000,
        }
    }
}

impl fmt::Display for StatusColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "gray"),
            Self::Success => write!(f, "green"),
            Self::Failure => write!(f, "red"),
        }
    }
}

/// Appearance of the action button on a screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    /// Ready for a tap
    Default,
    /// Request in flight
    Busy,
}

impl ButtonStyle {
    /// RGB fill used by the watch UI
    #[must_use]
    pub const fn rgb(self) -> u32 {
        match self {
            Self::Default => 0x0000_86d4,
            Self::Busy => 0x0055_5555,
        }
    }
}

/// Per-screen request state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenState {
    /// Nothing requested yet
    Idle,
    /// Waiting for the response to `request_id`
    Loading {
        /// Correlation id of the pending request
        request_id: u64,
    },
    /// Last response was successful; holds the rendered text
    Success(String),
    /// Last request failed; holds the rendered text
    Error(String),
}

impl ScreenState {
    /// Whether a response is awaited
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

impl fmt::Display for ScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading { request_id } => write!(f, "Loading (#{request_id})"),
            Self::Success(text) | Self::Error(text) => f.write_str(text),
        }
    }
}

/// Kind of host messaging primitive behind a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Raw buffer based BLE send/receive
    Ble,
    /// Socket-like peer messaging
    PeerSocket,
}

impl ChannelKind {
    /// Label used in user facing error text
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ble => "BLE",
            Self::PeerSocket => "messaging",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_nightscout_names() {
        let parsed: Vec<Direction> =
            serde_json::from_str(r#"["Flat","DoubleUp","NOT COMPUTABLE","RATE OUT OF RANGE","NONE"]"#)
                .unwrap();
        assert_eq!(
            parsed,
            vec![
                Direction::Flat,
                Direction::DoubleUp,
                Direction::NotComputable,
                Direction::RateOutOfRange,
                Direction::Unknown,
            ]
        );
        assert_eq!(Direction::FortyFiveDown.arrow(), "↘");
    }

    #[test]
    fn test_entry_parsing() {
        let json = r#"{
            "_id": "65a1",
            "sgv": 132,
            "date": 1700000000000,
            "dateString": "2023-11-14T22:13:20.000Z",
            "direction": "SingleUp",
            "type": "sgv",
            "device": "xDrip-DexcomG6"
        }"#;
        let entry: GlucoseEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.sgv, 132);
        assert_eq!(entry.direction, Some(Direction::SingleUp));
        assert_eq!(entry.kind.as_deref(), Some("sgv"));
        assert_eq!(entry.date_string.as_deref(), Some("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn test_colors() {
        assert_eq!(StatusColor::Success.rgb(), 0x00ff00);
        assert_eq!(StatusColor::Failure.rgb(), 0xff0000);
        assert_eq!(StatusColor::Pending.to_string(), "gray");
    }

    #[test]
    fn test_channel_labels() {
        assert_eq!(ChannelKind::Ble.label(), "BLE");
        assert_eq!(ChannelKind::PeerSocket.to_string(), "messaging");
    }

    #[test]
    fn test_screen_state_loading() {
        assert!(ScreenState::Loading { request_id: 1 }.is_loading());
        assert!(!ScreenState::Idle.is_loading());
        assert_eq!(ScreenState::Error("Error: x".into()).to_string(), "Error: x");
    }
}
