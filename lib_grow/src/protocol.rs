//! Wire model for the telemetry/control channel.
//!
//! Every frame carries an explicit `type` discriminant. A frame without a
//! recognized discriminant is a parse error at the boundary; the connection
//! manager logs and discards it instead of guessing the kind from which
//! fields happen to be present.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Pin keys the greenhouse controller exposes, with their display labels.
pub const INSTRUMENTS: [(&str, &str); 7] = [
    ("E_Door", "Door"),
    ("E_motor_Down", "Window"),
    ("E_pest", "Pesticide"),
    ("E_Fan", "Fan"),
    ("E_Light", "Light"),
    ("E_Humidifier", "Humidifier"),
    ("E_Pump", "Pump"),
];

/// An unsolicited message pushed by the server over the persistent connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    /// Periodic sensor telemetry from the field controller.
    #[serde(rename = "telemetry")]
    Telemetry(TelemetryFrame),
    /// Authoritative acknowledgement of an instrument pin state.
    #[serde(rename = "pin")]
    Pin(PinFrame),
    /// A worker access/exit event from the gate reader.
    #[serde(rename = "attendance")]
    Attendance(AttendanceFrame),
}

/// A frame we transmit to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// Request a pin flip. `seq` correlates the eventual [`PinFrame`] ack.
    #[serde(rename = "toggle")]
    Toggle {
        #[serde(rename = "pinName")]
        pin_name: String,
        seq: u64,
    },
    /// Keep-alive. No reply is expected or processed.
    #[serde(rename = "ping")]
    Ping,
}

/// Sensor readings keyed by the short field names the firmware emits.
/// Fields absent from a frame are merged as "unchanged", not zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[serde(rename = "TP", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "HM", skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(rename = "HI", skip_serializing_if = "Option::is_none")]
    pub heat_index: Option<f64>,
    #[serde(rename = "MO", skip_serializing_if = "Option::is_none")]
    pub moisture: Option<f64>,
    #[serde(rename = "UV", skip_serializing_if = "Option::is_none")]
    pub uv_exposure: Option<f64>,
    #[serde(rename = "RN", skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,
    /// Milliseconds since the Unix epoch, when the controller stamps frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl TelemetryFrame {
    /// Frame timestamp as UTC, if present and representable.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Authoritative pin state, either an ack for one of our toggles (carrying
/// back our correlation `seq`) or a flip initiated elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinFrame {
    #[serde(rename = "pinName")]
    pub pin_name: String,
    pub state: PinState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// On/off state as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinState {
    On,
    Off,
}

impl PinState {
    pub fn is_on(self) -> bool {
        matches!(self, PinState::On)
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            PinState::On
        } else {
            PinState::Off
        }
    }
}

/// One gate event. The same shape comes back from `GET api/attendance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceFrame {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Access", skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(rename = "Exit", skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireTimestamp>,
}

/// The gate reader stamps records either as epoch milliseconds or as an
/// RFC 3339 string, depending on firmware revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            WireTimestamp::Text(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}
