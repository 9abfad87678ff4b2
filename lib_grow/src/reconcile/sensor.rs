//! Sensor telemetry reconciler.
//!
//! Six fixed gauge slots. A telemetry frame is a merge: only the fields it
//! carries update their slot. Connection loss is the one exception: every
//! slot is forced to exactly zero, so the dashboard never shows stale
//! readings as live.

use chrono::{DateTime, Utc};

use crate::dispatcher::PushEvent;
use crate::protocol::{Inbound, TelemetryFrame};
use crate::reconcile::SyncPhase;

/// One gauge slot. `value` is stored as received; only the gauge fill is
/// clamped for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: &'static str,
    pub unit: &'static str,
    pub max_value: f64,
    pub value: f64,
}

impl SensorReading {
    /// Percentage fill for the gauge, clamped to [0, 100].
    pub fn fill_percent(&self) -> f64 {
        ((self.value / self.max_value) * 100.0).clamp(0.0, 100.0)
    }
}

const SLOTS: [(&str, &str, f64); 6] = [
    ("Temperature", "°C", 100.0),
    ("Humidity", "%", 100.0),
    ("Heat Index", "", 100.0),
    ("Moisture", "%", 100.0),
    ("UV Exposure", "", 10.0),
    ("Rain", "", 100.0),
];

/// Local view of the sensor dashboard.
pub struct SensorBoard {
    phase: SyncPhase,
    readings: Vec<SensorReading>,
    last_updated: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl SensorBoard {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            readings: SLOTS
                .iter()
                .map(|&(name, unit, max_value)| SensorReading {
                    name,
                    unit,
                    max_value,
                    value: 0.0,
                })
                .collect(),
            last_updated: None,
            error: None,
        }
    }

    /// Marks the snapshot fetch (initial or manual refresh) as in flight and
    /// clears any previous error.
    pub fn begin_fetch(&mut self) {
        self.phase = SyncPhase::Loading;
        self.error = None;
    }

    /// Applies the REST snapshot. Same merge semantics as a push.
    pub fn apply_snapshot(&mut self, frame: &TelemetryFrame) {
        self.apply_frame(frame);
    }

    /// Snapshot fetch failed: surface a domain message, keep the zero
    /// defaults so state is never undefined.
    pub fn fetch_failed(&mut self, reason: &str) {
        self.error = Some(format!("Failed to load initial sensor data: {reason}"));
        self.phase = SyncPhase::Populated;
    }

    pub fn handle_event(&mut self, event: &PushEvent) {
        match event {
            PushEvent::Frame(frame) => {
                if let Inbound::Telemetry(telemetry) = frame.as_ref() {
                    self.apply_frame(telemetry);
                }
            }
            PushEvent::Connected => self.error = None,
            PushEvent::Disconnected => self.connection_lost(),
            PushEvent::GaveUp => {
                self.connection_lost();
                self.error =
                    Some("Telemetry connection lost; no further reconnect attempts".to_string());
            }
        }
    }

    fn apply_frame(&mut self, frame: &TelemetryFrame) {
        let fields = [
            frame.temperature,
            frame.humidity,
            frame.heat_index,
            frame.moisture,
            frame.uv_exposure,
            frame.rain,
        ];
        for (slot, field) in self.readings.iter_mut().zip(fields) {
            if let Some(value) = field {
                slot.value = value;
            }
        }
        self.last_updated = Some(frame.recorded_at().unwrap_or_else(Utc::now));
        self.phase = SyncPhase::Populated;
    }

    fn connection_lost(&mut self) {
        for slot in &mut self.readings {
            slot.value = 0.0;
        }
        self.phase = SyncPhase::Reset;
        self.error = Some("Telemetry connection lost".to_string());
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn reading(&self, name: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.name == name)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for SensorBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(temperature: Option<f64>, humidity: Option<f64>) -> TelemetryFrame {
        TelemetryFrame {
            temperature,
            humidity,
            heat_index: None,
            moisture: None,
            uv_exposure: None,
            rain: None,
            timestamp: Some(1_700_000_000_000),
        }
    }

    fn push(frame: TelemetryFrame) -> PushEvent {
        PushEvent::Frame(Arc::new(Inbound::Telemetry(frame)))
    }

    #[test]
    fn partial_frames_merge_instead_of_replacing() {
        let mut board = SensorBoard::new();
        board.handle_event(&push(frame(Some(22.0), Some(55.0))));
        board.handle_event(&push(frame(Some(25.0), None)));

        assert_eq!(board.reading("Temperature").unwrap().value, 25.0);
        assert_eq!(board.reading("Humidity").unwrap().value, 55.0);
        assert_eq!(board.reading("Moisture").unwrap().value, 0.0);
        assert_eq!(board.phase(), SyncPhase::Populated);
        assert!(board.last_updated().is_some());
    }

    #[test]
    fn disconnect_zeroes_every_slot_and_later_frames_merge_over_zero() {
        let mut board = SensorBoard::new();
        board.handle_event(&push(frame(Some(22.0), Some(55.0))));

        board.handle_event(&PushEvent::Disconnected);
        assert_eq!(board.phase(), SyncPhase::Reset);
        assert!(board.readings().iter().all(|r| r.value == 0.0));
        assert!(board.error().is_some());

        // Only the fields present in the next frame move off zero.
        board.handle_event(&push(frame(Some(23.5), None)));
        assert_eq!(board.reading("Temperature").unwrap().value, 23.5);
        assert_eq!(board.reading("Humidity").unwrap().value, 0.0);
        assert_eq!(board.phase(), SyncPhase::Populated);
    }

    #[test]
    fn gauge_fill_is_clamped_but_the_stored_value_is_not() {
        let mut board = SensorBoard::new();
        let mut overload = frame(None, None);
        overload.uv_exposure = Some(14.0); // gauge max is 10
        board.handle_event(&push(overload));

        let uv = board.reading("UV Exposure").unwrap();
        assert_eq!(uv.value, 14.0);
        assert_eq!(uv.fill_percent(), 100.0);
    }

    #[test]
    fn failed_fetch_leaves_defined_defaults_and_a_message() {
        let mut board = SensorBoard::new();
        board.begin_fetch();
        assert_eq!(board.phase(), SyncPhase::Loading);

        board.fetch_failed("401 Unauthorized");
        assert_eq!(board.phase(), SyncPhase::Populated);
        assert!(board.error().unwrap().contains("401"));
        assert!(board.readings().iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn non_telemetry_frames_are_ignored() {
        use crate::protocol::{PinFrame, PinState};
        let mut board = SensorBoard::new();
        board.handle_event(&PushEvent::Frame(Arc::new(Inbound::Pin(PinFrame {
            pin_name: "E_Fan".into(),
            state: PinState::On,
            seq: None,
        }))));
        assert_eq!(board.phase(), SyncPhase::Uninitialized);
    }
}
