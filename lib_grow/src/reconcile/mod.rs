//! Per-domain state reconcilers.
//!
//! Each reconciler owns its local view exclusively and feeds on two inputs:
//! the one-shot REST snapshot and the push stream from the dispatcher.
//! Updates apply in arrival order, last writer wins; a snapshot resolving
//! after a push overwrites it, and the next push overwrites the snapshot.

pub mod attendance;
pub mod instrument;
pub mod sensor;

pub use attendance::{AttendanceFeed, AttendancePage, AttendanceRecord, AttendanceView, SortField, SortOrder};
pub use instrument::{fetch_pin_states, InstrumentPanel, ToggleError, ToggleableInstrument};
pub use sensor::{SensorBoard, SensorReading};

/// Lifecycle of a reconciler's local view. There is no terminal state;
/// dropping the reconciler simply drops the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Constructed, nothing fetched yet.
    Uninitialized,
    /// Snapshot fetch in flight.
    Loading,
    /// Holding data (snapshot, pushes, or safe defaults after a failed fetch).
    Populated,
    /// Sensor-only: values were forced to zero on connection loss.
    Reset,
}
