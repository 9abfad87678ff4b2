//! Device-state synchronization core for the PrimeGrow dashboard.
//!
//! One persistent WebSocket connection, owned by [`connection::ConnectionManager`],
//! is multiplexed across arbitrarily many consumers through
//! [`dispatcher::Dispatcher`]. Per-domain reconcilers in [`reconcile`] merge
//! the push stream with one-shot REST snapshots from [`fetch::ApiClient`].

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod fetch;
pub mod logger;
pub mod protocol;
pub mod reconcile;

pub use config::{load_config, GrowConfig};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionStatus, SyncHandle};
pub use dispatcher::{Dispatcher, PushEvent, SubscriberId};
pub use fetch::{ApiClient, FetchError};
pub use protocol::{Inbound, Outbound, PinState};
pub use reconcile::{AttendanceFeed, AttendanceView, InstrumentPanel, SensorBoard, SyncPhase};
