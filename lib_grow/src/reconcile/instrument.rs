//! Instrument control reconciler.
//!
//! A toggle is an optimistic local flip plus a command frame over the shared
//! connection, correlated by a sequence number, plus an HTTP write to record
//! the flip server-side. The authoritative `pin` push overwrites the local
//! value unconditionally when it arrives, whatever the interleaving.
//!
//! Toggling is refused outright while the shared connection is not open:
//! no local optimism without a live channel to reconcile against.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::connection::{ConnectionStatus, SyncHandle};
use crate::dispatcher::PushEvent;
use crate::fetch::{ApiClient, FetchError};
use crate::protocol::{Inbound, Outbound, PinState, INSTRUMENTS};
use crate::reconcile::SyncPhase;

/// One controllable pin and its locally-held state.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleableInstrument {
    pub key: &'static str,
    pub label: &'static str,
    pub on: bool,
    pub last_updated: Option<DateTime<Utc>>,
    /// Correlation seq of an optimistic flip still awaiting its ack.
    pub pending_seq: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("cannot toggle {key}: connection is {status:?}")]
    NotConnected {
        key: String,
        status: ConnectionStatus,
    },
    #[error("unknown instrument key: {0}")]
    UnknownKey(String),
}

/// Local view of the instrument-control panel.
pub struct InstrumentPanel {
    handle: SyncHandle,
    api: Arc<ApiClient>,
    instruments: Vec<ToggleableInstrument>,
    next_seq: u64,
    phase: SyncPhase,
    error: Option<String>,
}

impl InstrumentPanel {
    pub fn new(handle: SyncHandle, api: Arc<ApiClient>) -> Self {
        Self {
            handle,
            api,
            instruments: INSTRUMENTS
                .iter()
                .map(|&(key, label)| ToggleableInstrument {
                    key,
                    label,
                    on: false,
                    last_updated: None,
                    pending_seq: None,
                })
                .collect(),
            next_seq: 0,
            phase: SyncPhase::Uninitialized,
            error: None,
        }
    }

    pub fn begin_fetch(&mut self) {
        self.phase = SyncPhase::Loading;
        self.error = None;
    }

    /// Seeds local state from the per-key snapshot fetch.
    pub fn apply_initial(&mut self, states: Vec<(&'static str, PinState)>) {
        for (key, state) in states {
            if let Some(instrument) = self.instruments.iter_mut().find(|i| i.key == key) {
                instrument.on = state.is_on();
            }
        }
        self.phase = SyncPhase::Populated;
    }

    pub fn fetch_failed(&mut self, reason: &str) {
        self.error = Some(format!("Failed to load initial states: {reason}"));
        self.phase = SyncPhase::Populated;
    }

    /// User-initiated flip. Applies the optimistic local change, transmits
    /// the command frame with a fresh correlation seq, and spawns the HTTP
    /// state sync. Returns the optimistic new state.
    pub fn toggle(&mut self, key: &str) -> Result<bool, ToggleError> {
        let status = self.handle.status();
        if status != ConnectionStatus::Open {
            return Err(ToggleError::NotConnected {
                key: key.to_string(),
                status,
            });
        }
        let instrument = self
            .instruments
            .iter_mut()
            .find(|i| i.key == key)
            .ok_or_else(|| ToggleError::UnknownKey(key.to_string()))?;

        self.next_seq += 1;
        let seq = self.next_seq;
        let new_state = !instrument.on;
        instrument.on = new_state;
        instrument.pending_seq = Some(seq);
        instrument.last_updated = Some(Utc::now());

        self.handle.send(Outbound::Toggle {
            pin_name: key.to_string(),
            seq,
        });

        let api = Arc::clone(&self.api);
        let key = key.to_string();
        let state = PinState::from_bool(new_state);
        tokio::spawn(async move {
            if let Err(e) = api.sync_toggle(&key, state).await {
                log::error!("Failed to sync pin state for {key}: {e}");
            }
        });

        Ok(new_state)
    }

    pub fn handle_event(&mut self, event: &PushEvent) {
        match event {
            PushEvent::Frame(frame) => {
                if let Inbound::Pin(pin) = frame.as_ref() {
                    self.apply_ack(pin.pin_name.as_str(), pin.state);
                }
            }
            PushEvent::Connected => self.error = None,
            PushEvent::Disconnected => {
                self.error = Some("Telemetry connection lost".to_string());
            }
            PushEvent::GaveUp => {
                self.error =
                    Some("Telemetry connection lost; no further reconnect attempts".to_string());
            }
        }
    }

    fn apply_ack(&mut self, key: &str, state: PinState) {
        let Some(instrument) = self.instruments.iter_mut().find(|i| i.key == key) else {
            log::debug!("Pin ack for unknown key '{key}' ignored");
            return;
        };
        // Authoritative push wins over any pending optimistic flip.
        instrument.on = state.is_on();
        instrument.pending_seq = None;
        instrument.last_updated = Some(Utc::now());
        self.phase = SyncPhase::Populated;
    }

    pub fn instruments(&self) -> &[ToggleableInstrument] {
        &self.instruments
    }

    pub fn instrument(&self, key: &str) -> Option<&ToggleableInstrument> {
        self.instruments.iter().find(|i| i.key == key)
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Fetches every known pin's state, failing on the first error so the caller
/// falls back to all-off defaults with a single message.
pub async fn fetch_pin_states(
    api: &ApiClient,
) -> Result<Vec<(&'static str, PinState)>, FetchError> {
    let mut states = Vec::with_capacity(INSTRUMENTS.len());
    for (key, _) in INSTRUMENTS {
        states.push((key, api.pin_state(key).await?));
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::protocol::PinFrame;
    use tokio::sync::{mpsc, watch};

    fn open_handle() -> (SyncHandle, watch::Sender<ConnectionStatus>, mpsc::UnboundedReceiver<Outbound>) {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Open);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = SyncHandle {
            dispatcher: Arc::new(Dispatcher::new()),
            status_rx,
            outbound_tx,
        };
        (handle, status_tx, outbound_rx)
    }

    fn api() -> Arc<ApiClient> {
        Arc::new(ApiClient::new("https://primegrow.invalid", None).unwrap())
    }

    fn pin_push(key: &str, state: PinState, seq: Option<u64>) -> PushEvent {
        PushEvent::Frame(Arc::new(Inbound::Pin(PinFrame {
            pin_name: key.to_string(),
            state,
            seq,
        })))
    }

    #[tokio::test]
    async fn toggle_flips_optimistically_and_transmits_a_correlated_command() {
        let (handle, _status_tx, mut outbound_rx) = open_handle();
        let mut panel = InstrumentPanel::new(handle, api());

        let new_state = panel.toggle("E_Fan").unwrap();
        assert!(new_state);
        let fan = panel.instrument("E_Fan").unwrap();
        assert!(fan.on);
        assert_eq!(fan.pending_seq, Some(1));

        match outbound_rx.try_recv() {
            Ok(Outbound::Toggle { pin_name, seq }) => {
                assert_eq!(pin_name, "E_Fan");
                assert_eq!(seq, 1);
            }
            other => panic!("expected toggle frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ack_overwrites_the_optimistic_value_regardless_of_direction() {
        let (handle, _status_tx, _outbound_rx) = open_handle();
        let mut panel = InstrumentPanel::new(handle, api());

        // Optimistic flip to on, then the server says off.
        panel.toggle("E_Light").unwrap();
        assert!(panel.instrument("E_Light").unwrap().on);

        panel.handle_event(&pin_push("E_Light", PinState::Off, Some(1)));
        let light = panel.instrument("E_Light").unwrap();
        assert!(!light.on);
        assert_eq!(light.pending_seq, None);
    }

    #[tokio::test]
    async fn toggle_is_refused_while_the_connection_is_not_open() {
        let (handle, status_tx, mut outbound_rx) = open_handle();
        status_tx.send_replace(ConnectionStatus::Closed);
        let mut panel = InstrumentPanel::new(handle, api());

        match panel.toggle("E_Door") {
            Err(ToggleError::NotConnected { key, status }) => {
                assert_eq!(key, "E_Door");
                assert_eq!(status, ConnectionStatus::Closed);
            }
            other => panic!("expected NotConnected, got {other:?}"),
        }
        assert!(!panel.instrument("E_Door").unwrap().on);
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_keys_are_rejected_and_unknown_acks_ignored() {
        let (handle, _status_tx, _outbound_rx) = open_handle();
        let mut panel = InstrumentPanel::new(handle, api());

        assert!(matches!(
            panel.toggle("E_Sprinkler"),
            Err(ToggleError::UnknownKey(_))
        ));
        panel.handle_event(&pin_push("E_Sprinkler", PinState::On, None));
        assert!(panel.instruments().iter().all(|i| !i.on));
    }

    #[tokio::test]
    async fn initial_states_seed_the_panel() {
        let (handle, _status_tx, _outbound_rx) = open_handle();
        let mut panel = InstrumentPanel::new(handle, api());
        panel.begin_fetch();
        panel.apply_initial(vec![("E_Pump", PinState::On), ("E_Fan", PinState::Off)]);

        assert!(panel.instrument("E_Pump").unwrap().on);
        assert!(!panel.instrument("E_Fan").unwrap().on);
        assert_eq!(panel.phase(), SyncPhase::Populated);
    }
}
