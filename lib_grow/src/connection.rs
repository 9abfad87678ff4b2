//! Persistent connection to the telemetry/control endpoint.
//!
//! The manager owns the socket exclusively. Consumers hold a [`SyncHandle`]
//! and never touch the transport: they observe status through a watch
//! channel, receive frames through the dispatcher, and transmit through an
//! outbound queue that is only drained while the connection is open.
//!
//! Reconnects use capped exponential backoff with a bounded attempt budget.
//! Exhausting the budget parks the manager in the observable `GivingUp`
//! state instead of retrying forever.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::dispatcher::{Dispatcher, PushEvent, SubscriberId};
use crate::protocol::{Inbound, Outbound};

/// Lifecycle of the single logical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Errored,
    /// Reconnect budget exhausted; the manager task has exited.
    GivingUp,
}

/// Tunables for the connection loop, normally built from `GrowConfig`.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ws_url: String,
    pub keepalive_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
}

/// Cloneable consumer-side view of the connection: send, status, subscribe.
///
/// Constructed once at the composition root next to the manager and passed
/// to every consumer; there is no implicit global instance.
#[derive(Clone)]
pub struct SyncHandle {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) status_rx: watch::Receiver<ConnectionStatus>,
    pub(crate) outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl SyncHandle {
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    /// Transmits a frame if the connection is open, otherwise drops it
    /// silently. Never queues and never surfaces an error to the caller.
    pub fn send(&self, frame: Outbound) {
        if !self.is_open() {
            log::debug!("Dropping outbound frame while {:?}: {:?}", self.status(), frame);
            return;
        }
        let _ = self.outbound_tx.send(frame);
    }

    pub fn subscribe(&self, label: &str) -> (SubscriberId, mpsc::UnboundedReceiver<PushEvent>) {
        self.dispatcher.subscribe(label)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.dispatcher.unsubscribe(id);
    }
}

/// Owns the socket and runs the connect/read/reconnect loop.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    dispatcher: Arc<Dispatcher>,
    status_tx: watch::Sender<ConnectionStatus>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, dispatcher: Arc<Dispatcher>) -> (Self, SyncHandle) {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = SyncHandle {
            dispatcher: Arc::clone(&dispatcher),
            status_rx,
            outbound_tx,
        };
        let manager = Self {
            settings,
            dispatcher,
            status_tx,
            outbound_rx,
        };
        (manager, handle)
    }

    /// Primary execution loop with reconnection logic. Runs until shutdown
    /// is signalled or the reconnect budget is exhausted.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Self {
            settings,
            dispatcher,
            status_tx,
            mut outbound_rx,
        } = self;

        let mut attempt: u32 = 0;
        loop {
            if shutdown.try_recv().is_ok() {
                return;
            }

            status_tx.send_replace(ConnectionStatus::Connecting);
            log::info!("Connecting to telemetry endpoint: {}", settings.ws_url);

            match connect_async(settings.ws_url.as_str()).await {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    status_tx.send_replace(ConnectionStatus::Open);
                    dispatcher.broadcast(PushEvent::Connected);
                    log::info!("Telemetry connection established");

                    let (mut write, mut read) = ws_stream.split();
                    let mut keepalive = tokio::time::interval_at(
                        tokio::time::Instant::now() + settings.keepalive_interval,
                        settings.keepalive_interval,
                    );

                    let clean_close = loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                let _ = write.close().await;
                                log::info!("Connection manager shutting down");
                                return;
                            }
                            Some(frame) = outbound_rx.recv() => {
                                match serde_json::to_string(&frame) {
                                    Ok(raw) => {
                                        if let Err(e) = write.send(Message::Text(raw.into())).await {
                                            log::error!("Failed to transmit frame: {e}");
                                            break false;
                                        }
                                    }
                                    Err(e) => log::error!("Failed to encode outbound frame: {e}"),
                                }
                            }
                            _ = keepalive.tick() => {
                                match serde_json::to_string(&Outbound::Ping) {
                                    Ok(raw) => {
                                        if let Err(e) = write.send(Message::Text(raw.into())).await {
                                            log::error!("Keep-alive failed: {e}");
                                            break false;
                                        }
                                    }
                                    Err(e) => log::error!("Failed to encode keep-alive: {e}"),
                                }
                            }
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => handle_frame(&dispatcher, &text),
                                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                                Some(Ok(Message::Close(reason))) => {
                                    log::info!("Telemetry connection closed: {reason:?}");
                                    break true;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    log::error!("Telemetry transport error: {e}");
                                    break false;
                                }
                                None => {
                                    log::warn!("Telemetry stream ended by remote host");
                                    break true;
                                }
                            },
                        }
                    };

                    status_tx.send_replace(if clean_close {
                        ConnectionStatus::Closed
                    } else {
                        ConnectionStatus::Errored
                    });
                    dispatcher.broadcast(PushEvent::Disconnected);
                }
                Err(e) => {
                    log::error!("Failed to connect to telemetry endpoint: {e}");
                    status_tx.send_replace(ConnectionStatus::Errored);
                    dispatcher.broadcast(PushEvent::Disconnected);
                }
            }

            // A frame accepted while the connection was open must not ride
            // the next one; a toggle is only valid against the socket it was
            // issued on.
            discard_stale_outbound(&mut outbound_rx);

            // Exactly one reconnect is scheduled per close, whatever the reason.
            attempt += 1;
            if attempt > settings.reconnect_max_attempts {
                log::error!(
                    "Giving up after {} reconnect attempts",
                    settings.reconnect_max_attempts
                );
                status_tx.send_replace(ConnectionStatus::GivingUp);
                dispatcher.broadcast(PushEvent::GaveUp);
                return;
            }

            let delay = backoff_delay(
                settings.reconnect_base_delay,
                settings.reconnect_max_delay,
                attempt,
            );
            log::info!("Reconnect attempt {attempt} scheduled in {delay:?}");
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn discard_stale_outbound(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Ok(frame) = outbound_rx.try_recv() {
        log::warn!("Discarding undelivered outbound frame: {frame:?}");
    }
}

fn handle_frame(dispatcher: &Dispatcher, raw: &str) {
    match serde_json::from_str::<Inbound>(raw) {
        Ok(frame) => dispatcher.broadcast(PushEvent::Frame(Arc::new(frame))),
        Err(e) => log::warn!("Discarding malformed frame: {e}"),
    }
}

/// `base * 2^(attempt-1)`, clamped to `max`. Attempt numbering starts at 1.
pub(crate) fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}
