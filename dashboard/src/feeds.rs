//! Consumer tasks, one per reconciler domain.
//!
//! Each task seeds its reconciler with the REST snapshot while the push
//! stream is already flowing; the select loop applies whichever resolves
//! first, so updates land in arrival order.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use lib_grow::connection::SyncHandle;
use lib_grow::fetch::ApiClient;
use lib_grow::reconcile::{
    fetch_pin_states, AttendanceFeed, AttendanceView, InstrumentPanel, SensorBoard,
};

pub async fn run_sensor_feed(
    handle: SyncHandle,
    api: Arc<ApiClient>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (id, mut events) = handle.subscribe("sensor-dashboard");
    let mut board = SensorBoard::new();
    board.begin_fetch();

    let fetch = api.latest_sensor_snapshot();
    tokio::pin!(fetch);
    let mut fetched = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            snapshot = &mut fetch, if !fetched => {
                fetched = true;
                match snapshot {
                    Ok(frame) => {
                        board.apply_snapshot(&frame);
                        log::info!("Sensor snapshot applied");
                    }
                    Err(e) => {
                        log::error!("Sensor snapshot fetch failed: {e}");
                        board.fetch_failed(&e.to_string());
                    }
                }
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(status) = event.implied_status() {
                        log::info!("Connection status: {status:?}");
                    }
                    board.handle_event(&event);
                    for reading in board.readings() {
                        log::debug!(
                            "{}: {:.1}{} ({:.0}%)",
                            reading.name,
                            reading.value,
                            reading.unit,
                            reading.fill_percent()
                        );
                    }
                }
                None => break,
            }
        }
    }

    handle.unsubscribe(id);
}

pub async fn run_instrument_panel(
    handle: SyncHandle,
    api: Arc<ApiClient>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (id, mut events) = handle.subscribe("instrument-control");
    let mut panel = InstrumentPanel::new(handle.clone(), Arc::clone(&api));
    panel.begin_fetch();

    let fetch = fetch_pin_states(&api);
    tokio::pin!(fetch);
    let mut fetched = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            states = &mut fetch, if !fetched => {
                fetched = true;
                match states {
                    Ok(states) => {
                        panel.apply_initial(states);
                        log::info!("Instrument states seeded");
                    }
                    Err(e) => {
                        log::error!("Pin-state fetch failed: {e}");
                        panel.fetch_failed(&e.to_string());
                    }
                }
            }
            event = events.recv() => match event {
                Some(event) => {
                    panel.handle_event(&event);
                    for instrument in panel.instruments() {
                        log::debug!(
                            "{}: {}",
                            instrument.label,
                            if instrument.on { "on" } else { "off" }
                        );
                    }
                }
                None => break,
            }
        }
    }

    handle.unsubscribe(id);
}

pub async fn run_attendance_feed(
    handle: SyncHandle,
    api: Arc<ApiClient>,
    limit: u32,
    page_size: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (id, mut events) = handle.subscribe("attendance-feed");
    let mut feed = AttendanceFeed::new();
    feed.begin_fetch();
    let view = AttendanceView {
        page_size,
        ..Default::default()
    };

    let fetch = api.attendance(limit);
    tokio::pin!(fetch);
    let mut fetched = false;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            history = &mut fetch, if !fetched => {
                fetched = true;
                match history {
                    Ok(frames) => {
                        feed.seed(&frames, Utc::now());
                        log::info!("Attendance history seeded ({} records)", feed.len());
                    }
                    Err(e) => {
                        log::error!("Attendance fetch failed: {e}");
                        feed.fetch_failed(&e.to_string());
                    }
                }
            }
            event = events.recv() => match event {
                Some(event) => {
                    feed.handle_event(&event);
                    let page = feed.view(&view);
                    log::debug!(
                        "Attendance: {} records, page {}/{}",
                        page.total_filtered,
                        page.page,
                        page.total_pages
                    );
                }
                None => break,
            }
        }
    }

    handle.unsubscribe(id);
}
