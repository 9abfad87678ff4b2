//! Worker-attendance feed reconciler.
//!
//! The full history is fetched once (server-side limit) and pushed records
//! are inserted at the head, deduplicated by exact timestamp. Arrival order
//! is preserved in the backing vec; filtering, sorting, and pagination are
//! pure transforms computed on demand and never mutate the accumulated set.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::dispatcher::PushEvent;
use crate::protocol::{AttendanceFrame, Inbound};
use crate::reconcile::SyncPhase;

/// One gate event, immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: Option<String>,
    pub date: String,
    pub time: String,
    pub access: Option<String>,
    pub exit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Records without a usable wire timestamp are stamped with receipt time
    /// so every record is filterable and sortable.
    fn from_frame(frame: &AttendanceFrame, received_at: DateTime<Utc>) -> Self {
        Self {
            id: frame.id.clone(),
            date: frame.date.clone(),
            time: frame.time.clone(),
            access: frame.access.clone(),
            exit: frame.exit.clone(),
            timestamp: frame
                .timestamp
                .as_ref()
                .and_then(|ts| ts.to_datetime())
                .unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Date,
    Time,
    Access,
    Exit,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Display parameters. Pagination is a view over the filtered/sorted set,
/// not a server-side concept.
#[derive(Debug, Clone)]
pub struct AttendanceView {
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// 1-based page number; out-of-range values clamp to the last page.
    pub page: usize,
    pub page_size: usize,
}

impl Default for AttendanceView {
    fn default() -> Self {
        Self {
            sort_field: SortField::Timestamp,
            sort_order: SortOrder::Descending,
            start_date: None,
            end_date: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// One computed page of the filtered/sorted feed.
#[derive(Debug)]
pub struct AttendancePage<'a> {
    pub rows: Vec<&'a AttendanceRecord>,
    pub page: usize,
    pub total_pages: usize,
    pub total_filtered: usize,
}

/// Local view of the attendance feed.
pub struct AttendanceFeed {
    phase: SyncPhase,
    records: Vec<AttendanceRecord>,
    error: Option<String>,
}

impl AttendanceFeed {
    pub fn new() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            records: Vec::new(),
            error: None,
        }
    }

    pub fn begin_fetch(&mut self) {
        self.phase = SyncPhase::Loading;
        self.error = None;
    }

    /// Seeds the feed from the history fetch. Replaces whatever was held.
    pub fn seed(&mut self, frames: &[AttendanceFrame], received_at: DateTime<Utc>) {
        self.records = frames
            .iter()
            .map(|f| AttendanceRecord::from_frame(f, received_at))
            .collect();
        self.phase = SyncPhase::Populated;
        self.error = None;
    }

    pub fn fetch_failed(&mut self, reason: &str) {
        self.error = Some(format!("Failed to fetch attendance data: {reason}"));
        self.phase = SyncPhase::Populated;
    }

    pub fn handle_event(&mut self, event: &PushEvent) {
        if let PushEvent::Frame(frame) = event {
            if let Inbound::Attendance(attendance) = frame.as_ref() {
                self.apply_push(attendance, Utc::now());
            }
        }
    }

    /// Inserts a pushed record at the head. A record with an identical
    /// timestamp replaces the existing one; the list never grows from a
    /// duplicate delivery.
    pub fn apply_push(&mut self, frame: &AttendanceFrame, received_at: DateTime<Utc>) {
        let record = AttendanceRecord::from_frame(frame, received_at);
        self.records.retain(|r| r.timestamp != record.timestamp);
        self.records.insert(0, record);
        self.phase = SyncPhase::Populated;
    }

    /// Filter → sort → paginate, recomputed from the full accumulated set.
    pub fn view(&self, query: &AttendanceView) -> AttendancePage<'_> {
        let mut rows: Vec<&AttendanceRecord> = self
            .records
            .iter()
            .filter(|r| {
                if let Some(start) = query.start_date {
                    if r.timestamp < start {
                        return false;
                    }
                }
                if let Some(end) = query.end_date {
                    if r.timestamp > end {
                        return false;
                    }
                }
                true
            })
            .collect();

        rows.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort_field);
            match query.sort_order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        let page_size = query.page_size.max(1);
        let total_filtered = rows.len();
        let total_pages = if total_filtered == 0 {
            1
        } else {
            total_filtered.div_ceil(page_size)
        };
        let page = query.page.clamp(1, total_pages);
        let rows = rows
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        AttendancePage {
            rows,
            page,
            total_pages,
            total_filtered,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for AttendanceFeed {
    fn default() -> Self {
        Self::new()
    }
}

fn compare(a: &AttendanceRecord, b: &AttendanceRecord, field: SortField) -> Ordering {
    match field {
        SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortField::Date => a.date.cmp(&b.date),
        SortField::Time => a.time.cmp(&b.time),
        SortField::Access => a
            .access
            .as_deref()
            .unwrap_or("")
            .cmp(b.access.as_deref().unwrap_or("")),
        SortField::Exit => a
            .exit
            .as_deref()
            .unwrap_or("")
            .cmp(b.exit.as_deref().unwrap_or("")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireTimestamp;
    use chrono::TimeZone;

    // Day 1..=31 lands in March 2024, 32.. rolls into April.
    fn frame(day: u32, hour: u32) -> AttendanceFrame {
        let (month, day_of_month) = if day <= 31 { (3, day) } else { (4, day - 31) };
        let ts = Utc
            .with_ymd_and_hms(2024, month, day_of_month, hour, 0, 0)
            .single()
            .unwrap();
        AttendanceFrame {
            id: None,
            date: format!("2024-{month:02}-{day_of_month:02}"),
            time: format!("{hour:02}:00"),
            access: Some(format!("{hour:02}:00")),
            exit: None,
            timestamp: Some(WireTimestamp::Millis(ts.timestamp_millis())),
        }
    }

    fn seeded_feed(days: u32) -> AttendanceFeed {
        let frames: Vec<AttendanceFrame> = (1..=days).map(|d| frame(d, 8)).collect();
        let mut feed = AttendanceFeed::new();
        feed.seed(&frames, Utc::now());
        feed
    }

    #[test]
    fn duplicate_timestamps_replace_at_the_head_without_growing() {
        let mut feed = seeded_feed(5);
        assert_eq!(feed.len(), 5);

        let mut replacement = frame(3, 8);
        replacement.exit = Some("17:00".into());
        feed.apply_push(&replacement, Utc::now());

        assert_eq!(feed.len(), 5);
        let head = &feed.records()[0];
        assert_eq!(head.date, "2024-03-03");
        assert_eq!(head.exit.as_deref(), Some("17:00"));
    }

    #[test]
    fn new_pushes_land_at_the_head_without_resorting() {
        let mut feed = seeded_feed(3);
        feed.apply_push(&frame(10, 9), Utc::now());
        assert_eq!(feed.records()[0].date, "2024-03-10");
        // Seed order behind the head is untouched.
        assert_eq!(feed.records()[1].date, "2024-03-01");
    }

    #[test]
    fn records_without_timestamps_get_the_receipt_time() {
        let mut feed = AttendanceFeed::new();
        let received_at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).single().unwrap();
        let mut raw = frame(9, 12);
        raw.timestamp = None;
        feed.apply_push(&raw, received_at);
        assert_eq!(feed.records()[0].timestamp, received_at);
    }

    #[test]
    fn filter_sort_paginate_compose() {
        // 45 records, a date range selecting 10, descending by date,
        // page size 20: one page of exactly those 10, newest first.
        let feed = seeded_feed(45); // wraps into April but timestamps stay unique
        let query = AttendanceView {
            sort_field: SortField::Date,
            sort_order: SortOrder::Descending,
            start_date: Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).single(),
            end_date: Utc.with_ymd_and_hms(2024, 3, 20, 23, 59, 59).single(),
            page: 1,
            page_size: 20,
        };

        let page = feed.view(&query);
        assert_eq!(page.total_filtered, 10);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.rows.len(), 10);
        assert_eq!(page.rows[0].date, "2024-03-20");
        assert_eq!(page.rows[9].date, "2024-03-11");
        assert!(page
            .rows
            .windows(2)
            .all(|pair| pair[0].date >= pair[1].date));
    }

    #[test]
    fn pagination_slices_and_reports_totals() {
        let feed = seeded_feed(45);
        let query = AttendanceView {
            page: 3,
            page_size: 20,
            sort_order: SortOrder::Ascending,
            ..Default::default()
        };
        let page = feed.view(&query);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.rows.len(), 5);

        // Out-of-range page clamps to the last page.
        let clamped = feed.view(&AttendanceView {
            page: 99,
            ..query.clone()
        });
        assert_eq!(clamped.page, 3);
        assert_eq!(clamped.rows.len(), 5);
    }

    #[test]
    fn empty_feed_reports_one_empty_page() {
        let feed = AttendanceFeed::new();
        let page = feed.view(&AttendanceView::default());
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.page, 1);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn sorting_is_a_repeatable_pure_transform() {
        let feed = seeded_feed(5);
        let asc = AttendanceView {
            sort_field: SortField::Date,
            sort_order: SortOrder::Ascending,
            ..Default::default()
        };
        let first = feed.view(&asc);
        let second = feed.view(&asc);
        assert_eq!(first.rows, second.rows);
        assert_eq!(first.rows[0].date, "2024-03-01");
        // The backing set is untouched by viewing.
        assert_eq!(feed.records()[0].date, "2024-03-01");
    }
}
