//! Core domain model for Stage Seek: canonical vocabulary, date windows,
//! mapped-event drafts, and the record shapes persisted to the datastore.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "stageseek-core";

/// Canonical UK region vocabulary. Provider spellings are normalized into
/// these by the field mapper; unknown values fall back to `London`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    London,
    SouthEast,
    SouthWest,
    EastOfEngland,
    EastMidlands,
    WestMidlands,
    Yorkshire,
    NorthWest,
    NorthEast,
    Scotland,
    Wales,
    NorthernIreland,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::London => "london",
            Region::SouthEast => "south_east",
            Region::SouthWest => "south_west",
            Region::EastOfEngland => "east_of_england",
            Region::EastMidlands => "east_midlands",
            Region::WestMidlands => "west_midlands",
            Region::Yorkshire => "yorkshire",
            Region::NorthWest => "north_west",
            Region::NorthEast => "north_east",
            Region::Scotland => "scotland",
            Region::Wales => "wales",
            Region::NorthernIreland => "northern_ireland",
        }
    }
}

/// Canonical genre vocabulary. Associations are only ever written with one
/// of these values; unmapped provider genres produce no association at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Drama,
    Musical,
    Opera,
    Dance,
    Ballet,
    Comedy,
    Circus,
    Cabaret,
}

impl Genre {
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Drama => "drama",
            Genre::Musical => "musical",
            Genre::Opera => "opera",
            Genre::Dance => "dance",
            Genre::Ballet => "ballet",
            Genre::Comedy => "comedy",
            Genre::Circus => "circus",
            Genre::Cabaret => "cabaret",
        }
    }
}

/// One bounded sub-range of a sync horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Split `[start, end]` into ordered, contiguous, non-overlapping windows of
/// at most `max_days` each; the final window is truncated to `end`. Produces
/// no windows when `end <= start`.
pub fn date_windows(start: DateTime<Utc>, end: DateTime<Utc>, max_days: i64) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    if max_days <= 0 {
        return windows;
    }
    let span = Duration::days(max_days);
    let mut cursor = start;
    while cursor < end {
        let window_end = (cursor + span).min(end);
        windows.push(DateWindow {
            start: cursor,
            end: window_end,
        });
        cursor = window_end;
    }
    windows
}

/// WGS84 point extracted from provider coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    /// WKT rendering used by the datastore's geography column.
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.longitude, self.latitude)
    }
}

/// Venue fields extracted from one provider event.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueDraft {
    pub external_id: String,
    pub name: String,
    pub city: String,
    pub postcode: String,
    pub region: Region,
    pub location: Option<GeoPoint>,
}

/// Production (show/title) fields extracted from one provider event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionDraft {
    pub title: String,
    pub slug: String,
    pub short_description: Option<String>,
    pub poster_image_url: Option<String>,
    pub source_url: Option<String>,
}

/// Performance (one run at one venue) fields; only present when the
/// provider event carries a start date.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceDraft {
    pub run_start: NaiveDate,
    pub run_end: NaiveDate,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub booking_url: Option<String>,
}

/// Canonical handoff from the field mapper into the reconciliation engine.
/// Absent sub-drafts encode the skip conditions: no venue means the whole
/// event is skipped, no performance means no dated run was advertised.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub external_id: String,
    pub venue: Option<VenueDraft>,
    pub production: ProductionDraft,
    pub genre: Option<Genre>,
    pub performance: Option<PerformanceDraft>,
}

pub const SOURCE_NAME: &str = "ticketmaster";
pub const BOOKING_SOURCE_LABEL: &str = "Ticketmaster";

pub const VENUES_TABLE: &str = "venues";
pub const PRODUCTIONS_TABLE: &str = "productions";
pub const PRODUCTION_GENRES_TABLE: &str = "production_genres";
pub const PERFORMANCES_TABLE: &str = "performances";
pub const SYNC_LOG_TABLE: &str = "api_sync_log";

/// Row shape upserted into `venues`, keyed by `ticketmaster_venue_id`.
/// `location` is omitted entirely when the provider gave no coordinates so
/// an update never nulls out a previously known point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub name: String,
    pub city: String,
    pub postcode: String,
    pub region: Region,
    pub country: String,
    pub ticketmaster_venue_id: String,
    pub is_verified: bool,
    pub venue_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Row shape upserted into `productions`, keyed by `source_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub title: String,
    pub slug: String,
    pub short_description: Option<String>,
    pub poster_image_url: Option<String>,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub status: String,
}

/// Row shape upserted into `production_genres`, keyed by the composite
/// `production_id,genre`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionGenreRecord {
    pub production_id: String,
    pub genre: Genre,
}

/// Row shape upserted into `performances`, keyed by `source_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub production_id: String,
    pub venue_id: String,
    pub run_start: NaiveDate,
    pub run_end: NaiveDate,
    pub price_from: Option<f64>,
    pub price_to: Option<f64>,
    pub booking_url: Option<String>,
    pub booking_source: String,
    pub source: String,
    pub source_id: String,
    pub last_synced_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Append-only audit row, exactly one per orchestrator invocation. Counts
/// are always present; on a failed run they cover the work completed before
/// the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogRecord {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub records_fetched: u64,
    pub records_created: u64,
    pub records_skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
