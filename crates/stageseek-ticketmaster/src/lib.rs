//! Ticketmaster Discovery API adapter: raw event DTOs, the paginated
//! window fetcher, and the pure field mapper into canonical drafts.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use stageseek_core::{
    DateWindow, EventDraft, Genre, GeoPoint, PerformanceDraft, ProductionDraft, Region, VenueDraft,
};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CRATE_NAME: &str = "stageseek-ticketmaster";

pub const DISCOVERY_BASE_URL: &str = "https://app.ticketmaster.com/discovery/v2";

// ---------------------------------------------------------------------------
// Raw provider DTOs

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmEvent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default, rename = "pleaseNote")]
    pub please_note: Option<String>,
    #[serde(default)]
    pub images: Vec<TmImage>,
    #[serde(default)]
    pub dates: Option<TmDates>,
    #[serde(default)]
    pub classifications: Vec<TmClassification>,
    #[serde(default, rename = "priceRanges")]
    pub price_ranges: Vec<TmPriceRange>,
    #[serde(default, rename = "_embedded")]
    pub embedded: Option<TmEventEmbedded>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmImage {
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmDates {
    #[serde(default)]
    pub start: Option<TmDateBoundary>,
    #[serde(default)]
    pub end: Option<TmDateBoundary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmDateBoundary {
    #[serde(default, rename = "localDate")]
    pub local_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmClassification {
    #[serde(default)]
    pub genre: Option<TmNamed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmNamed {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmPriceRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmEventEmbedded {
    #[serde(default)]
    pub venues: Vec<TmVenue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmVenue {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<TmNamed>,
    #[serde(default, rename = "postalCode")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub state: Option<TmNamed>,
    #[serde(default)]
    pub location: Option<TmCoordinates>,
}

/// The provider serializes coordinates as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmCoordinates {
    pub longitude: String,
    pub latitude: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmEventsPage {
    #[serde(default, rename = "_embedded")]
    pub embedded: Option<TmPageEmbedded>,
    #[serde(default)]
    pub page: Option<TmPageInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmPageEmbedded {
    #[serde(default)]
    pub events: Vec<TmEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TmPageInfo {
    #[serde(default, rename = "totalPages")]
    pub total_pages: u32,
}

// ---------------------------------------------------------------------------
// Field mapping into canonical vocabulary

/// Provider genre names are a fixed 8-entry table; anything else maps to no
/// genre and the caller writes no association.
pub fn canonical_genre(name: &str) -> Option<Genre> {
    match name {
        "Theatre" => Some(Genre::Drama),
        "Musical" => Some(Genre::Musical),
        "Opera" => Some(Genre::Opera),
        "Dance" => Some(Genre::Dance),
        "Ballet" => Some(Genre::Ballet),
        "Comedy" => Some(Genre::Comedy),
        "Circus" => Some(Genre::Circus),
        "Cabaret" => Some(Genre::Cabaret),
        _ => None,
    }
}

/// Provider state/region names normalize through a fixed 13-entry table;
/// unknown or missing values fall back to London.
pub fn canonical_region(state: Option<&str>) -> Region {
    let Some(name) = state else {
        return Region::London;
    };
    match name {
        "London" | "Greater London" => Region::London,
        "South East England" => Region::SouthEast,
        "South West England" => Region::SouthWest,
        "East of England" => Region::EastOfEngland,
        "East Midlands" => Region::EastMidlands,
        "West Midlands" => Region::WestMidlands,
        "Yorkshire" => Region::Yorkshire,
        "North West England" => Region::NorthWest,
        "North East England" => Region::NorthEast,
        "Scotland" => Region::Scotland,
        "Wales" => Region::Wales,
        "Northern Ireland" => Region::NorthernIreland,
        _ => Region::London,
    }
}

/// Lowercase, collapse runs of non-alphanumerics to single hyphens, trim,
/// cap at 100 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(100);
    slug.trim_end_matches('-').to_string()
}

/// Stable slug for a production: the external id is folded in so distinct
/// events with identical titles cannot collide.
pub fn production_slug(title: &str, external_id: &str) -> String {
    slugify(&format!("{title}-{external_id}"))
}

/// Prefer a wide 16:9 poster; anything else is treated as no image.
pub fn best_image(images: &[TmImage]) -> Option<String> {
    images
        .iter()
        .find(|image| {
            image.ratio.as_deref() == Some("16_9") && image.width.is_some_and(|w| w > 500)
        })
        .map(|image| image.url.clone())
}

fn geo_point(venue: &TmVenue) -> Option<GeoPoint> {
    let location = venue.location.as_ref()?;
    Some(GeoPoint {
        longitude: location.longitude.parse().ok()?,
        latitude: location.latitude.parse().ok()?,
    })
}

fn venue_draft(event: &TmEvent) -> Option<VenueDraft> {
    let venue = event.embedded.as_ref()?.venues.first()?;
    Some(VenueDraft {
        external_id: venue.id.clone(),
        name: venue.name.clone(),
        city: venue
            .city
            .as_ref()
            .map(|city| city.name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        postcode: venue.postal_code.clone().unwrap_or_default(),
        region: canonical_region(venue.state.as_ref().map(|state| state.name.as_str())),
        location: geo_point(venue),
    })
}

fn performance_draft(event: &TmEvent) -> Option<PerformanceDraft> {
    let dates = event.dates.as_ref()?;
    let start_raw = dates.start.as_ref()?.local_date.as_deref()?;
    let run_start = NaiveDate::parse_from_str(start_raw, "%Y-%m-%d").ok()?;
    let run_end = dates
        .end
        .as_ref()
        .and_then(|end| end.local_date.as_deref())
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .unwrap_or(run_start);
    let price = event.price_ranges.first();
    Some(PerformanceDraft {
        run_start,
        run_end,
        price_from: price.and_then(|range| range.min),
        price_to: price.and_then(|range| range.max),
        booking_url: event.url.clone(),
    })
}

/// Pure translation of one raw provider event into the canonical draft the
/// reconciliation engine consumes. Missing venue or start date surface as
/// `None` sub-drafts rather than errors.
pub fn map_event(event: &TmEvent) -> EventDraft {
    EventDraft {
        external_id: event.id.clone(),
        venue: venue_draft(event),
        production: ProductionDraft {
            title: event.name.clone(),
            slug: production_slug(&event.name, &event.id),
            short_description: event.info.clone().or_else(|| event.please_note.clone()),
            poster_image_url: best_image(&event.images),
            source_url: event.url.clone(),
        },
        genre: event
            .classifications
            .first()
            .and_then(|classification| classification.genre.as_ref())
            .and_then(|genre| canonical_genre(&genre.name)),
        performance: performance_draft(event),
    }
}

// ---------------------------------------------------------------------------
// Fetching

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider request failed after retries: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("sync cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub country_code: String,
    pub segment: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub page_delay: Duration,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DISCOVERY_BASE_URL.to_string(),
            country_code: "GB".to_string(),
            segment: "Arts & Theatre".to_string(),
            page_size: 200,
            max_pages: 5,
            page_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A source of raw provider events, one window at a time. The seam the
/// orchestrator is tested through.
pub trait EventSource: Send + Sync {
    fn open_window(&self, window: DateWindow, cancel: CancellationToken) -> Box<dyn EventPager>;
}

/// Lazy sequential pager over one window. Finite and not restartable; a
/// fresh window requires a fresh pager.
#[async_trait]
pub trait EventPager: Send {
    /// The next page of raw events, or `None` once the window is exhausted.
    async fn next_page(&mut self) -> Result<Option<Vec<TmEvent>>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct TicketmasterClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl TicketmasterClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building provider http client")?;
        Ok(Self { http, config })
    }
}

impl EventSource for TicketmasterClient {
    fn open_window(&self, window: DateWindow, cancel: CancellationToken) -> Box<dyn EventPager> {
        Box::new(WindowPager {
            http: self.http.clone(),
            config: self.config.clone(),
            window,
            cancel,
            page: 0,
            total_pages: 1,
            done: false,
        })
    }
}

/// Seconds-precision instant rendering the provider expects.
fn tm_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

struct WindowPager {
    http: reqwest::Client,
    config: ClientConfig,
    window: DateWindow,
    cancel: CancellationToken,
    page: u32,
    total_pages: u32,
    done: bool,
}

#[async_trait]
impl EventPager for WindowPager {
    async fn next_page(&mut self) -> Result<Option<Vec<TmEvent>>, FetchError> {
        if self.done || self.page >= self.total_pages.min(self.config.max_pages) {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if self.page > 0 {
            // Fixed spacing between page requests keeps us inside the
            // provider's rate limit.
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = sleep(self.config.page_delay) => {}
            }
        }

        let Some(page_data) = self.fetch_page(self.page).await? else {
            // Paging exhausted for this window; normal end, not a failure.
            debug!(page = self.page, "provider page limit reached for window");
            self.done = true;
            return Ok(None);
        };
        let Some(embedded) = page_data.embedded else {
            self.done = true;
            return Ok(None);
        };
        self.total_pages = page_data
            .page
            .map(|info| info.total_pages)
            .unwrap_or(1)
            .min(self.config.max_pages);
        self.page += 1;
        Ok(Some(embedded.events))
    }
}

impl WindowPager {
    /// One page request with bounded retry for transient failures.
    /// `Ok(None)` is the provider's paging-exhausted signal (HTTP 400).
    async fn fetch_page(&self, page: u32) -> Result<Option<TmEventsPage>, FetchError> {
        let url = format!("{}/events.json", self.config.base_url);
        let params = [
            ("apikey", self.config.api_key.clone()),
            ("countryCode", self.config.country_code.clone()),
            ("segmentName", self.config.segment.clone()),
            ("startDateTime", tm_instant(self.window.start)),
            ("endDateTime", tm_instant(self.window.end)),
            ("size", self.config.page_size.to_string()),
            ("page", page.to_string()),
            ("sort", "date,asc".to_string()),
        ];

        let mut last_error: Option<reqwest::Error> = None;
        for attempt in 0..=self.config.backoff.max_retries {
            match self.http.get(&url).query(&params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::BAD_REQUEST {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(resp.json().await?));
                    }
                    if is_transient_status(status) && attempt < self.config.backoff.max_retries {
                        sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Err(err) => {
                    if is_transient_error(&err) && attempt < self.config.backoff.max_retries {
                        last_error = Some(err);
                        sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Transport(err));
                }
            }
        }

        Err(FetchError::Transport(
            last_error.expect("retry loop records the last transport error"),
        ))
    }
}
