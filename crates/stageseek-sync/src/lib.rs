//! Listing sync pipeline: the reconciliation engine, the orchestrator state
//! machine, the run log, and the cron scheduler that drives it all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Months, Utc};
use serde_json::Value;
use stageseek_core::{
    date_windows, EventDraft, PerformanceRecord, ProductionGenreRecord, ProductionRecord,
    SyncLogRecord, SyncStatus, VenueRecord, BOOKING_SOURCE_LABEL, PERFORMANCES_TABLE,
    PRODUCTIONS_TABLE, PRODUCTION_GENRES_TABLE, SOURCE_NAME, SYNC_LOG_TABLE, VENUES_TABLE,
};
use stageseek_store::{Datastore, RestDatastore, StoreError};
use stageseek_ticketmaster::{
    map_event, ClientConfig, EventSource, FetchError, TicketmasterClient,
};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const CRATE_NAME: &str = "stageseek-sync";

/// Every 6 hours.
pub const DEFAULT_SYNC_CRON: &str = "0 0 */6 * * *";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ticketmaster_api_key: String,
    pub datastore_url: String,
    pub datastore_service_key: String,
    pub datastore_anon_key: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    /// Missing credentials are a hard startup failure; nothing should get
    /// as far as a sync run without them.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ticketmaster_api_key: std::env::var("TICKETMASTER_API_KEY")
                .context("TICKETMASTER_API_KEY must be set")?,
            datastore_url: std::env::var("DATASTORE_URL")
                .context("DATASTORE_URL must be set")?,
            datastore_service_key: std::env::var("DATASTORE_SERVICE_KEY")
                .context("DATASTORE_SERVICE_KEY must be set")?,
            datastore_anon_key: std::env::var("DATASTORE_ANON_KEY")
                .context("DATASTORE_ANON_KEY must be set")?,
            scheduler_enabled: std::env::var("STAGESEEK_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            sync_cron: std::env::var("SYNC_CRON").unwrap_or_else(|_| DEFAULT_SYNC_CRON.to_string()),
            http_timeout_secs: std::env::var("STAGESEEK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Horizon shape of one run: how far ahead to look and how finely to chunk.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub horizon_months: u32,
    pub chunk_days: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            horizon_months: 6,
            chunk_days: 14,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single event produced no performance row. None of these abort the
/// run; they only move the event into the skipped count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingVenue,
    VenueNotReturned,
    ProductionNotReturned,
    MissingStartDate,
    StoreRejected,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingVenue => "missing_venue",
            SkipReason::VenueNotReturned => "venue_not_returned",
            SkipReason::ProductionNotReturned => "production_not_returned",
            SkipReason::MissingStartDate => "missing_start_date",
            SkipReason::StoreRejected => "store_rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Persisted,
    Skipped(SkipReason),
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Writes one provider event through the ordered venue → production →
/// genre → performance upsert chain. Sole writer of those tables during a
/// sync. Every write is keyed on a stable external id, so re-running the
/// same event across overlapping windows or repeated ticks converges.
pub struct ReconcileEngine {
    store: Arc<dyn Datastore>,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Never fails: a store error while processing one event is logged and
    /// reported as skipped so sibling events keep flowing.
    pub async fn reconcile(&self, draft: &EventDraft) -> ReconcileOutcome {
        match self.try_reconcile(draft).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(event = %draft.external_id, error = %err, "event reconciliation failed");
                ReconcileOutcome::Skipped(SkipReason::StoreRejected)
            }
        }
    }

    async fn try_reconcile(&self, draft: &EventDraft) -> Result<ReconcileOutcome, StoreError> {
        let Some(venue) = &draft.venue else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingVenue));
        };

        let venue_record = VenueRecord {
            name: venue.name.clone(),
            city: venue.city.clone(),
            postcode: venue.postcode.clone(),
            region: venue.region,
            country: "United Kingdom".to_string(),
            ticketmaster_venue_id: venue.external_id.clone(),
            is_verified: true,
            venue_type: "other".to_string(),
            location: venue.location.map(|point| point.to_wkt()),
        };
        let venue_row = self
            .store
            .upsert(
                VENUES_TABLE,
                serde_json::to_value(&venue_record)?,
                "ticketmaster_venue_id",
            )
            .await?;
        let Some(venue_id) = venue_row.as_ref().and_then(row_id) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::VenueNotReturned));
        };

        let production_record = ProductionRecord {
            title: draft.production.title.clone(),
            slug: draft.production.slug.clone(),
            short_description: draft.production.short_description.clone(),
            poster_image_url: draft.production.poster_image_url.clone(),
            source: SOURCE_NAME.to_string(),
            source_id: draft.external_id.clone(),
            source_url: draft.production.source_url.clone(),
            status: "approved".to_string(),
        };
        let production_row = self
            .store
            .upsert(
                PRODUCTIONS_TABLE,
                serde_json::to_value(&production_record)?,
                "source_id",
            )
            .await?;
        let Some(production_id) = production_row.as_ref().and_then(row_id) else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::ProductionNotReturned));
        };

        // Unmapped provider genres write nothing at all.
        if let Some(genre) = draft.genre {
            let genre_record = ProductionGenreRecord {
                production_id: production_id.clone(),
                genre,
            };
            self.store
                .upsert(
                    PRODUCTION_GENRES_TABLE,
                    serde_json::to_value(&genre_record)?,
                    "production_id,genre",
                )
                .await?;
        }

        let Some(performance) = &draft.performance else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::MissingStartDate));
        };
        let performance_record = PerformanceRecord {
            production_id,
            venue_id,
            run_start: performance.run_start,
            run_end: performance.run_end,
            price_from: performance.price_from,
            price_to: performance.price_to,
            booking_url: performance.booking_url.clone(),
            booking_source: BOOKING_SOURCE_LABEL.to_string(),
            source: SOURCE_NAME.to_string(),
            source_id: draft.external_id.clone(),
            last_synced_at: Utc::now(),
            status: "approved".to_string(),
        };
        self.store
            .upsert(
                PERFORMANCES_TABLE,
                serde_json::to_value(&performance_record)?,
                "source_id",
            )
            .await?;
        Ok(ReconcileOutcome::Persisted)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    fetched: u64,
    created: u64,
    skipped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SyncLogRecord),
    /// A previous run is still in flight; the trigger was dropped.
    AlreadyRunning,
}

/// The sync orchestrator: idle → running → (success | failed) → idle.
/// Strictly sequential (windows, then pages, then events, one at a time)
/// with exactly one run-log row per invocation.
pub struct SyncService {
    store: Arc<dyn Datastore>,
    source: Arc<dyn EventSource>,
    engine: ReconcileEngine,
    options: SyncOptions,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn Datastore>,
        source: Arc<dyn EventSource>,
        options: SyncOptions,
    ) -> Self {
        Self {
            engine: ReconcileEngine::new(store.clone()),
            store,
            source,
            options,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Token honored at page and event boundaries for graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("sync already running, skipping trigger");
            return Ok(RunOutcome::AlreadyRunning);
        }
        let result = self.run_exclusive().await;
        self.running.store(false, Ordering::Release);
        result.map(RunOutcome::Completed)
    }

    async fn run_exclusive(&self) -> Result<SyncLogRecord> {
        let started_at = Utc::now();
        info!("starting ticketmaster sync");

        let mut counters = Counters::default();
        let record = match self.execute(&mut counters).await {
            Ok(()) => {
                info!(
                    fetched = counters.fetched,
                    created = counters.created,
                    skipped = counters.skipped,
                    "sync complete"
                );
                SyncLogRecord {
                    source: SOURCE_NAME.to_string(),
                    started_at,
                    completed_at: Utc::now(),
                    status: SyncStatus::Success,
                    records_fetched: counters.fetched,
                    records_created: counters.created,
                    records_skipped: counters.skipped,
                    error_message: None,
                }
            }
            Err(err) => {
                error!(error = %err, "sync failed");
                SyncLogRecord {
                    source: SOURCE_NAME.to_string(),
                    started_at,
                    completed_at: Utc::now(),
                    status: SyncStatus::Failed,
                    records_fetched: counters.fetched,
                    records_created: counters.created,
                    records_skipped: counters.skipped,
                    error_message: Some(err.to_string()),
                }
            }
        };

        self.store
            .insert(
                SYNC_LOG_TABLE,
                serde_json::to_value(&record).context("encoding sync log record")?,
            )
            .await
            .context("writing sync log record")?;
        Ok(record)
    }

    async fn execute(&self, counters: &mut Counters) -> Result<(), SyncError> {
        let start = Utc::now();
        let end = start + Months::new(self.options.horizon_months);
        let windows = date_windows(start, end, self.options.chunk_days);
        info!(windows = windows.len(), "computed sync horizon");

        for window in windows {
            debug!(start = %window.start, end = %window.end, "syncing window");
            let mut pager = self.source.open_window(window, self.cancel.clone());
            while let Some(events) = pager.next_page().await? {
                counters.fetched += events.len() as u64;
                for event in &events {
                    if self.cancel.is_cancelled() {
                        return Err(SyncError::Fetch(FetchError::Cancelled));
                    }
                    let draft = map_event(event);
                    match self.engine.reconcile(&draft).await {
                        ReconcileOutcome::Persisted => counters.created += 1,
                        ReconcileOutcome::Skipped(reason) => {
                            debug!(
                                event = %draft.external_id,
                                reason = reason.as_str(),
                                "event skipped"
                            );
                            counters.skipped += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Wire the real provider client and datastore from config.
pub fn build_service(config: &SyncConfig) -> Result<Arc<SyncService>> {
    let store = RestDatastore::new(
        &config.datastore_url,
        &config.datastore_service_key,
        config.http_timeout(),
    )
    .context("building datastore client")?;
    let client_config = ClientConfig {
        timeout: config.http_timeout(),
        ..ClientConfig::new(config.ticketmaster_api_key.clone())
    };
    let client = TicketmasterClient::new(client_config).context("building provider client")?;
    Ok(Arc::new(SyncService::new(
        Arc::new(store),
        Arc::new(client),
        SyncOptions::default(),
    )))
}

pub async fn run_sync_once_from_env() -> Result<SyncLogRecord> {
    let config = SyncConfig::from_env()?;
    let service = build_service(&config)?;
    match service.run().await? {
        RunOutcome::Completed(record) => Ok(record),
        RunOutcome::AlreadyRunning => anyhow::bail!("sync already running"),
    }
}

/// Cron-driven trigger. Overlap protection lives in the service itself, so
/// a tick landing mid-run is dropped, not queued.
pub async fn build_scheduler(service: Arc<SyncService>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_service = service.clone();
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let service = job_service.clone();
        Box::pin(async move {
            info!("scheduled sync triggered");
            if let Err(err) = service.run().await {
                error!(error = %err, "scheduled sync errored");
            }
        })
    })
    .with_context(|| format!("creating sync job for cron {cron}"))?;
    sched.add(job).await.context("adding sync job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stageseek_core::DateWindow;
    use stageseek_store::MemoryDatastore;
    use stageseek_ticketmaster::{
        EventPager, TmClassification, TmDateBoundary, TmDates, TmEvent, TmEventEmbedded, TmNamed,
        TmVenue,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn mk_event(id: &str) -> TmEvent {
        TmEvent {
            id: id.to_string(),
            name: format!("Show {id}"),
            url: Some("https://tickets.example/show".to_string()),
            dates: Some(TmDates {
                start: Some(TmDateBoundary {
                    local_date: Some("2026-04-01".to_string()),
                }),
                end: Some(TmDateBoundary {
                    local_date: Some("2026-04-10".to_string()),
                }),
            }),
            classifications: vec![TmClassification {
                genre: Some(TmNamed {
                    name: "Theatre".to_string(),
                }),
            }],
            embedded: Some(TmEventEmbedded {
                venues: vec![TmVenue {
                    id: format!("venue-{id}"),
                    name: "Playhouse".to_string(),
                    city: Some(TmNamed {
                        name: "Leeds".to_string(),
                    }),
                    postal_code: Some("LS1 3AF".to_string()),
                    state: Some(TmNamed {
                        name: "Yorkshire".to_string(),
                    }),
                    location: None,
                }],
            }),
            ..Default::default()
        }
    }

    fn mk_event_without_venue(id: &str) -> TmEvent {
        let mut event = mk_event(id);
        event.embedded = None;
        event
    }

    fn mk_event_without_date(id: &str) -> TmEvent {
        let mut event = mk_event(id);
        event.dates = None;
        event
    }

    async fn reconcile(store: &Arc<MemoryDatastore>, event: &TmEvent) -> ReconcileOutcome {
        let engine = ReconcileEngine::new(store.clone());
        engine.reconcile(&map_event(event)).await
    }

    #[tokio::test]
    async fn reconciling_the_same_event_twice_creates_single_rows() {
        let store = Arc::new(MemoryDatastore::new());
        assert_eq!(
            reconcile(&store, &mk_event("evt-1")).await,
            ReconcileOutcome::Persisted
        );
        assert_eq!(
            reconcile(&store, &mk_event("evt-1")).await,
            ReconcileOutcome::Persisted
        );

        assert_eq!(store.rows(VENUES_TABLE).await.len(), 1);
        assert_eq!(store.rows(PRODUCTIONS_TABLE).await.len(), 1);
        assert_eq!(store.rows(PERFORMANCES_TABLE).await.len(), 1);
        assert_eq!(store.rows(PRODUCTION_GENRES_TABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn event_without_venue_is_skipped_entirely() {
        let store = Arc::new(MemoryDatastore::new());
        let outcome = reconcile(&store, &mk_event_without_venue("evt-2")).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::MissingVenue)
        );
        assert!(store.rows(VENUES_TABLE).await.is_empty());
        assert!(store.rows(PRODUCTIONS_TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn event_without_start_date_leaves_no_performance() {
        let store = Arc::new(MemoryDatastore::new());
        let outcome = reconcile(&store, &mk_event_without_date("evt-3")).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::MissingStartDate)
        );
        // Venue and production were already idempotently upserted; that is
        // acceptable, the next pass reconciles them again.
        assert_eq!(store.rows(VENUES_TABLE).await.len(), 1);
        assert_eq!(store.rows(PRODUCTIONS_TABLE).await.len(), 1);
        assert!(store.rows(PERFORMANCES_TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn unmapped_genre_creates_no_association() {
        let store = Arc::new(MemoryDatastore::new());
        let mut event = mk_event("evt-4");
        event.classifications = vec![TmClassification {
            genre: Some(TmNamed {
                name: "Heavy Metal".to_string(),
            }),
        }];
        assert_eq!(reconcile(&store, &event).await, ReconcileOutcome::Persisted);
        assert!(store.rows(PRODUCTION_GENRES_TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn store_rejection_skips_the_event_but_not_its_siblings() {
        let store = Arc::new(MemoryDatastore::new());
        store.fail_writes_to(PERFORMANCES_TABLE).await;
        assert_eq!(
            reconcile(&store, &mk_event("evt-5")).await,
            ReconcileOutcome::Skipped(SkipReason::StoreRejected)
        );

        // A sibling that never reaches the broken table still persists.
        let store = Arc::new(MemoryDatastore::new());
        store.fail_writes_to(PRODUCTION_GENRES_TABLE).await;
        assert_eq!(
            reconcile(&store, &mk_event("evt-6")).await,
            ReconcileOutcome::Skipped(SkipReason::StoreRejected)
        );
        let mut no_genre = mk_event("evt-7");
        no_genre.classifications = Vec::new();
        assert_eq!(
            reconcile(&store, &no_genre).await,
            ReconcileOutcome::Persisted
        );
    }

    #[derive(Clone)]
    enum ScriptedPage {
        Events(Vec<TmEvent>),
        TransportError,
        Slow,
    }

    struct FakePager {
        pages: VecDeque<ScriptedPage>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl EventPager for FakePager {
        async fn next_page(&mut self) -> Result<Option<Vec<TmEvent>>, FetchError> {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match self.pages.pop_front() {
                None => Ok(None),
                Some(ScriptedPage::Events(events)) => Ok(Some(events)),
                Some(ScriptedPage::TransportError) => Err(FetchError::Status {
                    status: 503,
                    url: "https://provider.test/events.json".to_string(),
                }),
                Some(ScriptedPage::Slow) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(None)
                }
            }
        }
    }

    /// Scripted windows in open order; windows beyond the script are empty.
    struct FakeSource {
        windows: Mutex<Vec<Vec<ScriptedPage>>>,
        opened: AtomicUsize,
    }

    impl FakeSource {
        fn new(windows: Vec<Vec<ScriptedPage>>) -> Self {
            Self {
                windows: Mutex::new(windows),
                opened: AtomicUsize::new(0),
            }
        }
    }

    impl EventSource for FakeSource {
        fn open_window(
            &self,
            _window: DateWindow,
            cancel: CancellationToken,
        ) -> Box<dyn EventPager> {
            let index = self.opened.fetch_add(1, Ordering::SeqCst);
            let pages = self
                .windows
                .lock()
                .unwrap()
                .get(index)
                .cloned()
                .unwrap_or_default();
            Box::new(FakePager {
                pages: pages.into(),
                cancel,
            })
        }
    }

    fn service_with(
        store: Arc<MemoryDatastore>,
        windows: Vec<Vec<ScriptedPage>>,
    ) -> SyncService {
        SyncService::new(
            store,
            Arc::new(FakeSource::new(windows)),
            SyncOptions {
                horizon_months: 1,
                chunk_days: 14,
            },
        )
    }

    #[tokio::test]
    async fn run_with_no_events_logs_success_with_zero_counts() {
        let store = Arc::new(MemoryDatastore::new());
        let service = service_with(store.clone(), vec![]);

        let outcome = service.run().await.unwrap();
        let RunOutcome::Completed(record) = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(record.status, SyncStatus::Success);
        assert_eq!(record.records_fetched, 0);
        assert_eq!(record.records_created, 0);
        assert_eq!(record.records_skipped, 0);
        assert!(record.error_message.is_none());

        let logs = store.rows(SYNC_LOG_TABLE).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["status"], "success");
    }

    #[tokio::test]
    async fn transport_failure_mid_run_logs_failed_with_partial_counts() {
        let store = Arc::new(MemoryDatastore::new());
        let service = service_with(
            store.clone(),
            vec![
                vec![ScriptedPage::Events(vec![
                    mk_event("evt-1"),
                    mk_event_without_venue("evt-2"),
                ])],
                vec![ScriptedPage::TransportError],
            ],
        );

        let RunOutcome::Completed(record) = service.run().await.unwrap() else {
            panic!("expected completed run");
        };
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.error_message.as_deref().unwrap().contains("503"));
        // Only the first window's work is counted.
        assert_eq!(record.records_fetched, 2);
        assert_eq!(record.records_created, 1);
        assert_eq!(record.records_skipped, 1);

        let logs = store.rows(SYNC_LOG_TABLE).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["status"], "failed");
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped_while_running() {
        let store = Arc::new(MemoryDatastore::new());
        let service = service_with(store.clone(), vec![vec![ScriptedPage::Slow]]);

        let (first, second) = tokio::join!(service.run(), service.run());
        let outcomes = [first.unwrap(), second.unwrap()];
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, RunOutcome::AlreadyRunning)));
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, RunOutcome::Completed(_))));

        // The dropped trigger wrote nothing.
        assert_eq!(store.rows(SYNC_LOG_TABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_logs_failure() {
        let store = Arc::new(MemoryDatastore::new());
        let service = service_with(
            store.clone(),
            vec![vec![ScriptedPage::Events(vec![mk_event("evt-1")])]],
        );
        service.cancellation_token().cancel();

        let RunOutcome::Completed(record) = service.run().await.unwrap() else {
            panic!("expected completed run");
        };
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("sync cancelled"));
        assert_eq!(store.rows(SYNC_LOG_TABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn run_returns_to_idle_after_completion() {
        let store = Arc::new(MemoryDatastore::new());
        let service = service_with(store.clone(), vec![]);
        assert!(matches!(
            service.run().await.unwrap(),
            RunOutcome::Completed(_)
        ));
        // A later trigger is accepted again.
        assert!(matches!(
            service.run().await.unwrap(),
            RunOutcome::Completed(_)
        ));
        assert_eq!(store.rows(SYNC_LOG_TABLE).await.len(), 2);
    }
}
