//! Axum JSON API for Stage Seek: thin pass-throughs over the datastore
//! capability. Search ranking itself is an opaque stored procedure; the
//! handlers only assemble parameters and relay rows.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use stageseek_store::{Datastore, SelectQuery, StoreError};
use tokio::net::TcpListener;
use tracing::error;

pub const CRATE_NAME: &str = "stageseek-web";

#[derive(Clone)]
pub struct AppState {
    /// Anonymous role; reads respect the datastore's row policies.
    pub store: Arc<dyn Datastore>,
    /// Service role for privileged writes (public submissions).
    pub admin: Arc<dyn Datastore>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/search", get(search_handler))
        .route("/api/venues", get(venues_handler))
        .route("/api/venues/{id}", get(venue_detail_handler))
        .route("/api/productions/{slug}", get(production_detail_handler))
        .route("/api/submit", post(submit_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("STAGESEEK_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "stage seek api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn server_error(message: &str, err: StoreError) -> Response {
    error!(error = %err, "{message}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message, "details": err.to_string()})),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn id_string(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

async fn health_handler() -> Response {
    Json(json!({"status": "ok", "timestamp": Utc::now().to_rfc3339()})).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct SearchParams {
    from: Option<String>,
    to: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<f64>,
    genres: Option<String>,
    venue_types: Option<String>,
    regions: Option<String>,
    max_price: Option<f64>,
    free_only: Option<String>,
    accessible: Option<String>,
}

fn csv_list(value: &Option<String>) -> Value {
    match value {
        Some(raw) => Value::Array(
            raw.split(',')
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        None => Value::Null,
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    let (Some(from), Some(to)) = (params.from.clone(), params.to.clone()) else {
        return bad_request("from and to dates are required (YYYY-MM-DD format)");
    };

    let rpc_params = json!({
        "search_from": from,
        "search_to": to,
        "search_lat": params.lat,
        "search_lng": params.lng,
        "radius_km": params.radius.unwrap_or(25.0),
        "genres_filter": csv_list(&params.genres),
        "venue_types": csv_list(&params.venue_types),
        "regions_filter": csv_list(&params.regions),
        "max_price": params.max_price,
        "free_only": params.free_only.as_deref() == Some("true"),
        "accessible_only": params.accessible.as_deref() == Some("true"),
    });

    match state.store.rpc("search_performances", rpc_params).await {
        Ok(results) => {
            let count = results.as_array().map(|rows| rows.len()).unwrap_or(0);
            Json(json!({
                "results": results,
                "count": count,
                "query": {"from": from, "to": to},
            }))
            .into_response()
        }
        Err(err) => server_error("Search failed", err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct VenuesParams {
    region: Option<String>,
    city: Option<String>,
    #[serde(rename = "type")]
    venue_type: Option<String>,
}

async fn venues_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VenuesParams>,
) -> Response {
    let mut query = SelectQuery::new().eq("is_verified", "true").order_asc("name");
    if let Some(region) = &params.region {
        query = query.eq("region", region.as_str());
    }
    if let Some(city) = &params.city {
        query = query.ilike("city", format!("%{city}%"));
    }
    if let Some(venue_type) = &params.venue_type {
        query = query.eq("venue_type", venue_type.as_str());
    }

    match state.store.select("venues", &query).await {
        Ok(venues) => {
            let count = venues.len();
            Json(json!({"venues": venues, "count": count})).into_response()
        }
        Err(err) => server_error("Failed to fetch venues", err),
    }
}

async fn venue_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    let venue = match state
        .store
        .select("venues", &SelectQuery::new().eq("id", id.as_str()))
        .await
    {
        Ok(rows) => match rows.into_iter().next() {
            Some(venue) => venue,
            None => return not_found("Venue not found"),
        },
        Err(err) => return server_error("Failed to fetch venue", err),
    };

    let upcoming = state
        .store
        .select(
            "performances",
            &SelectQuery::new()
                .columns("*, productions ( title, short_description, poster_image_url, duration_minutes )")
                .eq("venue_id", id.as_str())
                .eq("status", "approved")
                .gte("run_end", today())
                .order_asc("run_start"),
        )
        .await;

    match upcoming {
        Ok(performances) => {
            Json(json!({"venue": venue, "upcoming_performances": performances})).into_response()
        }
        Err(err) => server_error("Failed to fetch venue", err),
    }
}

async fn production_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(slug): AxumPath<String>,
) -> Response {
    let production = match state
        .store
        .select(
            "productions",
            &SelectQuery::new()
                .columns("*, companies ( name, website, logo_url ), production_genres ( genre )")
                .eq("slug", slug.as_str())
                .eq("status", "approved"),
        )
        .await
    {
        Ok(rows) => match rows.into_iter().next() {
            Some(production) => production,
            None => return not_found("Production not found"),
        },
        Err(err) => return server_error("Failed to fetch production", err),
    };

    let Some(production_id) = id_string(&production) else {
        return not_found("Production not found");
    };

    let performances = state
        .store
        .select(
            "performances",
            &SelectQuery::new()
                .columns("*, venues ( name, address_line1, city, postcode, region, has_wheelchair_access, has_hearing_loop, website ), performance_schedule ( * )")
                .eq("production_id", production_id.as_str())
                .eq("status", "approved")
                .gte("run_end", today())
                .order_asc("run_start"),
        )
        .await;

    match performances {
        Ok(performances) => {
            Json(json!({"production": production, "performances": performances})).into_response()
        }
        Err(err) => server_error("Failed to fetch production", err),
    }
}

fn present(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(object) = body.as_object() else {
        return bad_request("submission body must be a JSON object");
    };

    if !present(object, "submitter_name")
        || !present(object, "submitter_email")
        || !present(object, "organisation")
    {
        return bad_request("submitter_name, submitter_email and organisation are required");
    }

    let mut listing = object.clone();
    let submitter_name = listing.remove("submitter_name").unwrap_or(Value::Null);
    let submitter_email = listing.remove("submitter_email").unwrap_or(Value::Null);
    let submitter_role = listing.remove("submitter_role").unwrap_or(Value::Null);
    let organisation = listing.remove("organisation").unwrap_or(Value::Null);

    if !present(&listing, "title")
        || !present(&listing, "venue_name")
        || !present(&listing, "run_start")
        || !present(&listing, "run_end")
    {
        return bad_request("title, venue_name, run_start and run_end are required");
    }

    let record = json!({
        "submitter_name": submitter_name,
        "submitter_email": submitter_email,
        "submitter_role": submitter_role,
        "organisation": organisation,
        "raw_data": Value::Object(listing),
        "status": "pending",
    });

    match state.admin.insert("venue_submissions", record).await {
        Ok(Some(row)) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Submission received — thank you! We will review it within 2 working days.",
                "submission_id": row.get("id"),
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Submission failed"})),
        )
            .into_response(),
        Err(err) => server_error("Submission failed", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use stageseek_store::MemoryDatastore;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<MemoryDatastore>) {
        let store = Arc::new(MemoryDatastore::new());
        let state = AppState {
            store: store.clone(),
            admin: store.clone(),
        };
        (app(state), store)
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _store) = test_app();
        let resp = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn search_requires_date_range() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(get_request("/api/search?from=2026-01-01"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_relays_ranked_rows() {
        let (app, store) = test_app();
        store
            .set_rpc_response(
                "search_performances",
                json!([{"title": "Hamlet", "distance_km": 1.2}]),
            )
            .await;
        let resp = app
            .oneshot(get_request(
                "/api/search?from=2026-01-01&to=2026-02-01&genres=drama,comedy&free_only=true",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["title"], "Hamlet");
    }

    #[tokio::test]
    async fn venues_lists_only_verified() {
        let (app, store) = test_app();
        store
            .insert("venues", json!({"name": "Lyric", "is_verified": true, "city": "London"}))
            .await
            .unwrap();
        store
            .insert("venues", json!({"name": "Backroom", "is_verified": false, "city": "London"}))
            .await
            .unwrap();

        let resp = app.oneshot(get_request("/api/venues")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["venues"][0]["name"], "Lyric");
    }

    #[tokio::test]
    async fn unknown_venue_is_not_found() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(get_request("/api/venues/no-such-id"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn production_detail_includes_upcoming_performances() {
        let (app, store) = test_app();
        let production = store
            .insert(
                "productions",
                json!({"title": "Hamlet", "slug": "hamlet-evt-1", "status": "approved"}),
            )
            .await
            .unwrap()
            .unwrap();
        let production_id = production["id"].as_str().unwrap();
        store
            .insert(
                "performances",
                json!({
                    "production_id": production_id,
                    "status": "approved",
                    "run_start": "2099-01-01",
                    "run_end": "2099-02-01",
                }),
            )
            .await
            .unwrap();

        let resp = app
            .oneshot(get_request("/api/productions/hamlet-evt-1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["production"]["title"], "Hamlet");
        assert_eq!(body["performances"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submit_validates_submitter_fields() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(post_json("/api/submit", json!({"title": "New Show"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_validates_listing_fields() {
        let (app, _store) = test_app();
        let resp = app
            .oneshot(post_json(
                "/api/submit",
                json!({
                    "submitter_name": "Sam",
                    "submitter_email": "sam@example.org",
                    "organisation": "The Playhouse",
                    "title": "New Show",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn submit_stores_pending_submission() {
        let (app, store) = test_app();
        let resp = app
            .oneshot(post_json(
                "/api/submit",
                json!({
                    "submitter_name": "Sam",
                    "submitter_email": "sam@example.org",
                    "submitter_role": "producer",
                    "organisation": "The Playhouse",
                    "title": "New Show",
                    "venue_name": "The Playhouse",
                    "run_start": "2026-09-01",
                    "run_end": "2026-09-20",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert!(body["submission_id"].is_string());

        let rows = store.rows("venue_submissions").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], "pending");
        assert_eq!(rows[0]["raw_data"]["venue_name"], "The Playhouse");
        assert!(rows[0]["raw_data"].get("submitter_name").is_none());
    }
}
