//! HTTP routes: public iCal feeds, the management API and the sign-in flow.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use calfeed_core::TimeWindow;
use calfeed_providers::{FetchOptions, RawEvent};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::context::SharedContext;
use crate::credentials::SettingsUpdate;
use crate::error::ServerError;
use crate::models::Feed;
use crate::publisher::collect_events;
use crate::registry::{FeedUpdate, NewFeed};

/// Builds the application router.
pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ical/{file}", get(ical_feed))
        .route("/api/feeds", get(list_feeds).post(create_feed))
        .route("/api/feeds/{id}", put(update_feed).delete(delete_feed))
        .route("/api/feeds/{id}/regenerate-token", post(regenerate_token))
        .route("/api/feeds/{id}/refresh", post(refresh_feed))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/settings/test", post(test_settings))
        .route("/api/calendars", get(list_calendars))
        .route(
            "/api/calendars/selection",
            get(get_selection).post(set_selection),
        )
        .route("/api/events", get(list_events))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/status", get(auth_status))
        .route("/auth/logout", post(logout))
        .with_state(ctx)
}

/// JSON error response: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        match &err {
            ServerError::Validation { .. } => Self::bad_request(err.to_string()),
            ServerError::NotAuthenticated { .. } => {
                Self::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            ServerError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            ServerError::Configuration { .. } => {
                warn!(error = %err, "request needs configuration");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Service not configured")
            }
            _ => {
                error!(error = %err, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

// Feeds

#[derive(Debug, Serialize)]
struct FeedView {
    #[serde(flatten)]
    feed: Feed,
    url: String,
}

fn feed_view(ctx: &SharedContext, feed: Feed) -> ApiResult<FeedView> {
    let url = ctx.feed_url(&feed)?;
    Ok(FeedView { feed, url })
}

async fn list_feeds(State(ctx): State<SharedContext>) -> ApiResult<Json<Vec<FeedView>>> {
    let feeds = ctx.registry.list_enabled()?;
    let views = feeds
        .into_iter()
        .map(|feed| feed_view(&ctx, feed))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(views))
}

async fn create_feed(
    State(ctx): State<SharedContext>,
    body: Result<Json<NewFeed>, JsonRejection>,
) -> ApiResult<Json<FeedView>> {
    let Json(new) = body?;
    let feed = ctx.registry.create(new)?;
    Ok(Json(feed_view(&ctx, feed)?))
}

async fn update_feed(
    State(ctx): State<SharedContext>,
    Path(id): Path<i64>,
    body: Result<Json<FeedUpdate>, JsonRejection>,
) -> ApiResult<Json<FeedView>> {
    let Json(update) = body?;
    let feed = ctx.registry.update(id, update)?;
    Ok(Json(feed_view(&ctx, feed)?))
}

async fn regenerate_token(
    State(ctx): State<SharedContext>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let feed = ctx.registry.regenerate_token(id)?;
    let url = ctx.feed_url(&feed)?;
    Ok(Json(json!({ "success": true, "url": url, "token": feed.token })))
}

async fn refresh_feed(
    State(ctx): State<SharedContext>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    ctx.registry.get_enabled(id)?;
    let now = Utc::now();
    ctx.registry.touch_refreshed_at(id, now)?;
    Ok(Json(json!({ "success": true, "lastRefreshedAt": now.to_rfc3339() })))
}

async fn delete_feed(
    State(ctx): State<SharedContext>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    ctx.registry.soft_delete(id)?;
    Ok(Json(json!({ "success": true })))
}

// Public feed

fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

async fn ical_feed(State(ctx): State<SharedContext>, Path(file): Path<String>) -> Response {
    let token = file.strip_suffix(".ics").unwrap_or(&file);

    let feed = match ctx.registry.find_by_token(token) {
        Ok(feed) => feed,
        Err(e) if e.is_not_found() => {
            return (StatusCode::NOT_FOUND, "Feed not found").into_response();
        }
        Err(e) => {
            error!(error = %e, "feed lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error generating calendar feed")
                .into_response();
        }
    };

    let rendered = match ctx.calendar_source().await {
        Ok(source) => ctx.publisher.render(&feed, source.as_ref(), Utc::now()).await,
        Err(e) => Err(e),
    };

    match rendered {
        Ok(rendered) => {
            info!(feed_id = feed.id, name = %feed.name, "feed served");
            (
                [
                    (CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
                    (CONTENT_DISPOSITION, content_disposition(&rendered.filename)),
                    (CACHE_CONTROL, "max-age=300".to_string()),
                ],
                rendered.body,
            )
                .into_response()
        }
        Err(e) => {
            error!(feed_id = feed.id, error = %e, "feed generation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error generating calendar feed").into_response()
        }
    }
}

// Settings

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    base_url: String,
    client_id: String,
    redirect_uri: String,
    has_client_secret: bool,
}

async fn get_settings(State(ctx): State<SharedContext>) -> ApiResult<Json<SettingsView>> {
    let settings = ctx.credentials.get_settings()?;
    Ok(Json(SettingsView {
        has_client_secret: settings.has_client_secret(),
        base_url: settings.base_url.unwrap_or_default(),
        client_id: settings.client_id.unwrap_or_default(),
        redirect_uri: ctx.credentials.redirect_uri()?,
    }))
}

async fn update_settings(
    State(ctx): State<SharedContext>,
    body: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(update) = body?;
    let changed = ctx.credentials.update_settings(update)?;
    if changed {
        ctx.session.invalidate().await;
    }
    Ok(Json(json!({ "success": true, "changed": changed })))
}

async fn test_settings(State(ctx): State<SharedContext>) -> ApiResult<Json<Value>> {
    let token = ctx.session.get_valid_access_token().await?;
    let source = ctx.connect(&token.access_token)?;
    let calendars = source
        .list_calendars()
        .await
        .map_err(ServerError::from)?;
    Ok(Json(json!({
        "success": true,
        "user": {
            "name": token.account.name,
            "username": token.account.username,
        },
        "calendars": calendars,
    })))
}

// Calendars and events

async fn list_calendars(State(ctx): State<SharedContext>) -> ApiResult<Response> {
    let source = ctx.calendar_source().await?;
    let calendars = source
        .list_calendars()
        .await
        .map_err(ServerError::from)?;
    Ok(Json(calendars).into_response())
}

async fn get_selection(State(ctx): State<SharedContext>) -> ApiResult<Response> {
    Ok(Json(ctx.db.get_ui_selection()?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionUpdate {
    calendar_ids: Option<Vec<String>>,
    last_view: Option<String>,
}

async fn set_selection(
    State(ctx): State<SharedContext>,
    body: Result<Json<SelectionUpdate>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(update) = body?;
    let Some(calendar_ids) = update.calendar_ids else {
        return Err(ServerError::validation("calendarIds", "must be an array").into());
    };
    ctx.db
        .set_ui_selection(&calendar_ids, update.last_view.as_deref())?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    from: Option<String>,
    to: Option<String>,
    #[serde(rename = "calIds")]
    cal_ids: Option<String>,
}

fn parse_bound(field: &str, value: &str) -> Result<DateTime<Utc>, ServerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| ServerError::validation(field, "must be an RFC 3339 time or a date"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventView {
    id: String,
    calendar_id: String,
    title: Option<String>,
    start: String,
    end: String,
    is_all_day: bool,
    location: Option<String>,
    body_preview: Option<String>,
    show_as: Option<String>,
    sensitivity: Option<String>,
}

impl From<RawEvent> for EventView {
    fn from(event: RawEvent) -> Self {
        Self {
            is_all_day: event.is_all_day(),
            start: event.start.to_api_string(),
            end: event.end.to_api_string(),
            id: event.id,
            calendar_id: event.calendar_id,
            title: event.summary,
            location: event.location,
            body_preview: event.description,
            show_as: event.show_as,
            sensitivity: event.sensitivity,
        }
    }
}

async fn list_events(
    State(ctx): State<SharedContext>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<EventView>>> {
    let Query(query) = query?;
    let (Some(from), Some(to)) = (query.from.as_deref(), query.to.as_deref()) else {
        return Err(ApiError::bad_request("from and to parameters required"));
    };
    let from = parse_bound("from", from)?;
    let to = parse_bound("to", to)?;
    if to < from {
        return Err(ServerError::validation("to", "must not be before from").into());
    }

    let calendar_ids: Vec<String> = query
        .cal_ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();
    if calendar_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let source = ctx.calendar_source().await?;
    let options = FetchOptions::new(TimeWindow::new(from, to));
    let collected = collect_events(source.as_ref(), &calendar_ids, options).await;
    Ok(Json(collected.events.into_iter().map(EventView::from).collect()))
}

// Sign-in

async fn login(State(ctx): State<SharedContext>) -> ApiResult<Redirect> {
    let url = ctx.session.auth_code_url().await?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn auth_error_redirect(message: &str) -> Redirect {
    Redirect::to(&format!(
        "/?auth=error&message={}",
        urlencoding::encode(message)
    ))
}

async fn callback(
    State(ctx): State<SharedContext>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        let message = query
            .error_description
            .or(query.error)
            .unwrap_or_else(|| "missing authorization code".to_string());
        warn!(%message, "sign-in callback without code");
        return auth_error_redirect(&message);
    };

    match ctx.session.complete_login(&code).await {
        Ok(account) => {
            info!(username = %account.username, "signed in");
            Redirect::to("/?auth=success")
        }
        Err(e) => {
            warn!(error = %e, "sign-in failed");
            auth_error_redirect(&e.to_string())
        }
    }
}

async fn auth_status(State(ctx): State<SharedContext>) -> ApiResult<Response> {
    Ok(Json(ctx.session.status().await?).into_response())
}

async fn logout(State(ctx): State<SharedContext>) -> ApiResult<Json<Value>> {
    ctx.session.logout().await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use calfeed_providers::{CalendarInfo, RawEventTime};
    use chrono::TimeZone;
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::context::AppContext;
    use crate::store::Database;
    use crate::testing::{FakeConnector, FakeIdentityBuilder, FakeSource};

    struct Harness {
        app: Router,
        ctx: SharedContext,
        connector: Arc<FakeConnector>,
    }

    fn event(id: &str, cal: &str) -> RawEvent {
        let start = Utc::now() + chrono::Duration::days(1);
        RawEvent::new(
            id,
            cal,
            RawEventTime::DateTime(start),
            RawEventTime::DateTime(start + chrono::Duration::hours(1)),
        )
        .with_summary(format!("Summary {id}"))
        .with_description("Agenda")
    }

    fn harness() -> Harness {
        let source = Arc::new(
            FakeSource::default()
                .with_calendar(CalendarInfo::new("cal1", "Work").with_default(true))
                .with_calendar(CalendarInfo::new("cal2", "Family"))
                .with_events("cal1", vec![event("e1", "cal1")])
                .with_events("cal3", vec![event("e3", "cal3")])
                .with_failing("cal2"),
        );
        let connector = Arc::new(FakeConnector::new(source));
        let ctx = Arc::new(AppContext::with_parts(
            ServerConfig::new(":memory:"),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeIdentityBuilder::default()),
            connector.clone(),
        ));
        Harness {
            app: router(ctx.clone()),
            ctx,
            connector,
        }
    }

    async fn signed_in() -> Harness {
        let h = harness();
        h.ctx
            .credentials
            .update_settings(SettingsUpdate {
                base_url: None,
                client_id: Some("client".into()),
                client_secret: Some("secret".into()),
            })
            .unwrap();
        h.ctx.session.complete_login("good-code").await.unwrap();
        h
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, String) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, text) = send(app, method, uri, body).await;
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn create(app: &Router, body: Value) -> Value {
        let (status, json) = send_json(app, "POST", "/api/feeds", Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        json
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let h = harness();
        let (status, json) = send_json(&h.app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn feed_is_published_then_disabled() {
        let h = signed_in().await;
        let feed = create(
            &h.app,
            json!({"name": "Team", "calendarIds": ["cal1"], "refreshIntervalHours": 1}),
        )
        .await;
        let token = feed["token"].as_str().unwrap().to_string();
        assert_eq!(
            feed["url"],
            format!("http://localhost:5600/ical/{token}.ics")
        );
        assert_eq!(feed["refreshIntervalHours"], 1);

        let (status, headers, body) = send(&h.app, "GET", &format!("/ical/{token}.ics"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "text/calendar; charset=utf-8");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=\"Team.ics\"");
        assert_eq!(headers[CACHE_CONTROL], "max-age=300");
        assert!(body.contains("BEGIN:VCALENDAR"));
        assert!(body.contains("X-WR-CALNAME:Team"));
        assert!(body.contains("UID:e1"));
        assert_eq!(h.connector.last_token().as_deref(), Some("access-secret"));

        let id = feed["id"].as_i64().unwrap();
        let (status, _) = send_json(&h.app, "DELETE", &format!("/api/feeds/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(&h.app, "GET", &format!("/ical/{token}.ics"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Feed not found");

        let (status, json) = send_json(&h.app, "DELETE", &format!("/api/feeds/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Feed not found");
    }

    #[tokio::test]
    async fn failing_calendar_only_drops_its_events() {
        let h = signed_in().await;
        let feed = create(
            &h.app,
            json!({"name": "Mixed", "calendarIds": ["cal1", "cal2", "cal3"]}),
        )
        .await;
        let token = feed["token"].as_str().unwrap();

        let (status, _, body) = send(&h.app, "GET", &format!("/ical/{token}.ics"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("UID:e1"));
        assert!(body.contains("UID:e3"));
        assert_eq!(body.matches("BEGIN:VEVENT").count(), 2);
    }

    #[tokio::test]
    async fn feed_errors_are_plain_text() {
        let h = harness();
        let (status, _, body) = send(&h.app, "GET", "/ical/nope.ics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Feed not found");

        // Not configured or signed in: the feed exists but cannot be generated.
        let feed = create(&h.app, json!({"name": "Team", "calendarIds": ["cal1"]})).await;
        let token = feed["token"].as_str().unwrap();
        let (status, _, body) = send(&h.app, "GET", &format!("/ical/{token}.ics"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error generating calendar feed");

        let h = signed_in().await;
        let feed = create(&h.app, json!({"name": "Down", "calendarIds": ["cal2"]})).await;
        let token = feed["token"].as_str().unwrap();
        let (status, _, body) = send(&h.app, "GET", &format!("/ical/{token}.ics"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Error generating calendar feed");
    }

    #[tokio::test]
    async fn feed_validation_and_updates() {
        let h = harness();
        let (status, json) = send_json(
            &h.app,
            "POST",
            "/api/feeds",
            Some(json!({"name": "", "calendarIds": ["cal1"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "name: must not be empty");

        let (status, json) = send_json(
            &h.app,
            "POST",
            "/api/feeds",
            Some(json!({"name": "X", "calendarIds": "cal1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());

        let feed = create(&h.app, json!({"name": "Team", "calendarIds": ["cal1"]})).await;
        let id = feed["id"].as_i64().unwrap();

        let (status, json) =
            send_json(&h.app, "PUT", &format!("/api/feeds/{id}"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "body: no fields to update");

        let (status, json) = send_json(
            &h.app,
            "PUT",
            &format!("/api/feeds/{id}"),
            Some(json!({"calendarIds": ["cal2", "cal1"], "refreshIntervalHours": 12})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["calendarIds"], json!(["cal2", "cal1"]));
        assert_eq!(json["refreshIntervalHours"], 12);

        let (status, _) = send_json(
            &h.app,
            "PUT",
            "/api/feeds/999",
            Some(json!({"refreshIntervalHours": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send_json(&h.app, "GET", "/api/feeds", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn regenerate_token_swaps_urls() {
        let h = signed_in().await;
        let feed = create(&h.app, json!({"name": "Team", "calendarIds": ["cal1"]})).await;
        let id = feed["id"].as_i64().unwrap();
        let old = feed["token"].as_str().unwrap().to_string();

        let (status, json) = send_json(
            &h.app,
            "POST",
            &format!("/api/feeds/{id}/regenerate-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let new = json["token"].as_str().unwrap();
        assert_ne!(new, old);
        assert!(json["url"].as_str().unwrap().ends_with(&format!("/ical/{new}.ics")));

        let (status, _, _) = send(&h.app, "GET", &format!("/ical/{old}.ics"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&h.app, "GET", &format!("/ical/{new}.ics"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn manual_refresh_records_timestamp() {
        let h = harness();
        let feed = create(&h.app, json!({"name": "Team", "calendarIds": ["cal1"]})).await;
        let id = feed["id"].as_i64().unwrap();
        assert!(feed["lastRefreshedAt"].is_null());

        let (status, json) =
            send_json(&h.app, "POST", &format!("/api/feeds/{id}/refresh"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert!(h.ctx.registry.get(id).unwrap().last_refreshed_at.is_some());

        let (status, _) = send_json(&h.app, "POST", "/api/feeds/999/refresh", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn settings_never_expose_the_secret() {
        let h = harness();
        let (status, json) = send_json(
            &h.app,
            "POST",
            "/api/settings",
            Some(json!({
                "baseUrl": "https://cal.example/",
                "clientId": "client",
                "clientSecret": "hunter2"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["changed"], true);

        let (status, _, body) = send(&h.app, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("hunter2"));
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["baseUrl"], "https://cal.example");
        assert_eq!(json["clientId"], "client");
        assert_eq!(json["redirectUri"], "https://cal.example/auth/callback");
        assert_eq!(json["hasClientSecret"], true);

        let (status, json) = send_json(
            &h.app,
            "POST",
            "/api/settings",
            Some(json!({"baseUrl": "cal.example"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("baseUrl:"));
    }

    #[tokio::test]
    async fn secret_without_client_id_is_reported() {
        let h = harness();
        let (status, _) = send_json(
            &h.app,
            "POST",
            "/api/settings",
            Some(json!({"clientSecret": "hunter2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send_json(&h.app, "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["clientId"], "");
        assert_eq!(json["hasClientSecret"], true);
    }

    #[tokio::test]
    async fn unconfigured_is_service_unavailable() {
        let h = harness();
        for uri in ["/auth/login", "/api/calendars"] {
            let (status, json) = send_json(&h.app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
            assert_eq!(json["error"], "Service not configured");
        }
        let (status, json) = send_json(&h.app, "GET", "/auth/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["authenticated"], false);
    }

    #[tokio::test]
    async fn sign_in_flow() {
        let h = harness();
        h.ctx
            .credentials
            .update_settings(SettingsUpdate {
                base_url: None,
                client_id: Some("client".into()),
                client_secret: Some("secret".into()),
            })
            .unwrap();

        let (status, headers, _) = send(&h.app, "GET", "/auth/login", None).await;
        assert!(status.is_redirection());
        assert!(headers["location"].to_str().unwrap().starts_with("https://login.example/"));

        let (status, json) = send_json(&h.app, "POST", "/api/settings/test", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["error"].as_str().unwrap().starts_with("Not authenticated"));

        let (_, headers, _) = send(&h.app, "GET", "/auth/callback?code=bad", None).await;
        assert!(headers["location"].to_str().unwrap().starts_with("/?auth=error&message="));

        let (_, headers, _) = send(&h.app, "GET", "/auth/callback", None).await;
        assert_eq!(
            headers["location"],
            "/?auth=error&message=missing%20authorization%20code"
        );

        let (_, headers, _) = send(&h.app, "GET", "/auth/callback?code=good", None).await;
        assert_eq!(headers["location"], "/?auth=success");

        let (_, json) = send_json(&h.app, "GET", "/auth/status", None).await;
        assert_eq!(json["authenticated"], true);
        assert_eq!(json["username"], "ada@example.com");
        assert_eq!(json["accountId"], "oid.tid");

        let (status, json) = send_json(&h.app, "POST", "/api/settings/test", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["user"]["username"], "ada@example.com");
        assert_eq!(json["calendars"].as_array().unwrap().len(), 2);

        let (status, _) = send_json(&h.app, "POST", "/auth/logout", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = send_json(&h.app, "GET", "/auth/status", None).await;
        assert_eq!(json["authenticated"], false);
    }

    #[tokio::test]
    async fn calendars_and_selection() {
        let h = signed_in().await;
        let (status, json) = send_json(&h.app, "GET", "/api/calendars", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["id"], "cal1");
        assert_eq!(json[0]["isDefaultCalendar"], true);

        let (_, json) = send_json(&h.app, "GET", "/api/calendars/selection", None).await;
        assert_eq!(json["selectedCalendarIds"], json!([]));
        assert_eq!(json["lastView"], "month");

        let (status, _) = send_json(
            &h.app,
            "POST",
            "/api/calendars/selection",
            Some(json!({"calendarIds": ["cal2"], "lastView": "week"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = send_json(&h.app, "GET", "/api/calendars/selection", None).await;
        assert_eq!(json["selectedCalendarIds"], json!(["cal2"]));
        assert_eq!(json["lastView"], "week");

        let (status, _) = send_json(
            &h.app,
            "POST",
            "/api/calendars/selection",
            Some(json!({"lastView": "day"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_endpoint() {
        let h = signed_in().await;
        let (status, json) = send_json(&h.app, "GET", "/api/events?from=2025-01-01", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "from and to parameters required");

        let (status, _) =
            send_json(&h.app, "GET", "/api/events?from=yesterday&to=2025-01-02", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) =
            send_json(&h.app, "GET", "/api/events?from=2025-01-01&to=2025-02-01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([]));

        let (status, json) = send_json(
            &h.app,
            "GET",
            "/api/events?from=2025-01-01T00:00:00Z&to=2030-01-01T00:00:00Z&calIds=cal1,cal2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let events = json.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], "e1");
        assert_eq!(events[0]["calendarId"], "cal1");
        assert_eq!(events[0]["title"], "Summary e1");
        assert_eq!(events[0]["bodyPreview"], "Agenda");
        assert_eq!(events[0]["isAllDay"], false);
    }

    #[test]
    fn bounds_accept_dates_and_times() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_bound("from", "2025-01-01").unwrap(), expected);
        assert_eq!(parse_bound("from", "2025-01-01T01:00:00+01:00").unwrap(), expected);
        assert!(parse_bound("from", "soon").is_err());
    }

    #[test]
    fn disposition_strips_quotes() {
        assert_eq!(
            content_disposition("My \"Team\".ics"),
            "attachment; filename=\"My _Team_.ics\""
        );
    }
}
