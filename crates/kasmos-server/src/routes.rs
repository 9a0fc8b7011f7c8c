//! REST surface of the plan store server.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use kasmos_core::types::{PlanEntry, PlanStatus, TopicEntry};
use kasmos_store::{PlanStore, StoreError};
use serde::Deserialize;

use crate::error::WebError;

/// Shared handler state. The store is behind a mutex because SQLite
/// connections are not sync; operations are short row-level reads/writes.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<Mutex<Box<dyn PlanStore>>>,
}

impl ApiState {
    pub fn new(store: impl PlanStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route(
            "/v1/projects/{project}/plans",
            get(list_plans).post(create_plan),
        )
        .route(
            "/v1/projects/{project}/plans/{filename}",
            get(get_plan).put(update_plan),
        )
        .route(
            "/v1/projects/{project}/plans/{filename}/content",
            get(get_content).put(set_content),
        )
        .route(
            "/v1/projects/{project}/plans/{filename}/rename",
            post(rename_plan),
        )
        .route(
            "/v1/projects/{project}/topics",
            get(list_topics).post(create_topic),
        )
        .with_state(state)
}

/// Runs a store operation off the async runtime's worker threads.
async fn with_store<T, F>(state: &ApiState, op: F) -> Result<T, WebError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PlanStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let guard = store.lock().map_err(|_| StoreError::Backend {
            message: "store lock poisoned".to_string(),
        })?;
        op(&**guard)
    })
    .await
    .map_err(|err| WebError::Internal {
        message: format!("store task failed: {err}"),
    })?;
    result.map_err(WebError::from)
}

async fn ping(State(state): State<ApiState>) -> Result<StatusCode, WebError> {
    with_store(&state, |store| store.ping())
        .await
        .map_err(|err| WebError::Unavailable {
            message: err.to_string(),
        })?;
    Ok(StatusCode::OK)
}

async fn list_plans(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<PlanEntry>>, WebError> {
    let (statuses, topic) = parse_list_filters(query.as_deref())?;
    let plans = with_store(&state, move |store| match (topic, statuses.is_empty()) {
        (Some(topic), _) => store.list_by_topic(&project, &topic),
        (None, false) => store.list_by_status(&project, &statuses),
        (None, true) => store.list(&project),
    })
    .await?;
    Ok(Json(plans))
}

/// Parses the optional `?status=` (repeatable) and `?topic=` filters.
fn parse_list_filters(query: Option<&str>) -> Result<(Vec<PlanStatus>, Option<String>), WebError> {
    let mut statuses = Vec::new();
    let mut topic = None;

    let Some(query) = query else {
        return Ok((statuses, topic));
    };
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "status" => {
                let status = value.parse::<PlanStatus>().map_err(|err| {
                    WebError::BadRequest {
                        message: err.to_string(),
                    }
                })?;
                statuses.push(status);
            }
            "topic" => topic = Some(value.to_string()),
            _ => {}
        }
    }
    Ok((statuses, topic))
}

async fn create_plan(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(entry): Json<PlanEntry>,
) -> Result<(StatusCode, Json<PlanEntry>), WebError> {
    let stored = entry.clone();
    with_store(&state, move |store| store.create(&project, stored)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_plan(
    State(state): State<ApiState>,
    Path((project, filename)): Path<(String, String)>,
) -> Result<Json<PlanEntry>, WebError> {
    let entry = with_store(&state, move |store| store.get(&project, &filename)).await?;
    Ok(Json(entry))
}

async fn update_plan(
    State(state): State<ApiState>,
    Path((project, filename)): Path<(String, String)>,
    Json(entry): Json<PlanEntry>,
) -> Result<Json<PlanEntry>, WebError> {
    let stored = entry.clone();
    with_store(&state, move |store| {
        store.update(&project, &filename, stored)
    })
    .await?;
    Ok(Json(entry))
}

async fn get_content(
    State(state): State<ApiState>,
    Path((project, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, WebError> {
    let content =
        with_store(&state, move |store| store.get_content(&project, &filename)).await?;
    Ok(([(header::CONTENT_TYPE, "text/markdown")], content))
}

async fn set_content(
    State(state): State<ApiState>,
    Path((project, filename)): Path<(String, String)>,
    body: String,
) -> Result<StatusCode, WebError> {
    with_store(&state, move |store| {
        store.set_content(&project, &filename, &body)
    })
    .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    new_filename: String,
}

async fn rename_plan(
    State(state): State<ApiState>,
    Path((project, filename)): Path<(String, String)>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode, WebError> {
    if request.new_filename.is_empty() {
        return Err(WebError::BadRequest {
            message: "new_filename is required".to_string(),
        });
    }
    with_store(&state, move |store| {
        store.rename(&project, &filename, &request.new_filename)
    })
    .await?;
    Ok(StatusCode::OK)
}

async fn list_topics(
    State(state): State<ApiState>,
    Path(project): Path<String>,
) -> Result<Json<Vec<TopicEntry>>, WebError> {
    let topics = with_store(&state, move |store| store.list_topics(&project)).await?;
    Ok(Json(topics))
}

async fn create_topic(
    State(state): State<ApiState>,
    Path(project): Path<String>,
    Json(entry): Json<TopicEntry>,
) -> Result<(StatusCode, Json<TopicEntry>), WebError> {
    let stored = entry.clone();
    with_store(&state, move |store| store.create_topic(&project, stored)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
