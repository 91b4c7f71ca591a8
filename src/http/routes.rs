//! HTTP route handlers.
//!
//! Each handler is a thin translation from a request to one store call.

use crate::http::error::HttpError;
use crate::http::AppState;
use crate::persistence::SnapshotRecord;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of `POST /create`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateRequest {
    pub key: String,
    pub value: String,
    /// TTL in seconds; 0 or absent means the entry never expires
    pub second: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateResponse {
    pub created: bool,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub key: String,
}

/// `?key=` query string.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

impl KeyQuery {
    fn require(self) -> Result<String, HttpError> {
        match self.key {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(HttpError::BadRequest("key not provided".to_string())),
        }
    }
}

/// `POST /create`
pub async fn create_entry(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateResponse>), HttpError> {
    let Json(request) = body.map_err(|e| HttpError::BadRequest(e.body_text()))?;

    if request.key.is_empty() {
        return Err(HttpError::BadRequest("key not provided".to_string()));
    }
    let ttl_seconds = u64::try_from(request.second).map_err(|_| {
        HttpError::BadRequest(format!(
            "second must be a non-negative integer, got {}",
            request.second
        ))
    })?;

    state.store.create(&request.key, request.value, ttl_seconds)?;
    debug!(key = %request.key, ttl_seconds = ttl_seconds, "Created key over HTTP");

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            created: true,
            key: request.key,
        }),
    ))
}

/// `GET /get?key=`: the value as a JSON string.
pub async fn get_entry(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<String>, HttpError> {
    let key = query.require()?;
    let value = state.store.get(&key)?;
    Ok(Json(String::from_utf8_lossy(&value).into_owned()))
}

/// `GET /`: every live entry as a full record.
pub async fn list_entries(State(state): State<AppState>) -> Json<Vec<SnapshotRecord>> {
    let records = state
        .store
        .snapshot()
        .iter()
        .map(|(key, entry)| SnapshotRecord::from_entry(key, entry))
        .collect();
    Json(records)
}

/// `DELETE /delete?key=`
pub async fn delete_entry(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<DeleteResponse>, HttpError> {
    let key = query.require()?;
    state.store.delete(&key)?;
    debug!(key = %key, "Deleted key over HTTP");

    Ok(Json(DeleteResponse { deleted: true, key }))
}

/// `GET /count`
pub async fn count_entries(State(state): State<AppState>) -> Json<usize> {
    Json(state.store.count())
}
