use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::app::auth::{TokenVerifier, bearer_token};
use crate::app::generator::{BookGenerator, GenerationError};
use crate::app::library_store::{LibraryStore, ParentSettings};
use crate::app::model::{
    Book, BookStatus, BookStatusView, GenerateBookRequest, StartedGeneration, is_valid_book_id,
};
use crate::app::samples::SampleBooks;
use crate::narration::{NarrationError, SpeechClient, narrate_book};
use crate::render::render_book_html;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<BookGenerator>,
    pub library_store: Arc<dyn LibraryStore>,
    pub samples: Arc<SampleBooks>,
    pub auth: Arc<dyn TokenVerifier>,
    pub speech: Arc<dyn SpeechClient>,
    pub tts_model: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/generate-book", post(generate_book))
        .route("/api/book-status/:book_id", get(book_status))
        .route("/api/books/:book_id", get(get_book))
        .route("/api/books/:book_id/print", get(print_book))
        .route("/api/generate-audio/:book_id", post(generate_audio))
        .route("/api/my-books", get(my_books))
        .route("/api/library", get(library))
        .route("/api/library/favorite/:book_id", post(toggle_favorite))
        .route("/api/reading", get(reading_stats))
        .route("/api/reading/:book_id", post(record_reading))
        .route(
            "/api/parent/settings",
            get(get_parent_settings).post(set_parent_settings),
        )
        .route("/api/sample-books", get(sample_books))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response carrying `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Validation(message) => Self::new(StatusCode::BAD_REQUEST, message),
            other => {
                tracing::error!(error = %other, "could not start generation");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<NarrationError> for ApiError {
    fn from(err: NarrationError) -> Self {
        let status = match &err {
            NarrationError::NotFound => StatusCode::NOT_FOUND,
            NarrationError::NotReady => StatusCode::CONFLICT,
            NarrationError::EmptyText => StatusCode::BAD_REQUEST,
            NarrationError::Upstream(_) => StatusCode::BAD_GATEWAY,
            NarrationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "narration failed");
        }
        Self::new(status, err.to_string())
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text()))
}

fn check_book_id(book_id: &str) -> ApiResult<()> {
    if is_valid_book_id(book_id) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::BAD_REQUEST, "invalid book id"))
    }
}

async fn authenticate(state: &AppState, value: &HeaderValue) -> ApiResult<String> {
    let token = value
        .to_str()
        .ok()
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"))?;
    state
        .auth
        .verify(token)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "invalid token"))
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"))?;
    if !state.auth.is_configured() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "auth not configured",
        ));
    }
    authenticate(state, value).await
}

/// Anonymous callers are allowed; a presented token must still be valid.
async fn optional_user(state: &AppState, headers: &HeaderMap) -> ApiResult<Option<String>> {
    match headers.get(header::AUTHORIZATION) {
        Some(value) if state.auth.is_configured() => authenticate(state, value).await.map(Some),
        _ => Ok(None),
    }
}

/// Samples shadow stored books with the same id.
async fn find_book(state: &AppState, book_id: &str) -> ApiResult<Book> {
    check_book_id(book_id)?;
    if let Some(book) = state.samples.get(book_id) {
        return Ok(book.clone());
    }
    state
        .generator
        .book_store()
        .get(book_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "book not found"))
}

async fn generate_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateBookRequest>, JsonRejection>,
) -> ApiResult<Json<StartedGeneration>> {
    let request = json_body(payload)?;
    let owner_id = optional_user(&state, &headers).await?;
    let started = state.generator.start_generation(request, owner_id).await?;
    Ok(Json(started))
}

async fn book_status(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> ApiResult<Json<BookStatusView>> {
    let book = find_book(&state, &book_id).await?;
    Ok(Json(book.status_view()))
}

async fn get_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> ApiResult<Json<Book>> {
    Ok(Json(find_book(&state, &book_id).await?))
}

async fn print_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> ApiResult<Html<String>> {
    let book = find_book(&state, &book_id).await?;
    if book.status != BookStatus::Completed {
        return Err(ApiError::new(StatusCode::CONFLICT, "book is not completed"));
    }
    render_book_html(&book).map(Html).map_err(ApiError::internal)
}

async fn generate_audio(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    check_book_id(&book_id)?;
    let audio_url = narrate_book(
        state.generator.book_store().as_ref(),
        state.speech.as_ref(),
        &book_id,
        &state.tts_model,
    )
    .await?;
    Ok(Json(json!({ "audioUrl": audio_url })))
}

async fn my_books(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    let books = state
        .generator
        .book_store()
        .list_by_owner(&user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "books": books })))
}

async fn library(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    let user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    let mut books = state
        .generator
        .book_store()
        .list_by_owner(&user_id)
        .await
        .map_err(ApiError::internal)?;

    let mut seen: HashSet<String> = books.iter().map(|book| book.id.clone()).collect();
    for book_id in user_library.entries.keys() {
        if seen.contains(book_id) {
            continue;
        }
        match find_book(&state, book_id).await {
            Ok(book) => {
                seen.insert(book.id.clone());
                books.push(book);
            }
            Err(err) if err.status == StatusCode::NOT_FOUND => {}
            Err(err) => return Err(err),
        }
    }

    Ok(Json(json!({
        "books": books,
        "favorites": user_library.favorites(),
    })))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    check_book_id(&book_id)?;
    let mut user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    let is_favorite = user_library.toggle_favorite(&book_id, Utc::now());
    state
        .library_store
        .save(&user_id, &user_library)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "isFavorite": is_favorite })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RecordReadingBody {
    duration_seconds: u64,
    completed: bool,
}

impl Default for RecordReadingBody {
    fn default() -> Self {
        Self {
            duration_seconds: 0,
            completed: true,
        }
    }
}

async fn reading_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    let user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    let stats = serde_json::to_value(user_library.stats())
        .map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(stats))
}

async fn record_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<String>,
    payload: Result<Json<RecordReadingBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    check_book_id(&book_id)?;
    let body = json_body(payload)?;
    let mut user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    user_library.record_reading(&book_id, body.duration_seconds, body.completed, Utc::now());
    state
        .library_store
        .save(&user_id, &user_library)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "success": true })))
}

async fn get_parent_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    let user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(
        json!({ "settings": user_library.effective_parent_settings() }),
    ))
}

async fn set_parent_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ParentSettings>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers).await?;
    let settings = json_body(payload)?;
    let mut user_library = state
        .library_store
        .load(&user_id)
        .await
        .map_err(ApiError::internal)?;
    user_library.parent_settings = Some(settings);
    state
        .library_store
        .save(&user_id, &user_library)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "success": true })))
}

async fn sample_books(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "books": state.samples.all() }))
}
