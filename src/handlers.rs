//! HTTP handlers for the booth front-end.
//!
//! Each handler validates its input, calls into the settings store, the
//! orchestrator, the batch tracker or the provider, and wraps the outcome in
//! the JSON envelope from [`crate::error`].
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, EffectUpdate, NewEffect, SettingsUpdate};
use crate::error::{ok, ApiError, ApiResult};
use crate::jobs::UploadedImage;
use crate::model::{EffectRef, ImageData, Orientation, ProcessedResult};
use crate::orchestrator::{apply_effects as run_effects, ApplyOptions};
use crate::provider::{JobHandle, PollResponse, ProviderStatus, SubmitRequest};
use crate::state::AppState;
use crate::strip::{compose_strip, StripLayout};

pub const MAX_BATCH_FILES: usize = 10;
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ── Settings ────────────────────────────────────────────────────────

pub async fn get_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ok(db::get_settings(&state.pool).await?))
}

#[instrument(skip_all)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<impl IntoResponse> {
    let settings = db::update_settings(&state.pool, &update).await?;
    info!(orientation = settings.orientation.as_str(), "settings updated");
    Ok(ok(settings))
}

#[instrument(skip_all)]
pub async fn reset_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let settings = db::reset_settings(&state.pool).await?;
    info!("settings reset to defaults");
    Ok(ok(settings))
}

// ── Effects ─────────────────────────────────────────────────────────

pub async fn list_effects(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ok(db::list_effects(&state.pool).await?))
}

pub async fn enabled_effects(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ok(db::enabled_effects(&state.pool).await?))
}

pub async fn create_effect(
    State(state): State<AppState>,
    Json(input): Json<NewEffect>,
) -> ApiResult<impl IntoResponse> {
    let change = db::create_effect(&state.pool, &input).await?;
    Ok((StatusCode::CREATED, ok(change)))
}

pub async fn update_effect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<EffectUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(db::update_effect(&state.pool, &id, &input).await?))
}

#[derive(Debug, Deserialize)]
pub struct ToggleEffect {
    pub enabled: bool,
}

pub async fn toggle_effect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ToggleEffect>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok(db::set_effect_enabled(&state.pool, &id, input.enabled).await?))
}

pub async fn delete_effect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    db::delete_effect(&state.pool, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Effect application ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApplyEffectsRequest {
    pub images: Vec<String>,
    #[serde(default)]
    pub effects: Option<Vec<EffectRef>>,
    #[serde(default)]
    pub orientation: Option<Orientation>,
}

#[derive(Debug, Serialize)]
pub struct ApplyEffectsResponse {
    pub results: Vec<ProcessedResult>,
    pub failed: usize,
}

/// POST /api/apply-effects
///
/// Effects and orientation default to the stored settings when omitted.
#[instrument(skip_all)]
pub async fn apply_effects(
    State(state): State<AppState>,
    Json(body): Json<ApplyEffectsRequest>,
) -> ApiResult<impl IntoResponse> {
    let images = decode_images(&body.images)?;

    let effects = match body.effects {
        Some(effects) => caller_effects(effects)?,
        None => stored_effects(&state).await?,
    };
    let orientation = match body.orientation {
        Some(orientation) => orientation,
        None => db::get_settings(&state.pool).await?.orientation,
    };

    let options = ApplyOptions::from_config(&state.config, orientation);
    let results = run_effects(state.provider.as_ref(), images, effects, &options).await;
    let failed = results.iter().filter(|r| r.is_fallback()).count();
    Ok(ok(ApplyEffectsResponse { results, failed }))
}

// ── Provider proxy ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSubmit {
    pub image: String,
    pub prompt: String,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

/// POST /api/provider/submit
#[instrument(skip_all)]
pub async fn provider_submit(
    State(state): State<AppState>,
    Json(body): Json<ProviderSubmit>,
) -> ApiResult<impl IntoResponse> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::Validation("prompt must not be empty".into()));
    }
    let image = decode_image(&body.image, 0)?;
    let aspect_ratio = match body.aspect_ratio {
        Some(ratio) => ratio,
        None => db::get_settings(&state.pool)
            .await?
            .orientation
            .aspect_ratio()
            .to_string(),
    };

    let request = SubmitRequest::new(image.to_base64(), &body.prompt, &aspect_ratio);
    let handle = state.provider.submit(&request).await?;
    if let Some(url) = &handle.polling_url {
        state.jobs.remember_polling_url(&handle.id, url).await;
    }
    info!(job = %handle.id, "provider job submitted");
    Ok(ok(handle))
}

/// GET /api/provider/result/{id}
///
/// Streams the image when the provider has one; otherwise reports status.
#[instrument(skip_all)]
pub async fn provider_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let handle = JobHandle {
        polling_url: state.jobs.polling_url(&id).await,
        id,
    };

    match state.provider.poll(&handle).await? {
        PollResponse::Image { mime, bytes } => Ok(image_response(&mime, bytes)),
        PollResponse::Status {
            status: ProviderStatus::Ready,
            sample: Some(url),
            ..
        } => {
            let bytes = state.provider.fetch_sample(&url).await?;
            Ok(image_response("image/jpeg", bytes))
        }
        PollResponse::Status {
            status,
            message,
            sample,
        } => Ok(ok(json!({
            "id": handle.id,
            "status": status.as_str(),
            "message": message,
            "sample": sample,
        }))
        .into_response()),
    }
}

// ── Batch processing ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStarted {
    pub job_id: Uuid,
    pub total_images: usize,
    pub effects: Vec<EffectRef>,
}

/// POST /api/process-batch (multipart: `images` files plus optional
/// `effects` JSON field).
#[instrument(skip_all)]
pub async fn process_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut files = Vec::new();
    let mut effects: Option<Vec<EffectRef>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?
    {
        if field.name() == Some("effects") {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            let parsed = serde_json::from_str(&text)
                .map_err(|e| ApiError::Validation(format!("invalid effects field: {e}")))?;
            effects = Some(caller_effects(parsed)?);
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let mime = field.content_type().unwrap_or_default().to_string();
        if !mime.starts_with("image/") {
            return Err(ApiError::Validation(format!(
                "{file_name}: only image uploads are accepted"
            )));
        }
        if files.len() == MAX_BATCH_FILES {
            return Err(ApiError::Validation(format!(
                "at most {MAX_BATCH_FILES} images per batch"
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        check_file_size(&file_name, &bytes)?;
        files.push(UploadedImage {
            file_name,
            image: ImageData::new(mime, bytes.to_vec()),
        });
    }

    if files.is_empty() {
        return Err(ApiError::Validation("no images uploaded".into()));
    }

    let effects = match effects {
        Some(effects) => effects,
        None => stored_effects(&state).await?,
    };

    let total_images = files.len();
    let job_id = state.tracker.start_job(files, effects.clone()).await;
    Ok((
        StatusCode::ACCEPTED,
        ok(BatchStarted {
            job_id,
            total_images,
            effects,
        }),
    ))
}

/// GET /api/status/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let not_found = || ApiError::NotFound(format!("job '{job_id}' not found"));
    let id = Uuid::parse_str(&job_id).map_err(|_| not_found())?;
    let view = state.tracker.get_status(id).await.ok_or_else(not_found)?;
    Ok(ok(view))
}

// ── Strip ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StripRequest {
    pub images: Vec<String>,
}

/// POST /api/strip: returns the assembled JPEG.
#[instrument(skip_all)]
pub async fn strip(Json(body): Json<StripRequest>) -> ApiResult<Response> {
    let images = decode_images(&body.images)?;
    let strip = tokio::task::spawn_blocking(move || compose_strip(&images, StripLayout::default()))
        .await
        .map_err(|e| ApiError::Internal(format!("strip task panicked: {e}")))??;
    Ok(image_response(&strip.mime, strip.bytes))
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The enabled effects every batch endpoint falls back to.
async fn stored_effects(state: &AppState) -> ApiResult<Vec<EffectRef>> {
    Ok(db::enabled_effects(&state.pool)
        .await?
        .iter()
        .map(EffectRef::from)
        .collect())
}

fn caller_effects(effects: Vec<EffectRef>) -> ApiResult<Vec<EffectRef>> {
    db::validate_effect_refs(&effects)?;
    Ok(effects)
}

fn decode_images(raw: &[String]) -> ApiResult<Vec<ImageData>> {
    if raw.is_empty() {
        return Err(ApiError::Validation("images must not be empty".into()));
    }
    raw.iter()
        .enumerate()
        .map(|(index, s)| decode_image(s, index))
        .collect()
}

fn decode_image(raw: &str, index: usize) -> ApiResult<ImageData> {
    ImageData::from_data_url(raw).map_err(|err| {
        warn!(index, %err, "rejected image payload");
        ApiError::Validation(format!("image {index}: {err}"))
    })
}

fn check_file_size(file_name: &str, bytes: &Bytes) -> ApiResult<()> {
    if bytes.len() > MAX_FILE_BYTES {
        return Err(ApiError::Validation(format!(
            "{file_name}: file exceeds {} MB",
            MAX_FILE_BYTES / (1024 * 1024)
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::Validation(format!("{file_name}: file is empty")));
    }
    Ok(())
}

fn image_response(mime: &str, bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response()
}
