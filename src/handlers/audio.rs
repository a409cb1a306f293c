//! # Audio Pipeline Handlers
//!
//! HTTP surface for the question-answer pipeline: uploads that trigger a
//! run, playback and regeneration of the stored clips, and session
//! inspection. Uploads compete for the pipeline gate; a second upload while
//! one is processing gets 409 instead of queueing.

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde_json::json;

use crate::audio::fallback::silent_wav;
use crate::error::AppError;
use crate::pipeline::{Pipeline, PipelineResult};
use crate::state::{AppState, AudioRole};

/// One uploaded audio part plus the optional voice selection.
struct UploadedAudio {
    bytes: Vec<u8>,
    filename: Option<String>,
    voice: Option<String>,
}

/// Pull the audio part named `field_name` (and an optional `voice` text
/// part) out of a multipart body.
async fn read_upload(mut payload: Multipart, field_name: &str) -> Result<UploadedAudio, AppError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut voice: Option<String> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
        {
            data.extend_from_slice(&chunk);
        }

        if name == field_name {
            filename = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .map(str::to_string);
            bytes = Some(data);
        } else if name == "voice" {
            voice = String::from_utf8(data).ok().filter(|v| !v.trim().is_empty());
        }
    }

    let bytes = bytes.ok_or_else(|| AppError::BadRequest("No audio file provided".to_string()))?;

    Ok(UploadedAudio {
        bytes,
        filename,
        voice,
    })
}

fn busy_error() -> AppError {
    AppError::Busy(
        "Processing is already in progress. Please wait or stop the current process.".to_string(),
    )
}

fn run_envelope(data: &PipelineResult, source_type: &str, message: &str) -> serde_json::Value {
    json!({
        "success": true,
        "data": data,
        "timestamp": chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
        "source_type": source_type,
        "message": message
    })
}

/// Shared upload flow: claim the gate, run the pipeline, answer with the
/// result envelope. Tiny uploads skip the pipeline entirely but still
/// replace the session with the fallback set.
async fn process_upload(
    state: &AppState,
    pipeline: &Pipeline,
    upload: UploadedAudio,
    source_type: &str,
    success_message: &str,
    empty_message: &str,
) -> Result<HttpResponse, AppError> {
    let _guard = state.gate.try_acquire().ok_or_else(busy_error)?;

    if upload.bytes.len() < pipeline.min_input_bytes() {
        let result = pipeline.process(&upload.bytes, None, None).await;
        return Ok(HttpResponse::Ok().json(run_envelope(&result, source_type, empty_message)));
    }

    let result = pipeline
        .process(
            &upload.bytes,
            upload.filename.as_deref(),
            upload.voice.as_deref(),
        )
        .await;

    Ok(HttpResponse::Ok().json(run_envelope(&result, source_type, success_message)))
}

/// POST /upload-recording, multipart field `audio`.
pub async fn upload_recording(
    state: web::Data<AppState>,
    pipeline: web::Data<Arc<Pipeline>>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload = read_upload(payload, "audio").await?;
    process_upload(
        &state,
        &pipeline,
        upload,
        "recording",
        "Recording processed successfully",
        "Empty audio detected - please record a clear question",
    )
    .await
}

/// POST /upload-audio, multipart field `audio_file`.
pub async fn upload_audio(
    state: web::Data<AppState>,
    pipeline: web::Data<Arc<Pipeline>>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload = read_upload(payload, "audio_file").await?;
    process_upload(
        &state,
        &pipeline,
        upload,
        "upload",
        "File processed successfully",
        "Empty audio detected - please upload a valid audio file",
    )
    .await
}

/// POST /replace-audio, multipart field `file`.
///
/// Unlike the upload endpoints, a too-small file here is a client error
/// rather than a degraded run.
pub async fn replace_audio(
    state: web::Data<AppState>,
    pipeline: web::Data<Arc<Pipeline>>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload = read_upload(payload, "file").await?;

    if upload.bytes.len() < pipeline.min_input_bytes() {
        return Err(AppError::BadRequest("File is too small or empty".to_string()));
    }

    let _guard = state.gate.try_acquire().ok_or_else(busy_error)?;

    let result = pipeline
        .process(
            &upload.bytes,
            upload.filename.as_deref(),
            upload.voice.as_deref(),
        )
        .await;

    Ok(HttpResponse::Ok().json(run_envelope(
        &result,
        "upload",
        "Audio replaced and processed successfully",
    )))
}

fn parse_role(segment: &str) -> Result<AudioRole, AppError> {
    match segment {
        "pashto_question" | "question" => Ok(AudioRole::PashtoQuestion),
        "pashto_answer" | "answer" => Ok(AudioRole::PashtoAnswer),
        other => Err(AppError::BadRequest(format!("Invalid audio type: {}", other))),
    }
}

/// GET /play-audio/{audio_type}.
///
/// Streams the stored clip; when the session has none, serves silence so a
/// player never 404s mid-playback. No-cache headers keep clients from
/// replaying a previous run's audio.
pub async fn play_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let role = parse_role(&path)?;

    let config = state.get_config();
    let (bytes, mime) = {
        let session = state.session.read().unwrap();
        match session.artifact(role) {
            Some(artifact) => (artifact.bytes.clone(), artifact.mime),
            None => (silent_wav(config.pipeline.silence_fallback()), "audio/wav"),
        }
    };

    Ok(HttpResponse::Ok()
        .content_type(mime)
        .insert_header(("Content-Disposition", "inline"))
        .insert_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .insert_header(("Pragma", "no-cache"))
        .insert_header(("Expires", "0"))
        .body(bytes))
}

/// POST /regenerate-audio/{audio_type}. Accepts `all` to redo both clips.
pub async fn regenerate_audio(
    state: web::Data<AppState>,
    pipeline: web::Data<Arc<Pipeline>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let roles: Vec<AudioRole> = if path.as_str() == "all" {
        vec![AudioRole::PashtoQuestion, AudioRole::PashtoAnswer]
    } else {
        vec![parse_role(&path)?]
    };

    {
        let session = state.session.read().unwrap();
        if session.latest.is_none() {
            return Err(AppError::NotFound("No translation data found".to_string()));
        }
    }

    for role in roles {
        if !pipeline.regenerate_audio(role, None).await {
            tracing::warn!("regeneration kept existing {} audio", role.as_str());
        }
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Audio regenerated successfully"
    })))
}

/// GET /get-results.
pub async fn get_results(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session = state.session.read().unwrap();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": session.latest,
        "has_question_audio": session.artifact(AudioRole::PashtoQuestion).is_some(),
        "has_answer_audio": session.artifact(AudioRole::PashtoAnswer).is_some(),
        "timestamp": chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
    })))
}

/// GET /get-processing-status.
pub async fn get_processing_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "is_processing": state.gate.is_busy()
    }))
}

/// POST /stop-processing.
///
/// Runs cannot be aborted mid-flight; this reports whether one is active.
pub async fn stop_processing(state: web::Data<AppState>) -> HttpResponse {
    if state.gate.is_busy() {
        HttpResponse::Ok().json(json!({
            "success": false,
            "error": "Processing cannot be interrupted - the current run will finish shortly"
        }))
    } else {
        HttpResponse::Ok().json(json!({
            "success": false,
            "error": "No processing in progress"
        }))
    }
}

/// POST /clear-session.
pub async fn clear_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    state.session.write().unwrap().reset();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Session cleared"
    })))
}
