use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_view(config: &crate::config::AppConfig) -> serde_json::Value {
    // API keys never leave the process.
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "asr": {
            "model_repo": config.asr.model_repo,
            "language": config.asr.language,
            "silence_rms_threshold": config.asr.silence_rms_threshold
        },
        "translation": {
            "command": config.translation.command,
            "timeout_secs": config.translation.timeout_secs
        },
        "answer": {
            "endpoint": config.answer.endpoint,
            "model": config.answer.model,
            "max_attempts": config.answer.max_attempts,
            "backoff_base_secs": config.answer.backoff_base_secs,
            "timeout_secs": config.answer.timeout_secs,
            "api_key_configured": config.answer.api_key.is_some()
        },
        "tts": {
            "endpoint": config.tts.endpoint,
            "voice_id": config.tts.voice_id,
            "output_format": config.tts.output_format,
            "max_text_chars": config.tts.max_text_chars,
            "timeout_secs": config.tts.timeout_secs,
            "api_key_configured": config.tts.api_key.is_some()
        },
        "pipeline": {
            "min_input_bytes": config.pipeline.min_input_bytes,
            "silence_fallback_secs": config.pipeline.silence_fallback_secs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}
