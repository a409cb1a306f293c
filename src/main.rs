//! # Pashto QA Backend - Main Application Entry Point
//!
//! HTTP server for a Pashto voice question-answering pipeline: uploaded
//! audio is transcribed, translated to English, answered in both languages
//! and synthesized back to Pashto speech.
//!
//! ## Application Architecture:
//! - **config**: TOML + environment configuration
//! - **audio**: decoding uploads and generating silent fallbacks
//! - **transcription**: Whisper ASR with outcome classification
//! - **translation**: subprocess-backed Pashto to English translation
//! - **answer**: Gemini answer generation with retry
//! - **tts**: UpliftAI speech synthesis
//! - **pipeline**: end-to-end orchestration and the session slot
//! - **handlers / middleware / health**: the HTTP surface

mod answer;
mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod retry;
mod state;
mod transcription;
mod translation;
mod tts;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use answer::AnswerGenerator;
use config::AppConfig;
use pipeline::Pipeline;
use state::{AppState, SessionState};
use transcription::TranscriptionEngine;
use translation::Translator;
use tts::SpeechSynthesizer;

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting pashto-qa-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let app_state = AppState::new(config.clone());
    let session: Arc<RwLock<SessionState>> = Arc::clone(&app_state.session);

    let engine = Arc::new(TranscriptionEngine::new(&config.asr));
    // Model load failure is survivable: the pipeline degrades to fallback
    // answers until a restart with connectivity restored.
    if let Err(e) = engine.load_model().await {
        warn!("transcription model load failed, continuing degraded: {}", e);
    }

    let translator = Arc::new(Translator::new(&config.translation));
    let answerer = AnswerGenerator::new(&config.answer, Arc::clone(&translator));
    let synthesizer = Arc::new(SpeechSynthesizer::new(&config.tts));

    if !answerer.is_configured() {
        warn!("GOOGLE_API_KEY not set - answer generation will use fallbacks");
    }
    if !synthesizer.is_configured() {
        warn!("UPLIFT_AI_API_KEY not set - speech synthesis will use silent audio");
    }

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&engine),
        translator,
        answerer,
        synthesizer,
        session,
        &config.pipeline,
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(Arc::clone(&pipeline)))
            .app_data(web::Data::new(Arc::clone(&engine)))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            .route("/upload-recording", web::post().to(handlers::upload_recording))
            .route("/upload-audio", web::post().to(handlers::upload_audio))
            .route("/replace-audio", web::post().to(handlers::replace_audio))
            .route("/play-audio/{audio_type}", web::get().to(handlers::play_audio))
            .route(
                "/regenerate-audio/{audio_type}",
                web::post().to(handlers::regenerate_audio),
            )
            .route("/get-results", web::get().to(handlers::get_results))
            .route(
                "/get-processing-status",
                web::get().to(handlers::get_processing_status),
            )
            .route("/stop-processing", web::post().to(handlers::stop_processing))
            .route("/clear-session", web::post().to(handlers::clear_session))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pashto_qa_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and set the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
