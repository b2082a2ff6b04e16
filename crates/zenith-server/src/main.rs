//! Zenith server binary.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! the session reaper and graceful shutdown on SIGTERM/SIGINT.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use zenith_server::config::{self, Config, SttProvider};
use zenith_server::pipeline::{Pipeline, PipelineSettings};
use zenith_server::sessions::SessionLimits;
use zenith_server::store::TurnStore;
use zenith_server::{app, background, AppState};
use zenith_voice::{
    ChatCompletionClient, GroqTranscriber, Transcriber, TtsService, WhisperCppTranscriber,
};

type BoxError = Box<dyn Error + Send + Sync>;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("ZENITH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Constructs the gateways named by the configuration.
async fn build_pipeline(config: &Config, store: TurnStore) -> Result<Pipeline, BoxError> {
    let responder = Arc::new(ChatCompletionClient::new(config.provider.clone())?);

    let transcriber: Arc<dyn Transcriber> = match config.speech.stt_provider {
        SttProvider::Groq => Arc::new(GroqTranscriber::new(config.provider.clone())?),
        SttProvider::WhisperCpp => Arc::new(WhisperCppTranscriber::new(
            &config.speech.whisper_model,
            &config.speech.whisper_binary,
        )),
    };

    let tts = TtsService::new(
        &config.speech.voices_dir,
        &config.speech.audio_dir,
        &config.speech.piper_binary,
    )
    .with_espeak_binary(&config.speech.espeak_binary);
    for profile in &config.speech.voices {
        tts.add_profile(profile.clone()).await;
    }
    if let Some(voice) = &config.speech.default_voice {
        tts.set_default_voice(voice).await?;
    }

    tracing::info!(
        stt_provider = ?config.speech.stt_provider,
        chat_model = %responder.model(),
        voices = ?tts.voice_ids().await,
        default_voice = %tts.default_voice().await,
        "speech gateways ready"
    );

    Ok(Pipeline::new(
        store,
        transcriber,
        responder,
        Arc::new(tts),
        PipelineSettings::from(config),
    ))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // A missing .env is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)?;

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        dotenv = dotenv.is_ok(),
        "resolved startup configuration path"
    );

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    // Initialize database
    let pool = zenith_db::create_pool(
        &config.database.path,
        zenith_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )?;

    {
        let conn = pool.get()?;
        let applied = zenith_db::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    tokio::fs::create_dir_all(&config.speech.audio_dir).await?;

    let pipeline = build_pipeline(&config, TurnStore::new(pool)).await?;

    let mut state = AppState::new(pipeline, &config.speech.audio_dir);
    state.session_limits = SessionLimits::from(&config.sessions);
    state.cors_origins = config.server.cors_origins.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = tokio::spawn(background::start_session_reaper(
        state.sessions.clone(),
        state.connections.clone(),
        Duration::from_secs(config.sessions.reaper_interval_secs),
        shutdown_rx,
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting zenith server");

    let listener = TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reaper.await {
        tracing::warn!("session reaper ended abnormally: {}", e);
    }

    tracing::info!("zenith server shut down");
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
