//! # Insight Binary
//!
//! Assembles the scoring engine from configuration and runs the daily
//! reset scheduler until interrupted.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use configs::{LogFormat, LogSettings, Settings};
use domains::SystemClock;
use services::{next_reset_after, EngineOptions, Identity, Repositories, ResetOutcome, ScoringEngine};
use storage_adapters::InMemoryStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(any(feature = "db-postgres", feature = "auth-jwt"))]
use secrecy::ExposeSecret;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.log);

    let offset = settings.engine.day_offset()?;
    let options = EngineOptions { day_offset: offset, rank_timeout: settings.engine.rank_timeout() };
    let repos = build_repositories(&settings).await?;
    let identity = build_identity(&settings);
    let engine = Arc::new(ScoringEngine::new(repos, identity, Arc::new(SystemClock), options));

    let ranked = engine.recompute_ranks().await.context("initial rank computation")?;
    info!(users = ranked, "🚀 Insight engine ready");

    if !settings.schedule.enabled {
        info!("daily reset scheduler disabled");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    if settings.schedule.run_on_start {
        trigger_reset(engine.clone());
    }

    let reset_at = settings.schedule.reset_at()?;
    loop {
        let now = Utc::now();
        let next = next_reset_after(now, reset_at, offset);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, "next daily reset scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => trigger_reset(engine.clone()),
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// Runs one reset in the background; the orchestrator skips overlapping runs.
fn trigger_reset(engine: Arc<ScoringEngine>) {
    tokio::spawn(async move {
        match engine.run_daily_reset().await {
            Ok(ResetOutcome::Skipped) => warn!("previous daily reset still running"),
            Ok(ResetOutcome::Completed { .. }) => {}
            Err(e) => error!(error = %e, "daily reset failed"),
        }
    });
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn build_repositories(settings: &Settings) -> anyhow::Result<Repositories> {
    match &settings.database.url {
        #[cfg(feature = "db-postgres")]
        Some(url) => {
            let store = storage_adapters::PgStore::connect(url.expose_secret(), settings.database.max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            store.migrate().await.context("running migrations")?;
            info!("using PostgreSQL content store");
            Ok(Repositories::from_store(Arc::new(store)))
        }
        #[cfg(not(feature = "db-postgres"))]
        Some(_) => {
            warn!("database.url is set but this build lacks db-postgres; using the in-memory store");
            Ok(Repositories::from_store(Arc::new(InMemoryStore::new())))
        }
        None => {
            info!("using in-memory content store");
            Ok(Repositories::from_store(Arc::new(InMemoryStore::new())))
        }
    }
}

fn build_identity(settings: &Settings) -> Identity {
    let hasher = Arc::new(auth_adapters::Argon2PasswordHasher::new());
    let ttl = settings.auth.token_ttl();

    #[cfg(feature = "auth-jwt")]
    if let Some(secret) = &settings.auth.jwt_secret {
        let tokens = auth_adapters::JwtTokenIssuer::new(secret.expose_secret().as_bytes(), ttl);
        return Identity { hasher, tokens: Arc::new(tokens) };
    }

    if settings.auth.jwt_secret.is_some() && cfg!(not(feature = "auth-jwt")) {
        warn!("auth.jwt_secret is set but this build lacks auth-jwt; using session tokens");
    }
    Identity { hasher, tokens: Arc::new(auth_adapters::SessionTokenIssuer::new(ttl)) }
}
