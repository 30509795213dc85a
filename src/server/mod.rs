use crate::anilist::AniListClient;
use crate::config::Settings;
use crate::error::Error;
use crate::providers::{StreamResolver, allanime::AllAnimeResolver, embed::EmbedCatalog};
use crate::surface::PlaybackSurface;
use anyhow::{Context, Result};
use axum::{Json, Router, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod routes_anilist;
pub mod routes_pages;
pub mod routes_sources;
pub mod routes_stream;

/// Stream-mode provider names that fan out over every registered resolver.
pub const CHAIN_PROVIDERS: &[&str] = &["universal", "hianime", "aniwatch"];

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub anilist: Arc<AniListClient>,
    pub catalog: Arc<EmbedCatalog>,
    /// Tried in order by the resolver chain.
    pub resolvers: Arc<Vec<Arc<dyn StreamResolver>>>,
    pub surface: Arc<PlaybackSurface>,
    /// Cancelled on shutdown; handlers work on child tokens.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let anilist = AniListClient::new(
            settings.anilist.endpoint.clone(),
            Duration::from_secs(settings.anilist.timeout_secs),
        )?;

        let mut resolvers: Vec<Arc<dyn StreamResolver>> = Vec::new();
        if settings.allanime.enabled {
            let allanime = AllAnimeResolver::new(
                settings.allanime.clone(),
                settings.playback.attempt_timeout(),
            )
            .context("failed to build AllAnime resolver")?;
            resolvers.push(Arc::new(allanime));
        }

        Ok(Self::new(settings, anilist, resolvers))
    }

    pub fn new(
        settings: Settings,
        anilist: AniListClient,
        resolvers: Vec<Arc<dyn StreamResolver>>,
    ) -> Self {
        Self {
            anilist: Arc::new(anilist),
            catalog: Arc::new(EmbedCatalog::with_overrides(&settings.providers)),
            resolvers: Arc::new(resolvers),
            surface: Arc::new(PlaybackSurface::from_settings(&settings.playback)),
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
            settings: Arc::new(settings),
        }
    }

    pub fn resolver(&self, name: &str) -> Option<Arc<dyn StreamResolver>> {
        self.resolvers.iter().find(|r| r.name() == name).cloned()
    }

    /// Resolvers behind a stream-mode provider name, or `None` when the name
    /// is not a stream provider.
    pub fn stream_resolvers(&self, provider: &str) -> Option<Vec<Arc<dyn StreamResolver>>> {
        if CHAIN_PROVIDERS.contains(&provider) {
            return Some(self.resolvers.iter().cloned().collect());
        }
        self.resolver(provider).map(|r| vec![r])
    }

    /// Every provider name the stream route accepts, embed providers first.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.catalog.names().map(str::to_string).collect();
        if !self.resolvers.is_empty() {
            names.extend(CHAIN_PROVIDERS.iter().map(|s| s.to_string()));
            names.extend(self.resolvers.iter().map(|r| r.name().to_string()));
        }
        names
    }
}

/// `episode` query value: absent or blank means 1, anything else must be a
/// positive integer.
pub fn parse_episode(raw: Option<&str>) -> Result<u32, Error> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(1);
    };
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidInput(format!(
            "episode must be a positive integer, got \"{raw}\""
        ))),
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .merge(routes_anilist::anilist_routes())
        .merge(routes_stream::stream_routes())
        .merge(routes_sources::sources_routes())
        .merge(routes_pages::page_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check(
    axum::extract::State(ctx): axum::extract::State<AppContext>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "startedAt": ctx.started_at.to_rfc3339(),
    }))
}

/// Start the HTTP server
pub async fn start_server(ctx: AppContext, open_browser: bool) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.settings.server.host, ctx.settings.server.port)
        .parse()
        .context("Invalid server address")?;

    let shutdown = ctx.shutdown.clone();
    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let url = format!("http://{addr}/");
    tracing::info!("Listening on {url}");

    if open_browser {
        if let Err(err) = open::that(&url) {
            tracing::warn!(error = %err, "failed to open browser");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_defaults_to_one() {
        assert_eq!(parse_episode(None).unwrap(), 1);
        assert_eq!(parse_episode(Some("  ")).unwrap(), 1);
        assert_eq!(parse_episode(Some("12")).unwrap(), 12);
    }

    #[test]
    fn episode_must_be_positive_integer() {
        for raw in ["0", "-1", "abc", "1.5"] {
            assert!(
                matches!(parse_episode(Some(raw)), Err(Error::InvalidInput(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn chain_providers_need_resolvers() {
        let settings = Settings::default();
        let anilist = AniListClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let ctx = AppContext::new(settings, anilist, Vec::new());
        assert_eq!(ctx.stream_resolvers("universal").map(|r| r.len()), Some(0));
        assert!(ctx.stream_resolvers("vidrock").is_none());
        assert!(!ctx.provider_names().contains(&String::from("universal")));
    }
}
