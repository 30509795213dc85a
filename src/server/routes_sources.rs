//! Direct-stream lookup: `GET /api/sources/{resolver}` and the resolver chain
//! behind `GET /api/sources`.

use crate::error::Error;
use crate::providers::{StreamResolver, resolve_episode};
use crate::sequencer::{SequenceOutcome, Sequencer, SourceCandidate};
use crate::server::{AppContext, parse_episode};
use crate::types::{EpisodeStreams, StreamSource, SubtitleTrack, Translation};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn sources_routes() -> Router<AppContext> {
    Router::new()
        .route("/api/sources", get(chain_sources))
        .route("/api/sources/{resolver}", get(resolver_sources))
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcesQuery {
    #[serde(default)]
    pub anime: Option<String>,
    #[serde(default)]
    pub episode: Option<String>,
    /// AniList id, carried for logging only.
    #[serde(default)]
    pub id: Option<String>,
    /// Resolver-specific show id; skips the title search when present.
    #[serde(default)]
    pub show: Option<String>,
    #[serde(default)]
    pub dub: Option<String>,
}

impl SourcesQuery {
    fn translation(&self) -> Translation {
        match self.dub.as_deref().map(str::trim) {
            Some("1" | "true" | "yes" | "dub") => Translation::Dub,
            _ => Translation::Sub,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub sources: Vec<StreamSource>,
    pub subtitles: Vec<SubtitleTrack>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl SourcesResponse {
    fn found(provider: &str, streams: EpisodeStreams) -> Self {
        Self {
            success: true,
            provider: Some(provider.to_string()),
            server: Some(streams.server),
            sources: streams.sources,
            subtitles: streams.subtitles,
            error: None,
            code: None,
        }
    }

    fn failed(err: &Error) -> Self {
        Self {
            success: false,
            provider: None,
            server: None,
            sources: Vec::new(),
            subtitles: Vec::new(),
            error: Some(err.to_string()),
            code: Some(err.code()),
        }
    }
}

fn respond(result: Result<SourcesResponse, Error>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            let status = err.http_status();
            if status.is_server_error() {
                tracing::error!(error = %err, "source lookup failed upstream");
            } else {
                tracing::info!(error = %err, "source lookup failed");
            }
            (status, Json(SourcesResponse::failed(&err))).into_response()
        }
    }
}

struct Lookup<'a> {
    title: &'a str,
    show: Option<&'a str>,
    episode: u32,
    translation: Translation,
}

impl<'a> Lookup<'a> {
    fn from_query(query: &'a SourcesQuery) -> Result<Self, Error> {
        let episode = parse_episode(query.episode.as_deref())?;
        let title = query.anime.as_deref().map(str::trim).unwrap_or_default();
        let show = query.show.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if title.is_empty() && show.is_none() {
            return Err(Error::InvalidInput(String::from("missing anime title")));
        }
        Ok(Self {
            title,
            show,
            episode,
            translation: query.translation(),
        })
    }

    async fn run(
        &self,
        resolver: &dyn StreamResolver,
        cancel: &CancellationToken,
    ) -> Result<EpisodeStreams, Error> {
        resolve_episode(
            resolver,
            self.title,
            self.show,
            self.episode,
            self.translation,
            cancel,
        )
        .await
        .map_err(Error::from)
    }
}

async fn resolver_sources(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Query(query): Query<SourcesQuery>,
) -> Response {
    let name = name.trim().to_ascii_lowercase();
    respond(lookup_one(&ctx, &name, &query).await)
}

/// Tries every registered resolver in order, first success wins.
async fn chain_sources(
    State(ctx): State<AppContext>,
    Query(query): Query<SourcesQuery>,
) -> Response {
    respond(lookup_chain(&ctx, &query).await)
}

async fn lookup_one(
    ctx: &AppContext,
    name: &str,
    query: &SourcesQuery,
) -> Result<SourcesResponse, Error> {
    let resolver = ctx
        .resolver(name)
        .ok_or_else(|| Error::UnsupportedProvider(name.to_string()))?;
    let lookup = Lookup::from_query(query)?;
    tracing::debug!(resolver = name, anilist_id = ?query.id, episode = lookup.episode, "resolving sources");
    let cancel = ctx.shutdown.child_token();
    let streams = lookup.run(resolver.as_ref(), &cancel).await?;
    Ok(SourcesResponse::found(resolver.name(), streams))
}

async fn lookup_chain(ctx: &AppContext, query: &SourcesQuery) -> Result<SourcesResponse, Error> {
    let lookup = Lookup::from_query(query)?;
    let resolvers: Vec<Arc<dyn StreamResolver>> = ctx.resolvers.iter().cloned().collect();
    if resolvers.is_empty() {
        return Err(Error::UnsupportedProvider(String::from(
            "no stream resolvers are enabled",
        )));
    }

    let candidates = resolvers
        .iter()
        .map(|r| SourceCandidate::new(r.label(), format!("/api/sources/{}", r.name())))
        .collect();
    let mut sequencer = Sequencer::new(candidates, ctx.settings.playback.resolve_timeout());
    let cancel = ctx.shutdown.child_token();
    let outcome = sequencer
        .run(&cancel, |index, _| {
            let resolver = Arc::clone(&resolvers[index]);
            let lookup = &lookup;
            let cancel = cancel.clone();
            async move { lookup.run(resolver.as_ref(), &cancel).await }
        })
        .await;

    match outcome {
        SequenceOutcome::Succeeded { index, value, .. } => {
            Ok(SourcesResponse::found(resolvers[index].name(), value))
        }
        SequenceOutcome::Exhausted => Err(Error::Exhausted {
            attempts: sequencer.retry_count(),
        }),
        SequenceOutcome::Aborted => Err(Error::Network(String::from("source lookup cancelled"))),
    }
}
