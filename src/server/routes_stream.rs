//! Player documents: `GET /api/stream/{provider}`.

use crate::error::Error;
use crate::providers::embed::EpisodeRef;
use crate::sequencer::SourceCandidate;
use crate::server::{AppContext, parse_episode};
use crate::surface::{PlayerDocument, SurfaceMode};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

pub fn stream_routes() -> Router<AppContext> {
    Router::new().route("/api/stream/{provider}", get(stream_document))
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub anime: Option<String>,
    #[serde(default)]
    pub episode: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub show: Option<String>,
    #[serde(default)]
    pub dub: Option<String>,
}

impl StreamQuery {
    fn title(&self) -> &str {
        self.anime.as_deref().map(str::trim).unwrap_or_default()
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

async fn stream_document(
    State(ctx): State<AppContext>,
    Path(provider): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let provider = provider.trim().to_ascii_lowercase();
    let title = if query.title().is_empty() {
        "Anime"
    } else {
        query.title()
    };

    let outcome = parse_episode(query.episode.as_deref())
        .and_then(|episode| build_candidates(&ctx, &provider, &query, episode).map(|c| (episode, c)));

    match outcome {
        Ok((episode, (mode, candidates))) => {
            tracing::debug!(provider = %provider, episode, candidates = candidates.len(), "rendering player");
            // A stream candidate is a whole resolver lookup, not one page load.
            let attempt_timeout = match mode {
                SurfaceMode::Embed => ctx.settings.playback.attempt_timeout(),
                SurfaceMode::Stream => ctx.settings.playback.resolve_timeout(),
            };
            let body = ctx.surface.render(&PlayerDocument {
                title,
                episode,
                provider: &provider,
                mode,
                candidates: &candidates,
                attempt_timeout,
            });
            html(&ctx, StatusCode::OK, body)
        }
        Err(err) => {
            tracing::info!(provider = %provider, error = %err, "no player for request");
            let body = ctx.surface.render_message(title, &err.to_string());
            html(&ctx, err.http_status(), body)
        }
    }
}

fn html(ctx: &AppContext, status: StatusCode, body: String) -> Response {
    (status, ctx.surface.sandbox.response_headers(), body).into_response()
}

/// Embed providers render their URL templates; stream providers point at this
/// service's source endpoints, one per resolver.
fn build_candidates(
    ctx: &AppContext,
    provider: &str,
    query: &StreamQuery,
    episode: u32,
) -> Result<(SurfaceMode, Vec<SourceCandidate>), Error> {
    if ctx.catalog.contains(provider) {
        let candidates = ctx.catalog.candidates(
            provider,
            &EpisodeRef {
                id: query.id(),
                title: query.title(),
                episode,
            },
        )?;
        return Ok((SurfaceMode::Embed, candidates));
    }

    let resolvers = ctx
        .stream_resolvers(provider)
        .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))?;
    if resolvers.is_empty() {
        return Err(Error::UnsupportedProvider(format!(
            "{provider}: no stream resolvers are enabled"
        )));
    }
    let show = query.show.as_deref().filter(|s| !s.trim().is_empty());
    if query.title().is_empty() && show.is_none() {
        return Err(Error::InvalidInput(String::from("missing anime title")));
    }

    let candidates = resolvers
        .iter()
        .map(|resolver| {
            let mut params = url::form_urlencoded::Serializer::new(String::new());
            params.append_pair("anime", query.title());
            params.append_pair("episode", &episode.to_string());
            if let Some(id) = query.id() {
                params.append_pair("id", id);
            }
            if let Some(show) = show {
                params.append_pair("show", show);
            }
            if let Some(dub) = query.dub.as_deref() {
                params.append_pair("dub", dub);
            }
            SourceCandidate::new(
                resolver.label(),
                format!("/api/sources/{}?{}", resolver.name(), params.finish()),
            )
        })
        .collect();
    Ok((SurfaceMode::Stream, candidates))
}
