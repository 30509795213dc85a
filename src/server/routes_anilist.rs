//! JSON proxy over the AniList metadata client.

use crate::anilist::DEFAULT_PER_PAGE;
use crate::error::Error;
use crate::server::AppContext;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;

pub fn anilist_routes() -> Router<AppContext> {
    Router::new()
        .route("/api/anilist/trending", get(trending))
        .route("/api/anilist/search", get(search))
        .route("/api/anilist/media/{id}", get(media))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
    #[serde(default)]
    q: Option<String>,
}

impl PageQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE)
    }
}

fn failure(status: StatusCode, err: &Error) -> Response {
    tracing::error!(error = %err, "AniList request failed");
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn trending(State(ctx): State<AppContext>, Query(query): Query<PageQuery>) -> Response {
    match ctx.anilist.trending(query.page(), query.per_page()).await {
        Ok(page) => Json(json!({ "Page": page })).into_response(),
        Err(err) => failure(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn search(State(ctx): State<AppContext>, Query(query): Query<PageQuery>) -> Response {
    let q = query.q.as_deref().unwrap_or_default();
    match ctx.anilist.search(q, query.page(), query.per_page()).await {
        Ok(page) => Json(json!({ "Page": page })).into_response(),
        Err(err) => failure(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}

async fn media(State(ctx): State<AppContext>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.trim().parse::<i64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid media id" })),
        )
            .into_response();
    };
    match ctx.anilist.media(id).await {
        Ok(media) => Json(json!({ "Media": media })).into_response(),
        Err(err) => failure(StatusCode::INTERNAL_SERVER_ERROR, &err),
    }
}
