//! Server-rendered pages: trending, browse, search and the anime detail page
//! with its embedded player.

use crate::anilist::{clean_description, preferred_title};
use crate::error::Error;
use crate::server::{AppContext, parse_episode};
use crate::surface::escape_html;
use crate::types::{MediaPage, MediaSummary};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

/// Provider the detail page opens when none is chosen.
pub const DEFAULT_PROVIDER: &str = "universal";

const GRID_SIZE: u32 = 24;
const MAX_EPISODE_LINKS: u32 = 500;

pub fn page_routes() -> Router<AppContext> {
    Router::new()
        .route("/", get(home))
        .route("/browse", get(browse))
        .route("/search", get(search))
        .route("/anime/{id}", get(anime_detail))
}

#[derive(Debug, Default, Deserialize)]
struct BrowseQuery {
    page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: Option<String>,
    page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DetailQuery {
    #[serde(default)]
    episode: Option<String>,
    #[serde(default)]
    provider: Option<String>,
}

async fn home(State(ctx): State<AppContext>) -> Response {
    let body = match ctx.anilist.trending(1, GRID_SIZE).await {
        Ok(page) => format!("<h1>Trending now</h1>\n{}", media_grid(&page.media)),
        Err(err) => unavailable(&err),
    };
    page(StatusCode::OK, "Trending", &body)
}

async fn browse(State(ctx): State<AppContext>, Query(query): Query<BrowseQuery>) -> Response {
    let current = query.page.unwrap_or(1).max(1);
    let body = match ctx.anilist.trending(current, GRID_SIZE).await {
        Ok(page) => format!(
            "<h1>Browse</h1>\n{}\n{}",
            media_grid(&page.media),
            pager(&page, current, |n| format!("/browse?page={n}"))
        ),
        Err(err) => unavailable(&err),
    };
    page(StatusCode::OK, "Browse", &body)
}

async fn search(State(ctx): State<AppContext>, Query(query): Query<SearchQuery>) -> Response {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    let current = query.page.unwrap_or(1).max(1);
    let form = format!(
        "<form action=\"/search\" method=\"get\"><input type=\"search\" name=\"q\" value=\"{}\" placeholder=\"Search anime\"><button type=\"submit\">Search</button></form>",
        escape_html(q)
    );
    if q.is_empty() {
        return page(StatusCode::OK, "Search", &format!("<h1>Search</h1>\n{form}"));
    }

    let results = match ctx.anilist.search(q, current, GRID_SIZE).await {
        Ok(found) if found.media.is_empty() => {
            format!("<p class=\"empty\">No results for \"{}\".</p>", escape_html(q))
        }
        Ok(found) => {
            let encoded: String = url::form_urlencoded::byte_serialize(q.as_bytes()).collect();
            format!(
                "{}\n{}",
                media_grid(&found.media),
                pager(&found, current, |n| format!("/search?q={encoded}&page={n}"))
            )
        }
        Err(err) => unavailable(&err),
    };
    page(
        StatusCode::OK,
        &format!("Search: {q}"),
        &format!("<h1>Search</h1>\n{form}\n{results}"),
    )
}

async fn anime_detail(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Response {
    let Ok(id) = id.trim().parse::<i64>() else {
        return not_found();
    };
    let episode = match parse_episode(query.episode.as_deref()) {
        Ok(episode) => episode,
        Err(err) => {
            let body = format!("<p class=\"error\">{}</p>", escape_html(&err.to_string()));
            return page(err.http_status(), "Invalid episode", &body);
        }
    };
    let provider = query
        .provider
        .as_deref()
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

    let media = match ctx.anilist.media(id).await {
        Ok(Some(media)) => media,
        Ok(None) => return not_found(),
        Err(err) => {
            tracing::warn!(id, error = %err, "media lookup failed");
            return not_found();
        }
    };

    let title = preferred_title(media.title.as_ref());
    let body = detail_body(&ctx, &media, title, episode, &provider);
    page(StatusCode::OK, title, &body)
}

fn detail_body(
    ctx: &AppContext,
    media: &MediaSummary,
    title: &str,
    episode: u32,
    provider: &str,
) -> String {
    let mut params = url::form_urlencoded::Serializer::new(String::new());
    params.append_pair("anime", title);
    params.append_pair("episode", &episode.to_string());
    params.append_pair("id", &media.id.to_string());
    let player_src = format!(
        "/api/stream/{}?{}",
        url::form_urlencoded::byte_serialize(provider.as_bytes()).collect::<String>(),
        params.finish()
    );

    let mut html = String::with_capacity(4096);
    html.push_str(&format!("<h1>{}</h1>\n", escape_html(title)));
    html.push_str(&format!(
        "<div class=\"player\"><iframe src=\"{}\" allow=\"autoplay; fullscreen; picture-in-picture\" allowfullscreen></iframe></div>\n",
        escape_html(&player_src)
    ));

    html.push_str("<nav class=\"providers\">");
    for name in ctx.provider_names() {
        let class = if name == provider { " class=\"active\"" } else { "" };
        html.push_str(&format!(
            "<a{class} href=\"/anime/{}?episode={episode}&amp;provider={}\">{}</a>",
            media.id,
            escape_html(&name),
            escape_html(&name)
        ));
    }
    html.push_str("</nav>\n");

    let known = media
        .episodes
        .filter(|n| *n > 0)
        .unwrap_or(episode.saturating_add(1));
    let (first, last) = episode_window(episode, known.max(episode));
    html.push_str("<nav class=\"episodes\">");
    for n in first..=last {
        let class = if n == episode { " class=\"active\"" } else { "" };
        html.push_str(&format!(
            "<a{class} href=\"/anime/{}?episode={n}&amp;provider={}\">{n}</a>",
            media.id,
            escape_html(provider)
        ));
    }
    html.push_str("</nav>\n");

    let mut facts = Vec::new();
    if let Some(format) = &media.format {
        facts.push(format.clone());
    }
    if let Some(episodes) = media.episodes {
        facts.push(format!("{episodes} episodes"));
    }
    if let (Some(season), Some(year)) = (&media.season, media.season_year) {
        facts.push(format!("{season} {year}"));
    }
    if let Some(status) = &media.status {
        facts.push(status.clone());
    }
    if let Some(score) = media.average_score {
        facts.push(format!("{score}%"));
    }
    if !facts.is_empty() {
        html.push_str(&format!(
            "<p class=\"facts\">{}</p>\n",
            escape_html(&facts.join(" · "))
        ));
    }
    let genres = media.genre_names();
    if !genres.is_empty() {
        html.push_str(&format!(
            "<p class=\"genres\">{}</p>\n",
            escape_html(&genres.join(", "))
        ));
    }
    let description = clean_description(media.description.as_deref());
    if !description.is_empty() {
        html.push_str(&format!(
            "<p class=\"description\">{}</p>\n",
            escape_html(&description).replace('\n', "<br>")
        ));
    }
    html
}

/// At most `MAX_EPISODE_LINKS` consecutive episodes out of `1..=total`,
/// centred on `current` where possible.
fn episode_window(current: u32, total: u32) -> (u32, u32) {
    if total <= MAX_EPISODE_LINKS {
        return (1, total);
    }
    let span = MAX_EPISODE_LINKS - 1;
    let first = current.saturating_sub(MAX_EPISODE_LINKS / 2).max(1);
    let last = first.saturating_add(span).min(total);
    (last.saturating_sub(span).max(1), last)
}

fn media_grid(media: &[MediaSummary]) -> String {
    if media.is_empty() {
        return String::from("<p class=\"empty\">Nothing to show.</p>");
    }
    let mut html = String::from("<div class=\"grid\">\n");
    for item in media {
        let title = escape_html(preferred_title(item.title.as_ref()));
        let cover = item
            .cover_url()
            .map(|url| format!("<img src=\"{}\" alt=\"{title}\" loading=\"lazy\">", escape_html(url)))
            .unwrap_or_default();
        html.push_str(&format!(
            "<a class=\"card\" href=\"/anime/{}\">{cover}<span>{title}</span></a>\n",
            item.id
        ));
    }
    html.push_str("</div>");
    html
}

fn pager(page: &MediaPage, current: u32, link: impl Fn(u32) -> String) -> String {
    let mut html = String::from("<nav class=\"pager\">");
    if current > 1 {
        html.push_str(&format!(
            "<a href=\"{}\">Previous</a>",
            escape_html(&link(current - 1))
        ));
    }
    if page.page_info.has_next_page.unwrap_or(false) {
        html.push_str(&format!(
            "<a href=\"{}\">Next</a>",
            escape_html(&link(current + 1))
        ));
    }
    html.push_str("</nav>");
    html
}

fn unavailable(err: &Error) -> String {
    tracing::warn!(error = %err, "metadata unavailable");
    String::from("<p class=\"empty\">Nothing to show right now. Please try again later.</p>")
}

fn not_found() -> Response {
    page(
        StatusCode::NOT_FOUND,
        "Not found",
        "<h1>Not found</h1>\n<p class=\"empty\">This anime could not be found.</p>",
    )
}

fn page(status: StatusCode, title: &str, body: &str) -> Response {
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n<title>{} - anistream</title>\n<style>\n{PAGE_CSS}\n</style>\n</head>\n<body>\n<header><a href=\"/\">anistream</a><a href=\"/browse\">Browse</a><a href=\"/search\">Search</a></header>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        escape_html(title)
    );
    (status, Html(html)).into_response()
}

const PAGE_CSS: &str = r#"body { margin: 0; background: #0b0b12; color: #e5e7eb; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; }
header { display: flex; gap: 16px; padding: 12px 24px; background: #13131f; }
header a { color: #a78bfa; text-decoration: none; font-weight: 600; }
main { padding: 24px; max-width: 1200px; margin: 0 auto; }
.grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 16px; }
.card { color: inherit; text-decoration: none; display: flex; flex-direction: column; gap: 6px; }
.card img { width: 100%; aspect-ratio: 2 / 3; object-fit: cover; border-radius: 6px; }
.player { position: relative; width: 100%; aspect-ratio: 16 / 9; background: #000; }
.player iframe { position: absolute; inset: 0; width: 100%; height: 100%; border: 0; }
nav { display: flex; flex-wrap: wrap; gap: 6px; margin: 12px 0; }
nav a { color: #e5e7eb; background: #1f1f2e; padding: 4px 10px; border-radius: 4px; text-decoration: none; }
nav a.active { background: #7c3aed; }
.empty, .error { color: #9ca3af; }
.error { color: #fb7185; }"#;
