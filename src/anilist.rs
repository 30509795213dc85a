//! AniList GraphQL metadata client.
//!
//! One request per call, no retries. Transport failures are `Network`, an
//! `errors` list is `Remote`, and a body without `data` is `Contract`.

use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::types::{MediaPage, MediaSummary, MediaTitle};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 50;

#[derive(Debug, Clone)]
pub struct AniListClient {
    client: Client,
    endpoint: String,
}

impl AniListClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Network(format!("failed to build AniList client: {err}")))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Sends `query` with `variables` and decodes the `data` field.
    pub async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Network(format!("AniList request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| Error::Network(format!("failed to read AniList response: {err}")))?;

        // Decoded untyped first so an errors list wins over a malformed `data`.
        let envelope = serde_json::from_str::<GraphQlEnvelope>(&text);
        if !status.is_success() {
            // AniList reports e.g. a missing Media as 404 with an errors list.
            if let Ok(GraphQlEnvelope {
                errors: Some(errors),
                ..
            }) = envelope
            {
                if !errors.is_empty() {
                    return Err(Error::Remote(join_messages(errors)));
                }
            }
            return Err(Error::Network(format!("AniList HTTP {status}: {text}")));
        }

        let envelope = envelope
            .map_err(|err| Error::Contract(format!("failed to parse AniList response: {err}")))?;
        let data = extract_data(envelope)?;
        serde_json::from_value(data)
            .map_err(|err| Error::Contract(format!("failed to parse AniList response: {err}")))
    }

    pub async fn trending(&self, page: u32, per_page: u32) -> Result<MediaPage> {
        let data: PageData = self
            .query(
                TRENDING_QUERY,
                json!({ "page": page.max(1), "perPage": clamp_per_page(per_page) }),
            )
            .await?;
        Ok(data.page)
    }

    pub async fn search(&self, search: &str, page: u32, per_page: u32) -> Result<MediaPage> {
        let search = search.trim();
        let mut variables = json!({ "page": page.max(1), "perPage": clamp_per_page(per_page) });
        if !search.is_empty() {
            variables["search"] = Value::String(search.to_string());
        }
        let data: PageData = self.query(SEARCH_QUERY, variables).await?;
        Ok(data.page)
    }

    /// `Ok(None)` when AniList answers `{ "Media": null }`.
    pub async fn media(&self, id: i64) -> Result<Option<MediaSummary>> {
        let data: MediaData = self.query(MEDIA_QUERY, json!({ "id": id })).await?;
        Ok(data.media)
    }
}

fn extract_data(envelope: GraphQlEnvelope) -> Result<Value> {
    if let Some(errors) = envelope.errors {
        if !errors.is_empty() {
            return Err(Error::Remote(join_messages(errors)));
        }
    }
    envelope
        .data
        .ok_or_else(|| Error::Contract(String::from("AniList response is missing data")))
}

fn join_messages(errors: Vec<GraphQlError>) -> String {
    errors
        .into_iter()
        .map(|e| e.message)
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn clamp_per_page(per_page: u32) -> u32 {
    if per_page == 0 {
        DEFAULT_PER_PAGE
    } else {
        per_page.min(MAX_PER_PAGE)
    }
}

static BR_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?\s*>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Plain text from AniList's HTML-flavoured description.
pub fn clean_description(description: Option<&str>) -> String {
    let Some(raw) = description else {
        return String::new();
    };
    let text = BR_TAG.replace_all(raw, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

pub fn preferred_title(title: Option<&MediaTitle>) -> &str {
    title
        .and_then(|t| {
            [&t.english, &t.romaji, &t.native]
                .into_iter()
                .flatten()
                .find(|s| !s.is_empty())
        })
        .map(String::as_str)
        .unwrap_or("Untitled")
}

// --- GraphQL Structs ---

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<Value>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(rename = "Page")]
    page: MediaPage,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    // Required key; only an explicit null means "no such media".
    #[serde(rename = "Media", deserialize_with = "Option::deserialize")]
    media: Option<MediaSummary>,
}

// --- Queries ---

const TRENDING_QUERY: &str = r#"query ($page: Int, $perPage: Int) {
  Page(page: $page, perPage: $perPage) {
    pageInfo { total currentPage lastPage hasNextPage }
    media(type: ANIME, sort: [TRENDING_DESC, POPULARITY_DESC]) {
      id
      title { romaji english native }
      description
      episodes
      duration
      season
      seasonYear
      format
      status
      averageScore
      popularity
      genres
      bannerImage
      coverImage { large extraLarge color }
    }
  }
}"#;

const SEARCH_QUERY: &str = r#"query ($search: String, $page: Int, $perPage: Int) {
  Page(page: $page, perPage: $perPage) {
    pageInfo { total currentPage lastPage hasNextPage }
    media(search: $search, type: ANIME, sort: [POPULARITY_DESC]) {
      id
      title { romaji english native }
      description
      episodes
      duration
      season
      seasonYear
      format
      status
      averageScore
      popularity
      genres
      bannerImage
      coverImage { large extraLarge color }
    }
  }
}"#;

const MEDIA_QUERY: &str = r#"query ($id: Int) {
  Media(id: $id, type: ANIME) {
    id
    title { romaji english native }
    description
    episodes
    duration
    season
    seasonYear
    format
    status
    averageScore
    popularity
    genres
    bannerImage
    coverImage { large extraLarge color }
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> AniListClient {
        AniListClient::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn null_media_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "Media": null } })),
            )
            .mount(&server)
            .await;

        let media = client_for(&server).await.media(1).await.unwrap();
        assert!(media.is_none());
    }

    #[tokio::test]
    async fn errors_payload_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errors": [{ "message": "x" }] })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).await.media(1).await.unwrap_err();
        match err {
            Error::Remote(msg) => assert!(msg.contains('x')),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_messages_are_joined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": [{ "message": "Not Found.", "status": 404 }, { "message": "again" }],
                "data": { "Media": null }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).await.media(99).await.unwrap_err();
        assert_eq!(err.to_string(), "remote error: Not Found.; again");
    }

    #[tokio::test]
    async fn missing_data_is_contract_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = client_for(&server).await.trending(1, 20).await.unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[tokio::test]
    async fn errors_win_over_null_typed_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "Page": null },
                "errors": [{ "message": "x" }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).await.trending(1, 20).await.unwrap_err();
        match err {
            Error::Remote(msg) => assert_eq!(msg, "x"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn media_without_media_key_is_contract_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&server)
            .await;

        let err = client_for(&server).await.media(1).await.unwrap_err();
        assert!(matches!(err, Error::Contract(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn server_failure_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.trending(1, 20).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn search_sends_clamped_variables_and_decodes_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "variables": { "search": "frieren", "page": 2, "perPage": 50 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "Page": {
                    "pageInfo": { "total": 1, "currentPage": 2, "lastPage": 2, "hasNextPage": false },
                    "media": [{
                        "id": 154587,
                        "title": { "romaji": "Sousou no Frieren", "english": "Frieren: Beyond Journey's End", "native": null },
                        "episodes": 28,
                        "genres": ["Adventure", null, "Drama"],
                        "coverImage": { "large": "https://img/large.jpg", "extraLarge": null, "color": "#e4a15d" }
                    }]
                }}
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .await
            .search(" frieren ", 2, 500)
            .await
            .unwrap();
        assert_eq!(page.page_info.has_next_page, Some(false));
        let media = &page.media[0];
        assert_eq!(media.id, 154587);
        assert_eq!(media.genre_names(), vec!["Adventure", "Drama"]);
        assert_eq!(media.cover_url(), Some("https://img/large.jpg"));
        assert_eq!(
            preferred_title(media.title.as_ref()),
            "Frieren: Beyond Journey's End"
        );
    }

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(clamp_per_page(0), DEFAULT_PER_PAGE);
        assert_eq!(clamp_per_page(30), 30);
        assert_eq!(clamp_per_page(80), MAX_PER_PAGE);
    }

    #[test]
    fn description_is_cleaned() {
        let raw = "Line one<br>Line <i>two</i><br/>\n\n\n\n<b>end</b>  ";
        assert_eq!(
            clean_description(Some(raw)),
            "Line one\nLine two\n\nend"
        );
        assert_eq!(clean_description(None), "");
    }

    #[test]
    fn title_falls_back_to_untitled() {
        let title = MediaTitle {
            romaji: Some(String::from("Shingeki no Kyojin")),
            english: Some(String::new()),
            native: None,
        };
        assert_eq!(preferred_title(Some(&title)), "Shingeki no Kyojin");
        assert_eq!(preferred_title(None), "Untitled");
    }
}
