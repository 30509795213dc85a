use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{collections::HashMap, time::Duration};
use tokio_util::sync::CancellationToken;

use super::StreamResolver;
use crate::config::AllAnimeSettings;
use crate::error::Error;
use crate::sequencer::{SequenceOutcome, Sequencer, SourceCandidate};
use crate::types::{
    EpisodeCounts, EpisodeStreams, ShowInfo, StreamSource, SubtitleTrack, Translation,
};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36";
const SEARCH_LIMIT: u32 = 25;
const PATH_KEY: u8 = 0x38;

/// Direct-stream resolver backed by the AllAnime GraphQL API.
pub struct AllAnimeResolver {
    client: Client,
    settings: AllAnimeSettings,
    attempt_timeout: Duration,
}

impl AllAnimeResolver {
    pub fn new(settings: AllAnimeSettings, attempt_timeout: Duration) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            settings,
            attempt_timeout,
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });
        let response = self
            .client
            .post(&self.settings.api_url)
            .header("Referer", &self.settings.referer)
            .header("Origin", &self.settings.base_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Network(format!("AllAnime request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| Error::Network(format!("failed to read AllAnime response: {err}")))?;
        if !status.is_success() {
            return Err(Error::Network(format!("AllAnime API HTTP {status}: {text}")).into());
        }
        let envelope: GraphQlEnvelope<T> = serde_json::from_str(&text)
            .map_err(|err| Error::Contract(format!("failed to parse AllAnime response: {err}")))?;
        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Remote(format!("AllAnime API error: {joined}")).into());
        }
        envelope
            .data
            .ok_or_else(|| Error::Contract(String::from("AllAnime API returned no data")).into())
    }

    async fn episode_sources(
        &self,
        show_id: &str,
        translation: Translation,
        episode: &str,
    ) -> Result<Vec<SourceDescriptor>> {
        let payload: EpisodePayload = self
            .graphql(
                EPISODE_SOURCES_QUERY,
                json!({
                    "showId": show_id,
                    "translationType": translation.as_str(),
                    "episodeString": episode
                }),
            )
            .await?;
        Ok(payload.episode.map(|e| e.source_urls).unwrap_or_default())
    }

    fn clock_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{path}", self.settings.base_url.trim_end_matches('/'))
        }
    }

    async fn fetch_clock(&self, url: &str) -> Result<Vec<ClockLink>> {
        let response = self
            .client
            .get(url)
            .header("Referer", &self.settings.referer)
            .header("Origin", &self.settings.base_url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<ClockResponse>()
            .await?;
        if response.links.is_empty() {
            anyhow::bail!("server returned no links");
        }
        Ok(response.links)
    }

    /// Preferred servers present in `sources`, in preference order, with
    /// their decoded clock URLs.
    fn server_candidates(&self, sources: &[SourceDescriptor]) -> Vec<SourceCandidate> {
        self.settings
            .preferred_servers
            .iter()
            .filter_map(|server| {
                let source = sources.iter().find(|s| &s.source_name == server)?;
                let path = decode_provider_path(&source.source_url)?;
                Some(SourceCandidate::new(server.clone(), self.clock_url(&path)))
            })
            .collect()
    }

    fn build_streams(&self, server: &str, links: Vec<ClockLink>) -> EpisodeStreams {
        let mut sources = Vec::with_capacity(links.len());
        let mut subtitles: Vec<SubtitleTrack> = Vec::new();
        for link in links {
            for sub in link.subtitles.iter().filter(|s| s.is_english()) {
                if !subtitles.iter().any(|t| t.url == sub.src) {
                    subtitles.push(SubtitleTrack {
                        lang: sub.label.clone().unwrap_or_else(|| String::from("English")),
                        url: sub.src.clone(),
                    });
                }
            }
            sources.push(self.build_source(link));
        }
        sources.sort_by(|a, b| b.quality_rank.cmp(&a.quality_rank));
        EpisodeStreams {
            server: server.to_string(),
            sources,
            subtitles,
        }
    }

    fn build_source(&self, link: ClockLink) -> StreamSource {
        let quality = link.resolution.unwrap_or_else(|| String::from("auto"));
        let mut headers = link.headers;
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("referer")) {
            headers.insert(String::from("Referer"), self.settings.referer.clone());
        }
        StreamSource {
            is_m3u8: link.hls || link.link.contains(".m3u8"),
            quality_rank: quality_rank(&quality),
            url: link.link,
            quality,
            headers,
        }
    }
}

#[async_trait]
impl StreamResolver for AllAnimeResolver {
    fn name(&self) -> &str {
        "allanime"
    }

    fn label(&self) -> &str {
        "AllAnime"
    }

    async fn search_shows(&self, query: &str, translation: Translation) -> Result<Vec<ShowInfo>> {
        let payload: SearchPayload = self
            .graphql(
                SEARCH_SHOWS_QUERY,
                json!({
                    "search": {
                        "allowAdult": false,
                        "allowUnknown": false,
                        "query": query,
                    },
                    "limit": SEARCH_LIMIT,
                    "page": 1,
                    "translationType": translation.as_str(),
                    "countryOrigin": "ALL"
                }),
            )
            .await?;
        Ok(payload
            .shows
            .edges
            .into_iter()
            .map(|edge| ShowInfo {
                id: edge.id,
                title: edge.name,
                available_eps: EpisodeCounts {
                    sub: edge.available_episodes.sub,
                    dub: edge.available_episodes.dub,
                },
            })
            .collect())
    }

    async fn fetch_episodes(&self, show_id: &str, translation: Translation) -> Result<Vec<String>> {
        let payload: ShowDetailPayload = self
            .graphql(SHOW_DETAIL_QUERY, json!({ "showId": show_id }))
            .await?;
        let detail = payload
            .show
            .ok_or_else(|| Error::NotFound(format!("show {show_id}")))?
            .available_episodes_detail;
        Ok(match translation {
            Translation::Sub => detail.sub,
            Translation::Dub => detail.dub,
        })
    }

    async fn fetch_streams(
        &self,
        show_id: &str,
        translation: Translation,
        episode: &str,
        cancel: &CancellationToken,
    ) -> Result<EpisodeStreams> {
        let sources = self.episode_sources(show_id, translation, episode).await?;
        let candidates = self.server_candidates(&sources);
        if candidates.is_empty() {
            tracing::debug!(show_id, episode, "no preferred server offered");
            return Ok(EpisodeStreams::default());
        }

        let mut sequencer = Sequencer::new(candidates, self.attempt_timeout);
        let outcome = sequencer
            .run(cancel, |_, candidate| {
                let url = candidate.url.clone();
                async move { self.fetch_clock(&url).await }
            })
            .await;

        match outcome {
            SequenceOutcome::Succeeded {
                candidate, value, ..
            } => Ok(self.build_streams(&candidate.label, value)),
            SequenceOutcome::Exhausted => Err(Error::Exhausted {
                attempts: sequencer.retry_count(),
            }
            .into()),
            SequenceOutcome::Aborted => {
                Err(Error::Network(String::from("stream lookup cancelled")).into())
            }
        }
    }
}

fn quality_rank(label: &str) -> i32 {
    if label.eq_ignore_ascii_case("auto") {
        return 10_000;
    }
    label.trim_end_matches('p').parse::<i32>().unwrap_or(0)
}

/// Decodes AllAnime's `--`-prefixed source paths: hex bytes XORed with a
/// fixed key. `None` for anything that does not decode to printable ASCII.
pub fn decode_provider_path(raw: &str) -> Option<String> {
    let hex = raw.strip_prefix("--")?;
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let mut decoded = String::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).ok()?;
        let byte = u8::from_str_radix(pair, 16).ok()? ^ PATH_KEY;
        if !byte.is_ascii_graphic() {
            return None;
        }
        decoded.push(char::from(byte));
    }
    if decoded.contains("/clock") && !decoded.contains("/clock.json") {
        decoded = decoded.replacen("/clock", "/clock.json", 1);
    }
    Some(decoded)
}

// --- GraphQL Structs ---

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    shows: SearchShows,
}

#[derive(Debug, Deserialize)]
struct SearchShows {
    #[serde(default)]
    edges: Vec<SearchEdge>,
}

#[derive(Debug, Deserialize)]
struct SearchEdge {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(rename = "availableEpisodes", default)]
    available_episodes: AvailabilitySnapshot,
}

#[derive(Debug, Deserialize, Default)]
struct AvailabilitySnapshot {
    #[serde(default)]
    sub: usize,
    #[serde(default)]
    dub: usize,
}

#[derive(Debug, Deserialize)]
struct ShowDetailPayload {
    show: Option<ShowDetail>,
}

#[derive(Debug, Deserialize)]
struct ShowDetail {
    #[serde(rename = "availableEpisodesDetail", default)]
    available_episodes_detail: EpisodeDetail,
}

#[derive(Debug, Deserialize, Default)]
struct EpisodeDetail {
    #[serde(default)]
    sub: Vec<String>,
    #[serde(default)]
    dub: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodePayload {
    episode: Option<EpisodeSources>,
}

#[derive(Debug, Deserialize)]
struct EpisodeSources {
    #[serde(rename = "sourceUrls", default)]
    source_urls: Vec<SourceDescriptor>,
}

#[derive(Debug, Deserialize)]
struct SourceDescriptor {
    #[serde(rename = "sourceUrl")]
    source_url: String,
    #[serde(rename = "sourceName")]
    source_name: String,
}

#[derive(Debug, Deserialize)]
struct ClockResponse {
    #[serde(default)]
    links: Vec<ClockLink>,
}

#[derive(Debug, Deserialize)]
struct ClockLink {
    link: String,
    #[serde(rename = "resolutionStr", default)]
    resolution: Option<String>,
    #[serde(default)]
    hls: bool,
    #[serde(default)]
    subtitles: Vec<ClockSubtitle>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ClockSubtitle {
    src: String,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    label: Option<String>,
}

impl ClockSubtitle {
    fn is_english(&self) -> bool {
        self.lang.as_deref() == Some("en") || self.label.as_deref() == Some("English")
    }
}

// --- Queries ---

const SEARCH_SHOWS_QUERY: &str = r#"query($search: SearchInput, $limit: Int, $page: Int, $translationType: VaildTranslationTypeEnumType, $countryOrigin: VaildCountryOriginEnumType) {
  shows(search: $search, limit: $limit, page: $page, translationType: $translationType, countryOrigin: $countryOrigin) {
    edges {
      _id
      name
      availableEpisodes
    }
  }
}"#;

const SHOW_DETAIL_QUERY: &str = r#"query($showId: String!) {
  show(_id: $showId) {
    _id
    availableEpisodesDetail
  }
}"#;

const EPISODE_SOURCES_QUERY: &str = r#"query($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) {
  episode(showId: $showId, translationType: $translationType, episodeString: $episodeString) {
    episodeString
    sourceUrls
  }
}"#;
