//! Embed-provider catalogue: named, ordered lists of URL templates for
//! third-party player pages.
//!
//! Templates use `{id}`, `{episode}` and `{slug}` placeholders. A template
//! that cannot be rendered is skipped rather than guessed at; a provider with
//! no renderable template is reported as unsupported.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use url::Url;

use crate::config::TemplateSetting;
use crate::error::Error;
use crate::sequencer::SourceCandidate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    pub label: String,
    pub pattern: String,
}

impl UrlTemplate {
    pub fn new(label: &str, pattern: &str) -> Self {
        Self {
            label: label.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Values a template may reference.
#[derive(Debug, Clone, Default)]
pub struct EpisodeRef<'a> {
    pub id: Option<&'a str>,
    pub title: &'a str,
    pub episode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("no value for {{{0}}}")]
    MissingValue(&'static str),
    #[error("unbalanced braces")]
    Unbalanced,
    #[error("rendered URL is not http(s): {0}")]
    InvalidUrl(String),
}

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercased title with every non-alphanumeric run collapsed to `-`.
pub fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    NON_ALNUM
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn render_template(pattern: &str, episode: &EpisodeRef<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or(TemplateError::Unbalanced)?;
        let name = &after[..close];
        let value = match name {
            "episode" => episode.episode.to_string(),
            "id" => encode(
                episode
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(TemplateError::MissingValue("id"))?,
            ),
            "slug" => {
                let slug = slugify(episode.title);
                if slug.is_empty() {
                    return Err(TemplateError::MissingValue("slug"));
                }
                slug
            }
            other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(TemplateError::Unbalanced);
    }
    out.push_str(rest);

    match Url::parse(&out) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url.to_string()),
        _ => Err(TemplateError::InvalidUrl(out)),
    }
}

#[derive(Debug, Clone)]
pub struct EmbedCatalog {
    providers: BTreeMap<String, Vec<UrlTemplate>>,
}

impl Default for EmbedCatalog {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            String::from("vidrock"),
            vec![
                UrlTemplate::new("VidRock", "https://vidrock.net/embed/{id}-episode-{episode}"),
                UrlTemplate::new(
                    "GogoAnime",
                    "https://gogoanime.lu/streaming.php?id={id}-episode-{episode}",
                ),
                UrlTemplate::new("MP4Upload", "https://www.mp4upload.com/embed-{id}{episode}.html"),
            ],
        );
        providers.insert(
            String::from("gogoanime"),
            vec![
                UrlTemplate::new(
                    "GogoAnime",
                    "https://gogoanime.lu/streaming.php?id={slug}-episode-{episode}",
                ),
                UrlTemplate::new(
                    "GogoPlay",
                    "https://gogoplay.io/streaming.php?id={slug}-episode-{episode}",
                ),
                UrlTemplate::new(
                    "Embtaku",
                    "https://embtaku.pro/streaming.php?id={slug}-episode-{episode}",
                ),
                UrlTemplate::new("MP4Upload", "https://www.mp4upload.com/embed-{id}{episode}.html"),
            ],
        );
        providers.insert(
            String::from("zoro"),
            vec![
                UrlTemplate::new("Aniwatch", "https://aniwatch.to/watch/{id}?ep={episode}"),
                UrlTemplate::new("Zoro", "https://zoro.to/watch/{id}?ep={episode}"),
                UrlTemplate::new("HiAnime", "https://hianime.to/watch/{id}?ep={episode}"),
            ],
        );
        providers.insert(
            String::from("pahe"),
            vec![
                UrlTemplate::new("AnimePahe", "https://animepahe.ru/play/{id}/{episode}"),
                UrlTemplate::new("Pahe", "https://pahe.win/play/{id}/{episode}"),
                UrlTemplate::new("Kwik", "https://kwik.si/e/{id}{episode}"),
                UrlTemplate::new("AnimePahe (com)", "https://animepahe.com/play/{id}/{episode}"),
            ],
        );
        Self { providers }
    }
}

impl EmbedCatalog {
    /// Built-in providers with configured entries layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<TemplateSetting>>) -> Self {
        let mut catalog = Self::default();
        for (name, templates) in overrides {
            let templates = templates
                .iter()
                .map(|t| UrlTemplate::new(&t.label, &t.url))
                .collect();
            catalog.providers.insert(name.to_ascii_lowercase(), templates);
        }
        catalog
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Renders the provider's templates in priority order, skipping any that
    /// cannot be built for this episode.
    pub fn candidates(
        &self,
        provider: &str,
        episode: &EpisodeRef<'_>,
    ) -> Result<Vec<SourceCandidate>, Error> {
        let templates = self
            .providers
            .get(provider)
            .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))?;

        let candidates: Vec<SourceCandidate> = templates
            .iter()
            .filter_map(|template| match render_template(&template.pattern, episode) {
                Ok(url) => Some(SourceCandidate::new(template.label.clone(), url)),
                Err(err) => {
                    tracing::debug!(provider, label = %template.label, error = %err, "skipping template");
                    None
                }
            })
            .collect();

        if candidates.is_empty() {
            return Err(Error::UnsupportedProvider(format!(
                "{provider}: no source could be built for this episode"
            )));
        }
        Ok(candidates)
    }
}
