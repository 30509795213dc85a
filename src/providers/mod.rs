use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::types::{EpisodeStreams, ShowInfo, Translation};

pub mod allanime;
pub mod embed;

/// Resolves a title and episode to playable streams.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Route-safe identifier, e.g. `allanime`.
    fn name(&self) -> &str;

    fn label(&self) -> &str;

    async fn search_shows(&self, query: &str, translation: Translation) -> Result<Vec<ShowInfo>>;

    async fn fetch_episodes(&self, show_id: &str, translation: Translation) -> Result<Vec<String>>;

    async fn fetch_streams(
        &self,
        show_id: &str,
        translation: Translation,
        episode: &str,
        cancel: &CancellationToken,
    ) -> Result<EpisodeStreams>;
}

/// Finds the show (by resolver id, or by best title match) and fetches the
/// streams for `episode`.
pub async fn resolve_episode(
    resolver: &dyn StreamResolver,
    title: &str,
    show_id: Option<&str>,
    episode: u32,
    translation: Translation,
    cancel: &CancellationToken,
) -> Result<EpisodeStreams> {
    let show_id = match show_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id.to_string(),
        None => {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput(String::from("missing anime title")).into());
            }
            let shows = resolver.search_shows(title, translation).await?;
            let show = pick_show(shows, translation, episode).ok_or_else(|| {
                Error::NotFound(format!(
                    "no {} results for \"{title}\" on {}",
                    translation.label(),
                    resolver.label()
                ))
            })?;
            tracing::debug!(resolver = resolver.name(), show = %show.title, "matched show");
            show.id
        }
    };

    let label = episode.to_string();
    let episodes = resolver.fetch_episodes(&show_id, translation).await?;
    if !episodes.iter().any(|ep| ep == &label) {
        return Err(Error::NotFound(format!("episode {episode} not found")).into());
    }

    let streams = resolver
        .fetch_streams(&show_id, translation, &label, cancel)
        .await?;
    if streams.sources.is_empty() {
        return Err(Error::NotFound(String::from(
            "no streaming sources available for this episode",
        ))
        .into());
    }
    Ok(streams)
}

/// First search hit that carries `episode` in `translation`, else the first
/// hit at all.
fn pick_show(shows: Vec<ShowInfo>, translation: Translation, episode: u32) -> Option<ShowInfo> {
    let wanted = usize::try_from(episode).unwrap_or(usize::MAX);
    let covering = shows
        .iter()
        .position(|show| show.available_eps.get(translation) >= wanted);
    shows.into_iter().nth(covering.unwrap_or(0))
}
