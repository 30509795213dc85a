//! Layered settings: built-in defaults, an optional TOML file, then
//! `ANISTREAM_<SECTION>__<KEY>` environment variables.

use anyhow::{Context, Result, anyhow};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

pub const ENV_PREFIX: &str = "ANISTREAM";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub anilist: AniListSettings,
    pub playback: PlaybackSettings,
    pub allanime: AllAnimeSettings,
    /// Embed catalogue overrides, keyed by provider name. Entries here
    /// replace the built-in provider with the same name.
    pub providers: BTreeMap<String, Vec<TemplateSetting>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AniListSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for AniListSettings {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://graphql.anilist.co"),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Per-candidate budget for player documents and AllAnime servers.
    pub attempt_timeout_ms: u64,
    /// Per-resolver budget for the resolver chain behind `/api/sources`.
    pub resolve_timeout_ms: u64,
    pub ad_selectors: Vec<String>,
    pub sandbox: Vec<String>,
    pub allow_popups: bool,
}

impl PlaybackSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 8_000,
            resolve_timeout_ms: 30_000,
            ad_selectors: [
                "[class*=\"ad-\"]",
                "[id*=\"ad-\"]",
                "[class*=\"ads-\"]",
                "[id*=\"ads-\"]",
                "[class*=\"banner\"]",
                "[class*=\"popup\"]",
                "[id*=\"popup\"]",
                "[class*=\"sponsor\"]",
                "[data-ad]",
                "[data-ad-slot]",
                "ins",
                ".adsbygoogle",
                ".ad-container",
                ".advertisement",
                "iframe[src*=\"doubleclick\"]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sandbox: [
                "allow-scripts",
                "allow-same-origin",
                "allow-presentation",
                "allow-forms",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allow_popups: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllAnimeSettings {
    pub enabled: bool,
    pub api_url: String,
    pub base_url: String,
    pub referer: String,
    pub preferred_servers: Vec<String>,
}

impl Default for AllAnimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: String::from("https://api.allanime.day/api"),
            base_url: String::from("https://allanime.day"),
            referer: String::from("https://allmanga.to"),
            preferred_servers: ["Default", "S-mp4", "Luf-Mp4", "Yt-mp4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSetting {
    pub label: String,
    pub url: String,
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join("anistream").join("config.toml"))
}

/// Loads settings. An explicit path must exist; the default path is optional.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    let mut builder = config::Config::builder();
    match explicit {
        Some(path) => {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        None => {
            if let Ok(path) = default_config_path() {
                builder = builder.add_source(config::File::from(path.as_path()).required(false));
            }
        }
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("failed to parse configuration")?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.playback.attempt_timeout_ms == 0 {
            return Err(anyhow!("playback.attempt_timeout_ms must be positive"));
        }
        if self.playback.resolve_timeout_ms == 0 {
            return Err(anyhow!("playback.resolve_timeout_ms must be positive"));
        }
        for (name, templates) in &self.providers {
            if templates.is_empty() {
                return Err(anyhow!("provider '{name}' has no templates"));
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("anistream-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn file_overrides_defaults() {
        let path = temp_config(
            "override.toml",
            r#"
[server]
port = 8088

[playback]
attempt_timeout_ms = 2500

[[providers.kwik]]
label = "Kwik"
url = "https://kwik.example/e/{id}/{episode}"
"#,
        );
        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.playback.attempt_timeout(), Duration::from_millis(2500));
        assert_eq!(settings.providers["kwik"][0].label, "Kwik");
        assert!(!settings.playback.ad_selectors.is_empty());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let path = temp_config(
            "zero.toml",
            "[playback]\nattempt_timeout_ms = 0\n",
        );
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("anistream-does-not-exist.toml");
        assert!(load(Some(&path)).is_err());
    }

    #[test]
    fn renders_as_toml() {
        let rendered = Settings::default().to_toml().unwrap();
        assert!(rendered.contains("[server]"));
        assert!(rendered.contains("attempt_timeout_ms = 8000"));
    }
}
