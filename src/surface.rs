//! Playback surface: the HTML document that hosts a player, the sanitizer that
//! strips ad overlays from it, and the sandbox policy applied to embedded
//! third-party frames.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, header};
use scraper::Selector;
use serde::Serialize;

use crate::config::PlaybackSettings;
use crate::sequencer::SourceCandidate;

pub const EXHAUSTED_MESSAGE: &str = "Unable to load stream. Please try another provider.";

const HLS_SCRIPT: &str = "https://cdn.jsdelivr.net/npm/hls.js@1";

/// Sandbox tokens a frame may be granted. Anything else in configuration is
/// dropped.
const KNOWN_SANDBOX_TOKENS: &[&str] = &[
    "allow-scripts",
    "allow-same-origin",
    "allow-presentation",
    "allow-forms",
    "allow-modals",
    "allow-orientation-lock",
    "allow-pointer-lock",
];

/// Removes elements matching a selector list from a rendered document.
#[derive(Debug, Clone)]
pub struct SurfaceSanitizer {
    selectors: Vec<String>,
}

impl SurfaceSanitizer {
    /// Keeps only selectors that parse as CSS.
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selectors = selectors
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() {
                    return None;
                }
                match Selector::parse(raw) {
                    Ok(_) => Some(raw.to_string()),
                    Err(err) => {
                        tracing::warn!(selector = raw, error = ?err, "dropping invalid ad selector");
                        None
                    }
                }
            })
            .collect();
        Self { selectors }
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    /// Stylesheet hiding every match except the surface's own elements.
    pub fn stylesheet(&self) -> String {
        if self.selectors.is_empty() {
            return String::new();
        }
        let guarded: Vec<String> = self
            .selectors
            .iter()
            .map(|s| format!("{s}:not([data-surface])"))
            .collect();
        format!(
            "{} {{ display: none !important; visibility: hidden !important; pointer-events: none !important; }}",
            guarded.join(",\n")
        )
    }

    /// Script that sweeps matches once and again on every DOM mutation.
    pub fn script(&self) -> String {
        if self.selectors.is_empty() {
            return String::new();
        }
        let list = script_json(&self.selectors.join(","));
        format!(
            r#"(function () {{
  'use strict';
  var selector = {list};
  function sweep() {{
    document.querySelectorAll(selector).forEach(function (el) {{
      if (el.hasAttribute('data-surface') || el.querySelector('[data-surface]')) return;
      el.remove();
    }});
  }}
  sweep();
  new MutationObserver(sweep).observe(document.body, {{ childList: true, subtree: true }});
}})();"#
        )
    }
}

/// Capability set granted to an embedded third-party frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    tokens: Vec<String>,
    allow_popups: bool,
}

impl SandboxPolicy {
    pub fn new<I, S>(tokens: I, allow_popups: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept: Vec<String> = Vec::new();
        for token in tokens {
            let token = token.as_ref().trim().to_ascii_lowercase();
            if !KNOWN_SANDBOX_TOKENS.contains(&token.as_str()) {
                tracing::warn!(token = %token, "ignoring unknown sandbox capability");
                continue;
            }
            if !kept.contains(&token) {
                kept.push(token);
            }
        }
        Self {
            tokens: kept,
            allow_popups,
        }
    }

    pub fn sandbox_attribute(&self) -> String {
        let mut tokens = self.tokens.clone();
        if self.allow_popups {
            tokens.push(String::from("allow-popups"));
        }
        tokens.join(" ")
    }

    pub fn allow_attribute(&self) -> &'static str {
        "autoplay; fullscreen; encrypted-media; picture-in-picture"
    }

    /// Headers that keep the player document itself from being framed by
    /// other origins.
    pub fn response_headers(&self) -> [(HeaderName, HeaderValue); 3] {
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_static("frame-ancestors 'self'"),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceMode {
    /// Candidates are third-party embed pages loaded into a sandboxed iframe.
    Embed,
    /// Candidates are `/api/sources` endpoints whose streams play in `<video>`.
    Stream,
}

#[derive(Debug, Clone)]
pub struct PlayerDocument<'a> {
    pub title: &'a str,
    pub episode: u32,
    pub provider: &'a str,
    pub mode: SurfaceMode,
    pub candidates: &'a [SourceCandidate],
    pub attempt_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DriverConfig<'a> {
    mode: SurfaceMode,
    candidates: &'a [SourceCandidate],
    attempt_timeout_ms: u64,
    exhausted_message: &'a str,
}

/// Sanitizer plus sandbox, applied once to every rendered player document.
#[derive(Debug, Clone)]
pub struct PlaybackSurface {
    pub sanitizer: SurfaceSanitizer,
    pub sandbox: SandboxPolicy,
}

impl PlaybackSurface {
    pub fn from_settings(settings: &PlaybackSettings) -> Self {
        Self {
            sanitizer: SurfaceSanitizer::new(&settings.ad_selectors),
            sandbox: SandboxPolicy::new(&settings.sandbox, settings.allow_popups),
        }
    }

    pub fn render(&self, doc: &PlayerDocument<'_>) -> String {
        let config = DriverConfig {
            mode: doc.mode,
            candidates: doc.candidates,
            attempt_timeout_ms: doc.attempt_timeout.as_millis() as u64,
            exhausted_message: EXHAUSTED_MESSAGE,
        };
        let config_json = serde_json::to_string(&config)
            .map(|json| json.replace('<', "\\u003c"))
            .unwrap_or_else(|_| String::from("{\"candidates\":[]}"));

        let player = match doc.mode {
            SurfaceMode::Embed => format!(
                r#"<iframe id="player" data-surface allow="{}" allowfullscreen sandbox="{}" referrerpolicy="no-referrer"></iframe>"#,
                self.sandbox.allow_attribute(),
                self.sandbox.sandbox_attribute()
            ),
            SurfaceMode::Stream => String::from(
                r#"<video id="player" data-surface controls playsinline></video>"#,
            ),
        };
        let hls = match doc.mode {
            SurfaceMode::Stream => format!(r#"<script src="{HLS_SCRIPT}"></script>"#),
            SurfaceMode::Embed => String::new(),
        };

        let mut html = String::with_capacity(8 * 1024);
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("<meta charset=\"UTF-8\">\n");
        html.push_str(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str(&format!(
            "<title>{} - Episode {} - {}</title>\n",
            escape_html(doc.title),
            doc.episode,
            escape_html(doc.provider)
        ));
        html.push_str("<style>\n");
        html.push_str(PLAYER_CSS);
        html.push('\n');
        html.push_str(&self.sanitizer.stylesheet());
        html.push_str("\n</style>\n</head>\n<body>\n");
        html.push_str("<div id=\"player-container\" data-surface>\n");
        html.push_str(&format!(
            "<div class=\"loading\" id=\"loading\" data-surface><div class=\"spinner\" data-surface></div><div data-surface>Loading Episode {}...</div><div class=\"source-info\" id=\"source-info\" data-surface></div></div>\n",
            doc.episode
        ));
        html.push_str(&player);
        html.push_str("\n</div>\n");
        html.push_str(&format!(
            "<script type=\"application/json\" id=\"player-config\">{config_json}</script>\n"
        ));
        html.push_str(&hls);
        html.push_str("\n<script>\n");
        html.push_str(DRIVER_JS);
        html.push_str("\n</script>\n<script>\n");
        html.push_str(&self.sanitizer.script());
        html.push_str("\n</script>\n</body>\n</html>\n");
        html
    }

    /// Static document for outcomes decided before any candidate exists.
    pub fn render_message(&self, title: &str, message: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n<title>{}</title>\n<style>\n{}\n</style>\n</head>\n<body>\n<div class=\"loading\"><div class=\"error\">{}</div></div>\n</body>\n</html>\n",
            escape_html(title),
            PLAYER_CSS,
            escape_html(message)
        )
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// JSON string literal that is safe inside a `<script>` element.
fn script_json(value: &str) -> String {
    serde_json::to_string(value)
        .map(|json| json.replace('<', "\\u003c"))
        .unwrap_or_else(|_| String::from("\"\""))
}

const PLAYER_CSS: &str = r#"* { margin: 0; padding: 0; box-sizing: border-box; }
body, html { width: 100%; height: 100%; overflow: hidden; background: #000; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; }
#player-container { width: 100%; height: 100%; position: relative; }
#player { width: 100%; height: 100%; border: none; background: #000; }
.loading { position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%); color: #a78bfa; font-size: 16px; text-align: center; z-index: 100; }
.spinner { border: 3px solid rgba(167, 139, 250, 0.2); border-radius: 50%; border-top: 3px solid #a78bfa; width: 40px; height: 40px; animation: spin 1s linear infinite; margin: 0 auto 16px; }
@keyframes spin { to { transform: rotate(360deg); } }
.source-info { margin-top: 10px; font-size: 12px; color: #888; }
.error { color: #fb7185; padding: 20px; text-align: center; }"#;

// Browser half of the fallback sequencer: same states, same ordering rules as
// `sequencer::Sequencer`. Late signals from a superseded attempt are ignored.
const DRIVER_JS: &str = r#"(function () {
  'use strict';
  var cfg = JSON.parse(document.getElementById('player-config').textContent);
  var loading = document.getElementById('loading');
  var info = document.getElementById('source-info');
  var player = document.getElementById('player');
  var cursor = -1;
  var finished = false;
  var timer = null;
  var hls = null;
  var request = null;

  function status(text) { if (info) info.textContent = text; }

  function teardown() {
    if (hls) { hls.destroy(); hls = null; }
    if (request) { request.abort(); request = null; }
    player.onload = player.onerror = player.onloadedmetadata = null;
  }

  function exhausted() {
    finished = true;
    teardown();
    if (loading) {
      loading.textContent = '';
      var box = document.createElement('div');
      box.className = 'error';
      box.setAttribute('data-surface', '');
      box.textContent = cfg.exhaustedMessage;
      loading.appendChild(box);
    }
  }

  function succeed(attempt) {
    if (finished || attempt !== cursor) return;
    finished = true;
    clearTimeout(timer);
    if (loading) loading.style.display = 'none';
    status('Playing from ' + cfg.candidates[attempt].label);
  }

  function fail(attempt) {
    if (finished || attempt !== cursor) return;
    next();
  }

  function loadEmbed(attempt, candidate) {
    player.onload = function () { succeed(attempt); };
    player.onerror = function () { fail(attempt); };
    player.src = candidate.url;
  }

  function pickSource(sources) {
    for (var i = 0; i < sources.length; i++) {
      if (sources[i].quality === '1080p' || sources[i].quality === 'default') return sources[i];
    }
    return sources[0];
  }

  function loadStream(attempt, candidate) {
    var controller = window.AbortController ? new AbortController() : null;
    request = controller;
    fetch(candidate.url, {
      headers: { Accept: 'application/json' },
      signal: controller ? controller.signal : undefined
    })
      .then(function (res) { return res.ok ? res.json() : Promise.reject(res.status); })
      .then(function (data) {
        if (finished || attempt !== cursor) return;
        if (request === controller) request = null;
        if (!data.success || !data.sources || data.sources.length === 0) { fail(attempt); return; }
        var source = pickSource(data.sources);
        player.onloadedmetadata = function () {
          succeed(attempt);
          player.play().catch(function () {});
        };
        player.onerror = function () { fail(attempt); };
        while (player.firstChild) player.removeChild(player.firstChild);
        var subtitles = data.subtitles || [];
        // Tracks need CORS; plain cross-origin video does not.
        if (subtitles.length > 0) player.crossOrigin = 'anonymous';
        else player.removeAttribute('crossorigin');
        subtitles.forEach(function (sub, index) {
          var track = document.createElement('track');
          track.kind = 'subtitles';
          track.label = sub.lang || ('Subtitle ' + (index + 1));
          track.srclang = sub.lang || 'en';
          track.src = sub.url;
          if (index === 0) track.default = true;
          player.appendChild(track);
        });
        var hlsStream = source.isM3U8 || source.url.indexOf('.m3u8') !== -1;
        if (hlsStream && window.Hls && window.Hls.isSupported()) {
          hls = new window.Hls();
          hls.on(window.Hls.Events.ERROR, function (_event, detail) {
            if (detail.fatal) fail(attempt);
          });
          hls.loadSource(source.url);
          hls.attachMedia(player);
        } else {
          player.src = source.url;
        }
      })
      .catch(function () { fail(attempt); });
  }

  function next() {
    clearTimeout(timer);
    teardown();
    cursor += 1;
    if (cursor >= cfg.candidates.length) { exhausted(); return; }
    var attempt = cursor;
    var candidate = cfg.candidates[attempt];
    status('Loading from ' + candidate.label + '...');
    timer = setTimeout(function () { fail(attempt); }, cfg.attemptTimeoutMs);
    if (cfg.mode === 'embed') loadEmbed(attempt, candidate);
    else loadStream(attempt, candidate);
  }

  window.addEventListener('pagehide', function () {
    finished = true;
    clearTimeout(timer);
    teardown();
  });

  next();
})();"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> PlaybackSurface {
        PlaybackSurface::from_settings(&PlaybackSettings::default())
    }

    #[test]
    fn sanitizer_drops_invalid_selectors() {
        let sanitizer = SurfaceSanitizer::new([".ad-container", "[[broken", "", "ins"]);
        assert_eq!(sanitizer.selectors(), &[".ad-container", "ins"]);
    }

    #[test]
    fn stylesheet_never_hides_surface_elements() {
        let sanitizer = SurfaceSanitizer::new(["[id*=\"ad\"]"]);
        assert!(
            sanitizer
                .stylesheet()
                .contains("[id*=\"ad\"]:not([data-surface])")
        );
    }

    #[test]
    fn empty_sanitizer_renders_nothing() {
        let sanitizer = SurfaceSanitizer::new(Vec::<String>::new());
        assert!(sanitizer.stylesheet().is_empty());
        assert!(sanitizer.script().is_empty());
    }

    #[test]
    fn sandbox_excludes_popups_by_default() {
        let policy = SandboxPolicy::new(["allow-scripts", "allow-top-navigation", "allow-scripts"], false);
        assert_eq!(policy.sandbox_attribute(), "allow-scripts");
        let with_popups = SandboxPolicy::new(["allow-scripts"], true);
        assert_eq!(with_popups.sandbox_attribute(), "allow-scripts allow-popups");
    }

    #[test]
    fn document_carries_candidates_and_single_sanitizer() {
        let candidates = vec![
            SourceCandidate::new("VidRock", "https://vidrock.example/embed/1-episode-2"),
            SourceCandidate::new("Mirror", "https://mirror.example/e/1/2"),
        ];
        let doc = PlayerDocument {
            title: "Frieren",
            episode: 2,
            provider: "vidrock",
            mode: SurfaceMode::Embed,
            candidates: &candidates,
            attempt_timeout: Duration::from_secs(8),
        };
        let html = surface().render(&doc);
        assert!(html.contains("\"attemptTimeoutMs\":8000"));
        assert!(html.contains("https://mirror.example/e/1/2"));
        assert!(html.contains("sandbox=\"allow-scripts allow-same-origin"));
        assert!(!html.contains("allow-popups"));
        assert_eq!(html.matches("new MutationObserver(sweep)").count(), 1);
        assert!(!html.contains("window.open ="));
        assert!(!html.contains("hls.js"));
    }

    #[test]
    fn document_escapes_untrusted_text() {
        let candidates = vec![SourceCandidate::new(
            "</script><script>alert(1)</script>",
            "https://x.example/",
        )];
        let doc = PlayerDocument {
            title: "<b>bold</b>",
            episode: 1,
            provider: "universal",
            mode: SurfaceMode::Stream,
            candidates: &candidates,
            attempt_timeout: Duration::from_secs(1),
        };
        let html = surface().render(&doc);
        assert!(html.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(!html.contains("</script><script>alert(1)"));
        assert!(html.contains("hls.js"));
        assert!(html.contains("<video id=\"player\" data-surface controls playsinline>"));
        assert!(html.contains("if (subtitles.length > 0) player.crossOrigin = 'anonymous';"));
    }

    #[test]
    fn escape_html_covers_quotes() {
        assert_eq!(escape_html(r#"a"b'c&"#), "a&quot;b&#39;c&amp;");
    }
}
