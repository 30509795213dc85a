//! Anime browsing and playback server: AniList metadata, sandboxed
//! multi-provider player documents and a native AllAnime stream resolver.

pub mod anilist;
pub mod config;
pub mod error;
pub mod providers;
pub mod sequencer;
pub mod server;
pub mod surface;
pub mod types;
