//! UA Onlines Core Library
//!
//! This crate turns Ukrainian streaming sites into a normalized, playable
//! catalog: search → project → voice/season/episode tree → stream URL.
//!
//! # Features
//! - One generic [`Adapter`] pipeline driven by per-site [`SiteRules`]
//! - Tiered TTL cache keyed by query identity
//! - Voice hierarchy with unique names and inferred episode numbers
//! - Stream routing through an anti-block wrapper or a reverse-stream proxy
//! - Outbound proxy rotation

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod sites;
pub mod types;
pub mod wrapper;

// Re-export main types for convenience
pub use cache::{cache_key, TieredCache, TtlPolicy};
pub use client::{ClientConfig, HttpClient, NoProxy, ProxyProvider, ProxyRotation};
pub use config::{AdapterConfig, HostSettings, ProxySettings};
pub use error::{OnlineError, Result};
pub use normalizer::Hierarchy;
pub use pipeline::{Adapter, EpisodeEntry, MovieEntry, Outcome, PlayLink, SeasonEntry, VoiceEntry};
pub use resolver::{DirectStream, LocalStreamProxy, StreamProxy, StreamResolver};
pub use sites::{AshdiBase, Bamboo, Mikai, SiteRules, StarLight, UAKino};
pub use types::{
    EpisodeInfo, ProjectInfo, QualityStream, Query, SearchResult, SeasonInfo, SerialKind, StreamResult,
    SubtitleInfo, VoiceInfo,
};
pub use wrapper::ApnWrapper;
