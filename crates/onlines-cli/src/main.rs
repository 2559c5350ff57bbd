//! Command-line host for the site adapters
//!
//! `onlines index` runs a catalog request, `onlines play` resolves a
//! deferred locator. Adapter settings come from an optional JSON file:
//!
//! ```json
//! { "mode": { "constrained": false, "shared": true },
//!   "adapters": { "uakino": { "apn": true, "cache_time": 5 } } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use onlines_core::pipeline::{Adapter, Outcome, PlayLink};
use onlines_core::{
    AdapterConfig, AshdiBase, Bamboo, HostSettings, HttpClient, LocalStreamProxy, Mikai, Query,
    SerialKind, SiteRules, StarLight, TieredCache, UAKino,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "onlines", version, about = "Ukrainian streaming site adapters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Site to query
    #[arg(long, value_enum, global = true, default_value = "uakino")]
    site: Site,

    /// Host config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Public base of a reverse-stream proxy (`{base}/proxy/…`)
    #[arg(long, global = true)]
    stream_proxy: Option<String>,

    /// Print structured JSON instead of a plain listing
    #[arg(long, global = true)]
    rjson: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search and list seasons, episodes or movie sources
    Index(IndexArgs),

    /// Resolve a `call` locator into a playable stream
    Play {
        /// Locator from an index listing
        #[arg(long)]
        url: String,

        /// Provider name, for sites that decide by provider
        #[arg(long)]
        provider: Option<String>,

        /// Title shown in the player
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Args)]
struct IndexArgs {
    #[arg(long)]
    imdb_id: Option<String>,

    #[arg(long)]
    kinopoisk_id: Option<u64>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    original_title: Option<String>,

    #[arg(long)]
    year: Option<u32>,

    /// 0 = movie, 1 = series, -1 = decide from upstream
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    serial: i32,

    /// Season number
    #[arg(short = 's', long = "season")]
    season: Option<u32>,

    /// Voice name
    #[arg(short = 't', long = "voice")]
    voice: Option<String>,

    /// Skip the search and open this locator
    #[arg(long)]
    href: Option<String>,
}

impl IndexArgs {
    fn to_query(&self) -> Query {
        Query {
            imdb_id: self.imdb_id.clone(),
            kinopoisk_id: self.kinopoisk_id,
            title: self.title.clone(),
            original_title: self.original_title.clone(),
            year: self.year,
            serial: SerialKind::from_flag(self.serial),
            season: self.season,
            voice: self.voice.clone(),
            href: self.href.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Site {
    Starlight,
    Bamboo,
    Uakino,
    Mikai,
    Ashdi,
}

/// Config file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HostConfig {
    mode: HostSettings,
    adapters: HashMap<String, Value>,
}

impl HostConfig {
    fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }

    fn adapter_config(&self, defaults: AdapterConfig) -> onlines_core::Result<AdapterConfig> {
        let surface = self.adapters.get(&defaults.name).cloned().unwrap_or(Value::Null);
        AdapterConfig::from_surface(defaults, &surface)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let host = HostConfig::load(cli.config.as_deref())?;

    match cli.site {
        Site::Starlight => run(StarLight::new(), &cli, &host).await,
        Site::Bamboo => run(Bamboo::new(), &cli, &host).await,
        Site::Uakino => run(UAKino::new(), &cli, &host).await,
        Site::Mikai => run(Mikai::new(), &cli, &host).await,
        Site::Ashdi => run(AshdiBase::new(), &cli, &host).await,
    }
}

async fn run<R: SiteRules>(rules: R, cli: &Cli, host: &HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = host.adapter_config(rules.descriptor().default_config())?;
    let mut adapter = Adapter::new(
        rules,
        config,
        host.mode,
        Arc::new(TieredCache::new()),
        Arc::new(HttpClient::new()?),
    );
    if let Some(base) = cli.stream_proxy.as_deref() {
        adapter = adapter.with_stream_proxy(Arc::new(LocalStreamProxy::new(base)));
    }

    match &cli.command {
        Commands::Index(args) => {
            let outcome = adapter.index(&args.to_query()).await;
            if cli.rjson {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(adapter.config().display_name.as_str(), &outcome);
            }
        }
        Commands::Play { url, provider, title } => {
            let Some(stream) = adapter.play(url, provider.as_deref(), title.as_deref()).await else {
                return Err(format!("{}: stream unavailable", adapter.config().display_name).into());
            };
            if cli.rjson {
                let body = json!({
                    "method": "play",
                    "url": stream.primary_url,
                    "title": stream.display_name.clone().unwrap_or_default(),
                    "quality": stream.alternate_qualities,
                    "subtitles": stream.subtitles,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                println!("{}", stream.primary_url);
                for quality in &stream.alternate_qualities {
                    println!("  {:>8}  {}", quality.quality, quality.url);
                }
            }
        }
    }
    Ok(())
}

fn print_outcome(site: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Disabled => println!("{} is disabled", site),
        Outcome::Unavailable => println!("{}: source unavailable", site),
        Outcome::Similar(results) => {
            for result in results {
                println!("{}  {}", result.title, result.url);
            }
        }
        Outcome::Seasons(seasons) => {
            for season in seasons {
                println!("[{}] {}", season.number, season.title);
            }
        }
        Outcome::Episodes {
            voices,
            season,
            episodes,
        } => {
            for voice in voices {
                let marker = if voice.selected { "*" } else { " " };
                println!("{} {}", marker, voice.name);
            }
            for episode in episodes {
                println!("S{:02}E{:02}  {}  {}", season, episode.number, episode.title, describe(&episode.link));
            }
        }
        Outcome::Movie(entries) => {
            for entry in entries {
                println!("{}  {}", entry.name, describe(&entry.link));
            }
        }
    }
}

fn describe(link: &PlayLink) -> String {
    match link {
        PlayLink::Direct(url) => url.clone(),
        PlayLink::Call(locator) => format!("(play) {}", locator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_args_to_query() {
        let cli = Cli::try_parse_from([
            "onlines", "--site", "mikai", "index", "--title", "Магічна битва", "--serial", "1", "-s", "2", "-t",
            "FanVoxUA",
        ])
        .unwrap();
        assert_eq!(cli.site, Site::Mikai);

        let Commands::Index(args) = &cli.command else {
            panic!("Expected index command");
        };
        let query = args.to_query();
        assert_eq!(query.serial, SerialKind::Series);
        assert_eq!(query.season, Some(2));
        assert_eq!(query.voice.as_deref(), Some("FanVoxUA"));
    }

    #[test]
    fn test_negative_serial_flag() {
        let cli = Cli::try_parse_from(["onlines", "index", "--serial", "-1", "--href", "https://x"]).unwrap();
        let Commands::Index(args) = &cli.command else {
            panic!("Expected index command");
        };
        assert_eq!(args.to_query().serial, SerialKind::Unknown);
        assert_eq!(cli.site, Site::Uakino);
    }

    #[test]
    fn test_host_config_surface() {
        let host: HostConfig = serde_json::from_str(
            r#"{"mode": {"shared": true}, "adapters": {"uakino": {"enabled": false}}}"#,
        )
        .unwrap();
        assert!(host.mode.shared);

        let config = host
            .adapter_config(UAKino::new().descriptor().default_config())
            .unwrap();
        assert!(!config.enabled);

        let untouched = host
            .adapter_config(Mikai::new().descriptor().default_config())
            .unwrap();
        assert!(untouched.enabled);
    }
}
