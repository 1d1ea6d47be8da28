//! Command-line interface parsing for pollencast
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into a validated [`StartupConfig`]. TTL overrides are given as repeated
//! `--ttl category=seconds` flags.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::{CacheConfig, ConfigError, DataCategory};
use crate::data::get_location_by_key;

/// pollencast - cached weather and pollen data with correlation insights
#[derive(Parser, Debug)]
#[command(name = "pollencast")]
#[command(about = "Weather and pollen data with a stale-tolerant cache and correlation insights")]
#[command(version)]
pub struct Cli {
    /// Directory for the on-disk cache layer (defaults to the user cache dir)
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Keep the cache in memory only, without the on-disk layer
    #[arg(long, global = true, conflicts_with = "cache_dir")]
    pub memory_only: bool,

    /// Override a category TTL, e.g. --ttl pollen=7200 (repeatable)
    #[arg(long = "ttl", value_name = "CATEGORY=SECS", global = true)]
    pub ttl: Vec<String>,

    /// Number of warming records kept in history
    #[arg(long, value_name = "N", global = true)]
    pub history_limit: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch one category for a location through the cache
    ///
    /// Examples:
    ///   pollencast fetch weather us:ny:nyc
    ///   pollencast fetch pollen gb:eng:london
    Fetch {
        /// Data category: weather or pollen
        category: String,
        /// Location key, e.g. us:ny:nyc
        location: String,
    },
    /// Correlate weather factors with pollen levels for a location
    Correlate {
        /// Location key, e.g. gb:eng:london
        location: String,
        /// Maximum number of insights to print
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Pre-populate the cache for popular locations
    Warm,
    /// Show cache statistics
    Stats,
    /// Remove expired cache entries
    Cleanup,
    /// List known locations
    Locations,
    /// Warm the cache, then sweep expired entries until Ctrl-C
    Run {
        /// Seconds between cleanup sweeps
        #[arg(long, value_name = "SECS", default_value_t = 300)]
        cleanup_interval: u64,
    },
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// Validated cache configuration
    pub cache: CacheConfig,
    /// Skip the on-disk layer
    pub memory_only: bool,
    /// Default log filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            memory_only: false,
            log_filter: log_filter_for(0),
        }
    }
}

/// Parses a category argument into a DataCategory.
///
/// # Returns
/// * `Ok(DataCategory)` if the name matches a known category
/// * `Err(ConfigError::UnknownCategory)` otherwise
pub fn parse_category_arg(s: &str) -> Result<DataCategory, ConfigError> {
    s.parse()
}

/// Checks that a location key is in the known-location table
pub fn parse_location_arg(s: &str) -> Result<&'static str, String> {
    get_location_by_key(s)
        .map(|location| location.key)
        .ok_or_else(|| format!("Unknown location: '{}'. Run `pollencast locations` to list them", s))
}

/// Default `tracing` filter for a `-v` count
pub fn log_filter_for(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("pollencast={}", level)
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// TTL overrides apply in order, so a later flag for the same category
    /// wins. The result is validated before it is returned.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut cache = CacheConfig::default();
        for ttl_override in &cli.ttl {
            cache.ttl.apply_override(ttl_override)?;
        }
        if let Some(limit) = cli.history_limit {
            cache.history_limit = limit;
        }
        cache.cache_dir = cli.cache_dir.clone();
        cache.validate()?;

        Ok(StartupConfig {
            cache,
            memory_only: cli.memory_only,
            log_filter: log_filter_for(cli.verbose),
        })
    }
}
