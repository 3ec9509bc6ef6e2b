//! Configuration types for logtap.
//!
//! [`Config::load`] layers an optional user file over the embedded defaults.
//! [`Config::defaults`] returns the same defaults without touching the
//! filesystem (useful in tests). Every component takes its own section by
//! value; nothing here is global.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[cache]
max_entries = 10000

[buffer]
max_capacity         = 100000
load_factor          = 0.75
eviction_interval_ms = 1000

[reader]
min_block_size       = 1
max_block_size       = 1000
min_block_time_ms    = 10
max_block_time_ms    = 200
read_timeout_ms      = 200
eof_poll_interval_ms = 100
connect_timeout_ms   = 5000

[publisher]
poll_interval_ms = 20
slow_listener_ms = 100

[connector]
reconnect_delay_ms = 1000

[watchdog]
interval_ms     = 5000
threshold_bytes = 268435456

[timestamp]
format = "%H:%M:%S%.3f"
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from `~/.config/logtap/config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub timestamp: TimestampConfig,
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize { 10_000 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: default_max_entries() }
    }
}

/// `[buffer]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    /// Fraction of `max_capacity` kept after an eviction pass.
    #[serde(default = "default_load_factor")]
    pub load_factor: f64,
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

fn default_max_capacity() -> usize { 100_000 }
fn default_load_factor() -> f64 { 0.75 }
fn default_eviction_interval_ms() -> u64 { 1_000 }

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            load_factor: default_load_factor(),
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

impl BufferConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    /// Number of entries left behind by an eviction pass.
    pub fn target_len(&self) -> usize {
        (self.max_capacity as f64 * self.load_factor).floor() as usize
    }
}

/// `[reader]` section: block-reading knobs of the source reader.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_min_block_size")]
    pub min_block_size: usize,
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
    #[serde(default = "default_min_block_time_ms")]
    pub min_block_time_ms: u64,
    #[serde(default = "default_max_block_time_ms")]
    pub max_block_time_ms: u64,
    /// Hard timeout for a single blocking read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Sleep between polls of a source that is caught up (continue-on-EOF).
    #[serde(default = "default_eof_poll_interval_ms")]
    pub eof_poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_min_block_size() -> usize { 1 }
fn default_max_block_size() -> usize { 1_000 }
fn default_min_block_time_ms() -> u64 { 10 }
fn default_max_block_time_ms() -> u64 { 200 }
fn default_read_timeout_ms() -> u64 { 200 }
fn default_eof_poll_interval_ms() -> u64 { 100 }
fn default_connect_timeout_ms() -> u64 { 5_000 }

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            min_block_size: default_min_block_size(),
            max_block_size: default_max_block_size(),
            min_block_time_ms: default_min_block_time_ms(),
            max_block_time_ms: default_max_block_time_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            eof_poll_interval_ms: default_eof_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ReaderConfig {
    pub fn min_block_time(&self) -> Duration {
        Duration::from_millis(self.min_block_time_ms)
    }

    pub fn max_block_time(&self) -> Duration {
        Duration::from_millis(self.max_block_time_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn eof_poll_interval(&self) -> Duration {
        Duration::from_millis(self.eof_poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// `[publisher]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Callbacks slower than this are reported as slow listeners.
    #[serde(default = "default_slow_listener_ms")]
    pub slow_listener_ms: u64,
}

fn default_poll_interval_ms() -> u64 { 20 }
fn default_slow_listener_ms() -> u64 { 100 }

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            slow_listener_ms: default_slow_listener_ms(),
        }
    }
}

impl PublisherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn slow_listener(&self) -> Duration {
        Duration::from_millis(self.slow_listener_ms)
    }
}

/// `[connector]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 { 1_000 }

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self { reconnect_delay_ms: default_reconnect_delay_ms() }
    }
}

impl ConnectorConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// `[watchdog]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: u64,
}

fn default_interval_ms() -> u64 { 5_000 }
fn default_threshold_bytes() -> u64 { 256 * 1024 * 1024 }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            threshold_bytes: default_threshold_bytes(),
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// `[timestamp]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TimestampConfig {
    /// chrono strftime format expected at the start of each line.
    #[serde(default = "default_timestamp_format")]
    pub format: String,
}

fn default_timestamp_format() -> String { "%H:%M:%S%.3f".to_string() }

impl Default for TimestampConfig {
    fn default() -> Self {
        Self { format: default_timestamp_format() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load `path` (required) or `~/.config/logtap/config.toml` (optional),
    /// layered on top of the built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path(), false),
        };

        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_path()).required(required))
            .build()
            .with_context(|| format!("reading config {}", path.display()))?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be at least 1");
        }
        if self.buffer.max_capacity == 0 {
            bail!("buffer.max_capacity must be at least 1");
        }
        if !(self.buffer.load_factor > 0.0 && self.buffer.load_factor <= 1.0) {
            bail!(
                "buffer.load_factor must be in (0, 1], got {}",
                self.buffer.load_factor
            );
        }
        let r = &self.reader;
        if r.max_block_size == 0 || r.min_block_size > r.max_block_size {
            bail!(
                "reader block size bounds are invalid (min {}, max {})",
                r.min_block_size,
                r.max_block_size
            );
        }
        if r.min_block_time_ms > r.max_block_time_ms {
            bail!(
                "reader block time bounds are invalid (min {}ms, max {}ms)",
                r.min_block_time_ms,
                r.max_block_time_ms
            );
        }
        if r.read_timeout_ms == 0 || r.max_block_time_ms == 0 {
            bail!("reader.read_timeout_ms and reader.max_block_time_ms must be positive");
        }
        if self.timestamp.format.is_empty() {
            bail!("timestamp.format must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("logtap")
        .join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
