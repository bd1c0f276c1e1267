//! Layered configuration loading: built-in defaults, then an optional TOML
//! file, then `ROSTEREX_*` environment overrides, then validation.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::models::{Config, ScrapeConfig, StreamConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    GuardRail(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    scrape: RawScrape,
    #[serde(default)]
    stream: RawStream,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScrape {
    gateway_url: Option<String>,
    alphabet: Option<String>,
    extra_characters: Option<String>,
    num_sessions: Option<usize>,
    max_parallel_per_session: Option<usize>,
    inflight_timeout_ms: Option<u64>,
    stall_timeout_ms: Option<u64>,
    recycle_after_dispatches: Option<u32>,
    hello_delay_ms: Option<u64>,
    downstream_retries: Option<u32>,
    send_interval_ms: Option<u64>,
    page_limit: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStream {
    inline_threshold_bytes: Option<usize>,
    chunk_size: Option<usize>,
    ttl_secs: Option<u64>,
}

/// Load configuration, optionally merging a TOML file over the defaults.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigLoadError> {
    let raw = match path {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => RawConfig::default(),
    };
    finish(raw)
}

/// Load configuration from a TOML string, mainly for tests and embedding.
pub fn load_from_str(contents: &str) -> Result<Config, ConfigLoadError> {
    finish(toml::from_str(contents)?)
}

fn finish(raw: RawConfig) -> Result<Config, ConfigLoadError> {
    let mut config = merge(raw);
    apply_env(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn merge(raw: RawConfig) -> Config {
    let scrape_defaults = ScrapeConfig::default();
    let stream_defaults = StreamConfig::default();
    let s = raw.scrape;
    let t = raw.stream;

    Config {
        scrape: ScrapeConfig {
            gateway_url: s.gateway_url.unwrap_or(scrape_defaults.gateway_url),
            alphabet: s.alphabet.unwrap_or(scrape_defaults.alphabet),
            extra_characters: s
                .extra_characters
                .unwrap_or(scrape_defaults.extra_characters),
            num_sessions: s.num_sessions.unwrap_or(scrape_defaults.num_sessions),
            max_parallel_per_session: s
                .max_parallel_per_session
                .unwrap_or(scrape_defaults.max_parallel_per_session),
            inflight_timeout: s
                .inflight_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(scrape_defaults.inflight_timeout),
            stall_timeout: s
                .stall_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(scrape_defaults.stall_timeout),
            recycle_after_dispatches: s
                .recycle_after_dispatches
                .unwrap_or(scrape_defaults.recycle_after_dispatches),
            hello_delay: s
                .hello_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(scrape_defaults.hello_delay),
            downstream_retries: s
                .downstream_retries
                .unwrap_or(scrape_defaults.downstream_retries),
            send_interval: s
                .send_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(scrape_defaults.send_interval),
            page_limit: s.page_limit.unwrap_or(scrape_defaults.page_limit),
            reconnect_delay: s
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(scrape_defaults.reconnect_delay),
        },
        stream: StreamConfig {
            inline_threshold_bytes: t
                .inline_threshold_bytes
                .unwrap_or(stream_defaults.inline_threshold_bytes),
            chunk_size: t.chunk_size.unwrap_or(stream_defaults.chunk_size),
            ttl: t
                .ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(stream_defaults.ttl),
        },
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) -> Result<(), ConfigLoadError> {
    if let Ok(value) = std::env::var(key) {
        *slot = value
            .parse()
            .map_err(|_| ConfigLoadError::InvalidValue {
                key: key.to_string(),
                value,
            })?;
    }
    Ok(())
}

fn env_override_duration(
    key: &str,
    slot: &mut Duration,
    from: fn(u64) -> Duration,
) -> Result<(), ConfigLoadError> {
    let mut raw = 0u64;
    if std::env::var(key).is_ok() {
        env_override(key, &mut raw)?;
        *slot = from(raw);
    }
    Ok(())
}

fn apply_env(config: &mut Config) -> Result<(), ConfigLoadError> {
    let s = &mut config.scrape;
    env_override("ROSTEREX_GATEWAY_URL", &mut s.gateway_url)?;
    env_override("ROSTEREX_ALPHABET", &mut s.alphabet)?;
    env_override("ROSTEREX_EXTRA_CHARACTERS", &mut s.extra_characters)?;
    env_override("ROSTEREX_NUM_SESSIONS", &mut s.num_sessions)?;
    env_override(
        "ROSTEREX_MAX_PARALLEL_PER_SESSION",
        &mut s.max_parallel_per_session,
    )?;
    env_override_duration(
        "ROSTEREX_INFLIGHT_TIMEOUT_MS",
        &mut s.inflight_timeout,
        Duration::from_millis,
    )?;
    env_override_duration(
        "ROSTEREX_STALL_TIMEOUT_MS",
        &mut s.stall_timeout,
        Duration::from_millis,
    )?;
    env_override(
        "ROSTEREX_RECYCLE_AFTER_DISPATCHES",
        &mut s.recycle_after_dispatches,
    )?;
    env_override_duration(
        "ROSTEREX_HELLO_DELAY_MS",
        &mut s.hello_delay,
        Duration::from_millis,
    )?;
    env_override("ROSTEREX_DOWNSTREAM_RETRIES", &mut s.downstream_retries)?;
    env_override_duration(
        "ROSTEREX_SEND_INTERVAL_MS",
        &mut s.send_interval,
        Duration::from_millis,
    )?;
    env_override("ROSTEREX_PAGE_LIMIT", &mut s.page_limit)?;

    let t = &mut config.stream;
    env_override(
        "ROSTEREX_INLINE_THRESHOLD_BYTES",
        &mut t.inline_threshold_bytes,
    )?;
    env_override("ROSTEREX_STREAM_CHUNK_SIZE", &mut t.chunk_size)?;
    env_override_duration("ROSTEREX_STREAM_TTL_SECS", &mut t.ttl, Duration::from_secs)?;
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigLoadError> {
    let alphabet = config.scrape.effective_alphabet();
    if alphabet.is_empty() {
        return Err(ConfigLoadError::GuardRail(
            "search alphabet is empty".to_string(),
        ));
    }
    if config.scrape.num_sessions == 0 {
        return Err(ConfigLoadError::GuardRail(
            "num_sessions must be at least 1".to_string(),
        ));
    }
    if config.scrape.max_parallel_per_session == 0 {
        return Err(ConfigLoadError::GuardRail(
            "max_parallel_per_session must be at least 1".to_string(),
        ));
    }
    if config.scrape.page_limit == 0 {
        return Err(ConfigLoadError::GuardRail(
            "page_limit must be at least 1".to_string(),
        ));
    }
    if config.stream.chunk_size == 0 {
        return Err(ConfigLoadError::GuardRail(
            "stream chunk_size must be at least 1".to_string(),
        ));
    }
    if config.scrape.num_sessions > alphabet.len() {
        tracing::warn!(
            num_sessions = config.scrape.num_sessions,
            alphabet_len = alphabet.len(),
            "more sessions than alphabet characters; some sessions will idle"
        );
    }
    Ok(())
}
