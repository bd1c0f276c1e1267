use std::time::Duration;

/// Default search alphabet: lowercase ASCII letters, digits, and the common
/// punctuation the platform indexes, plus space.
pub const DEFAULT_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyz0123456789!\"#$%&'()*+,-./:;<=>?@[]^_`{|}~ ";

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub scrape: ScrapeConfig,
    pub stream: StreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scrape: ScrapeConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Tunables for the gateway scrape itself.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// WebSocket URL of the platform gateway.
    pub gateway_url: String,
    /// Base search alphabet; deduplicated case-insensitively.
    pub alphabet: String,
    /// Extra characters appended to the alphabet (e.g. for guilds with many
    /// non-ASCII names).
    pub extra_characters: String,
    /// Concurrent gateway connections. Values above 1 require the account to
    /// tolerate multiple simultaneous sessions with member-search privileges.
    pub num_sessions: usize,
    /// In-flight query cap per session.
    pub max_parallel_per_session: usize,
    /// How long a sent query may go unanswered before it is requeued.
    pub inflight_timeout: Duration,
    /// How long a session may go without any chunk before it recycles.
    pub stall_timeout: Duration,
    /// Dispatches handled on one connection before a clean reconnect.
    pub recycle_after_dispatches: u32,
    /// Pause between receiving HELLO and the first query burst.
    pub hello_delay: Duration,
    /// Requeue budget per query; past this the query is abandoned.
    pub downstream_retries: u32,
    /// Pacing delay between consecutive sends on one session.
    pub send_interval: Duration,
    /// Result limit per query; equal to the platform's page cap.
    pub page_limit: u32,
    /// Backoff before reconnecting a session after a transport failure.
    pub reconnect_delay: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            gateway_url: "wss://gateway.discord.gg/?v=9&encoding=json".to_string(),
            alphabet: DEFAULT_ALPHABET.to_string(),
            extra_characters: String::new(),
            num_sessions: 1,
            max_parallel_per_session: 1,
            inflight_timeout: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(120),
            recycle_after_dispatches: 2000,
            hello_delay: Duration::from_millis(2500),
            downstream_retries: 1,
            send_interval: Duration::from_millis(250),
            page_limit: 100,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl ScrapeConfig {
    /// The working alphabet: base plus extra characters, lowercased and
    /// deduplicated while preserving first-seen order.
    pub fn effective_alphabet(&self) -> Vec<char> {
        let mut out = Vec::new();
        for c in self.alphabet.chars().chain(self.extra_characters.chars()) {
            for lc in c.to_lowercase() {
                if !out.contains(&lc) {
                    out.push(lc);
                }
            }
        }
        out
    }
}

/// Tunables for the result stream manager.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Serialized results at or below this size are returned inline.
    pub inline_threshold_bytes: usize,
    /// Default read size for `next` when the caller omits a length.
    pub chunk_size: usize,
    /// Time-to-live of a spooled payload.
    pub ttl: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            inline_threshold_bytes: 1_000_000,
            chunk_size: 512 * 1024,
            ttl: Duration::from_secs(15 * 60),
        }
    }
}
