//! Starts sharded gateway sessions, aggregates their results, and owns the
//! run-wide cancellation and stop signals.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rosterex_config::Config;
use rosterex_model::{GuildTarget, MemberRecord, ScrapeOutcome};

use crate::error::{ScrapeError, SessionError};
use crate::gateway::scheduler::PrefixScheduler;
use crate::gateway::session::GatewaySession;
use crate::gateway::transport::{GatewayConnector, WsConnector};
use crate::store::ResultStore;

/// Input to one scrape run. The guild handle is resolved by the host bot
/// framework; `None` means resolution failed and the scrape refuses to start.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub guild: Option<GuildTarget>,
    pub token: String,
}

/// One scrape invocation.
///
/// Create a fresh `Scraper` per run: the cancellation signal is sticky, so a
/// cancelled scraper stays cancelled. Signals are per-instance rather than
/// ambient, letting independent scrapes coexist in one process.
pub struct Scraper {
    config: Config,
    connector: Arc<dyn GatewayConnector>,
    cancel: CancellationToken,
    current: Mutex<Option<Arc<ResultStore>>>,
}

impl std::fmt::Debug for Scraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scraper")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scraper {
    pub fn new(config: Config, connector: Arc<dyn GatewayConnector>) -> Self {
        Scraper {
            config,
            connector,
            cancel: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// Scraper wired to the real gateway from the configured URL.
    pub fn with_gateway(config: Config) -> Self {
        let connector = Arc::new(WsConnector::new(config.scrape.gateway_url.clone()));
        Self::new(config, connector)
    }

    /// Request cooperative cancellation. Idempotent; sessions unwind without
    /// reconnecting and the scrape returns whatever was accumulated.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Thread-safe copy of the in-progress results, for progress reporting.
    /// Empty when no scrape is running.
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        match self.current.lock().as_ref() {
            Some(store) => store.snapshot(),
            None => Vec::new(),
        }
    }

    /// Enumerate the guild's membership. Fails only when the guild handle was
    /// not resolved; cancellation is a partial-success outcome, not an error.
    pub async fn scrape(&self, options: ScrapeOptions) -> Result<ScrapeOutcome, ScrapeError> {
        let guild = options.guild.ok_or_else(|| {
            ScrapeError::NoTargetGuild("guild handle was not resolved by the host".to_string())
        })?;

        let store = Arc::new(ResultStore::new());
        *self.current.lock() = Some(store.clone());
        let stop = CancellationToken::new();
        let alphabet = self.config.scrape.effective_alphabet();
        let num_sessions = self.config.scrape.num_sessions;

        info!(
            guild = %guild.id,
            guild_name = %guild.display_name,
            num_sessions,
            expected = ?guild.expected_member_count,
            "starting member scrape"
        );

        let mut sessions = JoinSet::new();
        for index in 0..num_sessions {
            let scheduler = PrefixScheduler::new(
                index,
                num_sessions,
                &alphabet,
                &self.config.scrape,
                store.clone(),
            );
            let session = GatewaySession::new(
                index,
                guild.clone(),
                options.token.clone(),
                self.config.scrape.clone(),
                self.connector.clone(),
                store.clone(),
                scheduler,
                self.cancel.clone(),
                stop.clone(),
            );
            sessions.spawn(session.run());
        }

        while let Some(joined) = sessions.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(SessionError::Cancelled)) => {
                    debug!("session unwound on cancellation");
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "session ended with an absorbed error");
                }
                Err(join_err) => {
                    warn!(error = %join_err, "session task failed");
                }
            }
        }

        let members = store.snapshot();
        let abandoned = store.abandoned_prefixes();
        *self.current.lock() = None;

        let outcome = ScrapeOutcome::new(&guild, members, abandoned);
        info!(
            guild = %outcome.guild_id,
            count = outcome.count,
            abandoned = outcome.abandoned_prefixes.len(),
            cancelled = self.cancel.is_cancelled(),
            "scrape finished"
        );
        Ok(outcome)
    }
}
