//! The per-connection gateway protocol state machine.
//!
//! One session owns one WebSocket connection at a time and runs a single
//! receive loop that also carries the heartbeat and the stall/in-flight
//! scavenger as timer arms, so session state stays single-writer. The
//! outer loop reconnects ("recycles") until the shard is exhausted, the
//! global stop condition fires, or cancellation is observed.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rosterex_config::ScrapeConfig;
use rosterex_model::GuildTarget;
use rosterex_model::wire::{
    GatewayFrame, HelloPayload, IdentifyPayload, MemberChunkPayload, RequestMembersPayload, event,
    op,
};

use crate::error::SessionError;
use crate::gateway::scheduler::PrefixScheduler;
use crate::gateway::transport::{GatewayConnector, GatewayTransport};
use crate::store::ResultStore;

/// How often the scavenger checks for in-flight timeouts and stalls.
const SCAVENGE_POLL: Duration = Duration::from_secs(1);

/// Fallback heartbeat period if HELLO carries garbage.
const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(41_250);

/// Pause before re-identifying after an invalid-session frame.
const REIDENTIFY_DELAY: Duration = Duration::from_millis(2_500);

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionOutcome {
    /// Close and reconnect: dispatch budget, stall, or a failed send.
    Recycle(RecycleReason),
    /// The shard is fully searched; the session is done.
    Exhausted,
    /// The global stop condition fired.
    Stopped,
    /// Cooperative cancellation observed.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecycleReason {
    DispatchBudget,
    Stall,
    SendFailed,
    RemoteClosed,
}

enum Wake {
    Cancelled,
    Stopped,
    Heartbeat,
    Scavenge,
    Frame(GatewayFrame),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpResult {
    /// Pipeline filled (or nothing to send).
    Filled,
    /// A send failed; the query was requeued. Recycle the connection.
    SendFailed,
    /// Cancellation or stop observed mid-pump.
    Interrupted,
}

pub struct GatewaySession {
    index: usize,
    guild: GuildTarget,
    token: String,
    config: ScrapeConfig,
    connector: Arc<dyn GatewayConnector>,
    store: Arc<ResultStore>,
    scheduler: PrefixScheduler,
    cancel: CancellationToken,
    stop: CancellationToken,
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("index", &self.index)
            .field("guild", &self.guild.id)
            .finish_non_exhaustive()
    }
}

impl GatewaySession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        guild: GuildTarget,
        token: String,
        config: ScrapeConfig,
        connector: Arc<dyn GatewayConnector>,
        store: Arc<ResultStore>,
        scheduler: PrefixScheduler,
        cancel: CancellationToken,
        stop: CancellationToken,
    ) -> Self {
        GatewaySession {
            index,
            guild,
            token,
            config,
            connector,
            store,
            scheduler,
            cancel,
            stop,
        }
    }

    /// Run the session to completion: connect, drive the protocol, recycle as
    /// needed, and terminate when the shard is exhausted or a global signal
    /// fires. Returns `Err(Cancelled)` only for cooperative cancellation.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if self.stop.is_cancelled() || self.scheduler.is_exhausted() {
                debug!(session = self.index, "session finished");
                return Ok(());
            }

            let mut transport = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = self.stop.cancelled() => return Ok(()),
                connected = self.connector.connect() => match connected {
                    Ok(transport) => transport,
                    Err(err) => {
                        warn!(session = self.index, error = %err, "gateway connect failed; backing off");
                        if self.wait(self.config.reconnect_delay).await.is_err() {
                            return Err(SessionError::Cancelled);
                        }
                        continue;
                    }
                },
            };

            let outcome = self.drive(transport.as_mut()).await;
            transport.close().await;

            match outcome {
                Ok(ConnectionOutcome::Recycle(reason)) => {
                    debug!(session = self.index, ?reason, "recycling gateway connection");
                    // Queries stranded in flight by the dead connection go
                    // back to the queue without spending a retry.
                    self.scheduler.requeue_in_flight();
                }
                Ok(ConnectionOutcome::Exhausted) => {
                    info!(session = self.index, "prefix shard exhausted");
                    return Ok(());
                }
                Ok(ConnectionOutcome::Stopped) => {
                    debug!(session = self.index, "stop condition observed");
                    return Ok(());
                }
                Ok(ConnectionOutcome::Cancelled) => return Err(SessionError::Cancelled),
                Err(err) => {
                    warn!(session = self.index, error = %err, "gateway connection failed; reconnecting");
                    // A torn connection strands in-flight queries the same way
                    // a recycle does; put them back without spending a retry.
                    self.scheduler.requeue_in_flight();
                    if self.wait(self.config.reconnect_delay).await.is_err() {
                        return Err(SessionError::Cancelled);
                    }
                }
            }
        }
    }

    /// Drive one connection until it ends. Transport failures surface as
    /// errors and are absorbed by the reconnect loop in [`run`].
    async fn drive(
        &mut self,
        transport: &mut dyn GatewayTransport,
    ) -> Result<ConnectionOutcome, SessionError> {
        self.identify(transport).await?;

        let mut heartbeat: Option<Interval> = None;
        let mut scavenge = tokio::time::interval(SCAVENGE_POLL);
        scavenge.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = Instant::now();
        let mut dispatched: u32 = 0;
        // No queries go out until HELLO establishes the connection.
        let mut ready = false;

        loop {
            if self.scheduler.is_exhausted() {
                return Ok(ConnectionOutcome::Exhausted);
            }

            let wake = tokio::select! {
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = self.stop.cancelled() => Wake::Stopped,
                _ = tick_opt(&mut heartbeat) => Wake::Heartbeat,
                _ = scavenge.tick() => Wake::Scavenge,
                received = transport.recv() => match received {
                    None => Wake::Closed,
                    Some(Ok(frame)) => Wake::Frame(frame),
                    Some(Err(err)) => return Err(SessionError::Transport(err)),
                },
            };

            match wake {
                Wake::Cancelled => return Ok(ConnectionOutcome::Cancelled),
                Wake::Stopped => return Ok(ConnectionOutcome::Stopped),
                Wake::Closed => {
                    return Ok(ConnectionOutcome::Recycle(RecycleReason::RemoteClosed));
                }
                Wake::Heartbeat => {
                    if transport.send(GatewayFrame::heartbeat()).await.is_err() {
                        return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                    }
                }
                Wake::Scavenge => {
                    for query in self.scheduler.scavenge(self.config.inflight_timeout) {
                        warn!(
                            session = self.index,
                            query = %query,
                            "query exhausted its retry budget; abandoned"
                        );
                    }
                    if last_progress.elapsed() >= self.config.stall_timeout {
                        return Ok(ConnectionOutcome::Recycle(RecycleReason::Stall));
                    }
                    if ready && self.pump(transport).await == PumpResult::SendFailed {
                        return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                    }
                }
                Wake::Frame(frame) => match frame.op {
                    op::HELLO => {
                        let period = frame
                            .d
                            .clone()
                            .and_then(|d| serde_json::from_value::<HelloPayload>(d).ok())
                            .map(|hello| Duration::from_millis(hello.heartbeat_interval))
                            .unwrap_or(DEFAULT_HEARTBEAT);
                        debug!(session = self.index, ?period, "hello received");
                        let mut interval =
                            tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        heartbeat = Some(interval);
                        ready = true;

                        // Let the connection settle before the first burst.
                        if self.wait(self.config.hello_delay).await.is_err() {
                            return Ok(ConnectionOutcome::Cancelled);
                        }
                        if self.pump(transport).await == PumpResult::SendFailed {
                            return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                        }
                    }
                    op::HEARTBEAT => {
                        // The gateway may demand an immediate heartbeat.
                        if transport.send(GatewayFrame::heartbeat()).await.is_err() {
                            return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                        }
                    }
                    op::HEARTBEAT_ACK => {
                        // Liveness doubles as a pump trigger.
                        if self.pump(transport).await == PumpResult::SendFailed {
                            return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                        }
                    }
                    op::INVALID_SESSION => {
                        warn!(session = self.index, "invalid session; re-identifying");
                        let jitter = Duration::from_millis(rand::rng().random_range(0..500));
                        if self.wait(REIDENTIFY_DELAY + jitter).await.is_err() {
                            return Ok(ConnectionOutcome::Cancelled);
                        }
                        self.identify(transport).await?;
                    }
                    op::DISPATCH => {
                        if frame.is_event(event::GUILD_MEMBERS_CHUNK) {
                            let payload = frame
                                .d
                                .clone()
                                .and_then(|d| serde_json::from_value::<MemberChunkPayload>(d).ok());
                            let Some(payload) = payload else {
                                warn!(session = self.index, "malformed member chunk; skipping");
                                continue;
                            };
                            if self.scheduler.on_chunk(&payload).is_none() {
                                debug!(session = self.index, "chunk with unknown nonce ignored");
                                continue;
                            }
                            dispatched += 1;
                            last_progress = Instant::now();

                            if self.target_reached() {
                                info!(
                                    session = self.index,
                                    members = self.store.len(),
                                    "expected member count reached; stopping all sessions"
                                );
                                self.stop.cancel();
                                return Ok(ConnectionOutcome::Stopped);
                            }
                            if dispatched >= self.config.recycle_after_dispatches {
                                return Ok(ConnectionOutcome::Recycle(
                                    RecycleReason::DispatchBudget,
                                ));
                            }
                            if self.pump(transport).await == PumpResult::SendFailed {
                                return Ok(ConnectionOutcome::Recycle(RecycleReason::SendFailed));
                            }
                        } else if frame.is_event(event::READY) {
                            debug!(session = self.index, "gateway ready");
                        }
                    }
                    other => {
                        debug!(session = self.index, op = other, "ignoring gateway frame");
                    }
                },
            }
        }
    }

    async fn identify(&self, transport: &mut dyn GatewayTransport) -> Result<(), SessionError> {
        let payload = IdentifyPayload::new(self.token.clone());
        transport
            .send(GatewayFrame::identify(&payload))
            .await
            .map_err(SessionError::Transport)
    }

    /// Fill the pipeline: send queued queries until the parallelism cap is
    /// reached, pacing consecutive sends. A failed send requeues the query at
    /// the front and stops this pump; the next trigger retries.
    async fn pump(&mut self, transport: &mut dyn GatewayTransport) -> PumpResult {
        let mut sent_any = false;
        while self.scheduler.has_queued() && self.scheduler.has_capacity() {
            if self.cancel.is_cancelled() || self.stop.is_cancelled() {
                return PumpResult::Interrupted;
            }
            if sent_any && self.wait(self.config.send_interval).await.is_err() {
                return PumpResult::Interrupted;
            }
            let Some(outbound) = self.scheduler.dequeue() else {
                break;
            };
            let request = RequestMembersPayload {
                guild_id: self.guild.id.clone(),
                query: outbound.query.clone(),
                limit: self.config.page_limit,
                presences: false,
                nonce: outbound.nonce.clone(),
            };
            match transport.send(GatewayFrame::request_members(&request)).await {
                Ok(()) => {
                    sent_any = true;
                    debug!(session = self.index, query = %outbound.query, "query sent");
                }
                Err(err) => {
                    warn!(session = self.index, error = %err, "send failed; requeueing query");
                    self.scheduler.requeue_sent(&outbound.nonce);
                    return PumpResult::SendFailed;
                }
            }
        }
        PumpResult::Filled
    }

    fn target_reached(&self) -> bool {
        self.guild
            .expected_member_count
            .is_some_and(|expected| self.store.len() as u64 >= expected)
    }

    /// Sleep raced against cancellation. `Err` means cancellation fired.
    async fn wait(&self, period: Duration) -> Result<(), ()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(()),
            _ = tokio::time::sleep(period) => Ok(()),
        }
    }
}

/// Tick the heartbeat interval once it exists; pend forever before HELLO.
async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
