//! Scripted in-process gateway for driving sessions without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use rosterex_config::{Config, ScrapeConfig, StreamConfig};
use rosterex_core::gateway::{GatewayConnector, GatewayTransport};
use rosterex_model::UserId;
use rosterex_model::wire::{GatewayFrame, RequestMembersPayload, WireMember, WireUser, event, op};

/// Decides what a member query returns: `Some(page)` sends one chunk back,
/// `None` never responds (for timeout scenarios).
pub type Responder = dyn Fn(&RequestMembersPayload) -> Option<Vec<WireMember>> + Send + Sync;

/// A fake gateway that answers identify with HELLO, heartbeats with ACK, and
/// member queries via a scripted responder. Shared counters let tests assert
/// on connection and send behavior.
#[derive(Clone)]
pub struct FakeGateway {
    responder: Arc<Responder>,
    heartbeat_interval_ms: u64,
    /// How many identify attempts to reject with invalid-session first.
    reject_identifies: Arc<AtomicUsize>,
    /// How many member queries tear the connection instead of answering.
    fail_queries: Arc<AtomicUsize>,
    /// How many member queries to silently swallow first.
    swallow_queries: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
    pub identifies: Arc<AtomicUsize>,
    pub queries: Arc<Mutex<Vec<String>>>,
    pub sends_per_query: Arc<Mutex<HashMap<String, u32>>>,
}

impl FakeGateway {
    pub fn new(responder: impl Fn(&RequestMembersPayload) -> Option<Vec<WireMember>> + Send + Sync + 'static) -> Self {
        FakeGateway {
            responder: Arc::new(responder),
            heartbeat_interval_ms: 45_000,
            reject_identifies: Arc::new(AtomicUsize::new(0)),
            fail_queries: Arc::new(AtomicUsize::new(0)),
            swallow_queries: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
            identifies: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
            sends_per_query: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn reject_first_identifies(self, count: usize) -> Self {
        self.reject_identifies.store(count, Ordering::SeqCst);
        self
    }

    /// The first `count` member queries kill the connection with a transport
    /// error instead of answering.
    pub fn fail_first_queries(self, count: usize) -> Self {
        self.fail_queries.store(count, Ordering::SeqCst);
        self
    }

    /// The first `count` member queries get no response at all.
    pub fn swallow_first_queries(self, count: usize) -> Self {
        self.swallow_queries.store(count, Ordering::SeqCst);
        self
    }

    pub fn queries_sent(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl GatewayConnector for FakeGateway {
    async fn connect(&self) -> anyhow::Result<Box<dyn GatewayTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(FakeTransport {
            gateway: self.clone(),
            tx,
            rx,
        }))
    }
}

struct FakeTransport {
    gateway: FakeGateway,
    tx: mpsc::UnboundedSender<anyhow::Result<GatewayFrame>>,
    rx: mpsc::UnboundedReceiver<anyhow::Result<GatewayFrame>>,
}

impl FakeTransport {
    fn push(&self, frame: GatewayFrame) {
        let _ = self.tx.send(Ok(frame));
    }

    fn push_error(&self, message: &str) {
        let _ = self.tx.send(Err(anyhow::anyhow!(message.to_string())));
    }

    fn take_token(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GatewayTransport for FakeTransport {
    async fn send(&mut self, frame: GatewayFrame) -> anyhow::Result<()> {
        match frame.op {
            op::IDENTIFY => {
                self.gateway.identifies.fetch_add(1, Ordering::SeqCst);
                if Self::take_token(&self.gateway.reject_identifies) {
                    self.push(GatewayFrame {
                        op: op::INVALID_SESSION,
                        t: None,
                        d: Some(json!(false)),
                    });
                } else {
                    self.push(GatewayFrame {
                        op: op::HELLO,
                        t: None,
                        d: Some(json!({
                            "heartbeat_interval": self.gateway.heartbeat_interval_ms
                        })),
                    });
                }
            }
            op::HEARTBEAT => {
                self.push(GatewayFrame {
                    op: op::HEARTBEAT_ACK,
                    t: None,
                    d: None,
                });
            }
            op::REQUEST_MEMBERS => {
                let payload: RequestMembersPayload =
                    serde_json::from_value(frame.d.clone().expect("request payload"))?;
                self.gateway.queries.lock().push(payload.query.clone());
                *self
                    .gateway
                    .sends_per_query
                    .lock()
                    .entry(payload.query.clone())
                    .or_insert(0) += 1;

                if Self::take_token(&self.gateway.fail_queries) {
                    self.push_error("connection reset");
                    return Ok(());
                }
                if Self::take_token(&self.gateway.swallow_queries) {
                    return Ok(());
                }
                if let Some(members) = (self.gateway.responder)(&payload) {
                    self.push(GatewayFrame {
                        op: op::DISPATCH,
                        t: Some(event::GUILD_MEMBERS_CHUNK.to_string()),
                        d: Some(json!({
                            "members": members,
                            "nonce": payload.nonce,
                        })),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<anyhow::Result<GatewayFrame>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {}
}

/// A responder backed by a fixed roster: returns members whose lowercased
/// name starts with the query, truncated to the page cap.
pub fn roster(entries: &[(&str, &str)], cap: usize) -> impl Fn(&RequestMembersPayload) -> Option<Vec<WireMember>> + Send + Sync + 'static {
    let entries: Vec<(String, String)> = entries
        .iter()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();
    move |request| {
        Some(
            entries
                .iter()
                .filter(|(_, name)| name.to_lowercase().starts_with(&request.query))
                .take(cap)
                .map(|(id, name)| member(id, name))
                .collect(),
        )
    }
}

pub fn member(id: &str, name: &str) -> WireMember {
    WireMember {
        user: WireUser {
            id: UserId::new(id),
            username: Some(name.to_string()),
            discriminator: None,
            avatar: None,
            bot: false,
        },
        joined_at: None,
    }
}

/// Config with millisecond-scale timings so scenarios finish instantly under
/// a paused clock.
pub fn fast_config(alphabet: &str, page_limit: u32) -> Config {
    Config {
        scrape: ScrapeConfig {
            gateway_url: "ws://fake.gateway.test".to_string(),
            alphabet: alphabet.to_string(),
            extra_characters: String::new(),
            num_sessions: 1,
            max_parallel_per_session: 1,
            inflight_timeout: Duration::from_millis(100),
            stall_timeout: Duration::from_secs(3600),
            recycle_after_dispatches: 2000,
            hello_delay: Duration::from_millis(10),
            downstream_retries: 1,
            send_interval: Duration::from_millis(1),
            page_limit,
            reconnect_delay: Duration::from_millis(10),
        },
        stream: StreamConfig::default(),
    }
}
