//! Prefix-search bookkeeping for one gateway session.
//!
//! The scheduler owns the pending-query queue, the visited set, and in-flight
//! nonce tracking, and decides how a chunk response expands the search tree.
//! It is single-writer state: only the session's receive loop touches it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use rosterex_config::ScrapeConfig;
use rosterex_model::MemberRecord;
use rosterex_model::wire::MemberChunkPayload;

use crate::store::ResultStore;

/// A query popped from the queue, ready to go on the wire.
#[derive(Debug, Clone)]
pub struct OutboundQuery {
    pub nonce: String,
    pub query: String,
}

/// What a processed chunk did to the run.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOutcome {
    pub new_members: usize,
}

#[derive(Debug)]
struct InFlightQuery {
    query: String,
    sent_at: Instant,
}

/// The characters of `alphabet` assigned to session `session_index`,
/// round-robin. Shards are disjoint and their union is the full alphabet, so
/// sessions need no coordination after seeding.
pub fn shard(alphabet: &[char], session_index: usize, num_sessions: usize) -> Vec<char> {
    alphabet
        .iter()
        .enumerate()
        .filter(|(i, _)| i % num_sessions == session_index)
        .map(|(_, c)| *c)
        .collect()
}

#[derive(Debug)]
pub struct PrefixScheduler {
    session_index: usize,
    alphabet: Vec<char>,
    max_parallel: usize,
    max_retries: u32,
    page_limit: usize,
    queue: VecDeque<String>,
    visited: HashSet<String>,
    in_flight: HashMap<String, InFlightQuery>,
    retries: HashMap<String, u32>,
    nonce_counter: u64,
    store: Arc<ResultStore>,
}

impl PrefixScheduler {
    pub fn new(
        session_index: usize,
        num_sessions: usize,
        alphabet: &[char],
        config: &ScrapeConfig,
        store: Arc<ResultStore>,
    ) -> Self {
        let queue = shard(alphabet, session_index, num_sessions)
            .into_iter()
            .map(String::from)
            .collect();

        PrefixScheduler {
            session_index,
            alphabet: alphabet.to_vec(),
            max_parallel: config.max_parallel_per_session,
            max_retries: config.downstream_retries,
            page_limit: config.page_limit as usize,
            queue,
            visited: HashSet::new(),
            in_flight: HashMap::new(),
            retries: HashMap::new(),
            nonce_counter: 0,
            store,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max_parallel
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Queue drained and nothing left in flight: the shard is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    /// Pop the next query and record it in flight. Returns `None` when the
    /// queue is empty or the parallelism cap is reached.
    pub fn dequeue(&mut self) -> Option<OutboundQuery> {
        if !self.has_capacity() {
            return None;
        }
        let query = self.queue.pop_front()?;
        let nonce = format!("{}:{}:{}", self.session_index, self.nonce_counter, query);
        self.nonce_counter += 1;
        self.in_flight.insert(
            nonce.clone(),
            InFlightQuery {
                query: query.clone(),
                sent_at: Instant::now(),
            },
        );
        Some(OutboundQuery { nonce, query })
    }

    /// Undo a dequeue whose send failed: the query goes back to the front of
    /// the queue without spending a retry.
    pub fn requeue_sent(&mut self, nonce: &str) {
        if let Some(in_flight) = self.in_flight.remove(nonce) {
            self.queue.push_front(in_flight.query);
        }
    }

    /// Return every in-flight query to the front of the queue, for when the
    /// connection died under them. Does not spend retries.
    pub fn requeue_in_flight(&mut self) {
        let nonces: Vec<String> = self.in_flight.keys().cloned().collect();
        for nonce in nonces {
            self.requeue_sent(&nonce);
        }
    }

    /// Bookkeeping and expansion for a received member chunk. Returns `None`
    /// when the nonce is unknown (stale response after a requeue, or a second
    /// page for an already-completed query).
    pub fn on_chunk(&mut self, chunk: &MemberChunkPayload) -> Option<ChunkOutcome> {
        let nonce = chunk.nonce.as_deref()?;
        let in_flight = self.in_flight.remove(nonce)?;
        let query = in_flight.query;
        self.visited.insert(query.clone());

        let mut new_members = 0;
        for member in &chunk.members {
            if self.store.upsert(MemberRecord::from(member)) {
                new_members += 1;
            }
        }

        // A full page means the platform truncated: refine only where the
        // returned names show evidence of more matches.
        if chunk.members.len() >= self.page_limit {
            for c in observed_next_chars(&query, chunk) {
                let mut refined = query.clone();
                refined.push(c);
                self.enqueue(refined);
            }
        }

        // Search ranking can hide same-prefix matches behind a single page;
        // covering the adjacent slice compensates. Heuristic, not a guarantee.
        if query.chars().count() > 1
            && let Some(sibling) = self.next_sibling(&query)
        {
            self.enqueue(sibling);
        }

        tracing::debug!(
            session = self.session_index,
            query = %query,
            new_members,
            queued = self.queue.len(),
            "processed member chunk"
        );

        Some(ChunkOutcome { new_members })
    }

    /// Requeue in-flight queries past the timeout, spending one retry each.
    /// Returns the queries that exhausted their budget and were abandoned.
    pub fn scavenge(&mut self, inflight_timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let timed_out: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| now.duration_since(f.sent_at) >= inflight_timeout)
            .map(|(nonce, _)| nonce.clone())
            .collect();

        let mut abandoned = Vec::new();
        for nonce in timed_out {
            let Some(in_flight) = self.in_flight.remove(&nonce) else {
                continue;
            };
            let query = in_flight.query;
            let attempts = self.retries.entry(query.clone()).or_insert(0);
            *attempts += 1;
            if *attempts > self.max_retries {
                self.visited.insert(query.clone());
                self.store.record_abandoned(query.clone());
                abandoned.push(query);
            } else {
                self.queue.push_front(query);
            }
        }
        abandoned
    }

    /// Guarded queue insertion: never enqueue a prefix that was visited, is
    /// already queued, or is currently in flight.
    fn enqueue(&mut self, query: String) {
        if self.visited.contains(&query)
            || self.queue.contains(&query)
            || self.in_flight.values().any(|f| f.query == query)
        {
            return;
        }
        self.queue.push_back(query);
    }

    /// The lexicographically next prefix at the same depth under the same
    /// parent, per the configured alphabet. `None` when the last character is
    /// outside the alphabet or already its last entry.
    fn next_sibling(&self, query: &str) -> Option<String> {
        let last = query.chars().last()?;
        let pos = self.alphabet.iter().position(|&c| c == last)?;
        let next = *self.alphabet.get(pos + 1)?;
        let mut sibling: String = query.chars().collect();
        sibling.pop();
        sibling.push(next);
        Some(sibling)
    }
}

/// Distinct characters that follow `query` in returned names that actually
/// start with it, in first-seen order. Not restricted to the alphabet: names
/// may contain anything.
fn observed_next_chars(query: &str, chunk: &MemberChunkPayload) -> Vec<char> {
    let mut out = Vec::new();
    for member in &chunk.members {
        let Some(name) = member.user.username.as_ref() else {
            continue;
        };
        let name = name.to_lowercase();
        if let Some(rest) = name.strip_prefix(query)
            && let Some(c) = rest.chars().next()
            && !out.contains(&c)
        {
            out.push(c);
        }
    }
    out
}
