//! End-to-end scrape scenarios against a scripted in-process gateway.

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rosterex_core::{ScrapeOptions, Scraper};
use rosterex_model::GuildTarget;

use support::{FakeGateway, fast_config, member, roster};

fn options(expected: Option<u64>) -> ScrapeOptions {
    let mut guild = GuildTarget::new("100", "testguild");
    guild.expected_member_count = expected;
    ScrapeOptions {
        guild: Some(guild),
        token: "token".to_string(),
    }
}

fn member_names(outcome: &rosterex_model::ScrapeOutcome) -> BTreeSet<String> {
    outcome
        .members
        .iter()
        .filter_map(|m| m.username.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn full_page_expands_only_where_names_show_evidence() {
    // Page cap 2: "a" returns a full page (alice, adam) and expands to the
    // observed next characters; "b" returns nothing and does not expand.
    let gateway = FakeGateway::new(roster(&[("1", "alice"), ("2", "adam")], 2));
    let scraper = Scraper::new(fast_config("ab", 2), Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(
        member_names(&outcome),
        BTreeSet::from(["alice".to_string(), "adam".to_string()])
    );
    assert_eq!(outcome.count, 2);
    assert!(outcome.abandoned_prefixes.is_empty());

    let queries: BTreeSet<String> = gateway.queries_sent().into_iter().collect();
    let expected: BTreeSet<String> = ["a", "b", "al", "ad"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(queries, expected, "refine only observed prefixes");
    assert!(!queries.contains("ab"), "unobserved prefix must not be queried");
}

#[tokio::test(start_paused = true)]
async fn no_prefix_is_queried_twice_in_a_clean_run() {
    let gateway = FakeGateway::new(roster(
        &[("1", "alice"), ("2", "adam"), ("3", "bob"), ("4", "amy")],
        2,
    ));
    let scraper = Scraper::new(fast_config("ab", 2), Arc::new(gateway.clone()));

    scraper.scrape(options(None)).await.unwrap();

    let queries = gateway.queries_sent();
    let unique: BTreeSet<&String> = queries.iter().collect();
    assert_eq!(queries.len(), unique.len(), "duplicate query sent: {queries:?}");
}

#[tokio::test(start_paused = true)]
async fn reaching_the_expected_count_stops_all_dispatch() {
    let gateway = FakeGateway::new(roster(&[("1", "alice"), ("2", "adam")], 2));
    let scraper = Scraper::new(fast_config("ab", 2), Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(Some(2))).await.unwrap();

    assert_eq!(outcome.count, 2);
    // The first chunk satisfies the target; nothing else goes out.
    assert_eq!(gateway.queries_sent(), vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_query_is_retried_once_then_abandoned() {
    // The gateway swallows every member query. With downstream_retries = 1
    // the query is sent exactly twice, then surfaced as abandoned.
    let gateway = FakeGateway::new(|_| None);
    let scraper = Scraper::new(fast_config("a", 2), Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(outcome.count, 0);
    assert_eq!(outcome.abandoned_prefixes, vec!["a".to_string()]);
    assert_eq!(gateway.sends_per_query.lock().get("a"), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_the_partial_result() {
    // "a" answers with one member; "b" never answers, so the scrape can only
    // end via cancellation.
    let gateway = FakeGateway::new(|request| match request.query.as_str() {
        "a" => Some(vec![member("1", "alice")]),
        _ => None,
    });
    let mut config = fast_config("ab", 2);
    config.scrape.max_parallel_per_session = 2;
    config.scrape.inflight_timeout = Duration::from_secs(3600);
    let scraper = Arc::new(Scraper::new(config, Arc::new(gateway.clone())));

    let task = tokio::spawn({
        let scraper = scraper.clone();
        async move { scraper.scrape(options(None)).await }
    });

    while scraper.snapshot().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    scraper.request_cancel();
    scraper.request_cancel(); // idempotent

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(member_names(&outcome), BTreeSet::from(["alice".to_string()]));
    assert_eq!(outcome.count, 1);
}

#[tokio::test(start_paused = true)]
async fn torn_connection_requeues_in_flight_without_spending_a_retry() {
    // The first query tears the connection with a transport error. Even with
    // no retry budget at all, the stranded query must come back for free on
    // the fresh connection and find its member.
    let gateway = FakeGateway::new(roster(&[("1", "alice")], 2)).fail_first_queries(1);
    let mut config = fast_config("a", 2);
    config.scrape.downstream_retries = 0;
    let scraper = Scraper::new(config, Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(member_names(&outcome), BTreeSet::from(["alice".to_string()]));
    assert!(outcome.abandoned_prefixes.is_empty());
    assert_eq!(gateway.connects.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.sends_per_query.lock().get("a"), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn stalled_connection_recycles_after_the_stall_timeout() {
    // The first query is swallowed and nothing else arrives, so the only way
    // forward is the stall timeout forcing a fresh connection where the
    // requeued query succeeds.
    let gateway = FakeGateway::new(roster(&[("1", "alice")], 2)).swallow_first_queries(1);
    let mut config = fast_config("a", 2);
    config.scrape.stall_timeout = Duration::from_millis(500);
    config.scrape.inflight_timeout = Duration::from_secs(3600);
    let scraper = Scraper::new(config, Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(outcome.count, 1);
    assert!(outcome.abandoned_prefixes.is_empty());
    assert_eq!(
        gateway.connects.load(Ordering::SeqCst),
        2,
        "a silent connection must be recycled once the stall timeout elapses"
    );
}

#[tokio::test(start_paused = true)]
async fn dispatch_budget_recycles_the_connection_and_finishes() {
    let gateway = FakeGateway::new(roster(&[("1", "alice"), ("2", "adam")], 2));
    let mut config = fast_config("ab", 2);
    config.scrape.recycle_after_dispatches = 1;
    let scraper = Scraper::new(config, Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(outcome.count, 2);
    assert!(
        gateway.connects.load(Ordering::SeqCst) >= 2,
        "a one-dispatch budget must force reconnects"
    );
    let queries: BTreeSet<String> = gateway.queries_sent().into_iter().collect();
    assert!(queries.contains("a") && queries.contains("b"));
}

#[tokio::test(start_paused = true)]
async fn invalid_session_reidentifies_without_reconnecting() {
    let gateway =
        FakeGateway::new(roster(&[("1", "alice")], 2)).reject_first_identifies(1);
    let scraper = Scraper::new(fast_config("a", 2), Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(outcome.count, 1);
    assert_eq!(gateway.connects.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.identifies.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn sessions_split_the_alphabet_and_share_the_store() {
    let gateway = FakeGateway::new(roster(&[("1", "alice"), ("2", "bob")], 5));
    let mut config = fast_config("ab", 5);
    config.scrape.num_sessions = 2;
    let scraper = Scraper::new(config, Arc::new(gateway.clone()));

    let outcome = scraper.scrape(options(None)).await.unwrap();

    assert_eq!(
        member_names(&outcome),
        BTreeSet::from(["alice".to_string(), "bob".to_string()])
    );
    assert_eq!(gateway.connects.load(Ordering::SeqCst), 2);
    let queries: BTreeSet<String> = gateway.queries_sent().into_iter().collect();
    assert_eq!(
        queries,
        ["a", "b"].into_iter().map(String::from).collect::<BTreeSet<_>>()
    );
}
