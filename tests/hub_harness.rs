//! Stream hub integration harness.
//!
//! # What this covers
//!
//! - Fan-out: one record per matching line, shared by every subscriber of
//!   every matching pattern.
//! - Live gating by whole-line match against historical narrowing by
//!   substring find.
//! - Range requests: inclusive bounds, open ends, sequential ids, exactly one
//!   response each, `valid = false` against a closed stream.
//! - Subscription bookkeeping under concurrent registration and delivery.
//!
//! # Running
//!
//! ```sh
//! cargo test --test hub_harness
//! ```

mod common;
use common::*;

use logtap::StreamHub;
use logtap_core::ReaderState;
use logtap_feeds::SourceTarget;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

/// A hub tailing a file that already holds [`CORPUS_CLOCK`], with a
/// catch-all subscriber so every line lands in the buffer.
async fn hub_over_corpus() -> (StreamHub, tempfile::NamedTempFile) {
    let file = log_file(CORPUS_CLOCK);
    let hub = hub();
    let all = RecordingSubscriber::new("all", ".*");
    hub.subscribe(all.clone());
    hub.open_target(&SourceTarget::file(file.path())).await.unwrap();
    wait_for(Duration::from_secs(5), "corpus buffered", || {
        all.len() == CORPUS_CLOCK.len()
    })
    .await;
    (hub, file)
}

async fn answer(
    hub: &StreamHub,
    start: Option<u64>,
    end: Option<u64>,
    filter: Option<&str>,
) -> logtap::RangeResponse {
    let requester = RecordingRequester::new();
    let id = hub.request_range(start, end, requester.clone(), filter);
    wait_for(Duration::from_secs(5), "range response", || {
        requester.response_for(id).is_some()
    })
    .await;
    let responses = requester.responses();
    assert_eq!(responses.len(), 1, "exactly one response per request");
    responses.into_iter().next().unwrap()
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_pattern_subscribers_share_the_record() {
    let hub = hub();
    let first = RecordingSubscriber::new("first", "ERROR:.*");
    let second = RecordingSubscriber::new("second", "ERROR:.*");
    hub.subscribe(first.clone());
    hub.subscribe(second.clone());
    assert_eq!(hub.pattern_count(), 1);

    hub.ingest_line("ERROR: x");

    let (a, b) = (first.records(), second.records());
    assert_eq!(a.len(), 1);
    assert!(Arc::ptr_eq(&a[0], &b[0]));
    assert_eq!(a[0].id(), b[0].id());
    assert_eq!(hub.buffer().len(), 1);
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn block_delivery_keeps_id_order_per_subscriber() {
    let hub = hub();
    let errors = RecordingSubscriber::new("errors", ".*ERROR.*");
    let infos = RecordingSubscriber::new("infos", ".*INFO.*");
    hub.subscribe(errors.clone());
    hub.subscribe(infos.clone());

    hub.ingest_block(&owned(CORPUS_CLOCK));
    hub.ingest_block(&owned(CORPUS_CLOCK));

    assert_eq!(errors.blocks(), 2);
    assert_eq!(errors.len(), 4);
    assert_eq!(infos.len(), 8);
    assert_strictly_increasing!(errors.ids());
    assert_strictly_increasing!(infos.ids());
    // Only lines some pattern wanted were built.
    assert_eq!(hub.factory().next_id(), 12);
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn unsubscribed_subscriber_stops_receiving() {
    let hub = hub();
    let sub = RecordingSubscriber::new("sub", ".*");
    let id = hub.subscribe(sub.clone());
    hub.ingest_line("one");
    assert!(hub.unsubscribe(id));
    hub.ingest_line("two");

    assert_eq!(sub.texts(), vec!["one"]);
    assert_eq!(hub.pattern_count(), 0);
    assert_eq!(hub.factory().next_id(), 1);
    within(hub.shutdown()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_races_with_delivery() {
    let hub = Arc::new(hub());
    let keeper = RecordingSubscriber::new("keeper", ".*");
    hub.subscribe(keeper.clone());

    let churn = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for i in 0..200 {
                let id = hub.subscribe(RecordingSubscriber::new("churn", &format!("line {}", i % 7)));
                tokio::task::yield_now().await;
                hub.unsubscribe(id);
            }
        })
    };
    let feed = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for i in 0..200 {
                hub.ingest_line(&format!("line {i}"));
                tokio::task::yield_now().await;
            }
        })
    };
    churn.await.unwrap();
    feed.await.unwrap();

    assert_eq!(keeper.len(), 200);
    assert_strictly_increasing!(keeper.ids());
    assert_eq!(hub.subscription_count(), 1);
    within(hub.shutdown()).await;
}

// ---------------------------------------------------------------------------
// Range requests
// ---------------------------------------------------------------------------

#[rstest]
#[case(Some(1), Some(3), vec![1, 2, 3])]
#[case(None, Some(1), vec![0, 1])]
#[case(Some(6), None, vec![6, 7])]
#[case(Some(5), Some(2), vec![])]
#[case(Some(100), None, vec![])]
#[tokio::test]
async fn range_bounds_are_inclusive(
    #[case] start: Option<u64>,
    #[case] end: Option<u64>,
    #[case] expected: Vec<u64>,
) {
    let (hub, _file) = hub_over_corpus().await;
    let response = answer(&hub, start, end, None).await;

    assert!(response.valid);
    let ids: Vec<u64> = response.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, expected);
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn historical_filter_is_substring_find() {
    let (hub, _file) = hub_over_corpus().await;

    // As a live filter "ERROR" would match none of these lines in full.
    let response = answer(&hub, None, None, Some("ERROR")).await;
    assert!(response.valid);
    assert_ids!(response.records, [2, 7]);

    let response = answer(&hub, None, None, Some("(unclosed")).await;
    assert!(response.valid);
    assert!(response.records.is_empty());
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn request_ids_are_sequential() {
    let (hub, _file) = hub_over_corpus().await;
    let requester = RecordingRequester::new();
    let ids: Vec<u64> = (0..5)
        .map(|_| hub.request_range(None, None, requester.clone(), None))
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    wait_for(Duration::from_secs(5), "five responses", || {
        requester.responses().len() == 5
    })
    .await;
    let answered: Vec<u64> = requester.responses().iter().map(|r| r.request_id).collect();
    assert_eq!(answered, ids);
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn closed_stream_answers_invalid() {
    let hub = hub();
    hub.subscribe(RecordingSubscriber::new("all", ".*"));
    hub.ingest_block(&owned(&["buffered but no reader"]));
    assert_eq!(hub.state(), ReaderState::Closed);

    let response = answer(&hub, None, None, None).await;
    assert!(!response.valid);
    assert!(response.records.is_empty());
    within(hub.shutdown()).await;
}

#[tokio::test]
async fn requests_after_shutdown_still_get_one_response() {
    let (hub, _file) = hub_over_corpus().await;
    within(hub.shutdown()).await;

    let requester = RecordingRequester::new();
    let id = hub.request_range(None, None, requester.clone(), None);
    let responses = requester.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].request_id, id);
    assert!(!responses[0].valid);
}

#[tokio::test]
async fn eof_stream_still_answers_valid() {
    let file = log_file(&["10:00:00.000 A", "10:00:00.100 B"]);
    let hub = hub();
    let all = RecordingSubscriber::new("all", ".*");
    hub.subscribe(all.clone());
    let reader = logtap_feeds::SourceReader::new(
        SourceTarget::file(file.path()),
        fast_config().reader,
        logtap_feeds::EofMode::Stop,
    );
    hub.open(Arc::new(reader)).await.unwrap();
    wait_for(Duration::from_secs(5), "eof", || {
        hub.state() == ReaderState::EofReached && all.len() == 2
    })
    .await;

    let response = answer(&hub, None, None, None).await;
    assert!(response.valid);
    assert_ids!(response.records, [0, 1]);
    within(hub.shutdown()).await;
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

    /// Whatever the input, each subscriber sees strictly increasing ids, only
    /// lines its pattern matches in full, and the buffer holds exactly the
    /// lines that some pattern wanted.
    #[test]
    fn fan_out_respects_patterns(
        blocks in proptest::collection::vec(
            proptest::collection::vec("(INFO|WARN|ERROR) [a-c]{1,3}", 0..8),
            1..6,
        )
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let hub = hub();
            let errors = RecordingSubscriber::new("errors", "ERROR .*");
            let short = RecordingSubscriber::new("short", "[A-Z]+ [a-c]");
            hub.subscribe(errors.clone());
            hub.subscribe(short.clone());

            let mut wanted = 0;
            for block in &blocks {
                hub.ingest_block(block);
                wanted += block
                    .iter()
                    .filter(|l| l.starts_with("ERROR ") || l.split(' ').nth(1).is_some_and(|w| w.len() == 1))
                    .count();
            }

            assert_strictly_increasing!(errors.ids());
            assert_strictly_increasing!(short.ids());
            assert!(errors.texts().iter().all(|t| t.starts_with("ERROR ")));
            assert!(short.texts().iter().all(|t| t.split(' ').nth(1).is_some_and(|w| w.len() == 1)));
            assert_eq!(hub.buffer().len(), wanted);
            hub.shutdown().await;
        });
    }
}
