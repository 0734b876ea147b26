//! Chain Tests
//!
//! Link ordering, failure handling and batches nested inside chains

mod common;

use batchline_core::application::{Dispatchable, RetryPolicy, Worker, CHAINED_BATCH_JOB_TYPE};
use batchline_core::domain::DomainError;
use batchline_core::error::AppError;
use common::{count, Harness};
use std::sync::Arc;

#[tokio::test]
async fn test_chain_runs_links_in_order() {
    let (h, queue) = Harness::in_memory();

    let dispatched = h
        .dispatcher
        .chain(vec![h.job("a"), h.job("b"), h.job("c")])
        .unwrap()
        .dispatch()
        .await
        .unwrap();
    assert!(dispatched);

    // only the head is queued up front
    assert_eq!(queue.pushed().len(), 1);

    assert_eq!(h.drain().await, 3);
    assert_eq!(h.journal(), vec!["a", "b", "c"]);
    assert_eq!(queue.pushed().len(), 3);
}

#[tokio::test]
async fn test_chain_stops_at_failure() {
    let (h, _queue) = Harness::in_memory();
    let (catch, catch_calls) = h.recorder();

    h.dispatcher
        .chain(vec![h.job("a"), h.failing("b"), h.job("c")])
        .unwrap()
        .catch(catch)
        .dispatch()
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(h.journal(), vec!["a", "b"]);

    let calls = catch_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].error.as_deref(), Some("b failed"));
    assert!(calls[0].batch.is_none());
}

#[tokio::test]
async fn test_chain_queue_applies_to_every_link() {
    let (h, queue) = Harness::in_memory();

    h.dispatcher
        .chain(vec![h.job("a"), h.job("b")])
        .unwrap()
        .on_queue("slow")
        .dispatch()
        .await
        .unwrap();

    let worker = Worker::new("slow", Arc::clone(&h.dispatcher), Arc::new(RetryPolicy::default()));
    assert_eq!(worker.drain().await.unwrap(), 2);

    let queues: Vec<_> = queue.pushed().into_iter().map(|r| r.queue).collect();
    assert_eq!(queues, vec!["slow", "slow"]);
}

#[tokio::test]
async fn test_empty_chain_is_rejected() {
    let (h, _queue) = Harness::in_memory();
    let err = h
        .dispatcher
        .chain(Vec::<Dispatchable>::new())
        .unwrap()
        .dispatch()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::Domain(DomainError::EmptyChain)));
}

#[tokio::test]
async fn test_nested_batch_runs_before_rest_of_chain() {
    let (h, queue) = Harness::in_memory();
    let nested = h
        .dispatcher
        .batch(vec![h.job("x"), h.job("y")])
        .unwrap()
        .named("nested");

    h.dispatcher
        .chain(vec![
            Dispatchable::from(h.job("a")),
            nested.into(),
            h.job("c").into(),
        ])
        .unwrap()
        .dispatch()
        .await
        .unwrap();

    assert_eq!(h.drain().await, 5);
    assert_eq!(h.journal(), vec!["a", "x", "y", "c"]);
    assert_eq!(queue.pushed_job_types()[1], CHAINED_BATCH_JOB_TYPE);

    let batches = h.dispatcher.batches(10, None).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].name(), "nested");
    assert!(batches[0].finished());
}

#[tokio::test]
async fn test_cancelled_nested_batch_stops_outer_chain() {
    let (h, _queue) = Harness::in_memory();
    let (catch, catch_count) = h.counter();
    let nested = h
        .dispatcher
        .batch(vec![h.failing("x"), h.job("y")])
        .unwrap();

    h.dispatcher
        .chain(vec![
            Dispatchable::from(h.job("a")),
            nested.into(),
            h.job("c").into(),
        ])
        .unwrap()
        .catch(catch)
        .dispatch()
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(h.journal(), vec!["a", "x", "y"]);
    assert_eq!(count(&catch_count), 1);

    let batches = h.dispatcher.batches(10, None).await.unwrap();
    assert!(batches[0].cancelled());
}

#[tokio::test]
async fn test_nested_batch_allowing_failures_continues_chain() {
    let (h, _queue) = Harness::in_memory();
    let (catch, catch_count) = h.counter();
    let nested = h
        .dispatcher
        .batch(vec![h.failing("x")])
        .unwrap()
        .allow_failures(true);

    h.dispatcher
        .chain(vec![Dispatchable::from(nested), h.job("c").into()])
        .unwrap()
        .catch(catch)
        .dispatch()
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(h.journal(), vec!["x", "c"]);
    assert_eq!(count(&catch_count), 0);
}

#[tokio::test]
async fn test_sequence_inside_batch_runs_as_chain() {
    let (h, _queue) = Harness::in_memory();
    let (then, then_count) = h.counter();

    let batch = h
        .dispatcher
        .batch(vec![
            Dispatchable::from(vec![h.job("p1"), h.job("p2")]),
            h.job("q").into(),
        ])
        .unwrap()
        .then(then)
        .dispatch()
        .await
        .unwrap();
    assert_eq!(batch.total_jobs(), 3);

    assert_eq!(h.drain().await, 3);
    assert_eq!(h.journal(), vec!["p1", "q", "p2"]);
    assert_eq!(count(&then_count), 1);
    assert!(batch.fresh().await.unwrap().unwrap().finished());
}
