//! Concurrency tests: many producers racing into one broker while a worker
//! pool drains competitively.

use mymq::config::ClusterConfig;
use mymq::{
    Broker, ConsumerPool, DeadLetterQueue, IdempotencyStore, LogProcessor, MessageQueue,
    MetricsRecorder, MymqProducer, ReplicationClient, WalAppender,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_concurrent_producers_drain_cleanly() {
    let dir = tempdir().unwrap();
    let metrics = Arc::new(MetricsRecorder::new());
    let idempotency = Arc::new(IdempotencyStore::default());
    let broker = Arc::new(Broker::new(
        MessageQueue::new(10_000),
        DeadLetterQueue::new(1_000, Arc::clone(&metrics)),
        WalAppender::new(dir.path().join("wal.log")).unwrap(),
        Arc::clone(&idempotency),
        Arc::clone(&metrics),
        ClusterConfig::default(),
        ReplicationClient::new().unwrap(),
    ));
    let producer = Arc::new(MymqProducer::new(
        Arc::clone(&broker),
        Arc::clone(&metrics),
    ));
    let consumers = ConsumerPool::new(
        Arc::clone(&broker),
        Arc::clone(&metrics),
        idempotency,
        Arc::new(LogProcessor),
        4,
        1,
    );
    consumers.start();

    let num_producers = 8;
    let per_producer = 250;

    let mut tasks = JoinSet::new();
    for p in 0..num_producers {
        let producer = Arc::clone(&producer);
        tasks.spawn(async move {
            let mut accepted = 0usize;
            for i in 0..per_producer {
                // Each producer writes its own key, so sequences stay clean.
                if producer
                    .publish(Some(&format!("key-{p}")), &format!("p{p}-m{i}"))
                    .await
                {
                    accepted += 1;
                }
            }
            accepted
        });
    }

    let mut accepted_total = 0usize;
    while let Some(result) = tasks.join_next().await {
        accepted_total += result.expect("producer task failed");
    }
    assert_eq!(accepted_total, num_producers * per_producer);

    let expected = (num_producers * per_producer) as u64;
    for _ in 0..250 {
        let dto = metrics.snapshot();
        if dto.total_messages >= expected && dto.uncommitted_count == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    consumers.shutdown().await;

    let dto = metrics.snapshot();
    assert_eq!(dto.total_messages, expected);
    assert_eq!(dto.success_count, expected);
    assert_eq!(dto.fail_count, 0);
    assert_eq!(dto.duplicate_count, 0);
    // Order violations are not asserted here: four workers racing on the
    // same queue may observe one key's sequences out of order, which is the
    // exact condition the counter exists to measure.
    assert_eq!(dto.uncommitted_count, 0);

    // WAL carries one line per admitted message, whatever the interleaving.
    let wal = std::fs::read_to_string(dir.path().join("wal.log")).unwrap();
    assert_eq!(wal.lines().count(), num_producers * per_producer);
}
