use std::sync::Arc;

use chrono::{TimeZone, Utc};
use dynamomq::backend::MemoryBackend;
use dynamomq::{Client, Clock, Error, ManualClock, QueueType, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderData {
    sku: String,
    quantity: u32,
}

fn order(sku: &str) -> OrderData {
    OrderData {
        sku: sku.to_owned(),
        quantity: 2,
    }
}

struct TestQueue {
    client: Client<OrderData>,
    clock: Arc<ManualClock>,
}

impl TestQueue {
    fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

async fn setup(visibility: std::time::Duration) -> TestQueue {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let client = Client::<OrderData>::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .clock(clock.clone())
        .visibility_timeout(visibility)
        .connect()
        .await
        .expect("client connects");

    TestQueue { client, clock }
}

#[tokio::test]
async fn basic_send_receive_delete_flow() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("A-101", order("SKU-1"))
        .await
        .unwrap();

    let received = queue.client.receive_message().await.unwrap();
    assert_eq!(received.id, "A-101");
    assert_eq!(received.status, Status::Processing);
    assert_eq!(received.receive_count, 1);
    assert_eq!(received.data, order("SKU-1"));

    queue.client.delete_message(&received.id).await.unwrap();

    let err = queue.client.receive_message().await.unwrap_err();
    assert!(matches!(err, Error::QueueEmpty));
}

#[tokio::test]
async fn visibility_timeout_redelivers_unacked_message() {
    let queue = setup(std::time::Duration::from_secs(1)).await;

    queue
        .client
        .send_message("A-202", order("SKU-2"))
        .await
        .unwrap();

    let first = queue.client.receive_message().await.unwrap();
    assert_eq!(first.receive_count, 1);

    // Still claimed: nothing to deliver.
    let err = queue.client.receive_message().await.unwrap_err();
    assert!(matches!(err, Error::QueueEmpty));

    queue.advance_secs(2);

    let second = queue.client.receive_message().await.unwrap();
    assert_eq!(second.id, "A-202");
    assert_eq!(second.receive_count, 2);
    assert_eq!(second.status, Status::Processing);
    assert!(second.version > first.version);
}

#[tokio::test]
async fn concurrent_receives_claim_a_message_once() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("A-303", order("SKU-3"))
        .await
        .unwrap();

    let c1 = queue.client.clone();
    let c2 = queue.client.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { c1.receive_message().await }),
        tokio::spawn(async move { c2.receive_message().await }),
    );
    let results = [r1.unwrap(), r2.unwrap()];

    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one consumer claims the message");
    assert_eq!(winners[0].as_ref().unwrap().id, "A-303");
    assert_eq!(winners[0].as_ref().unwrap().receive_count, 1);

    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, Error::QueueEmpty));
        }
    }

    let stored = queue.client.get_message("A-303").await.unwrap().unwrap();
    assert_eq!(stored.receive_count, 1);
}

#[tokio::test]
async fn update_as_visible_requeues_without_touching_receive_count() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    let sent = queue
        .client
        .send_message("A-404", order("SKU-4"))
        .await
        .unwrap();

    queue.client.receive_message().await.unwrap();
    let requeued = queue
        .client
        .update_message_as_visible("A-404")
        .await
        .unwrap();

    assert_eq!(requeued.status, Status::Ready);
    assert_eq!(requeued.receive_count, 1);
    assert_eq!(requeued.version, sent.version + 2);

    // Immediately deliverable again.
    let again = queue.client.receive_message().await.unwrap();
    assert_eq!(again.id, "A-404");
    assert_eq!(again.receive_count, 2);
}

#[tokio::test]
async fn poison_message_round_trips_through_the_dlq() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("B-1", order("SKU-5"))
        .await
        .unwrap();
    let received = queue.client.receive_message().await.unwrap();

    let moved = queue.client.move_message_to_dlq("B-1").await.unwrap();
    assert_eq!(moved.queue_type, QueueType::Dlq);
    assert_eq!(moved.status, Status::Ready);
    assert_eq!(moved.receive_count, 0);
    assert_eq!(moved.version, received.version + 1);

    let queue_stats = queue.client.get_queue_stats().await.unwrap();
    let dlq_stats = queue.client.get_dlq_stats().await.unwrap();
    assert_eq!(queue_stats.total_records, 0);
    assert_eq!(dlq_stats.total_records, 1);
    assert_eq!(dlq_stats.first_ten_ids, ["B-1"]);

    // Nothing deliverable while the message sits in the DLQ.
    let err = queue.client.receive_message().await.unwrap_err();
    assert!(matches!(err, Error::QueueEmpty));

    let redriven = queue.client.redrive_message("B-1").await.unwrap();
    assert_eq!(redriven.queue_type, QueueType::Standard);
    assert_eq!(redriven.status, Status::Ready);
    assert_eq!(redriven.version, moved.version + 1);

    let queue_stats = queue.client.get_queue_stats().await.unwrap();
    let dlq_stats = queue.client.get_dlq_stats().await.unwrap();
    assert_eq!(queue_stats.total_records, 1);
    assert_eq!(dlq_stats.total_records, 0);
    assert_eq!(dlq_stats.oldest_last_updated, None);
}

#[tokio::test]
async fn move_to_dlq_is_idempotent() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("B-2", order("SKU-6"))
        .await
        .unwrap();

    let first = queue.client.move_message_to_dlq("B-2").await.unwrap();
    let second = queue.client.move_message_to_dlq("B-2").await.unwrap();
    assert_eq!(second, first);

    let dlq_stats = queue.client.get_dlq_stats().await.unwrap();
    assert_eq!(dlq_stats.total_records, 1);
}

#[tokio::test]
async fn redrive_requires_the_dlq() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("B-3", order("SKU-7"))
        .await
        .unwrap();

    let err = queue.client.redrive_message("B-3").await.unwrap_err();
    assert!(matches!(err, Error::NotInDlq { .. }));

    let err = queue.client.redrive_message("missing").await.unwrap_err();
    assert!(matches!(err, Error::IdNotFound { .. }));
}

#[tokio::test]
async fn update_as_visible_rejects_dlq_messages() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("B-4", order("SKU-8"))
        .await
        .unwrap();
    queue.client.move_message_to_dlq("B-4").await.unwrap();

    let err = queue
        .client
        .update_message_as_visible("B-4")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn duplicate_send_leaves_the_first_row_untouched() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    let first = queue
        .client
        .send_message("C-1", order("SKU-9"))
        .await
        .unwrap();

    queue.advance_secs(5);
    let err = queue
        .client
        .send_message("C-1", order("other"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IdDuplicated { .. }));

    let stored = queue.client.get_message("C-1").await.unwrap().unwrap();
    assert_eq!(stored, first);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("D-1", order("SKU-10"))
        .await
        .unwrap();

    queue.client.delete_message("D-1").await.unwrap();
    queue.client.delete_message("D-1").await.unwrap();

    assert_eq!(queue.client.get_message("D-1").await.unwrap(), None);
}

#[tokio::test]
async fn receive_is_oldest_first() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    for id in ["E-1", "E-2", "E-3"] {
        queue.client.send_message(id, order(id)).await.unwrap();
        queue.advance_secs(1);
    }

    for expected in ["E-1", "E-2", "E-3"] {
        let received = queue.client.receive_message().await.unwrap();
        assert_eq!(received.id, expected);
    }
}

#[tokio::test]
async fn requeued_message_moves_to_the_tail() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("F-1", order("SKU-11"))
        .await
        .unwrap();
    queue.advance_secs(1);
    queue
        .client
        .send_message("F-2", order("SKU-12"))
        .await
        .unwrap();

    queue.client.receive_message().await.unwrap(); // claims F-1
    queue.advance_secs(1);
    queue.client.update_message_as_visible("F-1").await.unwrap();

    // F-1's timestamp advanced past F-2's, so F-2 now goes first.
    let received = queue.client.receive_message().await.unwrap();
    assert_eq!(received.id, "F-2");
}

#[tokio::test]
async fn queue_stats_break_down_processing_messages() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    for id in ["G-1", "G-2", "G-3"] {
        queue.client.send_message(id, order(id)).await.unwrap();
        queue.advance_secs(1);
    }
    queue.client.receive_message().await.unwrap(); // claims G-1

    let stats = queue.client.get_queue_stats().await.unwrap();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.total_in_processing, 1);
    assert_eq!(stats.first_ten_in_processing_ids, ["G-1"]);
    assert_eq!(stats.first_ten_ids.len(), 3);
    assert!(stats.oldest_last_updated.is_some());
}

#[tokio::test]
async fn list_messages_returns_rows_from_both_partitions() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("H-1", order("SKU-13"))
        .await
        .unwrap();
    queue
        .client
        .send_message("H-2", order("SKU-14"))
        .await
        .unwrap();
    queue.client.move_message_to_dlq("H-2").await.unwrap();

    let mut ids: Vec<_> = queue
        .client
        .list_messages(10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["H-1", "H-2"]);
}

#[tokio::test]
async fn replace_message_overwrites_unconditionally() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    queue
        .client
        .send_message("I-1", order("SKU-15"))
        .await
        .unwrap();
    queue.client.receive_message().await.unwrap();

    let mut message = queue.client.get_message("I-1").await.unwrap().unwrap();
    queue.advance_secs(1);
    message.reset_system_info(queue.clock.now());
    queue.client.replace_message(&message).await.unwrap();

    let stored = queue.client.get_message("I-1").await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.receive_count, 0);
    assert_eq!(stored.status, Status::Ready);
}

#[tokio::test]
async fn empty_ids_are_rejected() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    let err = queue
        .client
        .send_message("", order("SKU-16"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IdEmpty));

    let err = queue.client.get_message("").await.unwrap_err();
    assert!(matches!(err, Error::IdEmpty));

    let err = queue.client.delete_message("").await.unwrap_err();
    assert!(matches!(err, Error::IdEmpty));
}

#[tokio::test]
async fn builder_rejects_an_empty_table_name() {
    let err = Client::<OrderData>::builder()
        .table_name(String::new())
        .backend(Arc::new(MemoryBackend::new()))
        .connect()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MisConfigured { .. }));
}

#[tokio::test]
async fn versions_are_gap_free_across_the_lifecycle() {
    let queue = setup(std::time::Duration::from_secs(60)).await;

    let sent = queue
        .client
        .send_message("J-1", order("SKU-17"))
        .await
        .unwrap();
    assert_eq!(sent.version, 1);

    let received = queue.client.receive_message().await.unwrap();
    assert_eq!(received.version, 2);

    let visible = queue.client.update_message_as_visible("J-1").await.unwrap();
    assert_eq!(visible.version, 3);

    let moved = queue.client.move_message_to_dlq("J-1").await.unwrap();
    assert_eq!(moved.version, 4);

    let redriven = queue.client.redrive_message("J-1").await.unwrap();
    assert_eq!(redriven.version, 5);
}
