//! # Live Feed
//!
//! Subscription ordering and fan-out with the engine and dispatcher running.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{config, tracker};
    use fp_signature_tracker::ports::ConnectionId;
    use fp_signature_tracker::{BlockStatus, ProviderKey, SignatureEvent};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    fn connection_id(n: u128) -> ConnectionId {
        ConnectionId::from_u128(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_snapshot_precedes_block_events() {
        let (client, tracker) = tracker(50, config(45));
        for height in 45..=60 {
            client.set_votes(height, &["xyz"]);
        }
        tracker.engine().refresh_chain_height().await.unwrap();

        let mut stream = tracker
            .hub()
            .subscribe(connection_id(1), ProviderKey::new("XYZ"))
            .unwrap();
        tracker.start().unwrap();

        let first = timeout(Duration::from_secs(5), stream.next()).await.unwrap().unwrap();
        let SignatureEvent::Initial(snapshot) = first else {
            panic!("first event was not the snapshot: {first:?}");
        };
        assert_eq!(snapshot.window_size(), 49);
        assert_eq!(snapshot.end_height, 49);
        assert_eq!(snapshot.current_height, 50);

        let mut heights = Vec::new();
        while heights.len() < 3 {
            match timeout(Duration::from_secs(5), stream.next()).await.unwrap().unwrap() {
                SignatureEvent::Block(event) => {
                    assert_eq!(event.status, BlockStatus::Signed);
                    heights.push(event.height);
                }
                other => panic!("second snapshot delivered: {other:?}"),
            }
        }
        assert_eq!(heights, vec![45, 46, 47]);
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_subscriber_sees_its_own_status() {
        let (client, tracker) = tracker(50, config(46));
        client.set_votes(46, &["aaa"]);
        client.set_votes(47, &["aaa", "bbb"]);
        tracker.engine().refresh_chain_height().await.unwrap();

        let mut a = tracker.hub().subscribe(connection_id(1), ProviderKey::new("aaa")).unwrap();
        let mut b = tracker.hub().subscribe(connection_id(2), ProviderKey::new("bbb")).unwrap();
        tracker.start().unwrap();

        let block_statuses = |events: Vec<SignatureEvent>| -> Vec<(u64, BlockStatus)> {
            events
                .into_iter()
                .filter_map(|e| match e {
                    SignatureEvent::Block(b) => Some((b.height, b.status)),
                    SignatureEvent::Initial(_) => None,
                })
                .collect()
        };

        let mut collected_a = Vec::new();
        let mut collected_b = Vec::new();
        for _ in 0..3 {
            collected_a.push(timeout(Duration::from_secs(5), a.next()).await.unwrap().unwrap());
            collected_b.push(timeout(Duration::from_secs(5), b.next()).await.unwrap().unwrap());
        }

        assert_eq!(
            block_statuses(collected_a),
            vec![(46, BlockStatus::Signed), (47, BlockStatus::Signed)]
        );
        assert_eq!(
            block_statuses(collected_b),
            vec![(46, BlockStatus::Missed), (47, BlockStatus::Signed)]
        );
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscriber_is_removed() {
        let (_client, tracker) = tracker(50, config(48));
        tracker.engine().refresh_chain_height().await.unwrap();

        let stream = tracker.hub().subscribe(connection_id(7), ProviderKey::new("aaa")).unwrap();
        assert_eq!(tracker.hub().subscriber_count(), 1);
        drop(stream);
        assert_eq!(tracker.hub().subscriber_count(), 0);
        assert!(!tracker.hub().unsubscribe(connection_id(7)));
    }
}
