//! # Tracker Scenarios
//!
//! Ingestion, stats and dedupe behaviour observed through the tracker facade.

#[cfg(test)]
mod tests {
    use super::super::fixtures::{config, tracker};
    use fp_signature_tracker::application::IngestStatus;
    use fp_signature_tracker::domain::IngestTask;
    use fp_signature_tracker::ports::{ChainQueryError, ScriptedVotes};
    use fp_signature_tracker::{ProviderKey, StatsQuery, TrackerConfig};
    use std::time::Duration;

    // =========================================================================
    // INGESTION
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_only_finalizable_heights_are_fetched() {
        let (client, tracker) = tracker(105, config(102));
        client.set_votes(102, &["aaa"]);

        tracker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let engine = tracker.engine();
        assert_eq!(engine.last_processed_height(), 102);
        assert!(client.vote_calls_for(102) >= 1);
        for height in 103..=105 {
            assert_eq!(client.vote_calls_for(height), 0, "height {height} fetched early");
        }
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_processed_never_decreases() {
        let (client, tracker) = tracker(100, config(90));
        for height in 90..=120 {
            client.set_votes(height, &["aaa", "bbb"]);
        }
        tracker.start().unwrap();

        let mut previous = 0;
        for current in [100, 104, 98, 110, 110, 120] {
            client.set_height(current);
            tokio::time::sleep(Duration::from_millis(250)).await;
            let last = tracker.engine().last_processed_height();
            assert!(last >= previous, "regressed from {previous} to {last}");
            assert!(last + tracker.engine().finalization_lag() <= tracker.engine().current_chain_height());
            previous = last;
        }
        assert!(previous > 100);
        tracker.stop();
    }

    #[tokio::test]
    async fn test_cache_capacity_evicts_oldest_height() {
        let mut config = config(1);
        config.cache.capacity = 1_000;
        let (client, tracker) = tracker(1_010, config);
        for height in 1..=1_001 {
            client.set_votes(height, &["aaa"]);
        }
        tracker.engine().refresh_chain_height().await.unwrap();

        let report = tracker.engine().gap_fill(1, 1_001).await;
        assert_eq!(report.requested, 1_001);

        let cache = tracker.engine().cache().read();
        assert!(cache.get_signers(1).is_none());
        assert!(cache.get_signers(1_001).is_some());
        assert_eq!(cache.size(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_larger_than_cache_still_advances() {
        let mut config = config(1);
        config.cache.capacity = 5;
        let (client, tracker) = tracker(30, config);
        for height in 1..=30 {
            client.set_votes(height, &["aaa"]);
        }
        tracker.start().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let engine = tracker.engine();
        assert_eq!(engine.last_processed_height(), 27);
        assert!(engine.cache().read().size() <= 5);
        for height in 1..=27 {
            let calls = client.vote_calls_for(height);
            assert!((1..=5).contains(&calls), "height {height} fetched {calls} times");
        }
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_heights_are_pruned_behind_the_cache() {
        let mut config = config(1);
        config.cache.capacity = 5;
        let (client, tracker) = tracker(30, config);
        for height in 1..=3 {
            for _ in 0..4 {
                let error = ChainQueryError::Transport("reset".into());
                client.push_response(height, ScriptedVotes::Error(error));
            }
        }
        for height in 4..=30 {
            client.set_votes(height, &["aaa"]);
        }
        tracker.start().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        let engine = tracker.engine();
        assert_eq!(engine.last_processed_height(), 27);
        assert_eq!(engine.unresolved_count(), 0);
        assert!(!engine.is_unresolved(2));
        tracker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_on_demand_fetch_is_one_rpc() {
        let (client, tracker) = tracker(200, config(190));
        client.set_votes(150, &["aaa"]);
        client.set_vote_delay(Duration::from_millis(50));
        let engine = tracker.engine();
        engine.refresh_chain_height().await.unwrap();

        let (a, b) = tokio::join!(engine.ensure_height(150), engine.ensure_height(150));
        assert_eq!(a, IngestStatus::Resolved);
        assert_eq!(b, IngestStatus::Resolved);
        assert_eq!(client.vote_calls_for(150), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stats_queries_share_backfill() {
        let (client, tracker) = tracker(200, config(190));
        for height in 140..=149 {
            client.set_votes(height, &["aaa"]);
        }
        client.set_vote_delay(Duration::from_millis(20));

        let stats = tracker.stats();
        let (a, b) = tokio::join!(
            stats.get_stats(StatsQuery::range("aaa", 140, 149)),
            stats.get_stats(StatsQuery::range("bbb", 140, 149)),
        );
        assert_eq!(a.unwrap().signed_blocks, 10);
        assert_eq!(b.unwrap().missed_blocks, 10);
        for height in 140..=149 {
            assert_eq!(client.vote_calls_for(height), 1, "height {height}");
        }
    }

    // =========================================================================
    // STATS
    // =========================================================================

    #[tokio::test]
    async fn test_provider_key_matching_is_case_insensitive() {
        let (client, tracker) = tracker(60, config(55));
        client.set_votes(50, &["ABC"]);

        let stats = tracker
            .stats()
            .get_stats(StatsQuery::range("abc", 50, 50))
            .await
            .unwrap();
        assert_eq!(stats.signed_blocks, 1);
        assert_eq!(stats.missed_blocks, 0);
        assert_eq!(stats.signature_rate, 100.0);
    }

    #[tokio::test]
    async fn test_signed_iff_key_in_signer_set() {
        let (client, tracker) = tracker(100, config(95));
        let signer_sets: [&[&str]; 5] = [&["a1", "b2"], &["b2"], &["a1"], &["c3", "A1"], &["b2", "c3"]];
        for (offset, signers) in signer_sets.iter().enumerate() {
            client.set_votes(80 + offset as u64, signers);
        }

        let stats = tracker.stats();
        for provider in ["a1", "b2", "c3", "d4"] {
            let result = stats.get_stats(StatsQuery::range(provider, 80, 84)).await.unwrap();
            let expected = signer_sets
                .iter()
                .filter(|set| set.iter().any(|s| ProviderKey::new(s) == ProviderKey::new(provider)))
                .count() as u64;
            assert_eq!(result.signed_blocks, expected, "provider {provider}");
            assert_eq!(result.signed_blocks + result.missed_blocks, 5);
            assert_eq!(result.unknown_blocks, 0);
        }
    }

    #[tokio::test]
    async fn test_last_n_ends_below_current_height() {
        let (client, tracker) = tracker(300, config(295));
        client.set_votes(299, &["aaa"]);

        let stats = tracker
            .stats()
            .get_stats(StatsQuery::last_n("aaa", 50))
            .await
            .unwrap();
        assert_eq!(stats.total_blocks, 50);
        assert_eq!((stats.start_height, stats.end_height), (250, 299));
        // 298 and 299 sit inside the finalization lag and stay unknown
        assert!(stats.unknown_blocks >= 2);
    }

    #[tokio::test]
    async fn test_epoch_buckets_partition_the_window() {
        let (client, tracker) = tracker(400, config(395));
        for height in 150..=260 {
            if height % 3 != 0 {
                client.set_votes(height, &["aaa"]);
            } else {
                client.set_votes(height, &["bbb"]);
            }
        }

        let stats = tracker
            .stats()
            .get_stats(StatsQuery::range("aaa", 150, 260))
            .await
            .unwrap();
        let epochs: Vec<u64> = stats.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![2, 3]);
        assert_eq!(stats.epochs.iter().map(|e| e.signed_blocks).sum::<u64>(), stats.signed_blocks);
        assert_eq!(stats.epochs.iter().map(|e| e.total_blocks).sum::<u64>(), stats.total_blocks);
        assert_eq!(stats.epochs[0].end_height + 1, stats.epochs[1].start_height);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reingest_does_not_change_counts() {
        let (client, tracker) = tracker(100, config(98));
        client.set_votes(70, &["aaa", "bbb"]);
        client.set_votes(71, &["bbb"]);
        let query = || StatsQuery::range("aaa", 70, 71);

        let before = tracker.stats().get_stats(query()).await.unwrap();
        for attempt in 1..=3 {
            tracker.engine().ingest(IngestTask::new(70, attempt)).await;
            tracker.engine().ingest(IngestTask::new(71, attempt)).await;
        }
        // Let the memoized result expire
        tokio::time::sleep(Duration::from_secs(6)).await;

        let after = tracker.stats().get_stats(query()).await.unwrap();
        assert_eq!(before.signed_blocks, after.signed_blocks);
        assert_eq!(before.missed_blocks, after.missed_blocks);
        assert_eq!((after.signed_blocks, after.missed_blocks), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_height_counts_unknown_not_missed() {
        let (client, tracker) = tracker(100, config(95));
        for _ in 0..4 {
            client.push_response(50, ScriptedVotes::Error(ChainQueryError::Transport("reset".into())));
        }
        client.set_votes(51, &["bbb"]);
        tracker.start().unwrap();

        // The whole retry chain runs before the height is classified
        assert_eq!(tracker.engine().ensure_height(50).await, IngestStatus::Unknown);
        assert!(tracker.engine().is_unresolved(50));
        assert_eq!(client.vote_calls_for(50), 4);

        let stats = tracker
            .stats()
            .get_stats(StatsQuery::range("aaa", 50, 51))
            .await
            .unwrap();
        assert_eq!(stats.unknown_blocks, 1);
        assert_eq!(stats.missed_blocks, 1);
        assert_eq!(stats.missed_heights, vec![51]);
        assert_eq!(stats.signature_rate, 0.0);
        tracker.stop();
    }

    #[tokio::test]
    async fn test_invalid_windows_fail_before_chain_access() {
        let (client, tracker) = tracker(100, TrackerConfig::for_testing());
        let stats = tracker.stats();

        for query in [
            StatsQuery::range("aaa", 10, 5),
            StatsQuery::range("aaa", 0, 5),
            StatsQuery::last_n("aaa", 0),
            StatsQuery::range("", 1, 5),
        ] {
            assert!(stats.get_stats(query).await.unwrap_err().is_validation());
        }
        assert_eq!(client.height_calls(), 0);
        assert_eq!(client.vote_calls(), 0);
    }
}
