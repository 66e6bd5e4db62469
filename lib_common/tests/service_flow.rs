//! End-to-end flows through the service against in-memory stores: ranking,
//! tie-breaking, clamping, pagination, search and recovery sync.

mod common;

use std::collections::HashMap;

use common::build_engine;
use lib_common::connections::{now_nanos, DurableStore, RankingIndex};
use lib_common::core::service::ServiceError;
use lib_common::core::worker_pool::WorkerPoolConfig;
use lib_common::models::{User, MAX_RATING, MIN_RATING};

#[tokio::test]
async fn fresh_leaderboard_ranks_with_shared_first_place() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("a", 500).await.unwrap();
    service.update_score("b", 500).await.unwrap();
    service.update_score("c", 300).await.unwrap();

    let board = service.get_leaderboard(0, 10).await.unwrap();
    assert_eq!(board.total, 3);

    let rows: Vec<(u64, &str, i32)> = board
        .data
        .iter()
        .map(|e| (e.rank, e.username.as_str(), e.rating))
        .collect();
    // Earlier write tie-breaks above the later one; both share rank 1 and
    // the next distinct rating jumps past the tie group.
    assert_eq!(rows, vec![(1, "a", 500), (1, "b", 500), (3, "c", 300)]);
}

#[tokio::test]
async fn ratings_are_clamped_at_both_bounds() {
    let (index, _, _, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("x", 9999).await.unwrap();
    service.update_score("y", 1).await.unwrap();

    assert_eq!(index.score("x").await.unwrap(), MAX_RATING);
    assert_eq!(index.score("y").await.unwrap(), MIN_RATING);

    let board = service.get_leaderboard(0, 10).await.unwrap();
    assert_eq!(board.data[0].username, "x");
    assert_eq!(board.data[1].username, "y");
}

#[tokio::test]
async fn pagination_across_a_full_tie_keeps_rank_one() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());

    for i in 1..=100 {
        service
            .update_score(&format!("u{i}"), 1000)
            .await
            .unwrap();
    }

    let board = service.get_leaderboard(50, 10).await.unwrap();
    assert_eq!(board.total, 100);
    assert_eq!(board.data.len(), 10);

    for (i, entry) in board.data.iter().enumerate() {
        // Insertion order survives the composite tie-break.
        assert_eq!(entry.username, format!("u{}", 51 + i));
        assert_eq!(entry.rating, 1000);
        assert_eq!(entry.rank, 1);
    }
}

#[tokio::test]
async fn search_misses_yield_user_not_found() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("only", 500).await.unwrap();

    let err = service.search_user("ghost").await.unwrap_err();
    assert!(matches!(err, ServiceError::UserNotFound));
}

#[tokio::test]
async fn search_returns_composite_rank_and_exact_rating() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("top", 3000).await.unwrap();
    service.update_score("mid", 2000).await.unwrap();
    service.update_score("low", 1000).await.unwrap();

    let found = service.search_user("mid").await.unwrap();
    assert_eq!(found.global_rank, 2);
    assert_eq!(found.username, "mid");
    assert_eq!(found.rating, 2000);
}

#[tokio::test]
async fn final_scores_cardinality_and_version_hold_after_updates() {
    let (index, _, _, service) = build_engine(WorkerPoolConfig::default());

    let finals: Vec<(&str, i32)> = vec![("p", 800), ("q", 900), ("r", 700), ("p", 850)];
    for (username, rating) in &finals {
        service.update_score(username, *rating).await.unwrap();
    }

    assert_eq!(index.score("p").await.unwrap(), 850);
    assert_eq!(index.score("q").await.unwrap(), 900);
    assert_eq!(index.score("r").await.unwrap(), 700);
    assert_eq!(index.cardinality().await.unwrap(), 3);
    assert!(index.version().await.unwrap() >= finals.len() as u64);
}

#[tokio::test]
async fn write_then_read_returns_the_clamped_input_exactly() {
    let (index, _, _, service) = build_engine(WorkerPoolConfig::default());

    for (username, input, expected) in
        [("exact", 1234, 1234), ("high", 50_000, 5000), ("low", -3, 100)]
    {
        service.update_score(username, input).await.unwrap();
        assert_eq!(index.score(username).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn leaderboard_is_rank_ascending_and_rating_descending() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());

    for (i, rating) in [1500, 1500, 1400, 1300, 1300, 1200].iter().enumerate() {
        service
            .update_score(&format!("inv{i}"), *rating)
            .await
            .unwrap();
    }

    let board = service.get_leaderboard(0, 10).await.unwrap();
    for pair in board.data.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.rating >= b.rating);
        if a.rating == b.rating {
            assert_eq!(a.rank, b.rank);
        } else {
            assert!(b.rank > a.rank);
            // Standard-competition jump: the lower group's rank counts every
            // member strictly above it.
            assert_eq!(b.rank, board.data.iter().filter(|e| e.rating > b.rating).count() as u64 + 1);
        }
    }
}

#[tokio::test]
async fn pagination_parameters_are_normalised() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());
    service.update_score("solo", 500).await.unwrap();

    let board = service.get_leaderboard(-7, 0).await.unwrap();
    assert_eq!(board.offset, 0);
    assert_eq!(board.limit, 50);

    let board = service.get_leaderboard(0, 101).await.unwrap();
    assert_eq!(board.limit, 50);

    let board = service.get_leaderboard(0, 100).await.unwrap();
    assert_eq!(board.limit, 100);
}

#[tokio::test]
async fn bulk_seed_then_top_range_returns_everything_in_order() {
    let (index, store, _, service) = build_engine(WorkerPoolConfig::default());

    let users: Vec<User> = (1..=20)
        .map(|i| User::new(format!("seed{i}"), 100 * i))
        .collect();
    store.bulk_insert(&users, 8).await.unwrap();

    let synced = service.sync_index_from_store().await.unwrap();
    assert_eq!(synced, 20);
    // One version bump for the whole batch.
    assert_eq!(index.version().await.unwrap(), 1);

    let top = index.top_range(0, 20).await.unwrap();
    assert_eq!(top.len(), 20);
    for pair in top.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }
    assert_eq!(top[0], ("seed20".to_string(), 2000));
}

#[tokio::test]
async fn sync_on_empty_store_is_a_no_op() {
    let (index, _, _, service) = build_engine(WorkerPoolConfig::default());
    assert_eq!(service.sync_index_from_store().await.unwrap(), 0);
    assert_eq!(index.cardinality().await.unwrap(), 0);
    assert_eq!(index.version().await.unwrap(), 0);
}

#[tokio::test]
async fn update_score_reaches_the_durable_store() {
    let (_, store, pool, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("persisted", 2500).await.unwrap();
    pool.shutdown().await.unwrap();

    let row = store.get("persisted").await.unwrap();
    assert_eq!(row.rating, 2500);
}

#[tokio::test]
async fn store_upsert_is_idempotent() {
    let (_, store, _, _) = build_engine(WorkerPoolConfig::default());

    store.upsert("twice", 1200).await.unwrap();
    let first = store.get("twice").await.unwrap();

    store.upsert("twice", 1200).await.unwrap();
    let second = store.get("twice").await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(second.rating, 1200);
    assert_eq!(second.id, first.id);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.created_at, first.created_at);
}

#[tokio::test]
async fn health_check_covers_both_dependencies() {
    let (_, _, _, service) = build_engine(WorkerPoolConfig::default());
    service.health_check().await.unwrap();
}

#[tokio::test]
async fn explicitly_spaced_timestamps_order_equal_ratings() {
    let (index, _, _, _) = build_engine(WorkerPoolConfig::default());

    // 20 ms apart: strictly decreasing composites at equal rating.
    let t0 = now_nanos();
    index.upsert("early", 4000, t0).await.unwrap();
    index.upsert("late", 4000, t0 + 20_000_000).await.unwrap();

    let top = index.top_range(0, 2).await.unwrap();
    assert_eq!(top[0].0, "early");
    assert_eq!(top[1].0, "late");
    assert_eq!(index.rank_of("early").await.unwrap(), 1);
    assert_eq!(index.rank_of("late").await.unwrap(), 2);
}

#[tokio::test]
async fn score_batch_omits_missing_users_silently() {
    let (index, _, _, service) = build_engine(WorkerPoolConfig::default());

    service.update_score("present", 1000).await.unwrap();

    let scores = index
        .score_batch(&["present".to_string(), "absent".to_string()])
        .await
        .unwrap();
    assert_eq!(scores, HashMap::from([("present".to_string(), 1000)]));
}
