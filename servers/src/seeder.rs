//! Seeds the durable store and the ranking index with a synthetic user
//! population, then verifies the result and prints the top of the board.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lib_common::configs::config_sys::AppConfig;
use lib_common::connections::cache_redis::RedisIndex;
use lib_common::connections::db_postgres::PostgresStore;
use lib_common::connections::{now_nanos, DurableStore, RankingIndex};
use lib_common::models::{User, MAX_RATING, MIN_RATING};

#[derive(Parser, Debug)]
#[command(author, version, about = "Seeds the leaderboard with synthetic users", long_about = None)]
struct Args {
    /// Number of users to generate
    #[arg(long, env = "SEED_TOTAL_USERS", default_value_t = 10_000)]
    total_users: u32,

    /// Rows per insert statement
    #[arg(long, env = "SEED_BATCH_SIZE", default_value_t = 500)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    let args = Args::parse();
    let cfg = AppConfig::from_env();

    let store = Arc::new(PostgresStore::connect(&cfg.dsn(), 50).await?);
    store.migrate().await?;
    info!("connected to PostgreSQL, migrations applied");

    let index = RedisIndex::connect(&cfg.redis_url()).await?;
    info!("connected to Redis");

    info!(count = args.total_users, "generating users");
    let users = generate_users(args.total_users);

    let started = Instant::now();
    store.bulk_insert(&users, args.batch_size).await?;
    info!(
        count = users.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "users inserted into PostgreSQL"
    );

    let map: HashMap<String, i32> = users
        .iter()
        .map(|user| (user.username.clone(), user.rating))
        .collect();
    let started = Instant::now();
    index.bulk_upsert(&map, now_nanos()).await?;
    info!(
        count = map.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "ranking index populated"
    );

    let total = index.cardinality().await?;
    info!(
        postgres = users.len(),
        redis = total,
        "seeding complete"
    );

    // Ratings come from the metadata hash, not the composite floor, so the
    // printout is exact even while other writers are active.
    info!("top 10 users:");
    for (position, (username, _)) in index.top_range(0, 10).await?.iter().enumerate() {
        let rating = index.score(username).await?;
        info!("  {}. {} - {}", position + 1, username, rating);
    }

    store.close().await;
    Ok(())
}

fn generate_users(count: u32) -> Vec<User> {
    let mut rng = StdRng::from_entropy();
    (1..=count)
        .map(|i| {
            let rating = rng.gen_range(MIN_RATING..=MAX_RATING);
            User::new(format!("user_{i}"), rating)
        })
        .collect()
}
