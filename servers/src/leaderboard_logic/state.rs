use std::sync::Arc;

use lib_common::connections::cache_redis::RedisIndex;
use lib_common::connections::db_postgres::PostgresStore;
use lib_common::core::hub::Hub;
use lib_common::core::service::LeaderboardService;

/// State shared across all HTTP/WS routes.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LeaderboardService<RedisIndex, PostgresStore>>,
    pub hub: Arc<Hub<RedisIndex>>,
}
