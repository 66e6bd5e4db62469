//! Engine core: the write-through worker pool, the orchestrating service,
//! and the version-broadcast hub.

pub mod hub;
pub mod service;
pub mod worker_pool;

pub use hub::{Hub, HubConfig, Subscription, VersionUpdate};
pub use service::{LeaderboardService, ServiceError};
pub use worker_pool::{
    PoolSnapshot, ScoreUpdateTask, ShutdownError, SubmitError, WorkerPool, WorkerPoolConfig,
};
