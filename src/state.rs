use sqlx::SqlitePool;

use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::import::TenantLocks;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub tenant_locks: TenantLocks,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tenant_locks: TenantLocks::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}
