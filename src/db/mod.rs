mod from_row;
pub mod queries;
mod schema;

pub use from_row::{FromRow, PURCHASE_COLS, PURCHASE_EXTRA_COLS, PURCHASE_USER_COLS};
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::vendors::{Gateways, PlanCache};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Run a store operation on the blocking pool.
///
/// Two jobs: no `rusqlite` connection is ever alive across an async
/// suspension point, and the conflict-retry backoff inside the store never
/// stalls an async worker.
pub async fn with_store<T, F>(pool: &DbPool, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        op(&conn)
    })
    .await
    .map_err(|err| AppError::Internal(format!("Store task failed: {}", err)))?
}

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Vendor client boundary (external collaborators)
    pub gateways: Gateways,
    /// Paddle subscription-plan metadata, lazily populated
    pub plan_cache: Arc<PlanCache>,
    /// Browser origins accepted on the CORS-gated endpoints
    pub allowed_origins: Arc<Vec<String>>,
}

pub fn create_pool(database_path: &str) -> std::result::Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
