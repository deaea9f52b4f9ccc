//! Exercise store adapter.
//!
//! The store is an external MySQL database; the pipeline only ever reads
//! single `EXERCISE` rows by id and category.

pub mod error;
pub mod exercise;

pub use error::{DbError, DbResult};
pub use exercise::SqlExerciseRepo;

use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
