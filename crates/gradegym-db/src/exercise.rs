//! MySQL-backed exercise repository.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::MySqlPool;
use tokio::time::sleep;
use tracing::warn;

use gradegym_core::{Error, ExerciseBlob, ExerciseRepo, Result};

/// Attempts per fetch before the store is reported unavailable.
const FETCH_ATTEMPTS: u32 = 3;
/// Pause between attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, sqlx::FromRow)]
struct ExerciseRow {
    id: i64,
    #[sqlx(rename = "type")]
    category: String,
    title: String,
    description: String,
    difficulty: i32,
    content: String,
    file: Vec<u8>,
}

impl From<ExerciseRow> for ExerciseBlob {
    fn from(row: ExerciseRow) -> Self {
        ExerciseBlob {
            id: row.id,
            category: row.category,
            title: row.title,
            description: row.description,
            difficulty: row.difficulty,
            content: row.content,
            archive: row.file,
        }
    }
}

/// Reads `EXERCISE` rows from the shared MySQL store. Transient query errors
/// are retried a few times; the pool itself handles reconnection.
pub struct SqlExerciseRepo {
    pool: MySqlPool,
}

impl SqlExerciseRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn query(&self, exercise_id: i64, category: &str) -> sqlx::Result<Option<ExerciseRow>> {
        sqlx::query_as::<_, ExerciseRow>(
            r#"
            SELECT id, type, title, description, difficulty, content, file
            FROM EXERCISE
            WHERE id = ? AND type = ?
            "#,
        )
        .bind(exercise_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await
    }
}

#[async_trait]
impl ExerciseRepo for SqlExerciseRepo {
    async fn fetch(&self, exercise_id: i64, category: &str) -> Result<ExerciseBlob> {
        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.query(exercise_id, category).await {
                Ok(Some(row)) => return Ok(row.into()),
                Ok(None) => {
                    return Err(Error::NotFound(format!(
                        "exercise {exercise_id} in category {category}"
                    )));
                }
                Err(err) => {
                    warn!(attempt, exercise_id, category, error = %err, "exercise fetch failed");
                    last_error = Some(err);
                    if attempt < FETCH_ATTEMPTS {
                        sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        let err = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::Internal(format!("exercise store unavailable: {err}")))
    }
}
