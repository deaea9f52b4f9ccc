//! Exercise repository seam.

use async_trait::async_trait;

use crate::Result;

/// One exercise definition as stored in the external relational store.
#[derive(Debug, Clone)]
pub struct ExerciseBlob {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub description: String,
    pub difficulty: i32,
    pub content: String,
    /// Raw bytes of the exercise zip archive.
    pub archive: Vec<u8>,
}

/// Read access to exercise definitions, keyed by id and category.
#[async_trait]
pub trait ExerciseRepo: Send + Sync {
    async fn fetch(&self, exercise_id: i64, category: &str) -> Result<ExerciseBlob>;
}
