// src/store/mod.rs

//! Persistence seams of the grading core.
//!
//! `PgStore` is the production backend; `MemoryStore` keeps the same
//! contracts in process memory.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    grading::{answer_key::AnswerSource, engine::GradedResponse},
    models::{
        booklet::BookletStructure,
        result::{ResultKey, ResultSnapshot, StoredResult},
        student::Student,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Complete replacement state of one result, produced by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub key: ResultKey,
    pub owner_id: i64,
    pub did_take_exam: bool,
    pub total_questions: u32,
    pub total_correct: u32,
    pub percentage: f64,
    pub responses: Vec<GradedResponse>,
}

impl ResultRecord {
    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            did_take_exam: self.did_take_exam,
            total_questions: self.total_questions,
            total_correct: self.total_correct,
            percentage: self.percentage,
        }
    }
}

/// Ordered booklet/block/slot structure. Read-only for grading.
#[async_trait]
pub trait BookletStructureProvider: Send + Sync {
    async fn booklet_structure(&self, booklet_id: i64)
    -> Result<Option<BookletStructure>, StoreError>;
}

/// Stored answer-key data of questions.
#[async_trait]
pub trait AnswerKeySource: Send + Sync {
    /// Sources of the requested questions. Unknown ids are left out.
    async fn answer_sources(
        &self,
        question_ids: &[i64],
    ) -> Result<HashMap<i64, AnswerSource>, StoreError>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn find_student(&self, student_id: i64) -> Result<Option<Student>, StoreError>;

    /// Students of the given ids keyed by id, in one round trip. Unknown ids
    /// are left out.
    async fn find_students(&self, student_ids: &[i64])
    -> Result<HashMap<i64, Student>, StoreError>;
}

/// Sole writer of result and response rows.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Atomically finds or creates the result of `record.key`, deletes all of
    /// its response rows, inserts `record.responses` and updates the aggregate.
    /// On error nothing of this call is visible.
    async fn replace_result(&self, record: &ResultRecord) -> Result<ResultSnapshot, StoreError>;

    async fn find_result(&self, key: &ResultKey) -> Result<Option<StoredResult>, StoreError>;

    /// Every result of a booklet for one evaluation period, by student id.
    async fn list_results(
        &self,
        booklet_id: i64,
        year: i32,
        period: &str,
    ) -> Result<Vec<StoredResult>, StoreError>;
}

/// Everything the HTTP layer needs from storage.
pub trait GradingStore:
    BookletStructureProvider + AnswerKeySource + StudentDirectory + ResultStore
{
}

impl<T> GradingStore for T where
    T: BookletStructureProvider + AnswerKeySource + StudentDirectory + ResultStore
{
}
