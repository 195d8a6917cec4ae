// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// The text content of the question.
    pub statement: String,

    /// Direct single-letter answer key ("A".."E").
    /// Questions created before this column existed leave it empty and keep
    /// their key in the 'alternatives' table.
    pub correct_answer: Option<String>,

    pub owner_id: i64,
}

/// Represents the 'alternatives' table (legacy answer-key storage).
/// The letter of an alternative is its position among the question's
/// alternatives in insertion (id) order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Alternative {
    pub id: i64,
    pub question_id: i64,
    pub body: String,
    pub is_correct: bool,
}
