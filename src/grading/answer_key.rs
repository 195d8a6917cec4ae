// src/grading/answer_key.rs

use std::collections::HashMap;

use serde::Serialize;

use super::Letter;
use crate::models::question::{Alternative, Question};

/// Answer-key data of one question as stored, in either representation.
#[derive(Debug, Clone, Default)]
pub struct AnswerSource {
    /// Direct single-letter field on the question.
    pub direct: Option<String>,
    /// Legacy alternative rows, in insertion order.
    pub alternatives: Vec<Alternative>,
}

impl AnswerSource {
    /// Builds the source from the question row and its alternatives.
    /// Alternatives are put in insertion (id) order regardless of input order.
    pub fn from_rows(question: &Question, mut alternatives: Vec<Alternative>) -> Self {
        alternatives.retain(|a| a.question_id == question.id);
        alternatives.sort_by_key(|a| a.id);
        Self {
            direct: question.correct_answer.clone(),
            alternatives,
        }
    }
}

/// The resolved correct answer of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnswerKey {
    Letter(Letter),
    /// No resolvable key. Never matches any response.
    Indeterminate,
}

impl AnswerKey {
    pub fn letter(&self) -> Option<Letter> {
        match self {
            AnswerKey::Letter(l) => Some(*l),
            AnswerKey::Indeterminate => None,
        }
    }
}

/// Correct answers of a booklet's questions, by question id.
pub type AnswerKeys = HashMap<i64, AnswerKey>;

/// Resolves the correct answer of a question.
///
/// A non-empty direct field always wins. Otherwise the first alternative
/// flagged correct gives the letter by its position ('A' for the first).
pub fn resolve_answer_key(source: &AnswerSource) -> AnswerKey {
    if let Some(direct) = source.direct.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        return match Letter::parse(direct) {
            Some(letter) => AnswerKey::Letter(letter),
            None => {
                tracing::warn!("Ignoring malformed direct answer key {:?}", direct);
                AnswerKey::Indeterminate
            }
        };
    }

    source
        .alternatives
        .iter()
        .position(|a| a.is_correct)
        .and_then(Letter::from_ordinal)
        .map_or(AnswerKey::Indeterminate, AnswerKey::Letter)
}

/// Resolves every source of a map, keeping the question ids.
pub fn resolve_all(sources: &HashMap<i64, AnswerSource>) -> AnswerKeys {
    sources
        .iter()
        .map(|(id, source)| (*id, resolve_answer_key(source)))
        .collect()
}
