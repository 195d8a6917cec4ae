// src/grading/engine.rs

use serde::Serialize;

use super::{
    GradingError, Letter, SlotPosition,
    answer_key::{AnswerKey, AnswerKeys},
    normalize::{MarkedAnswer, SlotResponses},
};
use crate::models::booklet::{Block, BookletStructure};

/// Component value the listing screens use for "every subject".
pub const ALL_COMPONENTS: &str = "Ambos";

/// Restricts a grading pass to part of a booklet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockFilter {
    All,
    /// Only blocks tagged with this curricular component.
    Component(String),
}

impl BlockFilter {
    /// Builds a filter from an optional request parameter.
    pub fn from_param(component: Option<&str>) -> Self {
        match component.map(str::trim) {
            None | Some("") | Some(ALL_COMPONENTS) => BlockFilter::All,
            Some(c) => BlockFilter::Component(c.to_string()),
        }
    }

    pub fn matches(&self, block: &Block) -> bool {
        match self {
            BlockFilter::All => true,
            BlockFilter::Component(c) => block.component == *c,
        }
    }

    /// Positions (in the ordered block list) of the blocks this filter keeps.
    ///
    /// Fails when nothing is left to grade.
    pub fn select(&self, structure: &BookletStructure) -> Result<Vec<usize>, GradingError> {
        if structure.blocks.is_empty() {
            return Err(GradingError::NoGradableContent(format!(
                "booklet {} has no blocks",
                structure.booklet.id
            )));
        }
        let selected: Vec<usize> = structure
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| self.matches(&b.block))
            .map(|(i, _)| i)
            .collect();
        if selected.is_empty() {
            if let BlockFilter::Component(c) = self {
                return Err(GradingError::NoGradableContent(format!(
                    "no block found for component {}",
                    c
                )));
            }
        }
        Ok(selected)
    }
}

/// Outcome of one graded slot, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedResponse {
    pub block_id: i64,
    pub position: SlotPosition,
    pub question_id: Option<i64>,
    pub marked: MarkedAnswer,
    /// `None` when the question has no resolvable key.
    pub correct_answer: Option<Letter>,
    pub is_correct: bool,
}

/// Operator-facing counters. Not part of the graded aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Graded questions without any answer key.
    pub questions_without_key: u32,
    /// Declared slots with no question bound, skipped.
    pub unfilled_slots: u32,
    /// Gradable slots the submission did not address.
    pub not_attempted: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeOutcome {
    pub responses: Vec<GradedResponse>,
    pub total_questions: u32,
    pub total_correct: u32,
    pub percentage: f64,
    pub diagnostics: Diagnostics,
}

/// Share of correct answers in percent, rounded to one decimal place.
pub fn percentage(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(correct) / f64::from(total) * 100.0;
    (raw * 10.0).round() / 10.0
}

/// Exact letter match. `X`, blanks and missing keys never match.
pub fn is_match(marked: MarkedAnswer, key: AnswerKey) -> bool {
    match (marked, key) {
        (MarkedAnswer::Letter(m), AnswerKey::Letter(k)) => m == k,
        _ => false,
    }
}

/// Grades one submission against a booklet.
///
/// Blocks are walked in order, then slots in order. Unfilled slots and slots
/// the submission does not address produce no response and stay out of the
/// totals. Questions missing from `keys` grade as having no key.
pub fn grade(
    structure: &BookletStructure,
    keys: &AnswerKeys,
    responses: &SlotResponses,
    filter: &BlockFilter,
) -> Result<GradeOutcome, GradingError> {
    let selected = filter.select(structure)?;

    let mut graded = Vec::new();
    let mut diagnostics = Diagnostics::default();

    for block_index in selected {
        let block = &structure.blocks[block_index];

        for binding in &block.slots {
            let position = SlotPosition::new(block_index, binding.slot_order);

            let Some(question_id) = binding.question_id else {
                diagnostics.unfilled_slots += 1;
                continue;
            };

            let Some(marked) = responses.get(&position).copied() else {
                diagnostics.not_attempted += 1;
                continue;
            };

            let key = keys
                .get(&question_id)
                .copied()
                .unwrap_or(AnswerKey::Indeterminate);
            if key == AnswerKey::Indeterminate {
                diagnostics.questions_without_key += 1;
            }

            graded.push(GradedResponse {
                block_id: block.block.id,
                position,
                question_id: Some(question_id),
                marked,
                correct_answer: key.letter(),
                is_correct: is_match(marked, key),
            });
        }
    }

    let total_questions = graded.len() as u32;
    let total_correct = graded.iter().filter(|r| r.is_correct).count() as u32;

    Ok(GradeOutcome {
        responses: graded,
        total_questions,
        total_correct,
        percentage: percentage(total_correct, total_questions),
        diagnostics,
    })
}
