// src/grading/mod.rs

//! Answer-sheet grading: answer-key resolution, response normalization,
//! the grading pass and the result upsert lifecycle.

pub mod aggregator;
pub mod answer_key;
pub mod engine;
pub mod normalize;

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::store::StoreError;

/// An uppercase answer letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Letter(char);

impl Letter {
    /// Letter of the alternative at a 0-based position (0 -> 'A').
    pub fn from_ordinal(position: usize) -> Option<Self> {
        u8::try_from(position)
            .ok()
            .filter(|p| *p < 26)
            .map(|p| Letter((b'A' + p) as char))
    }

    /// Parses a single ASCII letter, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        let mut chars = value.trim().chars();
        let c = chars.next()?;
        if chars.next().is_some() || !c.is_ascii_alphabetic() {
            return None;
        }
        Some(Letter(c.to_ascii_uppercase()))
    }

    /// Like `parse`, but only accepts letters up to `last` inclusive.
    pub fn parse_up_to(value: &str, last: char) -> Option<Self> {
        Self::parse(value).filter(|l| l.0 <= last)
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Letter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_char(self.0)
    }
}

/// Address of a slot inside a booklet: 0-based block position in the ordered
/// block list and 1-based slot order inside that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SlotPosition {
    pub block_index: usize,
    pub slot: u32,
}

impl SlotPosition {
    pub fn new(block_index: usize, slot: u32) -> Self {
        Self { block_index, slot }
    }

    /// Key used by the manual entry form: "<block_index>-<slot>".
    pub fn form_key(&self) -> String {
        format!("{}-{}", self.block_index, self.slot)
    }
}

/// Errors raised by the grading core.
#[derive(Debug, Error)]
pub enum GradingError {
    /// Malformed submission entry (bad token, letter out of range, missing field).
    #[error("Invalid submission: {0}")]
    InvalidInput(String),

    /// Entry addressing a block or slot the booklet does not have.
    #[error("Slot does not belong to booklet {booklet_id}: {detail}")]
    UnknownSlot { booklet_id: i64, detail: String },

    /// Booklet without blocks, or a component filter matching none.
    #[error("No gradable content: {0}")]
    NoGradableContent(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
