// src/grading/normalize.rs

//! Channel adapters that turn raw submissions into canonical per-slot marks.
//!
//! Every adapter validates against the booklet structure before producing
//! anything, so a rejected submission never reaches the grading pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::{GradingError, Letter, SlotPosition};
use crate::models::{booklet::BookletStructure, result::QrAnswer};

/// Canonical mark of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkedAnswer {
    Letter(Letter),
    /// Explicitly left blank.
    Blank,
    /// More than one bubble filled. Always wrong, never blank.
    Multiple,
}

pub const BLANK_SENTINEL: &str = "";
pub const MULTIPLE_SENTINEL: &str = "X";

impl MarkedAnswer {
    /// Value persisted in the `marked` column.
    pub fn stored_value(&self) -> String {
        match self {
            MarkedAnswer::Letter(l) => l.to_string(),
            MarkedAnswer::Blank => BLANK_SENTINEL.to_string(),
            MarkedAnswer::Multiple => MULTIPLE_SENTINEL.to_string(),
        }
    }
}

/// Marks of one submission. A slot missing from the map was not attempted,
/// which is not the same as an explicit blank.
pub type SlotResponses = BTreeMap<SlotPosition, MarkedAnswer>;

/// Highest letter accepted from the manual form and the sheet processor.
const FORM_LAST_LETTER: char = 'E';
/// QR answer sheets only print four bubbles.
const QR_LAST_LETTER: char = 'D';

const OCR_BLANK_TOKEN: &str = "Blank";
const OCR_MULTIPLE_PREFIX: &str = "Multiple:";

static FORM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)$").expect("valid form key pattern"));

fn unknown_slot(structure: &BookletStructure, detail: String) -> GradingError {
    GradingError::UnknownSlot {
        booklet_id: structure.booklet.id,
        detail,
    }
}

fn insert_unique(
    responses: &mut SlotResponses,
    position: SlotPosition,
    mark: MarkedAnswer,
) -> Result<(), GradingError> {
    if responses.insert(position, mark).is_some() {
        return Err(GradingError::InvalidInput(format!(
            "slot {} answered more than once",
            position.form_key()
        )));
    }
    Ok(())
}

/// Adapter for the manual result-entry form.
///
/// Keys are "<block_index>-<slot>", values are a letter A–E or "" for blank.
pub fn from_manual(
    structure: &BookletStructure,
    entries: &HashMap<String, String>,
) -> Result<SlotResponses, GradingError> {
    let mut responses = SlotResponses::new();

    for (key, value) in entries {
        let captures = FORM_KEY.captures(key.trim()).ok_or_else(|| {
            GradingError::InvalidInput(format!("malformed answer key {:?}", key))
        })?;
        let block_index: usize = captures[1]
            .parse()
            .map_err(|_| GradingError::InvalidInput(format!("malformed answer key {:?}", key)))?;
        let slot: u32 = captures[2]
            .parse()
            .map_err(|_| GradingError::InvalidInput(format!("malformed answer key {:?}", key)))?;

        let position = SlotPosition::new(block_index, slot);
        if !structure.contains(position) {
            return Err(unknown_slot(structure, format!("answer key {:?}", key)));
        }

        let mark = if value.trim().is_empty() {
            MarkedAnswer::Blank
        } else {
            Letter::parse_up_to(value, FORM_LAST_LETTER)
                .map(MarkedAnswer::Letter)
                .ok_or_else(|| {
                    GradingError::InvalidInput(format!(
                        "answer {:?} for {} is not a letter between A and {}",
                        value, key, FORM_LAST_LETTER
                    ))
                })?
        };

        insert_unique(&mut responses, position, mark)?;
    }

    Ok(responses)
}

/// Adapter for marks decoded from a scanned QR answer sheet.
///
/// Slots are numbered across the whole booklet; letters go from A to D.
pub fn from_qr(
    structure: &BookletStructure,
    entries: &[QrAnswer],
) -> Result<SlotResponses, GradingError> {
    let total = structure.declared_total();
    let mut responses = SlotResponses::new();

    for entry in entries {
        let position = structure.locate_global_slot(entry.slot).ok_or_else(|| {
            unknown_slot(
                structure,
                format!("question {} is not between 1 and {}", entry.slot, total),
            )
        })?;

        let letter = Letter::parse_up_to(&entry.letter, QR_LAST_LETTER).ok_or_else(|| {
            GradingError::InvalidInput(format!(
                "answer {:?} for question {} is not a letter between A and {}",
                entry.letter, entry.slot, QR_LAST_LETTER
            ))
        })?;

        insert_unique(&mut responses, position, MarkedAnswer::Letter(letter))?;
    }

    Ok(responses)
}

/// Normalizes one token produced by the automatic sheet processor.
pub fn normalize_ocr_token(token: &str) -> Result<MarkedAnswer, GradingError> {
    let token = token.trim();
    if token.is_empty() || token == OCR_BLANK_TOKEN {
        return Ok(MarkedAnswer::Blank);
    }
    if token.starts_with(OCR_MULTIPLE_PREFIX) {
        return Ok(MarkedAnswer::Multiple);
    }
    Letter::parse_up_to(token, FORM_LAST_LETTER)
        .map(MarkedAnswer::Letter)
        .ok_or_else(|| GradingError::InvalidInput(format!("unrecognized sheet token {:?}", token)))
}

/// Adapter for the automatic sheet processor: one token list per block, in
/// block order; the j-th token of a list is slot j + 1.
pub fn from_ocr(
    structure: &BookletStructure,
    blocks: &[Vec<String>],
) -> Result<SlotResponses, GradingError> {
    if blocks.len() > structure.blocks.len() {
        return Err(unknown_slot(
            structure,
            format!(
                "{} answer blocks read but the booklet has {}",
                blocks.len(),
                structure.blocks.len()
            ),
        ));
    }

    let mut responses = SlotResponses::new();

    for (block_index, tokens) in blocks.iter().enumerate() {
        let declared = structure.blocks[block_index].declared_slots();
        if tokens.len() as u32 > declared {
            return Err(unknown_slot(
                structure,
                format!(
                    "block {} has {} answers but {} questions",
                    block_index + 1,
                    tokens.len(),
                    declared
                ),
            ));
        }

        for (j, token) in tokens.iter().enumerate() {
            let mark = normalize_ocr_token(token)?;
            if mark == MarkedAnswer::Multiple {
                tracing::debug!(
                    "Multiple marks in block {} question {}: {}",
                    block_index + 1,
                    j + 1,
                    token
                );
            }
            insert_unique(&mut responses, SlotPosition::new(block_index, j as u32 + 1), mark)?;
        }
    }

    Ok(responses)
}
