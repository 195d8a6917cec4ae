// src/models/booklet.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::grading::SlotPosition;

/// Represents the 'booklets' table (a generated exam instance, "caderno").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Booklet {
    pub id: i64,
    pub title: String,

    /// Target school grade (series).
    pub grade: i32,

    /// Teacher who authored the booklet.
    pub owner_id: i64,
}

impl Booklet {
    /// Printed booklet code: the id zero-padded to 3 digits.
    pub fn code(&self) -> String {
        format!("{:03}", self.id)
    }
}

/// Parses a printed booklet code ("007") back into a booklet id.
pub fn parse_booklet_code(code: &str) -> Option<i64> {
    parse_padded_id(code)
}

pub(crate) fn parse_padded_id(code: &str) -> Option<i64> {
    let code = code.trim();
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse::<i64>().ok().filter(|id| *id > 0)
}

/// Represents the 'booklet_blocks' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub booklet_id: i64,

    /// 1-based position of the block inside its booklet.
    pub block_order: i32,

    /// Curricular component (subject) tag, e.g. "Matemática".
    pub component: String,

    /// Declared number of question slots. Fixed once questions are assigned.
    pub total_questions: i32,
}

/// Represents the 'block_questions' table: a filled slot of a block.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionSlot {
    pub id: i64,
    pub block_id: i64,
    pub slot_order: i32,
    pub question_id: i64,
}

/// One declared slot of a block, filled or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotBinding {
    pub slot_order: u32,
    pub question_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockStructure {
    pub block: Block,
    /// Exactly `block.total_questions` entries, ordered by slot.
    pub slots: Vec<SlotBinding>,
}

impl BlockStructure {
    pub fn declared_slots(&self) -> u32 {
        self.slots.len() as u32
    }
}

/// Read-only view of a booklet used by the grading core.
#[derive(Debug, Clone, Serialize)]
pub struct BookletStructure {
    pub booklet: Booklet,
    /// Ordered by `block_order`.
    pub blocks: Vec<BlockStructure>,
}

impl BookletStructure {
    /// Builds the ordered structure from raw rows.
    ///
    /// Blocks are sorted by their order index and every block is expanded to its
    /// declared slot count; slots without a bound question stay `None`. Slot rows
    /// outside the declared range are dropped.
    pub fn assemble(booklet: Booklet, mut blocks: Vec<Block>, slots: Vec<QuestionSlot>) -> Self {
        blocks.sort_by_key(|b| b.block_order);

        let blocks = blocks
            .into_iter()
            .map(|block| {
                let declared = block.total_questions.max(0) as u32;
                let mut bindings: Vec<SlotBinding> = (1..=declared)
                    .map(|slot_order| SlotBinding {
                        slot_order,
                        question_id: None,
                    })
                    .collect();

                for slot in slots.iter().filter(|s| s.block_id == block.id) {
                    let in_range = slot.slot_order >= 1 && (slot.slot_order as u32) <= declared;
                    if !in_range {
                        tracing::warn!(
                            "Slot {} of block {} is outside its declared range (1..={})",
                            slot.slot_order,
                            block.id,
                            declared
                        );
                        continue;
                    }
                    let binding = &mut bindings[(slot.slot_order - 1) as usize];
                    if binding.question_id.is_none() {
                        binding.question_id = Some(slot.question_id);
                    }
                }

                BlockStructure {
                    block,
                    slots: bindings,
                }
            })
            .collect();

        Self { booklet, blocks }
    }

    /// Distinct ids of every question bound to a slot.
    pub fn question_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .blocks
            .iter()
            .flat_map(|b| b.slots.iter().filter_map(|s| s.question_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sum of the declared slot counts of all blocks.
    pub fn declared_total(&self) -> u32 {
        self.blocks.iter().map(|b| b.declared_slots()).sum()
    }

    pub fn contains(&self, position: SlotPosition) -> bool {
        self.blocks
            .get(position.block_index)
            .is_some_and(|b| position.slot >= 1 && position.slot <= b.declared_slots())
    }

    /// Maps a 1-based booklet-wide slot number onto its block and slot.
    ///
    /// Numbering runs through the declared slots of each block in order, so the
    /// same number always addresses the same bubble on the printed sheet.
    pub fn locate_global_slot(&self, number: u32) -> Option<SlotPosition> {
        if number == 0 {
            return None;
        }
        let mut remaining = number;
        for (block_index, block) in self.blocks.iter().enumerate() {
            let declared = block.declared_slots();
            if remaining <= declared {
                return Some(SlotPosition::new(block_index, remaining));
            }
            remaining -= declared;
        }
        None
    }

    /// 0-based position of a block inside the ordered block list.
    pub fn block_index(&self, block_id: i64) -> Option<usize> {
        self.blocks.iter().position(|b| b.block.id == block_id)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn two_block_structure() -> BookletStructure {
        BookletStructure::assemble(
            booklet(3),
            vec![
                block(20, 3, 2, "Português", 2),
                block(10, 3, 1, "Matemática", 3),
            ],
            vec![slot(1, 10, 1, 100), slot(2, 10, 3, 101), slot(3, 20, 2, 200)],
        )
    }

    #[test]
    fn test_assemble_orders_blocks_and_expands_slots() {
        let structure = two_block_structure();

        assert_eq!(structure.blocks[0].block.id, 10);
        assert_eq!(structure.blocks[1].block.id, 20);
        assert_eq!(
            structure.blocks[0].slots,
            vec![
                SlotBinding { slot_order: 1, question_id: Some(100) },
                SlotBinding { slot_order: 2, question_id: None },
                SlotBinding { slot_order: 3, question_id: Some(101) },
            ]
        );
        assert_eq!(structure.declared_total(), 5);
        assert_eq!(structure.question_ids(), vec![100, 101, 200]);
    }

    #[test]
    fn test_assemble_drops_slots_outside_declared_range() {
        let structure = BookletStructure::assemble(
            booklet(1),
            vec![block(10, 1, 1, "Matemática", 1)],
            vec![slot(1, 10, 1, 100), slot(2, 10, 2, 101)],
        );

        assert_eq!(structure.blocks[0].slots.len(), 1);
        assert_eq!(structure.question_ids(), vec![100]);
    }

    #[test]
    fn test_locate_global_slot_crosses_blocks() {
        let structure = two_block_structure();

        assert_eq!(structure.locate_global_slot(1), Some(SlotPosition::new(0, 1)));
        assert_eq!(structure.locate_global_slot(3), Some(SlotPosition::new(0, 3)));
        assert_eq!(structure.locate_global_slot(4), Some(SlotPosition::new(1, 1)));
        assert_eq!(structure.locate_global_slot(5), Some(SlotPosition::new(1, 2)));
        assert_eq!(structure.locate_global_slot(6), None);
        assert_eq!(structure.locate_global_slot(0), None);
    }

    #[test]
    fn test_booklet_code_round_trip() {
        assert_eq!(booklet(7).code(), "007");
        assert_eq!(parse_booklet_code("007"), Some(7));
        assert_eq!(parse_booklet_code("1234"), Some(1234));
        assert_eq!(parse_booklet_code("00x"), None);
        assert_eq!(parse_booklet_code("000"), None);
        assert_eq!(parse_booklet_code(""), None);
    }
}
