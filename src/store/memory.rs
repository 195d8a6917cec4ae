// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use super::{
    AnswerKeySource, BookletStructureProvider, ResultRecord, ResultStore, StoreError,
    StudentDirectory,
};
use crate::{
    grading::answer_key::AnswerSource,
    models::{
        booklet::{Block, Booklet, BookletStructure, QuestionSlot},
        question::{Alternative, Question},
        result::{ResultKey, ResultSnapshot, StoredResponse, StoredResult, StudentResult},
        student::Student,
    },
};

#[derive(Debug, Default)]
struct Tables {
    booklets: HashMap<i64, Booklet>,
    blocks: Vec<Block>,
    slots: Vec<QuestionSlot>,
    questions: HashMap<i64, Question>,
    alternatives: Vec<Alternative>,
    students: HashMap<i64, Student>,
    results: Vec<StudentResult>,
    responses: Vec<StoredResponse>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store with the same contracts as `PgStore`.
///
/// Every write happens under one lock, which gives the same all-or-nothing
/// behavior and per-key serialization as a database transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn seed(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes subsequent result writes fail until reset, as a lost database would.
    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn add_booklet(&self, id: i64, title: &str, grade: i32, owner_id: i64) {
        self.seed().booklets.insert(
            id,
            Booklet {
                id,
                title: title.to_string(),
                grade,
                owner_id,
            },
        );
    }

    pub fn add_block(
        &self,
        id: i64,
        booklet_id: i64,
        block_order: i32,
        component: &str,
        total_questions: i32,
    ) {
        self.seed().blocks.push(Block {
            id,
            booklet_id,
            block_order,
            component: component.to_string(),
            total_questions,
        });
    }

    /// Binds a question to a slot of a block.
    pub fn bind_question(&self, block_id: i64, slot_order: i32, question_id: i64) {
        let mut tables = self.seed();
        let id = tables.next_id();
        tables.slots.push(QuestionSlot {
            id,
            block_id,
            slot_order,
            question_id,
        });
    }

    /// Adds a question with an optional direct answer key.
    pub fn add_question(&self, id: i64, correct_answer: Option<&str>, owner_id: i64) {
        self.seed().questions.insert(
            id,
            Question {
                id,
                statement: format!("Question {}", id),
                correct_answer: correct_answer.map(str::to_string),
                owner_id,
            },
        );
    }

    /// Appends a legacy alternative; alternatives keep their insertion order.
    pub fn add_alternative(&self, question_id: i64, body: &str, is_correct: bool) -> i64 {
        let mut tables = self.seed();
        let id = tables.next_id();
        tables.alternatives.push(Alternative {
            id,
            question_id,
            body: body.to_string(),
            is_correct,
        });
        id
    }

    pub fn add_student(&self, id: i64, name: &str, owner_id: i64) {
        self.seed().students.insert(
            id,
            Student {
                id,
                name: name.to_string(),
                owner_id,
            },
        );
    }
}

fn matches_key(result: &StudentResult, key: &ResultKey) -> bool {
    result.student_id == key.student_id
        && result.booklet_id == key.booklet_id
        && result.eval_year == key.year
        && result.eval_period == key.period
}

fn collect_responses(tables: &Tables, result: &StudentResult) -> StoredResult {
    let mut responses: Vec<StoredResponse> = tables
        .responses
        .iter()
        .filter(|r| r.result_id == result.id)
        .cloned()
        .collect();
    responses.sort_by_key(|r| (r.block_id, r.slot_order));
    StoredResult {
        result: result.clone(),
        responses,
    }
}

#[async_trait]
impl BookletStructureProvider for MemoryStore {
    async fn booklet_structure(
        &self,
        booklet_id: i64,
    ) -> Result<Option<BookletStructure>, StoreError> {
        let tables = self.lock()?;
        let Some(booklet) = tables.booklets.get(&booklet_id).cloned() else {
            return Ok(None);
        };
        let blocks: Vec<Block> = tables
            .blocks
            .iter()
            .filter(|b| b.booklet_id == booklet_id)
            .cloned()
            .collect();
        let slots: Vec<QuestionSlot> = tables
            .slots
            .iter()
            .filter(|s| blocks.iter().any(|b| b.id == s.block_id))
            .cloned()
            .collect();
        Ok(Some(BookletStructure::assemble(booklet, blocks, slots)))
    }
}

#[async_trait]
impl AnswerKeySource for MemoryStore {
    async fn answer_sources(
        &self,
        question_ids: &[i64],
    ) -> Result<HashMap<i64, AnswerSource>, StoreError> {
        let tables = self.lock()?;
        Ok(question_ids
            .iter()
            .filter_map(|id| tables.questions.get(id))
            .map(|q| {
                let rows = tables
                    .alternatives
                    .iter()
                    .filter(|a| a.question_id == q.id)
                    .cloned()
                    .collect();
                (q.id, AnswerSource::from_rows(q, rows))
            })
            .collect())
    }
}

#[async_trait]
impl StudentDirectory for MemoryStore {
    async fn find_student(&self, student_id: i64) -> Result<Option<Student>, StoreError> {
        Ok(self.lock()?.students.get(&student_id).cloned())
    }

    async fn find_students(
        &self,
        student_ids: &[i64],
    ) -> Result<HashMap<i64, Student>, StoreError> {
        let tables = self.lock()?;
        Ok(student_ids
            .iter()
            .filter_map(|id| tables.students.get(id))
            .map(|s| (s.id, s.clone()))
            .collect())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn replace_result(&self, record: &ResultRecord) -> Result<ResultSnapshot, StoreError> {
        let mut tables = self.lock()?;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }

        let existing = tables
            .results
            .iter()
            .position(|r| matches_key(r, &record.key));
        let result_id = match existing {
            Some(index) => tables.results[index].id,
            None => tables.next_id(),
        };

        let result = StudentResult {
            id: result_id,
            student_id: record.key.student_id,
            booklet_id: record.key.booklet_id,
            owner_id: record.owner_id,
            eval_year: record.key.year,
            eval_period: record.key.period.clone(),
            did_take_exam: record.did_take_exam,
            total_questions: record.total_questions as i32,
            total_correct: record.total_correct as i32,
            percentage: record.percentage,
            recorded_at: Some(chrono::Utc::now()),
        };
        match existing {
            Some(index) => tables.results[index] = result,
            None => tables.results.push(result),
        }

        tables.responses.retain(|r| r.result_id != result_id);
        for response in &record.responses {
            let id = tables.next_id();
            tables.responses.push(StoredResponse {
                id,
                result_id,
                block_id: response.block_id,
                slot_order: response.position.slot as i32,
                question_id: response.question_id,
                marked: response.marked.stored_value(),
                correct_answer: response.correct_answer.map(|l| l.to_string()),
                is_correct: response.is_correct,
            });
        }

        Ok(record.snapshot())
    }

    async fn find_result(&self, key: &ResultKey) -> Result<Option<StoredResult>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .results
            .iter()
            .find(|r| matches_key(r, key))
            .map(|r| collect_responses(&tables, r)))
    }

    async fn list_results(
        &self,
        booklet_id: i64,
        year: i32,
        period: &str,
    ) -> Result<Vec<StoredResult>, StoreError> {
        let tables = self.lock()?;
        let mut results: Vec<StoredResult> = tables
            .results
            .iter()
            .filter(|r| r.booklet_id == booklet_id && r.eval_year == year && r.eval_period == period)
            .map(|r| collect_responses(&tables, r))
            .collect();
        results.sort_by_key(|r| r.result.student_id);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_students_skips_unknown_ids() {
        let store = MemoryStore::new();
        store.add_student(1, "Ana", 10);
        store.add_student(2, "Bruno", 10);

        let found = store.find_students(&[2, 1, 99]).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[&1].name, "Ana");
        assert_eq!(found[&2].name, "Bruno");
        assert!(store.find_students(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_result() {
        let store = MemoryStore::new();
        let key = ResultKey {
            student_id: 1,
            booklet_id: 2,
            year: 2025,
            period: "1".to_string(),
        };
        let record = ResultRecord {
            key: key.clone(),
            owner_id: 10,
            did_take_exam: false,
            total_questions: 0,
            total_correct: 0,
            percentage: 0.0,
            responses: Vec::new(),
        };
        store.replace_result(&record).await.unwrap();

        store.set_fail_writes(true);
        let changed = ResultRecord {
            did_take_exam: true,
            ..record.clone()
        };
        assert!(store.replace_result(&changed).await.is_err());

        let stored = store.find_result(&key).await.unwrap().unwrap();
        assert!(!stored.result.did_take_exam);
    }
}
