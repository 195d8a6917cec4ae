// src/grading/aggregator.rs

use serde::Serialize;

use super::{
    GradingError,
    answer_key::resolve_all,
    engine::{BlockFilter, Diagnostics, grade},
    normalize::SlotResponses,
};
use crate::{
    models::{
        booklet::BookletStructure,
        result::{ResultKey, ResultSnapshot},
    },
    store::{AnswerKeySource, ResultRecord, ResultStore},
};

/// A normalized submission for one result.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub responses: SlotResponses,
    /// `false` when the student did not sit the exam.
    pub did_attempt: bool,
}

impl Submission {
    pub fn attempted(responses: SlotResponses) -> Self {
        Self {
            responses,
            did_attempt: true,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

/// What a caller gets back after recording a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recorded {
    pub snapshot: ResultSnapshot,
    pub diagnostics: Diagnostics,
}

/// Owns the upsert lifecycle of student results.
pub struct ResultAggregator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> ResultAggregator<'a, S>
where
    S: AnswerKeySource + ResultStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Grades `submission` and replaces the stored result of `key` with it.
    ///
    /// Grading runs before any write, so a submission that cannot be graded
    /// leaves the stored result untouched. The replacement itself is a single
    /// atomic store operation; recording the same submission twice yields the
    /// same stored state.
    pub async fn record_submission(
        &self,
        structure: &BookletStructure,
        key: &ResultKey,
        submission: Submission,
    ) -> Result<Recorded, GradingError> {
        if structure.booklet.id != key.booklet_id {
            return Err(GradingError::InvalidInput(format!(
                "structure of booklet {} given for booklet {}",
                structure.booklet.id, key.booklet_id
            )));
        }

        let (record, diagnostics) = if submission.did_attempt {
            let sources = self
                .store
                .answer_sources(&structure.question_ids())
                .await?;
            let keys = resolve_all(&sources);
            let outcome = grade(structure, &keys, &submission.responses, &BlockFilter::All)?;

            let record = ResultRecord {
                key: key.clone(),
                owner_id: structure.booklet.owner_id,
                did_take_exam: true,
                total_questions: outcome.total_questions,
                total_correct: outcome.total_correct,
                percentage: outcome.percentage,
                responses: outcome.responses,
            };
            (record, outcome.diagnostics)
        } else {
            let record = ResultRecord {
                key: key.clone(),
                owner_id: structure.booklet.owner_id,
                did_take_exam: false,
                total_questions: 0,
                total_correct: 0,
                percentage: 0.0,
                responses: Vec::new(),
            };
            (record, Diagnostics::default())
        };

        let snapshot = self.store.replace_result(&record).await.map_err(|e| {
            tracing::error!("Failed to store result {:?}: {}", key, e);
            GradingError::from(e)
        })?;

        if diagnostics.questions_without_key > 0 {
            tracing::warn!(
                booklet_id = key.booklet_id,
                questions_without_key = diagnostics.questions_without_key,
                "Graded questions without an answer key"
            );
        }
        tracing::info!(
            student_id = key.student_id,
            booklet_id = key.booklet_id,
            year = key.year,
            period = %key.period,
            did_take_exam = snapshot.did_take_exam,
            total_correct = snapshot.total_correct,
            total_questions = snapshot.total_questions,
            unfilled_slots = diagnostics.unfilled_slots,
            not_attempted = diagnostics.not_attempted,
            "Result recorded"
        );

        Ok(Recorded {
            snapshot,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grading::{Letter, SlotPosition, normalize::MarkedAnswer},
        store::{BookletStructureProvider, MemoryStore},
    };

    const OWNER: i64 = 1;
    const STUDENT: i64 = 50;
    const BOOKLET: i64 = 5;

    fn key() -> ResultKey {
        ResultKey {
            student_id: STUDENT,
            booklet_id: BOOKLET,
            year: 2025,
            period: "1".to_string(),
        }
    }

    fn mark(c: &str) -> MarkedAnswer {
        MarkedAnswer::Letter(Letter::parse(c).unwrap())
    }

    /// Booklet 5: one block of three slots bound to questions 1 (direct "A"),
    /// 2 (legacy, second alternative correct) and 3 (no correct alternative).
    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_student(STUDENT, "Ana", OWNER);
        store.add_booklet(BOOKLET, "Diagnóstica", 5, OWNER);
        store.add_block(10, BOOKLET, 1, "Matemática", 3);

        store.add_question(1, Some("A"), OWNER);
        store.add_question(2, None, OWNER);
        store.add_alternative(2, "first", false);
        store.add_alternative(2, "second", true);
        store.add_alternative(2, "third", false);
        store.add_question(3, None, OWNER);
        store.add_alternative(3, "first", false);
        store.add_alternative(3, "second", false);

        store.bind_question(10, 1, 1);
        store.bind_question(10, 2, 2);
        store.bind_question(10, 3, 3);
        store
    }

    /// Booklet 6: one block of ten slots, all keyed "A".
    fn ten_slot_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_booklet(6, "Longa", 5, OWNER);
        store.add_block(60, 6, 1, "Português", 10);
        for q in 1..=10 {
            store.add_question(100 + q, Some("A"), OWNER);
            store.bind_question(60, q as i32, 100 + q);
        }
        store
    }

    async fn structure(store: &MemoryStore, booklet_id: i64) -> BookletStructure {
        store.booklet_structure(booklet_id).await.unwrap().unwrap()
    }

    fn answers(marks: &[(u32, MarkedAnswer)]) -> SlotResponses {
        marks
            .iter()
            .map(|(slot, m)| (SlotPosition::new(0, *slot), *m))
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_answer_keys_scenario() {
        let store = seeded_store();
        let structure = structure(&store, BOOKLET).await;
        let submission = Submission::attempted(answers(&[
            (1, mark("A")),
            (2, mark("C")),
            (3, mark("A")),
        ]));

        let recorded = ResultAggregator::new(&store)
            .record_submission(&structure, &key(), submission)
            .await
            .unwrap();

        assert_eq!(recorded.snapshot.total_questions, 3);
        assert_eq!(recorded.snapshot.total_correct, 1);
        assert_eq!(recorded.snapshot.percentage, 33.3);
        assert_eq!(recorded.diagnostics.questions_without_key, 1);

        let stored = store.find_result(&key()).await.unwrap().unwrap();
        assert!(stored.result.did_take_exam);
        assert_eq!(stored.responses.len(), 3);
        assert_eq!(stored.responses[1].correct_answer.as_deref(), Some("B"));
        assert_eq!(stored.responses[2].correct_answer, None);
        assert!(!stored.responses[2].is_correct);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let store = seeded_store();
        let structure = structure(&store, BOOKLET).await;
        let submission = Submission::attempted(answers(&[
            (1, mark("A")),
            (2, MarkedAnswer::Multiple),
            (3, MarkedAnswer::Blank),
        ]));
        let aggregator = ResultAggregator::new(&store);

        let first = aggregator
            .record_submission(&structure, &key(), submission.clone())
            .await
            .unwrap();
        let before = store.find_result(&key()).await.unwrap().unwrap();
        let second = aggregator
            .record_submission(&structure, &key(), submission)
            .await
            .unwrap();
        let after = store.find_result(&key()).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(before.result.id, after.result.id);
        assert_eq!(before.result.snapshot(), after.result.snapshot());

        let identity = |r: &crate::models::result::StoredResponse| {
            (
                r.block_id,
                r.slot_order,
                r.question_id,
                r.marked.clone(),
                r.correct_answer.clone(),
                r.is_correct,
            )
        };
        let before_rows: Vec<_> = before.responses.iter().map(identity).collect();
        let after_rows: Vec<_> = after.responses.iter().map(identity).collect();
        assert_eq!(before_rows, after_rows);
    }

    #[tokio::test]
    async fn test_resubmission_replaces_all_rows() {
        let store = ten_slot_store();
        let structure = structure(&store, 6).await;
        let key = ResultKey {
            booklet_id: 6,
            ..key()
        };
        let aggregator = ResultAggregator::new(&store);

        let all: Vec<(u32, MarkedAnswer)> = (1..=10).map(|s| (s, mark("A"))).collect();
        aggregator
            .record_submission(&structure, &key, Submission::attempted(answers(&all)))
            .await
            .unwrap();
        assert_eq!(store.find_result(&key).await.unwrap().unwrap().responses.len(), 10);

        let recorded = aggregator
            .record_submission(
                &structure,
                &key,
                Submission::attempted(answers(&[(1, mark("A")), (2, mark("B")), (3, mark("A"))])),
            )
            .await
            .unwrap();

        let stored = store.find_result(&key).await.unwrap().unwrap();
        assert_eq!(stored.responses.len(), 3);
        assert_eq!(recorded.snapshot.total_questions, 3);
        assert_eq!(recorded.snapshot.total_correct, 2);
        assert_eq!(stored.result.total_correct, 2);
    }

    #[tokio::test]
    async fn test_absent_student_clears_previous_grading() {
        let store = ten_slot_store();
        let structure = structure(&store, 6).await;
        let key = ResultKey {
            booklet_id: 6,
            ..key()
        };
        let aggregator = ResultAggregator::new(&store);

        let marks: Vec<(u32, MarkedAnswer)> = (1..=10)
            .map(|s| (s, if s <= 5 { mark("A") } else { mark("B") }))
            .collect();
        let graded = aggregator
            .record_submission(&structure, &key, Submission::attempted(answers(&marks)))
            .await
            .unwrap();
        assert_eq!(graded.snapshot.total_correct, 5);
        assert_eq!(graded.snapshot.total_questions, 10);

        let recorded = aggregator
            .record_submission(&structure, &key, Submission::absent())
            .await
            .unwrap();

        assert_eq!(recorded.snapshot, ResultSnapshot::absent());
        let stored = store.find_result(&key).await.unwrap().unwrap();
        assert!(!stored.result.did_take_exam);
        assert_eq!(stored.result.total_questions, 0);
        assert_eq!(stored.result.total_correct, 0);
        assert_eq!(stored.result.percentage, 0.0);
        assert!(stored.responses.is_empty());
    }

    #[tokio::test]
    async fn test_periods_do_not_collide() {
        let store = seeded_store();
        let structure = structure(&store, BOOKLET).await;
        let aggregator = ResultAggregator::new(&store);
        let second_period = ResultKey {
            period: "2".to_string(),
            ..key()
        };

        aggregator
            .record_submission(&structure, &key(), Submission::attempted(answers(&[(1, mark("A"))])))
            .await
            .unwrap();
        aggregator
            .record_submission(&structure, &second_period, Submission::absent())
            .await
            .unwrap();

        let first = store.find_result(&key()).await.unwrap().unwrap();
        let second = store.find_result(&second_period).await.unwrap().unwrap();
        assert_ne!(first.result.id, second.result.id);
        assert_eq!(first.responses.len(), 1);
        assert!(first.result.did_take_exam);
        assert!(!second.result.did_take_exam);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_prior_state() {
        let store = seeded_store();
        let structure = structure(&store, BOOKLET).await;
        let aggregator = ResultAggregator::new(&store);

        aggregator
            .record_submission(&structure, &key(), Submission::attempted(answers(&[(1, mark("A"))])))
            .await
            .unwrap();
        let before = store.find_result(&key()).await.unwrap().unwrap();

        store.set_fail_writes(true);
        let result = aggregator
            .record_submission(&structure, &key(), Submission::absent())
            .await;
        store.set_fail_writes(false);

        assert!(matches!(result, Err(GradingError::Storage(_))));
        let after = store.find_result(&key()).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_booklet_without_blocks_leaves_result_untouched() {
        let store = seeded_store();
        store.add_booklet(9, "Vazio", 5, OWNER);
        let empty = structure(&store, 9).await;
        let key = ResultKey {
            booklet_id: 9,
            ..key()
        };

        let result = ResultAggregator::new(&store)
            .record_submission(&empty, &key, Submission::attempted(SlotResponses::new()))
            .await;

        assert!(matches!(result, Err(GradingError::NoGradableContent(_))));
        assert!(store.find_result(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatched_structure_is_rejected() {
        let store = seeded_store();
        let structure = structure(&store, BOOKLET).await;
        let key = ResultKey {
            booklet_id: 99,
            ..key()
        };

        let result = ResultAggregator::new(&store)
            .record_submission(&structure, &key, Submission::absent())
            .await;
        assert!(matches!(result, Err(GradingError::InvalidInput(_))));
    }
}
