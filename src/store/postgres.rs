// src/store/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

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

const RESULT_COLUMNS: &str = "id, student_id, booklet_id, owner_id, eval_year, eval_period, \
     did_take_exam, total_questions, total_correct, percentage, recorded_at";

const RESPONSE_COLUMNS: &str =
    "id, result_id, block_id, slot_order, question_id, marked, correct_answer, is_correct";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn responses_of(&self, result_ids: &[i64]) -> Result<Vec<StoredResponse>, StoreError> {
        if result_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM student_responses WHERE result_id IN (",
            RESPONSE_COLUMNS
        ));
        let mut separated = query_builder.separated(",");
        for id in result_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY result_id, block_id, slot_order");

        let rows = query_builder
            .build_query_as::<StoredResponse>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl BookletStructureProvider for PgStore {
    async fn booklet_structure(
        &self,
        booklet_id: i64,
    ) -> Result<Option<BookletStructure>, StoreError> {
        let booklet = sqlx::query_as::<_, Booklet>(
            "SELECT id, title, grade, owner_id FROM booklets WHERE id = $1",
        )
        .bind(booklet_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(booklet) = booklet else {
            return Ok(None);
        };

        let blocks = sqlx::query_as::<_, Block>(
            r#"
            SELECT id, booklet_id, block_order, component, total_questions
            FROM booklet_blocks
            WHERE booklet_id = $1
            ORDER BY block_order
            "#,
        )
        .bind(booklet_id)
        .fetch_all(&self.pool)
        .await?;

        let slots = sqlx::query_as::<_, QuestionSlot>(
            r#"
            SELECT s.id, s.block_id, s.slot_order, s.question_id
            FROM block_questions s
            JOIN booklet_blocks b ON b.id = s.block_id
            WHERE b.booklet_id = $1
            ORDER BY s.block_id, s.slot_order
            "#,
        )
        .bind(booklet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(BookletStructure::assemble(booklet, blocks, slots)))
    }
}

#[async_trait]
impl AnswerKeySource for PgStore {
    async fn answer_sources(
        &self,
        question_ids: &[i64],
    ) -> Result<HashMap<i64, AnswerSource>, StoreError> {
        if question_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(
            "SELECT id, statement, correct_answer, owner_id FROM questions WHERE id IN (",
        );
        let mut separated = query_builder.separated(",");
        for id in question_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let questions: Vec<Question> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut query_builder = QueryBuilder::<Postgres>::new(
            "SELECT id, question_id, body, is_correct FROM alternatives WHERE question_id IN (",
        );
        let mut separated = query_builder.separated(",");
        for id in question_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY question_id, id");
        let alternatives: Vec<Alternative> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut by_question: HashMap<i64, Vec<Alternative>> = HashMap::new();
        for alternative in alternatives {
            by_question
                .entry(alternative.question_id)
                .or_default()
                .push(alternative);
        }

        Ok(questions
            .iter()
            .map(|q| {
                let rows = by_question.remove(&q.id).unwrap_or_default();
                (q.id, AnswerSource::from_rows(q, rows))
            })
            .collect())
    }
}

#[async_trait]
impl StudentDirectory for PgStore {
    async fn find_student(&self, student_id: i64) -> Result<Option<Student>, StoreError> {
        let student =
            sqlx::query_as::<_, Student>("SELECT id, name, owner_id FROM students WHERE id = $1")
                .bind(student_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(student)
    }

    async fn find_students(
        &self,
        student_ids: &[i64],
    ) -> Result<HashMap<i64, Student>, StoreError> {
        if student_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query_builder =
            QueryBuilder::<Postgres>::new("SELECT id, name, owner_id FROM students WHERE id IN (");
        let mut separated = query_builder.separated(",");
        for id in student_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let students: Vec<Student> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        Ok(students.into_iter().map(|s| (s.id, s)).collect())
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn replace_result(&self, record: &ResultRecord) -> Result<ResultSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The upsert locks the result row until commit, so concurrent
        // submissions for the same key run one after the other.
        let result_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO student_results
                (student_id, booklet_id, owner_id, eval_year, eval_period,
                 did_take_exam, total_questions, total_correct, percentage, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CURRENT_TIMESTAMP)
            ON CONFLICT (student_id, booklet_id, eval_year, eval_period) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                did_take_exam = EXCLUDED.did_take_exam,
                total_questions = EXCLUDED.total_questions,
                total_correct = EXCLUDED.total_correct,
                percentage = EXCLUDED.percentage,
                recorded_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
        )
        .bind(record.key.student_id)
        .bind(record.key.booklet_id)
        .bind(record.owner_id)
        .bind(record.key.year)
        .bind(&record.key.period)
        .bind(record.did_take_exam)
        .bind(record.total_questions as i32)
        .bind(record.total_correct as i32)
        .bind(record.percentage)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM student_responses WHERE result_id = $1")
            .bind(result_id)
            .execute(&mut *tx)
            .await?;

        if !record.responses.is_empty() {
            let mut query_builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO student_responses \
                 (result_id, block_id, slot_order, question_id, marked, correct_answer, is_correct) ",
            );
            query_builder.push_values(&record.responses, |mut row, response| {
                row.push_bind(result_id)
                    .push_bind(response.block_id)
                    .push_bind(response.position.slot as i32)
                    .push_bind(response.question_id)
                    .push_bind(response.marked.stored_value())
                    .push_bind(response.correct_answer.map(|l| l.to_string()))
                    .push_bind(response.is_correct);
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(record.snapshot())
    }

    async fn find_result(&self, key: &ResultKey) -> Result<Option<StoredResult>, StoreError> {
        let result = sqlx::query_as::<_, StudentResult>(&format!(
            "SELECT {} FROM student_results \
             WHERE student_id = $1 AND booklet_id = $2 AND eval_year = $3 AND eval_period = $4",
            RESULT_COLUMNS
        ))
        .bind(key.student_id)
        .bind(key.booklet_id)
        .bind(key.year)
        .bind(&key.period)
        .fetch_optional(&self.pool)
        .await?;

        let Some(result) = result else {
            return Ok(None);
        };

        let responses = self.responses_of(&[result.id]).await?;
        Ok(Some(StoredResult { result, responses }))
    }

    async fn list_results(
        &self,
        booklet_id: i64,
        year: i32,
        period: &str,
    ) -> Result<Vec<StoredResult>, StoreError> {
        let results = sqlx::query_as::<_, StudentResult>(&format!(
            "SELECT {} FROM student_results \
             WHERE booklet_id = $1 AND eval_year = $2 AND eval_period = $3 \
             ORDER BY student_id",
            RESULT_COLUMNS
        ))
        .bind(booklet_id)
        .bind(year)
        .bind(period)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = results.iter().map(|r| r.id).collect();
        let mut by_result: HashMap<i64, Vec<StoredResponse>> = HashMap::new();
        for response in self.responses_of(&ids).await? {
            by_result.entry(response.result_id).or_default().push(response);
        }

        Ok(results
            .into_iter()
            .map(|result| {
                let responses = by_result.remove(&result.id).unwrap_or_default();
                StoredResult { result, responses }
            })
            .collect())
    }
}
