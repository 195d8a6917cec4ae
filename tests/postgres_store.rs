// tests/postgres_store.rs

//! Runs against the database named by `DATABASE_URL`; every test returns
//! early when it is unset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use caderno_grading::{
    grading::{Letter, SlotPosition, engine::GradedResponse, normalize::MarkedAnswer},
    models::result::{ResultKey, StoredResult},
    store::{PgStore, ResultRecord, ResultStore},
};
use sqlx::{PgPool, postgres::PgPoolOptions};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Connects and migrates, or `None` when no database is configured.
async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(pool)
}

/// Ids of a freshly inserted teacher, student and booklet with one block of
/// ten slots, each bound to its own question.
struct Fixture {
    owner_id: i64,
    student_id: i64,
    booklet_id: i64,
    block_id: i64,
    question_ids: Vec<i64>,
}

async fn seed(pool: &PgPool) -> Fixture {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let username = format!(
        "store-test-{}-{}",
        nanos,
        SEQUENCE.fetch_add(1, Ordering::SeqCst)
    );

    let owner_id: i64 = sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
        .bind(&username)
        .fetch_one(pool)
        .await
        .unwrap();

    let student_id: i64 =
        sqlx::query_scalar("INSERT INTO students (name, owner_id) VALUES ($1, $2) RETURNING id")
            .bind("Ana Souza")
            .bind(owner_id)
            .fetch_one(pool)
            .await
            .unwrap();

    let booklet_id: i64 = sqlx::query_scalar(
        "INSERT INTO booklets (title, grade, owner_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind("Avaliação diagnóstica")
    .bind(5)
    .bind(owner_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let block_id: i64 = sqlx::query_scalar(
        "INSERT INTO booklet_blocks (booklet_id, block_order, component, total_questions) \
         VALUES ($1, 1, 'Matemática', 10) RETURNING id",
    )
    .bind(booklet_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let mut question_ids = Vec::new();
    for slot in 1..=10 {
        let question_id: i64 = sqlx::query_scalar(
            "INSERT INTO questions (statement, correct_answer, owner_id) \
             VALUES ($1, 'A', $2) RETURNING id",
        )
        .bind(format!("Questão {}", slot))
        .bind(owner_id)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO block_questions (block_id, question_id, slot_order) VALUES ($1, $2, $3)")
            .bind(block_id)
            .bind(question_id)
            .bind(slot)
            .execute(pool)
            .await
            .unwrap();

        question_ids.push(question_id);
    }

    Fixture {
        owner_id,
        student_id,
        booklet_id,
        block_id,
        question_ids,
    }
}

impl Fixture {
    fn key(&self) -> ResultKey {
        ResultKey {
            student_id: self.student_id,
            booklet_id: self.booklet_id,
            year: 2025,
            period: "1".to_string(),
        }
    }

    /// A record answering the first `answered` slots; slot `n` is marked "A"
    /// when `n` is odd and "B" otherwise, against a key of "A".
    fn record(&self, answered: u32) -> ResultRecord {
        let key_letter = Letter::parse("A").unwrap();
        let responses: Vec<GradedResponse> = (1..=answered)
            .map(|slot| {
                let marked = if slot % 2 == 1 { "A" } else { "B" };
                let marked = Letter::parse(marked).unwrap();
                GradedResponse {
                    block_id: self.block_id,
                    position: SlotPosition::new(0, slot),
                    question_id: Some(self.question_ids[(slot - 1) as usize]),
                    marked: MarkedAnswer::Letter(marked),
                    correct_answer: Some(key_letter),
                    is_correct: marked == key_letter,
                }
            })
            .collect();
        let total_correct = responses.iter().filter(|r| r.is_correct).count() as u32;

        ResultRecord {
            key: self.key(),
            owner_id: self.owner_id,
            did_take_exam: true,
            total_questions: answered,
            total_correct,
            percentage: caderno_grading::grading::engine::percentage(total_correct, answered),
            responses,
        }
    }
}

/// Row content without the surrogate ids that change on every insert.
fn row_identity(stored: &StoredResult) -> Vec<(i64, i32, Option<i64>, String, Option<String>, bool)> {
    stored
        .responses
        .iter()
        .map(|r| {
            (
                r.block_id,
                r.slot_order,
                r.question_id,
                r.marked.clone(),
                r.correct_answer.clone(),
                r.is_correct,
            )
        })
        .collect()
}

async fn result_count(pool: &PgPool, key: &ResultKey) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM student_results \
         WHERE student_id = $1 AND booklet_id = $2 AND eval_year = $3 AND eval_period = $4",
    )
    .bind(key.student_id)
    .bind(key.booklet_id)
    .bind(key.year)
    .bind(&key.period)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn repeated_replace_keeps_the_same_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let fixture = seed(&pool).await;
    let store = PgStore::new(pool.clone());
    let record = fixture.record(4);

    store.replace_result(&record).await.unwrap();
    let first = store.find_result(&fixture.key()).await.unwrap().unwrap();
    store.replace_result(&record).await.unwrap();
    let second = store.find_result(&fixture.key()).await.unwrap().unwrap();

    assert_eq!(first.result.id, second.result.id);
    assert_eq!(result_count(&pool, &fixture.key()).await, 1);
    assert_eq!(row_identity(&first), row_identity(&second));
    assert_eq!(second.responses.len(), 4);
    assert_eq!(second.result.total_correct, 2);
    assert_eq!(second.result.percentage, 50.0);
}

#[tokio::test]
async fn replace_drops_rows_missing_from_the_new_submission() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let fixture = seed(&pool).await;
    let store = PgStore::new(pool.clone());

    store.replace_result(&fixture.record(10)).await.unwrap();
    store.replace_result(&fixture.record(3)).await.unwrap();

    let stored = store.find_result(&fixture.key()).await.unwrap().unwrap();
    assert_eq!(stored.responses.len(), 3);
    assert_eq!(stored.result.total_questions, 3);
    assert_eq!(stored.result.total_correct, 2);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student_responses WHERE result_id = $1")
        .bind(stored.result.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 3);
}

#[tokio::test]
async fn failed_replace_leaves_previous_result_intact() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let fixture = seed(&pool).await;
    let store = PgStore::new(pool.clone());

    store.replace_result(&fixture.record(2)).await.unwrap();

    // Two rows for the same slot break the response uniqueness constraint
    // after the aggregate row and the delete already ran.
    let mut broken = fixture.record(5);
    let duplicate = broken.responses[0].clone();
    broken.responses.push(duplicate);
    assert!(store.replace_result(&broken).await.is_err());

    let stored = store.find_result(&fixture.key()).await.unwrap().unwrap();
    assert_eq!(stored.result.total_questions, 2);
    assert_eq!(stored.responses.len(), 2);
}

#[tokio::test]
async fn concurrent_replaces_leave_one_consistent_result() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let fixture = seed(&pool).await;
    let store = PgStore::new(pool.clone());
    let long = fixture.record(10);
    let short = fixture.record(3);

    for _ in 0..5 {
        let (a, b) = tokio::join!(store.replace_result(&long), store.replace_result(&short));
        a.unwrap();
        b.unwrap();

        let stored = store.find_result(&fixture.key()).await.unwrap().unwrap();
        let rows = stored.responses.len() as i32;
        let correct = stored.responses.iter().filter(|r| r.is_correct).count() as i32;

        assert!(rows == 10 || rows == 3);
        assert_eq!(stored.result.total_questions, rows);
        assert_eq!(stored.result.total_correct, correct);
        assert_eq!(result_count(&pool, &fixture.key()).await, 1);
    }
}
