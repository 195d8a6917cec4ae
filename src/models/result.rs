// src/models/result.rs

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Natural key of a student result: one row per student, booklet and
/// evaluation period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub student_id: i64,
    pub booklet_id: i64,
    pub year: i32,
    pub period: String,
}

/// Represents the 'student_results' table ("resultado do aluno").
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StudentResult {
    pub id: i64,
    pub student_id: i64,
    pub booklet_id: i64,
    pub owner_id: i64,
    pub eval_year: i32,
    pub eval_period: String,
    pub did_take_exam: bool,
    pub total_questions: i32,
    pub total_correct: i32,
    pub percentage: f64,
    pub recorded_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StudentResult {
    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            did_take_exam: self.did_take_exam,
            total_questions: self.total_questions.max(0) as u32,
            total_correct: self.total_correct.max(0) as u32,
            percentage: self.percentage,
        }
    }
}

/// Represents the 'student_responses' table: one graded slot of a result.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StoredResponse {
    pub id: i64,
    pub result_id: i64,
    pub block_id: i64,
    pub slot_order: i32,
    pub question_id: Option<i64>,

    /// "A".."E", "" for blank or "X" for multiple marks.
    pub marked: String,

    /// Key resolved at grading time; `None` when the question had none.
    pub correct_answer: Option<String>,

    pub is_correct: bool,
}

/// A result row together with its response rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub result: StudentResult,
    pub responses: Vec<StoredResponse>,
}

/// Aggregate returned to callers after a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub did_take_exam: bool,
    pub total_questions: u32,
    pub total_correct: u32,
    pub percentage: f64,
}

impl ResultSnapshot {
    pub fn absent() -> Self {
        Self {
            did_take_exam: false,
            total_questions: 0,
            total_correct: 0,
            percentage: 0.0,
        }
    }
}

fn default_status() -> String {
    "pendente".to_string()
}

/// Status value the entry form sends when the student sat the exam.
pub const STATUS_COMPLETED: &str = "concluido";

/// DTO for the manual result-entry form.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualResultRequest {
    pub student_id: i64,
    pub booklet_id: i64,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    #[validate(length(min = 1, max = 50))]
    pub period: String,

    /// "concluido" when the student took the exam, anything else otherwise.
    #[serde(default = "default_status")]
    pub status: String,

    /// Marks keyed by "<block_index>-<slot>" (block index is 0-based).
    #[serde(default)]
    pub answers: HashMap<String, String>,
}

impl ManualResultRequest {
    pub fn did_attempt(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// Content of the QR code printed on each answer sheet.
#[derive(Debug, Deserialize, Validate)]
pub struct QrPayload {
    #[serde(alias = "tipo")]
    #[validate(length(min = 1, max = 50))]
    pub kind: String,
    pub student_id: i64,
    pub booklet_id: i64,
}

/// Marker that identifies QR codes generated by this system.
pub const QR_KIND: &str = "edu_gabarito_qr";

/// One mark read from a scanned sheet. `slot` is the 1-based booklet-wide position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrAnswer {
    #[serde(alias = "questao")]
    pub slot: u32,
    #[serde(alias = "resposta")]
    pub letter: String,
}

/// DTO for a submission decoded from a scanned QR answer sheet.
#[derive(Debug, Deserialize, Validate)]
pub struct QrResultRequest {
    #[validate(nested)]
    pub qr_data: QrPayload,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    #[validate(length(min = 1, max = 50))]
    pub period: String,
    #[validate(length(min = 1, message = "At least one answer is required."))]
    pub answers: Vec<QrAnswer>,
}

/// DTO for importing the output of the automatic sheet processor.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportResultRequest {
    /// Printed booklet code ("007").
    #[serde(alias = "lote")]
    #[validate(length(min = 1, max = 20))]
    pub booklet_code: String,

    /// Printed student registration ("00042").
    #[validate(length(min = 1, max = 20))]
    pub registration: String,

    /// One token list per block: "A".."E", "Blank" or "Multiple:<detail>".
    #[serde(default)]
    pub answers: Vec<Vec<String>>,

    #[serde(alias = "ano_avaliacao")]
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,

    #[serde(alias = "periodo_avaliacao")]
    #[validate(length(min = 1, max = 50))]
    pub period: String,
}

/// Response body of every submission channel.
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub message: String,
    pub result: ResultSnapshot,
}

/// Query parameters for listing a class's results.
#[derive(Debug, Deserialize, Validate)]
pub struct ResultListQuery {
    pub booklet_id: i64,
    pub year: i32,
    #[validate(length(min = 1, max = 50))]
    pub period: String,
    /// Curricular component filter; absent or "Ambos" means every block.
    pub component: Option<String>,
}

/// One student line of the class results listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassResultEntry {
    pub student_id: i64,
    pub student_name: Option<String>,
    pub total_correct: u32,
    /// Declared questions of the listed blocks, the percentage denominator.
    pub total_questions: u32,
    /// Graded response rows of the listed blocks.
    pub answered: u32,
    pub percentage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassResultsResponse {
    pub booklet_id: i64,
    pub component: Option<String>,
    pub total_questions: u32,
    pub students: Vec<ClassResultEntry>,
}

/// Query parameters that complete a natural key given in the path.
#[derive(Debug, Deserialize, Validate)]
pub struct ResultKeyQuery {
    pub year: i32,
    #[validate(length(min = 1, max = 50))]
    pub period: String,
}

/// Per-slot detail of a stored result.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseDetail {
    pub block_index: usize,
    pub slot: u32,
    pub question_id: Option<i64>,
    pub marked: String,
    pub correct_answer: Option<String>,
    pub is_correct: bool,
}

/// Saved answers of one student, shaped for re-populating the entry form.
#[derive(Debug, Serialize, Deserialize)]
pub struct SavedAnswersResponse {
    pub did_take_exam: bool,
    pub result: ResultSnapshot,
    /// Marks keyed by "<block_index>-<slot>".
    pub answers: BTreeMap<String, String>,
    pub responses: Vec<ResponseDetail>,
}
