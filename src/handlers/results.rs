// src/handlers/results.rs

use std::collections::{BTreeMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    grading::{
        aggregator::{Recorded, ResultAggregator, Submission},
        engine::{BlockFilter, percentage},
        normalize,
    },
    models::{
        booklet::{BookletStructure, parse_booklet_code},
        result::{
            ClassResultEntry, ClassResultsResponse, ImportResultRequest, ManualResultRequest,
            QR_KIND, QrResultRequest, ResponseDetail, ResultKey, ResultKeyQuery, ResultListQuery,
            ResultSnapshot, SavedAnswersResponse, SubmissionResponse,
        },
        student::{Student, parse_registration},
    },
    state::SharedStore,
    store::{BookletStructureProvider, GradingStore},
    utils::jwt::Claims,
};

/// Loads a booklet's structure and checks it belongs to the caller.
async fn load_owned_booklet(
    store: &dyn GradingStore,
    booklet_id: i64,
    owner_id: i64,
) -> Result<BookletStructure, AppError> {
    let structure = store
        .booklet_structure(booklet_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booklet {} not found", booklet_id)))?;

    if structure.booklet.owner_id != owner_id {
        return Err(AppError::Forbidden("Access denied to booklet".to_string()));
    }
    Ok(structure)
}

async fn load_owned_student(
    store: &dyn GradingStore,
    student_id: i64,
    owner_id: i64,
) -> Result<Student, AppError> {
    let student = store
        .find_student(student_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", student_id)))?;

    if student.owner_id != owner_id {
        return Err(AppError::Forbidden("Access denied to student".to_string()));
    }
    Ok(student)
}

async fn record(
    store: &dyn GradingStore,
    structure: &BookletStructure,
    key: ResultKey,
    submission: Submission,
    channel: &str,
) -> Result<Recorded, AppError> {
    tracing::debug!(
        channel,
        student_id = key.student_id,
        booklet_id = key.booklet_id,
        slots = submission.responses.len(),
        "Recording submission"
    );
    let recorded = ResultAggregator::new(store)
        .record_submission(structure, &key, submission)
        .await?;
    Ok(recorded)
}

fn submission_response(message: &str, recorded: Recorded) -> Json<SubmissionResponse> {
    Json(SubmissionResponse {
        message: message.to_string(),
        result: recorded.snapshot,
    })
}

/// Saves a result typed into the manual entry form.
///
/// * `status != "concluido"` records the student as absent and clears any
///   previous grading.
/// * Otherwise the marks are validated, graded and replace the stored result.
pub async fn save_manual_result(
    State(store): State<SharedStore>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ManualResultRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let owner_id = claims.user_id()?;

    let structure = load_owned_booklet(store.as_ref(), req.booklet_id, owner_id).await?;
    load_owned_student(store.as_ref(), req.student_id, owner_id).await?;

    let submission = if req.did_attempt() {
        Submission::attempted(normalize::from_manual(&structure, &req.answers)?)
    } else {
        Submission::absent()
    };

    let key = ResultKey {
        student_id: req.student_id,
        booklet_id: req.booklet_id,
        year: req.year,
        period: req.period,
    };
    let recorded = record(store.as_ref(), &structure, key, submission, "manual").await?;

    Ok(submission_response("Result saved successfully", recorded))
}

/// Records the marks read from a QR-identified answer sheet.
pub async fn submit_qr_scan(
    State(store): State<SharedStore>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<QrResultRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    if req.qr_data.kind != QR_KIND {
        return Err(AppError::BadRequest(
            "QR code was not generated by this system".to_string(),
        ));
    }
    let owner_id = claims.user_id()?;

    let structure = load_owned_booklet(store.as_ref(), req.qr_data.booklet_id, owner_id).await?;
    load_owned_student(store.as_ref(), req.qr_data.student_id, owner_id).await?;

    let responses = normalize::from_qr(&structure, &req.answers)?;

    let key = ResultKey {
        student_id: req.qr_data.student_id,
        booklet_id: req.qr_data.booklet_id,
        year: req.year,
        period: req.period,
    };
    let recorded = record(
        store.as_ref(),
        &structure,
        key,
        Submission::attempted(responses),
        "qr",
    )
    .await?;

    Ok(submission_response("Result recorded from QR scan", recorded))
}

/// Imports one sheet read by the automatic correction processor.
///
/// The sheet identifies booklet and student by their printed codes.
pub async fn import_sheet_result(
    State(store): State<SharedStore>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ImportResultRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let owner_id = claims.user_id()?;

    let booklet_id = parse_booklet_code(&req.booklet_code).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid booklet code: {}", req.booklet_code))
    })?;
    let student_id = parse_registration(&req.registration).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid registration: {}", req.registration))
    })?;

    let structure = load_owned_booklet(store.as_ref(), booklet_id, owner_id).await?;
    let student = load_owned_student(store.as_ref(), student_id, owner_id).await?;

    let responses = normalize::from_ocr(&structure, &req.answers)?;

    let key = ResultKey {
        student_id,
        booklet_id,
        year: req.year,
        period: req.period,
    };
    let recorded = record(
        store.as_ref(),
        &structure,
        key,
        Submission::attempted(responses),
        "sheet-import",
    )
    .await?;

    Ok(submission_response(
        &format!("Result imported for {}", student.name),
        recorded,
    ))
}

/// Lists the results of a booklet for one evaluation period.
///
/// Correct answers are recounted from the stored response rows of the blocks
/// that match the component filter and scored against the declared question
/// count of those blocks. Students without a taken exam are left out.
pub async fn list_results(
    State(store): State<SharedStore>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ResultListQuery>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let owner_id = claims.user_id()?;

    let structure = load_owned_booklet(store.as_ref(), params.booklet_id, owner_id).await?;

    let filter = BlockFilter::from_param(params.component.as_deref());
    let selected = filter.select(&structure)?;
    let block_ids: HashSet<i64> = selected
        .iter()
        .map(|i| structure.blocks[*i].block.id)
        .collect();
    let declared_total: u32 = selected
        .iter()
        .map(|i| structure.blocks[*i].declared_slots())
        .sum();

    let results = store
        .list_results(params.booklet_id, params.year, &params.period)
        .await?;

    let taken: Vec<_> = results
        .into_iter()
        .filter(|r| r.result.did_take_exam)
        .collect();
    let student_ids: Vec<i64> = taken.iter().map(|r| r.result.student_id).collect();
    let names = store.find_students(&student_ids).await?;

    let mut students = Vec::with_capacity(taken.len());
    for stored in taken {
        let rows: Vec<_> = stored
            .responses
            .iter()
            .filter(|r| block_ids.contains(&r.block_id))
            .collect();
        let total_correct = rows.iter().filter(|r| r.is_correct).count() as u32;

        students.push(ClassResultEntry {
            student_id: stored.result.student_id,
            student_name: names.get(&stored.result.student_id).map(|s| s.name.clone()),
            total_correct,
            total_questions: declared_total,
            answered: rows.len() as u32,
            percentage: percentage(total_correct, declared_total),
        });
    }

    Ok(Json(ClassResultsResponse {
        booklet_id: params.booklet_id,
        component: match filter {
            BlockFilter::All => None,
            BlockFilter::Component(c) => Some(c),
        },
        total_questions: declared_total,
        students,
    }))
}

/// Returns the saved marks of one student, shaped for the entry form.
pub async fn get_student_answers(
    State(store): State<SharedStore>,
    Extension(claims): Extension<Claims>,
    Path((student_id, booklet_id)): Path<(i64, i64)>,
    Query(params): Query<ResultKeyQuery>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let owner_id = claims.user_id()?;

    let structure = load_owned_booklet(store.as_ref(), booklet_id, owner_id).await?;
    load_owned_student(store.as_ref(), student_id, owner_id).await?;

    let key = ResultKey {
        student_id,
        booklet_id,
        year: params.year,
        period: params.period,
    };

    let Some(stored) = store.find_result(&key).await? else {
        return Ok(Json(SavedAnswersResponse {
            did_take_exam: false,
            result: ResultSnapshot::absent(),
            answers: BTreeMap::new(),
            responses: Vec::new(),
        }));
    };

    let mut answers = BTreeMap::new();
    let mut responses = Vec::new();
    for row in &stored.responses {
        let Some(block_index) = structure.block_index(row.block_id) else {
            tracing::warn!(
                "Response {} points at block {} outside booklet {}",
                row.id,
                row.block_id,
                booklet_id
            );
            continue;
        };
        let slot = row.slot_order.max(0) as u32;
        answers.insert(format!("{}-{}", block_index, slot), row.marked.clone());
        responses.push(ResponseDetail {
            block_index,
            slot,
            question_id: row.question_id,
            marked: row.marked.clone(),
            correct_answer: row.correct_answer.clone(),
            is_correct: row.is_correct,
        });
    }
    responses.sort_by_key(|r| (r.block_index, r.slot));

    Ok(Json(SavedAnswersResponse {
        did_take_exam: stored.result.did_take_exam,
        result: stored.result.snapshot(),
        answers,
        responses,
    }))
}

