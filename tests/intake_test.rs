//! Integration tests for response intake
//!
//! Covers the (session, user) and (response, question) uniqueness
//! invariants, including under concurrent submissions, and the one-shot
//! start-time rule.

use std::sync::Arc;

use chrono::{Duration, Utc};

use survey_engine::intake::{AnswerDraft, ResponseIntake};
use survey_engine::storage::{
    Exam, ExamSession, Question, QuestionType, SqliteStorage, Storage, Survey,
};
use survey_engine::EngineError;

async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

async fn seed_session(storage: &SqliteStorage) -> ExamSession {
    let exam = Exam::new("author-1", "Exam");
    storage.create_exam(&exam).await.unwrap();
    let start = Utc::now();
    let session = ExamSession::new(&exam.id, start, start + Duration::hours(1));
    storage.create_exam_session(&session).await.unwrap();
    session
}

async fn seed_question(storage: &SqliteStorage) -> Question {
    let survey = Survey::new("author-1", "Survey");
    storage.create_survey(&survey).await.unwrap();
    let synchronizer = survey_engine::sync::QuestionSynchronizer::new(storage.clone());
    let tree = synchronizer
        .create(
            &survey.id,
            survey_engine::sync::QuestionDraft::new("Describe yourself", QuestionType::LongText),
        )
        .await
        .unwrap();
    tree.question
}

#[tokio::test]
async fn test_start_response_and_duplicate_conflict() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let response = intake.start_response(&session.id, "user-1").await.unwrap();
    assert_eq!(response.exam_session_id, session.id);

    let duplicate = intake.start_response(&session.id, "user-1").await;
    assert!(matches!(duplicate, Err(EngineError::Conflict { .. })));

    let stored = storage
        .find_response(&session.id, "user-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, response.id);
}

#[tokio::test]
async fn test_concurrent_duplicate_responses_yield_one_row_one_conflict() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let (first, second) = tokio::join!(
        intake.start_response(&session.id, "user-1"),
        intake.start_response(&session.id, "user-1"),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict { .. })))
        .count();
    assert_eq!(successes, 1, "exactly one create must win");
    assert_eq!(conflicts, 1, "the loser must see a conflict");

    let responses = storage.get_session_responses(&session.id).await.unwrap();
    assert_eq!(responses.len(), 1);
}

#[tokio::test]
async fn test_start_response_unknown_session() {
    let storage = create_test_storage().await;
    let intake = ResponseIntake::new(Arc::new(storage));

    let result = intake.start_response("missing-session", "user-1").await;
    assert!(matches!(
        result,
        Err(EngineError::NotFound { entity: "ExamSession", .. })
    ));
}

#[tokio::test]
async fn test_submit_answer_and_duplicate_conflict() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let question = seed_question(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let response = intake.start_response(&session.id, "user-1").await.unwrap();

    let answer = intake
        .submit_answer(&response.id, AnswerDraft::text(&question.id, "hello"))
        .await
        .unwrap();
    assert_eq!(answer.answer_text, Some("hello".to_string()));
    assert!(answer.score.is_none());

    let duplicate = intake
        .submit_answer(&response.id, AnswerDraft::text(&question.id, "again"))
        .await;
    assert!(matches!(duplicate, Err(EngineError::Conflict { .. })));

    // The original answer is untouched; answers are append-only.
    let stored = storage
        .get_answer(&response.id, &question.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.answer_text, Some("hello".to_string()));
}

#[tokio::test]
async fn test_submit_answer_requires_content() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let response = intake.start_response(&session.id, "user-1").await.unwrap();

    let empty = AnswerDraft {
        question_id: "question-1".to_string(),
        option_id: None,
        answer_text: None,
    };
    let result = intake.submit_answer(&response.id, empty).await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));
}

#[tokio::test]
async fn test_submit_answer_unknown_question() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let response = intake.start_response(&session.id, "user-1").await.unwrap();

    let result = intake
        .submit_answer(&response.id, AnswerDraft::text("missing-question", "hi"))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::NotFound { entity: "Question", .. })
    ));
}

#[tokio::test]
async fn test_record_start_time_once_before_answers() {
    let storage = create_test_storage().await;
    let session = seed_session(&storage).await;
    let question = seed_question(&storage).await;
    let intake = ResponseIntake::new(Arc::new(storage.clone()));

    let response = intake.start_response(&session.id, "user-1").await.unwrap();

    intake
        .record_start_time(&response.id, Utc::now())
        .await
        .unwrap();

    // Second attempt conflicts.
    let again = intake.record_start_time(&response.id, Utc::now()).await;
    assert!(matches!(again, Err(EngineError::Conflict { .. })));

    // And so does any attempt after the first answer.
    let other = intake.start_response(&session.id, "user-2").await.unwrap();
    intake
        .submit_answer(&other.id, AnswerDraft::text(&question.id, "answer"))
        .await
        .unwrap();
    let late = intake.record_start_time(&other.id, Utc::now()).await;
    assert!(matches!(late, Err(EngineError::Conflict { .. })));
}

#[tokio::test]
async fn test_record_start_time_unknown_response() {
    let storage = create_test_storage().await;
    let intake = ResponseIntake::new(Arc::new(storage));

    let result = intake
        .record_start_time("missing-response", Utc::now())
        .await;
    assert!(matches!(
        result,
        Err(EngineError::NotFound { entity: "Response", .. })
    ));
}
