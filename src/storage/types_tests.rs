//! Unit tests for storage types and builder patterns.
//!
//! Covers construction, builder methods and the enum round-trips for
//! Survey, Factor, Question, QuestionOption, FactorImpact, Exam,
//! ExamSurvey, ExamSession, Response, Answer and FactorValue.

use chrono::Utc;

use super::*;

// ============================================================================
// Survey tests
// ============================================================================

#[test]
fn test_survey_new() {
    let survey = Survey::new("author-1", "Personality Inventory");
    assert!(!survey.id.is_empty());
    assert_eq!(survey.author_id, "author-1");
    assert_eq!(survey.title, "Personality Inventory");
    assert!(survey.description.is_none());
    assert!(!survey.is_public);
    assert!(!survey.is_active);
}

#[test]
fn test_survey_builders() {
    let survey = Survey::new("author-1", "Quiz")
        .with_description("Weekly quiz")
        .public()
        .activated();
    assert_eq!(survey.description, Some("Weekly quiz".to_string()));
    assert!(survey.is_public);
    assert!(survey.is_active);
}

// ============================================================================
// Factor tests
// ============================================================================

#[test]
fn test_factor_new() {
    let factor = Factor::new("survey-1", "Extraversion");
    assert!(!factor.id.is_empty());
    assert_eq!(factor.survey_id, "survey-1");
    assert_eq!(factor.name, "Extraversion");
}

// ============================================================================
// Question tests
// ============================================================================

#[test]
fn test_question_new() {
    let question = Question::new("survey-1", "Pick one", QuestionType::MultipleChoice);
    assert!(!question.id.is_empty());
    assert_eq!(question.survey_id, "survey-1");
    assert_eq!(question.order, 0);
    assert_eq!(question.point, 0);
    assert!(question.correct_answer.is_none());
    assert!(question.correct_option.is_none());
}

#[test]
fn test_question_builders() {
    let question = Question::new("survey-1", "Capital of France?", QuestionType::ShortText)
        .with_order(3)
        .with_point(10)
        .with_correct_answer("Paris");
    assert_eq!(question.order, 3);
    assert_eq!(question.point, 10);
    assert_eq!(question.correct_answer, Some("Paris".to_string()));
}

#[test]
fn test_question_point_clamped_non_negative() {
    let question =
        Question::new("survey-1", "q", QuestionType::MultipleChoice).with_point(-5);
    assert_eq!(question.point, 0);
}

#[test]
fn test_question_correct_option_is_an_order_value() {
    let question = Question::new("survey-1", "q", QuestionType::MultipleChoice)
        .with_correct_option(2);
    // Stores a position, never an option id.
    assert_eq!(question.correct_option, Some(2));
}

#[test]
fn test_question_type_display_round_trip() {
    for qt in [
        QuestionType::MultipleChoice,
        QuestionType::ShortText,
        QuestionType::LongText,
        QuestionType::Psychology,
        QuestionType::Opening,
        QuestionType::Ending,
    ] {
        let parsed: QuestionType = qt.to_string().parse().unwrap();
        assert_eq!(parsed, qt);
    }
}

#[test]
fn test_question_type_from_str_unknown() {
    let result: Result<QuestionType, _> = "essay".parse();
    assert!(result.is_err());
}

#[test]
fn test_question_type_is_text() {
    assert!(QuestionType::ShortText.is_text());
    assert!(QuestionType::LongText.is_text());
    assert!(!QuestionType::MultipleChoice.is_text());
    assert!(!QuestionType::Psychology.is_text());
    assert!(!QuestionType::Opening.is_text());
}

// ============================================================================
// Option and impact tests
// ============================================================================

#[test]
fn test_option_new() {
    let option = QuestionOption::new("question-1", "Strongly agree")
        .with_order(1)
        .with_image("agree.png");
    assert!(!option.id.is_empty());
    assert_eq!(option.question_id, "question-1");
    assert_eq!(option.order, 1);
    assert_eq!(option.image, Some("agree.png".to_string()));
}

#[test]
fn test_factor_impact_signed() {
    let plus = FactorImpact::new("option-1", "factor-1", true, 5);
    assert_eq!(plus.signed(), 5);

    let minus = FactorImpact::new("option-1", "factor-1", false, 3);
    assert_eq!(minus.signed(), -3);
}

#[test]
fn test_factor_impact_magnitude_clamped() {
    let impact = FactorImpact::new("option-1", "factor-1", true, -4);
    assert_eq!(impact.impact, 0);
    assert_eq!(impact.signed(), 0);
}

// ============================================================================
// Exam composition tests
// ============================================================================

#[test]
fn test_exam_new() {
    let exam = Exam::new("author-1", "Entrance Exam").with_description("Spring intake");
    assert!(!exam.id.is_empty());
    assert_eq!(exam.title, "Entrance Exam");
    assert!(!exam.is_public);
}

#[test]
fn test_exam_survey_link() {
    let link = ExamSurvey::new("exam-1", "survey-1").with_order(2);
    assert_eq!(link.exam_id, "exam-1");
    assert_eq!(link.survey_id, "survey-1");
    assert_eq!(link.order, 2);
}

#[test]
fn test_exam_session_new() {
    let start = Utc::now();
    let end = start + chrono::Duration::hours(2);
    let session = ExamSession::new("exam-1", start, end)
        .with_duration(90)
        .with_per_question_timer();
    assert_eq!(session.exam_id, "exam-1");
    assert_eq!(session.duration_minutes, 90);
    assert!(session.per_question_timer);
}

// ============================================================================
// Response and answer tests
// ============================================================================

#[test]
fn test_response_new() {
    let response = Response::new("session-1", "user-1");
    assert!(!response.id.is_empty());
    assert_eq!(response.exam_session_id, "session-1");
    assert_eq!(response.user_id, "user-1");
    assert!(response.start_time.is_none());
    assert!(response.total_score.is_none());
}

#[test]
fn test_answer_builders() {
    let choice = Answer::new("response-1", "question-1").with_option("option-2");
    assert_eq!(choice.option_id, Some("option-2".to_string()));
    assert!(choice.answer_text.is_none());
    assert!(choice.score.is_none());

    let text = Answer::new("response-1", "question-2").with_text("Paris");
    assert_eq!(text.answer_text, Some("Paris".to_string()));
    assert!(text.option_id.is_none());
}

#[test]
fn test_factor_value_new() {
    let value = FactorValue::new("factor-1", "response-1");
    assert_eq!(value.value, 0);
    assert_eq!(value.factor_id, "factor-1");
    assert_eq!(value.response_id, "response-1");
}

// ============================================================================
// Tree helper tests
// ============================================================================

#[test]
fn test_question_tree_option_by_order() {
    let question = Question::new("survey-1", "q", QuestionType::MultipleChoice);
    let first = QuestionOption::new(&question.id, "a").with_order(1);
    let second = QuestionOption::new(&question.id, "b").with_order(2);
    let second_id = second.id.clone();

    let tree = QuestionTree {
        question,
        options: vec![
            OptionTree {
                option: first,
                impacts: vec![],
            },
            OptionTree {
                option: second,
                impacts: vec![],
            },
        ],
    };

    assert_eq!(tree.option_by_order(2).map(|o| o.id.as_str()), Some(second_id.as_str()));
    assert!(tree.option_by_order(9).is_none());
}
