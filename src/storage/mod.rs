//! Storage layer for survey, exam and response persistence.
//!
//! This module defines the entity model (surveys, factors, questions,
//! options, factor impacts, exams, sessions, responses, answers, factor
//! values) and the [`Storage`] trait the engines are written against. The
//! SQLite implementation lives in [`sqlite`].

pub(crate) mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// An authored survey, the root of the content aggregate.
///
/// Once `is_active` is true the content below it (questions, options,
/// factors, impacts) is frozen; mutating calls must re-check the flag
/// inside their own transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    /// Unique survey identifier.
    pub id: String,
    /// Opaque identifier of the authoring user.
    pub author_id: String,
    /// Survey title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Whether the survey is visible outside its author.
    pub is_public: bool,
    /// Activation flag; freezes authored content when true.
    pub is_active: bool,
    /// When the survey was created.
    pub created_at: DateTime<Utc>,
    /// When the survey was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A named psychometric dimension declared by a survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    /// Unique factor identifier.
    pub id: String,
    /// Owning survey ID.
    pub survey_id: String,
    /// Factor name, e.g. "Extraversion".
    pub name: String,
    /// When the factor was created.
    pub created_at: DateTime<Utc>,
}

/// Question type, driving scoring and which children a question may own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// One correct option, scored by the question's point value.
    #[default]
    MultipleChoice,
    /// Free text, exact-match scored; owns no options.
    ShortText,
    /// Free text, exact-match scored; owns no options.
    LongText,
    /// Options carry factor impacts; contributes no points.
    Psychology,
    /// Non-scored opening marker.
    Opening,
    /// Non-scored ending marker.
    Ending,
}

impl QuestionType {
    /// Free-text types own no options.
    pub fn is_text(&self) -> bool {
        matches!(self, QuestionType::ShortText | QuestionType::LongText)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionType::MultipleChoice => write!(f, "multiple_choice"),
            QuestionType::ShortText => write!(f, "short_text"),
            QuestionType::LongText => write!(f, "long_text"),
            QuestionType::Psychology => write!(f, "psychology"),
            QuestionType::Opening => write!(f, "opening"),
            QuestionType::Ending => write!(f, "ending"),
        }
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "short_text" => Ok(QuestionType::ShortText),
            "long_text" => Ok(QuestionType::LongText),
            "psychology" => Ok(QuestionType::Psychology),
            "opening" => Ok(QuestionType::Opening),
            "ending" => Ok(QuestionType::Ending),
            _ => Err(format!("Unknown question type: {}", s)),
        }
    }
}

/// A question within a survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique question identifier.
    pub id: String,
    /// Owning survey ID.
    pub survey_id: String,
    /// Question text shown to respondents.
    pub text: String,
    /// Position within the survey.
    pub order: i64,
    /// Question type.
    pub question_type: QuestionType,
    /// Points awarded for a correct answer.
    pub point: i64,
    /// Expected free-text answer for text types.
    pub correct_answer: Option<String>,
    /// The `order` of the correct option, NOT an option identifier.
    /// Reordering or regenerating options never invalidates this value.
    pub correct_option: Option<i64>,
    /// When the question was created.
    pub created_at: DateTime<Utc>,
    /// When the question was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A selectable option owned by a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Unique option identifier.
    pub id: String,
    /// Owning question ID.
    pub question_id: String,
    /// Option text.
    pub text: String,
    /// Position within the question.
    pub order: i64,
    /// Optional image reference.
    pub image: Option<String>,
    /// When the option was created.
    pub created_at: DateTime<Utc>,
}

/// A signed weight an option contributes to a factor when selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorImpact {
    /// Unique impact identifier.
    pub id: String,
    /// Owning option ID.
    pub option_id: String,
    /// Referenced factor; must belong to the option's question's survey.
    pub factor_id: String,
    /// Direction flag: true adds `impact`, false subtracts it.
    pub plus: bool,
    /// Unsigned magnitude of the contribution.
    pub impact: i64,
    /// When the impact was created.
    pub created_at: DateTime<Utc>,
}

/// A named bundle of surveys offered to respondents via sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    /// Unique exam identifier.
    pub id: String,
    /// Opaque identifier of the authoring user.
    pub author_id: String,
    /// Exam title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Whether the exam is visible outside its author.
    pub is_public: bool,
    /// When the exam was created.
    pub created_at: DateTime<Utc>,
    /// When the exam was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Ordered link from an exam to a shared (not owned) survey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSurvey {
    /// Unique link identifier.
    pub id: String,
    /// Owning exam ID.
    pub exam_id: String,
    /// Referenced survey ID; deleting the exam must not delete the survey.
    pub survey_id: String,
    /// Position of the survey within the exam.
    pub order: i64,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}

/// A scheduled, time-boxed instance of an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSession {
    /// Unique session identifier.
    pub id: String,
    /// Owning exam ID.
    pub exam_id: String,
    /// When the session window opens.
    pub start_time: DateTime<Utc>,
    /// When the session window closes.
    pub end_time: DateTime<Utc>,
    /// Allowed duration in minutes.
    pub duration_minutes: i64,
    /// Whether each question carries its own timer.
    pub per_question_timer: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// One respondent's submission for one exam session.
///
/// Uniqueness per (session, user) is enforced by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Unique response identifier.
    pub id: String,
    /// Owning exam session ID.
    pub exam_session_id: String,
    /// Opaque identifier of the responding user.
    pub user_id: String,
    /// When the respondent started; settable once, before the first answer.
    pub start_time: Option<DateTime<Utc>>,
    /// Cached total score from the last persisted scoring run.
    pub total_score: Option<i64>,
    /// When the response was created.
    pub created_at: DateTime<Utc>,
}

/// One respondent's reply to one question within a response.
///
/// Uniqueness per (response, question) is enforced by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Unique answer identifier.
    pub id: String,
    /// Owning response ID.
    pub response_id: String,
    /// Answered question ID.
    pub question_id: String,
    /// Selected option for option-bearing question types.
    pub option_id: Option<String>,
    /// Free text for text question types.
    pub answer_text: Option<String>,
    /// Persisted score; absence means the answer is unscored.
    pub score: Option<i64>,
    /// When the answer was submitted.
    pub answered_at: DateTime<Utc>,
}

/// Persisted running factor total for one (factor, response) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorValue {
    /// Unique row identifier.
    pub id: String,
    /// Referenced factor ID.
    pub factor_id: String,
    /// Owning response ID.
    pub response_id: String,
    /// Signed running accumulation.
    pub value: i64,
    /// When the value was last updated.
    pub updated_at: DateTime<Utc>,
}

/// An option materialized with its factor impacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionTree {
    /// The option row.
    pub option: QuestionOption,
    /// Impacts owned by the option, in creation order.
    pub impacts: Vec<FactorImpact>,
}

/// A question materialized with its full option/impact tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionTree {
    /// The question row.
    pub question: Question,
    /// Options owned by the question, ordered by their `order` field.
    pub options: Vec<OptionTree>,
}

impl QuestionTree {
    /// Locate the option whose `order` matches the given value.
    pub fn option_by_order(&self, order: i64) -> Option<&QuestionOption> {
        self.options
            .iter()
            .map(|entry| &entry.option)
            .find(|option| option.order == order)
    }
}

/// A score write-back for one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerScoreUpdate {
    /// Answer to write the score to.
    pub answer_id: String,
    /// Computed score.
    pub score: i64,
}

/// A signed delta to fold into one factor's persisted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorDelta {
    /// Factor the delta applies to.
    pub factor_id: String,
    /// Signed contribution.
    pub delta: i64,
}

impl Survey {
    /// Create a new survey owned by the given author
    pub fn new(author_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.into(),
            title: title.into(),
            description: None,
            is_public: false,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the public visibility flag
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Mark the survey active, freezing its authored content
    pub fn activated(mut self) -> Self {
        self.is_active = true;
        self
    }
}

impl Factor {
    /// Create a new factor in a survey
    pub fn new(survey_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            survey_id: survey_id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

impl Question {
    /// Create a new question in a survey
    pub fn new(
        survey_id: impl Into<String>,
        text: impl Into<String>,
        question_type: QuestionType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            survey_id: survey_id.into(),
            text: text.into(),
            order: 0,
            question_type,
            point: 0,
            correct_answer: None,
            correct_option: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the position within the survey
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Set the point value
    pub fn with_point(mut self, point: i64) -> Self {
        self.point = point.max(0);
        self
    }

    /// Set the expected free-text answer
    pub fn with_correct_answer(mut self, answer: impl Into<String>) -> Self {
        self.correct_answer = Some(answer.into());
        self
    }

    /// Set the correct option by its `order` value
    pub fn with_correct_option(mut self, order: i64) -> Self {
        self.correct_option = Some(order);
        self
    }
}

impl QuestionOption {
    /// Create a new option in a question
    pub fn new(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question_id: question_id.into(),
            text: text.into(),
            order: 0,
            image: None,
            created_at: Utc::now(),
        }
    }

    /// Set the position within the question
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Set the image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

impl FactorImpact {
    /// Create a new impact binding an option to a factor
    pub fn new(
        option_id: impl Into<String>,
        factor_id: impl Into<String>,
        plus: bool,
        impact: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            option_id: option_id.into(),
            factor_id: factor_id.into(),
            plus,
            impact: impact.max(0),
            created_at: Utc::now(),
        }
    }

    /// The signed contribution this impact applies when its option is selected.
    pub fn signed(&self) -> i64 {
        if self.plus {
            self.impact
        } else {
            -self.impact
        }
    }
}

impl Exam {
    /// Create a new exam owned by the given author
    pub fn new(author_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.into(),
            title: title.into(),
            description: None,
            is_public: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the public visibility flag
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }
}

impl ExamSurvey {
    /// Link a survey into an exam
    pub fn new(exam_id: impl Into<String>, survey_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.into(),
            survey_id: survey_id.into(),
            order: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the position within the exam
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }
}

impl ExamSession {
    /// Create a new session for an exam
    pub fn new(
        exam_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.into(),
            start_time,
            end_time,
            duration_minutes: 0,
            per_question_timer: false,
            created_at: Utc::now(),
        }
    }

    /// Set the allowed duration in minutes
    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.duration_minutes = minutes.max(0);
        self
    }

    /// Enable the per-question timer
    pub fn with_per_question_timer(mut self) -> Self {
        self.per_question_timer = true;
        self
    }
}

impl Response {
    /// Create a new response for a (session, user) pair
    pub fn new(exam_session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            exam_session_id: exam_session_id.into(),
            user_id: user_id.into(),
            start_time: None,
            total_score: None,
            created_at: Utc::now(),
        }
    }
}

impl Answer {
    /// Create a new answer to a question
    pub fn new(response_id: impl Into<String>, question_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            response_id: response_id.into(),
            question_id: question_id.into(),
            option_id: None,
            answer_text: None,
            score: None,
            answered_at: Utc::now(),
        }
    }

    /// Set the selected option
    pub fn with_option(mut self, option_id: impl Into<String>) -> Self {
        self.option_id = Some(option_id.into());
        self
    }

    /// Set the free-text reply
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.answer_text = Some(text.into());
        self
    }
}

impl FactorValue {
    /// Create a zeroed row for a (factor, response) pair
    pub fn new(factor_id: impl Into<String>, response_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            factor_id: factor_id.into(),
            response_id: response_id.into(),
            value: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Storage trait for database operations.
///
/// Covers the pass-through repository surface (survey, factor, exam,
/// session CRUD) plus the composite reads and transactional writes the
/// engines need. Composite operations listed here are all-or-nothing in
/// every implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Survey operations

    /// Create a new survey.
    async fn create_survey(&self, survey: &Survey) -> StorageResult<()>;
    /// Get a survey by ID.
    async fn get_survey(&self, id: &str) -> StorageResult<Option<Survey>>;
    /// Get all surveys owned by an author.
    async fn get_author_surveys(&self, author_id: &str) -> StorageResult<Vec<Survey>>;
    /// Update an existing survey.
    async fn update_survey(&self, survey: &Survey) -> StorageResult<()>;
    /// Delete a survey by ID.
    async fn delete_survey(&self, id: &str) -> StorageResult<()>;

    // Factor operations

    /// Create a new factor.
    async fn create_factor(&self, factor: &Factor) -> StorageResult<()>;
    /// Get a factor by ID.
    async fn get_factor(&self, id: &str) -> StorageResult<Option<Factor>>;
    /// Get all factors declared by a survey.
    async fn get_survey_factors(&self, survey_id: &str) -> StorageResult<Vec<Factor>>;
    /// Update an existing factor.
    async fn update_factor(&self, factor: &Factor) -> StorageResult<()>;
    /// Delete a factor by ID.
    async fn delete_factor(&self, id: &str) -> StorageResult<()>;

    // Question reads (mutations go through the synchronizer)

    /// Get a question row by ID, without children.
    async fn get_question(&self, id: &str) -> StorageResult<Option<Question>>;
    /// Get a question with its full option/impact tree.
    async fn get_question_tree(&self, id: &str) -> StorageResult<Option<QuestionTree>>;
    /// Get all questions of a survey with their trees, ordered by position.
    async fn get_survey_questions(&self, survey_id: &str) -> StorageResult<Vec<QuestionTree>>;

    // Exam operations

    /// Create a new exam.
    async fn create_exam(&self, exam: &Exam) -> StorageResult<()>;
    /// Get an exam by ID.
    async fn get_exam(&self, id: &str) -> StorageResult<Option<Exam>>;
    /// Get all exams owned by an author.
    async fn get_author_exams(&self, author_id: &str) -> StorageResult<Vec<Exam>>;
    /// Update an existing exam.
    async fn update_exam(&self, exam: &Exam) -> StorageResult<()>;
    /// Delete an exam by ID; its surveys are shared and survive.
    async fn delete_exam(&self, id: &str) -> StorageResult<()>;

    // Exam survey links

    /// Link a survey into an exam.
    async fn create_exam_survey(&self, link: &ExamSurvey) -> StorageResult<()>;
    /// Get an exam's survey links ordered by position.
    async fn get_exam_surveys(&self, exam_id: &str) -> StorageResult<Vec<ExamSurvey>>;
    /// Delete an exam/survey link by ID.
    async fn delete_exam_survey(&self, id: &str) -> StorageResult<()>;

    // Exam session operations

    /// Create a new exam session.
    async fn create_exam_session(&self, session: &ExamSession) -> StorageResult<()>;
    /// Get an exam session by ID.
    async fn get_exam_session(&self, id: &str) -> StorageResult<Option<ExamSession>>;
    /// Get all sessions scheduled for an exam.
    async fn get_exam_sessions(&self, exam_id: &str) -> StorageResult<Vec<ExamSession>>;
    /// Update an existing exam session.
    async fn update_exam_session(&self, session: &ExamSession) -> StorageResult<()>;
    /// Delete an exam session by ID.
    async fn delete_exam_session(&self, id: &str) -> StorageResult<()>;

    // Response operations

    /// Create a new response; a duplicate (session, user) pair surfaces as
    /// [`StorageError::Constraint`](crate::error::StorageError::Constraint).
    async fn create_response(&self, response: &Response) -> StorageResult<()>;
    /// Get a response by ID.
    async fn get_response(&self, id: &str) -> StorageResult<Option<Response>>;
    /// Find the response of a (session, user) pair.
    async fn find_response(
        &self,
        exam_session_id: &str,
        user_id: &str,
    ) -> StorageResult<Option<Response>>;
    /// Get all responses submitted to an exam session.
    async fn get_session_responses(&self, exam_session_id: &str) -> StorageResult<Vec<Response>>;
    /// Set a response's start time; returns false when the response already
    /// started or already has answers. Check and write happen in one statement.
    async fn set_response_start_time(
        &self,
        response_id: &str,
        when: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // Answer operations

    /// Create a new answer; a duplicate (response, question) pair surfaces as
    /// [`StorageError::Constraint`](crate::error::StorageError::Constraint).
    async fn create_answer(&self, answer: &Answer) -> StorageResult<()>;
    /// Find the answer of a (response, question) pair.
    async fn get_answer(
        &self,
        response_id: &str,
        question_id: &str,
    ) -> StorageResult<Option<Answer>>;
    /// Get a response's answers ordered by submission time.
    async fn get_response_answers(&self, response_id: &str) -> StorageResult<Vec<Answer>>;

    // Factor value operations

    /// Get the persisted factor values of a response.
    async fn get_response_factor_values(&self, response_id: &str)
        -> StorageResult<Vec<FactorValue>>;

    // Scoring persistence

    /// Atomically write back answer scores, fold factor deltas into their
    /// `factor_values` rows (creating missing rows at zero first) and cache
    /// the response's total score. All writes commit together or not at all.
    async fn apply_score_results(
        &self,
        response_id: &str,
        scores: &[AnswerScoreUpdate],
        deltas: &[FactorDelta],
        total_score: i64,
    ) -> StorageResult<()>;
}
