//! Response intake for live exam sessions.
//!
//! Creates responses and answers while holding the two uniqueness
//! invariants: one response per (session, user) and one answer per
//! (response, question). Both are backed by unique indexes in the store, so
//! concurrent duplicates resolve to exactly one success and one conflict.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::storage::{Answer, Response, Storage};

/// Payload for submitting one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerDraft {
    /// Question being answered.
    pub question_id: String,
    /// Selected option for option-bearing question types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    /// Free text for text question types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
}

impl AnswerDraft {
    /// Create a draft answering by option selection
    pub fn option(question_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            option_id: Some(option_id.into()),
            answer_text: None,
        }
    }

    /// Create a draft answering with free text
    pub fn text(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            option_id: None,
            answer_text: Some(text.into()),
        }
    }
}

/// Accepts respondent submissions during a live exam window.
#[derive(Clone)]
pub struct ResponseIntake {
    storage: Arc<dyn Storage>,
}

impl ResponseIntake {
    /// Create a new intake over the given store
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Open a response for a (session, user) pair.
    ///
    /// A second response for the same pair is a conflict, including under
    /// concurrent requests; the store's unique index is the serialization
    /// point.
    pub async fn start_response(
        &self,
        exam_session_id: &str,
        user_id: &str,
    ) -> EngineResult<Response> {
        self.storage
            .get_exam_session(exam_session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ExamSession",
                id: exam_session_id.to_string(),
            })?;

        let response = Response::new(exam_session_id, user_id);
        match self.storage.create_response(&response).await {
            Ok(()) => {
                info!(
                    exam_session_id = %exam_session_id,
                    response_id = %response.id,
                    "Response opened"
                );
                Ok(response)
            }
            Err(e) => Err(conflict_or_storage(
                e.into(),
                "response already exists for this session and user",
            )),
        }
    }

    /// Record when the respondent actually started.
    ///
    /// Allowed once, and only before the first answer arrives; afterwards
    /// the start time is frozen alongside the answers it contextualizes.
    pub async fn record_start_time(
        &self,
        response_id: &str,
        when: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.storage
            .get_response(response_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Response",
                id: response_id.to_string(),
            })?;

        let updated = self
            .storage
            .set_response_start_time(response_id, when)
            .await?;

        if !updated {
            return Err(EngineError::Conflict {
                message: "start time already set or answers already submitted".to_string(),
            });
        }

        debug!(response_id = %response_id, "Start time recorded");
        Ok(())
    }

    /// Submit one answer into a response.
    ///
    /// A second answer to the same question within the response is a
    /// conflict. Answers are append-only; once stored they are never edited
    /// through intake.
    pub async fn submit_answer(
        &self,
        response_id: &str,
        draft: AnswerDraft,
    ) -> EngineResult<Answer> {
        if draft.option_id.is_none() && draft.answer_text.is_none() {
            return Err(EngineError::Validation {
                field: "answer".to_string(),
                reason: "either an option or free text must be supplied".to_string(),
            });
        }

        self.storage
            .get_response(response_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Response",
                id: response_id.to_string(),
            })?;

        self.storage
            .get_question(&draft.question_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Question",
                id: draft.question_id.clone(),
            })?;

        let mut answer = Answer::new(response_id, draft.question_id.as_str());
        answer.option_id = draft.option_id.clone();
        answer.answer_text = draft.answer_text.clone();

        match self.storage.create_answer(&answer).await {
            Ok(()) => {
                debug!(
                    response_id = %response_id,
                    question_id = %answer.question_id,
                    "Answer recorded"
                );
                Ok(answer)
            }
            Err(e) => Err(conflict_or_storage(
                e.into(),
                "answer already exists for this question",
            )),
        }
    }
}

/// Map a uniqueness violation to a conflict; pass everything else through.
fn conflict_or_storage(err: EngineError, message: &str) -> EngineError {
    if err.is_constraint() {
        EngineError::Conflict {
            message: message.to_string(),
        }
    } else {
        err
    }
}
