//! Response scoring and factor aggregation.
//!
//! Computes a per-answer score according to question type and folds the
//! factor impacts of psychology answers into per-survey tables. The pure
//! projection ([`ScoringEngine::score_response`]) never writes; the
//! companion path ([`ScoringEngine::persist_scores`]) writes scores and
//! factor values back atomically and is idempotent per answer.

mod factors;

pub use factors::FactorSummary;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::storage::{
    Answer, AnswerScoreUpdate, FactorDelta, QuestionOption, QuestionTree, QuestionType, Response,
    Storage,
};
use factors::SurveyTallies;

/// An answer paired with its computed score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredAnswer {
    /// The answer row.
    pub answer: Answer,
    /// Effective score: the persisted one when present, else freshly computed.
    pub score: i64,
}

/// A response enriched with scores and per-survey factor tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResponse {
    /// The response row.
    pub response: Response,
    /// Every resolvable answer with its score, in submission order.
    pub answers: Vec<ScoredAnswer>,
    /// Flat factor table across all surveys touched, grouped per survey.
    pub factor_values: Vec<FactorSummary>,
    /// Sum of non-psychology scores.
    pub total_score: i64,
    /// Answers excluded because their question could not be resolved.
    pub skipped_answers: usize,
}

/// Resolve the correct option of a question by its `order` value.
///
/// `correct_option` stores a position on purpose, so reordering or
/// regenerating options never invalidates it. Unset values and positions no
/// option occupies resolve to `None`; neither is an error, the author may
/// simply not have picked a correct answer yet.
pub fn resolve_correct_option(tree: &QuestionTree) -> Option<&QuestionOption> {
    tree.question
        .correct_option
        .and_then(|order| tree.option_by_order(order))
}

/// Score a single answer according to its question's type.
///
/// Scoring runs over historical data and must always produce a result, so
/// every unhandled shape fails closed to zero instead of raising.
pub fn score_answer(tree: &QuestionTree, answer: &Answer) -> i64 {
    match tree.question.question_type {
        QuestionType::MultipleChoice => {
            match (resolve_correct_option(tree), answer.option_id.as_deref()) {
                (Some(correct), Some(selected)) if correct.id == selected => tree.question.point,
                _ => 0,
            }
        }
        QuestionType::ShortText | QuestionType::LongText => {
            // Exact match is a deliberate placeholder; semantic grading of
            // free text is out of scope.
            match (
                tree.question.correct_answer.as_deref(),
                answer.answer_text.as_deref(),
            ) {
                (Some(expected), Some(given)) if expected == given => tree.question.point,
                _ => 0,
            }
        }
        QuestionType::Psychology | QuestionType::Opening | QuestionType::Ending => 0,
    }
}

/// Factor deltas contributed by one answer; empty unless the question is a
/// psychology question with a resolvable selected option.
fn answer_factor_deltas(tree: &QuestionTree, answer: &Answer) -> Vec<FactorDelta> {
    if tree.question.question_type != QuestionType::Psychology {
        return Vec::new();
    }

    let selected = match answer.option_id.as_deref() {
        Some(id) => id,
        None => return Vec::new(),
    };

    tree.options
        .iter()
        .find(|entry| entry.option.id == selected)
        .map(|entry| {
            entry
                .impacts
                .iter()
                .map(|impact| FactorDelta {
                    factor_id: impact.factor_id.clone(),
                    delta: impact.signed(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The walk shared by projection and persistence.
struct Projection {
    scored: ScoredResponse,
    new_scores: Vec<AnswerScoreUpdate>,
    new_deltas: Vec<FactorDelta>,
}

/// Scores responses and aggregates factor values, per survey, across the
/// surveys an exam bundles.
#[derive(Clone)]
pub struct ScoringEngine {
    storage: Arc<dyn Storage>,
}

impl ScoringEngine {
    /// Create a new scoring engine over the given store
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Score a response as a pure read-time projection.
    ///
    /// Answers whose question can no longer be resolved are skipped and
    /// counted, never fatal.
    pub async fn score_response(&self, response_id: &str) -> EngineResult<ScoredResponse> {
        let projection = self.project(response_id).await?;
        Ok(projection.scored)
    }

    /// Score a response and persist the results.
    ///
    /// Writes each unscored answer's score back, folds its factor deltas
    /// into the stored `FactorValue` rows and caches the total, all in one
    /// atomic storage operation. Answers that already carry a persisted
    /// score are left alone, so re-running never double-applies a delta.
    pub async fn persist_scores(&self, response_id: &str) -> EngineResult<ScoredResponse> {
        let projection = self.project(response_id).await?;

        self.storage
            .apply_score_results(
                response_id,
                &projection.new_scores,
                &projection.new_deltas,
                projection.scored.total_score,
            )
            .await?;

        info!(
            response_id = %response_id,
            newly_scored = projection.new_scores.len(),
            total_score = projection.scored.total_score,
            "Response scores persisted"
        );

        Ok(projection.scored)
    }

    /// Score every response of an exam session.
    ///
    /// The session's exam may bundle several surveys; each response's
    /// factor tables stay grouped per survey, never merged across surveys.
    pub async fn score_session(
        &self,
        exam_session_id: &str,
    ) -> EngineResult<Vec<ScoredResponse>> {
        self.storage
            .get_exam_session(exam_session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "ExamSession",
                id: exam_session_id.to_string(),
            })?;

        let responses = self.storage.get_session_responses(exam_session_id).await?;

        let mut scored = Vec::with_capacity(responses.len());
        for response in &responses {
            scored.push(self.score_response(&response.id).await?);
        }

        debug!(
            exam_session_id = %exam_session_id,
            responses = scored.len(),
            "Exam session scored"
        );

        Ok(scored)
    }

    async fn project(&self, response_id: &str) -> EngineResult<Projection> {
        let response = self
            .storage
            .get_response(response_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Response",
                id: response_id.to_string(),
            })?;

        let answers = self.storage.get_response_answers(response_id).await?;

        let mut tallies = SurveyTallies::new();
        let mut scored_answers = Vec::with_capacity(answers.len());
        let mut new_scores = Vec::new();
        let mut new_deltas = Vec::new();
        let mut total_score = 0;
        let mut skipped = 0;

        for answer in answers {
            let tree = match self.storage.get_question_tree(&answer.question_id).await? {
                Some(tree) => tree,
                None => {
                    warn!(
                        response_id = %response_id,
                        question_id = %answer.question_id,
                        "Skipping answer with unresolvable question"
                    );
                    skipped += 1;
                    continue;
                }
            };

            let survey_id = tree.question.survey_id.clone();
            if !tallies.is_seeded(&survey_id) {
                let declared = self.storage.get_survey_factors(&survey_id).await?;
                tallies.seed(&survey_id, declared);
            }

            let computed = score_answer(&tree, &answer);
            let deltas = answer_factor_deltas(&tree, &answer);
            for delta in &deltas {
                tallies.add(&survey_id, &delta.factor_id, delta.delta);
            }

            let effective = answer.score.unwrap_or(computed);
            total_score += effective;

            // Only unscored answers get persisted; a second run over an
            // already-scored answer must not re-apply its deltas.
            if answer.score.is_none() {
                new_scores.push(AnswerScoreUpdate {
                    answer_id: answer.id.clone(),
                    score: computed,
                });
                new_deltas.extend(deltas);
            }

            scored_answers.push(ScoredAnswer {
                answer,
                score: effective,
            });
        }

        Ok(Projection {
            scored: ScoredResponse {
                response,
                answers: scored_answers,
                factor_values: tallies.summaries(),
                total_score,
                skipped_answers: skipped,
            },
            new_scores,
            new_deltas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        Factor, FactorImpact, MockStorage, OptionTree, Question, QuestionOption, QuestionType,
    };

    fn tree_with_options(
        question_type: QuestionType,
        point: i64,
        correct_option: Option<i64>,
        orders: &[i64],
    ) -> QuestionTree {
        let mut question = Question::new("survey-1", "q", question_type).with_point(point);
        question.correct_option = correct_option;

        let options = orders
            .iter()
            .map(|&order| OptionTree {
                option: QuestionOption::new(&question.id, format!("option {}", order))
                    .with_order(order),
                impacts: vec![],
            })
            .collect();

        QuestionTree { question, options }
    }

    #[test]
    fn test_multiple_choice_scored_by_order() {
        let tree = tree_with_options(QuestionType::MultipleChoice, 10, Some(2), &[1, 2, 3]);
        let correct_id = tree.option_by_order(2).unwrap().id.clone();
        let wrong_id = tree.option_by_order(1).unwrap().id.clone();

        let correct = Answer::new("response-1", &tree.question.id).with_option(correct_id);
        assert_eq!(score_answer(&tree, &correct), 10);

        let wrong = Answer::new("response-1", &tree.question.id).with_option(wrong_id);
        assert_eq!(score_answer(&tree, &wrong), 0);
    }

    #[test]
    fn test_multiple_choice_without_correct_option_scores_zero() {
        let tree = tree_with_options(QuestionType::MultipleChoice, 10, None, &[1, 2]);
        let any_id = tree.option_by_order(1).unwrap().id.clone();
        let answer = Answer::new("response-1", &tree.question.id).with_option(any_id);
        assert_eq!(score_answer(&tree, &answer), 0);
    }

    #[test]
    fn test_multiple_choice_dangling_correct_option_scores_zero() {
        // Author points at a position no option occupies; not an error.
        let tree = tree_with_options(QuestionType::MultipleChoice, 10, Some(9), &[1, 2]);
        let any_id = tree.option_by_order(1).unwrap().id.clone();
        let answer = Answer::new("response-1", &tree.question.id).with_option(any_id);
        assert_eq!(score_answer(&tree, &answer), 0);
    }

    #[test]
    fn test_text_answer_exact_match() {
        let mut tree = tree_with_options(QuestionType::ShortText, 5, None, &[]);
        tree.question.correct_answer = Some("Paris".to_string());

        let exact = Answer::new("response-1", &tree.question.id).with_text("Paris");
        assert_eq!(score_answer(&tree, &exact), 5);

        let close = Answer::new("response-1", &tree.question.id).with_text("paris");
        assert_eq!(score_answer(&tree, &close), 0);

        let missing = Answer::new("response-1", &tree.question.id);
        assert_eq!(score_answer(&tree, &missing), 0);
    }

    #[test]
    fn test_marker_types_score_zero() {
        for question_type in [QuestionType::Opening, QuestionType::Ending] {
            let tree = tree_with_options(question_type, 10, None, &[]);
            let answer = Answer::new("response-1", &tree.question.id);
            assert_eq!(score_answer(&tree, &answer), 0);
        }
    }

    #[test]
    fn test_psychology_scores_zero_points_but_yields_deltas() {
        let mut tree = tree_with_options(QuestionType::Psychology, 10, None, &[1]);
        let option_id = tree.options[0].option.id.clone();
        tree.options[0].impacts = vec![
            FactorImpact::new(&option_id, "factor-1", true, 5),
            FactorImpact::new(&option_id, "factor-2", false, 3),
        ];

        let answer = Answer::new("response-1", &tree.question.id).with_option(&option_id);
        assert_eq!(score_answer(&tree, &answer), 0);

        let deltas = answer_factor_deltas(&tree, &answer);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].delta, 5);
        assert_eq!(deltas[1].delta, -3);
    }

    #[test]
    fn test_resolve_correct_option() {
        let tree = tree_with_options(QuestionType::MultipleChoice, 10, Some(3), &[1, 2, 3]);
        let resolved = resolve_correct_option(&tree).unwrap();
        assert_eq!(resolved.order, 3);

        let unset = tree_with_options(QuestionType::MultipleChoice, 10, None, &[1, 2]);
        assert!(resolve_correct_option(&unset).is_none());
    }

    #[tokio::test]
    async fn test_orphaned_answer_is_skipped_not_fatal() {
        let response = Response::new("session-1", "user-1");
        let response_id = response.id.clone();

        let tree = tree_with_options(QuestionType::MultipleChoice, 10, Some(1), &[1]);
        let correct_id = tree.option_by_order(1).unwrap().id.clone();
        let live_question_id = tree.question.id.clone();

        let live_answer =
            Answer::new(&response_id, &live_question_id).with_option(correct_id);
        let orphan_answer = Answer::new(&response_id, "question-deleted");

        let mut storage = MockStorage::new();
        {
            let response = response.clone();
            storage
                .expect_get_response()
                .returning(move |_| Ok(Some(response.clone())));
        }
        {
            let answers = vec![live_answer.clone(), orphan_answer.clone()];
            storage
                .expect_get_response_answers()
                .returning(move |_| Ok(answers.clone()));
        }
        {
            let tree = tree.clone();
            storage.expect_get_question_tree().returning(move |id| {
                if id == tree.question.id {
                    Ok(Some(tree.clone()))
                } else {
                    Ok(None)
                }
            });
        }
        storage
            .expect_get_survey_factors()
            .returning(|_| Ok(vec![]));

        let engine = ScoringEngine::new(Arc::new(storage));
        let scored = engine.score_response(&response_id).await.unwrap();

        assert_eq!(scored.skipped_answers, 1);
        assert_eq!(scored.answers.len(), 1);
        assert_eq!(scored.total_score, 10);
    }

    #[tokio::test]
    async fn test_factor_table_seeded_with_zeroes() {
        let response = Response::new("session-1", "user-1");
        let response_id = response.id.clone();

        let extraversion = Factor::new("survey-1", "Extraversion");

        let mut storage = MockStorage::new();
        {
            let response = response.clone();
            storage
                .expect_get_response()
                .returning(move |_| Ok(Some(response.clone())));
        }
        {
            let mut tree =
                tree_with_options(QuestionType::Psychology, 0, None, &[1]);
            tree.question.survey_id = "survey-1".to_string();
            let answer = Answer::new(&response_id, &tree.question.id);
            let answers = vec![answer];
            storage
                .expect_get_response_answers()
                .returning(move |_| Ok(answers.clone()));
            let tree_clone = tree.clone();
            storage
                .expect_get_question_tree()
                .returning(move |_| Ok(Some(tree_clone.clone())));
        }
        {
            let factors = vec![extraversion.clone()];
            storage
                .expect_get_survey_factors()
                .returning(move |_| Ok(factors.clone()));
        }

        let engine = ScoringEngine::new(Arc::new(storage));
        let scored = engine.score_response(&response_id).await.unwrap();

        // Answer selected no option, yet the declared factor appears at zero.
        assert_eq!(scored.factor_values.len(), 1);
        assert_eq!(scored.factor_values[0].factor_id, extraversion.id);
        assert_eq!(scored.factor_values[0].value, 0);
    }
}
