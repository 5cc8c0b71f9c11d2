//! Content tree synchronizer.
//!
//! Reconciles an author's submitted question, together with its nested
//! options and factor impacts, against the store in one transaction. An
//! update payload may mix edits to existing children with brand-new
//! children; the [`OptionSpec`]/[`ImpactSpec`] sum types make that
//! disambiguation explicit instead of hanging it off an optional id field.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::storage::sqlite::{
    tx_delete_question_tree, tx_get_impact, tx_get_impacts, tx_get_option, tx_get_options,
    tx_get_question, tx_get_survey, tx_insert_impact, tx_insert_option, tx_insert_question,
    tx_survey_factor_ids, tx_update_impact, tx_update_option, tx_update_question, SqliteTx,
};
use crate::storage::{
    FactorImpact, OptionTree, Question, QuestionOption, QuestionTree, QuestionType, SqliteStorage,
    Storage, Survey,
};

/// Payload for creating a question with its nested children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDraft {
    /// Question text.
    pub text: String,
    /// Position within the survey.
    #[serde(default)]
    pub order: i64,
    /// Question type.
    pub question_type: QuestionType,
    /// Points awarded for a correct answer.
    #[serde(default)]
    pub point: i64,
    /// Expected free-text answer for text types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// The `order` of the correct option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<i64>,
    /// Nested option payloads, in input order.
    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

/// Payload for creating one option under a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDraft {
    /// Option text.
    pub text: String,
    /// Position within the question.
    #[serde(default)]
    pub order: i64,
    /// Optional image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Nested impact payloads; only written for psychology questions.
    #[serde(default)]
    pub impacts: Vec<ImpactDraft>,
}

/// Payload for creating one factor impact under an option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactDraft {
    /// Referenced factor; must belong to the question's survey.
    pub factor_id: String,
    /// Direction flag: true adds, false subtracts.
    pub plus: bool,
    /// Unsigned magnitude.
    pub impact: i64,
}

/// Partial update for a question; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionUpdate {
    /// New question text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// New position within the survey.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// New question type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    /// New point value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<i64>,
    /// New expected free-text answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// New correct option `order`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<i64>,
    /// Child entries; each one is either an edit or a create.
    #[serde(default)]
    pub options: Vec<OptionSpec>,
}

/// Partial update for an option; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionPatch {
    /// New option text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// New position within the question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    /// New image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Partial update for a factor impact; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactPatch {
    /// New factor reference; must belong to the question's survey.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor_id: Option<String>,
    /// New direction flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plus: Option<bool>,
    /// New magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<i64>,
}

/// One option entry in an update payload.
///
/// An entry carrying an identifier edits that option; an entry without one
/// creates a new option bound to the question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionSpec {
    /// Edit an existing option; the id must belong to the target question.
    Existing {
        /// Identifier of the option to edit.
        id: String,
        /// Fields to change.
        #[serde(flatten)]
        patch: OptionPatch,
        /// Impact entries, each an edit or a create.
        #[serde(default)]
        impacts: Vec<ImpactSpec>,
    },
    /// Create a new option under the question.
    New(OptionDraft),
}

/// One impact entry in an update payload, edit or create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImpactSpec {
    /// Edit an existing impact; the id must belong to the enclosing option.
    Existing {
        /// Identifier of the impact to edit.
        id: String,
        /// Fields to change.
        #[serde(flatten)]
        patch: ImpactPatch,
    },
    /// Create a new impact under the option.
    New(ImpactDraft),
}

impl QuestionDraft {
    /// Create a new draft with just text and type
    pub fn new(text: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            text: text.into(),
            order: 0,
            question_type,
            point: 0,
            correct_answer: None,
            correct_option: None,
            options: Vec::new(),
        }
    }

    /// Set the position within the survey
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Set the point value
    pub fn with_point(mut self, point: i64) -> Self {
        self.point = point;
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

    /// Append an option payload
    pub fn with_option(mut self, option: OptionDraft) -> Self {
        self.options.push(option);
        self
    }
}

impl OptionDraft {
    /// Create a new option payload
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            order: 0,
            image: None,
            impacts: Vec::new(),
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

    /// Append an impact payload
    pub fn with_impact(mut self, impact: ImpactDraft) -> Self {
        self.impacts.push(impact);
        self
    }
}

impl ImpactDraft {
    /// Create a new impact payload
    pub fn new(factor_id: impl Into<String>, plus: bool, impact: i64) -> Self {
        Self {
            factor_id: factor_id.into(),
            plus,
            impact,
        }
    }
}

/// Atomically reconciles question trees against the store.
///
/// Holds the SQLite store directly: the whole tree is one logical resource
/// per call, and the store's transaction scope is the serialization point.
#[derive(Clone)]
pub struct QuestionSynchronizer {
    storage: SqliteStorage,
}

impl QuestionSynchronizer {
    /// Create a new synchronizer over the given store
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Create a question with its nested options and factor impacts.
    ///
    /// Everything commits together; any failure leaves no partial tree
    /// behind. Returns the materialized tree.
    pub async fn create(
        &self,
        survey_id: &str,
        draft: QuestionDraft,
    ) -> EngineResult<QuestionTree> {
        let mut tx = self.storage.begin().await?;

        let survey = require_unlocked_survey(&mut tx, survey_id).await?;

        if draft.question_type.is_text() && !draft.options.is_empty() {
            return Err(EngineError::Validation {
                field: "options".to_string(),
                reason: format!(
                    "{} questions cannot carry options",
                    draft.question_type
                ),
            });
        }

        let factor_ids = allowed_factors(&mut tx, &survey, draft.question_type).await?;
        if draft.question_type == QuestionType::Psychology {
            for option in &draft.options {
                for impact in &option.impacts {
                    ensure_factor_in_survey(&factor_ids, &impact.factor_id)?;
                }
            }
        }

        let mut question = Question::new(survey_id, draft.text.as_str(), draft.question_type)
            .with_order(draft.order)
            .with_point(draft.point);
        question.correct_answer = draft.correct_answer.clone();
        question.correct_option = draft.correct_option;

        debug!(survey_id = %survey_id, question_id = %question.id, "Creating question tree");
        tx_insert_question(&mut tx, &question).await?;

        let mut options = Vec::new();
        if !question.question_type.is_text() {
            for option_draft in &draft.options {
                let option = insert_option(&mut tx, &question.id, option_draft).await?;
                let mut impacts = Vec::new();
                if question.question_type == QuestionType::Psychology {
                    for impact_draft in &option_draft.impacts {
                        impacts.push(insert_impact(&mut tx, &option.id, impact_draft).await?);
                    }
                }
                options.push(OptionTree { option, impacts });
            }
        }

        commit(tx).await?;

        info!(
            survey_id = %survey_id,
            question_id = %question.id,
            option_count = options.len(),
            "Question tree created"
        );

        Ok(QuestionTree { question, options })
    }

    /// Apply a partial update to a question and reconcile its children.
    ///
    /// Option/impact entries carrying an identifier are edits; entries
    /// without one are creates. Siblings the payload does not mention are
    /// left alone. The returned tree is re-read after commit so it reflects
    /// every current child, touched or not.
    pub async fn update(
        &self,
        question_id: &str,
        update: QuestionUpdate,
    ) -> EngineResult<QuestionTree> {
        let mut tx = self.storage.begin().await?;

        let mut question =
            tx_get_question(&mut tx, question_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    entity: "Question",
                    id: question_id.to_string(),
                })?;
        let survey = require_unlocked_survey(&mut tx, &question.survey_id).await?;

        if let Some(text) = &update.text {
            question.text = text.clone();
        }
        if let Some(order) = update.order {
            question.order = order;
        }
        if let Some(question_type) = update.question_type {
            question.question_type = question_type;
        }
        if let Some(point) = update.point {
            question.point = point.max(0);
        }
        if update.correct_answer.is_some() {
            question.correct_answer = update.correct_answer.clone();
        }
        if update.correct_option.is_some() {
            question.correct_option = update.correct_option;
        }
        question.updated_at = Utc::now();

        tx_update_question(&mut tx, &question).await?;

        // Text types own no options; the payload's child entries are ignored.
        if question.question_type.is_text() {
            commit(tx).await?;
            return self.reconciled_tree(question_id).await;
        }

        let factor_ids = allowed_factors(&mut tx, &survey, question.question_type).await?;
        let is_psychology = question.question_type == QuestionType::Psychology;

        for spec in &update.options {
            match spec {
                OptionSpec::New(option_draft) => {
                    if is_psychology {
                        for impact in &option_draft.impacts {
                            ensure_factor_in_survey(&factor_ids, &impact.factor_id)?;
                        }
                    }
                    let option = insert_option(&mut tx, &question.id, option_draft).await?;
                    if is_psychology {
                        for impact_draft in &option_draft.impacts {
                            insert_impact(&mut tx, &option.id, impact_draft).await?;
                        }
                    }
                }
                OptionSpec::Existing { id, patch, impacts } => {
                    let mut option = tx_get_option(&mut tx, id)
                        .await?
                        .filter(|option| option.question_id == question.id)
                        .ok_or_else(|| EngineError::NotFound {
                            entity: "Option",
                            id: id.clone(),
                        })?;

                    if let Some(text) = &patch.text {
                        option.text = text.clone();
                    }
                    if let Some(order) = patch.order {
                        option.order = order;
                    }
                    if patch.image.is_some() {
                        option.image = patch.image.clone();
                    }
                    tx_update_option(&mut tx, &option).await?;

                    if is_psychology {
                        for impact_spec in impacts {
                            apply_impact_spec(&mut tx, &option.id, impact_spec, &factor_ids)
                                .await?;
                        }
                    }
                }
            }
        }

        commit(tx).await?;

        info!(
            question_id = %question_id,
            entries = update.options.len(),
            "Question tree updated"
        );

        self.reconciled_tree(question_id).await
    }

    /// Delete a question tree in dependency order, children first.
    ///
    /// Returns the pre-delete snapshot for the caller's confirmation.
    pub async fn delete(&self, question_id: &str) -> EngineResult<QuestionTree> {
        let mut tx = self.storage.begin().await?;

        let question =
            tx_get_question(&mut tx, question_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    entity: "Question",
                    id: question_id.to_string(),
                })?;
        require_unlocked_survey(&mut tx, &question.survey_id).await?;

        let mut options = Vec::new();
        for option in tx_get_options(&mut tx, question_id).await? {
            let impacts = tx_get_impacts(&mut tx, &option.id).await?;
            options.push(OptionTree { option, impacts });
        }

        tx_delete_question_tree(&mut tx, question_id).await?;
        commit(tx).await?;

        info!(question_id = %question_id, "Question tree deleted");

        Ok(QuestionTree { question, options })
    }

    /// Re-read the full tree after a committed update.
    async fn reconciled_tree(&self, question_id: &str) -> EngineResult<QuestionTree> {
        self.storage
            .get_question_tree(question_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Question",
                id: question_id.to_string(),
            })
    }
}

/// Fetch the owning survey inside the transaction and reject mutations when
/// it is active. Activation can race with an in-flight edit, so this read
/// must share the mutation's transaction.
async fn require_unlocked_survey(tx: &mut SqliteTx, survey_id: &str) -> EngineResult<Survey> {
    let survey = tx_get_survey(tx, survey_id)
        .await?
        .ok_or_else(|| EngineError::NotFound {
            entity: "Survey",
            id: survey_id.to_string(),
        })?;

    if survey.is_active {
        return Err(EngineError::Permission {
            survey_id: survey_id.to_string(),
        });
    }

    Ok(survey)
}

/// Load the set of factor ids a psychology question may reference.
async fn allowed_factors(
    tx: &mut SqliteTx,
    survey: &Survey,
    question_type: QuestionType,
) -> EngineResult<HashSet<String>> {
    if question_type != QuestionType::Psychology {
        return Ok(HashSet::new());
    }

    Ok(tx_survey_factor_ids(tx, &survey.id)
        .await?
        .into_iter()
        .collect())
}

fn ensure_factor_in_survey(factor_ids: &HashSet<String>, factor_id: &str) -> EngineResult<()> {
    if factor_ids.contains(factor_id) {
        Ok(())
    } else {
        Err(EngineError::Validation {
            field: "factor_id".to_string(),
            reason: format!("factor {} does not belong to the question's survey", factor_id),
        })
    }
}

async fn insert_option(
    tx: &mut SqliteTx,
    question_id: &str,
    draft: &OptionDraft,
) -> EngineResult<QuestionOption> {
    let mut option = QuestionOption::new(question_id, draft.text.as_str()).with_order(draft.order);
    if let Some(image) = &draft.image {
        option = option.with_image(image.as_str());
    }
    tx_insert_option(tx, &option).await?;
    Ok(option)
}

async fn insert_impact(
    tx: &mut SqliteTx,
    option_id: &str,
    draft: &ImpactDraft,
) -> EngineResult<FactorImpact> {
    let impact = FactorImpact::new(option_id, draft.factor_id.as_str(), draft.plus, draft.impact);
    tx_insert_impact(tx, &impact).await?;
    Ok(impact)
}

async fn apply_impact_spec(
    tx: &mut SqliteTx,
    option_id: &str,
    spec: &ImpactSpec,
    factor_ids: &HashSet<String>,
) -> EngineResult<()> {
    match spec {
        ImpactSpec::New(draft) => {
            ensure_factor_in_survey(factor_ids, &draft.factor_id)?;
            insert_impact(tx, option_id, draft).await?;
        }
        ImpactSpec::Existing { id, patch } => {
            let mut impact = tx_get_impact(tx, id)
                .await?
                .filter(|impact| impact.option_id == option_id)
                .ok_or_else(|| EngineError::NotFound {
                    entity: "FactorImpact",
                    id: id.clone(),
                })?;

            if let Some(factor_id) = &patch.factor_id {
                ensure_factor_in_survey(factor_ids, factor_id)?;
                impact.factor_id = factor_id.clone();
            }
            if let Some(plus) = patch.plus {
                impact.plus = plus;
            }
            if let Some(magnitude) = patch.impact {
                impact.impact = magnitude.max(0);
            }
            tx_update_impact(tx, &impact).await?;
        }
    }

    Ok(())
}

/// Commit, translating a failed commit into an atomicity failure.
async fn commit(tx: SqliteTx) -> EngineResult<()> {
    tx.commit().await.map_err(|e| EngineError::Atomicity {
        message: e.to_string(),
    })
}
