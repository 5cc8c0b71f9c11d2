use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{
    Answer, AnswerScoreUpdate, Exam, ExamSession, ExamSurvey, Factor, FactorDelta, FactorImpact,
    FactorValue, OptionTree, Question, QuestionOption, QuestionTree, Response, Storage, Survey,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Transaction handle used by the synchronizer's tree operations.
pub(crate) type SqliteTx = sqlx::Transaction<'static, sqlx::Sqlite>;

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory instance for tests.
    ///
    /// An in-memory database lives and dies with its connection, so the pool
    /// is pinned to a single connection that never expires.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                StorageError::Connection {
                    message: format!("Invalid database URL: {}", e),
                }
            })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction for a multi-entity write.
    pub(crate) async fn begin(&self) -> StorageResult<SqliteTx> {
        Ok(self.pool.begin().await?)
    }

    /// Assemble the full option/impact tree under an already-loaded question.
    async fn load_question_tree(&self, question: Question) -> StorageResult<QuestionTree> {
        let option_rows: Vec<OptionRow> = sqlx::query_as(
            r#"
            SELECT id, question_id, text, position, image, created_at
            FROM options
            WHERE question_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(&question.id)
        .fetch_all(&self.pool)
        .await?;

        let impact_rows: Vec<ImpactRow> = sqlx::query_as(
            r#"
            SELECT fi.id, fi.option_id, fi.factor_id, fi.plus, fi.impact, fi.created_at
            FROM factor_impacts fi
            JOIN options o ON fi.option_id = o.id
            WHERE o.question_id = ?
            ORDER BY fi.created_at ASC
            "#,
        )
        .bind(&question.id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_option: std::collections::HashMap<String, Vec<FactorImpact>> =
            std::collections::HashMap::new();
        for row in impact_rows {
            let impact: FactorImpact = row.into();
            by_option
                .entry(impact.option_id.clone())
                .or_default()
                .push(impact);
        }

        let options = option_rows
            .into_iter()
            .map(|row| {
                let option: QuestionOption = row.into();
                let impacts = by_option.remove(&option.id).unwrap_or_default();
                OptionTree { option, impacts }
            })
            .collect();

        Ok(QuestionTree { question, options })
    }
}

/// Translate a unique-index violation into [`StorageError::Constraint`].
fn constraint_or_sqlx(err: sqlx::Error, message: &str) -> StorageError {
    let unique = err
        .as_database_error()
        .map_or(false, |db| db.is_unique_violation());
    if unique {
        StorageError::Constraint {
            message: message.to_string(),
        }
    } else {
        StorageError::Sqlx(err)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_survey(&self, survey: &Survey) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO surveys (id, author_id, title, description, is_public, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&survey.id)
        .bind(&survey.author_id)
        .bind(&survey.title)
        .bind(&survey.description)
        .bind(survey.is_public)
        .bind(survey.is_active)
        .bind(survey.created_at.to_rfc3339())
        .bind(survey.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_survey(&self, id: &str) -> StorageResult<Option<Survey>> {
        let row: Option<SurveyRow> = sqlx::query_as(
            r#"
            SELECT id, author_id, title, description, is_public, is_active, created_at, updated_at
            FROM surveys
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_author_surveys(&self, author_id: &str) -> StorageResult<Vec<Survey>> {
        let rows: Vec<SurveyRow> = sqlx::query_as(
            r#"
            SELECT id, author_id, title, description, is_public, is_active, created_at, updated_at
            FROM surveys
            WHERE author_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_survey(&self, survey: &Survey) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE surveys
            SET title = ?, description = ?, is_public = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&survey.title)
        .bind(&survey.description)
        .bind(survey.is_public)
        .bind(survey.is_active)
        .bind(survey.updated_at.to_rfc3339())
        .bind(&survey.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "Survey",
                id: survey.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_survey(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM surveys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_factor(&self, factor: &Factor) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO factors (id, survey_id, name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&factor.id)
        .bind(&factor.survey_id)
        .bind(&factor.name)
        .bind(factor.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_factor(&self, id: &str) -> StorageResult<Option<Factor>> {
        let row: Option<FactorRow> = sqlx::query_as(
            r#"
            SELECT id, survey_id, name, created_at
            FROM factors
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_survey_factors(&self, survey_id: &str) -> StorageResult<Vec<Factor>> {
        let rows: Vec<FactorRow> = sqlx::query_as(
            r#"
            SELECT id, survey_id, name, created_at
            FROM factors
            WHERE survey_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_factor(&self, factor: &Factor) -> StorageResult<()> {
        let result = sqlx::query("UPDATE factors SET name = ? WHERE id = ?")
            .bind(&factor.name)
            .bind(&factor.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "Factor",
                id: factor.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_factor(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM factors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_question(&self, id: &str) -> StorageResult<Option<Question>> {
        let row: Option<QuestionRow> = sqlx::query_as(QUESTION_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn get_question_tree(&self, id: &str) -> StorageResult<Option<QuestionTree>> {
        let row: Option<QuestionRow> = sqlx::query_as(QUESTION_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_question_tree(row.into()).await?)),
            None => Ok(None),
        }
    }

    async fn get_survey_questions(&self, survey_id: &str) -> StorageResult<Vec<QuestionTree>> {
        let rows: Vec<QuestionRow> = sqlx::query_as(
            r#"
            SELECT id, survey_id, text, position, question_type, point,
                   correct_answer, correct_option, created_at, updated_at
            FROM questions
            WHERE survey_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        let mut trees = Vec::with_capacity(rows.len());
        for row in rows {
            trees.push(self.load_question_tree(row.into()).await?);
        }

        Ok(trees)
    }

    async fn create_exam(&self, exam: &Exam) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exams (id, author_id, title, description, is_public, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exam.id)
        .bind(&exam.author_id)
        .bind(&exam.title)
        .bind(&exam.description)
        .bind(exam.is_public)
        .bind(exam.created_at.to_rfc3339())
        .bind(exam.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_exam(&self, id: &str) -> StorageResult<Option<Exam>> {
        let row: Option<ExamRow> = sqlx::query_as(
            r#"
            SELECT id, author_id, title, description, is_public, created_at, updated_at
            FROM exams
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_author_exams(&self, author_id: &str) -> StorageResult<Vec<Exam>> {
        let rows: Vec<ExamRow> = sqlx::query_as(
            r#"
            SELECT id, author_id, title, description, is_public, created_at, updated_at
            FROM exams
            WHERE author_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_exam(&self, exam: &Exam) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE exams
            SET title = ?, description = ?, is_public = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&exam.title)
        .bind(&exam.description)
        .bind(exam.is_public)
        .bind(exam.updated_at.to_rfc3339())
        .bind(&exam.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "Exam",
                id: exam.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_exam(&self, id: &str) -> StorageResult<()> {
        // Links go with the exam; the surveys they point to are shared and stay.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM exam_surveys WHERE exam_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM exams WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_exam_survey(&self, link: &ExamSurvey) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exam_surveys (id, exam_id, survey_id, position, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&link.id)
        .bind(&link.exam_id)
        .bind(&link.survey_id)
        .bind(link.order)
        .bind(link.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_or_sqlx(e, "survey already linked into exam"))?;

        Ok(())
    }

    async fn get_exam_surveys(&self, exam_id: &str) -> StorageResult<Vec<ExamSurvey>> {
        let rows: Vec<ExamSurveyRow> = sqlx::query_as(
            r#"
            SELECT id, exam_id, survey_id, position, created_at
            FROM exam_surveys
            WHERE exam_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_exam_survey(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM exam_surveys WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_exam_session(&self, session: &ExamSession) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exam_sessions (id, exam_id, start_time, end_time, duration_minutes, per_question_timer, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.exam_id)
        .bind(session.start_time.to_rfc3339())
        .bind(session.end_time.to_rfc3339())
        .bind(session.duration_minutes)
        .bind(session.per_question_timer)
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_exam_session(&self, id: &str) -> StorageResult<Option<ExamSession>> {
        let row: Option<ExamSessionRow> = sqlx::query_as(
            r#"
            SELECT id, exam_id, start_time, end_time, duration_minutes, per_question_timer, created_at
            FROM exam_sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_exam_sessions(&self, exam_id: &str) -> StorageResult<Vec<ExamSession>> {
        let rows: Vec<ExamSessionRow> = sqlx::query_as(
            r#"
            SELECT id, exam_id, start_time, end_time, duration_minutes, per_question_timer, created_at
            FROM exam_sessions
            WHERE exam_id = ?
            ORDER BY start_time ASC
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_exam_session(&self, session: &ExamSession) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET start_time = ?, end_time = ?, duration_minutes = ?, per_question_timer = ?
            WHERE id = ?
            "#,
        )
        .bind(session.start_time.to_rfc3339())
        .bind(session.end_time.to_rfc3339())
        .bind(session.duration_minutes)
        .bind(session.per_question_timer)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "ExamSession",
                id: session.id.clone(),
            });
        }

        Ok(())
    }

    async fn delete_exam_session(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM exam_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_response(&self, response: &Response) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO responses (id, exam_session_id, user_id, start_time, total_score, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&response.id)
        .bind(&response.exam_session_id)
        .bind(&response.user_id)
        .bind(response.start_time.map(|t| t.to_rfc3339()))
        .bind(response.total_score)
        .bind(response.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_or_sqlx(e, "response already exists for this session and user"))?;

        Ok(())
    }

    async fn get_response(&self, id: &str) -> StorageResult<Option<Response>> {
        let row: Option<ResponseRow> = sqlx::query_as(
            r#"
            SELECT id, exam_session_id, user_id, start_time, total_score, created_at
            FROM responses
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_response(
        &self,
        exam_session_id: &str,
        user_id: &str,
    ) -> StorageResult<Option<Response>> {
        let row: Option<ResponseRow> = sqlx::query_as(
            r#"
            SELECT id, exam_session_id, user_id, start_time, total_score, created_at
            FROM responses
            WHERE exam_session_id = ? AND user_id = ?
            "#,
        )
        .bind(exam_session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_session_responses(&self, exam_session_id: &str) -> StorageResult<Vec<Response>> {
        let rows: Vec<ResponseRow> = sqlx::query_as(
            r#"
            SELECT id, exam_session_id, user_id, start_time, total_score, created_at
            FROM responses
            WHERE exam_session_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(exam_session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_response_start_time(
        &self,
        response_id: &str,
        when: DateTime<Utc>,
    ) -> StorageResult<bool> {
        // Guard and write in one statement so the "before the first answer"
        // rule cannot race with a concurrent submission.
        let result = sqlx::query(
            r#"
            UPDATE responses
            SET start_time = ?
            WHERE id = ?
              AND start_time IS NULL
              AND NOT EXISTS (SELECT 1 FROM answers WHERE response_id = ?)
            "#,
        )
        .bind(when.to_rfc3339())
        .bind(response_id)
        .bind(response_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_answer(&self, answer: &Answer) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO answers (id, response_id, question_id, option_id, answer_text, score, answered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&answer.id)
        .bind(&answer.response_id)
        .bind(&answer.question_id)
        .bind(&answer.option_id)
        .bind(&answer.answer_text)
        .bind(answer.score)
        .bind(answer.answered_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_or_sqlx(e, "answer already exists for this question"))?;

        Ok(())
    }

    async fn get_answer(
        &self,
        response_id: &str,
        question_id: &str,
    ) -> StorageResult<Option<Answer>> {
        let row: Option<AnswerRow> = sqlx::query_as(
            r#"
            SELECT id, response_id, question_id, option_id, answer_text, score, answered_at
            FROM answers
            WHERE response_id = ? AND question_id = ?
            "#,
        )
        .bind(response_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_response_answers(&self, response_id: &str) -> StorageResult<Vec<Answer>> {
        let rows: Vec<AnswerRow> = sqlx::query_as(
            r#"
            SELECT id, response_id, question_id, option_id, answer_text, score, answered_at
            FROM answers
            WHERE response_id = ?
            ORDER BY answered_at ASC
            "#,
        )
        .bind(response_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_response_factor_values(
        &self,
        response_id: &str,
    ) -> StorageResult<Vec<FactorValue>> {
        let rows: Vec<FactorValueRow> = sqlx::query_as(
            r#"
            SELECT id, factor_id, response_id, value, updated_at
            FROM factor_values
            WHERE response_id = ?
            "#,
        )
        .bind(response_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn apply_score_results(
        &self,
        response_id: &str,
        scores: &[AnswerScoreUpdate],
        deltas: &[FactorDelta],
        total_score: i64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for update in scores {
            sqlx::query("UPDATE answers SET score = ? WHERE id = ?")
                .bind(update.score)
                .bind(&update.answer_id)
                .execute(&mut *tx)
                .await?;
        }

        for delta in deltas {
            // Seed the row at zero on first encounter, then fold the delta in.
            let seed = FactorValue::new(&delta.factor_id, response_id);
            sqlx::query(
                r#"
                INSERT INTO factor_values (id, factor_id, response_id, value, updated_at)
                VALUES (?, ?, ?, 0, ?)
                ON CONFLICT (factor_id, response_id) DO NOTHING
                "#,
            )
            .bind(&seed.id)
            .bind(&seed.factor_id)
            .bind(&seed.response_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE factor_values
                SET value = value + ?, updated_at = ?
                WHERE factor_id = ? AND response_id = ?
                "#,
            )
            .bind(delta.delta)
            .bind(&now)
            .bind(&delta.factor_id)
            .bind(response_id)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query("UPDATE responses SET total_score = ? WHERE id = ?")
            .bind(total_score)
            .bind(response_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "Response",
                id: response_id.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

const QUESTION_BY_ID: &str = r#"
    SELECT id, survey_id, text, position, question_type, point,
           correct_answer, correct_option, created_at, updated_at
    FROM questions
    WHERE id = ?
"#;

// ============================================================================
// Transaction helpers for the synchronizer's tree operations
// ============================================================================

pub(crate) async fn tx_get_survey(tx: &mut SqliteTx, id: &str) -> StorageResult<Option<Survey>> {
    let row: Option<SurveyRow> = sqlx::query_as(
        r#"
        SELECT id, author_id, title, description, is_public, is_active, created_at, updated_at
        FROM surveys
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(Into::into))
}

pub(crate) async fn tx_survey_factor_ids(
    tx: &mut SqliteTx,
    survey_id: &str,
) -> StorageResult<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM factors WHERE survey_id = ?")
        .bind(survey_id)
        .fetch_all(&mut **tx)
        .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn tx_get_question(
    tx: &mut SqliteTx,
    id: &str,
) -> StorageResult<Option<Question>> {
    let row: Option<QuestionRow> = sqlx::query_as(QUESTION_BY_ID)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(row.map(Into::into))
}

pub(crate) async fn tx_insert_question(tx: &mut SqliteTx, question: &Question) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO questions (id, survey_id, text, position, question_type, point,
                               correct_answer, correct_option, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&question.id)
    .bind(&question.survey_id)
    .bind(&question.text)
    .bind(question.order)
    .bind(question.question_type.to_string())
    .bind(question.point)
    .bind(&question.correct_answer)
    .bind(question.correct_option)
    .bind(question.created_at.to_rfc3339())
    .bind(question.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub(crate) async fn tx_update_question(tx: &mut SqliteTx, question: &Question) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE questions
        SET text = ?, position = ?, question_type = ?, point = ?,
            correct_answer = ?, correct_option = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&question.text)
    .bind(question.order)
    .bind(question.question_type.to_string())
    .bind(question.point)
    .bind(&question.correct_answer)
    .bind(question.correct_option)
    .bind(question.updated_at.to_rfc3339())
    .bind(&question.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::RowNotFound {
            entity: "Question",
            id: question.id.clone(),
        });
    }

    Ok(())
}

pub(crate) async fn tx_get_option(
    tx: &mut SqliteTx,
    id: &str,
) -> StorageResult<Option<QuestionOption>> {
    let row: Option<OptionRow> = sqlx::query_as(
        r#"
        SELECT id, question_id, text, position, image, created_at
        FROM options
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(Into::into))
}

pub(crate) async fn tx_get_options(
    tx: &mut SqliteTx,
    question_id: &str,
) -> StorageResult<Vec<QuestionOption>> {
    let rows: Vec<OptionRow> = sqlx::query_as(
        r#"
        SELECT id, question_id, text, position, image, created_at
        FROM options
        WHERE question_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(question_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub(crate) async fn tx_insert_option(
    tx: &mut SqliteTx,
    option: &QuestionOption,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO options (id, question_id, text, position, image, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&option.id)
    .bind(&option.question_id)
    .bind(&option.text)
    .bind(option.order)
    .bind(&option.image)
    .bind(option.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub(crate) async fn tx_update_option(
    tx: &mut SqliteTx,
    option: &QuestionOption,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE options
        SET text = ?, position = ?, image = ?
        WHERE id = ?
        "#,
    )
    .bind(&option.text)
    .bind(option.order)
    .bind(&option.image)
    .bind(&option.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::RowNotFound {
            entity: "Option",
            id: option.id.clone(),
        });
    }

    Ok(())
}

pub(crate) async fn tx_get_impact(
    tx: &mut SqliteTx,
    id: &str,
) -> StorageResult<Option<FactorImpact>> {
    let row: Option<ImpactRow> = sqlx::query_as(
        r#"
        SELECT id, option_id, factor_id, plus, impact, created_at
        FROM factor_impacts
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(Into::into))
}

pub(crate) async fn tx_get_impacts(
    tx: &mut SqliteTx,
    option_id: &str,
) -> StorageResult<Vec<FactorImpact>> {
    let rows: Vec<ImpactRow> = sqlx::query_as(
        r#"
        SELECT id, option_id, factor_id, plus, impact, created_at
        FROM factor_impacts
        WHERE option_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(option_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub(crate) async fn tx_insert_impact(
    tx: &mut SqliteTx,
    impact: &FactorImpact,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO factor_impacts (id, option_id, factor_id, plus, impact, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&impact.id)
    .bind(&impact.option_id)
    .bind(&impact.factor_id)
    .bind(impact.plus)
    .bind(impact.impact)
    .bind(impact.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub(crate) async fn tx_update_impact(
    tx: &mut SqliteTx,
    impact: &FactorImpact,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE factor_impacts
        SET factor_id = ?, plus = ?, impact = ?
        WHERE id = ?
        "#,
    )
    .bind(&impact.factor_id)
    .bind(impact.plus)
    .bind(impact.impact)
    .bind(&impact.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::RowNotFound {
            entity: "FactorImpact",
            id: impact.id.clone(),
        });
    }

    Ok(())
}

/// Delete a question's children, then the question itself, in dependency order.
pub(crate) async fn tx_delete_question_tree(
    tx: &mut SqliteTx,
    question_id: &str,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        DELETE FROM factor_impacts
        WHERE option_id IN (SELECT id FROM options WHERE question_id = ?)
        "#,
    )
    .bind(question_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM options WHERE question_id = ?")
        .bind(question_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(question_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

// Internal row types for SQLx mapping

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct SurveyRow {
    id: String,
    author_id: String,
    title: String,
    description: Option<String>,
    is_public: bool,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl From<SurveyRow> for Survey {
    fn from(row: SurveyRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            description: row.description,
            is_public: row.is_public,
            is_active: row.is_active,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FactorRow {
    id: String,
    survey_id: String,
    name: String,
    created_at: String,
}

impl From<FactorRow> for Factor {
    fn from(row: FactorRow) -> Self {
        Self {
            id: row.id,
            survey_id: row.survey_id,
            name: row.name,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: String,
    survey_id: String,
    text: String,
    position: i64,
    question_type: String,
    point: i64,
    correct_answer: Option<String>,
    correct_option: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            survey_id: row.survey_id,
            text: row.text,
            order: row.position,
            question_type: row.question_type.parse().unwrap_or_default(),
            point: row.point,
            correct_answer: row.correct_answer,
            correct_option: row.correct_option,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: String,
    question_id: String,
    text: String,
    position: i64,
    image: Option<String>,
    created_at: String,
}

impl From<OptionRow> for QuestionOption {
    fn from(row: OptionRow) -> Self {
        Self {
            id: row.id,
            question_id: row.question_id,
            text: row.text,
            order: row.position,
            image: row.image,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImpactRow {
    id: String,
    option_id: String,
    factor_id: String,
    plus: bool,
    impact: i64,
    created_at: String,
}

impl From<ImpactRow> for FactorImpact {
    fn from(row: ImpactRow) -> Self {
        Self {
            id: row.id,
            option_id: row.option_id,
            factor_id: row.factor_id,
            plus: row.plus,
            impact: row.impact,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExamRow {
    id: String,
    author_id: String,
    title: String,
    description: Option<String>,
    is_public: bool,
    created_at: String,
    updated_at: String,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            description: row.description,
            is_public: row.is_public,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExamSurveyRow {
    id: String,
    exam_id: String,
    survey_id: String,
    position: i64,
    created_at: String,
}

impl From<ExamSurveyRow> for ExamSurvey {
    fn from(row: ExamSurveyRow) -> Self {
        Self {
            id: row.id,
            exam_id: row.exam_id,
            survey_id: row.survey_id,
            order: row.position,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExamSessionRow {
    id: String,
    exam_id: String,
    start_time: String,
    end_time: String,
    duration_minutes: i64,
    per_question_timer: bool,
    created_at: String,
}

impl From<ExamSessionRow> for ExamSession {
    fn from(row: ExamSessionRow) -> Self {
        Self {
            id: row.id,
            exam_id: row.exam_id,
            start_time: parse_ts(&row.start_time),
            end_time: parse_ts(&row.end_time),
            duration_minutes: row.duration_minutes,
            per_question_timer: row.per_question_timer,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResponseRow {
    id: String,
    exam_session_id: String,
    user_id: String,
    start_time: Option<String>,
    total_score: Option<i64>,
    created_at: String,
}

impl From<ResponseRow> for Response {
    fn from(row: ResponseRow) -> Self {
        Self {
            id: row.id,
            exam_session_id: row.exam_session_id,
            user_id: row.user_id,
            start_time: row.start_time.as_deref().map(parse_ts),
            total_score: row.total_score,
            created_at: parse_ts(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AnswerRow {
    id: String,
    response_id: String,
    question_id: String,
    option_id: Option<String>,
    answer_text: Option<String>,
    score: Option<i64>,
    answered_at: String,
}

impl From<AnswerRow> for Answer {
    fn from(row: AnswerRow) -> Self {
        Self {
            id: row.id,
            response_id: row.response_id,
            question_id: row.question_id,
            option_id: row.option_id,
            answer_text: row.answer_text,
            score: row.score,
            answered_at: parse_ts(&row.answered_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FactorValueRow {
    id: String,
    factor_id: String,
    response_id: String,
    value: i64,
    updated_at: String,
}

impl From<FactorValueRow> for FactorValue {
    fn from(row: FactorValueRow) -> Self {
        Self {
            id: row.id,
            factor_id: row.factor_id,
            response_id: row.response_id,
            value: row.value,
            updated_at: parse_ts(&row.updated_at),
        }
    }
}
