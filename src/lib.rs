//! # Survey Engine
//!
//! Backend core for survey/exam authoring and response collection, built
//! around two engines:
//!
//! - **Content tree synchronization**: create/update/delete of a question
//!   together with its nested options and factor impacts as one atomic
//!   unit, with partial updates that mix "edit existing child" and "create
//!   new child" in a single call.
//! - **Response scoring and factor aggregation**: a point score per answer
//!   according to question type, plus signed per-factor totals accumulated
//!   across every psychology answer, grouped per survey even when an exam
//!   bundles several surveys.
//!
//! HTTP routing, authentication and authorization live in the embedding
//! process; this crate works with pre-authorized identifiers only.
//!
//! ## Architecture
//!
//! ```text
//! HTTP/auth layer → Synchronizer / ScoringEngine / ResponseIntake
//!                          ↓
//!                   SQLite (sqlx, one transaction per tree write)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use survey_engine::{Config, QuestionSynchronizer, ResponseIntake, ScoringEngine, SqliteStorage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     survey_engine::config::init_logging(&config.logging);
//!
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let synchronizer = QuestionSynchronizer::new(storage.clone());
//!     let scoring = ScoringEngine::new(Arc::new(storage.clone()));
//!     let intake = ResponseIntake::new(Arc::new(storage));
//!
//!     // wire synchronizer/scoring/intake into the transport layer here
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management and logging setup.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Response and answer intake with uniqueness enforcement.
pub mod intake;
/// Answer scoring and per-survey factor aggregation.
pub mod scoring;
/// Entity model, storage trait and SQLite implementation.
pub mod storage;
/// Atomic question-tree synchronization.
pub mod sync;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use intake::ResponseIntake;
pub use scoring::ScoringEngine;
pub use storage::{SqliteStorage, Storage};
pub use sync::QuestionSynchronizer;
