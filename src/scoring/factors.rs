use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::Factor;

/// One factor's accumulated value within one survey's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorSummary {
    /// Factor identifier.
    pub factor_id: String,
    /// Survey the factor belongs to.
    pub survey_id: String,
    /// Factor name, e.g. "Extraversion".
    pub factor_name: String,
    /// Signed accumulated value.
    pub value: i64,
}

/// Factor accumulators grouped per survey.
///
/// Each survey's table is seeded once with every factor the survey declares
/// at zero, so factors never answered still appear in the output. Tallies
/// from different surveys are kept apart, never merged.
#[derive(Debug, Default)]
pub(crate) struct SurveyTallies {
    surveys: BTreeMap<String, SurveyTally>,
}

#[derive(Debug)]
struct SurveyTally {
    factors: Vec<Factor>,
    values: BTreeMap<String, i64>,
}

impl SurveyTallies {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a survey's table has already been seeded.
    pub(crate) fn is_seeded(&self, survey_id: &str) -> bool {
        self.surveys.contains_key(survey_id)
    }

    /// Seed a survey's table with its declared factors at zero.
    pub(crate) fn seed(&mut self, survey_id: &str, factors: Vec<Factor>) {
        let values = factors.iter().map(|factor| (factor.id.clone(), 0)).collect();
        self.surveys
            .insert(survey_id.to_string(), SurveyTally { factors, values });
    }

    /// Fold a signed delta into one factor of one survey's table.
    ///
    /// Deltas referencing a factor the survey never declared are dropped;
    /// scoring over historical data must not fail on stray references.
    pub(crate) fn add(&mut self, survey_id: &str, factor_id: &str, delta: i64) {
        if let Some(tally) = self.surveys.get_mut(survey_id) {
            if let Some(value) = tally.values.get_mut(factor_id) {
                *value += delta;
            }
        }
    }

    /// Flatten every survey's table, factors in declaration order.
    pub(crate) fn summaries(&self) -> Vec<FactorSummary> {
        self.surveys
            .iter()
            .flat_map(|(survey_id, tally)| {
                tally.factors.iter().map(move |factor| FactorSummary {
                    factor_id: factor.id.clone(),
                    survey_id: survey_id.clone(),
                    factor_name: factor.name.clone(),
                    value: *tally.values.get(&factor.id).unwrap_or(&0),
                })
            })
            .collect()
    }
}
