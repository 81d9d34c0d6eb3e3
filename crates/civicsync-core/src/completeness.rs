//! Per-entity data completeness records.
//!
//! The validation job writes one row per tracked entity (e.g. one legislator)
//! with seven dimension flags, a stored percentage and the list of failing
//! fields. Rows arrive as [`RawCompleteness`] and are normalized into
//! [`CompletenessRecord`]; the percentage is taken as stored, never
//! recomputed from the flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Percentage as delivered by the store: numeric columns come back as JSON
/// numbers, `numeric`/`decimal` columns as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPercentage {
    Number(f64),
    Text(String),
}

impl RawPercentage {
    fn to_f64(&self) -> Result<f64, CoreError> {
        let value = match self {
            RawPercentage::Number(n) => *n,
            RawPercentage::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| CoreError::InvalidPercentage(s.clone()))?,
        };
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(CoreError::InvalidPercentage(value.to_string()));
        }
        Ok(value)
    }
}

/// A completeness row exactly as the store returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCompleteness {
    #[serde(alias = "entity_id")]
    pub bioguide_id: String,
    #[serde(default)]
    pub has_basic_info: Option<bool>,
    #[serde(default)]
    pub has_contact_info: Option<bool>,
    #[serde(default)]
    pub has_finance_data: Option<bool>,
    #[serde(default)]
    pub has_committee_data: Option<bool>,
    #[serde(default)]
    pub has_vote_data: Option<bool>,
    #[serde(default)]
    pub has_bills_data: Option<bool>,
    #[serde(default)]
    pub score_valid: Option<bool>,
    #[serde(default)]
    pub completeness_percentage: Option<RawPercentage>,
    #[serde(default)]
    pub missing_fields: Option<Vec<String>>,
    #[serde(default)]
    pub last_validated_at: Option<DateTime<Utc>>,
}

/// Normalized completeness assessment for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessRecord {
    pub has_basic_info: bool,
    pub has_contact_info: bool,
    pub has_finance_data: bool,
    pub has_committee_data: bool,
    pub has_vote_data: bool,
    pub has_bills_data: bool,
    pub score_valid: bool,
    pub completeness_percentage: f64,
    pub missing_fields: Vec<String>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl CompletenessRecord {
    /// Dimension names and flags, in a fixed display order.
    pub fn dimensions(&self) -> [(&'static str, bool); 7] {
        [
            ("basic info", self.has_basic_info),
            ("contact info", self.has_contact_info),
            ("finance data", self.has_finance_data),
            ("committee data", self.has_committee_data),
            ("vote data", self.has_vote_data),
            ("bills data", self.has_bills_data),
            ("score validity", self.score_valid),
        ]
    }

    pub fn passing_dimensions(&self) -> usize {
        self.dimensions().iter().filter(|(_, ok)| *ok).count()
    }

    pub fn is_complete(&self) -> bool {
        self.passing_dimensions() == 7 && self.missing_fields.is_empty()
    }
}

impl TryFrom<RawCompleteness> for CompletenessRecord {
    type Error = CoreError;

    fn try_from(raw: RawCompleteness) -> Result<Self, Self::Error> {
        // A null percentage reads as 0, matching the dashboard's numeric coercion.
        let completeness_percentage = match &raw.completeness_percentage {
            Some(p) => p.to_f64()?,
            None => 0.0,
        };
        Ok(Self {
            has_basic_info: raw.has_basic_info.unwrap_or(false),
            has_contact_info: raw.has_contact_info.unwrap_or(false),
            has_finance_data: raw.has_finance_data.unwrap_or(false),
            has_committee_data: raw.has_committee_data.unwrap_or(false),
            has_vote_data: raw.has_vote_data.unwrap_or(false),
            has_bills_data: raw.has_bills_data.unwrap_or(false),
            score_valid: raw.score_valid.unwrap_or(false),
            completeness_percentage,
            missing_fields: raw.missing_fields.unwrap_or_default(),
            last_validated_at: raw.last_validated_at,
        })
    }
}
