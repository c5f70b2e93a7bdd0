//! Scoring result types returned to callers and stored in device history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lowest allowed score.
pub const MIN_SCORE: u8 = 1;
/// Highest allowed score.
pub const MAX_SCORE: u8 = 10;
/// Maximum justification length, in characters.
pub const MAX_JUSTIFICATION_CHARS: usize = 400;

/// Validated nutrition scores for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub general_score: u8,
    pub general_justification: String,
    /// Keyed by health mode wire key (e.g. `diabetesFriendly`).
    #[serde(default)]
    pub health_mode_scores: BTreeMap<String, HealthModeScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<ExtractedFacts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthModeScore {
    pub score: u8,
    pub justification: String,
}

/// Best-effort nutrition facts read off the label. Anything the label does not
/// state clearly is left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_carbs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugars: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<String>,
}
