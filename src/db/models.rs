use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub run_code: String,
    pub seed: Option<String>,
    pub deck: String,
    pub stake: String,
    pub final_ante: i64,
    pub final_score: Option<i64>,  // Derived: MAX(best_hand_score) over rounds once any exist
    pub won: bool,
    pub endless_ante: Option<i64>,
    pub status: RunStatus,
    pub notes: Option<String>,
    pub progress: Option<String>,  // Free-text progress label shown for losses
    pub hands_played: i64,
    pub discards_used: i64,
    pub purchases: i64,
    pub joker_count: i64,          // Refreshed on joker insert
    pub rule_decisions: i64,
    pub llm_decisions: i64,
    pub duration_seconds: Option<i64>,
    pub llm_cost_usd: Option<f64>,
    pub llm_model: Option<String>,
    pub strategy_id: Option<i64>,
    pub played_at: Option<i64>,    // Epoch millis
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: i64,
    pub run_id: i64,
    pub ante: i64,
    pub blind_type: String,
    pub boss_name: Option<String>,
    pub target_score: Option<i64>,
    pub best_hand_score: Option<i64>,
    pub hands_played: Option<i64>,
    pub discards_used: Option<i64>,
    pub skipped: bool,
    pub money_after: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joker {
    pub id: i64,
    pub run_id: i64,
    pub name: String,      // Lookup key into the joker catalog
    pub position: i64,     // Caller-assigned display order
    pub edition: Option<String>,
    pub eternal: bool,
    pub perishable: bool,
    pub rental: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub id: i64,
    pub run_id: i64,
    pub round_id: Option<i64>,
    pub filename: String,          // Relative to the screenshot dir: {run_id}/{uuid}{ext}
    pub original_name: Option<String>,
    pub caption: Option<String>,
    pub event_type: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub estimated_score: Option<i64>,
    pub actual_score: Option<i64>,
    pub score_error: Option<f64>,  // Stored signed relative error, see accuracy module
    pub created_at: i64,           // Canonical timeline order
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub run_id: i64,
    pub ante: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: Option<String>,
    pub code_hash: Option<String>,  // sha256 hex of source_code
    pub model: Option<String>,
    pub params: Option<String>,     // JSON object as text
    pub source_code: Option<String>,
    pub summary: Option<String>,
    pub parent_id: Option<i64>,     // Forms a tree: one parent, many children
    pub created_at: i64,
}

/// Compact strategy reference used in lineage paths and child listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRef {
    pub id: i64,
    pub name: Option<String>,
    pub code_hash: Option<String>,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Insert / patch payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewRun {
    pub run_code: Option<String>,  // Generated when absent
    pub seed: Option<String>,
    #[serde(default = "default_deck")]
    pub deck: String,
    #[serde(default = "default_stake")]
    pub stake: String,
    #[serde(default = "default_final_ante")]
    pub final_ante: i64,
    pub final_score: Option<i64>,
    #[serde(default)]
    pub won: bool,
    pub endless_ante: Option<i64>,
    pub notes: Option<String>,
    pub status: Option<RunStatus>,
    pub strategy_id: Option<i64>,
    pub llm_model: Option<String>,
    pub played_at: Option<String>,  // RFC 3339 or epoch millis; defaults to now
}

fn default_deck() -> String {
    "Red Deck".to_string()
}

fn default_stake() -> String {
    "White".to_string()
}

fn default_final_ante() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRound {
    pub ante: i64,
    pub blind_type: String,
    pub boss_name: Option<String>,
    pub target_score: Option<i64>,
    pub best_hand_score: Option<i64>,
    pub hands_played: Option<i64>,
    pub discards_used: Option<i64>,
    #[serde(default)]
    pub skipped: bool,
    pub money_after: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewJoker {
    pub name: String,
    pub position: i64,
    pub edition: Option<String>,
    #[serde(default)]
    pub eternal: bool,
    #[serde(default)]
    pub perishable: bool,
    #[serde(default)]
    pub rental: bool,
}

#[derive(Debug, Clone)]
pub struct NewScreenshot {
    pub run_id: i64,
    pub round_id: Option<i64>,
    pub filename: String,
    pub original_name: Option<String>,
    pub caption: Option<String>,
    pub event_type: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub estimated_score: Option<i64>,
    pub actual_score: Option<i64>,
    pub score_error: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewStrategy {
    pub name: Option<String>,
    pub code_hash: Option<String>,  // Computed from source_code when absent
    pub model: Option<String>,
    pub params: Option<String>,
    pub source_code: Option<String>,
    pub summary: Option<String>,
    pub parent_id: Option<i64>,
}

/// Closed set of patchable run fields. Unknown request keys have no field to
/// land in, so they can never reach a SQL identifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunPatch {
    pub seed: Option<String>,
    pub deck: Option<String>,
    pub stake: Option<String>,
    pub final_ante: Option<i64>,
    pub final_score: Option<i64>,
    pub won: Option<bool>,
    pub endless_ante: Option<i64>,
    pub notes: Option<String>,
    pub progress: Option<String>,
    pub status: Option<RunStatus>,
    pub hands_played: Option<i64>,
    pub discards_used: Option<i64>,
    pub purchases: Option<i64>,
    pub rule_decisions: Option<i64>,
    pub llm_decisions: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub llm_cost_usd: Option<f64>,
    pub llm_model: Option<String>,
    pub strategy_id: Option<i64>,
    pub played_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Aggregated read shapes
// ---------------------------------------------------------------------------

/// Listing row: the run plus the joined fields the tables render.
#[derive(Debug, Clone, Serialize)]
pub struct RunListItem {
    #[serde(flatten)]
    pub run: Run,
    pub strategy_name: Option<String>,
    pub screenshot_count: i64,
}

/// Strategy plus aggregates over its attributed runs.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStats {
    #[serde(flatten)]
    pub strategy: Strategy,
    pub run_count: i64,
    pub wins: i64,
    pub avg_ante: Option<f64>,
    pub avg_cost: Option<f64>,
    pub avg_duration: Option<f64>,
}

/// Per-seed aggregates for the seed tab.
#[derive(Debug, Clone, Serialize)]
pub struct SeedStats {
    pub seed: String,
    pub run_count: i64,
    pub best_ante: Option<i64>,
    pub avg_ante: Option<f64>,
    pub wins: i64,
    pub strategy_count: i64,
    pub first_played: Option<i64>,
}

/// Archive-wide totals for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveStats {
    pub total_runs: i64,
    pub wins: i64,
    pub losses: i64,
    pub highest_ante: Option<i64>,
    pub highest_score: Option<i64>,
    pub decks_used: i64,
    pub stakes_played: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        assert_eq!(RunStatus::from_str("running"), Some(RunStatus::Running));
        assert_eq!(RunStatus::from_str("completed"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::from_str("paused"), None);
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert!(RunStatus::Running.is_running());
        assert!(!RunStatus::Completed.is_running());
    }
}
