//! Run view assembly.
//!
//! Pulls a run's child collections in their canonical orders, decorates the
//! screenshot feed through the timeline and accuracy modules, and derives
//! the display-only counters. Pure over the fetched rows; every read goes
//! through the injected `Database`.

use serde::Serialize;

use crate::accuracy::{self, ScoreSummary};
use crate::db::{Database, Joker, Round, Run, Screenshot, Strategy, Tag};
use crate::error::AppError;
use crate::timeline::{self, Timeline};

/// Everything the run detail page and API need for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub jokers: Vec<Joker>,
    pub rounds: Vec<Round>,
    pub screenshots: Vec<Screenshot>,
    pub timeline: Timeline,
    pub score_summary: Option<ScoreSummary>,
    pub tags: Vec<Tag>,
    pub strategy: Option<Strategy>,
}

pub fn run_detail(db: &Database, run_id: i64) -> Result<RunDetail, AppError> {
    let run = db
        .get_run(run_id)?
        .ok_or_else(|| AppError::not_found(format!("Run {} not found", run_id)))?;

    let jokers = db.get_jokers_for_run(run_id)?;
    let rounds = db.get_rounds_for_run(run_id)?;
    let screenshots = db.get_screenshots_for_run(run_id)?;
    let timeline = timeline::segment(&screenshots);
    let errors: Vec<f64> = timeline
        .entries
        .iter()
        .filter_map(|e| e.score.as_ref().map(|s| s.error))
        .collect();
    let score_summary = accuracy::summarize(&errors);
    let tags = db.get_tags_for_run(run_id)?;

    // The run view carries the strategy's own fields only; lineage is
    // resolved on the dedicated strategy view.
    let strategy = match run.strategy_id {
        Some(sid) => db.get_strategy(sid)?,
        None => None,
    };

    Ok(RunDetail { run, jokers, rounds, screenshots, timeline, score_summary, tags, strategy })
}

pub fn run_detail_by_code(db: &Database, run_code: &str) -> Result<RunDetail, AppError> {
    let id = db
        .get_run_id_by_code(run_code)?
        .ok_or_else(|| AppError::not_found(format!("Run '{}' not found", run_code)))?;
    run_detail(db, id)
}

/// Rule share of all decisions as a whole percent. Absent when the run made
/// no decisions at all, so callers render "-" instead of a fake 0%.
pub fn decision_ratio(rule_decisions: i64, llm_decisions: i64) -> Option<String> {
    let total = rule_decisions + llm_decisions;
    if total <= 0 {
        return None;
    }
    let pct = (rule_decisions as f64 / total as f64 * 100.0).round() as i64;
    Some(format!("{}%", pct))
}

/// Whole minutes, rounded. Zero or missing duration reads as absent.
pub fn duration_minutes(duration_seconds: Option<i64>) -> Option<i64> {
    duration_seconds
        .filter(|s| *s > 0)
        .map(|s| (s as f64 / 60.0).round() as i64)
}

/// Four-decimal dollar figure, absent for zero or missing cost.
pub fn cost_label(llm_cost_usd: Option<f64>) -> Option<String> {
    llm_cost_usd.filter(|c| *c > 0.0).map(|c| format!("${:.4}", c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewRound, NewRun, NewScreenshot, NewStrategy};

    fn seed_run(db: &Database) -> Run {
        let strategy = db
            .insert_strategy(&NewStrategy {
                name: Some("flush-first".to_string()),
                source_code: Some("prefer flushes".to_string()),
                ..Default::default()
            })
            .unwrap();
        let new = NewRun {
            run_code: None,
            seed: Some("ABCD1234".to_string()),
            deck: "Red Deck".to_string(),
            stake: "Gold".to_string(),
            final_ante: 8,
            final_score: None,
            won: true,
            endless_ante: None,
            notes: None,
            status: None,
            strategy_id: Some(strategy.id),
            llm_model: None,
            played_at: None,
        };
        db.create_run(&new, "G42", 1_700_000_000_000).unwrap()
    }

    fn shot(run_id: i64, caption: &str, est: Option<i64>, act: Option<i64>) -> NewScreenshot {
        NewScreenshot {
            run_id,
            round_id: None,
            filename: format!("{}/x.png", run_id),
            original_name: None,
            caption: Some(caption.to_string()),
            event_type: None,
            file_size: None,
            width: None,
            height: None,
            estimated_score: est,
            actual_score: act,
            score_error: None,
        }
    }

    #[test]
    fn test_run_detail_composition() {
        let db = Database::in_memory().unwrap();
        let run = seed_run(&db);
        db.insert_rounds(
            run.id,
            &[
                NewRound {
                    ante: 1,
                    blind_type: "small".to_string(),
                    best_hand_score: Some(1200),
                    ..Default::default()
                },
                NewRound {
                    ante: 1,
                    blind_type: "big".to_string(),
                    best_hand_score: Some(3400),
                    ..Default::default()
                },
            ],
        )
        .unwrap();
        db.insert_screenshot(&shot(run.id, "第1关 小盲", Some(100), Some(110))).unwrap();
        db.insert_screenshot(&shot(run.id, "[LLM] 思考", Some(100), Some(40))).unwrap();
        db.insert_screenshot(&shot(run.id, "第1关 商店", None, None)).unwrap();
        db.insert_tag(run.id, 1, "Investment").unwrap();

        let detail = run_detail(&db, run.id).unwrap();
        assert_eq!(detail.run.final_score, Some(3400));
        assert_eq!(detail.rounds.len(), 2);
        assert_eq!(detail.screenshots.len(), 3);
        assert_eq!(detail.tags.len(), 1);
        assert_eq!(detail.strategy.as_ref().unwrap().name.as_deref(), Some("flush-first"));

        // Feed decoration: two segments, one summary over the two scored shots
        assert_eq!(detail.timeline.toc.len(), 2);
        let summary = detail.score_summary.unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.max_abs - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_run_detail_not_found() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(run_detail(&db, 7), Err(AppError::NotFound(_))));
        assert!(matches!(run_detail_by_code(&db, "NOPE"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_decision_ratio() {
        assert_eq!(decision_ratio(7, 3).as_deref(), Some("70%"));
        assert_eq!(decision_ratio(1, 2).as_deref(), Some("33%"));
        assert_eq!(decision_ratio(0, 5).as_deref(), Some("0%"));
        assert_eq!(decision_ratio(0, 0), None);
    }

    #[test]
    fn test_duration_and_cost_labels() {
        assert_eq!(duration_minutes(Some(90)), Some(2));
        assert_eq!(duration_minutes(Some(119)), Some(2));
        assert_eq!(duration_minutes(Some(0)), None);
        assert_eq!(duration_minutes(None), None);

        assert_eq!(cost_label(Some(0.12345)).as_deref(), Some("$0.1235"));
        assert_eq!(cost_label(Some(0.0)), None);
        assert_eq!(cost_label(None), None);
    }
}
