//! Timeline segmentation over a run's screenshot feed.
//!
//! Captions written by the capture harness embed three machine-readable
//! markers that must be matched byte-for-byte:
//! - an ante marker `第N关`;
//! - one of four stage keywords (`商店`, `小盲`, `大盲`, `Boss`);
//! - a decision-source tag `[Rule]` or `[LLM]`.
//!
//! Segmentation is a pure single pass over the screenshot sequence in
//! creation order: a divider is emitted whenever the (ante, stage) key
//! changes, and the table of contents collects each key once, in
//! first-occurrence order. Re-running over the same input yields the same
//! output; no state survives the call.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::accuracy::{self, ScoreReading};
use crate::db::Screenshot;

/// Stage vocabulary for feed segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Shop,
    SmallBlind,
    BigBlind,
    Boss,
    Started,
    Ended,
    Unclassified,
}

impl Stage {
    /// Display label, matching the caption vocabulary.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Shop => "商店",
            Stage::SmallBlind => "小盲",
            Stage::BigBlind => "大盲",
            Stage::Boss => "Boss",
            Stage::Started => "开始",
            Stage::Ended => "结束",
            Stage::Unclassified => "",
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Stage::Unclassified)
    }
}

/// Caption keywords tested in this order; first match wins.
const STAGE_KEYWORDS: [(&str, Stage); 4] = [
    ("商店", Stage::Shop),
    ("小盲", Stage::SmallBlind),
    ("大盲", Stage::BigBlind),
    ("Boss", Stage::Boss),
];

fn ante_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第(\d+)关").unwrap())
}

/// Ante number from the `第N关` marker; 0 when absent.
pub fn extract_ante(caption: &str) -> u32 {
    ante_marker()
        .captures(caption)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Classify a caption into a stage. Keywords first, then the event-type
/// fallback for start/end frames that carry no stage keyword.
pub fn classify_stage(caption: &str, event_type: &str) -> Stage {
    for (keyword, stage) in STAGE_KEYWORDS {
        if caption.contains(keyword) {
            return stage;
        }
    }
    if caption.contains("游戏结束") || event_type == "game_over" {
        Stage::Ended
    } else if caption.contains("开始") || event_type == "game_start" {
        Stage::Started
    } else {
        Stage::Unclassified
    }
}

/// Who made the in-run decision a screenshot documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    Llm,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Rule => "rule",
            DecisionSource::Llm => "llm",
        }
    }

    pub fn tag_label(&self) -> &'static str {
        match self {
            DecisionSource::Rule => "RULE",
            DecisionSource::Llm => "LLM",
        }
    }
}

pub fn decision_source(caption: &str) -> Option<DecisionSource> {
    if caption.contains("[Rule]") {
        Some(DecisionSource::Rule)
    } else if caption.contains("[LLM]") {
        Some(DecisionSource::Llm)
    } else {
        None
    }
}

/// Composite segmentation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SegmentKey {
    pub ante: u32,
    pub stage: Stage,
}

/// Divider emitted where a new segment begins.
#[derive(Debug, Clone, Serialize)]
pub struct Divider {
    pub anchor: String,
    pub ante: u32,
    pub stage: Stage,
}

impl Divider {
    pub fn label(&self) -> String {
        if self.ante > 0 {
            format!("第{}关 {}", self.ante, self.stage.label())
        } else {
            self.stage.label().to_string()
        }
    }
}

/// Table-of-contents entry, unique per (ante, stage), first-occurrence order.
#[derive(Debug, Clone, Serialize)]
pub struct TocEntry {
    pub ante: u32,
    pub stage: Stage,
    pub anchor: String,
}

/// Per-screenshot decoration, parallel to the input sequence.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntry {
    pub index: usize,
    pub divider: Option<Divider>,
    pub source: Option<DecisionSource>,
    pub score: Option<ScoreReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub entries: Vec<FeedEntry>,
    pub toc: Vec<TocEntry>,
}

/// Segment a run's screenshots, given in canonical creation order.
pub fn segment(shots: &[Screenshot]) -> Timeline {
    let mut entries = Vec::with_capacity(shots.len());
    let mut toc = Vec::new();
    let mut seen: HashSet<SegmentKey> = HashSet::new();
    let mut last_key: Option<SegmentKey> = None;

    for (i, shot) in shots.iter().enumerate() {
        // An empty caption falls back to the event type, like the feed render
        let caption = shot
            .caption
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(shot.event_type.as_deref())
            .unwrap_or("");
        let event_type = shot.event_type.as_deref().unwrap_or("");

        let key = SegmentKey {
            ante: extract_ante(caption),
            stage: classify_stage(caption, event_type),
        };
        let anchor = format!("blind-{}", i);

        // Unclassified frames never move the divider state; they stay
        // attached to whatever segment precedes them.
        let mut divider = None;
        if key.stage.is_classified() {
            if last_key != Some(key) {
                divider = Some(Divider { anchor: anchor.clone(), ante: key.ante, stage: key.stage });
                last_key = Some(key);
            }
            if seen.insert(key) {
                toc.push(TocEntry { ante: key.ante, stage: key.stage, anchor });
            }
        }

        entries.push(FeedEntry {
            index: i,
            divider,
            source: decision_source(caption),
            score: accuracy::read_scores(shot.estimated_score, shot.actual_score, shot.score_error),
        });
    }

    Timeline { entries, toc }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(caption: &str, event_type: &str) -> Screenshot {
        Screenshot {
            id: 0,
            run_id: 1,
            round_id: None,
            filename: "1/x.png".to_string(),
            original_name: None,
            caption: if caption.is_empty() { None } else { Some(caption.to_string()) },
            event_type: if event_type.is_empty() { None } else { Some(event_type.to_string()) },
            file_size: None,
            width: None,
            height: None,
            estimated_score: None,
            actual_score: None,
            score_error: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_extract_ante() {
        assert_eq!(extract_ante("第3关 商店"), 3);
        assert_eq!(extract_ante("第12关 Boss战开始"), 12);
        assert_eq!(extract_ante("无关文本"), 0);
        assert_eq!(extract_ante(""), 0);
    }

    #[test]
    fn test_classify_keyword_priority() {
        // Shop is checked first even when a later keyword also appears
        assert_eq!(classify_stage("第2关 商店 购买后进入Boss", ""), Stage::Shop);
        assert_eq!(classify_stage("第2关 小盲注", ""), Stage::SmallBlind);
        assert_eq!(classify_stage("第2关 大盲注", ""), Stage::BigBlind);
        assert_eq!(classify_stage("第8关 Boss: 紫罗兰", ""), Stage::Boss);
    }

    #[test]
    fn test_classify_fallbacks() {
        assert_eq!(classify_stage("游戏结束，最终得分", ""), Stage::Ended);
        assert_eq!(classify_stage("anything", "game_over"), Stage::Ended);
        assert_eq!(classify_stage("游戏开始", ""), Stage::Started);
        assert_eq!(classify_stage("anything", "game_start"), Stage::Started);
        assert_eq!(classify_stage("选择了三张牌", "decision"), Stage::Unclassified);
    }

    #[test]
    fn test_decision_source() {
        assert_eq!(decision_source("[Rule] 弃掉两张"), Some(DecisionSource::Rule));
        assert_eq!(decision_source("[LLM] 保留同花"), Some(DecisionSource::Llm));
        assert_eq!(decision_source("没有标记"), None);
    }

    #[test]
    fn test_toc_dedup() {
        let shots = vec![
            shot("第1关 商店", ""),
            shot("第1关 商店 继续", ""),
            shot("第1关 Boss", ""),
            shot("第2关 商店", ""),
        ];
        let tl = segment(&shots);
        assert_eq!(tl.toc.len(), 3);
        assert_eq!((tl.toc[0].ante, tl.toc[0].stage), (1, Stage::Shop));
        assert_eq!((tl.toc[1].ante, tl.toc[1].stage), (1, Stage::Boss));
        assert_eq!((tl.toc[2].ante, tl.toc[2].stage), (2, Stage::Shop));

        // Dividers: repeat of (1, shop) at index 1 emits nothing
        assert!(tl.entries[0].divider.is_some());
        assert!(tl.entries[1].divider.is_none());
        assert!(tl.entries[2].divider.is_some());
        assert!(tl.entries[3].divider.is_some());
    }

    #[test]
    fn test_segment_idempotent() {
        let shots = vec![
            shot("游戏开始", "game_start"),
            shot("第1关 小盲", ""),
            shot("[Rule] 出牌", "decision"),
            shot("第1关 商店", ""),
            shot("游戏结束", "game_over"),
        ];
        let a = segment(&shots);
        let b = segment(&shots);
        assert_eq!(a.toc.len(), b.toc.len());
        for (x, y) in a.toc.iter().zip(b.toc.iter()) {
            assert_eq!((x.ante, x.stage, x.anchor.as_str()), (y.ante, y.stage, y.anchor.as_str()));
        }
    }

    #[test]
    fn test_unclassified_attaches_to_preceding_segment() {
        let shots = vec![
            shot("第1关 小盲", ""),
            shot("[LLM] 思考中", "decision"),
            shot("第1关 小盲 再出一手", ""),
        ];
        let tl = segment(&shots);
        // The unclassified frame emits no divider and no TOC entry
        assert!(tl.entries[1].divider.is_none());
        assert_eq!(tl.toc.len(), 1);
        // And it does not reset the divider state: the third frame is still
        // inside (1, small_blind), so no new divider appears
        assert!(tl.entries[2].divider.is_none());
    }

    #[test]
    fn test_anchor_points_at_first_occurrence() {
        let shots = vec![
            shot("开场白", "game_start"),
            shot("第1关 大盲", ""),
        ];
        let tl = segment(&shots);
        assert_eq!(tl.toc[0].anchor, "blind-0");
        assert_eq!(tl.toc[1].anchor, "blind-1");
        assert_eq!(tl.entries[1].divider.as_ref().unwrap().label(), "第1关 大盲");
    }

    #[test]
    fn test_empty_caption_falls_back_to_event_type() {
        let shots = vec![shot("", "game_over")];
        let tl = segment(&shots);
        assert_eq!(tl.toc.len(), 1);
        assert_eq!(tl.toc[0].stage, Stage::Ended);
    }

    #[test]
    fn test_score_decoration() {
        let mut s = shot("[LLM] 第1关 小盲", "");
        s.estimated_score = Some(100);
        s.actual_score = Some(40);
        let tl = segment(&[s]);
        let reading = tl.entries[0].score.as_ref().unwrap();
        assert_eq!(reading.error, -0.6);
        assert_eq!(reading.grade, crate::accuracy::ErrorGrade::Bad);
    }
}
