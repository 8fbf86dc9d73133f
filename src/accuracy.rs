//! Estimated-vs-actual score accuracy.
//!
//! Two grading scales exist on purpose: `grade_item` classifies a single
//! prediction by its own relative error, `grade_run` classifies a run by its
//! average absolute error. The cutoffs are numerically alike but drive
//! different UI badges, so they stay separate functions.

use serde::Serialize;

/// Accuracy bucket, doubles as the CSS class on score badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorGrade {
    Good,
    Ok,
    Bad,
}

impl ErrorGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorGrade::Good => "good",
            ErrorGrade::Ok => "ok",
            ErrorGrade::Bad => "bad",
        }
    }
}

/// Signed relative error of a prediction. The single definition of the
/// error formula; `None` when the estimate is zero.
pub fn relative_error(estimated: i64, actual: i64) -> Option<f64> {
    if estimated == 0 {
        return None;
    }
    Some((actual - estimated) as f64 / estimated as f64)
}

/// Per-item scale: good < 20%, ok < 50%, bad otherwise.
pub fn grade_item(error: f64) -> ErrorGrade {
    let abs = error.abs();
    if abs < 0.2 {
        ErrorGrade::Good
    } else if abs < 0.5 {
        ErrorGrade::Ok
    } else {
        ErrorGrade::Bad
    }
}

/// Run scale, applied to the average absolute error.
pub fn grade_run(avg_abs: f64) -> ErrorGrade {
    if avg_abs < 0.2 {
        ErrorGrade::Good
    } else if avg_abs < 0.5 {
        ErrorGrade::Ok
    } else {
        ErrorGrade::Bad
    }
}

/// One screenshot's scored prediction, graded on the item scale.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReading {
    pub estimated: i64,
    pub actual: i64,
    pub error: f64,
    pub grade: ErrorGrade,
}

/// Resolve a screenshot's score fields into a graded reading. The stored
/// error wins when present (the capture harness writes it at decision time);
/// otherwise the error is derived from the pair. `None` when either score is
/// absent or no error can be determined.
pub fn read_scores(
    estimated: Option<i64>,
    actual: Option<i64>,
    stored_error: Option<f64>,
) -> Option<ScoreReading> {
    let (estimated, actual) = (estimated?, actual?);
    let error = match stored_error {
        Some(e) => e,
        None => relative_error(estimated, actual)?,
    };
    Some(ScoreReading { estimated, actual, error, grade: grade_item(error) })
}

/// Run-level accuracy over every screenshot carrying both scores.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub avg_abs: f64,
    pub max_abs: f64,
}

impl ScoreSummary {
    pub fn grade(&self) -> ErrorGrade {
        grade_run(self.avg_abs)
    }
}

/// Aggregate signed errors into a run summary. `None` when no items qualify,
/// so callers render an absent cell instead of dividing by zero.
pub fn summarize(errors: &[f64]) -> Option<ScoreSummary> {
    if errors.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    let mut max_abs: f64 = 0.0;
    for e in errors {
        let abs = e.abs();
        sum += abs;
        max_abs = max_abs.max(abs);
    }
    Some(ScoreSummary {
        count: errors.len(),
        avg_abs: sum / errors.len() as f64,
        max_abs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(100, 100), Some(0.0));
        assert_eq!(relative_error(100, 40), Some(-0.6));
        assert_eq!(relative_error(100, 150), Some(0.5));
        assert_eq!(relative_error(0, 500), None);
    }

    #[test]
    fn test_item_grading() {
        assert_eq!(grade_item(0.0), ErrorGrade::Good);
        assert_eq!(grade_item(0.19), ErrorGrade::Good);
        assert_eq!(grade_item(-0.19), ErrorGrade::Good);
        assert_eq!(grade_item(0.2), ErrorGrade::Ok);
        assert_eq!(grade_item(-0.49), ErrorGrade::Ok);
        assert_eq!(grade_item(0.5), ErrorGrade::Bad);
        assert_eq!(grade_item(-0.6), ErrorGrade::Bad);
    }

    #[test]
    fn test_read_scores_prefers_stored_error() {
        let r = read_scores(Some(100), Some(40), Some(-0.55)).unwrap();
        assert_eq!(r.error, -0.55);
        assert_eq!(r.grade, ErrorGrade::Bad);

        // Derived when nothing is stored
        let r = read_scores(Some(100), Some(100), None).unwrap();
        assert_eq!(r.error, 0.0);
        assert_eq!(r.grade, ErrorGrade::Good);

        assert!(read_scores(Some(100), None, None).is_none());
        assert!(read_scores(None, Some(40), None).is_none());
        // Zero estimate with no stored error: no reading rather than a fake 0
        assert!(read_scores(Some(0), Some(40), None).is_none());
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&[0.1, -0.3, 0.9]).unwrap();
        assert_eq!(s.count, 3);
        assert!((s.avg_abs - 0.4333333333).abs() < 1e-9);
        assert_eq!(s.max_abs, 0.9);
        // Run scale says ok even though the 0.9 item alone grades bad
        assert_eq!(s.grade(), ErrorGrade::Ok);
        assert_eq!(grade_item(0.9), ErrorGrade::Bad);

        assert!(summarize(&[]).is_none());
    }
}
