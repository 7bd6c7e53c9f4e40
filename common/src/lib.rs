//! A library for fetching hackathon judging pages, rating them, and submitting the ratings.

pub mod ai_judge;
pub mod batch;
pub mod config;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod ratings;
pub mod session;
pub mod site_api;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{JudgeError, Result};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_BASE_URL: &str = "https://hackatopia.devpost.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Judging pages all live under this prefix.
pub const SUBMISSION_PATH_PREFIX: &str = "/submissions/";
pub const AUTHENTICITY_TOKEN_FIELD: &str = "authenticity_token";

/// An inclusive range of allowed scores.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: u8,
    pub max: u8,
}

impl ScoreRange {
    /// The range the judging form accepts.
    pub const VALID: ScoreRange = ScoreRange { min: 1, max: 5 };
    /// The conservative range used for random ratings.
    pub const RANDOM_DEFAULT: ScoreRange = ScoreRange { min: 2, max: 4 };

    /// Build a range, rejecting an inverted one.
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max {
            return Err(JudgeError::Config(format!(
                "score range minimum {min} is above maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub fn contains(&self, score: i64) -> bool {
        i64::from(self.min) <= score && score <= i64::from(self.max)
    }

    /// True if every score in `other` is also in `self`.
    #[must_use]
    pub fn covers(&self, other: &ScoreRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl fmt::Display for ScoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// The human-readable content of a submission page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPage {
    pub title: String,
    pub description: Option<String>,
    /// Heading and body text, in document order.
    pub sections: Vec<(String, String)>,
    #[serde(skip)]
    pub raw_html: String,
}

impl ProjectPage {
    /// Look up a section body by its heading.
    #[must_use]
    pub fn section(&self, heading: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(h, _)| h == heading)
            .map(|(_, text)| text.as_str())
    }

    /// Total number of characters of project text available for rating.
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.title.len()
            + self.description.as_ref().map_or(0, String::len)
            + self.sections.iter().map(|(_, t)| t.len()).sum::<usize>()
    }
}

/// Everything from the judging form needed to build a valid POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub hidden_fields: BTreeMap<String, String>,
    /// Field names of the grading criteria, in document order.
    pub criterion_field_names: Vec<String>,
    /// Where the form posts to, if the page declared it.
    pub action: Option<String>,
    /// The named submit button, sent along like a browser would.
    pub submit_button: Option<(String, String)>,
}

impl FormSnapshot {
    #[must_use]
    pub fn authenticity_token(&self) -> Option<&str> {
        self.hidden_fields
            .get(AUTHENTICITY_TOKEN_FIELD)
            .map(String::as_str)
    }
}

/// One score per criterion field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingSet {
    pub scores: BTreeMap<String, u8>,
}

impl RatingSet {
    /// Pair scores with the form's criteria in order, then validate the result.
    pub fn from_ordered(form: &FormSnapshot, scores: &[u8], range: ScoreRange) -> Result<Self> {
        if scores.len() != form.criterion_field_names.len() {
            return Err(JudgeError::InvalidState(format!(
                "{} scores for {} criteria",
                scores.len(),
                form.criterion_field_names.len()
            )));
        }
        let ratings = RatingSet {
            scores: form
                .criterion_field_names
                .iter()
                .cloned()
                .zip(scores.iter().copied())
                .collect(),
        };
        ratings.validate(form, range)?;
        Ok(ratings)
    }

    /// Check there is exactly one in-range score per criterion and nothing else.
    pub fn validate(&self, form: &FormSnapshot, range: ScoreRange) -> Result<()> {
        if form.criterion_field_names.is_empty() {
            return Err(JudgeError::InvalidState(
                "form has no criterion fields to rate".to_string(),
            ));
        }
        let expected: BTreeSet<&str> = form
            .criterion_field_names
            .iter()
            .map(String::as_str)
            .collect();
        let actual: BTreeSet<&str> = self.scores.keys().map(String::as_str).collect();
        if expected != actual {
            return Err(JudgeError::InvalidState(format!(
                "rating keys {actual:?} do not match criteria {expected:?}"
            )));
        }
        if let Some((name, score)) = self
            .scores
            .iter()
            .find(|(_, score)| !range.contains(i64::from(**score)))
        {
            return Err(JudgeError::InvalidState(format!(
                "score {score} for {name} is outside {range}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, field_name: &str) -> Option<u8> {
        self.scores.get(field_name).copied()
    }

    /// Scores in the form's criterion order.
    #[must_use]
    pub fn in_form_order(&self, form: &FormSnapshot) -> Vec<(String, u8)> {
        form.criterion_field_names
            .iter()
            .filter_map(|name| self.get(name).map(|score| (name.clone(), score)))
            .collect()
    }
}

/// The result of posting ratings for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub path: String,
    pub project_title: String,
    pub status_code: u16,
    pub final_url: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub response_body: String,
    pub ratings_used: RatingSet,
}

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| JudgeError::Io(format!("could not serialize output: {e}")))?;
    fs::write(path, json)
        .map_err(|e| JudgeError::Io(format!("could not write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(names: &[&str]) -> FormSnapshot {
        FormSnapshot {
            hidden_fields: BTreeMap::new(),
            criterion_field_names: names.iter().map(ToString::to_string).collect(),
            action: None,
            submit_button: None,
        }
    }

    #[test]
    fn test_score_range_rejects_inverted() {
        assert!(ScoreRange::new(4, 2).is_err());
        assert_eq!(ScoreRange::new(2, 4).unwrap(), ScoreRange::RANDOM_DEFAULT);
        assert!(ScoreRange::VALID.covers(&ScoreRange::RANDOM_DEFAULT));
        assert!(!ScoreRange::RANDOM_DEFAULT.covers(&ScoreRange::VALID));
    }

    #[test]
    fn test_from_ordered_pairs_in_form_order() {
        let form = form(&["grades[3]", "grades[1]"]);
        let ratings = RatingSet::from_ordered(&form, &[5, 1], ScoreRange::VALID).unwrap();
        assert_eq!(ratings.get("grades[3]"), Some(5));
        assert_eq!(ratings.get("grades[1]"), Some(1));
        assert_eq!(
            ratings.in_form_order(&form),
            vec![("grades[3]".to_string(), 5), ("grades[1]".to_string(), 1)]
        );
    }

    #[test]
    fn test_validate_rejects_extra_missing_and_out_of_range() {
        let form = form(&["grades[1]", "grades[2]"]);
        let missing = RatingSet {
            scores: BTreeMap::from([("grades[1]".to_string(), 3)]),
        };
        assert!(matches!(
            missing.validate(&form, ScoreRange::VALID),
            Err(JudgeError::InvalidState(_))
        ));

        let extra = RatingSet {
            scores: BTreeMap::from([
                ("grades[1]".to_string(), 3),
                ("grades[2]".to_string(), 3),
                ("grades[9]".to_string(), 3),
            ]),
        };
        assert!(extra.validate(&form, ScoreRange::VALID).is_err());

        let too_high = RatingSet {
            scores: BTreeMap::from([("grades[1]".to_string(), 3), ("grades[2]".to_string(), 6)]),
        };
        assert!(too_high.validate(&form, ScoreRange::VALID).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_form() {
        let ratings = RatingSet {
            scores: BTreeMap::new(),
        };
        assert!(matches!(
            ratings.validate(&form(&[]), ScoreRange::VALID),
            Err(JudgeError::InvalidState(_))
        ));
    }
}
