//! Rating strategies. Each one fills every criterion of a judging form.

use crate::ai_judge::AiRatings;
use crate::{FormSnapshot, JudgeError, ProjectPage, RatingSet, Result, ScoreRange};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces one score per criterion of a form.
pub trait RatingGenerator {
    /// # Errors
    /// Returns an error if the strategy cannot produce a valid rating set.
    fn generate(&mut self, form: &FormSnapshot, page: &ProjectPage) -> Result<RatingSet>;
}

/// The same score for every criterion.
#[derive(Debug, Clone)]
pub struct FixedRatings {
    value: u8,
    range: ScoreRange,
}

impl FixedRatings {
    /// # Errors
    /// Returns a config error if `value` is outside `range`.
    pub fn new(value: u8, range: ScoreRange) -> Result<Self> {
        if !range.contains(i64::from(value)) {
            return Err(JudgeError::Config(format!(
                "fixed rating {value} is outside the valid range {range}"
            )));
        }
        Ok(Self { value, range })
    }
}

impl RatingGenerator for FixedRatings {
    fn generate(&mut self, form: &FormSnapshot, _page: &ProjectPage) -> Result<RatingSet> {
        let scores = vec![self.value; form.criterion_field_names.len()];
        RatingSet::from_ordered(form, &scores, self.range)
    }
}

/// Independent uniform draws from an inclusive range inside the form's valid range.
#[derive(Debug, Clone)]
pub struct RandomRatings {
    range: ScoreRange,
    valid: ScoreRange,
    rng: StdRng,
}

impl RandomRatings {
    /// A seed makes the sequence of rating sets reproducible.
    ///
    /// # Errors
    /// Returns a config error if `range` is inverted or reaches outside `valid`.
    pub fn new(range: ScoreRange, valid: ScoreRange, seed: Option<u64>) -> Result<Self> {
        ScoreRange::new(range.min, range.max)?;
        if !valid.covers(&range) {
            return Err(JudgeError::Config(format!(
                "random range {range} is not inside the valid range {valid}"
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self { range, valid, rng })
    }

    #[must_use]
    pub fn range(&self) -> ScoreRange {
        self.range
    }
}

impl RatingGenerator for RandomRatings {
    fn generate(&mut self, form: &FormSnapshot, _page: &ProjectPage) -> Result<RatingSet> {
        if form.criterion_field_names.is_empty() {
            return Err(JudgeError::InvalidState(
                "cannot rate a form without criteria".to_string(),
            ));
        }
        let scores: Vec<u8> = form
            .criterion_field_names
            .iter()
            .map(|_| self.rng.random_range(self.range.min..=self.range.max))
            .collect();
        let ratings = RatingSet::from_ordered(form, &scores, self.valid)?;
        info!("Generated random ratings: {:?}", ratings.in_form_order(form));
        Ok(ratings)
    }
}

/// The strategy chosen for a run.
pub enum RatingStrategy {
    Fixed(FixedRatings),
    Random(RandomRatings),
    Ai(AiRatings),
}

impl RatingStrategy {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            RatingStrategy::Fixed(fixed) => format!("fixed rating {}", fixed.value),
            RatingStrategy::Random(random) => format!("random ratings ({})", random.range),
            RatingStrategy::Ai(ai) => format!("AI-generated ratings ({})", ai.model()),
        }
    }
}

impl RatingGenerator for RatingStrategy {
    fn generate(&mut self, form: &FormSnapshot, page: &ProjectPage) -> Result<RatingSet> {
        match self {
            RatingStrategy::Fixed(fixed) => fixed.generate(form, page),
            RatingStrategy::Random(random) => random.generate(form, page),
            RatingStrategy::Ai(ai) => ai.generate(form, page),
        }
    }
}
