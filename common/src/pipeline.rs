//! Fetch, parse, rate and submit one submission.

use crate::ratings::{RandomRatings, RatingGenerator, RatingStrategy};
use crate::site_api::{ParsedProject, SiteClient};
use crate::{FormSnapshot, JudgeError, ProjectPage, RatingSet, Result, SubmissionResult};
use log::{info, warn};

/// A rating strategy plus the caller's choice of what to do when AI rating fails.
pub struct RatingPlan {
    pub strategy: RatingStrategy,
    /// Used only when the strategy reports an `AiGeneration` error.
    pub fallback: Option<RandomRatings>,
}

impl RatingPlan {
    #[must_use]
    pub fn new(strategy: RatingStrategy) -> Self {
        Self {
            strategy,
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: RandomRatings) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl RatingGenerator for RatingPlan {
    fn generate(&mut self, form: &FormSnapshot, page: &ProjectPage) -> Result<RatingSet> {
        match self.strategy.generate(form, page) {
            Err(JudgeError::AiGeneration(reason)) if self.fallback.is_some() => {
                warn!("AI rating failed ({reason}), falling back to random ratings");
                match self.fallback.as_mut() {
                    Some(fallback) => fallback.generate(form, page),
                    None => Err(JudgeError::AiGeneration(reason)),
                }
            }
            other => other,
        }
    }
}

/// Fetch a project and rate it without submitting anything.
///
/// # Errors
/// Returns fetch, parse or rating errors.
pub fn rate_submission(
    site: &SiteClient,
    generator: &mut dyn RatingGenerator,
    path: &str,
) -> Result<(ParsedProject, RatingSet)> {
    let project = site.fetch_project(path)?;
    let ratings = generator.generate(&project.form, &project.page)?;
    Ok((project, ratings))
}

/// Run the whole pipeline for one submission path.
///
/// # Errors
/// Returns the first error from fetching, parsing, rating or submitting.
pub fn judge_submission(
    site: &SiteClient,
    generator: &mut dyn RatingGenerator,
    path: &str,
) -> Result<SubmissionResult> {
    let (project, ratings) = rate_submission(site, generator, path)?;
    info!(
        "Rating {:?}: {:?}",
        project.page.title,
        ratings.in_form_order(&project.form)
    );
    site.submit(&project, &ratings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScoreRange;
    use crate::ai_judge::{AiRatings, CompletionClient};
    use crate::config::{AuthSignature, default_criteria};
    use crate::ratings::FixedRatings;
    use crate::site_api::decode_form_body;
    use crate::testing::{BASE_URL, FakeTransport, judging_page, session};

    const PATH: &str = "/submissions/55-lamp/judging";

    struct BrokenModel;

    impl CompletionClient for BrokenModel {
        fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
            Err(JudgeError::AiGeneration("quota exceeded".to_string()))
        }

        fn model(&self) -> &str {
            "broken"
        }
    }

    fn broken_ai() -> RatingStrategy {
        RatingStrategy::Ai(AiRatings::new(
            Box::new(BrokenModel),
            default_criteria(),
            ScoreRange::VALID,
            false,
        ))
    }

    fn site(transport: FakeTransport) -> SiteClient {
        SiteClient::new(session(), Box::new(transport), AuthSignature::default())
    }

    #[test_log::test]
    fn test_judge_submission_end_to_end() {
        let transport = FakeTransport::default().with_page(
            &format!("{BASE_URL}{PATH}"),
            200,
            &judging_page(&[1, 2, 3, 4]),
        );
        let calls = transport.calls();
        let site = site(transport);
        let mut plan = RatingPlan::new(RatingStrategy::Fixed(
            FixedRatings::new(4, ScoreRange::VALID).unwrap(),
        ));

        let result = judge_submission(&site, &mut plan, PATH).unwrap();
        assert_eq!(result.ratings_used.scores.len(), 4);

        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        let sent = decode_form_body(calls[1].2.as_deref().unwrap());
        assert!(
            ["grades[1]", "grades[2]", "grades[3]", "grades[4]"]
                .iter()
                .all(|name| sent[*name] == "4")
        );
    }

    #[test]
    fn test_ai_failure_without_fallback_is_reported() {
        let mut plan = RatingPlan::new(broken_ai());
        let form = FormSnapshot {
            hidden_fields: Default::default(),
            criterion_field_names: vec!["grades[1]".to_string()],
            action: None,
            submit_button: None,
        };
        assert!(matches!(
            plan.generate(&form, &ProjectPage::default()),
            Err(JudgeError::AiGeneration(_))
        ));
    }

    #[test]
    fn test_ai_failure_falls_back_when_asked() {
        let mut plan = RatingPlan::new(broken_ai())
            .with_fallback(
            RandomRatings::new(ScoreRange::RANDOM_DEFAULT, ScoreRange::VALID, Some(7)).unwrap(),
        );
        let form = FormSnapshot {
            hidden_fields: Default::default(),
            criterion_field_names: vec!["grades[1]".to_string(), "grades[2]".to_string()],
            action: None,
            submit_button: None,
        };
        let ratings = plan.generate(&form, &ProjectPage::default()).unwrap();
        ratings.validate(&form, ScoreRange::RANDOM_DEFAULT).unwrap();
    }

    #[test]
    fn test_rate_submission_does_not_post() {
        let transport = FakeTransport::default().with_page(
            &format!("{BASE_URL}{PATH}"),
            200,
            &judging_page(&[1, 2]),
        );
        let calls = transport.calls();
        let site = site(transport);
        let mut random =
            RandomRatings::new(ScoreRange::RANDOM_DEFAULT, ScoreRange::VALID, Some(3)).unwrap();
        let (project, ratings) = rate_submission(&site, &mut random, PATH).unwrap();
        assert_eq!(project.form.criterion_field_names.len(), 2);
        assert_eq!(ratings.scores.len(), 2);
        assert!(calls.borrow().iter().all(|(method, _, _)| method == "GET"));
    }
}
