//! Fetching judging pages and posting ratings back to the site.

use crate::config::AuthSignature;
use crate::parser::parse_judging_page;
use crate::session::SessionContext;
use crate::transport::{RawResponse, Transport};
use crate::{
    FormSnapshot, JudgeError, ProjectPage, RatingSet, Result, SUBMISSION_PATH_PREFIX,
    SubmissionResult,
};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use url::form_urlencoded;

/// Characters of a rejected response body kept in the error message.
const BODY_SNIPPET_CHARS: usize = 200;

/// A fetched and parsed judging page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedProject {
    pub path: String,
    pub page: ProjectPage,
    pub form: FormSnapshot,
}

/// Merge the form's hidden fields, its submit button and the ratings. Ratings win on collision.
#[must_use]
pub fn form_fields(form: &FormSnapshot, ratings: &RatingSet) -> BTreeMap<String, String> {
    let mut fields = form.hidden_fields.clone();
    if let Some((name, value)) = &form.submit_button {
        fields.insert(name.clone(), value.clone());
    }
    for (name, score) in &ratings.scores {
        fields.insert(name.clone(), score.to_string());
    }
    fields
}

/// Encode fields as an `application/x-www-form-urlencoded` body.
#[must_use]
pub fn encode_form_body(fields: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish()
}

/// Decode an `application/x-www-form-urlencoded` body.
#[must_use]
pub fn decode_form_body(body: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

/// Reject paths that cannot be a judging page.
///
/// # Errors
/// Returns a fetch error naming the expected prefix.
pub fn validate_path(path: &str) -> Result<()> {
    if path.starts_with(SUBMISSION_PATH_PREFIX) {
        Ok(())
    } else {
        Err(JudgeError::Fetch(format!(
            "{path:?} is not a judging path (expected {SUBMISSION_PATH_PREFIX}<id>-<slug>/judging)"
        )))
    }
}

/// Talks to the judging site on behalf of one session.
pub struct SiteClient {
    session: SessionContext,
    transport: Box<dyn Transport>,
    auth_signature: AuthSignature,
}

impl SiteClient {
    #[must_use]
    pub fn new(
        session: SessionContext,
        transport: Box<dyn Transport>,
        auth_signature: AuthSignature,
    ) -> Self {
        Self {
            session,
            transport,
            auth_signature,
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    fn is_login_page(&self, response: &RawResponse) -> bool {
        response.status == 401 || self.auth_signature.matches(&response.final_url, &response.body)
    }

    /// GET a judging page.
    ///
    /// # Errors
    /// Returns `AuthExpired` if the site answered with its login page,
    /// otherwise `Fetch` for network errors and non-2xx statuses.
    pub fn fetch_page(&self, path: &str) -> Result<RawResponse> {
        validate_path(path)?;
        let url = self.session.url_for(path);
        let response = self
            .transport
            .get(&url, &self.session.request_headers())
            .map_err(|e| JudgeError::Fetch(format!("GET {url}: {e}")))?;

        debug!("GET {url} -> {} ({})", response.status, response.final_url);
        if self.is_login_page(&response) {
            return Err(JudgeError::AuthExpired(format!(
                "GET {url} landed on the login page ({})",
                response.final_url
            )));
        }
        if !response.is_success() {
            return Err(JudgeError::Fetch(format!(
                "GET {url} returned status {}",
                response.status
            )));
        }
        Ok(response)
    }

    /// Fetch and parse a judging page.
    ///
    /// # Errors
    /// Returns any fetch error, or a parse error if the page lacks the judging form.
    pub fn fetch_project(&self, path: &str) -> Result<ParsedProject> {
        let response = self.fetch_page(path)?;
        let (form, page) = parse_judging_page(&response.body)?;
        info!(
            "Fetched {:?}: {} criteria, {} sections",
            page.title,
            form.criterion_field_names.len(),
            page.sections.len()
        );
        Ok(ParsedProject {
            path: path.to_string(),
            page,
            form,
        })
    }

    /// POST ratings through the project's judging form.
    ///
    /// # Errors
    /// Returns `AuthExpired` if the response is the login page, otherwise
    /// `Submit` for network errors and 4xx/5xx statuses.
    pub fn submit(&self, project: &ParsedProject, ratings: &RatingSet) -> Result<SubmissionResult> {
        let target = project.form.action.as_deref().unwrap_or(&project.path);
        let url = self.session.url_for(target);
        let body = encode_form_body(&form_fields(&project.form, ratings));

        let mut headers = self.session.request_headers();
        headers.push(("origin".to_string(), self.session.base_url().to_string()));
        headers.push(("referer".to_string(), self.session.url_for(&project.path)));

        debug!("Submitting form to {url}: {body}");
        let response = self
            .transport
            .post_form(&url, &headers, body)
            .map_err(|e| JudgeError::Submit(format!("POST {url}: {e}")))?;

        if self.is_login_page(&response) {
            return Err(JudgeError::AuthExpired(format!(
                "POST {url} was redirected to the login page ({})",
                response.final_url
            )));
        }
        if !(200..400).contains(&response.status) {
            return Err(JudgeError::Submit(format!(
                "POST {url} was rejected with status {}: {}",
                response.status,
                snippet(&response.body)
            )));
        }

        info!("Submitted ratings for {:?}", project.page.title);
        Ok(SubmissionResult {
            path: project.path.clone(),
            project_title: project.page.title.clone(),
            status_code: response.status,
            final_url: response.final_url,
            response_body: response.body,
            ratings_used: ratings.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScoreRange;
    use crate::testing::{BASE_URL, FakeTransport, LOGIN_PAGE, judging_page, session};

    const PATH: &str = "/submissions/123-robo-arm/judging";

    fn client(transport: FakeTransport) -> SiteClient {
        SiteClient::new(session(), Box::new(transport), AuthSignature::default())
    }

    fn page_url() -> String {
        format!("{BASE_URL}{PATH}")
    }

    #[test]
    fn test_form_body_round_trip() {
        let form = FormSnapshot {
            hidden_fields: BTreeMap::from([
                ("utf8".to_string(), "✓".to_string()),
                ("authenticity_token".to_string(), "a+b/c==&d".to_string()),
                ("submission_judging[recused]".to_string(), "0".to_string()),
            ]),
            criterion_field_names: vec!["grades[1]".to_string(), "grades[2]".to_string()],
            action: None,
            submit_button: Some(("commit".to_string(), "Save and continue".to_string())),
        };
        let ratings = RatingSet::from_ordered(&form, &[4, 2], ScoreRange::VALID).unwrap();
        let fields = form_fields(&form, &ratings);

        let decoded = decode_form_body(&encode_form_body(&fields));
        assert_eq!(decoded, fields);
        for (name, value) in &form.hidden_fields {
            assert_eq!(decoded.get(name), Some(value));
        }
        assert_eq!(decoded["grades[1]"], "4");
        assert_eq!(decoded["grades[2]"], "2");
        assert_eq!(decoded["commit"], "Save and continue");
    }

    #[test]
    fn test_ratings_win_on_collision() {
        let form = FormSnapshot {
            hidden_fields: BTreeMap::from([("grades[1]".to_string(), "stale".to_string())]),
            criterion_field_names: vec!["grades[1]".to_string()],
            action: None,
            submit_button: None,
        };
        let ratings = RatingSet::from_ordered(&form, &[3], ScoreRange::VALID).unwrap();
        assert_eq!(form_fields(&form, &ratings)["grades[1]"], "3");
    }

    #[test]
    fn test_rejects_non_judging_path() {
        let site = client(FakeTransport::default());
        assert!(matches!(
            site.fetch_page("/software/robo-arm"),
            Err(JudgeError::Fetch(_))
        ));
    }

    #[test]
    fn test_fetch_project_parses_page() {
        let transport = FakeTransport::default().with_page(&page_url(), 200, &judging_page(&[1, 2, 3]));
        let project = client(transport).fetch_project(PATH).unwrap();
        assert_eq!(project.path, PATH);
        assert_eq!(project.page.title, "Robo Arm");
        assert_eq!(project.form.criterion_field_names.len(), 3);
    }

    #[test]
    fn test_fetch_error_status() {
        let transport = FakeTransport::default().with_page(&page_url(), 404, "not found");
        assert!(matches!(
            client(transport).fetch_page(PATH),
            Err(JudgeError::Fetch(_))
        ));
        // no route at all is a network failure
        assert!(matches!(
            client(FakeTransport::default()).fetch_page(PATH),
            Err(JudgeError::Fetch(_))
        ));
    }

    #[test_log::test]
    fn test_fetch_login_redirect_is_auth_expired() {
        let transport = FakeTransport::default().with_redirect(
            &page_url(),
            "https://secure.devpost.com/users/login?ref=judging",
            LOGIN_PAGE,
        );
        let err = client(transport).fetch_project(PATH).unwrap_err();
        assert!(matches!(err, JudgeError::AuthExpired(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_submit_posts_to_form_action() {
        let transport = FakeTransport::default().with_page(&page_url(), 200, &judging_page(&[8, 9]));
        let calls = transport.calls();
        let site = client(transport);
        let project = site.fetch_project(PATH).unwrap();
        let ratings = RatingSet::from_ordered(&project.form, &[3, 4], ScoreRange::VALID).unwrap();

        let result = site.submit(&project, &ratings).unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(result.path, PATH);
        assert_eq!(result.project_title, "Robo Arm");
        assert_eq!(result.ratings_used, ratings);

        let calls = calls.borrow();
        let (method, url, body) = &calls[1];
        assert_eq!(method, "POST");
        assert_eq!(
            url,
            &format!("{BASE_URL}/submissions/123-robo-arm/submission_judgings/77")
        );
        let sent = decode_form_body(body.as_deref().unwrap());
        assert_eq!(sent["authenticity_token"], "tok+en/==");
        assert_eq!(sent["_method"], "patch");
        assert_eq!(sent["grades[8]"], "3");
        assert_eq!(sent["grades[9]"], "4");
    }

    #[test]
    fn test_submit_rejected_and_expired() {
        let action = format!("{BASE_URL}/submissions/123-robo-arm/submission_judgings/77");
        let transport = FakeTransport::default()
            .with_page(&page_url(), 200, &judging_page(&[1]))
            .with_post(&action, 422, &action, "Invalid authenticity token");
        let site = client(transport);
        let project = site.fetch_project(PATH).unwrap();
        let ratings = RatingSet::from_ordered(&project.form, &[3], ScoreRange::VALID).unwrap();
        let err = site.submit(&project, &ratings).unwrap_err();
        assert!(matches!(err, JudgeError::Submit(ref m) if m.contains("422")));

        let transport = FakeTransport::default().with_post(
            &action,
            200,
            "https://secure.devpost.com/users/login",
            LOGIN_PAGE,
        );
        let site = client(transport);
        assert!(matches!(
            site.submit(&project, &ratings),
            Err(JudgeError::AuthExpired(_))
        ));
    }
}
