//! Settings loaded from the JSON config file written by `setup`.

use crate::session::SessionContext;
use crate::{
    DEFAULT_BASE_URL, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, DEFAULT_REQUEST_TIMEOUT_SECS,
    JudgeError, Result, ScoreRange,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "judgebot.json";

/// How to recognise that the site bounced us to its login page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSignature {
    /// Substrings of the final URL that mean "login page".
    pub url_markers: Vec<String>,
    /// Substrings of the body that only the login page contains.
    pub body_markers: Vec<String>,
}

impl Default for AuthSignature {
    fn default() -> Self {
        Self {
            url_markers: vec!["/users/login".to_string(), "/users/sign_in".to_string()],
            body_markers: vec!["name=\"user[password]\"".to_string()],
        }
    }
}

impl AuthSignature {
    #[must_use]
    pub fn matches(&self, final_url: &str, body: &str) -> bool {
        self.url_markers.iter().any(|m| final_url.contains(m.as_str()))
            || self.body_markers.iter().any(|m| body.contains(m.as_str()))
    }
}

/// A grading criterion as described to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionDescription {
    pub name: String,
    pub weight_percent: Option<u8>,
    pub description: String,
}

impl CriterionDescription {
    fn new(name: &str, weight_percent: u8, description: &str) -> Self {
        Self {
            name: name.to_string(),
            weight_percent: Some(weight_percent),
            description: description.to_string(),
        }
    }
}

/// The rubric the judging form uses, in form order.
#[must_use]
pub fn default_criteria() -> Vec<CriterionDescription> {
    vec![
        CriterionDescription::new(
            "Quality of Idea",
            20,
            "How original, innovative, and well-conceived is the project idea?",
        ),
        CriterionDescription::new(
            "Quality of Code",
            20,
            "How technically complex, well-implemented, and clean is the project's code?",
        ),
        CriterionDescription::new(
            "Quality of Project",
            40,
            "How well-executed is the overall project, including usability, design, and completeness?",
        ),
        CriterionDescription::new(
            "Project Impact",
            20,
            "How impactful or useful is the project? What potential does it have to solve real problems?",
        ),
    ]
}

fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("accept-language", "en-US,en;q=0.9"),
        ("cache-control", "max-age=0"),
        ("upgrade-insecure-requests", "1"),
        (
            "user-agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Scores the judging form accepts.
    pub score_range: ScoreRange,
    /// Scores the random strategy draws from.
    pub random_range: ScoreRange,
    pub request_timeout_secs: u64,
    /// Attempts per request; 1 disables retries.
    pub max_retries: u32,
    pub auth_signature: AuthSignature,
    pub criteria: Vec<CriterionDescription>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headers: default_headers(),
            cookies: BTreeMap::new(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            score_range: ScoreRange::VALID,
            random_range: ScoreRange::RANDOM_DEFAULT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: 1,
            auth_signature: AuthSignature::default(),
            criteria: default_criteria(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults, which have no cookies.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| JudgeError::Io(format!("could not read {}: {e}", path.display())))?;
            serde_json::from_str(&content).map_err(|e| {
                JudgeError::Config(format!("could not parse {}: {e}", path.display()))
            })?
        } else {
            warn!(
                "Config file {} not found. Using default headers with no cookies; run `setup` first.",
                path.display()
            );
            Settings::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::write_json(path, self)
    }

    /// Reject ranges the rest of the pipeline cannot honour.
    ///
    /// # Errors
    /// Returns a config error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        ScoreRange::new(self.score_range.min, self.score_range.max)?;
        ScoreRange::new(self.random_range.min, self.random_range.max)?;
        if !self.score_range.covers(&self.random_range) {
            return Err(JudgeError::Config(format!(
                "random range {} is not inside the valid range {}",
                self.random_range, self.score_range
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(JudgeError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace the session part of the settings, keeping everything else.
    #[must_use]
    pub fn with_session(mut self, session: &SessionContext) -> Self {
        self.base_url = session.base_url().to_string();
        self.headers = session.headers().clone();
        self.cookies = session.cookies().clone();
        self
    }

    #[must_use]
    pub fn session(&self) -> SessionContext {
        SessionContext::new(&self.base_url, self.headers.clone(), self.cookies.clone())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The API key from the environment, falling back to the config file.
    #[must_use]
    pub fn resolved_api_key(&self, from_env: Option<String>) -> Option<String> {
        from_env
            .filter(|k| !k.is_empty())
            .or_else(|| self.openai_api_key.clone().filter(|k| !k.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.cookies.is_empty());
        assert_eq!(settings.criteria.len(), 4);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judgebot.json");
        fs::write(
            &path,
            r#"{"base_url": "https://x.devpost.com", "cookies": {"jwt": "t"}, "random_range": {"min": 3, "max": 3}}"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.base_url, "https://x.devpost.com");
        assert_eq!(settings.cookies["jwt"], "t");
        assert_eq!(settings.random_range, ScoreRange { min: 3, max: 3 });
        assert_eq!(settings.openai_model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judgebot.json");
        let mut settings = Settings::default();
        settings.openai_api_key = Some("sk-test".to_string());
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_validate_rejects_random_outside_valid() {
        let settings = Settings {
            random_range: ScoreRange { min: 0, max: 4 },
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(JudgeError::Config(_))));
    }

    #[test]
    fn test_env_key_wins() {
        let settings = Settings {
            openai_api_key: Some("from-file".to_string()),
            ..Settings::default()
        };
        assert_eq!(
            settings.resolved_api_key(Some("from-env".to_string())),
            Some("from-env".to_string())
        );
        assert_eq!(
            settings.resolved_api_key(Some(String::new())),
            Some("from-file".to_string())
        );
        assert_eq!(Settings::default().resolved_api_key(None), None);
    }

    #[test]
    fn test_auth_signature_matches_login_page() {
        let sig = AuthSignature::default();
        assert!(sig.matches("https://devpost.com/users/login?ref=x", ""));
        assert!(sig.matches("https://x.devpost.com/", "<input name=\"user[password]\">"));
        assert!(!sig.matches("https://x.devpost.com/submissions/1-a/judging", "<form></form>"));
    }
}
