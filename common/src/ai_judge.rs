//! Ratings produced by a chat-completion model reading the project write-up.

use crate::config::CriterionDescription;
use crate::ratings::RatingGenerator;
use crate::{FormSnapshot, JudgeError, ProjectPage, RatingSet, Result, ScoreRange};
use log::{debug, info};
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an experienced hackathon judge. You reply with JSON only.";
const TEMPERATURE: f32 = 0.7;

static INTEGER_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*-?\d+(?:\s*,\s*-?\d+)*\s*\]").expect("valid integer list regex")
});

/// Something that turns a prompt into a reply.
pub trait CompletionClient {
    /// # Errors
    /// Returns an `AiGeneration` error if the call fails or times out.
    fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}

/// An OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    /// # Errors
    /// Returns a config error if the HTTP client cannot be built.
    pub fn new(api_key: &str, model: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JudgeError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl CompletionClient for OpenAiClient {
    fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "temperature": TEMPERATURE,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| JudgeError::AiGeneration(format!("failed to call {url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(JudgeError::AiGeneration(format!(
                "chat API request failed: {status} - {error_text}"
            )));
        }

        let json: Value = response
            .json()
            .map_err(|e| JudgeError::AiGeneration(format!("unreadable chat API response: {e}")))?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| JudgeError::AiGeneration("chat API response missing content".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Build the rating prompt for a project and its form's criteria.
///
/// Criteria are described by position; `descriptions` fills in names and
/// guidance where available.
#[must_use]
pub fn build_prompt(
    page: &ProjectPage,
    form: &FormSnapshot,
    descriptions: &[CriterionDescription],
    range: ScoreRange,
) -> String {
    let n = form.criterion_field_names.len();
    let mut prompt = format!(
        "Evaluate the following hackathon project submission. Rate it on each criterion \
         with a whole number from {} (poor) to {} (excellent).\n\n# Project\nTitle: {}\n",
        range.min,
        range.max,
        if page.title.is_empty() { "Unknown Title" } else { page.title.as_str() }
    );
    prompt.push_str(&format!(
        "Description: {}\n",
        page.description.as_deref().unwrap_or("No description available")
    ));
    for (heading, text) in &page.sections {
        prompt.push_str(&format!("\n## {heading}\n{text}\n"));
    }

    prompt.push_str("\n# Criteria\n");
    for (i, field) in form.criterion_field_names.iter().enumerate() {
        let line = match descriptions.get(i) {
            Some(c) => {
                let weight = c.weight_percent.map(|w| format!(" ({w}%)")).unwrap_or_default();
                format!("{}. {}{weight}: {}", i + 1, c.name, c.description)
            }
            None => format!("{}. Criterion {}", i + 1, i + 1),
        };
        prompt.push_str(&format!("{line} [field {field}, {range}]\n"));
    }

    prompt.push_str(&format!(
        "\nReturn only JSON with exactly {n} integers in the order the criteria are listed, \
         like this: {{\"ratings\": [{}]}}",
        vec![range.max.to_string(); n].join(", ")
    ));
    prompt
}

fn integers_from_json(value: &Value) -> Option<Vec<i64>> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("ratings")?.as_array()?,
        _ => return None,
    };
    list.iter().map(Value::as_i64).collect()
}

/// Find the ordered list of scores in a model reply and check it against the form.
///
/// Accepts `{"ratings": [...]}`, a bare JSON array, or failing those the first
/// bracketed list of integers anywhere in the text (models like code fences).
///
/// # Errors
/// Returns an `AiGeneration` error if no list is found, the count is wrong, or a score is out of range.
pub fn parse_ratings_reply(reply: &str, expected: usize, range: ScoreRange) -> Result<Vec<u8>> {
    let trimmed = reply.trim();
    let object_slice = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };

    let integers = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|v| integers_from_json(&v))
        .or_else(|| {
            object_slice
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .and_then(|v| integers_from_json(&v))
        })
        .or_else(|| {
            INTEGER_LIST
                .find(trimmed)
                .and_then(|m| serde_json::from_str::<Vec<i64>>(m.as_str()).ok())
        })
        .ok_or_else(|| {
            JudgeError::AiGeneration(format!("no list of integer ratings in reply: {trimmed}"))
        })?;

    if integers.len() != expected {
        return Err(JudgeError::AiGeneration(format!(
            "expected {expected} ratings, reply had {}",
            integers.len()
        )));
    }
    integers
        .into_iter()
        .map(|score| {
            if range.contains(score) {
                u8::try_from(score)
                    .map_err(|_| JudgeError::AiGeneration(format!("rating {score} is not a score")))
            } else {
                Err(JudgeError::AiGeneration(format!(
                    "rating {score} is outside {range}"
                )))
            }
        })
        .collect()
}

/// Ratings from a language model.
pub struct AiRatings {
    client: Box<dyn CompletionClient>,
    descriptions: Vec<CriterionDescription>,
    range: ScoreRange,
    test_mode: bool,
}

impl AiRatings {
    #[must_use]
    pub fn new(
        client: Box<dyn CompletionClient>,
        descriptions: Vec<CriterionDescription>,
        range: ScoreRange,
        test_mode: bool,
    ) -> Self {
        Self {
            client,
            descriptions,
            range,
            test_mode,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.client.model()
    }

    fn log_test_mode(&self, page: &ProjectPage, prompt: &str) {
        info!("===== AI MODEL =====\nModel: {}", self.client.model());
        info!("===== PROJECT CONTENT SUMMARY =====");
        info!("Title: {}", page.title);
        info!("Sections available: {}", page.sections.len());
        for (heading, text) in &page.sections {
            info!("  - {heading}: {} chars", text.len());
        }
        info!("Total content length: {} characters", page.content_len());
        info!("===== BEGIN PROMPT =====\n{prompt}\n===== END PROMPT =====");
    }
}

impl RatingGenerator for AiRatings {
    fn generate(&mut self, form: &FormSnapshot, page: &ProjectPage) -> Result<RatingSet> {
        if form.criterion_field_names.is_empty() {
            return Err(JudgeError::InvalidState(
                "cannot rate a form without criteria".to_string(),
            ));
        }
        let prompt = build_prompt(page, form, &self.descriptions, self.range);
        if self.test_mode {
            self.log_test_mode(page, &prompt);
        } else {
            debug!("AI prompt:\n{prompt}");
        }

        let reply = self.client.complete(SYSTEM_PROMPT, &prompt)?;
        if self.test_mode {
            info!("===== MODEL REPLY =====\n{reply}\n===== END REPLY =====");
        }

        let scores = parse_ratings_reply(&reply, form.criterion_field_names.len(), self.range)?;
        let ratings = RatingSet::from_ordered(form, &scores, self.range)?;
        info!("AI-generated ratings: {:?}", ratings.in_form_order(form));
        Ok(ratings)
    }
}
