//! The authenticated browser session we replay on every request.

use crate::{DEFAULT_BASE_URL, JudgeError, Result};
use std::collections::BTreeMap;
use url::Url;

/// Cookies the site needs to recognise a logged-in judge.
pub const REQUIRED_COOKIES: [&str; 3] = ["jwt", "remember_user_token", "_devpost"];

/// Curl options whose argument we skip over.
const ARG_OPTIONS: [&str; 6] = ["-d", "--data", "--data-binary", "--data-raw", "-u", "--user"];

/// Headers and cookies of a logged-in session. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    base_url: String,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        base_url: &str,
        headers: BTreeMap<String, String>,
        cookies: BTreeMap<String, String>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            cookies,
        }
    }

    /// Pull the session out of a "Copy as cURL" capture from browser dev tools.
    ///
    /// # Errors
    /// Returns an error if the text cannot be split into shell words or holds no headers or cookies.
    pub fn from_curl(curl_command: &str) -> Result<Self> {
        let joined = curl_command.replace("\\\r\n", " ").replace("\\\n", " ");
        let tokens = shlex::split(&joined)
            .ok_or_else(|| JudgeError::Config("curl command has unbalanced quotes".to_string()))?;

        let mut headers = BTreeMap::new();
        let mut cookies = BTreeMap::new();
        let mut url: Option<String> = None;

        // skip the leading `curl`
        let mut iter = tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            match token.as_str() {
                "-H" | "--header" => {
                    let Some(header) = iter.next() else { break };
                    if let Some((key, value)) = header.split_once(": ") {
                        if key.eq_ignore_ascii_case("cookie") {
                            cookies.extend(parse_cookie_string(value));
                        } else {
                            headers.insert(key.to_ascii_lowercase(), value.to_string());
                        }
                    }
                }
                "-b" | "--cookie" => {
                    let Some(cookie_string) = iter.next() else { break };
                    cookies.extend(parse_cookie_string(cookie_string));
                }
                option if ARG_OPTIONS.contains(&option) => {
                    iter.next();
                }
                option if option.starts_with('-') => {}
                other => {
                    if url.is_none() {
                        url = Some(other.to_string());
                    }
                }
            }
        }

        if headers.is_empty() && cookies.is_empty() {
            return Err(JudgeError::Config(
                "no headers or cookies found in the curl command".to_string(),
            ));
        }

        let base_url = url
            .as_deref()
            .and_then(base_url_of)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self::new(&base_url, headers, cookies))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Absolute URL for a site-relative path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// The `Cookie` header value, or `None` without cookies.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Headers plus the cookie header, ready to hand to a transport.
    #[must_use]
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(cookie) = self.cookie_header() {
            headers.push(("cookie".to_string(), cookie));
        }
        headers
    }

    /// Which of `required` are absent from the session.
    #[must_use]
    pub fn missing_cookies<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.cookies.contains_key(**name))
            .copied()
            .collect()
    }
}

/// Split `a=1; b=2` into pairs. Values may contain `=`.
fn parse_cookie_string(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Scheme and host of a URL, e.g. `https://example.devpost.com`.
fn base_url_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.origin() {
        origin @ url::Origin::Tuple(..) => Some(origin.ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}
