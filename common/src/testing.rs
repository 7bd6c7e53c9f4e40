//! Fixtures shared by the unit tests.

use crate::session::SessionContext;
use crate::transport::{RawResponse, Transport, TransportError};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::rc::Rc;

pub const BASE_URL: &str = "https://hackatopia.devpost.com";

pub const LOGIN_PAGE: &str = r#"<html><head><title>Log in | Devpost</title></head><body>
<form id="new_user" action="/users/login" method="post">
  <input type="hidden" name="authenticity_token" value="login-token">
  <input type="email" name="user[email]">
  <input type="password" name="user[password]">
  <input type="submit" name="commit" value="Log in">
</form></body></html>"#;

/// A judging page with one radio group per criterion id.
pub fn judging_page(criterion_ids: &[u32]) -> String {
    let mut groups = String::new();
    for id in criterion_ids {
        let _ = write!(groups, "<fieldset><legend>Criterion {id}</legend>");
        for score in 1..=5 {
            let _ = write!(
                groups,
                r#"<label><input type="radio" name="grades[{id}]" value="{score}"> {score}</label>"#
            );
        }
        groups.push_str("</fieldset>");
    }

    format!(
        r#"<!DOCTYPE html><html><head><title>Judging | Devpost</title></head><body>
<header>
  <form action="/search" method="get"><input type="hidden" name="search_token" value="s"></form>
  <h2>Menu</h2><p>Not a section.</p>
</header>
<h1>  </h1>
<h1 id="app-title">Robo
   Arm</h1>
<h3>A robot arm that
folds laundry.</h3>
<h2>Inspiration</h2>
<p>Nobody likes   folding clothes.</p>
<h2>What it does</h2>
<p>It folds them.</p>
<h2>Built With</h2>
<ul><li>rust</li></ul>
<h2>What's next for Robo Arm</h2>
<p>Socks.</p>
<form class="judging" action="/submissions/123-robo-arm/submission_judgings/77" method="post">
  <input name="utf8" type="hidden" value="&#x2713;">
  <input type="hidden" name="_method" value="patch">
  <input type="hidden" name="authenticity_token" value="tok+en/==">
  <input type="hidden" name="submission_judging[recused]" value="0">
  <input type="checkbox" name="submission_judging[recused]" value="1">
  {groups}
  <input type="submit" name="commit" value="Save and continue">
</form>
</body></html>"#
    )
}

/// A recorded request: method, url, body.
pub type Call = (String, String, Option<String>);

/// An in-memory transport that replays canned responses and records calls.
#[derive(Default)]
pub struct FakeTransport {
    pub gets: HashMap<String, RawResponse>,
    pub posts: HashMap<String, RawResponse>,
    pub calls: Rc<RefCell<Vec<Call>>>,
}

impl FakeTransport {
    pub fn with_page(mut self, url: &str, status: u16, body: &str) -> Self {
        self.gets.insert(
            url.to_string(),
            RawResponse {
                status,
                final_url: url.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    /// A GET that ends on a different URL after redirects.
    pub fn with_redirect(mut self, url: &str, final_url: &str, body: &str) -> Self {
        self.gets.insert(
            url.to_string(),
            RawResponse {
                status: 200,
                final_url: final_url.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    pub fn with_post(mut self, url: &str, status: u16, final_url: &str, body: &str) -> Self {
        self.posts.insert(
            url.to_string(),
            RawResponse {
                status,
                final_url: final_url.to_string(),
                body: body.to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.calls)
    }
}

impl Transport for FakeTransport {
    fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<RawResponse, TransportError> {
        self.calls
            .borrow_mut()
            .push(("GET".to_string(), url.to_string(), None));
        self.gets.get(url).cloned().ok_or_else(|| TransportError {
            kind: "connection",
            message: format!("no route to {url}"),
        })
    }

    fn post_form(
        &self,
        url: &str,
        _headers: &[(String, String)],
        body: String,
    ) -> Result<RawResponse, TransportError> {
        self.calls
            .borrow_mut()
            .push(("POST".to_string(), url.to_string(), Some(body)));
        Ok(self.posts.get(url).cloned().unwrap_or_else(|| RawResponse {
            status: 200,
            final_url: format!("{BASE_URL}/submissions"),
            body: "<html><p>Thanks for judging!</p></html>".to_string(),
        }))
    }
}

pub fn session() -> SessionContext {
    SessionContext::new(
        BASE_URL,
        BTreeMap::from([("user-agent".to_string(), "test-agent".to_string())]),
        BTreeMap::from([("jwt".to_string(), "j".to_string())]),
    )
}
