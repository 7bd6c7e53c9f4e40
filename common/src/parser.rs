//! Parser for judging pages.
//!
//! Every assumption about the site's markup lives here: the judging form's
//! action, the `grades[<id>]` field naming, and the h1/h3/h2+p layout of the
//! project write-up.

use crate::{AUTHENTICITY_TOKEN_FIELD, FormSnapshot, JudgeError, ProjectPage, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static JUDGING_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/submissions/\d+-[^/]+/submission_judgings/\d+").expect("valid action regex")
});

static CRITERION_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^grades\[\d+\]$").expect("valid criterion regex"));

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| JudgeError::Parse(format!("bad selector {css:?}: {e:?}")))
}

/// Collapse every whitespace run to one space and trim the ends.
#[must_use]
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

fn has_type(element: &ElementRef<'_>, wanted: &str) -> bool {
    element
        .value()
        .attr("type")
        .is_some_and(|t| t.eq_ignore_ascii_case(wanted))
}

/// Parse a judging page into the form to submit and the project text to rate.
///
/// # Errors
/// Returns a parse error if the form has no authenticity token or no criterion fields.
pub fn parse_judging_page(html: &str) -> Result<(FormSnapshot, ProjectPage)> {
    let document = Html::parse_document(html);
    let form = parse_form(&document)?;
    let mut page = parse_project_text(&document)?;
    page.raw_html = html.to_string();
    Ok((form, page))
}

/// Find the judging form, or fall back to the whole document.
fn judging_form<'a>(document: &'a Html, criterion_inputs: &Selector) -> Result<ElementRef<'a>> {
    let form_selector = selector("form")?;
    let forms: Vec<ElementRef<'a>> = document.select(&form_selector).collect();

    let by_action = forms.iter().find(|form| {
        form.value()
            .attr("action")
            .is_some_and(|action| JUDGING_ACTION.is_match(action))
    });
    let by_fields = || {
        forms.iter().find(|form| {
            form.select(criterion_inputs)
                .any(|el| el.value().attr("name").is_some_and(|n| CRITERION_FIELD.is_match(n)))
        })
    };

    Ok(by_action
        .or_else(by_fields)
        .copied()
        .unwrap_or_else(|| document.root_element()))
}

fn parse_form(document: &Html) -> Result<FormSnapshot> {
    let criterion_inputs = selector("input, select")?;
    let scope = judging_form(document, &criterion_inputs)?;

    let mut hidden_fields = BTreeMap::new();
    let mut criterion_field_names = Vec::new();
    let mut seen = HashSet::new();
    let mut submit_button = None;

    for element in scope.select(&criterion_inputs) {
        let Some(name) = element.value().attr("name") else {
            continue;
        };
        let is_input = element.value().name() == "input";

        if CRITERION_FIELD.is_match(name) {
            if seen.insert(name.to_string()) {
                criterion_field_names.push(name.to_string());
            }
        } else if is_input && has_type(&element, "hidden") {
            let value = element.value().attr("value").unwrap_or_default();
            hidden_fields
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        } else if is_input && submit_button.is_none() && has_type(&element, "submit") {
            let value = element.value().attr("value").unwrap_or_default();
            submit_button = Some((name.to_string(), value.to_string()));
        }
    }

    if hidden_fields
        .get(AUTHENTICITY_TOKEN_FIELD)
        .is_none_or(String::is_empty)
    {
        return Err(JudgeError::Parse(format!(
            "no {AUTHENTICITY_TOKEN_FIELD} hidden field on the judging form"
        )));
    }
    if criterion_field_names.is_empty() {
        return Err(JudgeError::Parse(
            "no grading criteria found on the judging form".to_string(),
        ));
    }

    let action = scope
        .value()
        .attr("action")
        .filter(|a| !a.is_empty())
        .map(ToString::to_string);

    Ok(FormSnapshot {
        hidden_fields,
        criterion_field_names,
        action,
        submit_button,
    })
}

/// Title from the first non-empty h1, the h3 after it as a tagline, then every
/// h2 with the paragraph that follows it. Missing pieces are skipped.
fn parse_project_text(document: &Html) -> Result<ProjectPage> {
    let text_selector = selector("h1, h2, h3, p")?;

    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut sections = Vec::new();
    let mut pending_heading: Option<String> = None;

    for element in document.select(&text_selector) {
        let text = element_text(&element);
        match element.value().name() {
            "h1" if title.is_none() && !text.is_empty() => title = Some(text),
            "h3" if title.is_some() && description.is_none() && !text.is_empty() => {
                description = Some(text);
            }
            "h2" if title.is_some() && !text.is_empty() => pending_heading = Some(text),
            "p" if !text.is_empty() => {
                if let Some(heading) = pending_heading.take() {
                    sections.push((heading, text));
                }
            }
            _ => {}
        }
    }

    Ok(ProjectPage {
        title: title.unwrap_or_default(),
        description,
        sections,
        raw_html: String::new(),
    })
}
