//! Contact-fact extraction from free text
//!
//! Mines labeled facts (`Name: …`, `Email: …`, `Telefon: …`) and bare email
//! addresses out of user messages. Extraction is idempotent: running it
//! twice over the same text yields the same facts.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)name:\s*([^,\n]+)").expect("name regex"));

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)e?-?mail:\s*([^,\n]+)").expect("email regex"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:telefon|tel|phone):\s*([^,\n]+)").expect("phone regex"));

static BARE_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("bare email regex")
});

/// Extract contact facts from one message's raw text
///
/// Keys in the returned mapping: `name`, `email`, `phone`. A bare email
/// address counts when no labeled one is present.
pub fn extract_contact_facts(text: &str) -> HashMap<String, String> {
    let mut facts = HashMap::new();

    if let Some(captures) = NAME_RE.captures(text) {
        facts.insert("name".to_string(), captures[1].trim().to_string());
    }
    // the label may be followed by prose; keep only the address token
    let labeled_email = EMAIL_RE
        .captures(text)
        .and_then(|captures| BARE_EMAIL_RE.find(captures.get(1).map_or("", |m| m.as_str())));
    if let Some(m) = labeled_email.or_else(|| BARE_EMAIL_RE.find(text)) {
        facts.insert("email".to_string(), m.as_str().to_string());
    }
    if let Some(captures) = PHONE_RE.captures(text) {
        facts.insert("phone".to_string(), captures[1].trim().to_string());
    }

    facts
}
