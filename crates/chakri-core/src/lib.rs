//! Core domain model, fingerprinting and field normalization for Chakri.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "chakri-core";

/// Canonical persisted job listing. Immutable once built; the fingerprint is
/// the sole dedup identity, so two records with equal fingerprints are the
/// same job regardless of their other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub posted_date: NaiveDate,
    pub deadline: Option<NaiveDate>,
    pub job_type: Option<String>,
    pub experience: Option<String>,
    pub url: String,
    pub source: String,
    pub fingerprint: String,
}

/// Unvalidated extractor output, field values straight off the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub job_type: Option<String>,
    pub experience: Option<String>,
    pub url: String,
}

impl RawCandidate {
    /// Canonicalize a candidate into a [`JobRecord`].
    ///
    /// Returns `None` when title or company is missing or blank; callers
    /// skip that one candidate and keep processing the page. Identity
    /// fields are cleaned before fingerprinting so re-listings that differ
    /// only in casing or spacing collapse onto the same row.
    pub fn into_record(self, source_id: &str, posted_date: NaiveDate) -> Option<JobRecord> {
        let title = clean_text(self.title.as_deref().unwrap_or(""));
        let company = clean_text(self.company.as_deref().unwrap_or(""));
        if title.is_empty() || company.is_empty() {
            return None;
        }
        let location = clean_text(self.location.as_deref().unwrap_or(""));
        let fingerprint = identity_fingerprint(&title, &company, &location);
        Some(JobRecord {
            salary: normalize_salary(self.salary.as_deref()),
            description: self.description.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            requirements: self.requirements.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            deadline: self.deadline,
            job_type: self.job_type.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            experience: self.experience.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            url: self.url,
            source: source_id.to_string(),
            posted_date,
            title,
            company,
            location,
            fingerprint,
        })
    }
}

/// 128-bit dedup identity over the order-sensitive concatenation of the
/// three identity fields. Pure and deterministic; callers are expected to
/// pass already-cleaned strings. Used only as a storage key.
pub fn fingerprint(title: &str, company: &str, location: &str) -> String {
    let digest = md5::compute(format!("{title}{company}{location}"));
    hex::encode(digest.0)
}

/// Case- and whitespace-insensitive variant of [`fingerprint`]: each field
/// is lowercased and whitespace-collapsed before hashing. This is the
/// identity the ingestion pipeline uses, so `"Senior Dev"` and
/// `"senior  dev "` deduplicate onto one row.
pub fn identity_fingerprint(title: &str, company: &str, location: &str) -> String {
    fingerprint(
        &clean_text(title).to_lowercase(),
        &clean_text(company).to_lowercase(),
        &clean_text(location).to_lowercase(),
    )
}

/// Collapse whitespace runs to single spaces and trim. Idempotent; empty or
/// all-whitespace input yields `""`.
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

static SALARY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d+(?:,\d+)*)\s*(?:to|-)?\s*(\d+(?:,\d+)*)?\s*(?:BDT|Taka|TK)",
        r"(?i)BDT\s*(\d+(?:,\d+)*)\s*(?:to|-)?\s*(\d+(?:,\d+)*)?",
        r"(\d+(?:,\d+)*)\s*(?:to|-)?\s*(\d+(?:,\d+)*)?",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("salary pattern compiles"))
    .collect()
});

/// Normalize free-form salary text to a clean display string.
///
/// Portals disagree too much for structured parsing at ingestion time, so
/// this only guarantees a clean string: a recognized currency-amount
/// pattern passes through cleaned and otherwise the cleaned text is kept
/// verbatim, except that any casing of `negotiable` canonicalizes to
/// `"Negotiable"`. Numeric extraction happens later in the aggregation
/// query, which strips non-digits itself.
pub fn normalize_salary(raw: Option<&str>) -> Option<String> {
    let cleaned = clean_text(raw?);
    if cleaned.is_empty() {
        return None;
    }
    if SALARY_PATTERNS.iter().any(|p| p.is_match(&cleaned)) {
        return Some(cleaned);
    }
    if cleaned.eq_ignore_ascii_case("negotiable") {
        Some("Negotiable".to_string())
    } else {
        Some(cleaned)
    }
}
