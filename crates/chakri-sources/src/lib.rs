//! Portal extractor contracts + per-portal selector logic.
//!
//! Each portal gets its own [`JobSource`] because the markup of the known
//! sites shares nothing; the only unified contract is page-in,
//! candidates-out. Selection is by static registration via
//! [`source_for_id`], never by runtime reflection.

use std::time::Duration;

use async_trait::async_trait;
use chakri_core::{JobRecord, RawCandidate};
use chakri_storage::{FetchError, HttpFetcher};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

pub const CRATE_NAME: &str = "chakri-sources";

/// Capability set every portal implements: build the page URL, fetch it,
/// turn its markup into raw candidates.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn page_url(&self, page: u32, keywords: &[String]) -> String;

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        page: u32,
        keywords: &[String],
    ) -> Result<String, FetchError> {
        http.fetch_text(self.source_id(), &self.page_url(page, keywords))
            .await
    }

    fn extract_candidates(&self, html: &str) -> Vec<RawCandidate>;
}

/// Scrape one source across its pages, strictly sequentially.
///
/// Page N+1 is only requested after page N completes, with a randomized
/// 2-6 s delay in between so the portal is not hammered. A failed page is
/// logged and skipped; a candidate missing its identity fields is logged
/// and skipped; neither aborts the rest of the scrape.
pub async fn scrape_source(
    source: &dyn JobSource,
    http: &HttpFetcher,
    keywords: &[String],
    max_pages: u32,
) -> Vec<JobRecord> {
    let source_id = source.source_id();
    let mut jobs = Vec::new();

    for page in 1..=max_pages {
        if page > 1 {
            tokio::time::sleep(page_delay()).await;
        }

        let html = match source.fetch_page(http, page, keywords).await {
            Ok(html) => html,
            Err(err) => {
                warn!(source_id, page, "skipping page after fetch failure: {err}");
                continue;
            }
        };

        let posted_date = Utc::now().date_naive();
        let candidates = source.extract_candidates(&html);
        debug!(source_id, page, candidates = candidates.len(), "page extracted");

        for candidate in candidates {
            match candidate.into_record(source_id, posted_date) {
                Some(job) => jobs.push(job),
                None => warn!(source_id, page, "skipping candidate with missing title/company"),
            }
        }
    }

    info!(source_id, jobs = jobs.len(), "scrape finished");
    jobs
}

fn page_delay() -> Duration {
    Duration::from_millis(fastrand::u64(2_000..=6_000))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first_text(scope: &ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    scope
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn select_first_attr(scope: &ElementRef<'_>, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    scope
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn absolute_url(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(err) => {
            warn!(base, href, "could not resolve listing href, keeping it raw: {err}");
            href.to_string()
        }
    }
}

/// jobs.bdjobs.com: paginated search results, one `div.job-list-item` per
/// listing. Salary and description only appear on detail pages, which this
/// extractor does not follow.
#[derive(Debug, Clone, Copy)]
struct BdjobsSource;

impl BdjobsSource {
    const BASE_URL: &'static str = "https://jobs.bdjobs.com";
    const SEARCH_URL: &'static str = "https://jobs.bdjobs.com/jobsearch.asp";
}

#[async_trait]
impl JobSource for BdjobsSource {
    fn source_id(&self) -> &'static str {
        "bdjobs"
    }

    fn page_url(&self, page: u32, keywords: &[String]) -> String {
        let mut url = format!("{}?fc=1&pg={page}", Self::SEARCH_URL);
        if !keywords.is_empty() {
            url.push_str("&q=");
            url.push_str(&keywords.join("+"));
        }
        url
    }

    fn extract_candidates(&self, html: &str) -> Vec<RawCandidate> {
        let document = Html::parse_document(html);
        let Ok(items) = Selector::parse("div.job-list-item") else {
            return Vec::new();
        };

        document
            .select(&items)
            .map(|item| RawCandidate {
                title: select_first_text(&item, "h3")
                    .or_else(|| select_first_text(&item, "a.job-title")),
                company: select_first_text(&item, "div.company-name")
                    .or_else(|| select_first_text(&item, "span.company")),
                location: select_first_text(&item, "div.location")
                    .or_else(|| select_first_text(&item, "span.location")),
                url: select_first_attr(&item, "a", "href")
                    .map(|href| absolute_url(Self::BASE_URL, &href))
                    .unwrap_or_default(),
                job_type: Some("Full-time".to_string()),
                ..Default::default()
            })
            .collect()
    }
}

/// jobs.com.bd: `div.job-item` cards with salary visible on the listing
/// page. The portal ignores search keywords, so the page URL carries only
/// the page number.
#[derive(Debug, Clone, Copy)]
struct JobsComBdSource;

impl JobsComBdSource {
    const BASE_URL: &'static str = "https://jobs.com.bd";
    const SEARCH_URL: &'static str = "https://jobs.com.bd/jobs";
}

#[async_trait]
impl JobSource for JobsComBdSource {
    fn source_id(&self) -> &'static str {
        "jobscombd"
    }

    fn page_url(&self, page: u32, _keywords: &[String]) -> String {
        format!("{}?page={page}", Self::SEARCH_URL)
    }

    fn extract_candidates(&self, html: &str) -> Vec<RawCandidate> {
        let document = Html::parse_document(html);
        let Ok(items) = Selector::parse("div.job-item") else {
            return Vec::new();
        };

        document
            .select(&items)
            .map(|item| RawCandidate {
                title: select_first_text(&item, "h3 a")
                    .or_else(|| select_first_text(&item, ".job-title")),
                company: select_first_text(&item, ".company"),
                location: select_first_text(&item, ".location"),
                salary: select_first_text(&item, ".salary"),
                url: select_first_attr(&item, "a", "href")
                    .map(|href| absolute_url(Self::BASE_URL, &href))
                    .unwrap_or_default(),
                ..Default::default()
            })
            .collect()
    }
}

pub fn bdjobs_source() -> impl JobSource {
    BdjobsSource
}

pub fn jobscombd_source() -> impl JobSource {
    JobsComBdSource
}

pub fn source_for_id(source_id: &str) -> Option<Box<dyn JobSource>> {
    match source_id {
        "bdjobs" => Some(Box::new(BdjobsSource)),
        "jobscombd" => Some(Box::new(JobsComBdSource)),
        _ => None,
    }
}

pub fn known_source_ids() -> &'static [&'static str] {
    &["bdjobs", "jobscombd"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chakri_storage::HttpClientConfig;

    const BDJOBS_PAGE: &str = r#"
        <html><body>
          <div class="job-list-item">
            <h3>  Senior   Rust Engineer </h3>
            <div class="company-name">Acme Ltd</div>
            <div class="location">Dhaka</div>
            <a href="/job/1234">view</a>
          </div>
          <div class="job-list-item">
            <a class="job-title" href="https://jobs.bdjobs.com/job/5678">QA Engineer</a>
            <span class="company">Chattogram Soft</span>
            <span class="location">Chittagong</span>
          </div>
          <div class="job-list-item">
            <h3>Listing with no company</h3>
            <a href="/job/9999">view</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn bdjobs_extracts_one_candidate_per_listing() {
        let source = bdjobs_source();
        let candidates = source.extract_candidates(BDJOBS_PAGE);
        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].title.as_deref(), Some("Senior   Rust Engineer"));
        assert_eq!(candidates[0].company.as_deref(), Some("Acme Ltd"));
        assert_eq!(candidates[0].url, "https://jobs.bdjobs.com/job/1234");

        assert_eq!(candidates[1].title.as_deref(), Some("QA Engineer"));
        assert_eq!(candidates[1].url, "https://jobs.bdjobs.com/job/5678");
    }

    #[test]
    fn malformed_candidate_is_dropped_at_normalization_not_extraction() {
        let source = bdjobs_source();
        let candidates = source.extract_candidates(BDJOBS_PAGE);
        let posted = Utc::now().date_naive();
        let records: Vec<JobRecord> = candidates
            .into_iter()
            .filter_map(|c| c.into_record("bdjobs", posted))
            .collect();
        // The third listing has no company, so it alone is skipped.
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "Senior Rust Engineer");
    }

    #[test]
    fn bdjobs_page_url_carries_page_and_keywords() {
        let source = bdjobs_source();
        let keywords = vec!["python".to_string(), "developer".to_string()];
        assert_eq!(
            source.page_url(3, &keywords),
            "https://jobs.bdjobs.com/jobsearch.asp?fc=1&pg=3&q=python+developer"
        );
        assert_eq!(
            source.page_url(1, &[]),
            "https://jobs.bdjobs.com/jobsearch.asp?fc=1&pg=1"
        );
    }

    #[test]
    fn listing_hrefs_resolve_like_a_browser_would() {
        let html = r#"
            <div class="job-list-item">
              <h3>Hot Job</h3>
              <div class="company-name">Acme Ltd</div>
              <a href="//hotjobs.bdjobs.com/jobs/detail/1234">view</a>
            </div>
            <div class="job-list-item">
              <h3>Nearby Job</h3>
              <div class="company-name">Acme Ltd</div>
              <a href="../postings/55">view</a>
            </div>
        "#;
        let candidates = bdjobs_source().extract_candidates(html);
        assert_eq!(candidates[0].url, "https://hotjobs.bdjobs.com/jobs/detail/1234");
        assert_eq!(candidates[1].url, "https://jobs.bdjobs.com/postings/55");
    }

    #[test]
    fn jobscombd_extracts_salary_from_listing_card() {
        let html = r#"
            <div class="job-item">
              <h3><a href="/jobs/77">Accountant</a></h3>
              <div class="company">Grameen Digital</div>
              <div class="location">Dhaka</div>
              <div class="salary">BDT 30,000 - 40,000</div>
            </div>
        "#;
        let source = jobscombd_source();
        let candidates = source.extract_candidates(html);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].salary.as_deref(), Some("BDT 30,000 - 40,000"));
        assert_eq!(candidates[0].url, "https://jobs.com.bd/jobs/77");
    }

    #[test]
    fn registry_resolves_known_ids_only() {
        for id in known_source_ids() {
            let source = source_for_id(id).expect("registered source");
            assert_eq!(source.source_id(), *id);
        }
        assert!(source_for_id("linkedin").is_none());
    }

    #[test]
    fn page_delay_stays_inside_jitter_bounds() {
        for _ in 0..100 {
            let delay = page_delay();
            assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(6));
        }
    }

    struct FlakyPageSource;

    #[async_trait]
    impl JobSource for FlakyPageSource {
        fn source_id(&self) -> &'static str {
            "flaky"
        }

        fn page_url(&self, page: u32, _keywords: &[String]) -> String {
            format!("https://flaky.example/jobs?page={page}")
        }

        async fn fetch_page(
            &self,
            _http: &HttpFetcher,
            page: u32,
            _keywords: &[String],
        ) -> Result<String, FetchError> {
            if page == 2 {
                return Err(FetchError::HttpStatus {
                    status: 500,
                    url: self.page_url(page, &[]),
                });
            }
            Ok(format!(
                r#"<div class="job-list-item">
                     <h3>Job on page {page}</h3>
                     <div class="company-name">Acme Ltd</div>
                     <div class="location">Dhaka</div>
                     <a href="/job/{page}"></a>
                   </div>"#
            ))
        }

        fn extract_candidates(&self, html: &str) -> Vec<RawCandidate> {
            bdjobs_source().extract_candidates(html)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_is_skipped_and_pagination_continues() {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("fetcher");
        let jobs = scrape_source(&FlakyPageSource, &http, &[], 3).await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "Job on page 1");
        assert_eq!(jobs[1].title, "Job on page 3");
    }
}
