//! Scrape-cycle orchestration: concurrent fetch across portals, persistence,
//! report aggregation, SMTP delivery and the daily schedule.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chakri_core::JobRecord;
use chakri_sources::{scrape_source, source_for_id, JobSource};
use chakri_storage::{HttpClientConfig, HttpFetcher, JobStore, LocationStats};
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "chakri-pipeline";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub email_address: Option<String>,
    pub email_password: Option<String>,
    pub recipients: Vec<String>,
    pub keywords: Vec<String>,
    pub source_ids: Vec<String>,
    pub max_pages: u32,
    pub workers: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scrape_cron: String,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres:@localhost/job_portal".to_string()),
            smtp_server: std::env::var("SMTP_SERVER")
                .unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            email_address: std::env::var("EMAIL_ADDRESS").ok().filter(|v| !v.is_empty()),
            email_password: std::env::var("EMAIL_PASSWORD").ok().filter(|v| !v.is_empty()),
            recipients: split_csv(&std::env::var("EMAIL_RECIPIENTS").unwrap_or_default()),
            keywords: split_csv(
                &std::env::var("SCRAPE_KEYWORDS")
                    .unwrap_or_else(|_| "python,developer,engineer,analyst".to_string()),
            ),
            source_ids: split_csv(
                &std::env::var("SCRAPE_SOURCES").unwrap_or_else(|_| "bdjobs,jobscombd".to_string()),
            ),
            max_pages: std::env::var("SCRAPE_MAX_PAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            workers: std::env::var("SCRAPE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            user_agent: std::env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
            }),
            scrape_cron: std::env::var("SCRAPE_CRON")
                .unwrap_or_else(|_| "0 0 9 * * *".to_string()),
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Run every registered source concurrently under a bounded worker count.
///
/// Each source runs as its own task; a small permit count (2 by default)
/// keeps the portals from seeing a burst of parallel crawlers. Tasks share
/// no mutable state: each returns its own candidate list and the union is
/// assembled only after every task has completed or failed. A panicking
/// source is logged and contributes nothing; its siblings are unaffected.
/// Ordering of the returned list is not meaningful.
pub async fn fetch_all_sources(
    sources: Vec<Box<dyn JobSource>>,
    http: Arc<HttpFetcher>,
    keywords: &[String],
    max_pages: u32,
    workers: usize,
) -> Vec<JobRecord> {
    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for source in sources {
        let limit = Arc::clone(&limit);
        let http = Arc::clone(&http);
        let keywords = keywords.to_vec();
        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.expect("semaphore not closed");
            let source_id = source.source_id();
            let jobs = scrape_source(source.as_ref(), &http, &keywords, max_pages).await;
            info!(source_id, jobs = jobs.len(), "source completed");
            jobs
        });
    }

    let mut all_jobs = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(jobs) => all_jobs.extend(jobs),
            Err(err) => error!("source task aborted, dropping its results: {err}"),
        }
    }
    all_jobs
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: DateTime<Utc>,
    pub new_job_count: usize,
    pub sample_jobs: Vec<JobRecord>,
    pub top_locations: Vec<LocationStats>,
}

/// Pure composition of the day's newly-inserted records with the stored
/// location aggregate: at most 10 sample records and 5 top locations.
pub fn build_report(
    date: DateTime<Utc>,
    new_jobs: &[JobRecord],
    stats: &[LocationStats],
) -> DailyReport {
    DailyReport {
        date,
        new_job_count: new_jobs.len(),
        sample_jobs: new_jobs.iter().take(10).cloned().collect(),
        top_locations: stats.iter().take(5).cloned().collect(),
    }
}

pub fn render_report_html(report: &DailyReport) -> String {
    let mut html = String::new();
    html.push_str("<html>\n<body>\n");
    html.push_str("<h2>Daily Job Scraping Report</h2>\n");
    html.push_str(&format!(
        "<p><strong>Date:</strong> {}</p>\n",
        report.date.format("%Y-%m-%d %H:%M:%S")
    ));
    html.push_str(&format!(
        "<p><strong>New Jobs Found:</strong> {}</p>\n",
        report.new_job_count
    ));

    html.push_str("<h3>Recent Job Listings</h3>\n");
    html.push_str("<table border=\"1\" cellpadding=\"5\" cellspacing=\"0\">\n");
    html.push_str("<tr><th>Title</th><th>Company</th><th>Location</th><th>Source</th></tr>\n");
    for job in &report.sample_jobs {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            job.title, job.company, job.location, job.source
        ));
    }
    html.push_str("</table>\n");

    html.push_str("<h3>Location Analysis</h3>\n");
    html.push_str("<p>Top locations by job count:</p>\n<ul>\n");
    for stats in &report.top_locations {
        html.push_str(&format!(
            "<li>{}: {} jobs</li>\n",
            stats.location, stats.job_count
        ));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

pub struct EmailNotifier {
    smtp_server: String,
    smtp_port: u16,
    email_address: Option<String>,
    email_password: Option<String>,
    recipients: Vec<String>,
}

impl EmailNotifier {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            smtp_server: config.smtp_server.clone(),
            smtp_port: config.smtp_port,
            email_address: config.email_address.clone(),
            email_password: config.email_password.clone(),
            recipients: config.recipients.clone(),
        }
    }

    /// Deliver the daily report over SMTP. Missing credentials or an empty
    /// recipient list downgrade to a logged skip: data collection succeeded
    /// either way, so nothing here is allowed to fail the cycle.
    pub async fn send_daily_report(&self, report: &DailyReport) -> Result<()> {
        let (Some(address), Some(password)) =
            (self.email_address.clone(), self.email_password.clone())
        else {
            warn!("email credentials not configured; skipping daily report");
            return Ok(());
        };
        if self.recipients.is_empty() {
            warn!("no email recipients configured; skipping daily report");
            return Ok(());
        }

        let from: Mailbox = address
            .parse()
            .with_context(|| format!("parsing sender address {address}"))?;
        let mut builder = Message::builder()
            .from(from)
            .subject(format!("Daily Job Report - {}", report.date.format("%Y-%m-%d")))
            .header(ContentType::TEXT_HTML);
        for recipient in &self.recipients {
            let to: Mailbox = recipient
                .parse()
                .with_context(|| format!("parsing recipient address {recipient}"))?;
            builder = builder.to(to);
        }
        let message = builder
            .body(render_report_html(report))
            .context("building report message")?;

        let server = self.smtp_server.clone();
        let port = self.smtp_port;
        let creds = Credentials::new(address, password);
        let recipient_count = self.recipients.len();

        // lettre's SmtpTransport is blocking, so the handshake and send run
        // off the async runtime.
        tokio::task::spawn_blocking(move || {
            let mailer = SmtpTransport::starttls_relay(&server)?
                .port(port)
                .credentials(creds)
                .build();
            mailer.send(&message)
        })
        .await
        .context("joining smtp send task")?
        .context("sending daily report over smtp")?;

        info!(recipients = recipient_count, "daily report sent");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: usize,
    pub candidates: usize,
    pub new_jobs: usize,
}

fn registered_sources(source_ids: &[String]) -> Vec<Box<dyn JobSource>> {
    source_ids
        .iter()
        .filter_map(|id| match source_for_id(id) {
            Some(source) => Some(source),
            None => {
                warn!(source_id = %id, "unknown source id in config, ignoring");
                None
            }
        })
        .collect()
}

/// One full scrape -> persist -> aggregate -> notify cycle.
///
/// Only resource setup (store connection, HTTP client build) is fatal.
/// Everything after degrades per page, per candidate or per record, and a
/// failed email still counts as a successful cycle.
pub async fn run_once(config: &PipelineConfig) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(%run_id, "starting scrape cycle");

    let store = JobStore::connect(&config.database_url).await?;
    let http = Arc::new(HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?);

    let sources = registered_sources(&config.source_ids);
    let source_count = sources.len();
    let candidates =
        fetch_all_sources(sources, http, &config.keywords, config.max_pages, config.workers).await;

    // Single-threaded persistence phase; the fingerprint uniqueness
    // constraint at the engine is the only dedup guard required.
    let mut new_jobs = Vec::new();
    for job in &candidates {
        if store.upsert(job).await {
            info!(title = %job.title, company = %job.company, "new job inserted");
            new_jobs.push(job.clone());
        }
    }

    let stats = match store.aggregate_by_location().await {
        Ok(stats) => stats,
        Err(err) => {
            // The aggregate is advisory; an empty breakdown still makes a
            // valid report.
            warn!("location aggregation failed: {err:#}");
            Vec::new()
        }
    };

    if !new_jobs.is_empty() {
        let report = build_report(Utc::now(), &new_jobs, &stats);
        let notifier = EmailNotifier::from_config(config);
        if let Err(err) = notifier.send_daily_report(&report).await {
            warn!("daily report delivery failed: {err:#}");
        }
    }

    let finished_at = Utc::now();
    info!(
        %run_id,
        candidates = candidates.len(),
        new_jobs = new_jobs.len(),
        "scrape cycle finished"
    );

    Ok(RunSummary {
        run_id,
        started_at,
        finished_at,
        sources: source_count,
        candidates: candidates.len(),
        new_jobs: new_jobs.len(),
    })
}

/// Register the daily cycle with the cron scheduler and park until ctrl-c.
pub async fn run_forever(config: PipelineConfig) -> Result<()> {
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.scrape_cron.clone();
    let config = Arc::new(config);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let config = Arc::clone(&config);
        Box::pin(async move {
            match run_once(&config).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    new_jobs = summary.new_jobs,
                    "scheduled cycle finished"
                ),
                Err(err) => error!("scheduled cycle failed: {err:#}"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;

    scheduler.add(job).await.context("adding scheduler job")?;
    scheduler.start().await.context("starting scheduler")?;
    info!(%cron, "daily scrape scheduled");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    Ok(())
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    run_once(&PipelineConfig::from_env()).await
}
