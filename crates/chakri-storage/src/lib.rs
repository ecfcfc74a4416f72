//! HTTP fetch utilities + Postgres dedup store for Chakri.

use std::time::Duration;

use anyhow::Context;
use chakri_core::JobRecord;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{error, info_span};

pub const CRATE_NAME: &str = "chakri-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Thin reqwest wrapper with a per-request timeout. Every fetch is a single
/// attempt: a timed-out or failed page is skipped by the caller, never
/// retried, matching the rest of the pipeline's no-retry policy.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

/// One row of the location/salary aggregate. `avg_salary` is a best-effort
/// number: salaries are averaged with non-digit characters stripped, and
/// rows whose salary has no digits at all (e.g. "Negotiable") still count
/// toward `job_count` but not the average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationStats {
    pub location: String,
    pub job_count: i64,
    pub avg_salary: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    /// Connect and run embedded migrations. Failure here is fatal to the
    /// run; everything downstream degrades per record instead.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running job_listings migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert-or-ignore keyed on the fingerprint uniqueness constraint.
    ///
    /// Returns `true` only when a row was newly inserted. The constraint is
    /// enforced by the engine, not by check-then-insert, so concurrent
    /// writers racing on the same fingerprint are safe. Storage errors are
    /// logged and reported as `false`; a `false` is never fatal to callers.
    pub async fn upsert(&self, job: &JobRecord) -> bool {
        match self.try_insert(job).await {
            Ok(inserted) => inserted,
            Err(err) => {
                error!(fingerprint = %job.fingerprint, source = %job.source, "upsert failed: {err:#}");
                false
            }
        }
    }

    async fn try_insert(&self, job: &JobRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_listings (
                fingerprint, title, company, location, salary, description,
                requirements, posted_date, deadline, job_type, experience, url, source
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(&job.fingerprint)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.salary)
        .bind(&job.description)
        .bind(&job.requirements)
        .bind(job.posted_date)
        .bind(job.deadline)
        .bind(&job.job_type)
        .bind(&job.experience)
        .bind(&job.url)
        .bind(&job.source)
        .execute(&self.pool)
        .await
        .context("inserting job listing")?;
        Ok(result.rows_affected() > 0)
    }

    /// Advisory top-10 location breakdown over every stored row with a
    /// non-empty salary, ordered by job count descending. The digit residue
    /// is capped at 18 characters before the BIGINT cast so one absurd
    /// salary string cannot overflow the cast and error the whole query.
    pub async fn aggregate_by_location(&self) -> anyhow::Result<Vec<LocationStats>> {
        let rows = sqlx::query(
            r#"
            SELECT
                location,
                COUNT(*) AS job_count,
                AVG(NULLIF(LEFT(REGEXP_REPLACE(salary, '[^0-9]', '', 'g'), 18), '')::BIGINT)::DOUBLE PRECISION AS avg_salary
            FROM job_listings
            WHERE salary IS NOT NULL AND salary <> ''
            GROUP BY location
            ORDER BY job_count DESC
            LIMIT 10
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("aggregating job listings by location")?;

        Ok(rows
            .into_iter()
            .map(|r| LocationStats {
                location: r.get::<Option<String>, _>("location").unwrap_or_default(),
                job_count: r.get("job_count"),
                avg_salary: r.get("avg_salary"),
            })
            .collect())
    }
}
