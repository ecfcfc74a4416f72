//! Live-database checks for the dedup store. These need a disposable
//! Postgres pointed at by DATABASE_URL, so they are ignored by default:
//!
//!   DATABASE_URL=postgres://postgres:@localhost/job_portal_test \
//!       cargo test -p chakri-storage -- --ignored

use chakri_core::{identity_fingerprint, JobRecord};
use chakri_storage::JobStore;
use chrono::NaiveDate;

fn record(title: &str, company: &str, location: &str, salary: &str, description: &str) -> JobRecord {
    JobRecord {
        title: title.to_string(),
        company: company.to_string(),
        location: location.to_string(),
        salary: Some(salary.to_string()),
        description: Some(description.to_string()),
        requirements: None,
        posted_date: NaiveDate::from_ymd_opt(2026, 8, 30).unwrap(),
        deadline: None,
        job_type: Some("Full-time".to_string()),
        experience: None,
        url: format!("https://jobs.example/{company}/{title}").replace(' ', "-"),
        source: "bdjobs".to_string(),
        fingerprint: identity_fingerprint(title, company, location),
    }
}

async fn fresh_store() -> JobStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let store = JobStore::connect(&url).await.expect("connect + migrate");
    sqlx::query("TRUNCATE job_listings")
        .execute(store.pool())
        .await
        .expect("truncate job_listings");
    store
}

#[tokio::test]
#[ignore]
async fn ingestion_is_idempotent_and_first_writer_wins() {
    let store = fresh_store().await;

    let first = record("Backend Engineer", "Acme Ltd", "Dhaka", "30000", "original text");
    assert!(store.upsert(&first).await, "first insert is new");
    assert!(!store.upsert(&first).await, "second insert is a duplicate");

    // Same identity triple, different description: the row that arrived
    // first survives. Which description that is is deliberately not a
    // guarantee of the pipeline, only that exactly one row exists.
    let relisted = record("Backend Engineer", "Acme Ltd", "Dhaka", "35000", "reworded text");
    assert_eq!(first.fingerprint, relisted.fingerprint);
    assert!(!store.upsert(&relisted).await);

    let row_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_listings")
        .fetch_one(store.pool())
        .await
        .expect("count rows");
    assert_eq!(row_count, 1);
}

#[tokio::test]
#[ignore]
async fn aggregate_groups_by_location_ordered_by_count() {
    let store = fresh_store().await;

    for job in [
        record("Backend Engineer", "Acme Ltd", "Dhaka", "30000", "a"),
        record("Data Analyst", "Grameen Digital", "Dhaka", "50000", "b"),
        record("QA Engineer", "Chattogram Soft", "Chittagong", "20000", "c"),
    ] {
        assert!(store.upsert(&job).await);
    }

    let stats = store.aggregate_by_location().await.expect("aggregate");
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].location, "Dhaka");
    assert_eq!(stats[0].job_count, 2);
    assert_eq!(stats[0].avg_salary, Some(40000.0));
    assert_eq!(stats[1].location, "Chittagong");
    assert_eq!(stats[1].job_count, 1);
    assert_eq!(stats[1].avg_salary, Some(20000.0));
}

#[tokio::test]
#[ignore]
async fn absurdly_long_salary_digits_do_not_error_the_aggregate() {
    let store = fresh_store().await;

    for job in [
        record("Backend Engineer", "Acme Ltd", "Dhaka", "30000", "a"),
        // 25 digits once the commas are stripped, far past BIGINT range.
        record("Phone Sales", "Scam Corp", "Dhaka", "0123456789012345678901234", "b"),
    ] {
        assert!(store.upsert(&job).await);
    }

    let stats = store
        .aggregate_by_location()
        .await
        .expect("aggregate survives oversized digit residue");
    assert_eq!(stats[0].location, "Dhaka");
    assert_eq!(stats[0].job_count, 2);
    assert!(stats[0].avg_salary.is_some());
}

#[tokio::test]
#[ignore]
async fn negotiable_salary_counts_but_does_not_skew_the_average() {
    let store = fresh_store().await;

    for job in [
        record("Backend Engineer", "Acme Ltd", "Dhaka", "30000", "a"),
        record("Office Manager", "Acme Ltd", "Dhaka", "Negotiable", "b"),
    ] {
        assert!(store.upsert(&job).await);
    }

    let stats = store.aggregate_by_location().await.expect("aggregate");
    assert_eq!(stats[0].job_count, 2);
    assert_eq!(stats[0].avg_salary, Some(30000.0));
}
