use super::model::{FiscalStatus, NewRecord, ProcessingRecord, RecordFilter, StoredCredential};
use anyhow::Result;
use chrono::NaiveDateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> ProcessingRecord {
    ProcessingRecord {
        id: row.get("id"),
        company_id: row.get("company_id"),
        resource_id: row.get("resource_id"),
        status: row.get("status"),
        client_phone: row.try_get("client_phone").ok(),
        client_name: row.try_get("client_name").ok(),
        record_date: row.try_get::<Option<NaiveDateTime>, _>("record_date").ok().flatten(),
        services_data: row.get("services_data"),
        comment: row.try_get("comment").ok(),
        raw_data: row.get("raw_data"),
        processed: row.get::<bool, _>("processed"),
        processing_error: row.try_get("processing_error").ok(),
        fiscal_status: row.try_get("fiscal_status").ok(),
        fiscal_response: row.try_get("fiscal_response").ok(),
        fiscal_request_id: row.try_get("fiscal_request_id").ok(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const RECORD_COLUMNS: &str = "id, company_id, resource_id, status, client_phone, client_name, \
     record_date, services_data, comment, raw_data, processed, processing_error, \
     fiscal_status, fiscal_response, fiscal_request_id, created_at, updated_at";

#[instrument(skip_all)]
pub async fn find_record(
    pool: &Pool,
    company_id: i64,
    resource_id: i64,
) -> Result<Option<ProcessingRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM processing_records WHERE company_id = ? AND resource_id = ?"
    );
    let row = sqlx::query(&sql)
        .bind(company_id)
        .bind(resource_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(record_from_row))
}

/// Insert a new ledger row or overwrite the mutable fields of an existing one.
/// On overwrite the processing/fiscal outcome columns are reset so the event
/// can be reprocessed from scratch. Runs in a single transaction.
#[instrument(skip_all)]
pub async fn upsert_record(pool: &Pool, record: &NewRecord) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query(
        "INSERT INTO processing_records \
             (company_id, resource_id, status, client_phone, client_name, record_date, \
              services_data, comment, raw_data, processed) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0) \
         ON CONFLICT(company_id, resource_id) DO UPDATE SET \
             status = excluded.status, \
             client_phone = excluded.client_phone, \
             client_name = excluded.client_name, \
             record_date = excluded.record_date, \
             services_data = excluded.services_data, \
             comment = excluded.comment, \
             raw_data = excluded.raw_data, \
             processed = 0, \
             processing_error = NULL, \
             fiscal_status = NULL, \
             fiscal_response = NULL, \
             updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(record.company_id)
    .bind(record.resource_id)
    .bind(&record.status)
    .bind(record.client_phone.as_deref())
    .bind(record.client_name.as_deref())
    .bind(record.record_date)
    .bind(&record.services_data)
    .bind(record.comment.as_deref())
    .bind(&record.raw_data)
    .fetch_one(&mut *tx)
    .await?
    .get("id");
    tx.commit().await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn mark_record_success(
    pool: &Pool,
    record_id: i64,
    response_json: &str,
    request_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE processing_records SET \
             processed = 1, processing_error = NULL, fiscal_status = ?, \
             fiscal_response = ?, fiscal_request_id = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(FiscalStatus::Success.as_str())
    .bind(response_json)
    .bind(request_id)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_record_failed(
    pool: &Pool,
    record_id: i64,
    error: &str,
    response_json: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE processing_records SET \
             processed = 0, processing_error = ?, fiscal_status = ?, \
             fiscal_response = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(error)
    .bind(FiscalStatus::Failed.as_str())
    .bind(response_json)
    .bind(record_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Operational listing for the records endpoint.
#[instrument(skip_all)]
pub async fn list_records(pool: &Pool, filter: &RecordFilter) -> Result<Vec<ProcessingRecord>> {
    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM processing_records WHERE 1=1");
    if filter.processed.is_some() {
        sql.push_str(" AND processed = ?");
    }
    if filter.fiscal_status.is_some() {
        sql.push_str(" AND fiscal_status = ?");
    }
    if filter.resource_id.is_some() {
        sql.push_str(" AND resource_id = ?");
    }
    sql.push_str(" ORDER BY updated_at DESC");

    let mut query = sqlx::query(&sql);
    if let Some(processed) = filter.processed {
        query = query.bind(processed);
    }
    if let Some(status) = filter.fiscal_status {
        query = query.bind(status.as_str());
    }
    if let Some(resource_id) = filter.resource_id {
        query = query.bind(resource_id);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(record_from_row).collect())
}

/// Bulk cleanup of failed rows, explicit operator action only.
#[instrument(skip_all)]
pub async fn delete_failed_records(pool: &Pool) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM processing_records WHERE processed = 0 AND fiscal_status = ?",
    )
    .bind(FiscalStatus::Failed.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[instrument(skip_all)]
pub async fn get_credential(pool: &Pool) -> Result<Option<StoredCredential>> {
    let row = sqlx::query("SELECT token, updated_at FROM fiscal_credentials WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| StoredCredential {
        token: row.get("token"),
        updated_at: row.get("updated_at"),
    }))
}

#[instrument(skip_all)]
pub async fn put_credential(pool: &Pool, token: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO fiscal_credentials (id, token, updated_at) \
         VALUES (1, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(id) DO UPDATE SET token = excluded.token, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_record(company_id: i64, resource_id: i64) -> NewRecord {
        NewRecord {
            company_id,
            resource_id,
            status: "update".into(),
            client_phone: Some("+77770220606".into()),
            client_name: Some("Вячослав".into()),
            record_date: None,
            services_data: "[]".into(),
            comment: Some("фч".into()),
            raw_data: "{}".into(),
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_company_and_resource() {
        let pool = setup_pool().await;
        let id1 = upsert_record(&pool, &sample_record(1, 100)).await.unwrap();
        let id2 = upsert_record(&pool, &sample_record(1, 100)).await.unwrap();
        let id3 = upsert_record(&pool, &sample_record(2, 100)).await.unwrap();
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn resubmission_resets_outcome_fields() {
        let pool = setup_pool().await;
        let id = upsert_record(&pool, &sample_record(1, 100)).await.unwrap();
        mark_record_failed(&pool, id, "boom", None).await.unwrap();

        let rec = find_record(&pool, 1, 100).await.unwrap().unwrap();
        assert!(!rec.processed);
        assert_eq!(rec.processing_error.as_deref(), Some("boom"));
        assert_eq!(rec.fiscal_status.as_deref(), Some("failed"));

        upsert_record(&pool, &sample_record(1, 100)).await.unwrap();
        let rec = find_record(&pool, 1, 100).await.unwrap().unwrap();
        assert!(!rec.processed);
        assert!(rec.processing_error.is_none());
        assert!(rec.fiscal_status.is_none());
    }

    #[tokio::test]
    async fn success_marks_processed_with_response() {
        let pool = setup_pool().await;
        let id = upsert_record(&pool, &sample_record(1, 100)).await.unwrap();
        mark_record_success(&pool, id, r#"{"Data":{}}"#, "req-1")
            .await
            .unwrap();

        let rec = find_record(&pool, 1, 100).await.unwrap().unwrap();
        assert!(rec.processed);
        assert_eq!(rec.fiscal_status.as_deref(), Some("success"));
        assert_eq!(rec.fiscal_request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn list_filters_and_cleanup() {
        let pool = setup_pool().await;
        let ok = upsert_record(&pool, &sample_record(1, 1)).await.unwrap();
        let bad = upsert_record(&pool, &sample_record(1, 2)).await.unwrap();
        mark_record_success(&pool, ok, "{}", "req").await.unwrap();
        mark_record_failed(&pool, bad, "err", None).await.unwrap();

        let failed = list_records(
            &pool,
            &RecordFilter {
                fiscal_status: Some(FiscalStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].resource_id, 2);

        let by_resource = list_records(
            &pool,
            &RecordFilter {
                resource_id: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_resource.len(), 1);

        let deleted = delete_failed_records(&pool).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(find_record(&pool, 1, 2).await.unwrap().is_none());
        assert!(find_record(&pool, 1, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn credential_roundtrip_overwrites() {
        let pool = setup_pool().await;
        assert!(get_credential(&pool).await.unwrap().is_none());

        put_credential(&pool, "token-1").await.unwrap();
        let cred = get_credential(&pool).await.unwrap().unwrap();
        assert_eq!(cred.token, "token-1");

        put_credential(&pool, "token-2").await.unwrap();
        let cred = get_credential(&pool).await.unwrap().unwrap();
        assert_eq!(cred.token, "token-2");
    }
}
