use crate::{
    error::{AppError, Result},
    models::audit::{AuditEntry, AuditFilter, NewAuditEntry},
};
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use uuid::Uuid;

const AUDIT_COLUMNS: &str = "id, action, entity_type, entity_id, user_id, user_name, ip_address, \
user_agent, session_id, timestamp, level, is_successful, error_message, detail";

fn row_to_entry(row: &Row) -> Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        action: row.try_get("action").map_err(|_| AppError::MissingData("action".to_string()))?,
        entity_type: row.try_get("entity_type").map_err(|_| AppError::MissingData("entity_type".to_string()))?,
        entity_id: row.try_get("entity_id").map_err(|_| AppError::MissingData("entity_id".to_string()))?,
        user_id: row.try_get("user_id").map_err(|_| AppError::MissingData("user_id".to_string()))?,
        user_name: row.try_get("user_name").map_err(|_| AppError::MissingData("user_name".to_string()))?,
        ip_address: row.try_get("ip_address").map_err(|_| AppError::MissingData("ip_address".to_string()))?,
        user_agent: row.try_get("user_agent").map_err(|_| AppError::MissingData("user_agent".to_string()))?,
        session_id: row.try_get("session_id").map_err(|_| AppError::MissingData("session_id".to_string()))?,
        timestamp: row.try_get("timestamp").map_err(|_| AppError::MissingData("timestamp".to_string()))?,
        level: row.try_get("level").map_err(|_| AppError::MissingData("level".to_string()))?,
        is_successful: row.try_get("is_successful").map_err(|_| AppError::MissingData("is_successful".to_string()))?,
        error_message: row.try_get("error_message").map_err(|_| AppError::MissingData("error_message".to_string()))?,
        detail: row.try_get("detail").map_err(|_| AppError::MissingData("detail".to_string()))?,
    })
}

/// Appends one audit entry. The recorder owns the decision to swallow
/// failures; this function just reports them.
pub async fn insert(pool: &Pool, entry: &NewAuditEntry, now: DateTime<Utc>) -> Result<Uuid> {
    let client = pool.get().await?;
    let id = Uuid::new_v4();
    client
        .execute(
            r#"
            INSERT INTO audit_logs
                (id, action, entity_type, entity_id, user_id, user_name, ip_address,
                 user_agent, session_id, timestamp, level, is_successful, error_message, detail)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
            &[
                &id,
                &entry.action,
                &entry.entity_type,
                &entry.entity_id,
                &entry.user_id,
                &entry.user_name,
                &entry.ip_address,
                &entry.user_agent,
                &entry.session_id,
                &now,
                &entry.level.as_str(),
                &entry.is_successful,
                &entry.error_message,
                &entry.detail,
            ],
        )
        .await?;
    Ok(id)
}

/// Builds the WHERE clause shared by `list` and `count`. Parameter
/// numbering starts at 1 and the returned params line up with it.
fn filter_clause<'a>(filter: &'a AuditFilter) -> (String, Vec<&'a (dyn ToSql + Sync)>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

    if let Some(ref user_id) = filter.user_id {
        params.push(user_id);
        conditions.push(format!("user_id = ${}", params.len()));
    }
    if let Some(ref action) = filter.action_contains {
        params.push(action);
        conditions.push(format!("action LIKE '%' || ${} || '%'", params.len()));
    }
    if let Some(ref start) = filter.start {
        params.push(start);
        conditions.push(format!("timestamp >= ${}", params.len()));
    }
    if let Some(ref end) = filter.end {
        params.push(end);
        conditions.push(format!("timestamp <= ${}", params.len()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    (clause, params)
}

/// Lists entries matching the filter, newest first.
pub async fn list(pool: &Pool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let client = pool.get().await?;
    let (clause, mut params) = filter_clause(filter);

    params.push(&filter.take);
    let limit_idx = params.len();
    params.push(&filter.skip);
    let offset_idx = params.len();

    let sql = format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM audit_logs
        {clause}
        ORDER BY timestamp DESC
        LIMIT ${limit_idx} OFFSET ${offset_idx}
        "#
    );

    let rows = client.query(&sql, &params).await?;
    rows.iter().map(row_to_entry).collect()
}

/// Counts entries matching the filter.
pub async fn count(pool: &Pool, filter: &AuditFilter) -> Result<i64> {
    let client = pool.get().await?;
    let (clause, params) = filter_clause(filter);

    let sql = format!("SELECT COUNT(*) AS n FROM audit_logs {clause}");
    let row = client.query_one(&sql, &params).await?;
    Ok(row.try_get::<_, i64>("n").map_err(|_| AppError::MissingData("n".to_string()))?)
}

/// Lists security-relevant entries (Security entity or Warning/Error
/// level), newest first.
pub async fn list_security_events(
    pool: &Pool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    skip: i64,
    take: i64,
) -> Result<Vec<AuditEntry>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            &format!(
                r#"
                SELECT {AUDIT_COLUMNS}
                FROM audit_logs
                WHERE (entity_type = 'Security' OR level IN ('Warning', 'Error'))
                  AND ($1::timestamptz IS NULL OR timestamp >= $1)
                  AND ($2::timestamptz IS NULL OR timestamp <= $2)
                ORDER BY timestamp DESC
                LIMIT $3 OFFSET $4
                "#
            ),
            &[&start, &end, &take, &skip],
        )
        .await?;
    rows.iter().map(row_to_entry).collect()
}

/// Per-action entry counts inside an optional time range.
pub async fn statistics_by_action(
    pool: &Pool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<(String, i64)>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT action, COUNT(*) AS n
            FROM audit_logs
            WHERE ($1::timestamptz IS NULL OR timestamp >= $1)
              AND ($2::timestamptz IS NULL OR timestamp <= $2)
            GROUP BY action
            ORDER BY n DESC
            "#,
            &[&start, &end],
        )
        .await?;
    rows.iter()
        .map(|r| {
            Ok((
                r.try_get::<_, String>("action").map_err(|_| AppError::MissingData("action".to_string()))?,
                r.try_get::<_, i64>("n").map_err(|_| AppError::MissingData("n".to_string()))?,
            ))
        })
        .collect()
}

/// Deletes entries older than the cutoff. Returns how many rows the
/// retention sweep removed.
pub async fn delete_older_than(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute("DELETE FROM audit_logs WHERE timestamp < $1", &[&cutoff])
        .await?;
    Ok(affected)
}
