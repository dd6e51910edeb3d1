// SPDX-License-Identifier: MIT OR Apache-2.0
//! Postgres-backed [`LogStorage`] (spec §4.12, §6 SQL surface).
//!
//! Expects a `logging.entries` table with the columns spec §6 names,
//! including a `to_tsvector(message)` index backing full-text `search`.

use crate::entry::{
    LogCategory, LogEntry, LogLevel, LogQueryOptions, LogQueryResult, LogStorageStats,
    STATIC_ASSET_EXTENSIONS,
};
use crate::storage::LogStorage;
use async_trait::async_trait;
use rt_cancel::Scope;
use rt_error::{Result, RuntimeError};
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

fn category_str(c: LogCategory) -> &'static str {
    c.as_str()
}

fn category_from_str(s: &str) -> LogCategory {
    match s {
        "system" => LogCategory::System,
        "http" => LogCategory::Http,
        "security" => LogCategory::Security,
        "execution" => LogCategory::Execution,
        "ai" => LogCategory::Ai,
        _ => LogCategory::Custom,
    }
}

fn level_str(l: LogLevel) -> &'static str {
    match l {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
        LogLevel::Panic => "panic",
    }
}

fn level_from_str(s: &str) -> LogLevel {
    match s {
        "trace" => LogLevel::Trace,
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        "panic" => LogLevel::Panic,
        _ => LogLevel::Info,
    }
}

/// Postgres-backed log storage, consuming a pooled
/// [`rt_collab::DatabaseConnection`] (a bare `sqlx::PgPool` alias).
pub struct PostgresLogStorage {
    pool: PgPool,
}

impl PostgresLogStorage {
    /// Wrap an already-configured connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters<'a>(&self, qb: &mut QueryBuilder<'a, sqlx::Postgres>, opts: &'a LogQueryOptions) -> usize {
        let mut clauses = 0;
        let mut push = |qb: &mut QueryBuilder<'a, sqlx::Postgres>, sql: &str| {
            if clauses == 0 {
                qb.push(" WHERE ");
            } else {
                qb.push(" AND ");
            }
            qb.push(sql);
            clauses += 1;
        };

        if let Some(category) = opts.category {
            push(qb, "category = ");
            qb.push_bind(category_str(category));
        }
        if let Some(custom) = &opts.custom_category {
            push(qb, "custom_category = ");
            qb.push_bind(custom.as_str());
        }
        if !opts.levels.is_empty() {
            let levels: Vec<&str> = opts.levels.iter().copied().map(level_str).collect();
            push(qb, "level = ANY(");
            qb.push_bind(levels);
            qb.push(")");
        }
        if let Some(component) = &opts.component {
            push(qb, "component = ");
            qb.push_bind(component.as_str());
        }
        if let Some(request_id) = &opts.request_id {
            push(qb, "request_id = ");
            qb.push_bind(request_id.as_str());
        }
        if let Some(trace_id) = &opts.trace_id {
            push(qb, "trace_id = ");
            qb.push_bind(trace_id.as_str());
        }
        if let Some(user_id) = opts.user_id {
            push(qb, "user_id = ");
            qb.push_bind(user_id);
        }
        if let Some(execution_id) = opts.execution_id {
            push(qb, "execution_id = ");
            qb.push_bind(execution_id);
        }
        if let Some(execution_type) = &opts.execution_type {
            push(qb, "fields->>'execution_type' = ");
            qb.push_bind(execution_type.as_str());
        }
        if let Some((start, end)) = opts.time_range {
            push(qb, "timestamp >= ");
            qb.push_bind(start);
            push(qb, "timestamp <= ");
            qb.push_bind(end);
        }
        if let Some(after_line) = opts.after_line {
            push(qb, "line_number > ");
            qb.push_bind(after_line);
        }
        if let Some(search) = &opts.search {
            push(
                qb,
                "to_tsvector('english', message) @@ plainto_tsquery('english', ",
            );
            qb.push_bind(search.as_str());
            qb.push(")");
        }
        if opts.hide_static_assets {
            qb.push(if clauses == 0 { " WHERE " } else { " AND " });
            qb.push("NOT (category = 'http' AND (");
            for (i, ext) in STATIC_ASSET_EXTENSIONS.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("fields->>'path' LIKE ");
                qb.push_bind(format!("%{ext}"));
            }
            qb.push("))");
            clauses += 1;
        }
        clauses
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> std::result::Result<LogEntry, sqlx::Error> {
    let category: String = row.try_get("category")?;
    let level: String = row.try_get("level")?;
    let fields: serde_json::Value = row.try_get("fields")?;
    let fields_map = fields
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    let execution_type = fields
        .as_object()
        .and_then(|m| m.get("execution_type"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(LogEntry {
        id: Some(row.try_get("id")?),
        timestamp: Some(row.try_get("timestamp")?),
        category: category_from_str(&category),
        level: level_from_str(&level),
        message: row.try_get("message")?,
        custom_category: row.try_get("custom_category")?,
        request_id: row.try_get("request_id")?,
        trace_id: row.try_get("trace_id")?,
        user_id: row.try_get("user_id")?,
        execution_id: row.try_get("execution_id")?,
        component: row.try_get("component")?,
        ip: row
            .try_get::<Option<std::net::IpAddr>, _>("ip_address")?
            .map(|ip| ip.to_string()),
        fields: fields_map,
        execution_type,
        line_number: row.try_get("line_number")?,
    })
}

#[async_trait]
impl LogStorage for PostgresLogStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn write(&self, scope: &Scope, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log write was cancelled"));
        }

        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO logging.entries (id, timestamp, category, level, message, \
             custom_category, request_id, trace_id, component, user_id, ip_address, fields, \
             execution_id, line_number) ",
        );
        qb.push_values(entries.into_iter().map(LogEntry::normalized), |mut b, e| {
            let ip: Option<std::net::IpAddr> = e.ip.as_deref().and_then(|s| s.parse().ok());
            let mut fields_value = serde_json::to_value(&e.fields).unwrap_or_default();
            if let (Some(exec_type), Some(obj)) = (&e.execution_type, fields_value.as_object_mut()) {
                obj.insert(
                    "execution_type".to_string(),
                    serde_json::Value::String(exec_type.clone()),
                );
            }
            b.push_bind(e.id)
                .push_bind(e.timestamp)
                .push_bind(category_str(e.category))
                .push_bind(level_str(e.level))
                .push_bind(e.message)
                .push_bind(e.custom_category)
                .push_bind(e.request_id)
                .push_bind(e.trace_id)
                .push_bind(e.component)
                .push_bind(e.user_id)
                .push_bind(ip)
                .push_bind(fields_value)
                .push_bind(e.execution_id)
                .push_bind(e.line_number);
        });

        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres log write failed").with_source(e))?;
        Ok(())
    }

    async fn query(&self, scope: &Scope, opts: LogQueryOptions) -> Result<LogQueryResult> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log query was cancelled"));
        }

        let mut count_qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM logging.entries");
        self.push_filters(&mut count_qb, &opts);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres log count failed").with_source(e))?;

        let mut qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM logging.entries");
        self.push_filters(&mut qb, &opts);
        qb.push(if opts.sort_asc {
            " ORDER BY timestamp ASC"
        } else {
            " ORDER BY timestamp DESC"
        });
        qb.push(" LIMIT ");
        qb.push_bind(opts.limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(opts.offset as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres log query failed").with_source(e))?;

        let entries = rows
            .iter()
            .map(row_to_entry)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RuntimeError::protocol_violation("malformed log row").with_source(e))?;

        let has_more = opts.offset as u64 + entries.len() as u64 < total as u64;
        Ok(LogQueryResult {
            entries,
            total: total as u64,
            has_more,
        })
    }

    async fn get_execution_logs(
        &self,
        scope: &Scope,
        execution_id: Uuid,
        after_line: i32,
    ) -> Result<Vec<LogEntry>> {
        let opts = LogQueryOptions {
            execution_id: Some(execution_id),
            after_line: Some(after_line),
            sort_asc: true,
            limit: i32::MAX as usize,
            ..LogQueryOptions::new()
        };
        Ok(self.query(scope, opts).await?.entries)
    }

    async fn delete(&self, scope: &Scope, opts: LogQueryOptions) -> Result<u64> {
        if scope.is_done() {
            return Err(RuntimeError::cancelled("log delete was cancelled"));
        }

        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("DELETE FROM logging.entries");
        let clauses = self.push_filters(&mut qb, &opts);
        if clauses == 0 {
            return Err(RuntimeError::invalid_input(
                "refusing to delete with no predicate; supply at least one filter",
            ));
        }

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres log delete failed").with_source(e))?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, _scope: &Scope) -> Result<LogStorageStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logging.entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres stats failed").with_source(e))?;
        Ok(LogStorageStats {
            total_entries: Some(total as u64),
            size_bytes: None,
        })
    }

    async fn health(&self, _scope: &Scope) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::transport_failure("postgres health check failed").with_source(e))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
