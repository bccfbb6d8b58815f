//! db
//!
//! Read-only query plan measurements for the SQL optimizer.
//!
//! # Contract
//!
//! The analyzer connects to the configured database, harvests table
//! shapes from the information schema, and measures queries with
//! `EXPLAIN (ANALYZE, BUFFERS, COSTS, FORMAT JSON)`. It never executes
//! DDL. A connection failure degrades the optimizer to a no-op rather
//! than failing the pipeline.

use std::time::Duration;

use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::warn;

use crate::core::config::DatabaseConfig;

/// Budget for a single measurement query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from plan analysis.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database cannot be reached or the dialect is unsupported.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The query failed to parse or plan.
    #[error("query failed to plan: {0}")]
    PlanFailed(String),

    /// EXPLAIN output was not in the expected shape.
    #[error("unexpected explain output: {0}")]
    Malformed(String),

    /// The measurement exceeded its budget.
    #[error("measurement timed out")]
    Timeout,
}

/// Planner cost and measured runtime for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanMetrics {
    /// Planner total cost (arbitrary cost units).
    pub total_cost: f64,
    /// Actual execution time in milliseconds.
    pub actual_time_ms: f64,
}

/// Live connection used for schema harvest and plan measurement.
#[derive(Debug)]
pub struct PlanAnalyzer {
    client: tokio_postgres::Client,
}

impl PlanAnalyzer {
    /// Connect to the configured database.
    ///
    /// Only the `postgresql` dialect has EXPLAIN ANALYZE semantics the
    /// optimizer understands; anything else is unavailable by
    /// definition.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        if config.dialect != "postgresql" {
            return Err(DbError::Unavailable(format!(
                "unsupported dialect: {}",
                config.dialect
            )));
        }

        let conn_str = format!(
            "host={} port={} user={} password={} dbname={} connect_timeout=10",
            config.host, config.port, config.user, config.password, config.dbname
        );
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|e| DbError::Unavailable(e.to_string()))?;

        // The connection future drives the socket; it ends when the
        // client is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "database connection closed");
            }
        });

        Ok(Self { client })
    }

    /// Column and index brief for one table.
    pub async fn table_brief(&self, table: &str) -> Result<String, DbError> {
        let columns = self
            .client
            .query(
                "SELECT column_name, data_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_name = $1 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| DbError::Unavailable(e.to_string()))?;

        let indexes = self
            .client
            .query(
                "SELECT indexname, indexdef FROM pg_indexes WHERE tablename = $1",
                &[&table],
            )
            .await
            .map_err(|e| DbError::Unavailable(e.to_string()))?;

        let mut brief = format!("table {}:\n", table);
        for row in &columns {
            let name: &str = row.get(0);
            let dtype: &str = row.get(1);
            let nullable: &str = row.get(2);
            brief.push_str(&format!(
                "  {} {}{}\n",
                name,
                dtype,
                if nullable == "YES" { " null" } else { "" }
            ));
        }
        for row in &indexes {
            let def: &str = row.get(1);
            brief.push_str(&format!("  index: {}\n", def));
        }
        Ok(brief)
    }

    /// Concatenated brief for several tables. Unknown tables contribute
    /// an empty section rather than an error.
    pub async fn schema_brief(&self, tables: &[String]) -> String {
        let mut brief = String::new();
        for table in tables {
            match self.table_brief(table).await {
                Ok(section) => brief.push_str(&section),
                Err(e) => warn!(%table, error = %e, "schema harvest failed for table"),
            }
        }
        brief
    }

    /// Measure one query under EXPLAIN ANALYZE.
    pub async fn measure(&self, query: &str) -> Result<PlanMetrics, DbError> {
        let explain = format!("EXPLAIN (ANALYZE, BUFFERS, COSTS, FORMAT JSON) {}", query);
        let rows = tokio::time::timeout(QUERY_TIMEOUT, self.client.query(&explain, &[]))
            .await
            .map_err(|_| DbError::Timeout)?
            .map_err(|e| DbError::PlanFailed(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| DbError::Malformed("empty explain result".to_string()))?;
        let value: serde_json::Value = row
            .try_get(0)
            .map_err(|e| DbError::Malformed(e.to_string()))?;
        parse_plan_json(&value)
    }
}

/// Extract metrics from `EXPLAIN (FORMAT JSON)` output.
///
/// The payload is a one-element array whose object carries the plan tree
/// under `Plan` and the measured runtime under `Execution Time`.
pub fn parse_plan_json(value: &serde_json::Value) -> Result<PlanMetrics, DbError> {
    let entry = value
        .get(0)
        .ok_or_else(|| DbError::Malformed("expected one-element array".to_string()))?;
    let plan = entry
        .get("Plan")
        .ok_or_else(|| DbError::Malformed("missing Plan".to_string()))?;

    let total_cost = plan
        .get("Total Cost")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| DbError::Malformed("missing Total Cost".to_string()))?;

    let actual_time_ms = entry
        .get("Execution Time")
        .and_then(serde_json::Value::as_f64)
        .or_else(|| plan.get("Actual Total Time").and_then(serde_json::Value::as_f64))
        .ok_or_else(|| DbError::Malformed("missing Execution Time".to_string()))?;

    Ok(PlanMetrics {
        total_cost,
        actual_time_ms,
    })
}
