//! Persistence gateway
//!
//! The placement core talks to storage through exactly two operations: a
//! read-only `query` and an all-or-nothing `execute_atomic` over an ordered
//! list of writes. Failures of the latter distinguish uniqueness violations
//! from everything else so callers can retry slot claims.

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row as _, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;

use super::models::{MemberId, Position};

/// Parameter or column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<MemberId> for SqlValue {
    fn from(v: MemberId) -> Self {
        SqlValue::Integer(v.0)
    }
}

impl From<Position> for SqlValue {
    fn from(v: Position) -> Self {
        SqlValue::Integer(v.get() as i64)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Parameterised SQL statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Result row, values in select-list order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    /// Non-null integer column
    pub fn int(&self, idx: usize) -> Result<i64, GatewayError> {
        match self.values.get(idx) {
            Some(SqlValue::Integer(v)) => Ok(*v),
            other => Err(GatewayError::Failure(format!(
                "column {} is not an integer: {:?}",
                idx, other
            ))),
        }
    }

    /// Nullable integer column
    pub fn opt_int(&self, idx: usize) -> Result<Option<i64>, GatewayError> {
        match self.values.get(idx) {
            Some(SqlValue::Null) => Ok(None),
            _ => self.int(idx).map(Some),
        }
    }

    /// Non-null text column
    pub fn text(&self, idx: usize) -> Result<String, GatewayError> {
        match self.values.get(idx) {
            Some(SqlValue::Text(v)) => Ok(v.clone()),
            other => Err(GatewayError::Failure(format!(
                "column {} is not text: {:?}",
                idx, other
            ))),
        }
    }

    pub fn member_id(&self, idx: usize) -> Result<MemberId, GatewayError> {
        self.int(idx).map(MemberId)
    }

    pub fn opt_member_id(&self, idx: usize) -> Result<Option<MemberId>, GatewayError> {
        self.opt_int(idx).map(|v| v.map(MemberId))
    }
}

/// Gateway failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// A uniqueness constraint rejected the write
    #[error("unique constraint violated: {detail}")]
    UniqueViolation { detail: String },

    /// Any other storage failure
    #[error("storage failure: {0}")]
    Failure(String),
}

impl GatewayError {
    /// True when this is a uniqueness violation whose detail names `column`
    /// (SQLite reports e.g. `UNIQUE constraint failed: placements.parent_id, placements.position`)
    pub fn violates(&self, column: &str) -> bool {
        match self {
            GatewayError::UniqueViolation { detail } => detail.contains(column),
            GatewayError::Failure(_) => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, GatewayError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                GatewayError::UniqueViolation {
                    detail: db_err.message().to_string(),
                }
            }
            _ => GatewayError::Failure(err.to_string()),
        }
    }
}

/// Storage seam used by the placement core
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Read-only query
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>, GatewayError>;

    /// Execute all writes as one unit; nothing is applied on failure
    async fn execute_atomic(&self, writes: &[Statement]) -> Result<(), GatewayError>;

    /// First row of a query, if any
    async fn query_first(&self, statement: &Statement) -> Result<Option<Row>, GatewayError> {
        Ok(self.query(statement).await?.into_iter().next())
    }
}

/// SQLite-backed gateway
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn query(&self, statement: &Statement) -> Result<Vec<Row>, GatewayError> {
        let rows = bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn execute_atomic(&self, writes: &[Statement]) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;

        for (idx, statement) in writes.iter().enumerate() {
            let result = bind_params(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await;

            if let Err(err) = result {
                let err = GatewayError::from(err);
                tracing::debug!(
                    statement = idx,
                    error = %err,
                    "Atomic write failed, rolling back"
                );
                // The write error is what the caller classifies on
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        statement = idx,
                        error = %rollback_err,
                        "Rollback failed after atomic write error"
                    );
                }
                return Err(err);
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in params {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row, GatewayError> {
    let mut values = Vec::with_capacity(row.len());

    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get(idx)?),
                "REAL" => SqlValue::Real(row.try_get(idx)?),
                _ => SqlValue::Text(row.try_get(idx)?),
            }
        };
        values.push(value);
    }

    Ok(Row::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_gateway() -> SqliteGateway {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE slots (parent INTEGER NOT NULL, pos INTEGER NOT NULL, label TEXT, UNIQUE(parent, pos))")
            .execute(&pool)
            .await
            .unwrap();
        SqliteGateway::new(pool)
    }

    #[tokio::test]
    async fn test_query_decodes_values() {
        let gateway = memory_gateway().await;
        gateway
            .execute_atomic(&[Statement::new("INSERT INTO slots VALUES (?, ?, ?)")
                .bind(7i64)
                .bind(1i64)
                .bind(None::<String>)])
            .await
            .unwrap();

        let rows = gateway
            .query(&Statement::new("SELECT parent, pos, label, COUNT(*) FROM slots"))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0).unwrap(), 7);
        assert_eq!(rows[0].opt_int(2).unwrap(), None);
        assert_eq!(rows[0].int(3).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_violation_is_distinguished() {
        let gateway = memory_gateway().await;
        let insert = Statement::new("INSERT INTO slots (parent, pos) VALUES (?, ?)")
            .bind(1i64)
            .bind(1i64);

        gateway.execute_atomic(&[insert.clone()]).await.unwrap();
        let err = gateway.execute_atomic(&[insert]).await.unwrap_err();

        assert!(err.is_unique_violation());
        assert!(err.violates("slots.pos"));
    }

    #[tokio::test]
    async fn test_other_failures_are_not_unique_violations() {
        let gateway = memory_gateway().await;
        let err = gateway
            .execute_atomic(&[Statement::new("INSERT INTO missing_table VALUES (1)")])
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Failure(_)));
    }

    #[tokio::test]
    async fn test_atomic_batch_rolls_back_on_failure() {
        let gateway = memory_gateway().await;
        let writes = vec![
            Statement::new("INSERT INTO slots (parent, pos) VALUES (2, 1)"),
            Statement::new("INSERT INTO slots (parent, pos) VALUES (2, 2)"),
            Statement::new("INSERT INTO slots (parent, pos) VALUES (2, 1)"),
        ];

        let err = gateway.execute_atomic(&writes).await.unwrap_err();
        assert!(err.violates("slots.pos"), "write error is returned as is: {err:?}");

        let rows = gateway
            .query(&Statement::new("SELECT COUNT(*) FROM slots"))
            .await
            .unwrap();
        assert_eq!(rows[0].int(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_reports_write_error_and_gateway_stays_usable() {
        let gateway = memory_gateway().await;
        let writes = vec![
            Statement::new("INSERT INTO slots (parent, pos) VALUES (3, 1)"),
            Statement::new("INSERT INTO missing_table VALUES (1)"),
        ];

        let err = gateway.execute_atomic(&writes).await.unwrap_err();
        match err {
            GatewayError::Failure(message) => assert!(message.contains("missing_table"), "{message}"),
            other => panic!("expected write failure, got {other:?}"),
        }

        // The single pooled connection is back and clean after the rollback
        gateway
            .execute_atomic(&[Statement::new("INSERT INTO slots (parent, pos) VALUES (3, 1)")])
            .await
            .unwrap();
        let rows = gateway
            .query(&Statement::new("SELECT COUNT(*) FROM slots WHERE parent = 3"))
            .await
            .unwrap();
        assert_eq!(rows[0].int(0).unwrap(), 1);
    }
}
