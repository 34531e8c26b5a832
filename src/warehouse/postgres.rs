//! PostgreSQL warehouse implementation
//!
//! Parameters are bound according to the types PostgreSQL reports for the
//! prepared statement, so a JSON cell like `"2024-01-01"` lands in a `DATE`
//! column and a null lands as a null of the column's own type.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};

use super::{Warehouse, WarehouseConnector};
use crate::config::WarehouseCredentials;
use crate::error::{LoadError, LoadResult};
use crate::load::sql::Statement;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Connector for PostgreSQL warehouses
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait(?Send)]
impl WarehouseConnector for PostgresConnector {
    type Connection = PostgresWarehouse;

    async fn connect(&self, credentials: &WarehouseCredentials) -> LoadResult<PostgresWarehouse> {
        PostgresWarehouse::connect(credentials).await
    }
}

/// One PostgreSQL connection
pub struct PostgresWarehouse {
    client: tokio_postgres::Client,
    connection_task: JoinHandle<()>,
    masked: String,
}

impl PostgresWarehouse {
    /// Connect to PostgreSQL
    pub async fn connect(credentials: &WarehouseCredentials) -> LoadResult<Self> {
        let masked = credentials.connection_string_masked();
        let (client, connection) = pg_config(credentials)
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| {
                LoadError::ConnectionFailed(format!(
                    "Failed to connect to PostgreSQL ({}): {}",
                    masked, e
                ))
            })?;

        // Spawn connection handler
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        tracing::info!("Connected to warehouse ({})", masked);

        Ok(Self {
            client,
            connection_task,
            masked,
        })
    }

    /// Get a column value as JSON
    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i16>>(idx) {
            return v.map(Value::from).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
            return v.map(Value::String).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<Decimal>>(idx) {
            return v.map(decimal_value).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<NaiveDate>>(idx) {
            return v
                .map(|d| Value::String(d.to_string()))
                .unwrap_or(Value::Null);
        }

        Value::Null
    }
}

#[async_trait(?Send)]
impl Warehouse for PostgresWarehouse {
    async fn query_column(&mut self, statement: &Statement) -> LoadResult<Vec<Value>> {
        let rows = self.client.query(&statement.sql, &[]).await.map_err(|e| {
            LoadError::QueryFailed(format!("Query on {} failed: {}", statement.table, e))
        })?;

        Ok(rows
            .iter()
            .map(|row| Self::get_column_value(row, 0))
            .collect())
    }

    async fn execute_batch(
        &mut self,
        statement: &Statement,
        params: &[Vec<Value>],
    ) -> LoadResult<u64> {
        let prepared = self.client.prepare(&statement.sql).await.map_err(|e| {
            LoadError::QueryFailed(format!(
                "Failed to prepare statement for {}: {}",
                statement.table, e
            ))
        })?;
        let types = prepared.params();

        let mut affected = 0;
        for (idx, tuple) in params.iter().enumerate() {
            if tuple.len() != types.len() {
                return Err(LoadError::InvalidInput(format!(
                    "Statement for {} expects {} parameters, tuple {} has {}",
                    statement.table,
                    types.len(),
                    idx,
                    tuple.len()
                )));
            }

            let boxed_params = tuple
                .iter()
                .zip(types)
                .map(|(value, ty)| value_to_sql(value, ty))
                .collect::<LoadResult<Vec<BoxedParam>>>()?;

            let param_refs: Vec<&(dyn ToSql + Sync)> = boxed_params
                .iter()
                .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                .collect();

            affected += self
                .client
                .execute(&prepared, &param_refs)
                .await
                .map_err(|e| {
                    LoadError::QueryFailed(format!(
                        "Failed to write row {} into {}: {}",
                        idx, statement.table, e
                    ))
                })?;
        }

        Ok(affected)
    }

    async fn close(self) -> LoadResult<()> {
        // Dropping the client ends the connection task
        drop(self.client);
        self.connection_task
            .await
            .map_err(|e| LoadError::ConnectionFailed(format!("Connection task failed: {}", e)))?;
        tracing::info!("Closed warehouse connection ({})", self.masked);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

/// Driver configuration; values are passed through unparsed
fn pg_config(credentials: &WarehouseCredentials) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&credentials.host)
        .port(credentials.port)
        .dbname(&credentials.dbname)
        .user(&credentials.username);
    if let Some(password) = &credentials.password {
        config.password(password);
    }
    config
}

fn bind<T>(value: &Value, ty: &Type, convert: impl Fn(&Value) -> Option<T>) -> LoadResult<BoxedParam>
where
    T: ToSql + Sync + Send + 'static,
{
    if value.is_null() {
        return Ok(Box::new(Option::<T>::None));
    }
    convert(value)
        .map(|v| Box::new(Some(v)) as BoxedParam)
        .ok_or_else(|| LoadError::InvalidInput(format!("Cannot bind {} as {}", value, ty)))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integral decimals become numbers so identifier lookups compare by value
fn decimal_value(d: Decimal) -> Value {
    let d = d.normalize();
    match i64::try_from(d) {
        Ok(i) if d.fract().is_zero() => Value::from(i),
        _ => Value::String(d.to_string()),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Convert a JSON cell into a parameter of the statement's declared type
fn value_to_sql(value: &Value, ty: &Type) -> LoadResult<BoxedParam> {
    match *ty {
        Type::BOOL => bind::<bool>(value, ty, |v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().to_lowercase().parse().ok(),
            _ => None,
        }),
        Type::INT2 => bind::<i16>(value, ty, |v| as_i64(v).and_then(|i| i16::try_from(i).ok())),
        Type::INT4 => bind::<i32>(value, ty, |v| as_i64(v).and_then(|i| i32::try_from(i).ok())),
        Type::INT8 => bind::<i64>(value, ty, as_i64),
        Type::FLOAT4 => bind::<f32>(value, ty, |v| as_f64(v).map(|f| f as f32)),
        Type::FLOAT8 => bind::<f64>(value, ty, as_f64),
        Type::NUMERIC => bind::<Decimal>(value, ty, |v| {
            as_text(v).and_then(|s| {
                Decimal::from_str(s.trim())
                    .or_else(|_| Decimal::from_scientific(s.trim()))
                    .ok()
            })
        }),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            bind::<String>(value, ty, as_text)
        }
        Type::DATE => bind::<NaiveDate>(value, ty, |v| {
            v.as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        }),
        Type::TIME => bind::<NaiveTime>(value, ty, |v| {
            v.as_str()
                .and_then(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok())
        }),
        Type::TIMESTAMP => {
            bind::<NaiveDateTime>(value, ty, |v| v.as_str().and_then(parse_naive_datetime))
        }
        Type::TIMESTAMPTZ => bind::<DateTime<Utc>>(value, ty, |v| {
            v.as_str().and_then(|s| {
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
                    .or_else(|| parse_naive_datetime(s).map(|naive| naive.and_utc()))
            })
        }),
        Type::JSON | Type::JSONB => bind::<Value>(value, ty, |v| match v {
            Value::String(s) => Some(serde_json::from_str(s).unwrap_or_else(|_| v.clone())),
            other => Some(other.clone()),
        }),
        _ => Err(LoadError::QueryFailed(format!(
            "Unsupported parameter type: {}",
            ty
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pg_config_keeps_password_verbatim() {
        let credentials = WarehouseCredentials {
            host: "db.internal".to_string(),
            port: 6543,
            dbname: "dw".to_string(),
            username: "etl".to_string(),
            password: Some("s3cret pass' host=other".to_string()),
        };
        let config = pg_config(&credentials);

        assert_eq!(
            config.get_password(),
            Some("s3cret pass' host=other".as_bytes())
        );
        assert_eq!(config.get_user(), Some("etl"));
        assert_eq!(config.get_dbname(), Some("dw"));
        assert_eq!(config.get_ports(), &[6543]);
        assert_eq!(config.get_hosts().len(), 1);
        assert!(matches!(
            &config.get_hosts()[0],
            tokio_postgres::config::Host::Tcp(host) if host == "db.internal"
        ));
    }

    #[test]
    fn test_pg_config_without_password() {
        let credentials = WarehouseCredentials {
            username: "etl".to_string(),
            ..Default::default()
        };
        assert_eq!(pg_config(&credentials).get_password(), None);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(as_i64(&json!(5)), Some(5));
        assert_eq!(as_i64(&json!(5.0)), Some(5));
        assert_eq!(as_i64(&json!(5.5)), None);
        assert_eq!(as_i64(&json!("12")), Some(12));
        assert_eq!(as_f64(&json!("2.5")), Some(2.5));
        assert_eq!(as_text(&json!(3)), Some("3".to_string()));
        assert_eq!(as_text(&json!(null)), None);
    }

    #[test]
    fn test_parse_naive_datetime() {
        assert!(parse_naive_datetime("2024-01-01 10:30:00.123").is_some());
        assert!(parse_naive_datetime("2024-01-01T10:30:00").is_some());
        assert!(parse_naive_datetime("2024-01-01").is_some());
        assert!(parse_naive_datetime("yesterday").is_none());
    }

    #[test]
    fn test_value_to_sql_accepts_and_rejects() {
        assert!(value_to_sql(&json!(null), &Type::INT4).is_ok());
        assert!(value_to_sql(&json!(12), &Type::INT4).is_ok());
        assert!(value_to_sql(&json!("abc"), &Type::INT4).is_err());
        assert!(value_to_sql(&json!(70000), &Type::INT2).is_err());
        assert!(value_to_sql(&json!("3.99"), &Type::NUMERIC).is_ok());
        assert!(value_to_sql(&json!(3.99), &Type::NUMERIC).is_ok());
        assert!(value_to_sql(&json!("2024-02-29"), &Type::DATE).is_ok());
        assert!(value_to_sql(&json!("14:05:00"), &Type::TIME).is_ok());
        assert!(value_to_sql(&json!("2024-02-29 14:05:00"), &Type::TIMESTAMP).is_ok());
        assert!(value_to_sql(&json!({"a": 1}), &Type::JSONB).is_ok());
        assert!(value_to_sql(&json!("x"), &Type::BYTEA).is_err());
    }

    #[test]
    fn test_text_cells_bind_by_declared_type() {
        assert_eq!(as_text(&json!("007")), Some("007".to_string()));
        assert!(value_to_sql(&json!("007"), &Type::VARCHAR).is_ok());
        assert!(value_to_sql(&json!("007"), &Type::INT4).is_ok());
        assert!(value_to_sql(&json!("18446744073709551617"), &Type::NUMERIC).is_ok());
        assert!(value_to_sql(&json!("{\"a\": 1}"), &Type::JSONB).is_ok());
    }

    #[test]
    fn test_decimal_value() {
        assert_eq!(decimal_value(Decimal::from_str("7.00").unwrap()), json!(7));
        assert_eq!(decimal_value(Decimal::from_str("2.50").unwrap()), json!("2.5"));
    }
}
