use super::TableSink;
use crate::error::{Result, StarError};
use crate::tables::TableSchema;
use polars::prelude::*;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};

const COPY_CHUNK_ROWS: usize = 10_000;

/// Writes tables into one Postgres schema.
///
/// Each write loads a `<table>__staging` table with `COPY`, drops the old
/// table, renames the staging table into place and adds the primary key,
/// all inside one transaction. A failed write rolls back and leaves the
/// previous table untouched.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: Pool<Postgres>,
    schema: String,
}

pub(crate) fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

impl PostgresSink {
    /// # Errors
    ///
    /// Fails when the database cannot be reached within ten seconds.
    pub async fn connect(options: PgConnectOptions, schema: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StarError::Database(format!("Failed to connect to database: {e}")))?;
        Ok(Self::from_pool(pool, schema))
    }

    pub fn from_pool(pool: Pool<Postgres>, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    async fn replace(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize> {
        let target = self.qualified(&schema.name);
        let staging_name = format!("{}__staging", schema.name);
        let staging = self.qualified(&staging_name);

        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(&self.schema)
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {staging}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {staging} ({columns})"))
            .execute(&mut *tx)
            .await?;

        let mut writer = tx
            .copy_in_raw(&format!(
                "COPY {staging} FROM STDIN WITH (FORMAT csv, NULL '')"
            ))
            .await?;

        let height = frame.height();
        for offset in (0..height).step_by(COPY_CHUNK_ROWS) {
            let len = COPY_CHUNK_ROWS.min(height - offset);
            let mut chunk = frame.slice(offset as i64, len);

            let mut buf = Vec::new();
            CsvWriter::new(&mut buf)
                .include_header(false)
                .with_separator(b',')
                .with_null_value(String::new())
                .finish(&mut chunk)?;
            writer.send(buf).await?;
        }
        let copied = writer.finish().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {target}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "ALTER TABLE {staging} RENAME TO {}",
            quote_ident(&schema.name)
        ))
        .execute(&mut *tx)
        .await?;
        if let Some(key) = schema.primary_key() {
            sqlx::query(&format!(
                "ALTER TABLE {target} ADD PRIMARY KEY ({})",
                quote_ident(&key.name)
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(table = %target, rows = copied, "Table replaced");
        Ok(height)
    }
}

impl TableSink for PostgresSink {
    async fn write_table(&self, schema: &TableSchema, frame: &DataFrame) -> Result<usize> {
        self.replace(schema, frame)
            .await
            .map_err(|e| StarError::sink(&schema.name, e))
    }

    fn describe(&self) -> String {
        format!("postgres schema {}", self.schema)
    }
}
