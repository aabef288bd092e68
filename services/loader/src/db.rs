//! Postgres connection, target schema and read queries.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::aggregate::Fact;
use crate::config::{validate_schema_name, ConnectionTarget};
use crate::error::Result;

/// Third normal form target: Region ← Municipality ← CrimeRecord → CrimeType.
const SCHEMA_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS region (
        id          INTEGER PRIMARY KEY,
        description VARCHAR(100) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS municipality (
        code      VARCHAR(16) PRIMARY KEY,
        name      VARCHAR(100) NOT NULL UNIQUE,
        region_id INTEGER NOT NULL REFERENCES region (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS crime_type (
        id   INTEGER PRIMARY KEY,
        name VARCHAR(100) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS crime_record (
        id                BIGINT PRIMARY KEY,
        month             INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
        year              INTEGER NOT NULL,
        record_count      BIGINT NOT NULL CHECK (record_count >= 0),
        metro_flag        BOOLEAN NOT NULL,
        municipality_code VARCHAR(16) NOT NULL REFERENCES municipality (code),
        crime_type_id     INTEGER NOT NULL REFERENCES crime_type (id),
        CONSTRAINT crime_record_uc UNIQUE (municipality_code, crime_type_id, month, year)
    )
    "#,
];

/// Row counts of the four target tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub regions: i64,
    pub municipalities: i64,
    pub crime_types: i64,
    pub crime_records: i64,
}

impl TableCounts {
    pub fn references_empty(&self) -> bool {
        self.regions == 0 || self.municipalities == 0 || self.crime_types == 0
    }
}

/// Connect to the target. A named schema is created if absent and becomes the
/// `search_path` of every pooled connection.
pub async fn connect(target: &ConnectionTarget) -> Result<PgPool> {
    let pool = open_pool(target).await?;

    if let Some(schema) = &target.schema {
        pool.execute(format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema).as_str())
            .await?;
    }

    info!(schema = target.schema.as_deref().unwrap_or("public"), "database connected");
    Ok(pool)
}

/// Connect without running any DDL, for readers of an already loaded target.
pub async fn connect_existing(target: &ConnectionTarget) -> Result<PgPool> {
    let pool = open_pool(target).await?;
    info!(
        schema = target.schema.as_deref().unwrap_or("public"),
        "database connected (read-only use)"
    );
    Ok(pool)
}

async fn open_pool(target: &ConnectionTarget) -> Result<PgPool> {
    let mut options = PgPoolOptions::new().max_connections(5);

    if let Some(schema) = &target.schema {
        validate_schema_name(schema)?;
        let set_path = format!("SET search_path TO \"{}\"", schema);
        options = options.after_connect(move |conn, _meta| {
            let set_path = set_path.clone();
            Box::pin(async move {
                conn.execute(set_path.as_str()).await?;
                Ok(())
            })
        });
    }

    Ok(options.connect(&target.db_url).await?)
}

/// Whether every table on the `search_path` that the fact read model joins exists.
pub async fn tables_present(pool: &PgPool) -> Result<bool> {
    let present: bool = sqlx::query_scalar(
        r#"
        SELECT to_regclass('crime_record') IS NOT NULL
           AND to_regclass('municipality') IS NOT NULL
           AND to_regclass('crime_type') IS NOT NULL
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(present)
}

/// Create the target tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for ddl in SCHEMA_DDL {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

pub async fn table_counts<'e, E>(executor: E) -> Result<TableCounts>
where
    E: sqlx::PgExecutor<'e>,
{
    let (regions, municipalities, crime_types, crime_records): (i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM region),
                (SELECT COUNT(*) FROM municipality),
                (SELECT COUNT(*) FROM crime_type),
                (SELECT COUNT(*) FROM crime_record)
            "#,
        )
        .fetch_one(executor)
        .await?;

    Ok(TableCounts {
        regions,
        municipalities,
        crime_types,
        crime_records,
    })
}

/// Persisted facts joined with their reference names, in id order.
pub async fn fetch_facts(pool: &PgPool) -> Result<Vec<Fact>> {
    let rows: Vec<(String, String, i32, i32, i64)> = sqlx::query_as(
        r#"
        SELECT m.name, t.name, c.month, c.year, c.record_count
        FROM crime_record c
        JOIN municipality m ON m.code = c.municipality_code
        JOIN crime_type t ON t.id = c.crime_type_id
        ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(municipality, crime_type, month, year, record_count)| Fact {
            municipality,
            crime_type,
            month: month as u32,
            year,
            record_count,
        })
        .collect())
}
