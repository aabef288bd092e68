//! Relational Writer - persists a resolved dataset exactly once
//!
//! The whole load runs in one transaction, in foreign-key order:
//! Region → Municipality → CrimeType → CrimeRecord.
//! If the fact table already holds rows nothing is written.

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::db::{self, TableCounts};
use crate::error::{PipelineError, Result};
use crate::resolve::{CrimeType, FactRow, Municipality, Region, Resolution};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted {
        regions: usize,
        municipalities: usize,
        crime_types: usize,
        crime_records: usize,
    },
    /// The target already held facts; no writes were made.
    Skipped {
        existing: TableCounts,
        /// The existing fact count differs from this dataset's.
        count_mismatch: bool,
    },
}

/// Decide what an already-populated target means for this load.
pub fn check_existing(existing: &TableCounts, planned_facts: usize) -> Result<Option<LoadOutcome>> {
    if existing.crime_records == 0 {
        return Ok(None);
    }
    if existing.references_empty() {
        return Err(PipelineError::InconsistentTarget(format!(
            "{} crime records but {} regions, {} municipalities, {} crime types",
            existing.crime_records, existing.regions, existing.municipalities, existing.crime_types
        )));
    }
    Ok(Some(LoadOutcome::Skipped {
        existing: *existing,
        count_mismatch: existing.crime_records != planned_facts as i64,
    }))
}

/// Load the dataset. Re-running against a loaded target is a no-op.
pub async fn load(pool: &PgPool, resolution: &Resolution) -> Result<LoadOutcome> {
    db::ensure_schema(pool).await?;

    // Dropping `tx` on any early return rolls everything back.
    let mut tx = pool.begin().await?;

    let existing = db::table_counts(&mut *tx).await?;
    if let Some(outcome) = check_existing(&existing, resolution.facts.len())? {
        if let LoadOutcome::Skipped { count_mismatch: true, .. } = outcome {
            warn!(
                existing = existing.crime_records,
                planned = resolution.facts.len(),
                "target holds a different number of facts; it may contain another dataset, not merging"
            );
        }
        info!(existing = existing.crime_records, "facts already loaded, skipping insertion");
        return Ok(outcome);
    }

    for region in &resolution.regions {
        insert_region(&mut tx, region).await?;
    }
    for municipality in &resolution.municipalities {
        insert_municipality(&mut tx, municipality).await?;
    }
    for crime_type in &resolution.crime_types {
        insert_crime_type(&mut tx, crime_type).await?;
    }
    for fact in &resolution.facts {
        insert_crime_record(&mut tx, fact).await?;
    }

    tx.commit().await?;

    let outcome = LoadOutcome::Inserted {
        regions: resolution.regions.len(),
        municipalities: resolution.municipalities.len(),
        crime_types: resolution.crime_types.len(),
        crime_records: resolution.facts.len(),
    };
    info!(?outcome, "dataset loaded");
    Ok(outcome)
}

/// Get or create a region by its code.
async fn insert_region(tx: &mut Transaction<'_, Postgres>, region: &Region) -> Result<()> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT description FROM region WHERE id = $1")
        .bind(region.id)
        .fetch_optional(&mut **tx)
        .await?;

    match existing {
        Some((description,)) if description == region.description => Ok(()),
        Some((description,)) => Err(PipelineError::IdentifierMismatch {
            entity: "region",
            key: region.id.to_string(),
            expected: region.description.clone(),
            found: description,
        }),
        None => {
            sqlx::query("INSERT INTO region (id, description) VALUES ($1, $2)")
                .bind(region.id)
                .bind(&region.description)
                .execute(&mut **tx)
                .await?;
            Ok(())
        }
    }
}

/// Get or create a municipality by its name.
async fn insert_municipality(
    tx: &mut Transaction<'_, Postgres>,
    municipality: &Municipality,
) -> Result<()> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT code FROM municipality WHERE name = $1")
        .bind(&municipality.name)
        .fetch_optional(&mut **tx)
        .await?;

    match existing {
        Some((code,)) if code == municipality.code => Ok(()),
        Some((code,)) => Err(PipelineError::IdentifierMismatch {
            entity: "municipality",
            key: municipality.name.clone(),
            expected: municipality.code.clone(),
            found: code,
        }),
        None => {
            sqlx::query("INSERT INTO municipality (code, name, region_id) VALUES ($1, $2, $3)")
                .bind(&municipality.code)
                .bind(&municipality.name)
                .bind(municipality.region_id)
                .execute(&mut **tx)
                .await?;
            Ok(())
        }
    }
}

/// Get or create a crime type by its name.
async fn insert_crime_type(tx: &mut Transaction<'_, Postgres>, crime_type: &CrimeType) -> Result<()> {
    let existing: Option<(i32,)> = sqlx::query_as("SELECT id FROM crime_type WHERE name = $1")
        .bind(&crime_type.name)
        .fetch_optional(&mut **tx)
        .await?;

    match existing {
        Some((id,)) if id == crime_type.id => Ok(()),
        Some((id,)) => Err(PipelineError::IdentifierMismatch {
            entity: "crime type",
            key: crime_type.name.clone(),
            expected: crime_type.id.to_string(),
            found: id.to_string(),
        }),
        None => {
            sqlx::query("INSERT INTO crime_type (id, name) VALUES ($1, $2)")
                .bind(crime_type.id)
                .bind(&crime_type.name)
                .execute(&mut **tx)
                .await?;
            Ok(())
        }
    }
}

async fn insert_crime_record(tx: &mut Transaction<'_, Postgres>, fact: &FactRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO crime_record (id, month, year, record_count, metro_flag, municipality_code, crime_type_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(fact.id)
    .bind(fact.month as i32)
    .bind(fact.year)
    .bind(fact.record_count)
    .bind(fact.metro_flag)
    .bind(&fact.municipality_code)
    .bind(fact.crime_type_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
