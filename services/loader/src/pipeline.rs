//! Pipeline entry point: clean → resolve → load, each stage run to completion.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::clean::{self, CleanOutcome};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, ReferentialIntegrityError, Result, RowValidationError};
use crate::resolve::{self, Resolution};
use crate::writer::{self, LoadOutcome};

/// Row-level drops of one run, summarized after the stages finish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropSummary {
    pub input_rows: usize,
    pub validation_drops: usize,
    pub integrity_drops: usize,
}

impl DropSummary {
    pub fn dropped(&self) -> usize {
        self.validation_drops + self.integrity_drops
    }

    pub fn kept(&self) -> usize {
        self.input_rows - self.dropped()
    }

    pub fn ratio(&self) -> f64 {
        if self.input_rows == 0 {
            0.0
        } else {
            self.dropped() as f64 / self.input_rows as f64
        }
    }

    /// `Err` when the drop ratio is above `limit`.
    pub fn check(&self, limit: f64) -> Result<()> {
        if self.ratio() > limit {
            return Err(PipelineError::ExcessiveDrops {
                dropped: self.dropped(),
                input: self.input_rows,
                ratio: self.ratio() * 100.0,
                limit: limit * 100.0,
            });
        }
        Ok(())
    }
}

/// A cleaned and resolved dataset, ready to persist.
#[derive(Debug)]
pub struct Prepared {
    pub resolution: Resolution,
    pub validation_errors: Vec<RowValidationError>,
    pub drops: DropSummary,
}

impl Prepared {
    pub fn integrity_errors(&self) -> &[ReferentialIntegrityError] {
        &self.resolution.rejected
    }
}

/// Clean and resolve already-read source content.
pub fn prepare_content(content: &str, config: &PipelineConfig) -> Result<Prepared> {
    let CleanOutcome {
        input_rows,
        records,
        rejected,
    } = clean::clean_csv(content, config.delimiter)?;

    let resolution = resolve::resolve(&records);

    let drops = DropSummary {
        input_rows,
        validation_drops: rejected.len(),
        integrity_drops: resolution.rejected.len(),
    };

    if let Err(err) = drops.check(config.max_drop_ratio) {
        if config.strict {
            return Err(err);
        }
        warn!("{}", err);
    }

    Ok(Prepared {
        resolution,
        validation_errors: rejected,
        drops,
    })
}

/// Read, clean and resolve the configured source. No database involved.
pub async fn prepare(config: &PipelineConfig) -> Result<Prepared> {
    config.validate()?;
    info!(source = %config.source_path.display(), "reading source");
    let content = clean::read_source(&config.source_path).await?;
    prepare_content(&content, config)
}

/// Full pipeline against an open pool.
pub async fn run(config: &PipelineConfig, pool: &PgPool) -> Result<(Prepared, LoadOutcome)> {
    let prepared = prepare(config).await?;
    let outcome = writer::load(pool, &prepared.resolution).await?;
    Ok((prepared, outcome))
}
