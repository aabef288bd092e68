//! Pipeline configuration, built once at startup and validated before use.

use std::path::PathBuf;

use crate::error::{PipelineError, Result};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_DELIMITER: u8 = b';';
pub const DEFAULT_MAX_DROP_RATIO: f64 = 0.05;

/// Which database (and optionally which schema inside it) receives the load.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTarget {
    pub db_url: String,
    pub schema: Option<String>,
}

impl ConnectionTarget {
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source_path: PathBuf,
    /// `None` runs the pipeline without touching a database (dry run).
    pub connection_target: Option<ConnectionTarget>,
    pub top_n: usize,
    pub delimiter: u8,
    /// Fraction of input rows that may be dropped before the run is flagged.
    pub max_drop_ratio: f64,
    /// Turn an excessive drop rate into a failed run instead of a warning.
    pub strict: bool,
}

impl PipelineConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            connection_target: None,
            top_n: DEFAULT_TOP_N,
            delimiter: DEFAULT_DELIMITER,
            max_drop_ratio: DEFAULT_MAX_DROP_RATIO,
            strict: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(PipelineError::Config("source path is empty".to_string()));
        }
        if self.top_n == 0 {
            return Err(PipelineError::Config("top_n must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.max_drop_ratio) {
            return Err(PipelineError::Config(format!(
                "max drop ratio {} is outside [0, 1]",
                self.max_drop_ratio
            )));
        }
        if !self.delimiter.is_ascii() || self.delimiter == b'"' || self.delimiter == b'\n' {
            return Err(PipelineError::Config(format!(
                "unusable delimiter {:?}",
                self.delimiter as char
            )));
        }
        if let Some(target) = &self.connection_target {
            if target.db_url.trim().is_empty() {
                return Err(PipelineError::Config("database URL is empty".to_string()));
            }
            if let Some(schema) = &target.schema {
                validate_schema_name(schema)?;
            }
        }
        Ok(())
    }
}

/// Schema names end up interpolated into DDL, so only plain identifiers pass.
pub fn validate_schema_name(schema: &str) -> Result<()> {
    let mut chars = schema.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && schema.len() <= 63
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("invalid schema name '{}'", schema)))
    }
}
