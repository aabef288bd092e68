use std::path::PathBuf;
use thiserror::Error;

/// A single source row that failed cleaning. The row is dropped, the run goes on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowValidationError {
    #[error("line {line}: missing value for '{field}'")]
    Missing { line: usize, field: &'static str },

    #[error("line {line}: '{value}' is not an integer for '{field}'")]
    NotInteger {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {value} is out of range for '{field}'")]
    OutOfRange {
        line: usize,
        field: &'static str,
        value: i64,
    },

    #[error("line {line}: unreadable record: {message}")]
    Malformed { line: usize, message: String },
}

impl RowValidationError {
    pub fn line(&self) -> usize {
        match self {
            Self::Missing { line, .. }
            | Self::NotInteger { line, .. }
            | Self::OutOfRange { line, .. }
            | Self::Malformed { line, .. } => *line,
        }
    }
}

/// A cleaned row whose references cannot be resolved consistently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferentialIntegrityError {
    #[error("line {line}: region code {code} does not identify a region")]
    UnknownRegion { line: usize, code: i32 },

    #[error("line {line}: municipality {municipality} belongs to region {expected}, row says {found}")]
    RegionConflict {
        line: usize,
        municipality: String,
        expected: i32,
        found: i32,
    },

    #[error("line {line}: municipality code {code} is bound to {existing}, row says {found}")]
    CodeConflict {
        line: usize,
        code: String,
        existing: String,
        found: String,
    },

    #[error("line {line}: duplicate record for {municipality} / {crime_type} in {month:02}/{year}")]
    DuplicateFact {
        line: usize,
        municipality: String,
        crime_type: String,
        month: u32,
        year: i32,
    },
}

impl ReferentialIntegrityError {
    pub fn line(&self) -> usize {
        match self {
            Self::UnknownRegion { line, .. }
            | Self::RegionConflict { line, .. }
            | Self::CodeConflict { line, .. }
            | Self::DuplicateFact { line, .. } => *line,
        }
    }
}

/// Errors that abort the current pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source format error: {0}")]
    SourceFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Inconsistent target: {0}")]
    InconsistentTarget(String),

    #[error("{entity} '{key}' already stored with id {found}, resolved as {expected}")]
    IdentifierMismatch {
        entity: &'static str,
        key: String,
        expected: String,
        found: String,
    },

    #[error("Dropped {dropped} of {input} rows ({ratio:.1}%), above the {limit:.1}% limit")]
    ExcessiveDrops {
        dropped: usize,
        input: usize,
        ratio: f64,
        limit: f64,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_validation_display() {
        let err = RowValidationError::NotInteger {
            line: 7,
            field: "ano",
            value: "dois mil".to_string(),
        };
        assert_eq!(err.to_string(), "line 7: 'dois mil' is not an integer for 'ano'");
        assert_eq!(err.line(), 7);
    }

    #[test]
    fn test_duplicate_fact_display() {
        let err = ReferentialIntegrityError::DuplicateFact {
            line: 3,
            municipality: "CONTAGEM".to_string(),
            crime_type: "ROUBO".to_string(),
            month: 2,
            year: 2023,
        };
        assert_eq!(
            err.to_string(),
            "line 3: duplicate record for CONTAGEM / ROUBO in 02/2023"
        );
    }

    #[test]
    fn test_source_read_display() {
        let err = PipelineError::SourceRead {
            path: PathBuf::from("/data/crimes.csv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/crimes.csv"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_excessive_drops_display() {
        let err = PipelineError::ExcessiveDrops {
            dropped: 30,
            input: 100,
            ratio: 30.0,
            limit: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Dropped 30 of 100 rows (30.0%), above the 5.0% limit"
        );
    }
}
