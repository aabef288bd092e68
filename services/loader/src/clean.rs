//! Loader/Cleaner - turns the raw crime export into typed, normalized records
//!
//! Rules (applied per row, input order preserved):
//! - Free text (municipality, crime type) is trimmed and upper-cased
//! - Month, year, record count and region code are coerced to integers
//! - Rows missing an essential value, or failing coercion, are dropped and reported
//! - The metro flag is not essential: blanks default to `false`

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result, RowValidationError};

/// Required columns with the header names accepted for each (compared lowercase).
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("municipio", &["municipio", "municipality"]),
    ("risp", &["risp", "region", "region_code"]),
    ("natureza", &["natureza", "crime_type"]),
    ("mes", &["mes", "month"]),
    ("ano", &["ano", "year"]),
    ("registros", &["registros", "record_count", "count"]),
    ("rmbh", &["rmbh", "metro", "metro_flag"]),
];

/// Optional columns; like the required ones, at most one name per field.
const OPTIONAL_COLUMNS: &[(&str, &[&str])] = &[("cod_municipio", &["cod_municipio", "municipality_code"])];

/// One source row exactly as read, before any coercion.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(alias = "municipality")]
    municipio: Option<String>,
    #[serde(alias = "municipality_code")]
    cod_municipio: Option<String>,
    #[serde(alias = "region", alias = "region_code")]
    risp: Option<String>,
    #[serde(alias = "crime_type")]
    natureza: Option<String>,
    #[serde(alias = "month")]
    mes: Option<String>,
    #[serde(alias = "year")]
    ano: Option<String>,
    #[serde(alias = "record_count", alias = "count")]
    registros: Option<String>,
    #[serde(alias = "metro", alias = "metro_flag")]
    rmbh: Option<String>,
}

/// A row that passed cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanRecord {
    /// 1-indexed source line (the header is line 1).
    pub line: usize,
    pub municipality: String,
    pub municipality_code: Option<String>,
    pub region_code: i32,
    pub crime_type: String,
    pub month: u32,
    pub year: i32,
    pub record_count: i64,
    pub metro: bool,
}

#[derive(Debug, Default)]
pub struct CleanOutcome {
    pub input_rows: usize,
    pub records: Vec<CleanRecord>,
    pub rejected: Vec<RowValidationError>,
}

/// Read the source file. Non UTF-8 exports are decoded as Windows-1252.
pub async fn read_source(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PipelineError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;

    let decoded = decode_source(bytes);
    if let Some(offset) = decoded.invalid_utf8_at {
        warn!(
            source = %path.display(),
            offset,
            "source is not valid UTF-8, whole file re-decoded as Windows-1252"
        );
    }
    Ok(decoded.text)
}

struct DecodedSource {
    text: String,
    /// Byte offset of the first invalid UTF-8 sequence, when the fallback was used.
    invalid_utf8_at: Option<usize>,
}

fn decode_source(bytes: Vec<u8>) -> DecodedSource {
    match String::from_utf8(bytes) {
        Ok(text) => DecodedSource {
            text,
            invalid_utf8_at: None,
        },
        Err(err) => {
            let offset = err.utf8_error().valid_up_to();
            let bytes = err.into_bytes();
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            DecodedSource {
                text: text.into_owned(),
                invalid_utf8_at: Some(offset),
            }
        }
    }
}

/// Validate the header and clean every row.
/// DETERMINISTIC: same content = same records, same rejections, same order.
pub fn clean_csv(content: &str, delimiter: u8) -> Result<CleanOutcome> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: csv::StringRecord = reader
        .headers()
        .map_err(|e| PipelineError::SourceFormat(format!("cannot read header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|(_, names)| !headers.iter().any(|h| names.contains(&h)))
        .map(|(canonical, _)| *canonical)
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SourceFormat(format!(
            "missing required columns {:?}; found {:?}",
            missing,
            headers.iter().collect::<Vec<_>>()
        )));
    }

    // Two names for one field would make every row a duplicate-field error.
    for (canonical, names) in REQUIRED_COLUMNS.iter().chain(OPTIONAL_COLUMNS) {
        let present: Vec<&str> = headers.iter().filter(|h| names.contains(h)).collect();
        if present.len() > 1 {
            return Err(PipelineError::SourceFormat(format!(
                "ambiguous header: {:?} all name column '{}'",
                present, canonical
            )));
        }
    }
    reader.set_headers(headers);

    let mut outcome = CleanOutcome::default();

    for (idx, result) in reader.deserialize::<RawRow>().enumerate() {
        let line = idx + 2;
        outcome.input_rows += 1;

        let cleaned = result
            .map_err(|e| RowValidationError::Malformed {
                line,
                message: e.to_string(),
            })
            .and_then(|raw| clean_row(raw, line));

        match cleaned {
            Ok(record) => outcome.records.push(record),
            Err(err) => {
                debug!(%err, "dropping row");
                outcome.rejected.push(err);
            }
        }
    }

    info!(
        input = outcome.input_rows,
        kept = outcome.records.len(),
        dropped = outcome.rejected.len(),
        "source cleaned"
    );

    Ok(outcome)
}

fn clean_row(raw: RawRow, line: usize) -> std::result::Result<CleanRecord, RowValidationError> {
    let municipality = required_text(raw.municipio, "municipio", line)?.to_uppercase();
    let region_code = narrow_i32(required_integer(raw.risp, "risp", line)?, "risp", line)?;
    let crime_type = required_text(raw.natureza, "natureza", line)?.to_uppercase();

    let month = required_integer(raw.mes, "mes", line)?;
    if !(1..=12).contains(&month) {
        return Err(RowValidationError::OutOfRange {
            line,
            field: "mes",
            value: month,
        });
    }
    let month = month as u32;

    let year_value = required_integer(raw.ano, "ano", line)?;
    let year = narrow_i32(year_value, "ano", line)?;
    if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
        return Err(RowValidationError::OutOfRange {
            line,
            field: "ano",
            value: year_value,
        });
    }

    let record_count = required_integer(raw.registros, "registros", line)?;
    if record_count < 0 {
        return Err(RowValidationError::OutOfRange {
            line,
            field: "registros",
            value: record_count,
        });
    }

    let municipality_code = raw
        .cod_municipio
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    Ok(CleanRecord {
        line,
        municipality,
        municipality_code,
        region_code,
        crime_type,
        month,
        year,
        record_count,
        metro: parse_metro_flag(raw.rmbh.as_deref()),
    })
}

fn required_text(
    value: Option<String>,
    field: &'static str,
    line: usize,
) -> std::result::Result<String, RowValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(RowValidationError::Missing { line, field })
}

fn required_integer(
    value: Option<String>,
    field: &'static str,
    line: usize,
) -> std::result::Result<i64, RowValidationError> {
    let text = required_text(value, field, line)?;
    coerce_integer(&text).ok_or(RowValidationError::NotInteger {
        line,
        field,
        value: text,
    })
}

fn narrow_i32(value: i64, field: &'static str, line: usize) -> std::result::Result<i32, RowValidationError> {
    i32::try_from(value).map_err(|_| RowValidationError::OutOfRange { line, field, value })
}

/// Integers, or decimals with no fractional part ("2023.0").
pub fn coerce_integer(text: &str) -> Option<i64> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value: f64 = text.parse().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// "SIM"/"NÃO" style flags; blank or unknown values count as `false`.
pub fn parse_metro_flag(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_uppercase()) {
        Some(v) => matches!(v.as_str(), "SIM" | "S" | "TRUE" | "1"),
        None => false,
    }
}
