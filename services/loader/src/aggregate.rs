//! Aggregation Engine - read-only views over the fact set
//!
//! Every view is a pure function of `&[Fact]`: same facts = same rows, same order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// One fact joined with its reference names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub municipality: String,
    pub crime_type: String,
    pub month: u32,
    pub year: i32,
    pub record_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewRow {
    pub label: String,
    pub total: i64,
}

impl ViewRow {
    fn new(label: impl Into<String>, total: i64) -> Self {
        Self {
            label: label.into(),
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub name: &'static str,
    pub title: &'static str,
    pub rows: Vec<ViewRow>,
}

/// Municipalities with the highest total record count.
/// Sorted descending by total, ties broken by name ascending.
pub fn top_municipalities(facts: &[Fact], n: usize) -> Vec<ViewRow> {
    let mut totals: HashMap<&str, i64> = HashMap::new();
    for fact in facts {
        *totals.entry(fact.municipality.as_str()).or_default() += fact.record_count;
    }

    let mut rows: Vec<ViewRow> = totals
        .into_iter()
        .map(|(name, total)| ViewRow::new(name, total))
        .collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.label.cmp(&b.label)));
    rows.truncate(n);
    rows
}

/// Totals for months 1 to 12. Months without records are present with 0.
pub fn monthly_distribution(facts: &[Fact]) -> Vec<ViewRow> {
    let mut totals = [0i64; 12];
    for fact in facts {
        if (1..=12).contains(&fact.month) {
            totals[fact.month as usize - 1] += fact.record_count;
        }
    }
    totals
        .iter()
        .enumerate()
        .map(|(idx, total)| ViewRow::new((idx + 1).to_string(), *total))
        .collect()
}

/// Month 1-3 → Q1, 4-6 → Q2, 7-9 → Q3, 10-12 → Q4.
pub fn quarter_of(month: u32) -> Option<u32> {
    match month {
        1..=12 => Some((month - 1) / 3 + 1),
        _ => None,
    }
}

/// Totals for Q1 to Q4, empty quarters included.
pub fn quarterly_distribution(facts: &[Fact]) -> Vec<ViewRow> {
    let mut totals = [0i64; 4];
    for fact in facts {
        if let Some(quarter) = quarter_of(fact.month) {
            totals[quarter as usize - 1] += fact.record_count;
        }
    }
    totals
        .iter()
        .enumerate()
        .map(|(idx, total)| ViewRow::new(format!("Q{}", idx + 1), *total))
        .collect()
}

/// Totals per crime type, largest first, then by name.
pub fn crime_type_totals(facts: &[Fact]) -> Vec<ViewRow> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for fact in facts {
        *totals.entry(fact.crime_type.as_str()).or_default() += fact.record_count;
    }

    let mut rows: Vec<ViewRow> = totals
        .into_iter()
        .map(|(name, total)| ViewRow::new(name, total))
        .collect();
    // Stable sort over the BTreeMap order keeps ties alphabetical.
    rows.sort_by(|a, b| b.total.cmp(&a.total));
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    TopMunicipalities,
    Monthly,
    Quarterly,
    CrimeTypes,
}

/// Command table: view name → view.
pub const VIEWS: &[(&str, ViewKind)] = &[
    ("top-municipalities", ViewKind::TopMunicipalities),
    ("monthly", ViewKind::Monthly),
    ("quarterly", ViewKind::Quarterly),
    ("crime-types", ViewKind::CrimeTypes),
];

impl ViewKind {
    pub fn name(self) -> &'static str {
        VIEWS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::TopMunicipalities => "Municipalities with the most records",
            Self::Monthly => "Records per month",
            Self::Quarterly => "Records per quarter",
            Self::CrimeTypes => "Records per crime type",
        }
    }

    pub fn compute(self, facts: &[Fact], top_n: usize) -> View {
        let rows = match self {
            Self::TopMunicipalities => top_municipalities(facts, top_n),
            Self::Monthly => monthly_distribution(facts),
            Self::Quarterly => quarterly_distribution(facts),
            Self::CrimeTypes => crime_type_totals(facts),
        };
        View {
            name: self.name(),
            title: self.title(),
            rows,
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownView(pub String);

impl fmt::Display for UnknownView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = VIEWS.iter().map(|(name, _)| *name).collect();
        write!(f, "unknown view '{}', expected one of {}", self.0, names.join(", "))
    }
}

impl std::error::Error for UnknownView {}

impl FromStr for ViewKind {
    type Err = UnknownView;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        VIEWS
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| UnknownView(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(municipality: &str, crime_type: &str, month: u32, count: i64) -> Fact {
        Fact {
            municipality: municipality.to_string(),
            crime_type: crime_type.to_string(),
            month,
            year: 2023,
            record_count: count,
        }
    }

    fn totals(rows: &[ViewRow]) -> Vec<i64> {
        rows.iter().map(|r| r.total).collect()
    }

    // -------------------------------------------------------------------------
    // TOP MUNICIPALITIES
    // -------------------------------------------------------------------------

    #[test]
    fn test_top_municipalities_sorted_and_summed() {
        let facts = vec![
            fact("BETIM", "ROUBO", 1, 5),
            fact("CONTAGEM", "ROUBO", 1, 20),
            fact("BETIM", "FURTO", 2, 30),
            fact("UBERABA", "ROUBO", 3, 1),
        ];
        let rows = top_municipalities(&facts, 10);
        assert_eq!(
            rows,
            vec![
                ViewRow::new("BETIM", 35),
                ViewRow::new("CONTAGEM", 20),
                ViewRow::new("UBERABA", 1),
            ]
        );
    }

    #[test]
    fn test_top_municipalities_ties_by_name() {
        let facts = vec![
            fact("UBERABA", "ROUBO", 1, 10),
            fact("ARAXA", "ROUBO", 1, 10),
            fact("MURIAE", "ROUBO", 1, 10),
            fact("BETIM", "ROUBO", 1, 50),
        ];
        let rows = top_municipalities(&facts, 10);
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["BETIM", "ARAXA", "MURIAE", "UBERABA"]);
    }

    #[test]
    fn test_top_municipalities_truncates() {
        let facts: Vec<Fact> = (0..15)
            .map(|i| fact(&format!("CIDADE {:02}", i), "ROUBO", 1, i as i64))
            .collect();
        let rows = top_municipalities(&facts, 10);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].label, "CIDADE 14");
        assert_eq!(rows[9].label, "CIDADE 05");
    }

    #[test]
    fn test_top_municipalities_empty() {
        assert!(top_municipalities(&[], 10).is_empty());
    }

    // -------------------------------------------------------------------------
    // MONTHLY / QUARTERLY
    // -------------------------------------------------------------------------

    #[test]
    fn test_monthly_always_twelve_entries() {
        let facts = vec![
            fact("BETIM", "ROUBO", 1, 4),
            fact("BETIM", "ROUBO", 6, 5),
            fact("BETIM", "FURTO", 12, 6),
        ];
        let rows = monthly_distribution(&facts);
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0], ViewRow::new("1", 4));
        assert_eq!(rows[5], ViewRow::new("6", 5));
        assert_eq!(rows[11], ViewRow::new("12", 6));
        assert_eq!(totals(&rows).iter().sum::<i64>(), 15);
    }

    #[test]
    fn test_monthly_empty_fact_set() {
        let rows = monthly_distribution(&[]);
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.total == 0));
    }

    #[test]
    fn test_quarter_buckets() {
        assert_eq!(quarter_of(1), Some(1));
        assert_eq!(quarter_of(3), Some(1));
        assert_eq!(quarter_of(4), Some(2));
        assert_eq!(quarter_of(9), Some(3));
        assert_eq!(quarter_of(10), Some(4));
        assert_eq!(quarter_of(12), Some(4));
        assert_eq!(quarter_of(0), None);
        assert_eq!(quarter_of(13), None);
    }

    #[test]
    fn test_quarterly_distribution() {
        let facts = vec![
            fact("BETIM", "ROUBO", 2, 3),
            fact("BETIM", "ROUBO", 3, 4),
            fact("BETIM", "ROUBO", 11, 8),
        ];
        let rows = quarterly_distribution(&facts);
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Q1", "Q2", "Q3", "Q4"]);
        assert_eq!(totals(&rows), vec![7, 0, 0, 8]);
    }

    // -------------------------------------------------------------------------
    // CRIME TYPES
    // -------------------------------------------------------------------------

    #[test]
    fn test_crime_type_totals() {
        let facts = vec![
            fact("BETIM", "ROUBO", 1, 3),
            fact("CONTAGEM", "FURTO", 1, 9),
            fact("UBERABA", "ROUBO", 2, 4),
            fact("UBERABA", "ESTUPRO", 2, 7),
        ];
        let rows = crime_type_totals(&facts);
        assert_eq!(
            rows,
            vec![
                ViewRow::new("FURTO", 9),
                ViewRow::new("ESTUPRO", 7),
                ViewRow::new("ROUBO", 7),
            ]
        );
    }

    // -------------------------------------------------------------------------
    // COMMAND TABLE
    // -------------------------------------------------------------------------

    #[test]
    fn test_view_names_round_trip() {
        for (name, kind) in VIEWS {
            assert_eq!(name.parse::<ViewKind>().unwrap(), *kind);
            assert_eq!(kind.name(), *name);
        }
    }

    #[test]
    fn test_unknown_view() {
        let err = "pie-chart".parse::<ViewKind>().unwrap_err();
        assert!(err.to_string().contains("top-municipalities"));
    }

    #[test]
    fn test_compute_dispatches() {
        let facts = vec![fact("BETIM", "ROUBO", 1, 3)];
        let view = ViewKind::Monthly.compute(&facts, 10);
        assert_eq!(view.name, "monthly");
        assert_eq!(view.rows.len(), 12);
        let view = ViewKind::TopMunicipalities.compute(&facts, 1);
        assert_eq!(view.rows, vec![ViewRow::new("BETIM", 3)]);
    }

    #[test]
    fn test_views_are_deterministic() {
        let facts = vec![
            fact("B", "X", 1, 1),
            fact("A", "Y", 2, 1),
            fact("C", "Z", 3, 1),
        ];
        for (_, kind) in VIEWS {
            assert_eq!(kind.compute(&facts, 10), kind.compute(&facts, 10));
        }
    }
}
