//! Entity Resolver - derives the reference entities from cleaned records
//!
//! One natural-key map per reference type; rows are visited in input order and
//! each key is either reused or assigned the next identifier. Nothing here
//! touches the database.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::aggregate::Fact;
use crate::clean::CleanRecord;
use crate::error::ReferentialIntegrityError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: i32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Municipality {
    pub code: String,
    pub name: String,
    pub region_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrimeType {
    pub id: i32,
    pub name: String,
}

/// A fact row whose free-text foreign fields were replaced by identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRow {
    pub id: i64,
    pub month: u32,
    pub year: i32,
    pub record_count: i64,
    pub metro_flag: bool,
    pub municipality_code: String,
    pub crime_type_id: i32,
}

/// Fully resolved dataset, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub regions: Vec<Region>,
    pub municipalities: Vec<Municipality>,
    pub crime_types: Vec<CrimeType>,
    pub facts: Vec<FactRow>,
    pub rejected: Vec<ReferentialIntegrityError>,
}

impl Resolution {
    /// Denormalized read model for the aggregation views.
    pub fn facts(&self) -> Vec<Fact> {
        let municipality_names: HashMap<&str, &str> = self
            .municipalities
            .iter()
            .map(|m| (m.code.as_str(), m.name.as_str()))
            .collect();
        let crime_type_names: HashMap<i32, &str> = self
            .crime_types
            .iter()
            .map(|t| (t.id, t.name.as_str()))
            .collect();

        self.facts
            .iter()
            .filter_map(|f| {
                Some(Fact {
                    municipality: municipality_names.get(f.municipality_code.as_str())?.to_string(),
                    crime_type: crime_type_names.get(&f.crime_type_id)?.to_string(),
                    month: f.month,
                    year: f.year,
                    record_count: f.record_count,
                })
            })
            .collect()
    }
}

pub fn region_description(code: i32) -> String {
    format!("RISP {}", code)
}

fn synthesized_code(sequence: usize) -> String {
    format!("M{:06}", sequence)
}

/// Natural-key maps built while resolving. Indices point into the output vectors.
#[derive(Default)]
struct Resolver {
    out: Resolution,
    regions: HashSet<i32>,
    municipality_by_name: HashMap<String, usize>,
    municipality_by_code: HashMap<String, usize>,
    crime_type_by_name: HashMap<String, i32>,
    fact_keys: HashSet<(String, i32, u32, i32)>,
    /// First source code seen per name, collected before any row is visited.
    source_codes: HashMap<String, String>,
    /// Every code present in the source; synthesized codes skip these.
    reserved_codes: HashSet<String>,
    synthesized: usize,
}

impl Resolver {
    fn new(records: &[CleanRecord]) -> Self {
        let mut resolver = Self::default();
        for record in records {
            if let Some(code) = &record.municipality_code {
                resolver.reserved_codes.insert(code.clone());
                resolver
                    .source_codes
                    .entry(record.municipality.clone())
                    .or_insert_with(|| code.clone());
            }
        }
        resolver
    }

    /// Code for a name first seen on a row without one: the name's code from
    /// elsewhere in the source, else the next free synthesized code.
    fn code_for_blank(&mut self, name: &str) -> String {
        if let Some(code) = self.source_codes.get(name) {
            return code.clone();
        }
        loop {
            self.synthesized += 1;
            let code = synthesized_code(self.synthesized);
            if !self.reserved_codes.contains(&code) {
                return code;
            }
        }
    }

    fn visit(&mut self, record: &CleanRecord) -> Result<(), ReferentialIntegrityError> {
        let line = record.line;

        if record.region_code <= 0 {
            return Err(ReferentialIntegrityError::UnknownRegion {
                line,
                code: record.region_code,
            });
        }

        // All checks happen before any map is touched.
        let existing = self.municipality_by_name.get(&record.municipality).copied();
        let code = match existing {
            Some(idx) => {
                let known = &self.out.municipalities[idx];
                if known.region_id != record.region_code {
                    return Err(ReferentialIntegrityError::RegionConflict {
                        line,
                        municipality: known.name.clone(),
                        expected: known.region_id,
                        found: record.region_code,
                    });
                }
                if let Some(code) = &record.municipality_code {
                    if *code != known.code {
                        return Err(ReferentialIntegrityError::CodeConflict {
                            line,
                            code: known.code.clone(),
                            existing: known.name.clone(),
                            found: format!("{} ({})", record.municipality, code),
                        });
                    }
                }
                known.code.clone()
            }
            None => {
                let code = match &record.municipality_code {
                    Some(code) => code.clone(),
                    None => self.code_for_blank(&record.municipality),
                };
                if let Some(&idx) = self.municipality_by_code.get(&code) {
                    return Err(ReferentialIntegrityError::CodeConflict {
                        line,
                        code,
                        existing: self.out.municipalities[idx].name.clone(),
                        found: record.municipality.clone(),
                    });
                }
                code
            }
        };

        let crime_type_id = self.crime_type_by_name.get(&record.crime_type).copied();
        if let Some(type_id) = crime_type_id {
            let key = (code.clone(), type_id, record.month, record.year);
            if self.fact_keys.contains(&key) {
                return Err(ReferentialIntegrityError::DuplicateFact {
                    line,
                    municipality: record.municipality.clone(),
                    crime_type: record.crime_type.clone(),
                    month: record.month,
                    year: record.year,
                });
            }
        }

        // Lookup-or-create, Region first so the Municipality reference holds.
        if self.regions.insert(record.region_code) {
            self.out.regions.push(Region {
                id: record.region_code,
                description: region_description(record.region_code),
            });
        }

        if existing.is_none() {
            let idx = self.out.municipalities.len();
            self.out.municipalities.push(Municipality {
                code: code.clone(),
                name: record.municipality.clone(),
                region_id: record.region_code,
            });
            self.municipality_by_name.insert(record.municipality.clone(), idx);
            self.municipality_by_code.insert(code.clone(), idx);
        }

        let crime_type_id = match crime_type_id {
            Some(id) => id,
            None => {
                let id = self.out.crime_types.len() as i32 + 1;
                self.out.crime_types.push(CrimeType {
                    id,
                    name: record.crime_type.clone(),
                });
                self.crime_type_by_name.insert(record.crime_type.clone(), id);
                id
            }
        };

        self.fact_keys
            .insert((code.clone(), crime_type_id, record.month, record.year));
        self.out.facts.push(FactRow {
            id: self.out.facts.len() as i64 + 1,
            month: record.month,
            year: record.year,
            record_count: record.record_count,
            metro_flag: record.metro,
            municipality_code: code,
            crime_type_id,
        });

        Ok(())
    }
}

/// Resolve reference entities and rewrite facts into identifier references.
/// DETERMINISTIC: identifiers depend only on the input order.
pub fn resolve(records: &[CleanRecord]) -> Resolution {
    let mut resolver = Resolver::new(records);

    for record in records {
        if let Err(err) = resolver.visit(record) {
            debug!(%err, "rejecting row");
            resolver.out.rejected.push(err);
        }
    }

    let out = resolver.out;
    info!(
        regions = out.regions.len(),
        municipalities = out.municipalities.len(),
        crime_types = out.crime_types.len(),
        facts = out.facts.len(),
        rejected = out.rejected.len(),
        "entities resolved"
    );
    out
}
