//! Bill of materials from a schematic hierarchy.
//!
//! Instances are grouped by `(value, footprint)`. DNP parts count toward the
//! quantity and are listed in the DNP column; parts excluded from the BOM are
//! listed in the Excluded column but never counted. A row made only of
//! excluded parts is still emitted with quantity 0 so consumers can decide
//! whether to show it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use serde::Serialize;

use crate::core::Result;
use crate::parser::schematic::SchematicHierarchy;
use crate::projects::pricing_key;

pub const CSV_HEADER: [&str; 10] = [
    "Qty",
    "DNP",
    "Excluded",
    "Value",
    "Footprint",
    "Reference",
    "Library ID",
    "Sheets",
    "Unit Price",
    "Total Price",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BomRow {
    pub qty: usize,
    pub value: String,
    pub footprint: String,
    pub lib_id: String,
    /// Counted references, naturally sorted.
    pub refs: Vec<String>,
    pub sheets: Vec<String>,
    pub dnp: Vec<String>,
    pub excluded: Vec<String>,
    pub unit_price: f64,
    pub total_price: f64,
}

impl BomRow {
    fn first_reference(&self) -> &str {
        self.refs
            .first()
            .or_else(|| self.excluded.first())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BomReport {
    pub rows: Vec<BomRow>,
    pub excluded_instances: usize,
}

impl BomReport {
    pub fn total_qty(&self) -> usize {
        self.rows.iter().map(|r| r.qty).sum()
    }

    pub fn total_price(&self) -> f64 {
        self.rows.iter().map(|r| r.total_price).sum()
    }
}

/// Group every instance in `hierarchy` into rows and price them from
/// `pricing` (keyed `value|footprint`). Keys are compared in canonical form,
/// so stored keys differing only in footprint case or padding still match.
pub fn generate_bom(hierarchy: &SchematicHierarchy, pricing: &BTreeMap<String, f64>) -> BomReport {
    let mut canonical_prices: HashMap<String, f64> = HashMap::new();
    for (key, price) in pricing {
        let canonical = match key.split_once('|') {
            Some((value, footprint)) => pricing_key(value, footprint),
            None => key.clone(),
        };
        // an exact canonical key beats a legacy spelling of the same key
        if canonical == *key || !canonical_prices.contains_key(&canonical) {
            canonical_prices.insert(canonical, *price);
        }
    }

    let mut rows: Vec<BomRow> = Vec::new();
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut excluded_instances = 0;

    for instance in hierarchy.instances() {
        let key = (instance.value.trim().to_string(), instance.footprint.trim().to_string());
        let index = *positions.entry(key.clone()).or_insert_with(|| {
            rows.push(BomRow {
                value: key.0.clone(),
                footprint: key.1.clone(),
                lib_id: instance.lib_id.clone(),
                ..Default::default()
            });
            rows.len() - 1
        });
        let row = &mut rows[index];

        if instance.excluded {
            row.excluded.push(instance.reference.clone());
            excluded_instances += 1;
            continue;
        }
        row.qty += 1;
        row.refs.push(instance.reference.clone());
        if instance.dnp {
            row.dnp.push(instance.reference.clone());
        }
        if !row.sheets.contains(&instance.sheet_path) {
            row.sheets.push(instance.sheet_path.clone());
        }
    }

    for row in &mut rows {
        row.refs.sort_by(|a, b| natural_cmp(a, b));
        row.dnp.sort_by(|a, b| natural_cmp(a, b));
        row.excluded.sort_by(|a, b| natural_cmp(a, b));
        row.unit_price = canonical_prices
            .get(&pricing_key(&row.value, &row.footprint))
            .copied()
            .unwrap_or(0.0);
        row.total_price = row.unit_price * row.qty as f64;
    }
    rows.sort_by(|a, b| natural_cmp(a.first_reference(), b.first_reference()));

    BomReport {
        rows,
        excluded_instances,
    }
}

/// Write rows as CSV with the fixed column order of [`CSV_HEADER`].
pub fn write_csv<W: Write>(rows: &[BomRow], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;
    for row in rows {
        csv.write_record([
            row.qty.to_string(),
            row.dnp.join(","),
            row.excluded.join(","),
            row.value.clone(),
            row.footprint.clone(),
            row.refs.join(","),
            row.lib_id.clone(),
            row.sheets.join(","),
            format!("{:.4}", row.unit_price),
            format!("{:.4}", row.total_price),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Designator order: `R2 < R10`, `C1 < R1`, letters compared case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x, y) {
                    (Chunk::Digits(x), Chunk::Digits(y)) => {
                        let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
                    (Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if digits { Chunk::Digits(chunk) } else { Chunk::Text(chunk) })
    }
}
